//! Driver Module
//!
//! Step 4: 클라이언트 드라이버 코어
//!
//! # Milestones
//!
//! - M4.0: 드라이버 (Driver, DriverConfig, AuthToken, Address)
//! - M4.1: 세션 관리 (Session, SessionConfig, 북마크 전달)
//! - M4.2: 연결 풀링 (ConnectionPool, PoolConfig, ChannelConnector)
//! - M4.3: 채널/디스패처 (Channel, FIFO 응답 매칭)
//! - M4.4: 버전 전략 (ProtocolVersion, 기능 게이트)
//! - M4.5: 트랜잭션 API (Transaction, TransactionConfig)
//! - M4.6: 재시도 (RetryLogic, 지수 백오프)
//! - M4.7: 라우팅 (RoutingDriver, RoutingTableRegistry)
//!
//! # Example
//!
//! ```ignore
//! use nerva_driver::driver::{Driver, AuthToken, SessionConfig};
//!
//! // 단일 서버 드라이버 (gram://)
//! let driver = Driver::new("gram://localhost:7787", AuthToken::basic("nerva", "password"))?;
//!
//! // 세션 생성 및 쿼리 실행
//! let mut session = driver.default_session()?;
//! let result = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! for record in &result.records {
//!     println!("{:?}", record);
//! }
//!
//! // 트랜잭션
//! let mut tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params! {"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! driver.close();
//! ```
//!
//! # Routing Driver Example
//!
//! ```ignore
//! use nerva_driver::driver::{RoutingDriver, AuthToken, SessionConfig};
//! use nerva_driver::gram::AccessMode;
//!
//! // 라우팅 드라이버 (nerva://) - 클러스터용
//! let driver = RoutingDriver::new(
//!     "nerva://core1:7787,core2:7787",
//!     AuthToken::basic("admin", "password"),
//! )?;
//!
//! // 읽기 세션 (팔로워로 자동 라우팅)
//! let session = driver.session(
//!     SessionConfig::builder().with_read_access().build()
//! )?;
//!
//! driver.close();
//! ```

pub mod routing;
mod channel;
mod driver;
mod error;
mod pool;
mod protocol;
mod resolver;
mod retry;
mod session;
mod transaction;

// Re-exports
pub use channel::{Channel, Exchange, ResponseFuture};
pub use driver::{
    Address, AuthToken, Driver, DriverConfig, DriverConfigBuilder, DEFAULT_PORT, USER_AGENT,
};
pub use error::{DriverError, DriverResult, TransientCodes};
pub use pool::{
    ChannelConnector, ConnectionPool, GramConnector, PoolConfig, PoolConfigBuilder, PoolMetrics,
    PooledChannel,
};
pub use protocol::{ChannelIdentity, ProtocolVersion, QueryOutcome, TxContext};
pub use resolver::{AddressResolver, SecurityConfig, StaticResolver, TrustStrategy};
pub use retry::{RetryConfig, RetryLogic};
pub use routing::{RoutingDriver, RoutingDriverMetrics, RoutingTable, RoutingTableRegistry};
pub use session::{QueryResult, Session, SessionConfig, SessionConfigBuilder};
pub use transaction::{Transaction, TransactionConfig, TransactionState};

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.into(), $crate::gram::WireValue::from($value));
        )+
        map
    }};
}
