//! M4.0: Driver
//!
//! 드라이버 인스턴스 및 설정

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::gram::WireValue;

use super::error::{DriverError, DriverResult, TransientCodes};
use super::pool::{ConnectionPool, GramConnector, PoolConfig, PoolMetrics};
use super::protocol::ChannelIdentity;
use super::resolver::TrustStrategy;
use super::retry::{RetryConfig, RetryLogic};
use super::session::{ConnectionProvider, Session, SessionConfig};

/// 기본 Gram 포트
pub const DEFAULT_PORT: u16 = 7787;

/// 드라이버 User Agent
pub const USER_AGENT: &str = concat!("NervaDriver/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Debug, Clone, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer { token: String },
    /// 커스텀 인증
    Custom {
        scheme: String,
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        parameters: HashMap<String, String>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic 인증 토큰 생성 (realm 포함)
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// HELLO에 실리는 와이어 맵으로 변환
    pub fn to_wire_map(&self) -> HashMap<String, WireValue> {
        let mut map = HashMap::new();
        map.insert(
            "scheme".to_string(),
            WireValue::String(self.scheme().to_string()),
        );

        match self {
            Self::None => {}
            Self::Basic {
                username,
                password,
                realm,
            } => {
                map.insert("principal".to_string(), WireValue::String(username.clone()));
                map.insert(
                    "credentials".to_string(),
                    WireValue::String(password.clone()),
                );
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), WireValue::String(realm.clone()));
                }
            }
            Self::Bearer { token } => {
                map.insert("credentials".to_string(), WireValue::String(token.clone()));
            }
            Self::Custom {
                principal,
                credentials,
                realm,
                parameters,
                ..
            } => {
                if let Some(principal) = principal {
                    map.insert(
                        "principal".to_string(),
                        WireValue::String(principal.clone()),
                    );
                }
                if let Some(credentials) = credentials {
                    map.insert(
                        "credentials".to_string(),
                        WireValue::String(credentials.clone()),
                    );
                }
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), WireValue::String(realm.clone()));
                }
                for (key, value) in parameters {
                    map.insert(key.clone(), WireValue::String(value.clone()));
                }
            }
        }
        map
    }
}

// ============================================================================
// Address - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl Address {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// "host" 또는 "host:port" 문자열 파싱
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.len() {
            1 if !parts[0].is_empty() => Some(Self::new(parts[0], DEFAULT_PORT)),
            2 => {
                let port = parts[1].parse().ok()?;
                Some(Self::new(parts[0], port))
            }
            _ => None,
        }
    }

    /// URI에서 파싱
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let stripped = strip_scheme(uri);
        Self::parse(stripped)
            .ok_or_else(|| DriverError::configuration(format!("Invalid server address: {}", uri)))
    }

    /// 소켓 주소 문자열로 변환
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// URI 스킴 접두사 제거
pub(crate) fn strip_scheme(uri: &str) -> &str {
    uri.trim_start_matches("gram://")
        .trim_start_matches("gram+s://")
        .trim_start_matches("gram+ssc://")
        .trim_start_matches("nerva://")
        .trim_start_matches("nerva+s://")
        .trim_start_matches("nerva+ssc://")
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 서버 주소
    pub address: Address,
    /// 인증 토큰
    pub auth: AuthToken,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략
    pub trust_strategy: TrustStrategy,
    /// 주소당 연결 풀 최대 크기
    pub max_connection_pool_size: usize,
    /// 연결 획득 타임아웃
    pub connection_acquisition_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 연결 최대 수명
    pub max_connection_lifetime: Duration,
    /// 유휴 타임아웃
    pub idle_timeout: Duration,
    /// 생존 확인 전 허용 유휴 시간
    pub idle_time_before_test: Duration,
    /// 최대 트랜잭션 재시도 시간
    pub max_transaction_retry_time: Duration,
    /// 재시도 가능한 서버 코드 분류표
    pub transient_codes: TransientCodes,
    /// 미사용 라우팅 테이블 보존 기간
    pub routing_table_retention: Duration,
    /// User Agent
    pub user_agent: String,
    /// PULL 배치 크기
    pub fetch_size: i64,
}

impl DriverConfig {
    /// 새 설정 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let encrypted = uri.contains("+s://") || uri.contains("+ssc://");
        let address = Address::from_uri(uri)?;

        Ok(Self {
            address,
            auth,
            encrypted,
            ..Self::default()
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.max_connection_pool_size,
            acquisition_timeout: self.connection_acquisition_timeout,
            connection_timeout: self.connection_timeout,
            max_lifetime: self.max_connection_lifetime,
            idle_timeout: self.idle_timeout,
            idle_time_before_test: self.idle_time_before_test,
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retry_time: self.max_transaction_retry_time,
            ..RetryConfig::default()
        }
    }

    pub(crate) fn identity(
        &self,
        routing_context: Option<HashMap<String, WireValue>>,
    ) -> ChannelIdentity {
        ChannelIdentity {
            user_agent: self.user_agent.clone(),
            auth: self.auth.to_wire_map(),
            routing_context,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: Address::default(),
            auth: AuthToken::default(),
            encrypted: false,
            trust_strategy: TrustStrategy::default(),
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_connection_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            idle_time_before_test: Duration::from_secs(30),
            max_transaction_retry_time: Duration::from_secs(30),
            transient_codes: TransientCodes::default(),
            routing_table_retention: Duration::from_secs(300),
            user_agent: USER_AGENT.to_string(),
            fetch_size: 1000,
        }
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// TLS 암호화 설정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// TLS 신뢰 전략 설정
    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// 재시도 분류표 설정
    pub fn with_transient_codes(mut self, codes: TransientCodes) -> Self {
        self.config.transient_codes = codes;
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// PULL 배치 크기 설정
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// Driver - 단일 서버 드라이버
// ============================================================================

/// 단일 서버 드라이버 (gram:// 스킴)
pub struct Driver {
    /// 설정
    config: DriverConfig,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 재시도 실행기
    retry: Arc<RetryLogic>,
    /// 열린 상태
    open: Arc<RwLock<bool>>,
}

impl Driver {
    /// 새 드라이버 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let config = DriverConfig::new(uri, auth)?;
        Self::with_config(config)
    }

    /// 설정으로 드라이버 생성
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        let connector = Arc::new(GramConnector {
            identity: config.identity(None),
            connect_timeout: config.connection_timeout,
        });
        let pool = Arc::new(ConnectionPool::new(config.pool_config(), connector));
        let retry = Arc::new(RetryLogic::new(
            config.retry_config(),
            config.transient_codes.clone(),
        ));

        Ok(Self {
            config,
            pool,
            retry,
            open: Arc::new(RwLock::new(true)),
        })
    }

    /// 세션 생성
    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(Session::new(
            self.pool.clone(),
            ConnectionProvider::Direct(self.config.address.clone()),
            self.retry.clone(),
            config,
            self.config.fetch_size,
        ))
    }

    /// 기본 설정으로 세션 생성
    pub fn default_session(&self) -> DriverResult<Session> {
        self.session(SessionConfig::default())
    }

    /// 드라이버 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 드라이버 종료 (멱등)
    pub fn close(&self) {
        let mut open = self.open.write();
        if !*open {
            return;
        }
        *open = false;
        drop(open);

        self.pool.close();
    }

    /// 연결 테스트
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;
        let channel = self.pool.acquire(&self.config.address).await?;
        let probe = channel.reset().await;
        match probe {
            Ok(()) => {
                let _ = channel.release();
                Ok(())
            }
            Err(e) => {
                channel.discard();
                Err(e)
            }
        }
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    /// 열린 상태 확인
    fn ensure_open(&self) -> DriverResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(DriverError::illegal_state("Driver is closed"))
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.address)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gram::GramErrorCode;

    #[test]
    fn test_auth_token_basic() {
        let auth = AuthToken::basic("nerva", "secret");
        assert_eq!(auth.scheme(), "basic");

        let map = auth.to_wire_map();
        assert_eq!(map.get("scheme").unwrap().as_str(), Some("basic"));
        assert_eq!(map.get("principal").unwrap().as_str(), Some("nerva"));
        assert_eq!(map.get("credentials").unwrap().as_str(), Some("secret"));
        assert!(map.get("realm").is_none());
    }

    #[test]
    fn test_auth_token_basic_with_realm() {
        let auth = AuthToken::basic_with_realm("nerva", "secret", "native");
        let map = auth.to_wire_map();
        assert_eq!(map.get("realm").unwrap().as_str(), Some("native"));
    }

    #[test]
    fn test_auth_token_bearer() {
        let auth = AuthToken::bearer("my-token");
        assert_eq!(auth.scheme(), "bearer");

        let map = auth.to_wire_map();
        assert_eq!(map.get("credentials").unwrap().as_str(), Some("my-token"));
        assert!(map.get("principal").is_none());
    }

    #[test]
    fn test_auth_token_none() {
        let auth = AuthToken::none();
        assert_eq!(auth.scheme(), "none");
        assert_eq!(auth.to_wire_map().len(), 1);
    }

    #[test]
    fn test_address_parse() {
        let addr = Address::parse("core1").unwrap();
        assert_eq!(addr.host, "core1");
        assert_eq!(addr.port, DEFAULT_PORT);

        let addr = Address::parse("core1:7788").unwrap();
        assert_eq!(addr.port, 7788);

        assert!(Address::parse("a:b:c").is_none());
        assert!(Address::parse("core1:notaport").is_none());
        assert!(Address::parse("").is_none());
    }

    #[test]
    fn test_address_from_uri() {
        let addr = Address::from_uri("gram://localhost:7787").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 7787);

        let addr = Address::from_uri("gram://localhost").unwrap();
        assert_eq!(addr.port, DEFAULT_PORT);

        let addr = Address::from_uri("gram+s://secure.example.com:7788").unwrap();
        assert_eq!(addr.host, "secure.example.com");
        assert_eq!(addr.port, 7788);

        let addr = Address::from_uri("nerva://cluster.example.com").unwrap();
        assert_eq!(addr.host, "cluster.example.com");
    }

    #[test]
    fn test_address_display() {
        let addr = Address::new("core1", 7787);
        assert_eq!(addr.to_string(), "core1:7787");
        assert_eq!(addr.to_socket_addr(), "core1:7787");
    }

    #[test]
    fn test_driver_config() {
        let config =
            DriverConfig::new("gram://localhost:7787", AuthToken::basic("nerva", "x")).unwrap();

        assert_eq!(config.address.host, "localhost");
        assert!(!config.encrypted);
        assert_eq!(config.max_connection_pool_size, 100);
        assert_eq!(config.fetch_size, 1000);
    }

    #[test]
    fn test_driver_config_encrypted() {
        let config = DriverConfig::new("gram+s://localhost:7787", AuthToken::none()).unwrap();
        assert!(config.encrypted);

        let config = DriverConfig::new("nerva+ssc://localhost:7787", AuthToken::none()).unwrap();
        assert!(config.encrypted);
    }

    #[test]
    fn test_driver_config_builder() {
        let config = DriverConfig::builder("gram://localhost:7787", AuthToken::none())
            .unwrap()
            .with_max_connection_pool_size(50)
            .with_connection_timeout(Duration::from_secs(10))
            .with_max_transaction_retry_time(Duration::from_secs(15))
            .with_fetch_size(500)
            .build();

        assert_eq!(config.max_connection_pool_size, 50);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.max_transaction_retry_time, Duration::from_secs(15));
        assert_eq!(config.fetch_size, 500);
    }

    #[test]
    fn test_driver_config_custom_transient_codes() {
        let config = DriverConfig::builder("gram://localhost", AuthToken::none())
            .unwrap()
            .with_transient_codes(TransientCodes {
                prefixes: vec![],
                codes: vec!["Custom.Code".to_string()],
            })
            .build();

        assert!(config.transient_codes.matches("Custom.Code"));
        assert!(!config.transient_codes.matches(GramErrorCode::DEADLOCK_DETECTED));
    }

    #[test]
    fn test_driver_creation_and_close() {
        let driver = Driver::new("gram://localhost:7787", AuthToken::none()).unwrap();
        assert!(driver.session(SessionConfig::default()).is_ok());

        driver.close();
        driver.close(); // 멱등

        let err = driver.session(SessionConfig::default()).unwrap_err();
        assert!(matches!(err, DriverError::IllegalState(_)));
    }

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("NervaDriver/"));
    }
}
