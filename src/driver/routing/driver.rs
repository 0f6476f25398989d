//! 라우팅 드라이버
//!
//! 클러스터 환경에서 역할 기반 자동 라우팅을 지원하는 드라이버입니다.
//! nerva:// 스킴을 사용하며, 시드 라우터 목록에서 토폴로지를 발견합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::gram::WireValue;

use super::super::driver::{strip_scheme, Address, AuthToken, DriverConfig};
use super::super::error::{DriverError, DriverResult};
use super::super::pool::{ConnectionPool, GramConnector, PoolMetrics};
use super::super::resolver::{AddressResolver, SecurityConfig, StaticResolver};
use super::super::retry::{RetryConfig, RetryLogic};
use super::super::session::{ConnectionProvider, Session, SessionConfig};
use super::registry::{ProcedureRediscovery, RoutingTableRegistry};
use super::table::RoutingTable;

// ============================================================================
// RoutingDriver - 라우팅 드라이버
// ============================================================================

/// 라우팅 드라이버
pub struct RoutingDriver {
    /// 드라이버 설정
    config: DriverConfig,
    /// 시드 라우터 주소
    seed_routers: Vec<Address>,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 라우팅 테이블 레지스트리
    registry: Arc<RoutingTableRegistry>,
    /// 재시도 실행기
    retry: Arc<RetryLogic>,
    /// 열린 상태
    open: Arc<RwLock<bool>>,
}

impl RoutingDriver {
    /// 새 라우팅 드라이버 생성
    ///
    /// URI 형식: `nerva://host1:port1,host2:port2,...`
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let seed_routers = parse_routing_uri(uri)?;
        let config = DriverConfig {
            address: seed_routers[0].clone(),
            auth,
            encrypted: uri.contains("+s://") || uri.contains("+ssc://"),
            ..DriverConfig::default()
        };

        let resolver = Arc::new(StaticResolver::new(SecurityConfig {
            encrypted: config.encrypted,
            trust: config.trust_strategy.clone(),
        }));
        Self::with_resolver(config, seed_routers, resolver)
    }

    /// 설정과 해석기로 라우팅 드라이버 생성
    pub fn with_resolver(
        config: DriverConfig,
        seed_routers: Vec<Address>,
        resolver: Arc<dyn AddressResolver>,
    ) -> DriverResult<Self> {
        if seed_routers.is_empty() {
            return Err(DriverError::configuration(
                "At least one router address is required",
            ));
        }

        let routing_context = routing_context(&seed_routers);
        let connector = Arc::new(GramConnector {
            identity: config.identity(Some(routing_context.clone())),
            connect_timeout: config.connection_timeout,
        });

        let pool_config = super::super::pool::PoolConfig {
            max_size: config.max_connection_pool_size,
            acquisition_timeout: config.connection_acquisition_timeout,
            connection_timeout: config.connection_timeout,
            max_lifetime: config.max_connection_lifetime,
            idle_timeout: config.idle_timeout,
            idle_time_before_test: config.idle_time_before_test,
        };
        let pool = Arc::new(ConnectionPool::new(pool_config, connector));

        let rediscovery = Arc::new(ProcedureRediscovery::new(pool.clone(), routing_context));
        let registry = Arc::new(RoutingTableRegistry::new(
            rediscovery,
            resolver,
            seed_routers.clone(),
            config.routing_table_retention,
        ));

        let retry = Arc::new(RetryLogic::new(
            RetryConfig {
                max_retry_time: config.max_transaction_retry_time,
                ..RetryConfig::default()
            },
            config.transient_codes.clone(),
        ));

        Ok(Self {
            config,
            seed_routers,
            pool,
            registry,
            retry,
            open: Arc::new(RwLock::new(true)),
        })
    }

    /// 세션 생성
    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(Session::new(
            self.pool.clone(),
            ConnectionProvider::Routed(self.registry.clone()),
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

    /// 시드 라우터 목록
    pub fn seed_routers(&self) -> &[Address] {
        &self.seed_routers
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

    /// 연결 테스트 - 시드 라우터 중 하나에 닿으면 성공
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;

        for router in &self.seed_routers {
            match self.pool.acquire(router).await {
                Ok(channel) => match channel.reset().await {
                    Ok(()) => {
                        let _ = channel.release();
                        return Ok(());
                    }
                    Err(_) => channel.discard(),
                },
                Err(e) => {
                    tracing::warn!(router = %router, error = %e, "connectivity probe failed");
                }
            }
        }

        Err(DriverError::service_unavailable(
            "Unable to connect to any seed router",
        ))
    }

    /// 데이터베이스의 현재 라우팅 테이블 (필요하면 갱신)
    pub async fn routing_table(&self, database: &str) -> DriverResult<RoutingTable> {
        self.ensure_open()?;
        self.registry.routing_table(database).await
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> RoutingDriverMetrics {
        RoutingDriverMetrics {
            pool: self.pool.metrics(),
            routing_table_count: self.registry.table_count(),
        }
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

impl fmt::Debug for RoutingDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingDriver")
            .field("seed_routers", &self.seed_routers)
            .field("open", &*self.open.read())
            .finish()
    }
}

/// 라우팅 드라이버 메트릭
#[derive(Debug, Clone, Default)]
pub struct RoutingDriverMetrics {
    /// 풀 메트릭 합계
    pub pool: PoolMetrics,
    /// 캐시된 라우팅 테이블 수
    pub routing_table_count: usize,
}

/// HELLO와 라우팅 프로시저에 실리는 라우팅 컨텍스트
fn routing_context(seed_routers: &[Address]) -> HashMap<String, WireValue> {
    let joined = seed_routers
        .iter()
        .map(|a| a.to_socket_addr())
        .collect::<Vec<_>>()
        .join(",");

    let mut context = HashMap::new();
    context.insert("address".to_string(), WireValue::String(joined));
    context
}

/// URI가 라우팅 드라이버용인지 확인
pub fn is_routing_uri(uri: &str) -> bool {
    uri.starts_with("nerva://")
        || uri.starts_with("nerva+s://")
        || uri.starts_with("nerva+ssc://")
}

/// URI에서 쉼표로 구분된 시드 라우터 목록 파싱
pub fn parse_routing_uri(uri: &str) -> DriverResult<Vec<Address>> {
    let stripped = strip_scheme(uri);

    let mut routers = Vec::new();
    for part in stripped.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let address = Address::parse(part).ok_or_else(|| {
            DriverError::configuration(format!("Invalid router address: {}", part))
        })?;
        routers.push(address);
    }

    if routers.is_empty() {
        return Err(DriverError::configuration("No router addresses in URI"));
    }
    Ok(routers)
}

// ============================================================================
// Tests
// ============================================================================
