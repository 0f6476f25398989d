//! 라우팅 테이블 레지스트리
//!
//! 데이터베이스별 라우팅 테이블 캐시와 재발견을 관리합니다.
//!
//! 오래된 테이블은 절대 주소를 내주지 않습니다. 재발견은 데이터베이스당
//! 동시에 하나만 진행되며, 늦게 온 호출자는 같은 재발견을 기다립니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};

use crate::gram::{AccessMode, WireValue};

use super::super::driver::Address;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::ConnectionPool;
use super::super::protocol::TxContext;
use super::super::resolver::AddressResolver;
use super::table::{RoutingTable, ServerRole};

/// 라우팅 테이블 조회 프로시저
pub const ROUTING_PROCEDURE: &str = "CALL routing.table($context, $database)";

/// 기본 데이터베이스를 가리키는 센티널 이름
pub const DEFAULT_DATABASE: &str = "";

// ============================================================================
// Rediscovery - 재발견 심
// ============================================================================

/// 라우터들을 차례로 시도해 새 라우팅 테이블을 받아오는 전략
pub trait Rediscovery: Send + Sync {
    /// 라우터 후보를 순서대로 시도해 테이블을 조회
    fn lookup<'a>(
        &'a self,
        database: &'a str,
        routers: &'a [Address],
    ) -> BoxFuture<'a, DriverResult<RoutingTable>>;
}

/// 풀을 통해 라우팅 프로시저를 호출하는 기본 재발견 구현
pub struct ProcedureRediscovery {
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// HELLO와 프로시저 호출에 실리는 라우팅 컨텍스트
    routing_context: HashMap<String, WireValue>,
}

impl ProcedureRediscovery {
    /// 새 재발견 전략 생성
    pub fn new(pool: Arc<ConnectionPool>, routing_context: HashMap<String, WireValue>) -> Self {
        Self {
            pool,
            routing_context,
        }
    }

    /// 라우터 하나에서 프로시저 호출
    async fn lookup_on(&self, router: &Address, database: &str) -> DriverResult<RoutingTable> {
        let mut channel = self.pool.acquire(router).await?;

        let mut parameters = HashMap::new();
        parameters.insert(
            "context".to_string(),
            WireValue::Map(self.routing_context.clone()),
        );
        let database_param = if database == DEFAULT_DATABASE {
            WireValue::Null
        } else {
            WireValue::String(database.to_string())
        };
        parameters.insert("database".to_string(), database_param);

        // 시스템 프로시저는 기본 데이터베이스에 읽기 전용으로 질의한다
        let ctx = TxContext {
            mode: AccessMode::Read,
            ..Default::default()
        };

        let protocol = channel.protocol();
        let outcome = protocol
            .run_in_auto_commit_transaction(&mut channel, ROUTING_PROCEDURE, parameters, &ctx, -1)
            .await;

        match outcome {
            Ok(outcome) => {
                let _ = channel.release();
                let record = outcome.records.first().ok_or_else(|| {
                    DriverError::protocol("Routing procedure returned no records")
                })?;
                RoutingTable::from_procedure_record(database, &outcome.keys, record)
            }
            Err(e) => {
                channel.discard();
                Err(e)
            }
        }
    }
}

impl Rediscovery for ProcedureRediscovery {
    fn lookup<'a>(
        &'a self,
        database: &'a str,
        routers: &'a [Address],
    ) -> BoxFuture<'a, DriverResult<RoutingTable>> {
        Box::pin(async move {
            for router in routers {
                match self.lookup_on(router, database).await {
                    Ok(table) => return Ok(table),
                    Err(e) => {
                        tracing::warn!(router = %router, error = %e, "routing lookup failed");
                    }
                }
            }
            Err(DriverError::service_unavailable(format!(
                "Unable to retrieve a routing table for database '{}' from any router",
                database
            )))
        })
    }
}

// ============================================================================
// RoutingTableRegistry - 레지스트리
// ============================================================================

/// 테이블 캐시 엔트리
struct TableEntry {
    table: RoutingTable,
    /// 레지스트리 기동 시점 기준 마지막 사용 시각 (ms)
    last_used_ms: AtomicU64,
    /// 리더 라운드 로빈 커서
    reader_index: AtomicUsize,
    /// 라이터 라운드 로빈 커서
    writer_index: AtomicUsize,
}

impl TableEntry {
    fn new(table: RoutingTable, now_ms: u64) -> Self {
        Self {
            table,
            last_used_ms: AtomicU64::new(now_ms),
            reader_index: AtomicUsize::new(0),
            writer_index: AtomicUsize::new(0),
        }
    }
}

/// 데이터베이스별 라우팅 테이블 레지스트리
pub struct RoutingTableRegistry {
    /// 데이터베이스별 테이블
    tables: RwLock<HashMap<String, TableEntry>>,
    /// 데이터베이스별 재발견 직렬화 잠금
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// 재발견 전략
    rediscovery: Arc<dyn Rediscovery>,
    /// 시드 주소 해석기
    resolver: Arc<dyn AddressResolver>,
    /// 초기 라우터 주소
    initial_routers: Vec<Address>,
    /// 미사용 테이블 보존 기간
    retention: Duration,
    /// 상대 시계 기준점
    epoch: Instant,
}

impl RoutingTableRegistry {
    /// 새 레지스트리 생성
    pub fn new(
        rediscovery: Arc<dyn Rediscovery>,
        resolver: Arc<dyn AddressResolver>,
        initial_routers: Vec<Address>,
        retention: Duration,
    ) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            rediscovery,
            resolver,
            initial_routers,
            retention,
            epoch: Instant::now(),
        }
    }

    /// 접근 모드에 맞는 서버 주소 획득
    ///
    /// 테이블이 없거나 만료되었거나 역할이 소진되었으면 먼저 재발견을
    /// 수행합니다. 오래된 테이블의 주소는 절대 반환되지 않습니다.
    pub async fn acquire_address(
        &self,
        database: &str,
        mode: AccessMode,
    ) -> DriverResult<Address> {
        self.purge_unused(database);

        let role = ServerRole::for_mode(mode);
        if let Some(address) = self.select(database, role) {
            return Ok(address);
        }

        self.refresh(database, role).await?;

        self.select(database, role).ok_or_else(|| {
            DriverError::service_unavailable(format!(
                "No servers with role {} available for database '{}'",
                role.as_str(),
                database
            ))
        })
    }

    /// 갱신까지 마친 현재 테이블 스냅샷
    pub async fn routing_table(&self, database: &str) -> DriverResult<RoutingTable> {
        let needs_refresh = {
            let tables = self.tables.read();
            match tables.get(database) {
                Some(entry) => entry.table.is_expired(),
                None => true,
            }
        };
        if needs_refresh {
            self.refresh(database, ServerRole::Router).await?;
        }

        let tables = self.tables.read();
        tables
            .get(database)
            .map(|entry| entry.table.clone())
            .ok_or_else(|| {
                DriverError::service_unavailable(format!(
                    "No routing table for database '{}'",
                    database
                ))
            })
    }

    /// 연결 실패한 주소를 테이블에서 제거
    ///
    /// 역할이 모두 소진되면 다음 획득에서 재발견이 일어납니다.
    pub fn forget(&self, database: &str, address: &Address) {
        let mut tables = self.tables.write();
        if let Some(entry) = tables.get_mut(database) {
            entry.table.forget(address);
            tracing::debug!(database, address = %address, "address removed from routing table");
        }
    }

    /// 캐시된 데이터베이스 수
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// 신선한 테이블에서 라운드 로빈으로 주소 선택
    fn select(&self, database: &str, role: ServerRole) -> Option<Address> {
        let tables = self.tables.read();
        let entry = tables.get(database)?;

        if entry.table.is_stale_for(role) {
            return None;
        }

        entry.last_used_ms.store(self.now_ms(), Ordering::Relaxed);

        let servers = entry.table.servers_for(role);
        let cursor = match role {
            ServerRole::Reader => &entry.reader_index,
            ServerRole::Writer => &entry.writer_index,
            ServerRole::Router => &entry.reader_index,
        };
        let index = cursor.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(servers[index].clone())
    }

    /// 재발견 수행 (데이터베이스당 동시에 하나)
    async fn refresh(&self, database: &str, role: ServerRole) -> DriverResult<()> {
        let lock = self.refresh_lock(database);
        let _guard = lock.lock().await;

        // 잠금을 기다리는 동안 다른 호출자가 이미 갱신했으면 끝
        {
            let tables = self.tables.read();
            if let Some(entry) = tables.get(database) {
                if !entry.table.is_stale_for(role) {
                    return Ok(());
                }
            }
        }

        let routers = self.router_candidates(database).await?;
        let table = self.rediscovery.lookup(database, &routers).await?;

        tracing::info!(
            database,
            routers = table.routers.len(),
            readers = table.readers.len(),
            writers = table.writers.len(),
            ttl_secs = table.ttl.as_secs(),
            "routing table replaced"
        );

        self.tables
            .write()
            .insert(database.to_string(), TableEntry::new(table, self.now_ms()));
        Ok(())
    }

    /// 재발견에 시도할 라우터 후보: 알려진 라우터 먼저, 시드 주소는 폴백
    async fn router_candidates(&self, database: &str) -> DriverResult<Vec<Address>> {
        let mut candidates: Vec<Address> = {
            let tables = self.tables.read();
            tables
                .get(database)
                .map(|entry| entry.table.routers.clone())
                .unwrap_or_default()
        };

        for seed in &self.initial_routers {
            for resolved in self.resolver.resolve(seed).await? {
                if !candidates.contains(&resolved) {
                    candidates.push(resolved);
                }
            }
        }

        if candidates.is_empty() {
            return Err(DriverError::service_unavailable(
                "No router addresses available for routing discovery",
            ));
        }
        Ok(candidates)
    }

    fn refresh_lock(&self, database: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock();
        locks
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// 보존 기간을 넘긴 미사용 테이블 제거
    fn purge_unused(&self, current: &str) {
        let now = self.now_ms();
        let retention_ms = self.retention.as_millis() as u64;

        let mut tables = self.tables.write();
        tables.retain(|database, entry| {
            if database == current {
                return true;
            }
            let idle = now.saturating_sub(entry.last_used_ms.load(Ordering::Relaxed));
            let keep = idle <= retention_ms;
            if !keep {
                tracing::debug!(database, "unused routing table purged");
            }
            keep
        });
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for RoutingTableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTableRegistry")
            .field("tables", &self.table_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
