//! M4.1: Session
//!
//! 세션 관리
//!
//! 세션은 논리적 작업 흐름 하나를 나타냅니다. 커밋된 트랜잭션의 북마크를
//! 다음 트랜잭션의 시작으로 넘겨 인과적 일관성을 이어줍니다.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::gram::{AccessMode, RecordMessage, WireValue};

use super::driver::Address;
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PooledChannel};
use super::protocol::{QueryOutcome, TxContext};
use super::retry::RetryLogic;
use super::routing::RoutingTableRegistry;
use super::transaction::{Transaction, TransactionConfig};

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// 데이터베이스 이름 (None이면 기본 데이터베이스)
    pub database: Option<String>,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
    /// 시작 북마크
    pub bookmarks: Vec<String>,
    /// PULL 배치 크기 (None이면 드라이버 기본값)
    pub fetch_size: Option<i64>,
    /// 가장된 사용자
    pub impersonated_user: Option<String>,
}

impl SessionConfig {
    /// 빌더 패턴으로 세션 설정 생성
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// 세션 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// 기본 접근 모드 설정
    pub fn with_default_access_mode(mut self, mode: AccessMode) -> Self {
        self.config.default_access_mode = mode;
        self
    }

    /// 읽기 전용 세션
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// 읽기/쓰기 세션
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    /// 시작 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// PULL 배치 크기 설정
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Self {
        self.config.fetch_size = Some(fetch_size);
        self
    }

    /// 가장된 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    /// 설정 빌드
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// QueryResult - 쿼리 결과
// ============================================================================

/// 쿼리 실행 결과
///
/// 레코드 페이로드는 해석하지 않고 와이어 형태 그대로 전달합니다.
#[derive(Debug)]
pub struct QueryResult {
    /// 컬럼 이름
    pub keys: Vec<String>,
    /// 결과 레코드
    pub records: Vec<RecordMessage>,
    /// 결과 북마크
    pub bookmark: Option<String>,
    /// 실행된 데이터베이스
    pub database: Option<String>,
}

impl From<QueryOutcome> for QueryResult {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            keys: outcome.keys,
            bookmark: outcome.summary.bookmark().map(String::from),
            database: outcome.summary.db().map(String::from),
            records: outcome.records,
        }
    }
}

// ============================================================================
// ConnectionProvider - 주소 결정 전략
// ============================================================================

/// 세션이 채널을 얻는 방법
pub(crate) enum ConnectionProvider {
    /// 단일 서버로 직결
    Direct(Address),
    /// 라우팅 테이블로 역할별 서버 선택
    Routed(Arc<RoutingTableRegistry>),
}

// ============================================================================
// Session - 세션
// ============================================================================

/// 세션
pub struct Session {
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 주소 결정 전략
    provider: ConnectionProvider,
    /// 재시도 실행기
    retry: Arc<RetryLogic>,
    /// 세션 설정
    config: SessionConfig,
    /// PULL 배치 크기
    fetch_size: i64,
    /// 북마크 홀더 (트랜잭션과 공유)
    bookmarks: Arc<Mutex<Vec<String>>>,
    /// 열린 상태
    open: bool,
}

impl Session {
    /// 새 세션 생성
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        provider: ConnectionProvider,
        retry: Arc<RetryLogic>,
        config: SessionConfig,
        default_fetch_size: i64,
    ) -> Self {
        let fetch_size = config.fetch_size.unwrap_or(default_fetch_size);
        let bookmarks = Arc::new(Mutex::new(config.bookmarks.clone()));
        Self {
            pool,
            provider,
            retry,
            config,
            fetch_size,
            bookmarks,
            open: true,
        }
    }

    /// 자동 커밋 트랜잭션으로 쿼리 실행
    pub async fn run(
        &mut self,
        query: &str,
        parameters: Option<HashMap<String, WireValue>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;

        let mode = self.config.default_access_mode;
        let ctx = self.tx_context(mode, None);
        let mut channel = self.acquire(mode).await?;

        let protocol = channel.protocol();
        let outcome = protocol
            .run_in_auto_commit_transaction(
                &mut channel,
                query,
                parameters.unwrap_or_default(),
                &ctx,
                self.fetch_size,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                let result = QueryResult::from(outcome);
                if let Some(ref bookmark) = result.bookmark {
                    *self.bookmarks.lock() = vec![bookmark.clone()];
                }
                let _ = channel.release();
                Ok(result)
            }
            Err(e) => {
                channel.discard();
                Err(e)
            }
        }
    }

    /// 명시적 트랜잭션 시작
    pub async fn begin_transaction(
        &mut self,
        tx_config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.ensure_open()?;

        let mode = self.config.default_access_mode;
        let ctx = self.tx_context(mode, tx_config.as_ref());
        let channel = self.acquire(mode).await?;

        Transaction::begin(channel, &ctx, self.fetch_size, self.bookmarks.clone()).await
    }

    /// 읽기 트랜잭션을 재시도와 함께 실행
    pub async fn read_transaction<T, F>(&self, work: F) -> DriverResult<T>
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, DriverResult<T>>,
    {
        self.transaction_with_retry(AccessMode::Read, work).await
    }

    /// 쓰기 트랜잭션을 재시도와 함께 실행
    pub async fn write_transaction<T, F>(&self, work: F) -> DriverResult<T>
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, DriverResult<T>>,
    {
        self.transaction_with_retry(AccessMode::Write, work).await
    }

    /// 마지막 북마크 조회
    pub fn last_bookmarks(&self) -> Vec<String> {
        self.bookmarks.lock().clone()
    }

    /// 세션 닫기
    pub async fn close(&mut self) -> DriverResult<()> {
        self.open = false;
        Ok(())
    }

    /// 작업 단위를 재시도 루프 안에서 실행
    async fn transaction_with_retry<T, F>(&self, mode: AccessMode, work: F) -> DriverResult<T>
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, DriverResult<T>>,
    {
        self.ensure_open()?;
        let retry = self.retry.clone();
        retry.retry(|| self.transaction_attempt(mode, &work)).await
    }

    /// 한 번의 시도: 채널 획득 → BEGIN → 작업 → COMMIT/ROLLBACK
    ///
    /// 실패한 시도는 연결을 폐기한 뒤에 끝나므로 다음 시도가 반쯤 열린
    /// 트랜잭션과 마주치지 않습니다.
    async fn transaction_attempt<T, F>(&self, mode: AccessMode, work: &F) -> DriverResult<T>
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, DriverResult<T>>,
    {
        let ctx = self.tx_context(mode, None);
        let channel = self.acquire(mode).await?;
        let mut tx =
            Transaction::begin(channel, &ctx, self.fetch_size, self.bookmarks.clone()).await?;

        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.close().await;
                Err(e)
            }
        }
    }

    /// 접근 모드에 맞는 채널 획득
    async fn acquire(&self, mode: AccessMode) -> DriverResult<PooledChannel> {
        match &self.provider {
            ConnectionProvider::Direct(address) => self.pool.acquire(address).await,
            ConnectionProvider::Routed(registry) => {
                let database = self.database_name().to_string();
                let address = registry.acquire_address(&database, mode).await?;

                match self.pool.acquire(&address).await {
                    Ok(channel) => Ok(channel),
                    Err(DriverError::ServiceUnavailable(msg)) => {
                        // 죽은 주소는 테이블에서 제거하고 세션 만료로 분류해
                        // 재시도 계층이 새 토폴로지로 다시 시도하게 한다
                        registry.forget(&database, &address);
                        Err(DriverError::session_expired(format!(
                            "Server at {} is no longer available: {}",
                            address, msg
                        )))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn database_name(&self) -> &str {
        self.config
            .database
            .as_deref()
            .unwrap_or(super::routing::DEFAULT_DATABASE)
    }

    fn tx_context(&self, mode: AccessMode, tx_config: Option<&TransactionConfig>) -> TxContext {
        TxContext {
            database: self.config.database.clone(),
            mode,
            bookmarks: self.bookmarks.lock().clone(),
            timeout: tx_config.and_then(|c| c.timeout),
            metadata: tx_config.map(|c| c.metadata.clone()).unwrap_or_default(),
            impersonated_user: self.config.impersonated_user.clone(),
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::session("Session is closed"))
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("mode", &self.config.default_access_mode)
            .field("open", &self.open)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::error::TransientCodes;
    use crate::driver::pool::testing::{scripted_pool, ScriptedConnector};
    use crate::driver::resolver::StaticResolver;
    use crate::driver::retry::{RetryConfig, RetryLogic};
    use crate::driver::routing::{Rediscovery, RoutingTable, ServerRole};
    use crate::gram::{
        FailureMessage, GramErrorCode, GramVersion, Response, SuccessMessage,
    };
    use futures::future::BoxFuture;
    use std::time::Duration;

    fn addr(host: &str) -> Address {
        Address::new(host, 7787)
    }

    fn fast_retry() -> Arc<RetryLogic> {
        Arc::new(RetryLogic::new(
            RetryConfig {
                max_retry_time: Duration::from_secs(5),
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                jitter: 0.0,
            },
            TransientCodes::default(),
        ))
    }

    fn direct_session(pool: Arc<ConnectionPool>, config: SessionConfig) -> Session {
        Session::new(
            pool,
            ConnectionProvider::Direct(addr("core1")),
            fast_retry(),
            config,
            1000,
        )
    }

    fn run_script(bookmark: &str) -> Vec<Vec<Response>> {
        vec![
            vec![Response::Success(SuccessMessage::run_success(
                vec!["n".to_string()],
                None,
            ))],
            vec![Response::Success(SuccessMessage::streaming_success(
                false,
                Some(bookmark.to_string()),
            ))],
        ]
    }

    #[tokio::test]
    async fn test_run_updates_bookmarks() {
        let pool = scripted_pool(ScriptedConnector::single(
            GramVersion::V2_1,
            run_script("bm:1"),
        ));
        let mut session = direct_session(pool, SessionConfig::default());

        let result = session.run("RETURN 1", None).await.unwrap();
        assert_eq!(result.keys, vec!["n"]);
        assert_eq!(result.bookmark, Some("bm:1".to_string()));
        assert_eq!(session.last_bookmarks(), vec!["bm:1".to_string()]);
    }

    #[tokio::test]
    async fn test_bookmarks_thread_into_next_transaction() {
        // RUN 북마크가 이어지는 BEGIN의 북마크로 전달된다
        let mut script = run_script("bm:1");
        script.push(vec![Response::Success(SuccessMessage::new())]); // BEGIN
        script.push(vec![Response::Success(SuccessMessage::commit_success(
            "bm:2".to_string(),
        ))]); // COMMIT
        let pool = scripted_pool(ScriptedConnector::single(GramVersion::V2_1, script));
        let mut session = direct_session(pool, SessionConfig::default());

        session.run("RETURN 1", None).await.unwrap();
        assert_eq!(session.last_bookmarks(), vec!["bm:1".to_string()]);

        let mut tx = session.begin_transaction(None).await.unwrap();
        tx.commit().await.unwrap();

        // 커밋 북마크가 세션으로 돌아온다
        assert_eq!(session.last_bookmarks(), vec!["bm:2".to_string()]);
    }

    #[tokio::test]
    async fn test_query_failure_discards_channel() {
        let script = vec![
            vec![Response::Failure(FailureMessage::new(
                GramErrorCode::SYNTAX_ERROR,
                "bad query",
            ))],
            vec![Response::Ignored],
        ];
        let pool = scripted_pool(ScriptedConnector::single(GramVersion::V2_1, script));
        let mut session = direct_session(pool.clone(), SessionConfig::default());

        let err = session.run("oops", None).await.unwrap_err();
        assert!(matches!(err, DriverError::Server { .. }));

        // 실패한 교환 뒤의 채널은 풀로 돌아가지 않는다
        assert_eq!(pool.metrics().idle, 0);
    }

    #[tokio::test]
    async fn test_write_transaction_retries_transient_failures() {
        // 첫 연결: BEGIN이 일시적 에러로 실패. 두 번째 연결: 성공 경로.
        let failing = vec![vec![Response::Failure(FailureMessage::new(
            GramErrorCode::NOT_A_LEADER,
            "leader moved",
        ))]];
        let succeeding = vec![
            vec![Response::Success(SuccessMessage::new())], // BEGIN
            vec![Response::Success(SuccessMessage::run_success(
                vec!["n".to_string()],
                None,
            ))], // RUN
            vec![Response::Success(SuccessMessage::streaming_success(
                false, None,
            ))], // PULL
            vec![Response::Success(SuccessMessage::commit_success(
                "bm:retry".to_string(),
            ))], // COMMIT
        ];
        let pool = scripted_pool(ScriptedConnector::new(
            GramVersion::V2_1,
            vec![failing, succeeding],
        ));
        let session = direct_session(pool.clone(), SessionConfig::default());

        fn count_records(tx: &mut Transaction) -> BoxFuture<'_, DriverResult<usize>> {
            Box::pin(async move {
                let result = tx.run("RETURN 1", None).await?;
                Ok(result.records.len())
            })
        }

        let value = session.write_transaction(count_records).await.unwrap();

        assert_eq!(value, 0);
        // 실패한 첫 시도의 연결은 폐기되어 새 연결이 만들어졌다
        assert_eq!(pool.metrics().total_created, 2);
        assert_eq!(session.last_bookmarks(), vec!["bm:retry".to_string()]);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_rolls_back_and_propagates() {
        let script = vec![
            vec![Response::Success(SuccessMessage::new())], // BEGIN
            vec![Response::Failure(FailureMessage::new(
                GramErrorCode::SYNTAX_ERROR,
                "bad query",
            ))], // RUN
            vec![Response::Ignored], // PULL
            vec![Response::Success(SuccessMessage::new())], // ROLLBACK
        ];
        let pool = scripted_pool(ScriptedConnector::single(GramVersion::V2_1, script));
        let session = direct_session(pool, SessionConfig::default());

        fn broken_query(tx: &mut Transaction) -> BoxFuture<'_, DriverResult<()>> {
            Box::pin(async move {
                tx.run("oops", None).await?;
                Ok(())
            })
        }

        let err = session.write_transaction(broken_query).await.unwrap_err();

        assert!(matches!(err, DriverError::Server { .. }));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let pool = scripted_pool(ScriptedConnector::single(GramVersion::V2_1, vec![]));
        let mut session = direct_session(pool, SessionConfig::default());

        session.close().await.unwrap();
        let err = session.run("RETURN 1", None).await.unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
    }

    /// 고정 테이블을 돌려주는 재발견 스텁
    struct FixedRediscovery {
        writer: Address,
    }

    impl Rediscovery for FixedRediscovery {
        fn lookup<'a>(
            &'a self,
            database: &'a str,
            _routers: &'a [Address],
        ) -> BoxFuture<'a, DriverResult<RoutingTable>> {
            Box::pin(async move {
                let mut table = RoutingTable::new(database);
                table.ttl = Duration::from_secs(300);
                table.add_server(ServerRole::Router, addr("router1"));
                table.add_server(ServerRole::Writer, self.writer.clone());
                table.add_server(ServerRole::Reader, self.writer.clone());
                Ok(table)
            })
        }
    }

    fn routed_session(pool: Arc<ConnectionPool>, writer: Address) -> Session {
        let registry = Arc::new(RoutingTableRegistry::new(
            Arc::new(FixedRediscovery { writer }),
            Arc::new(StaticResolver::plain()),
            vec![addr("seed1")],
            Duration::from_secs(300),
        ));
        Session::new(
            pool,
            ConnectionProvider::Routed(registry),
            fast_retry(),
            SessionConfig::default(),
            1000,
        )
    }

    #[tokio::test]
    async fn test_routed_session_uses_routing_table() {
        let pool = scripted_pool(ScriptedConnector::single(
            GramVersion::V2_1,
            run_script("bm:routed"),
        ));
        let mut session = routed_session(pool.clone(), addr("writer1"));

        let result = session.run("RETURN 1", None).await.unwrap();
        assert_eq!(result.bookmark, Some("bm:routed".to_string()));

        // 라우팅이 고른 주소로 풀이 연결을 만들었다
        assert!(pool.metrics_for(&addr("writer1")).is_some());
    }
}
