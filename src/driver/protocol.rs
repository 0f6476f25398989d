//! M4.4: Protocol Version Strategy
//!
//! 협상된 버전별 메시지 전략
//!
//! 핸드셰이크에서 한 번 선택되어 채널에 불변으로 저장됩니다. 버전이
//! 지원하지 않는 기능은 소켓에 쓰기 전에 로컬 클라이언트 에러로 실패합니다.

use std::collections::HashMap;
use std::time::Duration;

use crate::gram::{
    AccessMode, BeginMessage, GramVersion, HelloMessage, PullMessage, RecordMessage, Request,
    RunMessage, SuccessMessage, WireValue,
};

use super::channel::{Channel, ResponseFuture};
use super::error::{DriverError, DriverResult};

// ============================================================================
// ChannelIdentity - HELLO에 실리는 드라이버 신원
// ============================================================================

/// HELLO 메시지에 실리는 드라이버 신원 정보
#[derive(Debug, Clone)]
pub struct ChannelIdentity {
    /// User agent 문자열
    pub user_agent: String,
    /// 인증 엔트리 (scheme/principal/credentials/...)
    pub auth: HashMap<String, WireValue>,
    /// 라우팅 컨텍스트 (클러스터 드라이버만 설정)
    pub routing_context: Option<HashMap<String, WireValue>>,
}

// ============================================================================
// TxContext - 트랜잭션 문맥
// ============================================================================

/// BEGIN/RUN에 실리는 트랜잭션 문맥
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    /// 데이터베이스 이름 (None이면 기본 데이터베이스)
    pub database: Option<String>,
    /// 접근 모드
    pub mode: AccessMode,
    /// 북마크
    pub bookmarks: Vec<String>,
    /// 트랜잭션 타임아웃
    pub timeout: Option<Duration>,
    /// 트랜잭션 메타데이터
    pub metadata: HashMap<String, WireValue>,
    /// 가장된 사용자
    pub impersonated_user: Option<String>,
}

// ============================================================================
// QueryOutcome - 쿼리 실행 결과
// ============================================================================

/// RUN + PULL 교환의 최종 결과
#[derive(Debug)]
pub struct QueryOutcome {
    /// 컬럼 이름
    pub keys: Vec<String>,
    /// 결과 레코드
    pub records: Vec<RecordMessage>,
    /// 마지막 PULL의 SUCCESS 메타데이터 (북마크 등)
    pub summary: SuccessMessage,
}

// ============================================================================
// ProtocolVersion - 버전 전략
// ============================================================================

/// 채널에 저장되는 버전 전략
///
/// 닫힌 버전 집합에 대한 태그 디스패치이며 런타임 타입 검사를 쓰지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion(GramVersion);

impl ProtocolVersion {
    /// 협상된 버전으로 전략 생성
    pub fn new(version: GramVersion) -> Self {
        Self(version)
    }

    /// 협상된 버전
    pub fn version(&self) -> GramVersion {
        self.0
    }

    /// 채널 초기화 - HELLO 전송
    ///
    /// SUCCESS에 서버 에이전트와 connection_id가 모두 있어야 합니다.
    /// 없으면 채널을 닫고 신뢰할 수 없는 서버 에러로 실패합니다.
    pub async fn initialize_channel(
        &self,
        channel: &mut Channel,
        identity: &ChannelIdentity,
    ) -> DriverResult<()> {
        let mut hello = HelloMessage::new(&identity.user_agent).with_auth(identity.auth.clone());
        if self.0.supports_routing_context() {
            if let Some(ref context) = identity.routing_context {
                hello = hello.with_routing(context.clone());
            }
        }

        let exchange = match channel.request(Request::Hello(hello)).await {
            Ok(exchange) => exchange,
            Err(e) => {
                channel.close_gracefully();
                return Err(e);
            }
        };

        let agent = match exchange.summary.server() {
            Some(agent) => agent.to_string(),
            None => {
                channel.close_gracefully();
                return Err(DriverError::untrusted_server(
                    "Server did not identify itself with an agent string",
                ));
            }
        };
        let connection_id = match exchange.summary.connection_id() {
            Some(id) => id.to_string(),
            None => {
                channel.close_gracefully();
                return Err(DriverError::untrusted_server(
                    "Server did not supply a connection id",
                ));
            }
        };

        channel.server_agent = Some(agent);
        channel.connection_id = Some(connection_id);

        if let Some(seconds) = exchange.summary.recv_timeout_seconds() {
            if seconds > 0 {
                channel.apply_read_timeout(Duration::from_secs(seconds as u64));
            }
        }

        tracing::debug!(
            channel = channel.id(),
            agent = channel.server_agent().unwrap_or(""),
            connection_id = channel.connection_id().unwrap_or(""),
            "channel initialized"
        );
        Ok(())
    }

    /// 채널 종료 준비 - GOODBYE 전송
    pub fn prepare_to_close_channel(&self, channel: &Channel) {
        channel.close_gracefully();
    }

    /// 명시적 트랜잭션 시작
    pub async fn begin_transaction(
        &self,
        channel: &mut Channel,
        ctx: &TxContext,
    ) -> DriverResult<()> {
        self.check_tx_context(ctx)?;

        let mut begin = BeginMessage::new()
            .with_bookmarks(ctx.bookmarks.clone())
            .with_mode(ctx.mode)
            .with_metadata(ctx.metadata.clone());
        if let Some(ref db) = ctx.database {
            begin = begin.with_database(db);
        }
        if let Some(ref user) = ctx.impersonated_user {
            begin = begin.with_impersonated_user(user);
        }
        if let Some(timeout) = ctx.timeout {
            begin = begin.with_timeout(timeout);
        }

        channel.mark_used();
        channel.request(Request::Begin(begin)).await?;
        Ok(())
    }

    /// 자동 커밋 트랜잭션으로 쿼리 실행
    ///
    /// RUN과 첫 PULL을 파이프라인으로 전송합니다.
    pub async fn run_in_auto_commit_transaction(
        &self,
        channel: &mut Channel,
        query: &str,
        parameters: HashMap<String, WireValue>,
        ctx: &TxContext,
        fetch_size: i64,
    ) -> DriverResult<QueryOutcome> {
        self.check_tx_context(ctx)?;

        let mut run = RunMessage::new(query)
            .with_parameters(parameters)
            .with_bookmarks(ctx.bookmarks.clone())
            .with_mode(ctx.mode)
            .with_metadata(ctx.metadata.clone());
        if let Some(ref db) = ctx.database {
            run = run.with_database(db);
        }
        if let Some(ref user) = ctx.impersonated_user {
            run = run.with_impersonated_user(user);
        }
        if let Some(timeout) = ctx.timeout {
            run = run.with_timeout(timeout);
        }

        self.run_and_pull(channel, run, fetch_size).await
    }

    /// 명시적 트랜잭션 안에서 쿼리 실행
    pub async fn run_in_unmanaged_transaction(
        &self,
        channel: &mut Channel,
        query: &str,
        parameters: HashMap<String, WireValue>,
        fetch_size: i64,
    ) -> DriverResult<QueryOutcome> {
        let run = RunMessage::new(query).with_parameters(parameters);
        self.run_and_pull(channel, run, fetch_size).await
    }

    /// 트랜잭션 커밋, 북마크 반환
    pub async fn commit_transaction(&self, channel: &mut Channel) -> DriverResult<Option<String>> {
        channel.mark_used();
        let exchange = channel.request(Request::Commit).await?;
        Ok(exchange.summary.bookmark().map(String::from))
    }

    /// 트랜잭션 롤백
    pub async fn rollback_transaction(&self, channel: &mut Channel) -> DriverResult<()> {
        channel.mark_used();
        channel.request(Request::Rollback).await?;
        Ok(())
    }

    /// 버전이 허용하지 않는 문맥이면 로컬 에러 (소켓 쓰기 전에 검사)
    fn check_tx_context(&self, ctx: &TxContext) -> DriverResult<()> {
        if ctx.database.is_some() && !self.0.supports_database_name() {
            return Err(DriverError::unsupported(format!(
                "Explicit database name requires Gram 2.0 or later, but version {} was negotiated",
                self.0
            )));
        }
        if ctx.impersonated_user.is_some() && !self.0.supports_impersonation() {
            return Err(DriverError::unsupported(format!(
                "User impersonation requires Gram 2.1 or later, but version {} was negotiated",
                self.0
            )));
        }
        Ok(())
    }

    /// 버전에 맞는 PULL 배치 크기
    fn effective_fetch_size(&self, fetch_size: i64) -> i64 {
        if !self.0.supports_bounded_pull() || fetch_size <= 0 {
            -1
        } else {
            fetch_size
        }
    }

    async fn run_and_pull(
        &self,
        channel: &mut Channel,
        run: RunMessage,
        fetch_size: i64,
    ) -> DriverResult<QueryOutcome> {
        let fetch = self.effective_fetch_size(fetch_size);

        let run_future = channel.send(Request::Run(run))?;
        let pull_future = channel.send(Request::Pull(PullMessage::with_n(fetch)))?;
        channel.mark_used();

        let run_exchange = match run_future.recv().await {
            Ok(exchange) => exchange,
            Err(e) => {
                // 파이프라인된 PULL은 IGNORED로 끝난다. 먼저 비운다.
                let _ = pull_future.recv().await;
                return Err(e);
            }
        };
        let keys = run_exchange.summary.fields().unwrap_or_default();

        let (records, summary) = self.pull_remaining(channel, pull_future, fetch).await?;
        Ok(QueryOutcome {
            keys,
            records,
            summary,
        })
    }

    async fn pull_remaining(
        &self,
        channel: &Channel,
        first: ResponseFuture,
        fetch: i64,
    ) -> DriverResult<(Vec<RecordMessage>, SuccessMessage)> {
        let mut records = Vec::new();
        let mut exchange = first.recv().await?;

        loop {
            records.extend(exchange.records);
            if !exchange.summary.has_more() {
                return Ok((records, exchange.summary));
            }
            exchange = channel
                .request(Request::Pull(PullMessage::with_n(fetch)))
                .await?;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
