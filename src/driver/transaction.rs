//! M4.5: Transaction API
//!
//! 명시적 트랜잭션 관리
//!
//! 상태 기계: Active → (Committing → Committed) | (RollingBack → RolledBack)
//! | Terminated. Active가 아닌 상태의 run/commit/rollback은 네트워크 왕복
//! 없이 로컬 에러로 실패합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::gram::WireValue;

use super::error::{DriverError, DriverResult};
use super::pool::PooledChannel;
use super::protocol::TxContext;
use super::session::QueryResult;

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// 서버 측 타임아웃
    pub timeout: Option<Duration>,
    /// 트랜잭션 메타데이터
    pub metadata: HashMap<String, WireValue>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 커밋 진행 중
    Committing,
    /// 커밋됨
    Committed,
    /// 롤백 진행 중
    RollingBack,
    /// 롤백됨
    RolledBack,
    /// 연결 장애로 종료됨
    Terminated,
}

impl TransactionState {
    /// 더 이상 작업을 받을 수 없는 상태인지 확인
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// Transaction - 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
pub struct Transaction {
    /// 대여한 채널 (종결 시 반환 또는 폐기)
    channel: Option<PooledChannel>,
    /// 상태
    state: TransactionState,
    /// PULL 배치 크기
    fetch_size: i64,
    /// 세션과 공유하는 북마크 홀더
    bookmarks: Arc<Mutex<Vec<String>>>,
}

impl Transaction {
    /// BEGIN을 보내고 트랜잭션 시작
    pub(crate) async fn begin(
        mut channel: PooledChannel,
        ctx: &TxContext,
        fetch_size: i64,
        bookmarks: Arc<Mutex<Vec<String>>>,
    ) -> DriverResult<Transaction> {
        let protocol = channel.protocol();
        match protocol.begin_transaction(&mut channel, ctx).await {
            Ok(()) => Ok(Self {
                channel: Some(channel),
                state: TransactionState::Active,
                fetch_size,
                bookmarks,
            }),
            Err(e) => {
                // 실패한 시도가 반쯤 열린 트랜잭션을 남기지 않도록 폐기
                channel.discard();
                Err(e)
            }
        }
    }

    /// 트랜잭션 안에서 쿼리 실행
    pub async fn run(
        &mut self,
        query: &str,
        parameters: Option<HashMap<String, WireValue>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_active()?;

        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| DriverError::transaction("No connection attached"))?;

        let protocol = channel.protocol();
        let outcome = protocol
            .run_in_unmanaged_transaction(
                channel,
                query,
                parameters.unwrap_or_default(),
                self.fetch_size,
            )
            .await;

        match outcome {
            Ok(outcome) => Ok(QueryResult::from(outcome)),
            Err(e) => {
                if e.is_fatal_for_channel() {
                    // 채널이 죽었으니 이후 작업은 네트워크 없이 실패한다
                    self.state = TransactionState::Terminated;
                    if let Some(channel) = self.channel.take() {
                        channel.discard();
                    }
                }
                Err(e)
            }
        }
    }

    /// 커밋 (단발성)
    ///
    /// 성공 시 서버 북마크를 세션 북마크 홀더에 반영합니다.
    pub async fn commit(&mut self) -> DriverResult<Option<String>> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        let mut channel = self
            .channel
            .take()
            .ok_or_else(|| DriverError::transaction("No connection attached"))?;

        let protocol = channel.protocol();
        match protocol.commit_transaction(&mut channel).await {
            Ok(bookmark) => {
                self.state = TransactionState::Committed;
                if let Some(ref bm) = bookmark {
                    *self.bookmarks.lock() = vec![bm.clone()];
                }
                let _ = channel.release();
                Ok(bookmark)
            }
            Err(e) => {
                self.state = TransactionState::Terminated;
                channel.discard();
                Err(e)
            }
        }
    }

    /// 롤백 (단발성)
    pub async fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::RollingBack;

        let mut channel = self
            .channel
            .take()
            .ok_or_else(|| DriverError::transaction("No connection attached"))?;

        let protocol = channel.protocol();
        match protocol.rollback_transaction(&mut channel).await {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                let _ = channel.release();
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Terminated;
                channel.discard();
                Err(e)
            }
        }
    }

    /// 트랜잭션 닫기 (활성이면 롤백)
    pub async fn close(&mut self) -> DriverResult<()> {
        if self.state.is_terminated() {
            return Ok(());
        }
        self.rollback().await
    }

    /// 현재 상태
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// 활성 상태 확인
    fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committing | TransactionState::Committed => Err(
                DriverError::transaction("Transaction already committed"),
            ),
            TransactionState::RollingBack | TransactionState::RolledBack => Err(
                DriverError::transaction("Transaction already rolled back"),
            ),
            TransactionState::Terminated => Err(DriverError::transaction(
                "Transaction terminated due to a connection error",
            )),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // 종결 없이 드롭된 활성 트랜잭션의 채널은 폐기된다
        if let Some(channel) = self.channel.take() {
            channel.discard();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
