//! M4.2: Connection Pool
//!
//! 연결 풀링
//!
//! 주소마다 독립적인 유한 풀을 둡니다. 획득은 유휴 채널 재사용을 우선하고,
//! 용량이 차면 반환 또는 획득 타임아웃까지 대기합니다.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::channel::Channel;
use super::driver::Address;
use super::error::{DriverError, DriverResult};
use super::protocol::ChannelIdentity;

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 주소당 최대 연결 수 |
/// | `acquisition_timeout` | 60초 | 획득 대기 한도 |
/// | `connection_timeout` | 30초 | TCP 연결 한도 |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 |
/// | `idle_timeout` | 5분 | 유휴 연결 폐기 기준 |
/// | `idle_time_before_test` | 30초 | 이 시간 이상 놀던 연결은 재사용 전 생존 확인 |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 주소당 최대 연결 수
    pub max_size: usize,
    /// 획득 대기 한도
    pub acquisition_timeout: Duration,
    /// TCP 연결 한도
    pub connection_timeout: Duration,
    /// 연결 최대 수명
    pub max_lifetime: Duration,
    /// 유휴 타임아웃
    pub idle_timeout: Duration,
    /// 생존 확인 전 허용 유휴 시간
    pub idle_time_before_test: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            idle_time_before_test: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 주소당 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = duration;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = duration;
        self
    }

    /// 생존 확인 전 유휴 허용 시간 설정
    pub fn idle_time_before_test(mut self, duration: Duration) -> Self {
        self.config.idle_time_before_test = duration;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// ChannelConnector - 채널 생성 심
// ============================================================================

/// 채널 생성 전략 (연결 + 핸드셰이크 + HELLO)
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// 주소에 새 채널을 만들어 초기화까지 마친다
    async fn connect(&self, address: &Address, id: u64) -> DriverResult<Channel>;
}

/// TCP로 Gram 서버에 연결하는 기본 커넥터
pub struct GramConnector {
    /// HELLO에 실릴 드라이버 신원
    pub identity: ChannelIdentity,
    /// TCP 연결 한도
    pub connect_timeout: Duration,
}

#[async_trait]
impl ChannelConnector for GramConnector {
    async fn connect(&self, address: &Address, id: u64) -> DriverResult<Channel> {
        let socket = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(address.to_socket_addr()),
        )
        .await
        .map_err(|_| {
            DriverError::service_unavailable(format!(
                "Unable to connect to {} within {:?}",
                address, self.connect_timeout
            ))
        })?
        .map_err(|e| {
            DriverError::service_unavailable(format!("Unable to connect to {}: {}", address, e))
        })?;

        socket.set_nodelay(true).ok();

        let mut channel = Channel::establish(socket, id, address.clone()).await?;
        channel
            .protocol()
            .initialize_channel(&mut channel, &self.identity)
            .await?;
        Ok(channel)
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 풀 메트릭
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// 현재 크기
    pub size: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 총 닫힌 연결 수
    pub total_closed: u64,
}

// ============================================================================
// PooledChannel - 풀에서 대여한 채널
// ============================================================================

/// 풀에서 대여한 채널
///
/// 논리적 호출자 하나만 쥘 수 있습니다. [`PooledChannel::release`]로
/// 반환하거나, 실패한 시도 뒤에는 [`PooledChannel::discard`]로 폐기합니다.
/// 반환 없이 드롭되면 폐기로 처리됩니다.
pub struct PooledChannel {
    channel: Option<Channel>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<ChannelPool>,
}

impl PooledChannel {
    /// 채널을 풀로 반환
    pub fn release(mut self) -> DriverResult<()> {
        match (self.channel.take(), self.permit.take()) {
            (Some(channel), permit) => self.pool.release_channel(channel, permit),
            _ => Ok(()),
        }
    }

    /// 채널 폐기 (재시도 전 실패한 연결 정리)
    pub fn discard(mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.discard_channel(channel);
        }
        self.permit.take();
    }
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        self.channel.as_ref().expect("channel already released")
    }
}

impl DerefMut for PooledChannel {
    fn deref_mut(&mut self) -> &mut Channel {
        self.channel.as_mut().expect("channel already released")
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            tracing::debug!(channel = channel.id(), "pooled channel dropped without release");
            self.pool.discard_channel(channel);
        }
    }
}

impl std::fmt::Debug for PooledChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledChannel")
            .field("channel", &self.channel)
            .finish()
    }
}

// ============================================================================
// ChannelPool - 주소 하나의 풀
// ============================================================================

/// 주소 하나에 대한 유한 채널 풀
pub struct ChannelPool {
    /// 서버 주소
    address: Address,
    /// 풀 설정
    config: PoolConfig,
    /// 채널 생성 심
    connector: Arc<dyn ChannelConnector>,
    /// 유휴 채널들
    idle: Mutex<VecDeque<Channel>>,
    /// 용량 세마포어
    semaphore: Arc<Semaphore>,
    /// 대여 중인 채널 ID (이중 반환 검출)
    in_use: Mutex<HashSet<u64>>,
    /// 열린 상태
    open: RwLock<bool>,
    /// 현재 크기
    size: AtomicUsize,
    /// 채널 ID 발급기 (풀 전체 공유)
    next_id: Arc<AtomicU64>,
    /// 총 획득 횟수
    total_acquisitions: AtomicU64,
    /// 총 생성 횟수
    total_created: AtomicU64,
    /// 총 닫힌 횟수
    total_closed: AtomicU64,
}

impl ChannelPool {
    fn new(
        address: Address,
        config: PoolConfig,
        connector: Arc<dyn ChannelConnector>,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            address,
            config,
            connector,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            in_use: Mutex::new(HashSet::new()),
            open: RwLock::new(true),
            size: AtomicUsize::new(0),
            next_id,
            total_acquisitions: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
        }
    }

    /// 채널 획득
    async fn acquire(self: Arc<Self>) -> DriverResult<PooledChannel> {
        if !*self.open.read() {
            return Err(DriverError::illegal_state(format!(
                "Pool for {} is closed",
                self.address
            )));
        }

        // 용량 허가부터 획득: 풀 전체에 max_size 초과가 불가능해진다
        let permit = tokio::time::timeout(
            self.config.acquisition_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            DriverError::service_unavailable(format!(
                "Unable to acquire a connection to {} from the pool within {:?}",
                self.address, self.config.acquisition_timeout
            ))
        })?
        .map_err(|_| {
            DriverError::service_unavailable(format!(
                "Pool for {} was closed while acquiring a connection",
                self.address
            ))
        })?;

        // 유휴 채널 재사용 우선
        if let Some(channel) = self.checkout_idle().await {
            self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
            self.in_use.lock().insert(channel.id());
            return Ok(PooledChannel {
                channel: Some(channel),
                permit: Some(permit),
                pool: self.clone(),
            });
        }

        // 새 채널 생성
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = self.connector.connect(&self.address, id).await?;
        channel.mark_used();

        self.size.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.in_use.lock().insert(id);
        tracing::debug!(channel = id, address = %self.address, "channel created");

        Ok(PooledChannel {
            channel: Some(channel),
            permit: Some(permit),
            pool: self.clone(),
        })
    }

    /// 유효한 유휴 채널 하나 꺼내기
    async fn checkout_idle(&self) -> Option<Channel> {
        loop {
            let candidate = self.idle.lock().pop_front();
            let mut channel = candidate?;

            if !self.is_reusable(&channel) {
                self.retire(channel);
                continue;
            }

            // 오래 놀았던 채널은 생존 확인 후 재사용
            if channel.last_used().elapsed() > self.config.idle_time_before_test
                && channel.reset().await.is_err()
            {
                self.retire(channel);
                continue;
            }

            channel.mark_used();
            return Some(channel);
        }
    }

    fn is_reusable(&self, channel: &Channel) -> bool {
        channel.is_open()
            && channel.created_at().elapsed() <= self.config.max_lifetime
            && channel.last_used().elapsed() <= self.config.idle_timeout
    }

    /// 채널 폐기
    fn retire(&self, channel: Channel) {
        tracing::debug!(channel = channel.id(), address = %self.address, "channel retired");
        channel.close_gracefully();
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// 채널 반환
    fn release_channel(
        &self,
        channel: Channel,
        permit: Option<OwnedSemaphorePermit>,
    ) -> DriverResult<()> {
        let id = channel.id();
        if !self.in_use.lock().remove(&id) {
            // 대여 장부에 없는 반환은 사용 계약 위반
            self.retire(channel);
            drop(permit);
            return Err(DriverError::illegal_state(format!(
                "Channel {} was released twice",
                id
            )));
        }

        if !*self.open.read() || !self.is_reusable(&channel) {
            self.retire(channel);
        } else {
            self.idle.lock().push_back(channel);
        }

        drop(permit);
        Ok(())
    }

    /// 대여 중이던 채널 폐기
    fn discard_channel(&self, channel: Channel) {
        self.in_use.lock().remove(&channel.id());
        self.retire(channel);
    }

    /// 풀 닫기
    fn close(&self) {
        {
            let mut open = self.open.write();
            if !*open {
                return;
            }
            *open = false;
        }

        // 대기 중인 획득을 모두 깨운다
        self.semaphore.close();

        // 잠금 밖에서 닫는다
        let drained: Vec<Channel> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };
        for channel in drained {
            self.retire(channel);
        }
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.size.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            in_use: self.in_use.lock().len(),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// ConnectionPool - 전체 연결 풀
// ============================================================================

/// 주소별 채널 풀의 집합
pub struct ConnectionPool {
    /// 풀 설정
    config: PoolConfig,
    /// 채널 생성 심
    connector: Arc<dyn ChannelConnector>,
    /// 주소별 풀
    pools: RwLock<HashMap<Address, Arc<ChannelPool>>>,
    /// 열린 상태
    open: RwLock<bool>,
    /// 채널 ID 발급기
    next_id: Arc<AtomicU64>,
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(config: PoolConfig, connector: Arc<dyn ChannelConnector>) -> Self {
        Self {
            config,
            connector,
            pools: RwLock::new(HashMap::new()),
            open: RwLock::new(true),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 주소에 대한 채널 획득
    pub async fn acquire(&self, address: &Address) -> DriverResult<PooledChannel> {
        if !*self.open.read() {
            return Err(DriverError::illegal_state("Pool closed"));
        }
        let pool = self.pool_for(address);
        pool.acquire().await
    }

    /// 채널 반환
    ///
    /// 대여 장부에 없는 채널의 반환은 계약 위반으로 보고됩니다.
    pub fn release(&self, channel: PooledChannel) -> DriverResult<()> {
        channel.release()
    }

    /// 풀 닫기 (멱등)
    pub fn close(&self) {
        {
            let mut open = self.open.write();
            if !*open {
                return;
            }
            *open = false;
        }

        let pools: Vec<Arc<ChannelPool>> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.close();
        }
        tracing::debug!("connection pool closed");
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 주소별 풀 조회 또는 생성
    fn pool_for(&self, address: &Address) -> Arc<ChannelPool> {
        {
            let pools = self.pools.read();
            if let Some(pool) = pools.get(address) {
                return pool.clone();
            }
        }

        let mut pools = self.pools.write();
        // 쓰기 잠금 사이에 끼어든 생성 확인
        if let Some(pool) = pools.get(address) {
            return pool.clone();
        }

        let pool = Arc::new(ChannelPool::new(
            address.clone(),
            self.config.clone(),
            self.connector.clone(),
            self.next_id.clone(),
        ));
        pools.insert(address.clone(), pool.clone());
        pool
    }

    /// 전체 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        let pools = self.pools.read();
        let mut total = PoolMetrics::default();
        for pool in pools.values() {
            let m = pool.metrics();
            total.size += m.size;
            total.idle += m.idle;
            total.in_use += m.in_use;
            total.total_acquisitions += m.total_acquisitions;
            total.total_created += m.total_created;
            total.total_closed += m.total_closed;
        }
        total
    }

    /// 주소 하나의 메트릭 조회
    pub fn metrics_for(&self, address: &Address) -> Option<PoolMetrics> {
        self.pools.read().get(address).map(|p| p.metrics())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("open", &self.is_open())
            .field("addresses", &self.pools.read().len())
            .finish()
    }
}

// ============================================================================
// Test plumbing - 스크립트 커넥터
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::driver::channel::testing::{spawn_scripted_server, spawn_success_server};
    use crate::gram::{GramVersion, Response};

    /// 연결할 때마다 스크립트 하나를 꺼내 쓰는 커넥터
    ///
    /// 스크립트가 바닥나면 빈 SUCCESS만 돌려주는 서버를 물린다.
    pub(crate) struct ScriptedConnector {
        select: GramVersion,
        scripts: Mutex<VecDeque<Vec<Vec<Response>>>>,
        close_at_end: bool,
    }

    impl ScriptedConnector {
        pub(crate) fn new(
            select: GramVersion,
            scripts: Vec<Vec<Vec<Response>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                select,
                scripts: Mutex::new(scripts.into()),
                close_at_end: false,
            })
        }

        /// 연결 하나, 스크립트 하나
        pub(crate) fn single(select: GramVersion, script: Vec<Vec<Response>>) -> Arc<Self> {
            Self::new(select, vec![script])
        }

        /// 스크립트 소진 후 연결을 끊는 변형
        pub(crate) fn single_closing(
            select: GramVersion,
            script: Vec<Vec<Response>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                select,
                scripts: Mutex::new(vec![script].into()),
                close_at_end: true,
            })
        }
    }

    #[async_trait]
    impl ChannelConnector for ScriptedConnector {
        async fn connect(&self, address: &Address, id: u64) -> DriverResult<Channel> {
            let script = self.scripts.lock().pop_front();
            let (client_io, server_io) = tokio::io::duplex(65536);
            match script {
                Some(script) => {
                    spawn_scripted_server(server_io, self.select, script, self.close_at_end);
                }
                None => {
                    spawn_success_server(server_io);
                }
            }
            Channel::establish(client_io, id, address.clone()).await
        }
    }

    /// 스크립트 커넥터를 물린 풀 생성
    pub(crate) fn scripted_pool(connector: Arc<ScriptedConnector>) -> Arc<ConnectionPool> {
        let config = PoolConfig::builder()
            .max_size(10)
            .acquisition_timeout(Duration::from_secs(1))
            .build();
        Arc::new(ConnectionPool::new(config, connector))
    }
}

// ============================================================================
// Tests
// ============================================================================
