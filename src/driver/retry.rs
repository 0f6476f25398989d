//! M4.6: Retry Logic
//!
//! 지수 백오프 재시도
//!
//! 일시적 에러만 재시도하며, 시도는 항상 순차적입니다. 첫 시도는 지연
//! 없이 실행되고, 시간 예산이 끝나면 새 시도를 시작하지 않습니다.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::error::{DriverResult, TransientCodes};

// ============================================================================
// RetryConfig - 재시도 설정
// ============================================================================

/// 재시도 설정
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 전체 시간 예산 (0이면 정확히 한 번 실행)
    pub max_retry_time: Duration,
    /// 첫 재시도 전 지연
    pub initial_delay: Duration,
    /// 지연 배수
    pub multiplier: f64,
    /// 지터 비율 (0.2면 지연의 ±20%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

// ============================================================================
// RetryLogic - 재시도 실행기
// ============================================================================

/// 작업 단위를 시간 예산 안에서 재시도
pub struct RetryLogic {
    config: RetryConfig,
    transient: TransientCodes,
}

impl RetryLogic {
    /// 새 재시도 실행기 생성
    pub fn new(config: RetryConfig, transient: TransientCodes) -> Self {
        Self { config, transient }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default(), TransientCodes::default())
    }

    /// 설정 조회
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 작업 단위 재시도 실행
    ///
    /// 성공, 재시도 불가 에러, 또는 예산 소진까지 반복합니다. 소진 시
    /// 마지막 에러를 반환하며, 이전 시도의 에러는 경고 로그로 남깁니다.
    pub async fn retry<T, F, Fut>(&self, mut work: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let start = Instant::now();
        let mut delay = self.config.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match work().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.transient.classify(&error) {
                return Err(error);
            }

            let elapsed = start.elapsed();
            let remaining = self.config.max_retry_time.saturating_sub(elapsed);
            if remaining.is_zero() {
                tracing::warn!(
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "transaction retries exhausted"
                );
                return Err(error);
            }

            // 남은 예산을 넘지 않도록 지연을 자른다
            let pause = jittered(delay, self.config.jitter).min(remaining);
            tracing::warn!(
                attempt,
                delay_ms = pause.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            tokio::time::sleep(pause).await;
            delay = delay.mul_f64(self.config.multiplier);
        }
    }
}

/// 지연에 ±jitter 비율의 난수 흔들림 적용
fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 - jitter + rand::thread_rng().gen::<f64>() * 2.0 * jitter;
    delay.mul_f64(factor)
}

// ============================================================================
// Tests
// ============================================================================
