use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

/// 调用方重试策略：指数退避 + 随机抖动
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 首次调用失败后最多重试的次数
    pub max_retries: u32,
    /// 第一次重试前的等待时间，之后每次翻倍
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        if base.is_zero() {
            return base;
        }
        let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter)
    }

    /// 执行 `f`，当错误满足 `retriable` 时按策略重试
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retriable: impl Fn(&E) -> bool,
        mut f: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && retriable(&e) => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    warn!("{what} 失败，{:?} 后第 {attempt} 次重试: {e}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
