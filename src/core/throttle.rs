//! 带宽限制：令牌桶，一个传输内所有文件共享

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// 不限速
pub const UNLIMITED: u64 = 0;

struct Bucket {
    tokens: f64,
    last: Instant,
}

pub struct BandwidthThrottle {
    /// 字节/秒，0 表示不限速
    rate: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl BandwidthThrottle {
    pub fn new(rate: u64) -> Self {
        Self {
            rate: AtomicU64::new(rate),
            bucket: Mutex::new(Bucket {
                tokens: rate as f64,
                last: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(UNLIMITED)
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate() == UNLIMITED
    }

    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate, Ordering::Relaxed);
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.tokens = bucket.tokens.min(rate as f64);
        bucket.last = Instant::now();
    }

    /// 计算取出 `bytes` 个令牌需要等待的时间，不等待
    fn reserve(&self, bytes: u64) -> Duration {
        let rate = self.rate();
        if rate == UNLIMITED {
            return Duration::ZERO;
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.last = now;
        bucket.tokens = (bucket.tokens + elapsed * rate as f64).min(rate as f64);
        bucket.tokens -= bytes as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / rate as f64)
        }
    }

    /// 消耗 `bytes` 个令牌，不足时等待
    pub async fn acquire(&self, bytes: u64) {
        let wait = self.reserve(bytes);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for BandwidthThrottle {
    fn default() -> Self {
        Self::unlimited()
    }
}
