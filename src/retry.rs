//! 配额类错误的指数退避重试。
//!
//! 仅对配额类错误（HTTP 429 / 报文含 "quota" / 请求超时）重试，
//! 其余错误立即放弃。退避 min(initial × 2^attempt, max)。

use crate::engine::ExtractBackend;
use crate::gemini::ApiError;
use crate::types::{ExtractionResult, InputFragment, InventoryItem};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32) as u32);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// 配额类错误判定：429、报文含 "quota"、或请求超时。
pub fn is_quota_error(err: &ApiError) -> bool {
    if err.status() == Some(429) || err.is_timeout() {
        return true;
    }
    matches!(err, ApiError::Http { message, .. } if message.to_lowercase().contains("quota"))
}

/// 带重试的远程提取。最多调用 backend `max_retries + 1` 次。
pub async fn extract_with_retry<B: ExtractBackend>(
    backend: &B,
    inputs: &[InputFragment],
    inventory: &[InventoryItem],
    config: RetryConfig,
) -> Result<ExtractionResult, ApiError> {
    let mut last_err: Option<ApiError> = None;

    for attempt in 0..=config.max_retries {
        match backend.extract(inputs, inventory).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let retryable = is_quota_error(&err);
                last_err = Some(err);
                if !retryable || attempt == config.max_retries {
                    break;
                }
                let delay = config.delay_for(attempt);
                tracing::info!(
                    "配额受限，{}ms 后重试（第 {}/{} 次）",
                    delay.as_millis(),
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // 循环至少执行一轮，失败路径必然已有 last_err。
    Err(last_err.unwrap_or(ApiError::EmptyResponse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_matches_429_and_message() {
        assert!(is_quota_error(&ApiError::Http {
            status: 429,
            message: "Too many requests".to_string(),
        }));
        assert!(is_quota_error(&ApiError::Http {
            status: 503,
            message: "Quota exceeded for model".to_string(),
        }));
        assert!(!is_quota_error(&ApiError::Http {
            status: 400,
            message: "Invalid argument".to_string(),
        }));
        assert!(!is_quota_error(&ApiError::EmptyResponse));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(5_000));
        assert_eq!(cfg.delay_for(60), Duration::from_millis(5_000));
    }
}
