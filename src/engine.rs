//! 提取编排器：配额 → 缓存 → 远程（可重试） → 降级 → 失败。
//!
//! 每一步短路返回，结果携带来源标签（api/cache/fallback/none）
//! 和面向 UI 的诊断文案。诊断文案是线上契约，保持英文原样。

use crate::cache::ExtractionCache;
use crate::fallback::fallback_extract;
use crate::gemini::{ApiError, GeminiClient};
use crate::quota::QuotaTracker;
use crate::retry::{RetryConfig, extract_with_retry};
use crate::types::{ExtractionResult, InputFragment, InventoryItem};
use crate::util::currency::format_currency;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 远程提取后端。拆成 trait 是为了在测试里注入计数桩。
pub trait ExtractBackend: Send + Sync {
    fn extract(
        &self,
        inputs: &[InputFragment],
        inventory: &[InventoryItem],
    ) -> impl std::future::Future<Output = Result<ExtractionResult, ApiError>> + Send;
}

impl ExtractBackend for GeminiClient {
    async fn extract(
        &self,
        inputs: &[InputFragment],
        inventory: &[InventoryItem],
    ) -> Result<ExtractionResult, ApiError> {
        GeminiClient::extract(self, inputs, inventory).await
    }
}

/// 单次编排的开关。全部默认开启，max_retries 默认 2。
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractOptions {
    pub use_retry: bool,
    pub use_cache: bool,
    pub use_fallback: bool,
    pub max_retries: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            use_retry: true,
            use_cache: true,
            use_fallback: true,
            max_retries: 2,
        }
    }
}

/// 最终结果的来源标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Api,
    Cache,
    Fallback,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartOutcome {
    pub result: Option<ExtractionResult>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Engine<B> {
    backend: B,
    quota: Arc<QuotaTracker>,
    cache: Arc<ExtractionCache>,
    retry: RetryConfig,
}

impl<B: ExtractBackend> Engine<B> {
    pub fn new(
        backend: B,
        quota: Arc<QuotaTracker>,
        cache: Arc<ExtractionCache>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            quota,
            cache,
            retry,
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn cache(&self) -> &ExtractionCache {
        &self.cache
    }

    /// 带全部保护的提取链。
    pub async fn smart_extract(
        &self,
        inputs: &[InputFragment],
        inventory: &[InventoryItem],
        options: ExtractOptions,
    ) -> SmartOutcome {
        let text_input = inputs
            .iter()
            .find_map(|i| i.text.as_deref().filter(|t| !t.is_empty()))
            .unwrap_or_default();

        // 第一步：配额锁存直接跳过网络。
        if self.quota.is_exhausted() {
            tracing::warn!("API 配额耗尽，进入降级解析");
            if options.use_fallback {
                return SmartOutcome {
                    result: Some(fallback_extract(text_input)),
                    source: Source::Fallback,
                    error: Some("API quota exhausted, using basic parsing".to_string()),
                };
            }
            return SmartOutcome {
                result: None,
                source: Source::None,
                error: Some("API quota exhausted".to_string()),
            };
        }

        if self.quota.is_low() {
            tracing::warn!("{}", self.quota.format_stats());
        }

        // 第二步：缓存命中不走网络、不记配额。
        if options.use_cache
            && !text_input.is_empty()
            && let Some(cached) = self.cache.get(text_input).await
        {
            return SmartOutcome {
                result: Some(cached),
                source: Source::Cache,
                error: None,
            };
        }

        // 第三步：远程调用（可选重试包装）。
        let api_result = if options.use_retry {
            let retry = RetryConfig {
                max_retries: options.max_retries,
                ..self.retry
            };
            extract_with_retry(&self.backend, inputs, inventory, retry).await
        } else {
            self.backend.extract(inputs, inventory).await
        };

        match api_result {
            Ok(result) => {
                if let ExtractionResult::Sale(sale) = &result
                    && let Some(total) = sale.total
                {
                    tracing::info!(
                        "识别到销售记录，金额 {}",
                        format_currency(total, "NGN")
                    );
                }
                if options.use_cache && !text_input.is_empty() {
                    self.cache.set(text_input, &result).await;
                }
                SmartOutcome {
                    result: Some(result),
                    source: Source::Api,
                    error: None,
                }
            }
            Err(err) => {
                tracing::error!("远程提取失败：{err}");
                // 第四步：降级解析。
                if options.use_fallback {
                    return SmartOutcome {
                        result: Some(fallback_extract(text_input)),
                        source: Source::Fallback,
                        error: Some("Using basic parsing mode".to_string()),
                    };
                }
                // 第五步：彻底失败。
                SmartOutcome {
                    result: None,
                    source: Source::None,
                    error: Some("Could not extract data. Please enter manually.".to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, InquiryRecord};
    use crate::util::clock::test_support::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SpyBackend {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<Result<ExtractionResult, ApiError>>>,
    }

    impl SpyBackend {
        fn with(responses: Vec<Result<ExtractionResult, ApiError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ExtractBackend for SpyBackend {
        async fn extract(
            &self,
            _inputs: &[InputFragment],
            _inventory: &[InventoryItem],
        ) -> Result<ExtractionResult, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::EmptyResponse))
        }
    }

    fn ok_inquiry() -> Result<ExtractionResult, ApiError> {
        Ok(ExtractionResult::Inquiry(InquiryRecord {
            suggested_actions: vec!["Send Account Details".to_string()],
            confidence: Confidence::High,
        }))
    }

    fn quota_err() -> Result<ExtractionResult, ApiError> {
        Err(ApiError::Http {
            status: 429,
            message: "Quota exceeded".to_string(),
        })
    }

    fn engine_with(
        backend: SpyBackend,
        dir: &tempfile::TempDir,
    ) -> (Arc<QuotaTracker>, Engine<SpyBackend>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ));
        let quota = Arc::new(QuotaTracker::new(clock.clone()));
        let cache = Arc::new(ExtractionCache::new(
            dir.path().to_str().unwrap(),
            clock.clone(),
        ));
        let retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        };
        let engine = Engine::new(backend, quota.clone(), cache, retry);
        (quota, engine)
    }

    fn text_inputs(text: &str) -> Vec<InputFragment> {
        vec![InputFragment {
            text: Some(text.to_string()),
            image_base64: None,
        }]
    }

    #[tokio::test]
    async fn exhausted_quota_skips_network_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (quota, engine) = engine_with(SpyBackend::with(vec![ok_inquiry()]), &dir);
        quota.track_usage(950_000);

        let out = engine
            .smart_extract(
                &text_inputs("I paid 5000 for delivery"),
                &[],
                ExtractOptions::default(),
            )
            .await;

        assert_eq!(out.source, Source::Fallback);
        assert_eq!(
            out.error.as_deref(),
            Some("API quota exhausted, using basic parsing")
        );
        assert!(matches!(out.result, Some(ExtractionResult::Expense(_))));
        assert_eq!(engine.backend.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_quota_without_fallback_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let (quota, engine) = engine_with(SpyBackend::with(vec![ok_inquiry()]), &dir);
        quota.track_usage(950_000);

        let out = engine
            .smart_extract(
                &text_inputs("anything"),
                &[],
                ExtractOptions {
                    use_fallback: false,
                    ..ExtractOptions::default()
                },
            )
            .await;

        assert_eq!(out.source, Source::None);
        assert_eq!(out.error.as_deref(), Some("API quota exhausted"));
        assert!(out.result.is_none());
        assert_eq!(engine.backend.calls(), 0);
    }

    #[tokio::test]
    async fn api_success_writes_cache_and_second_call_hits_it() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(SpyBackend::with(vec![ok_inquiry()]), &dir);

        let first = engine
            .smart_extract(
                &text_inputs("how much is delivery"),
                &[],
                ExtractOptions::default(),
            )
            .await;
        assert_eq!(first.source, Source::Api);
        assert!(first.error.is_none());

        let second = engine
            .smart_extract(
                &text_inputs("how much is delivery"),
                &[],
                ExtractOptions::default(),
            )
            .await;
        assert_eq!(second.source, Source::Cache);
        assert_eq!(
            second.result.unwrap().confidence(),
            Confidence::Cached
        );
        // 第二次未触达后端。
        assert_eq!(engine.backend.calls(), 1);
    }

    #[tokio::test]
    async fn quota_errors_are_retried_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![quota_err(), quota_err(), ok_inquiry()]),
            &dir,
        );

        let out = engine
            .smart_extract(&text_inputs("hello"), &[], ExtractOptions::default())
            .await;

        assert_eq!(out.source, Source::Api);
        assert_eq!(engine.backend.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_give_up_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![quota_err(), quota_err(), quota_err(), quota_err()]),
            &dir,
        );

        let out = engine
            .smart_extract(&text_inputs("hello"), &[], ExtractOptions::default())
            .await;

        // 初次 + 2 次重试，之后放弃并降级。
        assert_eq!(engine.backend.calls(), 3);
        assert_eq!(out.source, Source::Fallback);
    }

    #[tokio::test]
    async fn non_quota_error_fails_over_to_fallback_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![Err(ApiError::Http {
                status: 400,
                message: "Invalid argument".to_string(),
            })]),
            &dir,
        );

        let out = engine
            .smart_extract(
                &text_inputs("order 2 x sneakers total 30000"),
                &[],
                ExtractOptions::default(),
            )
            .await;

        assert_eq!(out.source, Source::Fallback);
        assert_eq!(out.error.as_deref(), Some("Using basic parsing mode"));
        assert!(matches!(out.result, Some(ExtractionResult::Sale(_))));
        assert_eq!(engine.backend.calls(), 1);
    }

    #[tokio::test]
    async fn failure_without_fallback_reports_manual_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![Err(ApiError::EmptyResponse)]),
            &dir,
        );

        let out = engine
            .smart_extract(
                &text_inputs("hello"),
                &[],
                ExtractOptions {
                    use_fallback: false,
                    ..ExtractOptions::default()
                },
            )
            .await;

        assert_eq!(out.source, Source::None);
        assert_eq!(
            out.error.as_deref(),
            Some("Could not extract data. Please enter manually.")
        );
    }

    #[tokio::test]
    async fn retry_disabled_makes_a_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![quota_err(), ok_inquiry()]),
            &dir,
        );

        let out = engine
            .smart_extract(
                &text_inputs("hello"),
                &[],
                ExtractOptions {
                    use_retry: false,
                    ..ExtractOptions::default()
                },
            )
            .await;

        assert_eq!(out.source, Source::Fallback);
        assert_eq!(engine.backend.calls(), 1);
    }

    #[tokio::test]
    async fn cache_disabled_always_calls_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (_quota, engine) = engine_with(
            SpyBackend::with(vec![ok_inquiry(), ok_inquiry()]),
            &dir,
        );
        let options = ExtractOptions {
            use_cache: false,
            ..ExtractOptions::default()
        };

        engine
            .smart_extract(&text_inputs("same input"), &[], options)
            .await;
        let second = engine
            .smart_extract(&text_inputs("same input"), &[], options)
            .await;

        assert_eq!(second.source, Source::Api);
        assert_eq!(engine.backend.calls(), 2);
    }
}
