//! 每日 Token 配额跟踪。
//!
//! - 固定日预算 1,000,000 tokens，70% 告警，超过 90% 设置耗尽锁存
//! - 日切为惰性触发：任何记账/查询操作发现日历日变化时归零
//! - 锁存在当日内不可清除（没有减量操作），仅随日切复位
//! - 仅内存态，进程重启即归零（跨重启会低估真实用量，按软限额使用）

use crate::util::clock::Clock;
use crate::util::currency::group_thousands;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

pub const DAILY_TOKEN_LIMIT: u64 = 1_000_000;
const WARNING_THRESHOLD: f64 = 0.7;
const CRITICAL_THRESHOLD: f64 = 0.9;
const LOW_REMAINING_FRACTION: f64 = 0.2;

/// 失败调用的固定记账量：失败的请求服务端同样消耗配额，本地必须计入。
pub const FAILED_CALL_TOKENS: u64 = 100;
/// 成功响应缺少 usageMetadata 时的估算记账量。
pub const DEFAULT_TOKENS_PER_REQUEST: u64 = 1_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStats {
    pub requests_today: u64,
    pub tokens_used_today: u64,
    pub last_reset_time: DateTime<Utc>,
    pub estimated_tokens_remaining: u64,
    pub quota_exhausted: bool,
}

impl QuotaStats {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            requests_today: 0,
            tokens_used_today: 0,
            last_reset_time: now,
            estimated_tokens_remaining: DAILY_TOKEN_LIMIT,
            quota_exhausted: false,
        }
    }
}

/// 配额跟踪器。状态只通过 `track_usage` 写入，读路径同样触发惰性日切。
pub struct QuotaTracker {
    state: Mutex<QuotaStats>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(QuotaStats::fresh(now)),
            clock,
        }
    }

    /// 记一次 API 调用的 token 用量。
    pub fn track_usage(&self, tokens: u64) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        reset_if_new_day(&mut state, now);

        state.requests_today += 1;
        state.tokens_used_today = state.tokens_used_today.saturating_add(tokens);
        state.estimated_tokens_remaining =
            DAILY_TOKEN_LIMIT.saturating_sub(state.tokens_used_today);

        let usage = state.tokens_used_today as f64 / DAILY_TOKEN_LIMIT as f64;
        if usage > CRITICAL_THRESHOLD {
            state.quota_exhausted = true;
            tracing::error!(
                "API 配额已达 {}%（{} / {} tokens），切换到降级模式",
                (usage * 100.0).round(),
                group_thousands(state.tokens_used_today),
                group_thousands(DAILY_TOKEN_LIMIT),
            );
        } else if usage > WARNING_THRESHOLD {
            tracing::warn!(
                "API 配额告警：已用 {}%（{} / {} tokens）",
                (usage * 100.0).round(),
                group_thousands(state.tokens_used_today),
                group_thousands(DAILY_TOKEN_LIMIT),
            );
        }
    }

    /// 配额是否已耗尽（当日锁存）。
    pub fn is_exhausted(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        reset_if_new_day(&mut state, now);
        state.quota_exhausted
    }

    /// 剩余配额是否偏低（低于 20%）。
    pub fn is_low(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        reset_if_new_day(&mut state, now);
        (state.estimated_tokens_remaining as f64)
            < DAILY_TOKEN_LIMIT as f64 * LOW_REMAINING_FRACTION
    }

    pub fn stats(&self) -> QuotaStats {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        reset_if_new_day(&mut state, now);
        state.clone()
    }

    /// 距下一次日切的剩余时间（上次复位时刻 + 24h）。
    pub fn time_until_reset(&self) -> Duration {
        let now = self.clock.now();
        let state = self.state.lock().unwrap();
        let next_reset = state.last_reset_time + Duration::hours(24);
        (next_reset - now).max(Duration::zero())
    }

    /// 单行用量摘要，用于日志与 stats 接口。
    pub fn format_stats(&self) -> String {
        let stats = self.stats();
        let usage =
            (stats.tokens_used_today as f64 / DAILY_TOKEN_LIMIT as f64 * 100.0).round() as u64;
        let until = self.time_until_reset();
        format!(
            "API Quota: {usage}% used | {} / {} tokens | Reset in {}h {}m",
            group_thousands(stats.tokens_used_today),
            group_thousands(DAILY_TOKEN_LIMIT),
            until.num_hours(),
            until.num_minutes() % 60,
        )
    }
}

fn reset_if_new_day(state: &mut QuotaStats, now: DateTime<Utc>) {
    if state.last_reset_time.date_naive() != now.date_naive() {
        *state = QuotaStats::fresh(now);
        tracing::info!("每日 API 配额已复位");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::test_support::ManualClock;
    use chrono::TimeZone;

    fn tracker_at(hour: u32) -> (Arc<ManualClock>, QuotaTracker) {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let tracker = QuotaTracker::new(clock.clone());
        (clock, tracker)
    }

    #[test]
    fn tracks_requests_and_remaining_tokens() {
        let (_clock, tracker) = tracker_at(9);
        tracker.track_usage(1_000);
        tracker.track_usage(FAILED_CALL_TOKENS);

        let stats = tracker.stats();
        assert_eq!(stats.requests_today, 2);
        assert_eq!(stats.tokens_used_today, 1_100);
        assert_eq!(stats.estimated_tokens_remaining, DAILY_TOKEN_LIMIT - 1_100);
        assert!(!stats.quota_exhausted);
    }

    #[test]
    fn latch_sets_past_critical_and_stays_for_the_day() {
        let (_clock, tracker) = tracker_at(9);
        tracker.track_usage(950_000);
        assert!(tracker.is_exhausted());

        // 后续零用量记账不会清除锁存。
        tracker.track_usage(0);
        tracker.track_usage(0);
        assert!(tracker.is_exhausted());
    }

    #[test]
    fn warning_threshold_does_not_latch() {
        let (_clock, tracker) = tracker_at(9);
        tracker.track_usage(750_000);
        assert!(!tracker.is_exhausted());
        assert!(!tracker.is_low());

        tracker.track_usage(100_000); // 85%，剩余 15% < 20%
        assert!(tracker.is_low());
        assert!(!tracker.is_exhausted());
    }

    #[test]
    fn new_day_resets_counters_and_clears_latch() {
        let (clock, tracker) = tracker_at(9);
        tracker.track_usage(950_000);
        assert!(tracker.is_exhausted());

        clock.advance(Duration::days(1));
        // 任意读操作都触发日切。
        assert!(!tracker.is_exhausted());
        let stats = tracker.stats();
        assert_eq!(stats.requests_today, 0);
        assert_eq!(stats.tokens_used_today, 0);
        assert_eq!(stats.estimated_tokens_remaining, DAILY_TOKEN_LIMIT);
    }

    #[test]
    fn remaining_tokens_floor_at_zero() {
        let (_clock, tracker) = tracker_at(9);
        tracker.track_usage(2_000_000);
        let stats = tracker.stats();
        assert_eq!(stats.estimated_tokens_remaining, 0);
        assert!(stats.quota_exhausted);
    }

    #[test]
    fn format_stats_reports_usage_and_reset_window() {
        let (clock, tracker) = tracker_at(9);
        tracker.track_usage(500_000);
        clock.advance(Duration::hours(3));
        let line = tracker.format_stats();
        assert_eq!(
            line,
            "API Quota: 50% used | 500,000 / 1,000,000 tokens | Reset in 21h 0m"
        );
    }
}
