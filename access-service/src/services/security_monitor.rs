//! Sliding-window anomaly detection over security events.
//!
//! Every probe appends to the `(identifier, type)` list and compares the
//! number of events inside the type's lookback with its threshold. A call
//! that meets the threshold dispatches an alert in the background; there is
//! no de-duplication across calls.

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use service_core::middleware::rate_limit::{RateLimitObserver, RateLimitResult};
use std::sync::Arc;

use super::metrics;
use super::notification::NotificationChannel;
use super::stores::{InMemorySecurityEventStore, SecurityEventStore};
use crate::models::{SecurityAlert, SecurityEvent, SecurityEventType};

/// Lists untouched for this long are dropped by the sweep.
pub const DEFAULT_RETENTION_MINUTES: i64 = 15;
/// Local hours in `[0, UNUSUAL_HOUR_END)` count as unusual.
pub const UNUSUAL_HOUR_END: u32 = 6;

#[derive(Clone)]
pub struct SecurityMonitor {
    store: Arc<dyn SecurityEventStore>,
    notifier: Arc<dyn NotificationChannel>,
    local_offset: FixedOffset,
}

impl SecurityMonitor {
    pub fn new(
        store: Arc<dyn SecurityEventStore>,
        notifier: Arc<dyn NotificationChannel>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            notifier,
            local_offset,
        }
    }

    pub fn in_memory(notifier: Arc<dyn NotificationChannel>) -> Self {
        Self::new(
            Arc::new(InMemorySecurityEventStore::new()),
            notifier,
            Utc.fix(),
        )
    }

    pub fn store(&self) -> &Arc<dyn SecurityEventStore> {
        &self.store
    }

    pub async fn record_failed_access(
        &self,
        identifier: &str,
        endpoint: &str,
        detail: &str,
    ) -> Option<SecurityAlert> {
        self.record_at(SecurityEventType::FailedAccess, identifier, endpoint, detail, Utc::now())
            .await
    }

    pub async fn record_rate_limit_violation(
        &self,
        identifier: &str,
        endpoint: &str,
        detail: &str,
    ) -> Option<SecurityAlert> {
        self.record_at(
            SecurityEventType::RateLimitViolation,
            identifier,
            endpoint,
            detail,
            Utc::now(),
        )
        .await
    }

    pub async fn record_unusual_hour_access(
        &self,
        identifier: &str,
        endpoint: &str,
        detail: &str,
    ) -> Option<SecurityAlert> {
        self.record_unusual_hour_access_at(identifier, endpoint, detail, Utc::now())
            .await
    }

    /// No-op outside the unusual-hour band.
    pub async fn record_unusual_hour_access_at(
        &self,
        identifier: &str,
        endpoint: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        if !self.is_unusual_hour(now) {
            return None;
        }
        self.record_at(SecurityEventType::UnusualHour, identifier, endpoint, detail, now)
            .await
    }

    pub fn is_unusual_hour(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&self.local_offset).hour() < UNUSUAL_HOUR_END
    }

    pub async fn record_at(
        &self,
        event_type: SecurityEventType,
        identifier: &str,
        endpoint: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        tracing::warn!(
            event_type = event_type.as_str(),
            identifier = %identifier,
            endpoint = %endpoint,
            detail = %detail,
            "Security event"
        );

        let event = SecurityEvent {
            event_type,
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
            occurred_at: now,
        };
        let lookback = event_type.lookback();
        let count = self.store.append_and_count(event, now - lookback);

        if count < event_type.threshold() {
            return None;
        }

        let alert = SecurityAlert {
            event_type,
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
            event_count: count,
            window_seconds: lookback.num_seconds(),
            triggered_at: now,
        };

        tracing::error!(
            event_type = event_type.as_str(),
            identifier = %identifier,
            event_count = count,
            "Security alert threshold reached"
        );
        metrics::record_alert(event_type.as_str());

        let notifier = self.notifier.clone();
        let dispatched = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_alert(&dispatched).await {
                tracing::error!(
                    error = %e,
                    event_type = dispatched.event_type.as_str(),
                    "Failed to dispatch security alert"
                );
            }
        });

        Some(alert)
    }

    /// Drops lists whose newest event is older than the retention for their
    /// type: 15 minutes, or the lookback when that is longer.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.prune(now, &retention_for);
        if removed > 0 {
            tracing::debug!(removed, "Pruned idle security event lists");
        }
        removed
    }
}

pub fn retention_for(event_type: SecurityEventType) -> Duration {
    std::cmp::max(
        Duration::minutes(DEFAULT_RETENTION_MINUTES),
        event_type.lookback(),
    )
}

impl RateLimitObserver for SecurityMonitor {
    fn on_rejected(&self, tier: &str, identifier: &str, endpoint: &str, result: &RateLimitResult) {
        metrics::record_rate_limit_rejection(tier);

        let monitor = self.clone();
        let identifier = identifier.to_string();
        let endpoint = endpoint.to_string();
        let detail = format!("tier {} limit {} exceeded", tier, result.limit);
        tokio::spawn(async move {
            monitor
                .record_rate_limit_violation(&identifier, &endpoint, &detail)
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::RecordingNotifier;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn monitor(notifier: Arc<RecordingNotifier>) -> SecurityMonitor {
        SecurityMonitor::in_memory(notifier)
    }

    /// Let spawned dispatches run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    struct StalledNotifier;

    #[async_trait]
    impl NotificationChannel for StalledNotifier {
        async fn send_alert(&self, _alert: &SecurityAlert) -> Result<(), anyhow::Error> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn five_failures_inside_window_alert_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(notifier.clone());
        let start = noon();

        for i in 0..5 {
            let alert = monitor
                .record_at(
                    SecurityEventType::FailedAccess,
                    "1.2.3.4",
                    "license.verify",
                    "unknown key",
                    start + Duration::seconds(i * 30),
                )
                .await;
            assert_eq!(alert.is_some(), i == 4);
        }

        settle().await;
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event_count, 5);
    }

    #[tokio::test]
    async fn failures_spread_past_window_never_alert() {
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(notifier.clone());

        for i in 0..10 {
            monitor
                .record_at(
                    SecurityEventType::FailedAccess,
                    "1.2.3.4",
                    "license.verify",
                    "unknown key",
                    noon() + Duration::minutes(i * 2),
                )
                .await;
        }

        settle().await;
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn calls_above_threshold_keep_alerting() {
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(notifier.clone());

        for i in 0..4 {
            monitor
                .record_at(
                    SecurityEventType::RateLimitViolation,
                    "5.6.7.8",
                    "/license/verify",
                    "tier license",
                    noon() + Duration::seconds(i),
                )
                .await;
        }

        settle().await;
        assert_eq!(notifier.alerts().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let monitor = monitor(notifier.clone());

        let mut last = None;
        for i in 0..3 {
            last = monitor
                .record_at(
                    SecurityEventType::RateLimitViolation,
                    "5.6.7.8",
                    "/license/verify",
                    "tier license",
                    noon() + Duration::seconds(i),
                )
                .await;
        }

        settle().await;
        assert!(last.is_some());
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn stalled_channel_does_not_block_recording() {
        let monitor = SecurityMonitor::in_memory(Arc::new(StalledNotifier));

        for i in 0..4 {
            monitor
                .record_at(
                    SecurityEventType::FailedAccess,
                    "1.2.3.4",
                    "license.activate",
                    "unknown key",
                    noon() + Duration::seconds(i),
                )
                .await;
        }

        let alert = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            monitor.record_at(
                SecurityEventType::FailedAccess,
                "1.2.3.4",
                "license.activate",
                "unknown key",
                noon() + Duration::seconds(5),
            ),
        )
        .await
        .expect("recording waited on the notification channel");
        assert_eq!(alert.map(|a| a.event_count), Some(5));
    }

    #[tokio::test]
    async fn unusual_hour_uses_local_offset() {
        let notifier = Arc::new(RecordingNotifier::new());
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let monitor = SecurityMonitor::new(
            Arc::new(InMemorySecurityEventStore::new()),
            notifier.clone(),
            ist,
        );

        // 22:00 UTC is 03:30 local.
        let night = Utc.with_ymd_and_hms(2025, 3, 10, 22, 0, 0).unwrap();
        assert!(monitor.is_unusual_hour(night));
        assert!(!monitor.is_unusual_hour(noon()));

        assert!(monitor
            .record_unusual_hour_access_at("site.com", "license.verify", "ABC123", noon())
            .await
            .is_none());
        assert!(monitor
            .store()
            .events("site.com", SecurityEventType::UnusualHour)
            .is_empty());

        monitor
            .record_unusual_hour_access_at("site.com", "license.verify", "ABC123", night)
            .await;
        let alert = monitor
            .record_unusual_hour_access_at(
                "site.com",
                "license.verify",
                "ABC123",
                night + Duration::minutes(20),
            )
            .await;
        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn sweep_keeps_unusual_hour_lists_for_a_day() {
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(notifier);
        let t0 = noon();

        monitor
            .record_at(SecurityEventType::FailedAccess, "a", "e", "d", t0)
            .await;
        monitor
            .record_at(SecurityEventType::UnusualHour, "a", "e", "d", t0)
            .await;

        assert_eq!(monitor.sweep_at(t0 + Duration::minutes(16)), 1);
        assert_eq!(
            monitor.store().events("a", SecurityEventType::UnusualHour).len(),
            1
        );
        assert_eq!(monitor.sweep_at(t0 + Duration::hours(25)), 1);
    }
}
