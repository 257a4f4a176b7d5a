//! Periodic sweeps for the in-process state stores.
//!
//! Trusted devices have no sweep; expired ones are removed when looked up.

use chrono::Utc;
use service_core::middleware::rate_limit::RateLimiter;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::security_monitor::SecurityMonitor;

#[derive(Debug, Clone, Copy)]
pub struct SweepIntervals {
    pub rate_limit: Duration,
    pub security_events: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(60),
            security_events: Duration::from_secs(300),
        }
    }
}

/// Owns the sweep tasks. Dropping without [`BackgroundTasks::shutdown`]
/// leaves them running until the runtime stops.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn start(
        limiter: RateLimiter,
        monitor: SecurityMonitor,
        intervals: SweepIntervals,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(2);

        handles.push(spawn_sweep(
            "rate_limit",
            intervals.rate_limit,
            cancel.clone(),
            move || {
                let limiter = limiter.clone();
                async move { limiter.sweep().await }
            },
        ));

        handles.push(spawn_sweep(
            "security_events",
            intervals.security_events,
            cancel.clone(),
            move || {
                let monitor = monitor.clone();
                async move { monitor.sweep_at(Utc::now()) }
            },
        ));

        tracing::info!(
            rate_limit_secs = intervals.rate_limit.as_secs(),
            security_events_secs = intervals.security_events.as_secs(),
            "Background sweeps started"
        );

        Self { cancel, handles }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every sweep and wait for the tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background sweep task failed");
            }
        }
        tracing::info!("Background sweeps stopped");
    }
}

fn spawn_sweep<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = usize> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = sweep().await;
                    if removed > 0 {
                        tracing::debug!(sweep = name, removed, "Sweep removed expired entries");
                    }
                }
            }
        }
    })
}
