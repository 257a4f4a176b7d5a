//! Security events observed on the request path and the alerts they raise.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    FailedAccess,
    RateLimitViolation,
    UnusualHour,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::FailedAccess => "FAILED_ACCESS",
            SecurityEventType::RateLimitViolation => "RATE_LIMIT_VIOLATION",
            SecurityEventType::UnusualHour => "UNUSUAL_HOUR",
        }
    }

    /// Events needed inside [`Self::lookback`] to raise an alert.
    pub fn threshold(&self) -> usize {
        match self {
            SecurityEventType::FailedAccess => 5,
            SecurityEventType::RateLimitViolation => 3,
            SecurityEventType::UnusualHour => 2,
        }
    }

    pub fn lookback(&self) -> Duration {
        match self {
            SecurityEventType::FailedAccess => Duration::minutes(5),
            SecurityEventType::RateLimitViolation => Duration::minutes(10),
            SecurityEventType::UnusualHour => Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub identifier: String,
    pub endpoint: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Raised when an identifier crosses a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub event_type: SecurityEventType,
    pub identifier: String,
    pub endpoint: String,
    pub detail: String,
    pub event_count: usize,
    pub window_seconds: i64,
    pub triggered_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn summary(&self) -> String {
        format!(
            "{} events of type {} from {} within {}s (latest on {}: {})",
            self.event_count,
            self.event_type.as_str(),
            self.identifier,
            self.window_seconds,
            self.endpoint,
            self.detail
        )
    }
}
