//! Services layer for access-service.
//!
//! License activation, the security monitor, the second-factor lifecycle and
//! the collaborator stores they run against.

pub mod audit;
pub mod auth;
pub mod background;
pub mod crypto;
mod database;
pub mod error;
pub mod license;
pub mod metrics;
pub mod notification;
pub mod security_monitor;
pub mod session;
pub mod stores;
pub mod totp;
pub mod trusted_devices;
pub mod two_factor;

pub use audit::{AuditLog, InMemoryAuditLog, TracingAuditLog};
pub use auth::{
    AuthService, LoginAttempt, LoginOutcome, SecondFactorMethod, TwoFactorStatus, VerifyResult,
};
pub use background::{BackgroundTasks, SweepIntervals};
pub use crypto::{CryptoError, SecretCipher};
pub use database::Database;
pub use error::ServiceError;
pub use license::LicenseService;
pub use notification::{LogNotifier, NotificationChannel, RecordingNotifier, WebhookNotifier};
pub use security_monitor::SecurityMonitor;
pub use session::{SessionClaims, SessionService, SessionToken};
pub use stores::{
    BindOutcome, InMemoryLicenseStore, InMemorySecurityEventStore, InMemoryTrustedDeviceStore,
    InMemoryUserStore, LicenseStore, SecurityEventStore, TrustedDeviceStore, UserStore,
};
pub use trusted_devices::{DeviceCheck, IssuedDevice, TrustedDeviceRegistry};
pub use two_factor::{TwoFactorService, TwoFactorSetup};
