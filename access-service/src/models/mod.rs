pub mod audit_record;
pub mod license;
pub mod security_event;
pub mod trusted_device;
pub mod user;

pub use audit_record::AuditRecord;
pub use license::{ActivationOutcome, License, LicenseRow, LicenseSnapshot, LicenseStatus};
pub use security_event::{SecurityAlert, SecurityEvent, SecurityEventType};
pub use trusted_device::{DeviceInfo, TrustedDevice, TrustedDeviceView, DEFAULT_TRUSTED_DEVICE_DAYS};
pub use user::{TwoFactorCredential, TwoFactorState, User, UserRow};
