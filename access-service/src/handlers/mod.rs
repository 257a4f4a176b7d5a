//! HTTP handlers for access-service.

pub mod admin;
pub mod devices;
pub mod license;
pub mod metrics;
pub mod session;
pub mod two_factor;
