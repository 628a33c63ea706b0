//! Device identity collaborator.
//!
//! The facade treats the device identifier as an opaque string the
//! integrator embeds in the about document; this module only supplies a
//! default source for it.

use std::sync::OnceLock;

use uuid::Uuid;

/// Source of a stable, human-readable unique identifier for the host device.
pub trait DeviceIdProvider: Send + Sync {
    /// A stable identifier in 36-character hyphenated form.
    fn device_id(&self) -> String;
}

/// Default provider.
///
/// Derives a v5 UUID from the host name when one is available, so the same
/// machine keeps the same identifier across runs; otherwise falls back to a
/// random v4 UUID held for the lifetime of the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidDeviceId;

impl DeviceIdProvider for UuidDeviceId {
    fn device_id(&self) -> String {
        static ID: OnceLock<String> = OnceLock::new();
        ID.get_or_init(|| match std::env::var("HOSTNAME") {
            Ok(host) if !host.is_empty() => {
                Uuid::new_v5(&Uuid::NAMESPACE_DNS, host.as_bytes()).to_string()
            }
            _ => Uuid::new_v4().to_string(),
        })
        .clone()
    }
}
