//! Device ownership across sessions
//!
//! In multi-channel setups several sessions share one instrument client.
//! [`DeviceClaims`] makes sure a device is attached to at most one of them:
//! a session claims the device before connecting and the [`DeviceClaim`]
//! guard releases it when dropped, on every exit path.

use crate::error::{Result, SessionError};
use crate::types::{Device, DeviceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Held = HashMap<DeviceId, String>;
type Registry = Arc<Mutex<Held>>;

/// Lock the registry, recovering it from a panicked holder
fn lock(registry: &Mutex<Held>) -> MutexGuard<'_, Held> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of devices currently held by a session
#[derive(Debug, Clone, Default)]
pub struct DeviceClaims {
    held: Registry,
}

impl DeviceClaims {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a device for the session named `owner`
    ///
    /// Fails with [`SessionError::DeviceBusy`] if another claim is alive.
    pub fn claim(&self, device: &Device, owner: &str) -> Result<DeviceClaim> {
        let mut held = lock(&self.held);

        if let Some(current) = held.get(&device.id) {
            tracing::debug!("Device {} already claimed by {}", device.id, current);
            return Err(SessionError::DeviceBusy(device.id.to_string()));
        }

        held.insert(device.id.clone(), owner.to_string());
        Ok(DeviceClaim {
            registry: self.held.clone(),
            device: device.id.clone(),
        })
    }

    /// Whether a device is currently claimed
    pub fn is_claimed(&self, device: &DeviceId) -> bool {
        lock(&self.held).contains_key(device)
    }

    /// Name of the session holding a device
    pub fn owner(&self, device: &DeviceId) -> Option<String> {
        lock(&self.held).get(device).cloned()
    }
}

/// Exclusive hold on a device, released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    registry: Registry,
    device: DeviceId,
}

impl DeviceClaim {
    /// The claimed device
    pub fn device(&self) -> &DeviceId {
        &self.device
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.device);
    }
}
