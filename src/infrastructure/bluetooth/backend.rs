//! Backend capability set.
//!
//! Both driver stacks are driven through this surface. The host stack
//! implements every operation as a blocking call; the vendor stack shares
//! the enumeration and removal operations but replaces device discovery and
//! connection with the fire-and-forget surface in [`super::vendor`].

use crate::domain::models::{Device, Passkey, Radio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The stack reports no local adapters. Non-fatal for the engine as long
    /// as the other backend has radios.
    #[error("no bluetooth radio found")]
    NoRadioFound,

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("could not enable control service: {0}")]
    ServiceEnable(String),

    #[error("could not remove pairing: {0}")]
    Removal(String),

    /// Vendor API or DLL fault.
    #[error("driver error: {0}")]
    Driver(String),
}

pub trait Backend {
    /// Short label used in console lines and logs.
    fn label(&self) -> &'static str;

    /// Enumerate local radios. `Err(NoRadioFound)` when the stack has none.
    fn enumerate_radios(&mut self) -> Result<Vec<Radio>, BackendError>;

    /// Enumerate remote devices with inquiry enabled (an active scan, not a
    /// cache lookup). An empty result is not an error; the inquiry simply
    /// timed out without finding anything.
    fn enumerate_devices(&mut self, radio: &Radio) -> Result<Vec<Device>, BackendError>;

    /// Prove the passphrase to the device. Safe to call repeatedly while the
    /// device is unauthenticated.
    fn authenticate(
        &mut self,
        radio: &Radio,
        device: &Device,
        passkey: &Passkey,
    ) -> Result<(), BackendError>;

    /// Activate the HID-class service record so the pairing survives
    /// reboots. Must only be attempted after a successful [`Self::authenticate`].
    fn enable_control_service(&mut self, radio: &Radio, device: &Device)
        -> Result<(), BackendError>;

    /// Forget a previously remembered device.
    fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError>;
}
