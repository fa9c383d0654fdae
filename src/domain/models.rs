use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw Bluetooth hardware address, stored in the byte order the driver
/// reports it (least significant byte first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BtAddress(pub [u8; 6]);

impl fmt::Display for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Most significant byte first, the way adapters print it on the label
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Identifies a radio within the backend that enumerated it. The underlying
/// driver handle never leaves that backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RadioId(pub usize);

/// A local Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct Radio {
    pub id: RadioId,
    pub name: String,
    pub address: BtAddress,
}

/// A remote device discovered during inquiry. Ephemeral: re-enumerated from
/// scratch on every scan pass.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub address: BtAddress,
    /// The driver has completed pairing with this device before and still
    /// holds credentials for it.
    pub remembered: bool,
    pub connected: bool,
    pub class_of_device: u32,
}

/// The pairing passphrase. The controller protocol fixes it to the six bytes
/// of the initiating radio's own address, copied verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passkey(pub [u8; 6]);

impl Passkey {
    pub fn from_radio(radio: &Radio) -> Self {
        Self(radio.address.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairingStatus {
    Running,
    Cancelled,
    Failed,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Error,
}

/// Progress snapshot pushed through the listener. Immutable once emitted;
/// `paired_count` always equals `paired_names.len()`.
#[derive(Debug, Clone, Serialize)]
pub struct PairingReport {
    pub status: PairingStatus,
    pub paired_count: usize,
    pub remove_mode: bool,
    pub paired_names: Vec<String>,
}
