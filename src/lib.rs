//! Pairing engine for Nintendo Wii remote controllers.
//!
//! Drives two incompatible Bluetooth driver stacks from a single control
//! loop: the host stack (blocking calls per device) and a vendor stack
//! (fire-and-forget calls with out-of-band notifications). Progress is
//! pushed to the caller through the [`pairing::PairingListener`] trait.

pub mod domain;
pub mod infrastructure;
pub mod pairing;
