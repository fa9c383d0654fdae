//! Bluetooth Module
//!
//! Backend implementations for the two driver stacks the pairing engine
//! drives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     PairingEngine                        │
//! │        (control loop - see crate::pairing)               │
//! └──────────────┬──────────────────────────┬───────────────┘
//!                │                          │
//!                ▼                          ▼
//! ┌──────────────────────┐   ┌─────────────────────────────┐
//! │     HostBackend      │   │        VendorBackend        │
//! │                      │   │                             │
//! │ - blocking calls     │   │ - fire-and-forget calls     │
//! │ - result codes       │   │ - notification channel      │
//! │   returned inline    │   │ - internal scan/connect     │
//! │                      │   │   state machine             │
//! └──────────────────────┘   └──────────────┬──────────────┘
//!                                           │
//!                                           ▼
//!                            ┌─────────────────────────────┐
//!                            │    TosDriver (TosBtAPI)     │
//!                            │  bound DLL function table   │
//!                            └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`backend`] - The blocking capability set both stacks are driven through
//! - [`vendor`] - Event-driven backend: notification decoding and state machine
//! - [`host`] - Host stack bindings (Windows Bluetooth API)
//! - [`tosapi`] - Vendor stack bindings (Toshiba Bluetooth API)

pub mod backend;
pub mod vendor;

#[cfg(windows)]
pub mod host;
#[cfg(windows)]
pub mod tosapi;

pub use backend::{Backend, BackendError};
pub use vendor::{Notification, NotificationCode, ScanState, VendorBackend, VendorDriver};
