//! Vendor (event-driven) backend.
//!
//! The vendor stack reports scan and connect outcomes through out-of-band
//! notification words instead of return values. [`VendorBackend`] owns the
//! resulting state machine and the channel the host's event dispatch pushes
//! `(code, param)` pairs into. The pairing loop drains that channel once per
//! iteration via [`VendorBackend::pump`], so every state mutation happens on
//! the loop thread regardless of which thread delivered the notification.

use crate::domain::models::{BtAddress, Device, Passkey, Radio};
use crate::infrastructure::bluetooth::backend::BackendError;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// Raw notification words, as the vendor driver posts them.
const NM_SEARCH_ERROR: u32 = 0x0060_0000;
const NM_SEARCH_STARTING: u32 = 0x0060_0001;
const NM_SEARCH_FOUND: u32 = 0x0060_0080;
const NM_SEARCH_FINISHED: u32 = 0x0060_00FF;
const NM_CONNECT_ERROR: u32 = 0x00B0_0300;
const NM_CONNECT_STARTING: u32 = 0x00B0_0301;
const NM_CONNECT_CONNECTED: u32 = 0x00B0_0380;
const NM_CONNECT_FINISHED: u32 = 0x00B0_03FF;
const NM_CONNECTION_CHANGED: u32 = 0x1010_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCode {
    SearchError,
    SearchStarting,
    SearchFound,
    SearchFinished,
    ConnectError,
    ConnectStarting,
    ConnectConnected,
    ConnectFinished,
    ConnectionChanged,
    Unknown(u32),
}

impl NotificationCode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            NM_SEARCH_ERROR => Self::SearchError,
            NM_SEARCH_STARTING => Self::SearchStarting,
            NM_SEARCH_FOUND => Self::SearchFound,
            NM_SEARCH_FINISHED => Self::SearchFinished,
            NM_CONNECT_ERROR => Self::ConnectError,
            NM_CONNECT_STARTING => Self::ConnectStarting,
            NM_CONNECT_CONNECTED => Self::ConnectConnected,
            NM_CONNECT_FINISHED => Self::ConnectFinished,
            NM_CONNECTION_CHANGED => Self::ConnectionChanged,
            other => Self::Unknown(other),
        }
    }
}

/// One event from the vendor's notification channel. `param` is an opaque
/// word whose meaning depends on the code.
#[derive(Debug, Clone, Copy)]
pub struct Notification {
    pub code: NotificationCode,
    pub param: u32,
}

impl Notification {
    pub fn from_raw(code: u32, param: u32) -> Self {
        Self {
            code: NotificationCode::from_raw(code),
            param,
        }
    }
}

/// Scan/connect progress. No terminal state: the machine is re-armed to
/// `Idle` every pass until the pairing loop itself stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Connecting,
    Finished,
}

/// The fire-and-forget operations of the vendor stack. `start_searching` and
/// `start_connecting` return immediately; outcomes arrive later on the
/// notification channel.
pub trait VendorDriver {
    /// The stack's local adapter, if one is present.
    fn adapter(&mut self) -> Result<Option<Radio>, BackendError>;

    fn start_searching(&mut self) -> Result<(), BackendError>;

    /// Snapshot of the device list filled by the last search. Valid once a
    /// search-finished or search-error notification has arrived.
    fn device_list(&mut self) -> Result<Vec<Device>, BackendError>;

    /// Store the passphrase the stack auto-replies with during pairing.
    fn set_passkey(&mut self, device: &Device, passkey: &Passkey) -> Result<(), BackendError>;

    fn start_connecting(&mut self, device: &Device) -> Result<(), BackendError>;

    /// Forget stored credentials for the device.
    fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError>;
}

pub struct VendorBackend {
    driver: Box<dyn VendorDriver + Send>,
    adapter: Radio,
    tx: mpsc::UnboundedSender<Notification>,
    rx: mpsc::UnboundedReceiver<Notification>,
    state: ScanState,
    connected: u32,
    snapshot: Vec<Device>,
    attempted: HashSet<BtAddress>,
    attempt_order: Vec<Device>,
}

impl VendorBackend {
    /// Wrap a driver whose adapter is present. `Err(NoRadioFound)` when the
    /// stack has no adapter; other errors are driver faults.
    pub fn new(mut driver: Box<dyn VendorDriver + Send>) -> Result<Self, BackendError> {
        let adapter = driver.adapter()?.ok_or(BackendError::NoRadioFound)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            driver,
            adapter,
            tx,
            rx,
            state: ScanState::Idle,
            connected: 0,
            snapshot: Vec::new(),
            attempted: HashSet::new(),
            attempt_order: Vec::new(),
        })
    }

    /// Sender for the host's event-dispatch plumbing to push notifications
    /// into. Sends may happen on any thread; the state only changes when the
    /// loop thread drains them in [`Self::pump`].
    pub fn notification_sender(&self) -> mpsc::UnboundedSender<Notification> {
        self.tx.clone()
    }

    pub fn adapter(&self) -> &Radio {
        &self.adapter
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn snapshot(&self) -> &[Device] {
        &self.snapshot
    }

    /// Devices issued `start_connecting` in the current pass.
    pub fn attempted_count(&self) -> usize {
        self.attempt_order.len()
    }

    /// Drain pending notifications and advance the state machine.
    /// Unrecognized codes are reported through `console` and ignored; they
    /// never wedge the machine.
    pub fn pump<F: FnMut(String)>(&mut self, mut console: F) {
        while let Ok(note) = self.rx.try_recv() {
            match note.code {
                NotificationCode::SearchFinished | NotificationCode::SearchError => {
                    if self.state != ScanState::Scanning {
                        debug!(?note, state = ?self.state, "search notification outside scan");
                        continue;
                    }
                    if note.code == NotificationCode::SearchError {
                        console("Search ended with a driver error".to_string());
                    }
                    // Either outcome moves to Connecting: the loop connects
                    // to whatever the snapshot holds, even nothing.
                    self.snapshot = match self.driver.device_list() {
                        Ok(devices) => devices,
                        Err(err) => {
                            warn!(%err, "could not read vendor device list");
                            console(format!("Could not read device list: {err}"));
                            Vec::new()
                        }
                    };
                    self.attempted.clear();
                    self.attempt_order.clear();
                    self.state = ScanState::Connecting;
                }
                NotificationCode::ConnectConnected => {
                    if self.state == ScanState::Connecting {
                        self.connected += 1;
                    } else {
                        debug!(?note, state = ?self.state, "connect notification outside pass");
                    }
                }
                NotificationCode::ConnectFinished => {
                    if self.state == ScanState::Connecting {
                        self.state = ScanState::Finished;
                    } else {
                        debug!(?note, state = ?self.state, "connect notification outside pass");
                    }
                }
                NotificationCode::ConnectError => {
                    console(format!("Connect attempt failed (param {})", note.param));
                }
                NotificationCode::SearchStarting
                | NotificationCode::SearchFound
                | NotificationCode::ConnectStarting
                | NotificationCode::ConnectionChanged => {
                    debug!(?note, "vendor notification");
                }
                NotificationCode::Unknown(raw) => {
                    console(format!(
                        "Ignoring unknown vendor notification {raw:#010x} (param {})",
                        note.param
                    ));
                }
            }
        }
    }

    /// Kick off a new search pass. Valid from `Idle`.
    pub fn start_search(&mut self) -> Result<(), BackendError> {
        self.driver.start_searching()?;
        self.state = ScanState::Scanning;
        Ok(())
    }

    /// Record that a connect is about to be issued for `device`. Returns
    /// false when the device was already attempted this pass.
    pub fn claim_attempt(&mut self, device: &Device) -> bool {
        if self.attempted.insert(device.address) {
            self.attempt_order.push(device.clone());
            true
        } else {
            false
        }
    }

    /// Set the auto-reply passphrase and fire a connect for the device.
    pub fn start_connecting(
        &mut self,
        device: &Device,
        passkey: &Passkey,
    ) -> Result<(), BackendError> {
        self.driver.set_passkey(device, passkey)?;
        self.driver.start_connecting(device)
    }

    pub fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError> {
        self.driver.remove_pairing(device)
    }

    /// Close out a pass that issued no connect attempts. Nothing will post a
    /// connect-finished notification for such a pass, so waiting for one
    /// would wedge the machine.
    pub fn finish_pass(&mut self) {
        self.state = ScanState::Finished;
    }

    /// Consume the connect counter and the attempted devices, re-arming the
    /// machine to `Idle` for the next pass. Only meaningful in `Finished`.
    pub fn take_connected(&mut self) -> (u32, Vec<Device>) {
        let n = self.connected;
        self.connected = 0;
        self.state = ScanState::Idle;
        self.attempted.clear();
        (n, std::mem::take(&mut self.attempt_order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RadioId;

    struct FakeDriver {
        devices: Vec<Device>,
    }

    impl VendorDriver for FakeDriver {
        fn adapter(&mut self) -> Result<Option<Radio>, BackendError> {
            Ok(Some(Radio {
                id: RadioId(0),
                name: "vendor adapter".to_string(),
                address: BtAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            }))
        }

        fn start_searching(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        fn device_list(&mut self) -> Result<Vec<Device>, BackendError> {
            Ok(self.devices.clone())
        }

        fn set_passkey(&mut self, _: &Device, _: &Passkey) -> Result<(), BackendError> {
            Ok(())
        }

        fn start_connecting(&mut self, _: &Device) -> Result<(), BackendError> {
            Ok(())
        }

        fn remove_pairing(&mut self, _: &Device) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn device(name: &str, last_byte: u8) -> Device {
        Device {
            name: name.to_string(),
            address: BtAddress([last_byte, 0, 0, 0, 0, 0]),
            remembered: false,
            connected: false,
            class_of_device: 0x0025_04,
        }
    }

    fn backend_with(devices: Vec<Device>) -> VendorBackend {
        VendorBackend::new(Box::new(FakeDriver { devices })).unwrap()
    }

    #[test]
    fn search_then_connects_reach_finished_with_counter() {
        let mut backend = backend_with(vec![device("Nintendo RVL-CNT-01", 1)]);
        let tx = backend.notification_sender();

        backend.start_search().unwrap();
        assert_eq!(backend.state(), ScanState::Scanning);

        // Unknown codes interleaved anywhere must not disturb the machine.
        tx.send(Notification::from_raw(0x1100_0019, 2)).unwrap();
        tx.send(Notification::from_raw(NM_SEARCH_FINISHED, 0)).unwrap();
        tx.send(Notification::from_raw(0xDEAD_BEEF, 7)).unwrap();
        tx.send(Notification::from_raw(NM_CONNECT_CONNECTED, 0)).unwrap();
        tx.send(Notification::from_raw(NM_CONNECT_CONNECTED, 0)).unwrap();
        tx.send(Notification::from_raw(0x1100_0019, 0)).unwrap();
        tx.send(Notification::from_raw(NM_CONNECT_CONNECTED, 0)).unwrap();
        tx.send(Notification::from_raw(NM_CONNECT_FINISHED, 0)).unwrap();

        let mut lines = Vec::new();
        backend.pump(|line| lines.push(line));

        assert_eq!(backend.state(), ScanState::Finished);
        let (connected, _) = backend.take_connected();
        assert_eq!(connected, 3);
        assert_eq!(backend.state(), ScanState::Idle);
        // Each unknown code was surfaced, not swallowed silently.
        assert_eq!(
            lines.iter().filter(|l| l.contains("unknown")).count(),
            3
        );
    }

    #[test]
    fn search_error_still_advances_to_connecting() {
        let mut backend = backend_with(vec![]);
        let tx = backend.notification_sender();

        backend.start_search().unwrap();
        tx.send(Notification::from_raw(NM_SEARCH_ERROR, 1)).unwrap();
        backend.pump(|_| {});

        assert_eq!(backend.state(), ScanState::Connecting);
        assert!(backend.snapshot().is_empty());
    }

    #[test]
    fn connect_notifications_outside_a_pass_are_ignored() {
        let mut backend = backend_with(vec![]);
        let tx = backend.notification_sender();

        tx.send(Notification::from_raw(NM_CONNECT_CONNECTED, 0)).unwrap();
        tx.send(Notification::from_raw(NM_CONNECT_FINISHED, 0)).unwrap();
        backend.pump(|_| {});

        assert_eq!(backend.state(), ScanState::Idle);
        let (connected, _) = backend.take_connected();
        assert_eq!(connected, 0);
    }

    #[test]
    fn claim_attempt_is_once_per_device_per_pass() {
        let mut backend = backend_with(vec![]);
        let dev = device("Nintendo RVL-CNT-01", 9);

        assert!(backend.claim_attempt(&dev));
        assert!(!backend.claim_attempt(&dev));
        assert_eq!(backend.attempted_count(), 1);

        // Re-armed for the next pass after consumption.
        backend.finish_pass();
        let (_, attempted) = backend.take_connected();
        assert_eq!(attempted.len(), 1);
        assert!(backend.claim_attempt(&dev));
    }

    #[test]
    fn finish_pass_closes_an_empty_pass() {
        let mut backend = backend_with(vec![]);
        let tx = backend.notification_sender();

        backend.start_search().unwrap();
        tx.send(Notification::from_raw(NM_SEARCH_FINISHED, 0)).unwrap();
        backend.pump(|_| {});
        assert_eq!(backend.state(), ScanState::Connecting);

        backend.finish_pass();
        assert_eq!(backend.state(), ScanState::Finished);
        let (connected, attempted) = backend.take_connected();
        assert_eq!(connected, 0);
        assert!(attempted.is_empty());
    }
}
