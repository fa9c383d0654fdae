//! The pairing control loop.
//!
//! One thread drives both backends: the host backend is polled with
//! blocking calls, the vendor backend is advanced through its notification
//! state machine, one step per iteration. Cancellation is cooperative; the
//! flag is observed at the top of each iteration and in-flight driver calls
//! are never aborted, only not re-issued.

use crate::domain::identity::is_controller_device;
use crate::domain::models::{MessageSeverity, PairingReport, PairingStatus, Passkey, Radio};
use crate::infrastructure::bluetooth::backend::{Backend, BackendError};
use crate::infrastructure::bluetooth::vendor::{ScanState, VendorBackend};
use crate::pairing::listener::PairingListener;
use crate::pairing::session::PairingSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sleep between loop iterations. Bounds the polling rate against both
    /// drivers' internal timeouts; not precision timing.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Cancels a running session. Cloneable and safe to signal from any thread,
/// including from inside a listener callback.
#[derive(Clone)]
pub struct PairingHandle {
    cancel: Arc<AtomicBool>,
}

impl PairingHandle {
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

pub struct PairingEngine {
    host: Option<Box<dyn Backend + Send>>,
    vendor: Option<VendorBackend>,
    listener: Arc<dyn PairingListener>,
    config: EngineConfig,
    cancel: Arc<AtomicBool>,
}

impl PairingEngine {
    /// Either backend may be absent; the session fails only when neither
    /// contributes a radio.
    pub fn new(
        host: Option<Box<dyn Backend + Send>>,
        vendor: Option<VendorBackend>,
        listener: Arc<dyn PairingListener>,
        config: EngineConfig,
    ) -> Self {
        Self {
            host,
            vendor,
            listener,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> PairingHandle {
        PairingHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Run one pairing (or removal) session to completion. Blocks the
    /// calling thread; give it a dedicated one. All outcomes are delivered
    /// through the listener; the returned report is the final one.
    pub fn run(&mut self, remove_mode: bool, stop_at: usize) -> PairingReport {
        self.cancel.store(false, Ordering::SeqCst);
        let listener = Arc::clone(&self.listener);
        let mut session = PairingSession::new(remove_mode, stop_at);

        info!(remove_mode, stop_at, "pairing session started");
        listener.on_started();
        listener.on_console_line("Enumerating radios...");

        let host_radios = match self.host.as_mut() {
            Some(backend) => match backend.enumerate_radios() {
                Ok(radios) => radios,
                Err(BackendError::NoRadioFound) => {
                    listener.on_console_line("Host stack reports no radios");
                    Vec::new()
                }
                Err(err) => {
                    listener.on_console_line(&format!("Host radio enumeration failed: {err}"));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        listener.on_console_line(&format!("Found {} host radios", host_radios.len()));
        for (index, radio) in host_radios.iter().enumerate() {
            listener.on_console_line(&format!("Radio {index}: {} {}", radio.name, radio.address));
        }
        if let Some(vendor) = self.vendor.as_ref() {
            let adapter = vendor.adapter();
            listener.on_console_line(&format!("Vendor radio: {} {}", adapter.name, adapter.address));
        }

        if host_radios.is_empty() && self.vendor.is_none() {
            listener.on_message("Could not find any bluetooth radios", MessageSeverity::Error);
            let report = session.report(PairingStatus::Failed);
            listener.on_progress(&report);
            return report;
        }

        // Remove mode makes one pass over each backend and stops. The host
        // pass completes within an iteration; the vendor pass spans several
        // because its scan is asynchronous.
        let mut vendor_pass_done = self.vendor.is_none();
        let mut cancelled = false;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }

            if let Some(vendor) = self.vendor.as_mut() {
                Self::service_vendor(vendor, &listener, &mut session, &mut vendor_pass_done);
            }

            if !session.target_reached() {
                if let Some(backend) = self.host.as_mut() {
                    Self::service_host(backend.as_mut(), &host_radios, &listener, &mut session);
                }
            }

            if session.target_reached() {
                break;
            }
            if remove_mode && vendor_pass_done {
                break;
            }

            thread::sleep(self.config.poll_interval);
        }

        listener.on_console_line("=============================================");
        listener.on_console_line(&format!(
            "{} devices {}",
            session.paired(),
            if remove_mode { "removed" } else { "paired" }
        ));

        let status = if cancelled {
            PairingStatus::Cancelled
        } else {
            PairingStatus::Done
        };
        info!(paired = session.paired(), ?status, "pairing session finished");
        let report = session.report(status);
        listener.on_progress(&report);
        report
    }

    /// One state-machine step for the vendor backend.
    fn service_vendor(
        vendor: &mut VendorBackend,
        listener: &Arc<dyn PairingListener>,
        session: &mut PairingSession,
        pass_done: &mut bool,
    ) {
        vendor.pump(|line| listener.on_console_line(&line));

        match vendor.state() {
            ScanState::Idle => {
                if session.target_reached() || (session.remove_mode() && *pass_done) {
                    return;
                }
                match vendor.start_search() {
                    Ok(()) => listener.on_console_line("Vendor scan started"),
                    Err(err) => {
                        listener.on_console_line(&format!("Vendor scan failed to start: {err}"));
                    }
                }
            }
            ScanState::Scanning => {
                // Waiting for the search-finished notification.
            }
            ScanState::Connecting => {
                let passkey = Passkey::from_radio(vendor.adapter());
                let snapshot = vendor.snapshot().to_vec();

                if session.remove_mode() {
                    for device in snapshot.iter().filter(|d| is_controller_device(&d.name)) {
                        if !device.remembered {
                            continue;
                        }
                        listener.on_message("Removing old Wiimote", MessageSeverity::Success);
                        match vendor.remove_pairing(device) {
                            Ok(()) => {
                                session.record(&device.name);
                                listener.on_progress(&session.report(PairingStatus::Running));
                            }
                            Err(err) => {
                                listener.on_message("Could not remove device", MessageSeverity::Error);
                                listener.on_console_line(&err.to_string());
                            }
                        }
                    }
                    // A removal pass issues no connects; close it out.
                    vendor.finish_pass();
                } else {
                    for device in snapshot.iter().filter(|d| is_controller_device(&d.name)) {
                        if device.remembered || !vendor.claim_attempt(device) {
                            continue;
                        }
                        listener.on_message("Found a new Wiimote", MessageSeverity::Success);
                        if let Err(err) = vendor.start_connecting(device, &passkey) {
                            listener.on_message("Could not start connecting", MessageSeverity::Error);
                            listener.on_console_line(&err.to_string());
                        }
                    }
                    if vendor.attempted_count() == 0 {
                        // Nothing matched; no connect-finished notification
                        // will ever close this pass for us.
                        vendor.finish_pass();
                    }
                }
            }
            ScanState::Finished => {
                let (connected, attempted) = vendor.take_connected();
                let fold = (connected as usize).min(session.remaining());
                for device in attempted.into_iter().take(fold) {
                    listener.on_message("Paired", MessageSeverity::Success);
                    session.record(&device.name);
                    listener.on_progress(&session.report(PairingStatus::Running));
                }
                if session.remove_mode() {
                    *pass_done = true;
                }
            }
        }
    }

    /// One full enumerate/match/pair pass over the host backend's radios.
    fn service_host(
        backend: &mut dyn Backend,
        radios: &[Radio],
        listener: &Arc<dyn PairingListener>,
        session: &mut PairingSession,
    ) {
        for radio in radios {
            listener.on_console_line("Scanning...");
            if session.remove_mode() {
                listener.on_message("Removing old connections...", MessageSeverity::Info);
            } else {
                listener.on_message("Scanning...", MessageSeverity::Info);
            }

            let devices = match backend.enumerate_devices(radio) {
                Ok(devices) => devices,
                Err(err) => {
                    listener.on_message(
                        "Could not enumerate bluetooth devices",
                        MessageSeverity::Error,
                    );
                    listener.on_console_line(&err.to_string());
                    // The inquiry is repeated from scratch next pass.
                    continue;
                }
            };
            if devices.is_empty() {
                listener.on_console_line("No bluetooth devices found.");
                continue;
            }

            let passkey = Passkey::from_radio(radio);
            for device in &devices {
                listener.on_console_line(&format!("Found: {}", device.name));
                if !is_controller_device(&device.name) {
                    continue;
                }

                if session.remove_mode() {
                    if !device.remembered {
                        continue;
                    }
                    listener.on_message("Removing old Wiimote", MessageSeverity::Success);
                    match backend.remove_pairing(device) {
                        Ok(()) => {
                            session.record(&device.name);
                            listener.on_progress(&session.report(PairingStatus::Running));
                        }
                        Err(err) => {
                            listener.on_message("Could not remove device", MessageSeverity::Error);
                            listener.on_console_line(&err.to_string());
                        }
                    }
                    if session.target_reached() {
                        return;
                    }
                    continue;
                }

                if device.remembered {
                    // Already paired with us; nothing to do.
                    continue;
                }

                listener.on_message("Found a new Wiimote", MessageSeverity::Success);
                if let Err(err) = backend.authenticate(radio, device, &passkey) {
                    listener.on_message("Could not authenticate", MessageSeverity::Error);
                    listener.on_console_line(&err.to_string());
                    continue;
                }
                listener.on_message("Authenticated", MessageSeverity::Success);

                // No partial credit: an authenticated device whose control
                // service is not enabled does not count as paired.
                if let Err(err) = backend.enable_control_service(radio, device) {
                    listener.on_message(
                        "Could not permanently pair the Wiimote",
                        MessageSeverity::Error,
                    );
                    listener.on_console_line(&err.to_string());
                    continue;
                }
                listener.on_message("Paired", MessageSeverity::Success);

                session.record(&device.name);
                listener.on_progress(&session.report(PairingStatus::Running));
                if session.target_reached() {
                    return;
                }
            }
        }
    }
}
