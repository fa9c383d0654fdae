//! End-to-end tests of the pairing control loop against scripted backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wiipair::domain::models::{
    BtAddress, Device, MessageSeverity, PairingReport, PairingStatus, Passkey, Radio, RadioId,
};
use wiipair::infrastructure::bluetooth::{
    Backend, BackendError, Notification, NotificationCode, VendorBackend, VendorDriver,
};
use wiipair::pairing::{EngineConfig, PairingEngine, PairingHandle, PairingListener};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    EnumerateDevices(usize),
    Authenticate(String),
    EnableService(String),
    RemovePairing(String),
}

#[derive(Clone, Default)]
struct OpLog(Arc<Mutex<Vec<Op>>>);

impl OpLog {
    fn push(&self, op: Op) {
        self.0.lock().unwrap().push(op);
    }

    fn snapshot(&self) -> Vec<Op> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, f: impl Fn(&Op) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|op| f(op)).count()
    }
}

struct ScriptedBackend {
    radios: Vec<Radio>,
    devices: Vec<Device>,
    ops: OpLog,
    fail_service_enable: bool,
}

impl ScriptedBackend {
    fn new(radios: Vec<Radio>, devices: Vec<Device>, ops: OpLog) -> Self {
        Self {
            radios,
            devices,
            ops,
            fail_service_enable: false,
        }
    }
}

impl Backend for ScriptedBackend {
    fn label(&self) -> &'static str {
        "scripted"
    }

    fn enumerate_radios(&mut self) -> Result<Vec<Radio>, BackendError> {
        if self.radios.is_empty() {
            return Err(BackendError::NoRadioFound);
        }
        Ok(self.radios.clone())
    }

    fn enumerate_devices(&mut self, radio: &Radio) -> Result<Vec<Device>, BackendError> {
        self.ops.push(Op::EnumerateDevices(radio.id.0));
        Ok(self.devices.clone())
    }

    fn authenticate(
        &mut self,
        radio: &Radio,
        device: &Device,
        passkey: &Passkey,
    ) -> Result<(), BackendError> {
        // The protocol fixes the passkey to the initiating radio's address.
        assert_eq!(passkey.0, radio.address.0);
        self.ops.push(Op::Authenticate(device.name.clone()));
        Ok(())
    }

    fn enable_control_service(
        &mut self,
        _radio: &Radio,
        device: &Device,
    ) -> Result<(), BackendError> {
        self.ops.push(Op::EnableService(device.name.clone()));
        if self.fail_service_enable {
            return Err(BackendError::ServiceEnable("scripted failure".to_string()));
        }
        // The driver now remembers the device; later inquiries see it as such.
        for known in &mut self.devices {
            if known.address == device.address {
                known.remembered = true;
            }
        }
        Ok(())
    }

    fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError> {
        self.ops.push(Op::RemovePairing(device.name.clone()));
        self.devices.retain(|known| known.address != device.address);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingListener {
    reports: Mutex<Vec<PairingReport>>,
    messages: Mutex<Vec<(String, MessageSeverity)>>,
    stop_on: Mutex<Option<(String, PairingHandle)>>,
}

impl RecordingListener {
    fn set_stop_on(&self, needle: &str, handle: PairingHandle) {
        *self.stop_on.lock().unwrap() = Some((needle.to_string(), handle));
    }

    fn running_reports(&self) -> Vec<PairingReport> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == PairingStatus::Running)
            .cloned()
            .collect()
    }
}

impl PairingListener for RecordingListener {
    fn on_started(&self) {}

    fn on_console_line(&self, _line: &str) {}

    fn on_message(&self, message: &str, severity: MessageSeverity) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
        if let Some((needle, handle)) = &*self.stop_on.lock().unwrap() {
            if message.contains(needle.as_str()) {
                handle.stop();
            }
        }
    }

    fn on_progress(&self, report: &PairingReport) {
        // Holds at every emission, for every session.
        assert_eq!(report.paired_count, report.paired_names.len());
        self.reports.lock().unwrap().push(report.clone());
    }
}

fn radio(index: usize, last_byte: u8) -> Radio {
    Radio {
        id: RadioId(index),
        name: format!("radio {index}"),
        address: BtAddress([0x10, 0x20, 0x30, 0x40, 0x50, last_byte]),
    }
}

fn wiimote(last_byte: u8, remembered: bool) -> Device {
    Device {
        name: "Nintendo RVL-CNT-01".to_string(),
        address: BtAddress([last_byte, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
        remembered,
        connected: false,
        class_of_device: 0x0025_04,
    }
}

fn stranger() -> Device {
    Device {
        name: "Plantronics Voyager".to_string(),
        address: BtAddress([0x99, 0x99, 0x99, 0x99, 0x99, 0x99]),
        remembered: false,
        connected: false,
        class_of_device: 0x0024_04,
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::ZERO,
    }
}

#[test]
fn pairs_one_controller_and_stops() {
    let ops = OpLog::default();
    let backend = ScriptedBackend::new(
        vec![radio(0, 1), radio(1, 2)],
        vec![stranger(), wiimote(0x01, false)],
        ops.clone(),
    );
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    let report = engine.run(false, 1);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 1);
    assert_eq!(report.paired_names, vec!["Nintendo RVL-CNT-01"]);

    assert_eq!(ops.count(|op| matches!(op, Op::Authenticate(_))), 1);
    assert_eq!(ops.count(|op| matches!(op, Op::EnableService(_))), 1);
    // Target reached on the first radio; the second is never scanned.
    assert_eq!(
        ops.count(|op| matches!(op, Op::EnumerateDevices(_))),
        1
    );

    let running = listener.running_reports();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].paired_count, 1);
    assert!(!running[0].remove_mode);
}

#[test]
fn cancellation_prevents_further_operations() {
    let ops = OpLog::default();
    let backend = ScriptedBackend::new(vec![radio(0, 1)], vec![], ops.clone());
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    // Without cancellation this session has no target and would loop forever.
    listener.set_stop_on("Scanning...", engine.handle());
    let report = engine.run(false, 0);

    assert_eq!(report.status, PairingStatus::Cancelled);
    assert_eq!(report.paired_count, 0);
    // The pass in flight when the flag was raised completed; nothing was
    // issued after the loop observed it.
    assert_eq!(ops.snapshot(), vec![Op::EnumerateDevices(0)]);
}

#[test]
fn remove_mode_never_touches_unremembered_devices() {
    let ops = OpLog::default();
    let backend = ScriptedBackend::new(
        vec![radio(0, 1)],
        vec![wiimote(0x01, false), stranger()],
        ops.clone(),
    );
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    let report = engine.run(true, 10);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 0);
    assert_eq!(ops.count(|op| matches!(op, Op::RemovePairing(_))), 0);
}

#[test]
fn remove_mode_forgets_remembered_controllers_in_one_pass() {
    let ops = OpLog::default();
    let backend = ScriptedBackend::new(
        vec![radio(0, 1)],
        vec![wiimote(0x01, true), wiimote(0x02, true)],
        ops.clone(),
    );
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    let report = engine.run(true, 10);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 2);
    assert!(report.remove_mode);
    assert_eq!(ops.count(|op| matches!(op, Op::RemovePairing(_))), 2);
    assert_eq!(listener.running_reports().len(), 2);
    // One pass: a remove session never loops waiting for new devices.
    assert_eq!(ops.count(|op| matches!(op, Op::EnumerateDevices(_))), 1);
}

#[test]
fn failed_service_enable_gets_no_credit() {
    let ops = OpLog::default();
    let mut backend = ScriptedBackend::new(
        vec![radio(0, 1)],
        vec![wiimote(0x01, false)],
        ops.clone(),
    );
    backend.fail_service_enable = true;
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    listener.set_stop_on("Could not permanently pair", engine.handle());
    let report = engine.run(false, 1);

    assert_eq!(report.status, PairingStatus::Cancelled);
    assert_eq!(report.paired_count, 0);
    assert!(listener.running_reports().is_empty());
    // Authentication succeeded, yet the device was not counted.
    assert!(ops.count(|op| matches!(op, Op::Authenticate(_))) >= 1);
}

#[test]
fn no_radio_on_any_backend_fails_immediately() {
    let ops = OpLog::default();
    let backend = ScriptedBackend::new(vec![], vec![], ops.clone());
    let listener = Arc::new(RecordingListener::default());

    let mut engine = PairingEngine::new(
        Some(Box::new(backend)),
        None,
        Arc::clone(&listener) as Arc<dyn PairingListener>,
        config(),
    );
    let report = engine.run(false, 1);

    assert_eq!(report.status, PairingStatus::Failed);
    assert_eq!(report.paired_count, 0);
    assert_eq!(ops.count(|op| matches!(op, Op::EnumerateDevices(_))), 0);
}

// ---------------------------------------------------------------------------
// Vendor backend flow
// ---------------------------------------------------------------------------

type SenderSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Notification>>>>;

/// Scripted vendor driver: completes every search instantly and reports one
/// successful connect per issued attempt, closing the pass after the last.
struct ChannelDriver {
    devices: Vec<Device>,
    sender: SenderSlot,
    connects: Arc<Mutex<Vec<String>>>,
}

impl ChannelDriver {
    fn send(&self, code: NotificationCode) {
        if let Some(tx) = &*self.sender.lock().unwrap() {
            let _ = tx.send(Notification { code, param: 0 });
        }
    }
}

impl VendorDriver for ChannelDriver {
    fn adapter(&mut self) -> Result<Option<Radio>, BackendError> {
        Ok(Some(Radio {
            id: RadioId(0),
            name: "vendor adapter".to_string(),
            address: BtAddress([0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]),
        }))
    }

    fn start_searching(&mut self) -> Result<(), BackendError> {
        self.send(NotificationCode::SearchFinished);
        Ok(())
    }

    fn device_list(&mut self) -> Result<Vec<Device>, BackendError> {
        Ok(self.devices.clone())
    }

    fn set_passkey(&mut self, _device: &Device, passkey: &Passkey) -> Result<(), BackendError> {
        assert_eq!(passkey.0, [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
        Ok(())
    }

    fn start_connecting(&mut self, device: &Device) -> Result<(), BackendError> {
        let issued = {
            let mut connects = self.connects.lock().unwrap();
            connects.push(device.name.clone());
            connects.len()
        };
        self.send(NotificationCode::ConnectConnected);
        let matched = self
            .devices
            .iter()
            .filter(|d| d.name.starts_with("Nintendo"))
            .count();
        if issued == matched {
            self.send(NotificationCode::ConnectFinished);
        }
        Ok(())
    }

    fn remove_pairing(&mut self, _device: &Device) -> Result<(), BackendError> {
        Ok(())
    }
}

fn vendor_engine(
    devices: Vec<Device>,
    listener: Arc<RecordingListener>,
) -> (PairingEngine, Arc<Mutex<Vec<String>>>) {
    let sender: SenderSlot = Arc::default();
    let connects = Arc::new(Mutex::new(Vec::new()));
    let driver = ChannelDriver {
        devices,
        sender: Arc::clone(&sender),
        connects: Arc::clone(&connects),
    };
    let vendor = VendorBackend::new(Box::new(driver)).unwrap();
    *sender.lock().unwrap() = Some(vendor.notification_sender());

    let engine = PairingEngine::new(
        None,
        Some(vendor),
        listener as Arc<dyn PairingListener>,
        config(),
    );
    (engine, connects)
}

#[test]
fn vendor_flow_pairs_through_notifications() {
    let listener = Arc::new(RecordingListener::default());
    let (mut engine, connects) = vendor_engine(
        vec![stranger(), wiimote(0x01, false)],
        Arc::clone(&listener),
    );
    let report = engine.run(false, 1);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 1);
    assert_eq!(report.paired_names, vec!["Nintendo RVL-CNT-01"]);
    // Exactly one connect was issued, for the matched device only.
    assert_eq!(*connects.lock().unwrap(), vec!["Nintendo RVL-CNT-01"]);
    assert_eq!(listener.running_reports().len(), 1);
}

#[test]
fn vendor_fold_never_exceeds_the_target() {
    let listener = Arc::new(RecordingListener::default());
    let (mut engine, connects) = vendor_engine(
        vec![wiimote(0x01, false), wiimote(0x02, false), wiimote(0x03, false)],
        Arc::clone(&listener),
    );
    let report = engine.run(false, 2);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 2);
    assert_eq!(connects.lock().unwrap().len(), 3);
    assert_eq!(listener.running_reports().len(), 2);
}

#[test]
fn vendor_remove_pass_terminates_on_empty_scan() {
    let listener = Arc::new(RecordingListener::default());
    let (mut engine, _connects) = vendor_engine(vec![], Arc::clone(&listener));
    let report = engine.run(true, 10);

    assert_eq!(report.status, PairingStatus::Done);
    assert_eq!(report.paired_count, 0);
    assert!(report.remove_mode);
}
