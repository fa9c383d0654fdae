//! Host stack backend.
//!
//! Blocking bindings to the Windows Bluetooth API. Every operation returns
//! its outcome inline, so no state machine is needed; the pairing loop runs
//! one full enumerate/match/authenticate/enable sequence per radio per
//! iteration.

use crate::domain::models::{BtAddress, Device, Passkey, Radio, RadioId};
use crate::infrastructure::bluetooth::backend::{Backend, BackendError};
use std::mem::size_of;
use std::time::Duration;
use tracing::debug;
use windows::core::{GUID, PCWSTR};
use windows::Win32::Devices::Bluetooth::{
    BluetoothAuthenticateDevice, BluetoothEnumerateInstalledServices, BluetoothFindDeviceClose,
    BluetoothFindFirstDevice, BluetoothFindFirstRadio, BluetoothFindNextDevice,
    BluetoothFindNextRadio, BluetoothFindRadioClose, BluetoothGetRadioInfo, BluetoothRemoveDevice,
    BluetoothSetServiceState, BLUETOOTH_ADDRESS, BLUETOOTH_ADDRESS_0, BLUETOOTH_DEVICE_INFO,
    BLUETOOTH_DEVICE_SEARCH_PARAMS, BLUETOOTH_FIND_RADIO_PARAMS, BLUETOOTH_RADIO_INFO,
    BLUETOOTH_SERVICE_ENABLE,
};
use windows::Win32::Foundation::{CloseHandle, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, HANDLE};

/// HID service class, the control-channel service record the controller
/// needs enabled to keep the pairing across reboots.
const HID_SERVICE_CLASS: GUID = GUID::from_u128(0x00001124_0000_1000_8000_00805f9b34fb);

/// The driver needs a moment between authentication and the service calls.
const SERVICE_SETTLE: Duration = Duration::from_millis(100);

pub struct HostBackend {
    radios: Vec<HANDLE>,
    timeout_multiplier: u8,
}

impl HostBackend {
    /// `timeout_multiplier` is the inquiry length in multiples of 1.28 s.
    pub fn new(timeout_multiplier: u8) -> Self {
        Self {
            radios: Vec::new(),
            timeout_multiplier,
        }
    }

    fn radio_handle(&self, radio: &Radio) -> Result<HANDLE, BackendError> {
        self.radios
            .get(radio.id.0)
            .copied()
            .ok_or_else(|| BackendError::Enumeration(format!("stale radio id {:?}", radio.id)))
    }

    fn close_radios(&mut self) {
        for handle in self.radios.drain(..) {
            let _ = unsafe { CloseHandle(handle) };
        }
    }
}

impl Backend for HostBackend {
    fn label(&self) -> &'static str {
        "host"
    }

    fn enumerate_radios(&mut self) -> Result<Vec<Radio>, BackendError> {
        self.close_radios();

        let params = BLUETOOTH_FIND_RADIO_PARAMS {
            dwSize: size_of::<BLUETOOTH_FIND_RADIO_PARAMS>() as u32,
        };
        let mut handle = HANDLE::default();
        let find = unsafe { BluetoothFindFirstRadio(&params, &mut handle) }
            .map_err(|_| BackendError::NoRadioFound)?;
        self.radios.push(handle);

        loop {
            let mut next = HANDLE::default();
            match unsafe { BluetoothFindNextRadio(find, &mut next) } {
                Ok(()) => self.radios.push(next),
                Err(_) => break,
            }
        }
        let _ = unsafe { BluetoothFindRadioClose(find) };

        let mut radios = Vec::with_capacity(self.radios.len());
        for (index, handle) in self.radios.iter().enumerate() {
            let mut info = BLUETOOTH_RADIO_INFO {
                dwSize: size_of::<BLUETOOTH_RADIO_INFO>() as u32,
                ..Default::default()
            };
            let rc = unsafe { BluetoothGetRadioInfo(*handle, &mut info) };
            if rc != ERROR_SUCCESS.0 {
                debug!(rc, index, "BluetoothGetRadioInfo failed");
                continue;
            }
            radios.push(Radio {
                id: RadioId(index),
                name: from_wide(&info.szName),
                address: BtAddress(unsafe { info.address.Anonymous.rgBytes }),
            });
        }

        if radios.is_empty() {
            return Err(BackendError::NoRadioFound);
        }
        Ok(radios)
    }

    fn enumerate_devices(&mut self, radio: &Radio) -> Result<Vec<Device>, BackendError> {
        let handle = self.radio_handle(radio)?;

        let search = BLUETOOTH_DEVICE_SEARCH_PARAMS {
            dwSize: size_of::<BLUETOOTH_DEVICE_SEARCH_PARAMS>() as u32,
            fReturnAuthenticated: true.into(),
            fReturnRemembered: true.into(),
            fReturnUnknown: true.into(),
            fReturnConnected: true.into(),
            fIssueInquiry: true.into(),
            cTimeoutMultiplier: self.timeout_multiplier,
            hRadio: handle,
        };

        let mut info = BLUETOOTH_DEVICE_INFO {
            dwSize: size_of::<BLUETOOTH_DEVICE_INFO>() as u32,
            ..Default::default()
        };
        let find = match unsafe { BluetoothFindFirstDevice(&search, &mut info) } {
            Ok(find) => find,
            // An empty neighbourhood is a normal outcome, not an error.
            Err(err) if err.code() == ERROR_NO_MORE_ITEMS.to_hresult() => return Ok(Vec::new()),
            Err(err) => return Err(BackendError::Enumeration(err.to_string())),
        };

        let mut devices = vec![convert_device(&info)];
        loop {
            info = BLUETOOTH_DEVICE_INFO {
                dwSize: size_of::<BLUETOOTH_DEVICE_INFO>() as u32,
                ..Default::default()
            };
            match unsafe { BluetoothFindNextDevice(find, &mut info) } {
                Ok(()) => devices.push(convert_device(&info)),
                Err(_) => break,
            }
        }
        let _ = unsafe { BluetoothFindDeviceClose(find) };

        Ok(devices)
    }

    fn authenticate(
        &mut self,
        radio: &Radio,
        device: &Device,
        passkey: &Passkey,
    ) -> Result<(), BackendError> {
        let handle = self.radio_handle(radio)?;
        let mut info = device_info(device);

        // The API takes a UTF-16 passkey; the protocol's raw bytes are
        // widened as-is, not re-encoded.
        let pass: [u16; 6] = passkey.0.map(u16::from);
        let rc = unsafe {
            BluetoothAuthenticateDevice(
                None,
                Some(handle),
                &mut info,
                PCWSTR(pass.as_ptr()),
                pass.len() as u32,
            )
        };

        // An already-authenticated device answers ERROR_NO_MORE_ITEMS;
        // retrying is harmless, so both outcomes count as authenticated.
        if rc == ERROR_SUCCESS.0 || rc == ERROR_NO_MORE_ITEMS.0 {
            Ok(())
        } else {
            Err(BackendError::Authentication(win32_message(rc)))
        }
    }

    fn enable_control_service(
        &mut self,
        radio: &Radio,
        device: &Device,
    ) -> Result<(), BackendError> {
        let handle = self.radio_handle(radio)?;
        let info = device_info(device);

        // Without this enumeration the controller drops the pairing as soon
        // as it powers down.
        std::thread::sleep(SERVICE_SETTLE);
        let mut count: u32 = 16;
        let mut guids = [GUID::zeroed(); 16];
        let rc = unsafe {
            BluetoothEnumerateInstalledServices(Some(handle), &info, &mut count, guids.as_mut_ptr())
        };
        if rc != ERROR_SUCCESS.0 {
            return Err(BackendError::ServiceEnable(win32_message(rc)));
        }

        std::thread::sleep(SERVICE_SETTLE);
        let rc = unsafe {
            BluetoothSetServiceState(Some(handle), &info, &HID_SERVICE_CLASS, BLUETOOTH_SERVICE_ENABLE)
        };
        if rc != ERROR_SUCCESS.0 {
            return Err(BackendError::ServiceEnable(win32_message(rc)));
        }
        Ok(())
    }

    fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError> {
        let address = BLUETOOTH_ADDRESS {
            Anonymous: BLUETOOTH_ADDRESS_0 {
                rgBytes: device.address.0,
            },
        };
        let rc = unsafe { BluetoothRemoveDevice(&address) };
        if rc != ERROR_SUCCESS.0 {
            return Err(BackendError::Removal(win32_message(rc)));
        }
        Ok(())
    }
}

impl Drop for HostBackend {
    fn drop(&mut self) {
        self.close_radios();
    }
}

fn convert_device(info: &BLUETOOTH_DEVICE_INFO) -> Device {
    Device {
        name: from_wide(&info.szName),
        address: BtAddress(unsafe { info.Address.Anonymous.rgBytes }),
        remembered: info.fRemembered.as_bool(),
        connected: info.fConnected.as_bool(),
        class_of_device: info.ulClassofDevice,
    }
}

fn device_info(device: &Device) -> BLUETOOTH_DEVICE_INFO {
    BLUETOOTH_DEVICE_INFO {
        dwSize: size_of::<BLUETOOTH_DEVICE_INFO>() as u32,
        Address: BLUETOOTH_ADDRESS {
            Anonymous: BLUETOOTH_ADDRESS_0 {
                rgBytes: device.address.0,
            },
        },
        ..Default::default()
    }
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn win32_message(rc: u32) -> String {
    std::io::Error::from_raw_os_error(rc as i32).to_string()
}
