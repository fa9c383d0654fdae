//! Vendor stack bindings.
//!
//! The vendor Bluetooth API ships as `TosBtAPI.dll` with cdecl entry points
//! and reports outcomes by posting `(code, param)` words to a window the
//! caller supplies. [`TosDriver`] binds the entry points it needs into an
//! owned function table at construction time; the host's message dispatch
//! (out of scope here) forwards the posted words into the engine's
//! notification channel.

use crate::domain::models::{BtAddress, Device, Passkey, Radio, RadioId};
use crate::infrastructure::bluetooth::backend::BackendError;
use crate::infrastructure::bluetooth::vendor::VendorDriver;
use std::ffi::c_char;
use std::ffi::c_void;
use tracing::warn;
use windows::core::{s, w, BOOL, PCSTR};
use windows::Win32::Foundation::{FreeLibrary, HMODULE, HWND, LPARAM};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

// On-the-wire layouts, byte-packed the way the DLL fills them.

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct RawVendorDevice {
    status: u32,
    address: [u8; 6],
    class_of_device: u32,
    name: [u8; 248],
    reserved: u16,
}

#[repr(C, packed)]
struct RawDeviceList {
    count: u32,
    devices: [RawVendorDevice; 7],
}

#[repr(C, packed)]
struct RawAdapterInfo {
    address: [u8; 6],
    lmp_version: u8,
    lmp_subversion: u16,
    hci_version: u8,
    manufacturer: u16,
    hci_revision: u16,
    reserved: [u8; 1040],
}

type BtOpenApi = unsafe extern "cdecl" fn(HWND, *const c_char, *mut i32) -> BOOL;
type BtCloseApi = unsafe extern "cdecl" fn(*mut i32) -> BOOL;
type BtGetLocalInfo = unsafe extern "cdecl" fn(*mut RawAdapterInfo, *mut i32) -> BOOL;
type BtNotifyEvent = unsafe extern "cdecl" fn(u32, *mut i32, HWND, u32) -> BOOL;
type BtDiscover =
    unsafe extern "cdecl" fn(*mut *mut RawDeviceList, u32, *mut i32, HWND, u32, LPARAM) -> BOOL;
type BtConnectHid = unsafe extern "cdecl" fn(*const u8, *mut i32, HWND, u32, LPARAM) -> BOOL;
type BtSetPin = unsafe extern "cdecl" fn(*const u8, *const c_char, i32, *mut i32) -> BOOL;
type BtClearPin = unsafe extern "cdecl" fn(*const u8, *mut i32) -> BOOL;
type BtMemFree = unsafe extern "cdecl" fn(*mut c_void) -> BOOL;

/// The bound entry points. One table per driver instance; nothing
/// process-wide.
struct VendorApi {
    module: HMODULE,
    open: BtOpenApi,
    close: BtCloseApi,
    local_info: BtGetLocalInfo,
    notify: BtNotifyEvent,
    discover: BtDiscover,
    connect_hid: BtConnectHid,
    set_pin: BtSetPin,
    clear_pin: BtClearPin,
    mem_free: BtMemFree,
}

impl VendorApi {
    unsafe fn bind(module: HMODULE) -> Result<Self, BackendError> {
        Ok(Self {
            module,
            open: resolve(module, s!("BtOpenAPI"), "BtOpenAPI")?,
            close: resolve(module, s!("BtCloseAPI"), "BtCloseAPI")?,
            local_info: resolve(module, s!("BtGetLocalInfo2"), "BtGetLocalInfo2")?,
            notify: resolve(module, s!("BtNotifyEvent"), "BtNotifyEvent")?,
            discover: resolve(module, s!("BtDiscoverRemoteDevice2"), "BtDiscoverRemoteDevice2")?,
            connect_hid: resolve(module, s!("BtConnectHID"), "BtConnectHID")?,
            set_pin: resolve(module, s!("BtSetAutoReplyPinCode"), "BtSetAutoReplyPinCode")?,
            clear_pin: resolve(module, s!("BtClearAutoReplyPinCode"), "BtClearAutoReplyPinCode")?,
            mem_free: resolve(module, s!("BtMemFree"), "BtMemFree")?,
        })
    }
}

unsafe fn resolve<T>(module: HMODULE, symbol: PCSTR, name: &str) -> Result<T, BackendError> {
    let addr = GetProcAddress(module, symbol)
        .ok_or_else(|| BackendError::Driver(format!("missing entry point {name}")))?;
    // SAFETY: T is always one of the typed entry-point aliases above.
    Ok(std::mem::transmute_copy(&addr))
}

pub struct TosDriver {
    api: VendorApi,
    hwnd: HWND,
    message: u32,
    device_list: *mut RawDeviceList,
}

// SAFETY: the driver is owned by the engine and only called from the
// control-loop thread; the window handle and list pointer are never shared.
unsafe impl Send for TosDriver {}

impl TosDriver {
    /// Bind the vendor DLL and open the API session. `hwnd`/`message` name
    /// the window and message number the driver posts notifications to.
    pub fn new(hwnd: HWND, message: u32) -> Result<Self, BackendError> {
        let module = unsafe { LoadLibraryW(w!("TosBtAPI.dll")) }
            .map_err(|err| BackendError::Driver(format!("TosBtAPI.dll not available: {err}")))?;
        let api = unsafe { VendorApi::bind(module)? };

        let mut error = 0i32;
        let ok = unsafe { (api.open)(hwnd, c"wiipair".as_ptr(), &mut error) };
        if !ok.as_bool() {
            return Err(BackendError::Driver(format!("BtOpenAPI failed ({error})")));
        }

        // Subscribe to the full event mask; search and connect outcomes
        // arrive as posted messages.
        let mut error = 0i32;
        let ok = unsafe { (api.notify)(0xFFFF_FFFF, &mut error, hwnd, message) };
        if !ok.as_bool() {
            warn!(error, "BtNotifyEvent failed; vendor notifications will not arrive");
        }

        Ok(Self {
            api,
            hwnd,
            message,
            device_list: std::ptr::null_mut(),
        })
    }
}

impl VendorDriver for TosDriver {
    fn adapter(&mut self) -> Result<Option<Radio>, BackendError> {
        let mut info: RawAdapterInfo = unsafe { std::mem::zeroed() };
        let mut error = 0i32;
        let ok = unsafe { (self.api.local_info)(&mut info, &mut error) };
        if !ok.as_bool() {
            // No adapter behind the vendor stack.
            return Ok(None);
        }
        let address = BtAddress(info.address);
        Ok(Some(Radio {
            id: RadioId(0),
            name: format!("vendor adapter {address}"),
            address,
        }))
    }

    fn start_searching(&mut self) -> Result<(), BackendError> {
        let mut error = 0i32;
        let ok = unsafe {
            (self.api.discover)(
                &mut self.device_list,
                0,
                &mut error,
                self.hwnd,
                self.message,
                LPARAM(0),
            )
        };
        if !ok.as_bool() {
            return Err(BackendError::Enumeration(format!(
                "BtDiscoverRemoteDevice2 failed ({error})"
            )));
        }
        Ok(())
    }

    fn device_list(&mut self) -> Result<Vec<Device>, BackendError> {
        if self.device_list.is_null() {
            return Ok(Vec::new());
        }
        // The DLL fills the list byte-packed; copy everything out before
        // touching any field.
        let list = unsafe { std::ptr::read_unaligned(self.device_list) };
        let entries = list.devices;
        let count = (list.count as usize).min(entries.len());

        let mut devices = Vec::with_capacity(count);
        for raw in entries.iter().take(count) {
            let name_bytes = raw.name;
            let address = raw.address;
            let class_of_device = raw.class_of_device;
            devices.push(Device {
                name: cstr_field(&name_bytes),
                address: BtAddress(address),
                // The vendor list carries no remembered/connected flags.
                remembered: false,
                connected: false,
                class_of_device,
            });
        }
        Ok(devices)
    }

    fn set_passkey(&mut self, device: &Device, passkey: &Passkey) -> Result<(), BackendError> {
        let mut error = 0i32;
        let ok = unsafe {
            (self.api.set_pin)(
                device.address.0.as_ptr(),
                passkey.0.as_ptr().cast::<c_char>(),
                passkey.0.len() as i32,
                &mut error,
            )
        };
        if !ok.as_bool() {
            return Err(BackendError::Authentication(format!(
                "BtSetAutoReplyPinCode failed ({error})"
            )));
        }
        Ok(())
    }

    fn start_connecting(&mut self, device: &Device) -> Result<(), BackendError> {
        let mut error = 0i32;
        let ok = unsafe {
            (self.api.connect_hid)(
                device.address.0.as_ptr(),
                &mut error,
                self.hwnd,
                self.message,
                LPARAM(0),
            )
        };
        if !ok.as_bool() {
            return Err(BackendError::Authentication(format!(
                "BtConnectHID failed ({error})"
            )));
        }
        Ok(())
    }

    fn remove_pairing(&mut self, device: &Device) -> Result<(), BackendError> {
        let mut error = 0i32;
        let ok = unsafe { (self.api.clear_pin)(device.address.0.as_ptr(), &mut error) };
        if !ok.as_bool() {
            return Err(BackendError::Removal(format!(
                "BtClearAutoReplyPinCode failed ({error})"
            )));
        }
        Ok(())
    }
}

impl Drop for TosDriver {
    fn drop(&mut self) {
        unsafe {
            if !self.device_list.is_null() {
                let _ = (self.api.mem_free)(self.device_list.cast::<c_void>());
            }
            let mut error = 0i32;
            let _ = (self.api.close)(&mut error);
            let _ = FreeLibrary(self.api.module);
        }
    }
}

fn cstr_field(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}
