//! C FFI layer for simplecontroller.
//!
//! A C++ shim inside the tracking host creates one driver per hand, hands it
//! a table of host callbacks, and forwards the host's device calls.
//! The generated C header is written to `include/simplecontroller.h` by cbindgen.

use crate::driver::{ControllerDriver, TrackedDeviceDriver};
use crate::error::{BridgeError, LastError};
use crate::host::{ComponentHandle, DeviceProperty, HostEvent, SettingsSource, TrackingHost};
use crate::types::{DeviceId, DriverPose, HeadPose, Quaternion, Role, Vector3};
use std::ffi::{c_char, c_int, c_void, CString};
use std::sync::Arc;

/// Process-wide last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Buffer size offered to the host when reading a setting.
const SETTING_BUFFER_LEN: usize = 1024;

pub const SC_PROPERTY_MODEL_NUMBER: c_int = 0;
pub const SC_PROPERTY_INPUT_PROFILE_PATH: c_int = 1;
pub const SC_PROPERTY_CONTROLLER_ROLE_HINT: c_int = 2;

pub const SC_COMPONENT_BOOLEAN: c_int = 0;
pub const SC_COMPONENT_SCALAR: c_int = 1;
pub const SC_COMPONENT_HAPTIC: c_int = 2;

/// Head pose supplied by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ScHeadPose {
    /// Position [x, y, z] in meters.
    pub position: [f64; 3],
    /// Orientation [qx, qy, qz, qw].
    pub orientation: [f64; 4],
}

/// Controller pose in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ScPose {
    /// Orientation [qx, qy, qz, qw].
    pub rotation: [f64; 4],
    /// Position [x, y, z] in meters.
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub angular_velocity: [f64; 3],
    pub world_from_driver_rotation: [f64; 4],
    pub driver_from_head_rotation: [f64; 4],
    /// Tracking result code (200 = running OK, 201 = running out of range).
    pub result: c_int,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
}

fn quat_to_array(q: Quaternion) -> [f64; 4] {
    [q.x, q.y, q.z, q.w]
}

fn vec_to_array(v: Vector3) -> [f64; 3] {
    [v.x, v.y, v.z]
}

impl From<&DriverPose> for ScPose {
    fn from(p: &DriverPose) -> Self {
        ScPose {
            rotation: quat_to_array(p.rotation),
            position: vec_to_array(p.position),
            velocity: vec_to_array(p.velocity),
            angular_velocity: vec_to_array(p.angular_velocity),
            world_from_driver_rotation: quat_to_array(p.world_from_driver_rotation),
            driver_from_head_rotation: quat_to_array(p.driver_from_head_rotation),
            result: p.result as c_int,
            pose_is_valid: p.pose_is_valid,
            device_is_connected: p.device_is_connected,
        }
    }
}

/// Host services as C function pointers. Any entry may be null.
///
/// `context` is passed back unchanged on every call. Callbacks are invoked
/// from the driver's pose thread as well as from the calling thread, so they
/// must be thread-safe.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ScHostCallbacks {
    pub context: *mut c_void,
    /// Fill `out` and return true if the head pose is valid.
    pub head_pose: Option<unsafe extern "C" fn(context: *mut c_void, out: *mut ScHeadPose) -> bool>,
    pub pose_updated:
        Option<unsafe extern "C" fn(context: *mut c_void, device: u32, pose: *const ScPose)>,
    pub set_string_property: Option<
        unsafe extern "C" fn(context: *mut c_void, device: u32, property: c_int, value: *const c_char),
    >,
    pub set_int32_property:
        Option<unsafe extern "C" fn(context: *mut c_void, device: u32, property: c_int, value: i32)>,
    /// Returns the new component handle (0 on failure).
    pub create_component: Option<
        unsafe extern "C" fn(context: *mut c_void, device: u32, kind: c_int, path: *const c_char) -> u64,
    >,
    pub update_boolean: Option<unsafe extern "C" fn(context: *mut c_void, handle: u64, value: bool)>,
    pub update_scalar: Option<unsafe extern "C" fn(context: *mut c_void, handle: u64, value: f32)>,
    /// Copy a null-terminated setting into `out` (at most `out_len` bytes);
    /// return false if it does not exist.
    pub get_setting: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            section: *const c_char,
            key: *const c_char,
            out: *mut c_char,
            out_len: u32,
        ) -> bool,
    >,
}

/// [`TrackingHost`] backed by a C callback table.
struct CallbackHost(ScHostCallbacks);

// The callback contract requires thread-safe callbacks and a context that
// outlives the driver.
unsafe impl Send for CallbackHost {}
unsafe impl Sync for CallbackHost {}

fn to_cstring(s: &str) -> Option<CString> {
    match CString::new(s) {
        Ok(c) => Some(c),
        Err(_) => {
            log::warn!("String with interior NUL not passed to host: {:?}", s);
            None
        }
    }
}

impl CallbackHost {
    fn set_string(&self, device: DeviceId, property: c_int, value: &str) {
        if let (Some(f), Some(value)) = (self.0.set_string_property, to_cstring(value)) {
            unsafe { f(self.0.context, device.0, property, value.as_ptr()) }
        }
    }

    fn create(&self, device: DeviceId, kind: c_int, path: &str) -> ComponentHandle {
        match (self.0.create_component, to_cstring(path)) {
            (Some(f), Some(path)) => {
                ComponentHandle(unsafe { f(self.0.context, device.0, kind, path.as_ptr()) })
            }
            _ => ComponentHandle::INVALID,
        }
    }
}

impl TrackingHost for CallbackHost {
    fn head_pose(&self) -> HeadPose {
        let Some(f) = self.0.head_pose else {
            return HeadPose::INVALID;
        };
        let mut out = ScHeadPose::default();
        let valid = unsafe { f(self.0.context, &mut out) };
        let [px, py, pz] = out.position;
        let [qx, qy, qz, qw] = out.orientation;
        HeadPose {
            position: Vector3::new(px, py, pz),
            orientation: Quaternion::new(qx, qy, qz, qw),
            valid,
        }
    }

    fn pose_updated(&self, device: DeviceId, pose: &DriverPose) {
        if let Some(f) = self.0.pose_updated {
            let out = ScPose::from(pose);
            unsafe { f(self.0.context, device.0, &out) }
        }
    }

    fn set_property(&self, device: DeviceId, property: DeviceProperty<'_>) {
        match property {
            DeviceProperty::ModelNumber(v) => self.set_string(device, SC_PROPERTY_MODEL_NUMBER, v),
            DeviceProperty::InputProfilePath(v) => {
                self.set_string(device, SC_PROPERTY_INPUT_PROFILE_PATH, v)
            }
            DeviceProperty::ControllerRoleHint(role) => {
                if let Some(f) = self.0.set_int32_property {
                    unsafe {
                        f(
                            self.0.context,
                            device.0,
                            SC_PROPERTY_CONTROLLER_ROLE_HINT,
                            role as i32,
                        )
                    }
                }
            }
        }
    }

    fn create_boolean_component(&self, device: DeviceId, path: &str) -> ComponentHandle {
        self.create(device, SC_COMPONENT_BOOLEAN, path)
    }

    fn create_scalar_component(&self, device: DeviceId, path: &str) -> ComponentHandle {
        self.create(device, SC_COMPONENT_SCALAR, path)
    }

    fn create_haptic_component(&self, device: DeviceId, path: &str) -> ComponentHandle {
        self.create(device, SC_COMPONENT_HAPTIC, path)
    }

    fn update_boolean_component(&self, handle: ComponentHandle, value: bool) {
        if let Some(f) = self.0.update_boolean {
            unsafe { f(self.0.context, handle.0, value) }
        }
    }

    fn update_scalar_component(&self, handle: ComponentHandle, value: f32) {
        if let Some(f) = self.0.update_scalar {
            unsafe { f(self.0.context, handle.0, value) }
        }
    }
}

impl SettingsSource for CallbackHost {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        let f = self.0.get_setting?;
        let section = to_cstring(section)?;
        let key = to_cstring(key)?;
        let mut buf = [0 as c_char; SETTING_BUFFER_LEN];
        let found = unsafe {
            f(
                self.0.context,
                section.as_ptr(),
                key.as_ptr(),
                buf.as_mut_ptr(),
                SETTING_BUFFER_LEN as u32,
            )
        };
        if !found {
            return None;
        }
        // Guarantee termination even if the host filled the whole buffer.
        buf[SETTING_BUFFER_LEN - 1] = 0;
        Some(c_char_to_string(&buf))
    }
}

/// Opaque driver handle for C consumers.
pub struct ScDriver {
    driver: ControllerDriver,
    serial: CString,
}

/// Create a driver for one hand.
/// `role`: 1 = left, 2 = right. Model and serial numbers are read through
/// `callbacks.get_setting`. Returns NULL on error (check sc_last_error()).
///
/// # Safety
/// `callbacks` must point to a valid `ScHostCallbacks`, or be null. The
/// callback context must stay valid until `sc_driver_destroy`.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_create(
    role: c_int,
    callbacks: *const ScHostCallbacks,
) -> *mut ScDriver {
    if callbacks.is_null() {
        LAST_ERROR.set(&BridgeError::NullPointer("callbacks"));
        return std::ptr::null_mut();
    }
    let role = match Role::from_raw(role) {
        Ok(r) => r,
        Err(e) => {
            LAST_ERROR.set(&e);
            return std::ptr::null_mut();
        }
    };

    let host = Arc::new(CallbackHost(*callbacks));
    let driver = ControllerDriver::from_settings(role, host.clone(), host.as_ref());
    let serial = CString::new(driver.serial_number()).unwrap_or_default();
    Box::into_raw(Box::new(ScDriver { driver, serial }))
}

/// Stop the driver if needed and free it.
///
/// # Safety
/// `driver` must be a pointer returned by `sc_driver_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_destroy(driver: *mut ScDriver) {
    if !driver.is_null() {
        drop(Box::from_raw(driver));
    }
}

/// Activate with the host-assigned object id.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_activate(driver: *mut ScDriver, object_id: u32) -> c_int {
    if driver.is_null() {
        return -1;
    }
    let driver = &*driver;
    match driver.driver.activate(object_id) {
        Ok(()) => {
            LAST_ERROR.clear();
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Stop both driver threads. Safe to call repeatedly.
///
/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_deactivate(driver: *mut ScDriver) {
    if !driver.is_null() {
        (*driver).driver.deactivate();
    }
}

/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_enter_standby(driver: *mut ScDriver) {
    if !driver.is_null() {
        (*driver).driver.enter_standby();
    }
}

/// Compute the current pose. Returns 0 on success, -1 on null arguments.
///
/// # Safety
/// `driver` and `pose` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_get_pose(driver: *const ScDriver, pose: *mut ScPose) -> c_int {
    if driver.is_null() || pose.is_null() {
        return -1;
    }
    let current = (*driver).driver.get_pose();
    pose.write(ScPose::from(&current));
    0
}

/// Push the latest button and trigger state to the host.
///
/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_run_frame(driver: *const ScDriver) {
    if !driver.is_null() {
        (*driver).driver.run_frame();
    }
}

/// Forward a haptic vibration event. It is logged; the peripheral has no motor.
///
/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_haptic_event(
    driver: *const ScDriver,
    component: u64,
    duration_s: f32,
    frequency: f32,
    amplitude: f32,
) {
    if !driver.is_null() {
        (*driver).driver.process_event(&HostEvent::HapticVibration {
            component: ComponentHandle(component),
            duration_s,
            frequency,
            amplitude,
        });
    }
}

/// Serial number read at creation, valid for the lifetime of the driver.
///
/// # Safety
/// `driver` must be a valid driver pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sc_driver_serial_number(driver: *const ScDriver) -> *const c_char {
    if driver.is_null() {
        return std::ptr::null();
    }
    (*driver).serial.as_ptr()
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next simplecontroller API call.
#[no_mangle]
pub extern "C" fn sc_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

fn c_char_to_string(buf: &[c_char]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let bytes: Vec<u8> = buf[..end].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).to_string()
}
