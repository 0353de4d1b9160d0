//! Interfaces to the tracking-system host the driver runs inside.
//!
//! The host owns device registration, head tracking, input components and
//! the settings store. The driver only talks to it through these traits, so
//! a C++ shim (see [`crate::ffi`]) or a test double can stand in for it.

use crate::types::{DeviceId, DriverPose, HeadPose, Role};

/// Opaque host handle for one input or output component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComponentHandle(pub u64);

impl ComponentHandle {
    pub const INVALID: ComponentHandle = ComponentHandle(0);
}

/// Device properties declared on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty<'a> {
    ModelNumber(&'a str),
    ControllerRoleHint(Role),
    InputProfilePath(&'a str),
}

/// Asynchronous events delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostEvent {
    HapticVibration {
        component: ComponentHandle,
        duration_s: f32,
        frequency: f32,
        amplitude: f32,
    },
    Other(u32),
}

/// Services the tracking host provides to a device driver.
pub trait TrackingHost: Send + Sync {
    /// Latest pose of the head-mounted reference device.
    fn head_pose(&self) -> HeadPose;

    /// Submit a pose for `device`. Called from the pose thread.
    fn pose_updated(&self, device: DeviceId, pose: &DriverPose);

    fn set_property(&self, device: DeviceId, property: DeviceProperty<'_>);

    fn create_boolean_component(&self, device: DeviceId, path: &str) -> ComponentHandle;

    /// Scalar component, absolute and normalized to [0, 1].
    fn create_scalar_component(&self, device: DeviceId, path: &str) -> ComponentHandle;

    fn create_haptic_component(&self, device: DeviceId, path: &str) -> ComponentHandle;

    fn update_boolean_component(&self, handle: ComponentHandle, value: bool);

    fn update_scalar_component(&self, handle: ComponentHandle, value: f32);
}

/// Key-value settings store read once at driver construction.
pub trait SettingsSource {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
}

/// Settings taken from the environment.
///
/// `section`/`key` map to `SIMPLECONTROLLER_<SECTION>_<KEY>` uppercased,
/// e.g. `SIMPLECONTROLLER_DRIVER_SIMPLECONTROLLER_MYCONTROLLER_MODEL_NUMBER`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl EnvSettings {
    pub fn var_name(section: &str, key: &str) -> String {
        format!("SIMPLECONTROLLER_{}_{}", section, key).to_ascii_uppercase()
    }
}

impl SettingsSource for EnvSettings {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        std::env::var(Self::var_name(section, key))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            EnvSettings::var_name("driver_simplecontroller", "mycontroller_model_number"),
            "SIMPLECONTROLLER_DRIVER_SIMPLECONTROLLER_MYCONTROLLER_MODEL_NUMBER"
        );
    }

    #[test]
    fn test_env_settings_reads_and_trims() {
        let name = EnvSettings::var_name("host_test_section", "serial");
        std::env::set_var(&name, "  SC-0001 ");
        assert_eq!(
            EnvSettings.get_string("host_test_section", "serial").as_deref(),
            Some("SC-0001")
        );
        std::env::set_var(&name, "   ");
        assert_eq!(EnvSettings.get_string("host_test_section", "serial"), None);
        std::env::remove_var(&name);
    }
}
