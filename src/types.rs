use std::ops::{Add, Mul};

/// Unit quaternion in [x, y, z, w] wire order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotate `v` by this quaternion (q * v * q⁻¹).
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        let p = Quaternion::new(v.x, v.y, v.z, 0.0);
        let r = *self * p * self.conjugate();
        Vector3::new(r.x, r.y, r.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, b: Quaternion) -> Quaternion {
        let a = self;
        Quaternion {
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        }
    }
}

/// 3D vector in meters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, o: Vector3) -> Vector3 {
        Vector3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

bitflags::bitflags! {
    /// Digital button state carried by a sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct Buttons: u8 {
        const A_CLICK       = 1 << 0;
        const TRIGGER_CLICK = 1 << 1;
    }
}

/// One decoded reading from the peripheral.
///
/// Values are passed through verbatim: the quaternion is not normalized and
/// the trigger is not clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub orientation: Quaternion,
    pub buttons: Buttons,
    pub trigger_value: f32,
}

impl Sample {
    pub fn a_click(&self) -> bool {
        self.buttons.contains(Buttons::A_CLICK)
    }

    pub fn trigger_click(&self) -> bool {
        self.buttons.contains(Buttons::TRIGGER_CLICK)
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            orientation: Quaternion::IDENTITY,
            buttons: Buttons::empty(),
            trigger_value: 0.0,
        }
    }
}

/// Which hand this driver instance represents.
///
/// Discriminants match the host's controller-role hint values.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Left = 1,
    Right = 2,
}

impl Role {
    pub const fn default_port(self) -> u16 {
        match self {
            Role::Left => 12345,
            Role::Right => 12346,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Role::Left => "left",
            Role::Right => "right",
        }
    }

    fn side(self) -> f64 {
        match self {
            Role::Left => -0.15,
            Role::Right => 0.15,
        }
    }

    /// Controller offset relative to the head, in head space.
    pub fn head_offset(self) -> Vector3 {
        Vector3::new(self.side(), 0.1, -0.3)
    }

    /// World position reported when no valid head pose is available.
    pub fn fallback_position(self) -> Vector3 {
        Vector3::new(self.side(), 1.0, -0.5)
    }

    pub fn from_raw(raw: i32) -> crate::Result<Role> {
        match raw {
            1 => Ok(Role::Left),
            2 => Ok(Role::Right),
            other => Err(crate::BridgeError::InvalidRole(other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Host-assigned object id of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Raw value the host uses for "no device".
    pub const INVALID_RAW: u32 = u32::MAX;
}

/// Most recent pose of the reference (head) device, as supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub position: Vector3,
    pub orientation: Quaternion,
    pub valid: bool,
}

impl HeadPose {
    pub const INVALID: HeadPose = HeadPose {
        position: Vector3::ZERO,
        orientation: Quaternion::IDENTITY,
        valid: false,
    };
}

/// Tracking quality attached to a submitted pose.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingResult {
    Uninitialized = 1,
    RunningOk = 200,
    RunningOutOfRange = 201,
}

/// Pose submitted to the tracking host once per tick.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPose {
    pub rotation: Quaternion,
    pub position: Vector3,
    pub velocity: Vector3,
    pub angular_velocity: Vector3,
    pub world_from_driver_rotation: Quaternion,
    pub driver_from_head_rotation: Quaternion,
    pub result: TrackingResult,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
}

impl Default for DriverPose {
    fn default() -> Self {
        Self {
            rotation: Quaternion::IDENTITY,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            angular_velocity: Vector3::ZERO,
            world_from_driver_rotation: Quaternion::IDENTITY,
            driver_from_head_rotation: Quaternion::IDENTITY,
            result: TrackingResult::Uninitialized,
            pose_is_valid: false,
            device_is_connected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vector3, b: Vector3) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9
    }

    #[test]
    fn test_identity_rotation_is_noop() {
        let v = Vector3::new(0.15, 0.1, -0.3);
        assert!(approx(Quaternion::IDENTITY.rotate(v), v));
    }

    #[test]
    fn test_rotate_quarter_turn_about_y() {
        let half = std::f64::consts::FRAC_PI_4;
        let q = Quaternion::new(0.0, half.sin(), 0.0, half.cos());
        // +90° about Y maps +X to -Z.
        let r = q.rotate(Vector3::new(1.0, 0.0, 0.0));
        assert!(approx(r, Vector3::new(0.0, 0.0, -1.0)), "{:?}", r);
    }

    #[test]
    fn test_role_ports_are_disjoint() {
        assert_ne!(Role::Left.default_port(), Role::Right.default_port());
        assert_eq!(Role::from_raw(1).unwrap(), Role::Left);
        assert_eq!(Role::from_raw(2).unwrap(), Role::Right);
        assert!(Role::from_raw(0).is_err());
    }

    #[test]
    fn test_role_offsets_mirror() {
        assert_eq!(Role::Left.head_offset().x, -Role::Right.head_offset().x);
        assert_eq!(Role::Left.fallback_position().y, 1.0);
    }

    #[test]
    fn test_sample_buttons() {
        let s = Sample {
            buttons: Buttons::TRIGGER_CLICK,
            ..Sample::default()
        };
        assert!(!s.a_click());
        assert!(s.trigger_click());
    }
}
