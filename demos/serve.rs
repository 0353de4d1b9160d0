//! Run one controller driver against a console host.
//!
//! Usage: cargo run --example serve [left|right]
//! Then feed it with `cargo run --example send`. Press Ctrl+C to stop.
//!
//! Model and serial numbers come from `SIMPLECONTROLLER_<SECTION>_<KEY>`
//! variables; `SIMPLECONTROLLER_BIND_ADDR` and `SIMPLECONTROLLER_PORT_LEFT` /
//! `_RIGHT` override the listener.

use simplecontroller::host::{ComponentHandle, DeviceProperty, EnvSettings};
use simplecontroller::{
    ControllerDriver, DeviceId, DriverPose, HeadPose, Quaternion, Role,
    TrackedDeviceDriver, TrackingHost, Vector3,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Host stand-in with a fixed head pose that counts pose submissions.
#[derive(Default)]
struct ConsoleHost {
    poses: AtomicU64,
    last_pose: Mutex<Option<DriverPose>>,
    next_handle: AtomicU64,
}

impl TrackingHost for ConsoleHost {
    fn head_pose(&self) -> HeadPose {
        HeadPose {
            position: Vector3::new(0.0, 1.7, 0.0),
            orientation: Quaternion::IDENTITY,
            valid: true,
        }
    }

    fn pose_updated(&self, _device: DeviceId, pose: &DriverPose) {
        self.poses.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_pose.lock() {
            *last = Some(*pose);
        }
    }

    fn set_property(&self, device: DeviceId, property: DeviceProperty<'_>) {
        println!("device {}: {:?}", device.0, property);
    }

    fn create_boolean_component(&self, _device: DeviceId, path: &str) -> ComponentHandle {
        self.create(path)
    }

    fn create_scalar_component(&self, _device: DeviceId, path: &str) -> ComponentHandle {
        self.create(path)
    }

    fn create_haptic_component(&self, _device: DeviceId, path: &str) -> ComponentHandle {
        self.create(path)
    }

    fn update_boolean_component(&self, _handle: ComponentHandle, _value: bool) {}

    fn update_scalar_component(&self, _handle: ComponentHandle, _value: f32) {}
}

impl ConsoleHost {
    fn create(&self, path: &str) -> ComponentHandle {
        let handle = ComponentHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        println!("component {:<22} -> {}", path, handle.0);
        handle
    }
}

fn main() {
    env_logger::init();

    let role = match std::env::args().nth(1).as_deref() {
        None | Some("left") => Role::Left,
        Some("right") => Role::Right,
        Some(other) => {
            eprintln!("Unknown role '{}', expected left or right", other);
            std::process::exit(1);
        }
    };

    let host = Arc::new(ConsoleHost::default());
    let driver = ControllerDriver::from_settings(role, host.clone(), &EnvSettings);

    if let Err(e) = driver.activate(1) {
        eprintln!("Failed to activate driver: {}", e);
        std::process::exit(1);
    }

    println!(
        "Serving {} hand on port {} (Ctrl+C to stop)...",
        role,
        driver.config().server.port
    );

    let start = Instant::now();
    let mut last_report = Instant::now();

    loop {
        driver.run_frame();
        std::thread::sleep(Duration::from_millis(11));

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            let count = host.poses.load(Ordering::Relaxed);
            let (sample, fresh) = driver.store().read();
            let q = sample.orientation;
            let pose = host.last_pose.lock().ok().and_then(|p| *p);
            println!(
                "--- {} poses in {:.1}s ({:.1} Hz) server={:?} ---",
                count,
                elapsed,
                count as f64 / elapsed,
                driver.server_state(),
            );
            println!(
                "fresh={} quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}] a={} trig={} val={:.2} result={:?}",
                fresh,
                q.x,
                q.y,
                q.z,
                q.w,
                sample.a_click(),
                sample.trigger_click(),
                sample.trigger_value,
                pose.map(|p| p.result),
            );
            last_report = now;
        }
    }
}
