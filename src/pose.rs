use crate::types::{DriverPose, HeadPose, Role, Sample, TrackingResult};
use crate::{BridgeError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pose submission period (~200 Hz).
pub const POSE_PERIOD: Duration = Duration::from_millis(5);

/// Build the pose reported for `role` from the latest store contents and the
/// host's head pose.
///
/// Rotation comes from the sample when one has ever been published, else
/// identity. Position is the role's head offset rotated into world space and
/// added to the head position; without a valid head pose a fixed fallback is
/// reported as out of range.
pub fn build_pose(role: Role, latest: (Sample, bool), head: &HeadPose) -> DriverPose {
    let (sample, fresh) = latest;
    let mut pose = DriverPose {
        result: TrackingResult::RunningOk,
        pose_is_valid: true,
        device_is_connected: true,
        ..DriverPose::default()
    };

    if fresh {
        pose.rotation = sample.orientation;
    }

    if head.valid {
        pose.position = head.position + head.orientation.rotate(role.head_offset());
    } else {
        pose.position = role.fallback_position();
        pose.result = TrackingResult::RunningOutOfRange;
    }
    pose
}

/// Handle to the fixed-rate pose thread.
///
/// The thread wakes every `period` and runs `tick` while active. It never
/// blocks on the telemetry side; whatever `tick` reads it reads from the
/// shared store.
pub struct PoseLoop {
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PoseLoop {
    pub fn start<F>(name: String, period: Duration, mut tick: F) -> Result<PoseLoop>
    where
        F: FnMut() + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = active.clone();

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let ticker = crossbeam_channel::tick(period);
                log::debug!("Pose loop started ({:?} period)", period);
                while thread_active.load(Ordering::Acquire) {
                    tick();
                    if ticker.recv().is_err() {
                        break;
                    }
                }
                log::debug!("Pose loop stopped");
            })
            .map_err(|e| BridgeError::ThreadSpawn(format!("pose loop: {}", e)))?;

        Ok(PoseLoop {
            active,
            thread: Some(thread),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clear the active flag and join. Idempotent.
    pub fn stop(&mut self) {
        self.active.swap(false, Ordering::AcqRel);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Pose loop thread panicked");
            }
        }
    }
}

impl Drop for PoseLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Buttons, Quaternion, Vector3};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn close(a: Vector3, b: Vector3) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9
    }

    fn head_at(position: Vector3, orientation: Quaternion) -> HeadPose {
        HeadPose {
            position,
            orientation,
            valid: true,
        }
    }

    #[test]
    fn test_stale_store_uses_identity() {
        let latest = (
            Sample {
                orientation: Quaternion::new(0.0, 1.0, 0.0, 0.0),
                ..Sample::default()
            },
            false,
        );
        let head = head_at(Vector3::new(0.0, 1.7, 0.0), Quaternion::IDENTITY);
        let pose = build_pose(Role::Right, latest, &head);
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        assert_eq!(pose.result, TrackingResult::RunningOk);
        assert!(close(pose.position, Vector3::new(0.15, 1.8, -0.3)));
    }

    #[test]
    fn test_fresh_sample_orientation_used_verbatim() {
        let q = Quaternion::new(0.1, 0.2, 0.3, 0.4);
        let latest = (
            Sample {
                orientation: q,
                buttons: Buttons::A_CLICK,
                trigger_value: 0.75,
            },
            true,
        );
        let pose = build_pose(Role::Left, latest, &HeadPose::INVALID);
        assert_eq!(pose.rotation, q);
    }

    #[test]
    fn test_offset_follows_head_rotation() {
        let half = std::f64::consts::FRAC_PI_4;
        let yaw = Quaternion::new(0.0, half.sin(), 0.0, half.cos());
        let head = head_at(Vector3::new(1.0, 1.5, 2.0), yaw);
        let pose = build_pose(Role::Left, (Sample::default(), false), &head);
        // (-0.15, 0.1, -0.3) turned +90° about Y is (-0.3, 0.1, 0.15).
        assert!(close(pose.position, Vector3::new(0.7, 1.6, 2.15)), "{:?}", pose.position);
    }

    #[test]
    fn test_invalid_head_degrades_tracking() {
        let pose = build_pose(Role::Left, (Sample::default(), false), &HeadPose::INVALID);
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        assert!(close(pose.position, Vector3::new(-0.15, 1.0, -0.5)));
        assert_eq!(pose.result, TrackingResult::RunningOutOfRange);
        assert!(pose.pose_is_valid);
        assert!(pose.device_is_connected);
        assert_eq!(pose.world_from_driver_rotation, Quaternion::IDENTITY);
    }

    #[test]
    fn test_loop_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut pose_loop = PoseLoop::start("pose-test".into(), POSE_PERIOD, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        let begin = Instant::now();
        pose_loop.stop();
        assert!(begin.elapsed() < Duration::from_millis(500));
        assert!(!pose_loop.is_active());

        let seen = ticks.load(Ordering::Relaxed);
        assert!(seen >= 5, "only {} ticks", seen);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::Relaxed), seen);

        pose_loop.stop();
    }
}
