use crate::config::DriverConfig;
use crate::host::{ComponentHandle, DeviceProperty, HostEvent, SettingsSource, TrackingHost};
use crate::net::NetworkStack;
use crate::pose::{self, PoseLoop, POSE_PERIOD};
use crate::server::{ServerState, TelemetryServer};
use crate::store::SampleStore;
use crate::types::{DeviceId, DriverPose, Role};
use crate::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const INPUT_PROFILE_PATH: &str = "{simplecontroller}/input/mycontroller_profile.json";

/// The calls a tracking host makes into one device driver.
pub trait TrackedDeviceDriver: Send + Sync {
    /// Host assigned `object_id` to this device; start streaming.
    fn activate(&self, object_id: u32) -> Result<()>;
    fn deactivate(&self);
    fn enter_standby(&self);
    fn get_pose(&self) -> DriverPose;
    fn process_event(&self, event: &HostEvent);
    /// Once per host frame: push the latest button/trigger state.
    fn run_frame(&self);
    fn serial_number(&self) -> &str;
}

/// Input and output components declared on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputComponent {
    ATouch = 0,
    AClick = 1,
    TriggerValue = 2,
    TriggerClick = 3,
    Haptic = 4,
}

impl InputComponent {
    pub const COUNT: usize = 5;

    pub const fn path(self) -> &'static str {
        match self {
            InputComponent::ATouch => "/input/a/touch",
            InputComponent::AClick => "/input/a/click",
            InputComponent::TriggerValue => "/input/trigger/value",
            InputComponent::TriggerClick => "/input/trigger/click",
            InputComponent::Haptic => "/output/haptic",
        }
    }
}

/// State read by the pose thread as well as the host-facing calls.
struct Inner {
    role: Role,
    store: Arc<SampleStore>,
    host: Arc<dyn TrackingHost>,
    device: AtomicU32,
}

impl Inner {
    fn device_id(&self) -> Option<DeviceId> {
        match self.device.load(Ordering::Acquire) {
            DeviceId::INVALID_RAW => None,
            raw => Some(DeviceId(raw)),
        }
    }

    fn current_pose(&self) -> DriverPose {
        pose::build_pose(self.role, self.store.read(), &self.host.head_pose())
    }
}

#[derive(Default)]
struct Running {
    server: Option<TelemetryServer>,
    network: Option<NetworkStack>,
    pose: Option<PoseLoop>,
}

/// One IMU controller (left or right hand) exposed to the tracking host.
///
/// Activation starts two threads: the telemetry server, which publishes
/// decoded samples into a [`SampleStore`], and the pose loop, which reads
/// that store every 5 ms and submits a pose. They share nothing else.
pub struct ControllerDriver {
    config: DriverConfig,
    inner: Arc<Inner>,
    handles: Mutex<[ComponentHandle; InputComponent::COUNT]>,
    running: Mutex<Running>,
}

impl ControllerDriver {
    pub fn new(config: DriverConfig, host: Arc<dyn TrackingHost>) -> ControllerDriver {
        let inner = Arc::new(Inner {
            role: config.role,
            store: Arc::new(SampleStore::new()),
            host,
            device: AtomicU32::new(DeviceId::INVALID_RAW),
        });
        ControllerDriver {
            config,
            inner,
            handles: Mutex::new([ComponentHandle::INVALID; InputComponent::COUNT]),
            running: Mutex::new(Running::default()),
        }
    }

    /// Build a driver whose identifiers come from the host settings store.
    pub fn from_settings(
        role: Role,
        host: Arc<dyn TrackingHost>,
        settings: &dyn SettingsSource,
    ) -> ControllerDriver {
        Self::new(DriverConfig::load(role, settings), host)
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.inner.store
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.inner.device_id()
    }

    /// True between activate and deactivate.
    ///
    /// A telemetry server that failed to bind leaves the driver active with
    /// the pose loop still running; check [`ControllerDriver::server_state`]
    /// for that.
    pub fn is_active(&self) -> bool {
        let running = self.lock_running();
        running.server.is_some() || running.pose.is_some()
    }

    /// Bound telemetry address while the server is listening.
    pub fn telemetry_addr(&self) -> Option<SocketAddr> {
        self.lock_running()
            .server
            .as_ref()
            .and_then(TelemetryServer::local_addr)
    }

    pub fn server_state(&self) -> Option<ServerState> {
        self.lock_running().server.as_ref().map(TelemetryServer::state)
    }

    fn lock_running(&self) -> MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, component: InputComponent) -> ComponentHandle {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())[component as usize]
    }

    fn register_with_host(&self, device: DeviceId) {
        let host = &self.inner.host;
        host.set_property(device, DeviceProperty::ModelNumber(&self.config.model_number));
        host.set_property(device, DeviceProperty::ControllerRoleHint(self.config.role));
        host.set_property(device, DeviceProperty::InputProfilePath(INPUT_PROFILE_PATH));

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for component in [
            InputComponent::ATouch,
            InputComponent::AClick,
            InputComponent::TriggerClick,
        ] {
            handles[component as usize] = host.create_boolean_component(device, component.path());
        }
        handles[InputComponent::TriggerValue as usize] =
            host.create_scalar_component(device, InputComponent::TriggerValue.path());
        handles[InputComponent::Haptic as usize] =
            host.create_haptic_component(device, InputComponent::Haptic.path());
    }

    fn start_threads(&self, running: &mut Running) -> Result<()> {
        let inner = self.inner.clone();
        running.pose = Some(PoseLoop::start(
            format!("simplecontroller-pose-{}", self.config.role),
            POSE_PERIOD,
            move || {
                if let Some(device) = inner.device_id() {
                    let pose = inner.current_pose();
                    inner.host.pose_updated(device, &pose);
                }
            },
        )?);

        running.network = Some(NetworkStack::acquire());
        self.inner.store.reset();
        running.server = Some(TelemetryServer::start(
            self.config.server.clone(),
            self.inner.store.clone(),
        )?);
        Ok(())
    }

    /// Stop the telemetry server (unblocking any pending accept or read),
    /// release the network stack, then stop the pose loop.
    fn shutdown(&self, running: &mut Running) {
        if let Some(mut server) = running.server.take() {
            server.stop();
        }
        running.network.take();
        if let Some(mut pose_loop) = running.pose.take() {
            pose_loop.stop();
        }
        self.inner
            .device
            .store(DeviceId::INVALID_RAW, Ordering::Release);
    }
}

impl TrackedDeviceDriver for ControllerDriver {
    fn activate(&self, object_id: u32) -> Result<()> {
        let mut running = self.lock_running();
        if running.server.is_some() || running.pose.is_some() {
            return Err(BridgeError::AlreadyActive);
        }

        let device = DeviceId(object_id);
        self.inner.device.store(object_id, Ordering::Release);
        self.register_with_host(device);

        if let Err(e) = self.start_threads(&mut running) {
            log::error!("Failed to activate {} hand controller: {}", self.config.role, e);
            self.shutdown(&mut running);
            return Err(e);
        }

        log::info!(
            "Controller driver activated for {} hand, object id {}",
            self.config.role,
            object_id
        );
        Ok(())
    }

    fn deactivate(&self) {
        let mut running = self.lock_running();
        log::info!(
            "Controller driver deactivating for {} hand, object id {:?}",
            self.config.role,
            self.inner.device_id()
        );
        self.shutdown(&mut running);
    }

    fn enter_standby(&self) {
        log::info!("{} hand has been put on standby", self.config.role);
    }

    fn get_pose(&self) -> DriverPose {
        self.inner.current_pose()
    }

    fn process_event(&self, event: &HostEvent) {
        if let HostEvent::HapticVibration {
            component,
            duration_s,
            frequency,
            amplitude,
        } = *event
        {
            if component == self.handle(InputComponent::Haptic) {
                log::info!(
                    "Haptic event for {} hand. Duration: {:.2}, Freq: {:.2}, Amp: {:.2}",
                    self.config.role,
                    duration_s,
                    frequency,
                    amplitude
                );
            }
        }
    }

    fn run_frame(&self) {
        if self.inner.device_id().is_none() {
            return;
        }

        let (sample, fresh) = self.inner.store.read();
        let (a_click, trigger_click, trigger_value) = if fresh {
            (sample.a_click(), sample.trigger_click(), sample.trigger_value)
        } else {
            (false, false, 0.0)
        };

        let host = &self.inner.host;
        host.update_boolean_component(self.handle(InputComponent::AClick), a_click);
        // No capacitive sensor on the peripheral: a click implies a touch.
        host.update_boolean_component(self.handle(InputComponent::ATouch), a_click);
        host.update_boolean_component(self.handle(InputComponent::TriggerClick), trigger_click);
        host.update_scalar_component(self.handle(InputComponent::TriggerValue), trigger_value);
    }

    fn serial_number(&self) -> &str {
        &self.config.serial_number
    }
}

impl Drop for ControllerDriver {
    fn drop(&mut self) {
        let mut running = self.lock_running();
        self.shutdown(&mut running);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeadPose, Quaternion, TrackingResult, Vector3};
    use std::collections::HashMap;
    use std::io::Write;
    use std::net::{IpAddr, Ipv4Addr, TcpStream};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct MockHost {
        head: Mutex<Option<HeadPose>>,
        poses: Mutex<Vec<(DeviceId, DriverPose)>>,
        properties: Mutex<Vec<String>>,
        components: Mutex<Vec<(String, ComponentHandle)>>,
        booleans: Mutex<HashMap<ComponentHandle, bool>>,
        scalars: Mutex<HashMap<ComponentHandle, f32>>,
    }

    impl MockHost {
        fn set_head(&self, head: HeadPose) {
            *self.head.lock().unwrap() = Some(head);
        }

        fn pose_count(&self) -> usize {
            self.poses.lock().unwrap().len()
        }

        fn last_pose(&self) -> Option<(DeviceId, DriverPose)> {
            self.poses.lock().unwrap().last().copied()
        }

        fn handle_for(&self, path: &str) -> ComponentHandle {
            self.components
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, h)| *h)
                .unwrap()
        }

        fn boolean(&self, path: &str) -> Option<bool> {
            let h = self.handle_for(path);
            self.booleans.lock().unwrap().get(&h).copied()
        }

        fn scalar(&self, path: &str) -> Option<f32> {
            let h = self.handle_for(path);
            self.scalars.lock().unwrap().get(&h).copied()
        }

        fn create(&self, path: &str) -> ComponentHandle {
            let mut components = self.components.lock().unwrap();
            let handle = ComponentHandle(components.len() as u64 + 1);
            components.push((path.to_string(), handle));
            handle
        }
    }

    impl TrackingHost for MockHost {
        fn head_pose(&self) -> HeadPose {
            self.head.lock().unwrap().unwrap_or(HeadPose::INVALID)
        }

        fn pose_updated(&self, device: DeviceId, pose: &DriverPose) {
            self.poses.lock().unwrap().push((device, *pose));
        }

        fn set_property(&self, _device: DeviceId, property: DeviceProperty<'_>) {
            self.properties.lock().unwrap().push(format!("{:?}", property));
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

        fn update_boolean_component(&self, handle: ComponentHandle, value: bool) {
            self.booleans.lock().unwrap().insert(handle, value);
        }

        fn update_scalar_component(&self, handle: ComponentHandle, value: f32) {
            self.scalars.lock().unwrap().insert(handle, value);
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn test_driver(role: Role) -> (ControllerDriver, Arc<MockHost>) {
        let mut config = DriverConfig::for_role(role);
        config.serial_number = format!("SC-{}", role);
        config.model_number = "MyController".into();
        config.server.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.server.port = 0;
        config.server.backoff = Duration::from_millis(10);
        config.server.read_poll = Duration::from_millis(20);

        let host = Arc::new(MockHost::default());
        (ControllerDriver::new(config, host.clone()), host)
    }

    fn connect_peer(driver: &ControllerDriver) -> TcpStream {
        assert!(wait_until(Duration::from_secs(2), || {
            driver.telemetry_addr().is_some()
        }));
        let peer = TcpStream::connect(driver.telemetry_addr().unwrap()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            driver.server_state() == Some(ServerState::Connected)
        }));
        peer
    }

    fn activate_and_connect(driver: &ControllerDriver) -> TcpStream {
        driver.activate(7).unwrap();
        connect_peer(driver)
    }

    #[test]
    fn test_activate_registers_with_host() {
        let (driver, host) = test_driver(Role::Right);
        driver.activate(3).unwrap();

        let props = host.properties.lock().unwrap().clone();
        assert_eq!(props.len(), 3);
        assert!(props[0].contains("MyController"));
        assert!(props[1].contains("Right"));
        assert!(props[2].contains("mycontroller_profile.json"));

        let paths: Vec<String> = host
            .components
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect();
        for component in [
            InputComponent::ATouch,
            InputComponent::AClick,
            InputComponent::TriggerValue,
            InputComponent::TriggerClick,
            InputComponent::Haptic,
        ] {
            assert!(paths.iter().any(|p| p == component.path()));
        }
        assert_eq!(driver.device_id(), Some(DeviceId(3)));
        assert_eq!(driver.serial_number(), "SC-right");
        driver.deactivate();
    }

    #[test]
    fn test_never_connected_reports_fallback_pose() {
        let (driver, host) = test_driver(Role::Left);
        driver.activate(1).unwrap();

        assert!(wait_until(Duration::from_secs(2), || host.pose_count() >= 3));
        let (device, pose) = host.last_pose().unwrap();
        assert_eq!(device, DeviceId(1));
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        assert_eq!(pose.position, Role::Left.fallback_position());
        assert_eq!(pose.result, TrackingResult::RunningOutOfRange);

        host.set_head(HeadPose {
            position: Vector3::new(0.0, 1.6, 0.0),
            orientation: Quaternion::IDENTITY,
            valid: true,
        });
        let pose = driver.get_pose();
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        assert_eq!(pose.result, TrackingResult::RunningOk);
        assert!((pose.position.x + 0.15).abs() < 1e-9);
        assert!((pose.position.y - 1.7).abs() < 1e-9);
        assert!((pose.position.z + 0.3).abs() < 1e-9);

        driver.run_frame();
        assert_eq!(host.boolean("/input/a/click"), Some(false));
        assert_eq!(host.boolean("/input/a/touch"), Some(false));
        assert_eq!(host.boolean("/input/trigger/click"), Some(false));
        assert_eq!(host.scalar("/input/trigger/value"), Some(0.0));
        driver.deactivate();
    }

    #[test]
    fn test_identity_sample_reaches_pose() {
        let (driver, host) = test_driver(Role::Left);
        let mut peer = activate_and_connect(&driver);
        peer.write_all(b"0,0,0,1;0,0,0.0\n").unwrap();

        assert!(wait_until(Duration::from_secs(2), || driver.store().read().1));
        let count = host.pose_count();
        assert!(wait_until(Duration::from_secs(2), || host.pose_count() > count));
        let (_, pose) = host.last_pose().unwrap();
        assert_eq!(pose.rotation, Quaternion::IDENTITY);
        driver.deactivate();
    }

    #[test]
    fn test_sample_survives_disconnect() {
        let (driver, host) = test_driver(Role::Right);
        let rotated = Quaternion::new(0.0, 0.7071, 0.0, 0.7071);
        {
            let mut peer = activate_and_connect(&driver);
            peer.write_all(b"0,0.7071,0,0.7071;1,0,0.75\n").unwrap();
            assert!(wait_until(Duration::from_secs(2), || driver.store().read().1));
        }
        assert!(wait_until(Duration::from_secs(2), || {
            driver.server_state() == Some(ServerState::Listening)
        }));

        assert_eq!(driver.get_pose().rotation, rotated);
        let count = host.pose_count();
        assert!(wait_until(Duration::from_secs(2), || host.pose_count() > count + 2));
        assert_eq!(host.last_pose().unwrap().1.rotation, rotated);

        driver.run_frame();
        assert_eq!(host.boolean("/input/a/click"), Some(true));
        assert_eq!(host.boolean("/input/a/touch"), Some(true));
        assert_eq!(host.boolean("/input/trigger/click"), Some(false));
        assert_eq!(host.scalar("/input/trigger/value"), Some(0.75));
        driver.deactivate();
    }

    #[test]
    fn test_malformed_message_keeps_last_sample() {
        let (driver, _host) = test_driver(Role::Left);
        let mut peer = activate_and_connect(&driver);
        peer.write_all(b"0,0,0,1;0,1,0.5\n").unwrap();
        assert!(wait_until(Duration::from_secs(2), || driver.store().read().1));

        peer.write_all(b"bad,data\n").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let (sample, fresh) = driver.store().read();
        assert!(fresh);
        assert!(sample.trigger_click());
        assert_eq!(sample.trigger_value, 0.5);
        assert_eq!(driver.server_state(), Some(ServerState::Connected));
        driver.deactivate();
    }

    #[test]
    fn test_lifecycle_is_idempotent() {
        let (driver, host) = test_driver(Role::Left);
        driver.deactivate();

        driver.activate(2).unwrap();
        assert!(matches!(driver.activate(2), Err(BridgeError::AlreadyActive)));
        let _peer = connect_peer(&driver);

        let begin = Instant::now();
        driver.deactivate();
        assert!(begin.elapsed() < Duration::from_secs(1));
        driver.deactivate();
        assert!(!driver.is_active());
        assert_eq!(driver.device_id(), None);

        let settled = host.pose_count();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(host.pose_count(), settled);

        driver.activate(2).unwrap();
        assert!(driver.is_active());
        driver.deactivate();
    }

    #[test]
    fn test_bind_failure_keeps_pose_loop_running() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut driver, host) = test_driver(Role::Left);
        driver.config.server.port = blocker.local_addr().unwrap().port();

        driver.activate(5).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            driver.server_state() == Some(ServerState::Stopped)
        }));
        assert!(driver.is_active());
        assert!(driver.telemetry_addr().is_none());

        let count = host.pose_count();
        assert!(wait_until(Duration::from_secs(2), || host.pose_count() > count + 2));
        assert_eq!(host.last_pose().unwrap().1.rotation, Quaternion::IDENTITY);
        driver.deactivate();
        assert!(!driver.is_active());
    }

    #[test]
    fn test_run_frame_before_activation_is_noop() {
        let (driver, host) = test_driver(Role::Left);
        driver.run_frame();
        assert!(host.booleans.lock().unwrap().is_empty());
        driver.process_event(&HostEvent::Other(0));
    }

    #[test]
    fn test_haptic_event_is_accepted() {
        let (driver, host) = test_driver(Role::Right);
        driver.activate(4).unwrap();
        let haptic = host.handle_for("/output/haptic");
        driver.process_event(&HostEvent::HapticVibration {
            component: haptic,
            duration_s: 0.1,
            frequency: 160.0,
            amplitude: 0.5,
        });
        // Logged only; nothing is sent back to the peripheral.
        assert!(driver.is_active());
        driver.deactivate();
    }

    #[test]
    fn test_drop_stops_threads() {
        let (driver, _host) = test_driver(Role::Left);
        let peer = activate_and_connect(&driver);
        let addr = driver.telemetry_addr().unwrap();
        drop(driver);
        drop(peer);
        assert!(TcpStream::connect(addr).is_err());
    }
}
