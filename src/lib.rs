//! # simplecontroller - IMU controller telemetry bridge
//!
//! Driver for a wireless IMU hand controller that streams its orientation
//! and button state over TCP. Provides:
//! - A single-client telemetry server per hand (left: 12345, right: 12346)
//! - A ~200 Hz pose loop fed from the latest decoded sample
//! - Activate/deactivate lifecycle for a tracking host
//! - C FFI for a C++ host shim
//!
//! Wire format, one line per sample:
//! ```text
//! qx,qy,qz,qw;a_click,trigger_click,trigger_value
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use simplecontroller::{ControllerDriver, DriverConfig, Role, TrackedDeviceDriver, TrackingHost};
//! use std::sync::Arc;
//!
//! # fn run(host: Arc<dyn TrackingHost>) -> simplecontroller::Result<()> {
//! let driver = ControllerDriver::new(DriverConfig::for_role(Role::Left), host);
//! driver.activate(1)?;
//! driver.run_frame();
//! println!("pose: {:?}", driver.get_pose());
//! driver.deactivate();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod store;
pub mod server;
pub mod pose;
pub mod net;
pub mod host;
pub mod config;
pub mod driver;
pub mod ffi;

pub use config::DriverConfig;
pub use driver::{ControllerDriver, TrackedDeviceDriver};
pub use error::BridgeError;
pub use host::{SettingsSource, TrackingHost};
pub use server::{ServerConfig, ServerState, TelemetryServer};
pub use store::SampleStore;
pub use types::*;

/// Result type alias for simplecontroller operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
