use std::fmt;

use crate::protocol::ProtocolError;

/// Errors surfaced by the controller bridge.
///
/// The telemetry and pose threads never return these; they log and recover.
/// Only lifecycle calls and constructors report failures to the caller.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Driver is already active")]
    AlreadyActive,

    #[error("Driver is not active")]
    NotActive,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Invalid controller role: {0}")]
    InvalidRole(i32),

    #[error("Null pointer passed for {0}")]
    NullPointer(&'static str),
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &BridgeError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
