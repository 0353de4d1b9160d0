//! Scoped network-stack ownership.
//!
//! The standard library brings up the platform socket library on first use
//! (Winsock on Windows, nothing on Unix), so there is no explicit startup
//! call to make here. What the driver still needs is a guard whose lifetime
//! marks "sockets may be in use": acquired when a driver activates, released
//! when it deactivates. Two driver instances (left and right) share the
//! process, so the guard is reference counted.

use std::sync::atomic::{AtomicUsize, Ordering};

static USERS: AtomicUsize = AtomicUsize::new(0);

/// Held by an active driver for as long as its telemetry socket may exist.
#[derive(Debug)]
pub struct NetworkStack {
    _private: (),
}

impl NetworkStack {
    pub fn acquire() -> NetworkStack {
        let prev = USERS.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            log::debug!("Network stack acquired");
        }
        NetworkStack { _private: () }
    }

    /// Number of live guards in this process.
    pub fn users() -> usize {
        USERS.load(Ordering::Acquire)
    }
}

impl Drop for NetworkStack {
    fn drop(&mut self) {
        if USERS.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::debug!("Network stack released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_users() {
        // Other tests may hold guards concurrently; only check our own delta.
        let a = NetworkStack::acquire();
        let b = NetworkStack::acquire();
        assert!(NetworkStack::users() >= 2);
        drop(a);
        drop(b);
    }
}
