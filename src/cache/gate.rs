//! Degradation gate: whether the facade talks to its backend at all

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{info, warn};

/// Why the gate is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisableReason {
    /// No backend was installed for this instance
    NotInstalled,
    /// The connect attempt or handshake failed
    ConnectFailed,
    /// The host switched the facade off
    Forced,
}

impl DisableReason {
    fn to_u8(self) -> u8 {
        match self {
            DisableReason::NotInstalled => 1,
            DisableReason::ConnectFailed => 2,
            DisableReason::Forced => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DisableReason::NotInstalled),
            2 => Some(DisableReason::ConnectFailed),
            3 => Some(DisableReason::Forced),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisableReason::NotInstalled => write!(f, "backend not installed"),
            DisableReason::ConnectFailed => write!(f, "connect failed"),
            DisableReason::Forced => write!(f, "disabled by host"),
        }
    }
}

/// Process-lifetime enabled/connected state of one facade
///
/// Transitions happen at connect time or when the host forces them. A failing
/// store call never closes the gate; that decision is made per call.
#[derive(Debug)]
pub struct DegradationGate {
    enabled: AtomicBool,
    connected: AtomicBool,
    reason: AtomicU8,
}

impl DegradationGate {
    /// Gate for a facade whose backend handshake succeeded
    pub fn connected() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            reason: AtomicU8::new(0),
        }
    }

    /// Closed gate for a facade that never reached its backend
    pub fn disabled(reason: DisableReason) -> Self {
        warn!("Cache disabled: {}", reason);
        Self {
            enabled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            reason: AtomicU8::new(reason.to_u8()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Reason for the last close, `None` while enabled
    pub fn disable_reason(&self) -> Option<DisableReason> {
        if self.is_enabled() {
            None
        } else {
            DisableReason::from_u8(self.reason.load(Ordering::SeqCst))
        }
    }

    /// Host override; returns the resulting enabled state
    ///
    /// Re-enabling only works for a gate that once connected.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        if enabled && !self.is_connected() {
            warn!("Refusing to enable a cache that never connected");
            return false;
        }

        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.reason.store(0, Ordering::SeqCst);
            info!("Cache enabled by host");
        } else {
            self.reason.store(DisableReason::Forced.to_u8(), Ordering::SeqCst);
            info!("Cache disabled by host");
        }
        enabled
    }
}
