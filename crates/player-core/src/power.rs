//! Power and peripheral signals polled by the playback loop.

use std::sync::atomic::{AtomicBool, Ordering};

/// Events raised since the previous poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerEvents {
    pub headset_unplugged: bool,
    pub sleep_pending: bool,
}

/// Edge-triggered source of power events; each event is reported once.
pub trait PowerSignals: Send + Sync {
    fn poll(&self) -> PowerEvents;
}

/// No power management on this host.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPowerSignals;

impl PowerSignals for NoPowerSignals {
    fn poll(&self) -> PowerEvents {
        PowerEvents::default()
    }
}

/// Flags raised by the host application and consumed by the playback loop.
#[derive(Debug, Default)]
pub struct SharedPowerSignals {
    headset_unplugged: AtomicBool,
    sleep_pending: AtomicBool,
}

impl SharedPowerSignals {
    pub fn notify_headset_unplugged(&self) {
        self.headset_unplugged.store(true, Ordering::Release);
    }

    pub fn notify_sleep_pending(&self) {
        self.sleep_pending.store(true, Ordering::Release);
    }
}

impl PowerSignals for SharedPowerSignals {
    fn poll(&self) -> PowerEvents {
        PowerEvents {
            headset_unplugged: self.headset_unplugged.swap(false, Ordering::AcqRel),
            sleep_pending: self.sleep_pending.swap(false, Ordering::AcqRel),
        }
    }
}
