//! Process-wide relay counters.
//!
//! Only counts and coarse sizes are recorded here, never relayed content.

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservabilityLevel {
    OBS_NONE,
    OBS_SAFE,
    OBS_DEV,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    FRAMING,
    UNKNOWN_MESSAGE,
    UNIMPLEMENTED_RESEED,
    SOCKET_IO,
    CONFIG,
    CHANNEL_BUSY,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    OK,
    DEGRADED,
    FAULTED,
}

#[cfg(feature = "obs_none")]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_NONE;

#[cfg(all(feature = "obs_dev", not(feature = "obs_none")))]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_DEV;

#[cfg(all(not(feature = "obs_none"), not(feature = "obs_dev")))]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_SAFE;

pub const OBS_NONE: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_NONE);
pub const OBS_DEV: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_DEV);

use std::sync::atomic::{AtomicU64, Ordering};

const ERROR_CLASSES: usize = 6;
static ERROR_CLASS_COUNT: [AtomicU64; ERROR_CLASSES] = [const { AtomicU64::new(0) }; ERROR_CLASSES];
static HEALTH_STATE: AtomicU64 = AtomicU64::new(HealthState::OK as u64);

#[inline]
pub fn record_error(class: ErrorClass) {
    if OBS_NONE {
        return;
    }
    ERROR_CLASS_COUNT[class as usize].fetch_add(1, Ordering::Relaxed);
    if matches!(class, ErrorClass::SOCKET_IO) {
        set_health(HealthState::DEGRADED);
    }
}

#[inline]
pub fn set_health(state: HealthState) {
    HEALTH_STATE.store(state as u64, Ordering::Relaxed);
}

#[inline]
fn get_health() -> HealthState {
    match HEALTH_STATE.load(Ordering::Relaxed) {
        x if x == HealthState::OK as u64 => HealthState::OK,
        x if x == HealthState::DEGRADED as u64 => HealthState::DEGRADED,
        _ => HealthState::FAULTED,
    }
}

static TOTAL_CONNECTIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static TOTAL_CONNECTIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static FRAMES_SENT: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);

const BYTE_BUCKETS: usize = 21;
static BYTES_SENT_COARSE: [AtomicU64; BYTE_BUCKETS] = [const { AtomicU64::new(0) }; BYTE_BUCKETS];
static BYTES_RECEIVED_COARSE: [AtomicU64; BYTE_BUCKETS] =
    [const { AtomicU64::new(0) }; BYTE_BUCKETS];

#[inline]
pub fn record_connection_opened() {
    if !OBS_NONE {
        TOTAL_CONNECTIONS_OPENED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_connection_closed() {
    if !OBS_NONE {
        TOTAL_CONNECTIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
    }
}

/// One frame written to the tunnel socket carrying `byte_len` payload bytes.
#[inline]
pub fn record_frame_sent(byte_len: usize) {
    if OBS_NONE {
        return;
    }
    FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
    BYTES_SENT_COARSE[coarse_bucket_index(byte_len)].fetch_add(1, Ordering::Relaxed);
}

/// One frame extracted from the tunnel socket carrying `byte_len` payload bytes.
#[inline]
pub fn record_frame_received(byte_len: usize) {
    if OBS_NONE {
        return;
    }
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
    BYTES_RECEIVED_COARSE[coarse_bucket_index(byte_len)].fetch_add(1, Ordering::Relaxed);
}

// Bucket i holds sizes in [2^i, 2^(i+1)); zero gets its own bucket.
#[inline]
const fn coarse_bucket_index(byte_len: usize) -> usize {
    if byte_len == 0 {
        return 0;
    }
    let mut v = byte_len;
    let mut idx: usize = 0;
    while v > 1 && idx + 1 < BYTE_BUCKETS {
        v >>= 1;
        idx += 1;
    }
    idx
}

#[derive(Debug, Clone)]
pub struct ObservabilitySnapshot {
    pub total_connections_opened: u64,
    pub total_connections_closed: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent_coarse: [u64; BYTE_BUCKETS],
    pub bytes_received_coarse: [u64; BYTE_BUCKETS],
    pub errors: [u64; ERROR_CLASSES],
    pub health: HealthState,
}

impl ObservabilitySnapshot {
    pub fn errors_of(&self, class: ErrorClass) -> u64 {
        self.errors[class as usize]
    }
}

pub fn snapshot() -> ObservabilitySnapshot {
    ObservabilitySnapshot {
        total_connections_opened: TOTAL_CONNECTIONS_OPENED.load(Ordering::Relaxed),
        total_connections_closed: TOTAL_CONNECTIONS_CLOSED.load(Ordering::Relaxed),
        frames_sent: FRAMES_SENT.load(Ordering::Relaxed),
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        bytes_sent_coarse: BYTES_SENT_COARSE.each_ref().map(|c| c.load(Ordering::Relaxed)),
        bytes_received_coarse: BYTES_RECEIVED_COARSE.each_ref().map(|c| c.load(Ordering::Relaxed)),
        errors: ERROR_CLASS_COUNT.each_ref().map(|c| c.load(Ordering::Relaxed)),
        health: get_health(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_log2() {
        assert_eq!(coarse_bucket_index(0), 0);
        assert_eq!(coarse_bucket_index(1), 0);
        assert_eq!(coarse_bucket_index(2), 1);
        assert_eq!(coarse_bucket_index(1023), 9);
        assert_eq!(coarse_bucket_index(1024), 10);
        assert_eq!(coarse_bucket_index(usize::MAX), BYTE_BUCKETS - 1);
    }

    #[cfg(not(feature = "obs_none"))]
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        record_frame_sent(100);
        record_error(ErrorClass::CONFIG);
        let after = snapshot();
        assert!(after.frames_sent > before.frames_sent);
        assert!(after.bytes_sent_coarse[6] > before.bytes_sent_coarse[6]);
        assert!(after.errors_of(ErrorClass::CONFIG) > before.errors_of(ErrorClass::CONFIG));
    }
}
