use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-acceptor channel and byte counters.
pub struct TunnelStats {
    pub active_tunnels: AtomicU32,
    pub total_tunnels: AtomicU64,
    pub failed_tunnels: AtomicU64,
    pub rejected_tunnels: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl TunnelStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active_tunnels: AtomicU32::new(0),
            total_tunnels: AtomicU64::new(0),
            failed_tunnels: AtomicU64::new(0),
            rejected_tunnels: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        })
    }

    pub fn tunnel_started(&self) {
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
        self.total_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// `bytes_in` counts tunnel-side reads, `bytes_out` service-side reads.
    pub fn tunnel_closed(&self, bytes_in: u64, bytes_out: u64, failed: bool) {
        self.active_tunnels.fetch_sub(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        if failed {
            self.failed_tunnels.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A connection dropped before relaying because its peer's channel stayed busy.
    pub fn tunnel_rejected(&self) {
        self.rejected_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u32 {
        self.active_tunnels.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total_tunnels.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed_tunnels.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_tunnels.load(Ordering::Relaxed)
    }

    pub fn log_stats(&self) {
        let bytes_in = self.bytes_in.load(Ordering::Relaxed);
        let bytes_out = self.bytes_out.load(Ordering::Relaxed);

        tracing::info!(
            active = self.active(),
            total = self.total(),
            failed = self.failed(),
            rejected = self.rejected(),
            "[stats] bytes_in={:.1}MB bytes_out={:.1}MB",
            bytes_in as f64 / 1_048_576.0,
            bytes_out as f64 / 1_048_576.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_open_and_close() {
        let stats = TunnelStats::new();
        stats.tunnel_started();
        stats.tunnel_started();
        assert_eq!(stats.active(), 2);
        stats.tunnel_closed(10, 20, false);
        stats.tunnel_closed(1, 2, true);
        stats.tunnel_rejected();
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.bytes_in.load(Ordering::Relaxed), 11);
        assert_eq!(stats.bytes_out.load(Ordering::Relaxed), 22);
    }
}
