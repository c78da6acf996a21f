//! Observability and Metrics
//!
//! Counters describing a running Herald server. Each [`Server`] owns its own
//! [`Metrics`], so several servers in one process (as in tests) never share
//! counts.
//!
//! [`Server`]: crate::server::Server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Monotonic (or gauge, with [`Counter::decr`]) atomic count
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn decr(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for one server
#[derive(Debug)]
pub struct Metrics {
    pub connections_accepted: Counter,
    /// Gauge of sockets currently being served
    pub connections_open: Counter,
    pub links_identified: Counter,
    /// Identifications refused: bad line, wrong secret, timeout, duplicate nid, busy
    pub identifications_rejected: Counter,
    pub packages_received: Counter,
    pub bytes_received: Counter,
    /// Readdressed copies queued for a recipient
    pub packages_forwarded: Counter,
    /// Packages that resolved to nobody
    pub packages_dropped: Counter,
    pub delivery_failures: Counter,
    pub malformed_packages: Counter,
    pub connection_errors: Counter,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: Counter::default(),
            connections_open: Counter::default(),
            links_identified: Counter::default(),
            identifications_rejected: Counter::default(),
            packages_received: Counter::default(),
            bytes_received: Counter::default(),
            packages_forwarded: Counter::default(),
            packages_dropped: Counter::default(),
            delivery_failures: Counter::default(),
            malformed_packages: Counter::default(),
            connection_errors: Counter::default(),
            started: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.incr();
        self.connections_open.incr();
    }

    pub fn connection_closed(&self) {
        self.connections_open.decr();
    }

    /// Record a package read from a link and its frame size
    pub fn package_received(&self, frame_len: u64) {
        self.packages_received.incr();
        self.bytes_received.add(frame_len);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.get(),
            connections_open: self.connections_open.get(),
            links_identified: self.links_identified.get(),
            identifications_rejected: self.identifications_rejected.get(),
            packages_received: self.packages_received.get(),
            bytes_received: self.bytes_received.get(),
            packages_forwarded: self.packages_forwarded.get(),
            packages_dropped: self.packages_dropped.get(),
            delivery_failures: self.delivery_failures.get(),
            malformed_packages: self.malformed_packages.get(),
            connection_errors: self.connection_errors.get(),
            uptime: self.started.elapsed().as_secs(),
        }
    }

    /// Emit the current counts as one structured event
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            accepted = s.connections_accepted,
            open = s.connections_open,
            identified = s.links_identified,
            rejected = s.identifications_rejected,
            received = s.packages_received,
            bytes = s.bytes_received,
            forwarded = s.packages_forwarded,
            dropped = s.packages_dropped,
            delivery_failures = s.delivery_failures,
            malformed = s.malformed_packages,
            connection_errors = s.connection_errors,
            uptime_secs = s.uptime,
            "Herald metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_open: u64,
    pub links_identified: u64,
    pub identifications_rejected: u64,
    pub packages_received: u64,
    pub bytes_received: u64,
    pub packages_forwarded: u64,
    pub packages_dropped: u64,
    pub delivery_failures: u64,
    pub malformed_packages: u64,
    pub connection_errors: u64,
    /// Seconds since the server was created
    pub uptime: u64,
}

/// Logs how long a scope took when dropped
pub struct Timer {
    started: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            started: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Timed"
        );
    }
}
