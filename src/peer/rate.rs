use std::time::Duration;

/// Exponentially smoothed transfer-rate meter, in bytes per second.
///
/// Bytes are accumulated as transfers happen; the choke scheduler calls
/// [`RateMeter::sample`] once per tick, folding the accumulated count into
/// the running estimate over a window of `window` ticks. A larger window
/// means a smoother, slower-reacting rate.
#[derive(Debug, Clone)]
pub struct RateMeter {
    pending: u64,
    rate: f64,
    window: u32,
}

impl RateMeter {
    pub fn new(window: u32) -> Self {
        Self {
            pending: 0,
            rate: 0.0,
            window: window.max(1),
        }
    }

    /// Records `bytes` transferred since the last sample.
    pub fn record(&mut self, bytes: u64) {
        self.pending = self.pending.saturating_add(bytes);
    }

    /// Folds the bytes accumulated over `elapsed` into the estimate.
    pub fn sample(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let instant = self.pending as f64 / secs;
        self.pending = 0;
        self.rate += (instant - self.rate) / self.window as f64;
    }

    /// Current smoothed estimate, bytes/sec.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Forgets all history; used when a peer disconnects.
    pub fn reset(&mut self) {
        self.pending = 0;
        self.rate = 0.0;
    }
}
