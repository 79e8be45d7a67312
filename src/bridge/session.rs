use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// State of one bridge run: running TDM count, restart count and the shutdown flag.
#[derive(Debug, Clone)]
pub struct Session {
    count: u64,
    restarts: u64,
    shutdown: Arc<AtomicBool>,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Arc::new(AtomicBool::new(false)))
    }
}

impl Session {
    /// `shutdown` is set (by a signal handler) to stop every loop of the session.
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Session {
            count: 0,
            restarts: 0,
            shutdown,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn record(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    pub fn record_restart(&mut self) {
        self.restarts += 1;
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Totals reported when a pipeline ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub messages: u64,
    pub restarts: u64,
    pub interrupted: bool,
}

impl From<&Session> for Summary {
    fn from(s: &Session) -> Self {
        Summary {
            messages: s.count,
            restarts: s.restarts,
            interrupted: s.is_shutdown(),
        }
    }
}

/// Releases recorded items at their original spacing: an item stamped `t` is released no
/// earlier than `start + (t - first)`. Quick mode releases everything at once.
#[derive(Debug)]
pub struct Pacer {
    quick: bool,
    origin: Option<(Instant, Duration)>,
}

impl Pacer {
    pub fn new(quick: bool) -> Self {
        Pacer { quick, origin: None }
    }

    /// Sleep until the item stamped `at` is due. Returns `false` if shutdown was requested.
    pub fn wait(&mut self, at: Duration, session: &Session) -> bool {
        if self.quick {
            return !session.is_shutdown();
        }
        let (start, first) = *self.origin.get_or_insert_with(|| (Instant::now(), at));
        let due = start + at.saturating_sub(first);
        loop {
            if session.is_shutdown() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            thread::sleep((due - now).min(PACE_SLICE));
        }
    }
}

const PACE_SLICE: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_keeps_spacing() {
        let session = Session::default();
        let mut p = Pacer::new(false);
        let t0 = Instant::now();
        assert!(p.wait(Duration::from_secs(100), &session));
        assert!(p.wait(Duration::from_millis(100_050), &session));
        assert!(t0.elapsed() >= Duration::from_millis(50));
        // earlier than the first item: due immediately
        assert!(p.wait(Duration::from_secs(1), &session));
        session.request_shutdown();
        assert!(!p.wait(Duration::from_secs(200), &session));
        assert!(!Pacer::new(true).wait(Duration::ZERO, &session));
    }

    #[test]
    fn shared_flag_stops_clones() {
        let mut s = Session::default();
        let other = s.clone();
        assert_eq!(s.record(), 1);
        other.request_shutdown();
        assert!(s.is_shutdown());
        let sum = Summary::from(&s);
        assert_eq!(sum, Summary { messages: 1, restarts: 0, interrupted: true });
    }
}
