//! Progress ticker
//!
//! A background thread that samples wall-clock elapsed time at a fixed
//! interval and reports it to the session controller. Every ticker carries a
//! generation id; the controller drops ticks from any generation but the
//! current one, so nothing changes state after a ticker is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::Result;
use crate::session::SessionEvent;

/// Cancellable periodic elapsed-time reporter
pub struct ProgressTicker {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    /// Start ticking every `interval` until `total` seconds have elapsed or
    /// the ticker is cancelled
    pub fn spawn(
        generation: u64,
        interval: Duration,
        total: f64,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let handle = thread::Builder::new()
            .name(format!("mixdown-ticker-{}", generation))
            .spawn(move || {
                let started = Instant::now();
                let mut next = started;
                loop {
                    next += interval;
                    // park until the next tick, waking early on cancel
                    loop {
                        if flag.load(Ordering::SeqCst) {
                            return;
                        }
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::park_timeout(next - now);
                    }

                    let elapsed = started.elapsed().as_secs_f64();
                    if events.send(SessionEvent::Tick { generation, elapsed }).is_err() {
                        return;
                    }
                    if elapsed >= total {
                        return;
                    }
                }
            })?;

        debug!(
            "Ticker {} started ({} ms, total {:.3}s)",
            generation,
            interval.as_millis(),
            total
        );
        Ok(Self {
            generation,
            cancelled,
            handle: Some(handle),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the thread has exited or been cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the thread and wait for it to exit
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
            debug!("Ticker {} cancelled", self.generation);
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_ticks_until_total() {
        let (tx, rx) = channel();
        let _ticker = ProgressTicker::spawn(7, Duration::from_millis(5), 0.03, tx).unwrap();

        let mut last = 0.0;
        let mut count = 0;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            match event {
                SessionEvent::Tick { generation, elapsed } => {
                    assert_eq!(generation, 7);
                    assert!(elapsed >= last);
                    last = elapsed;
                    count += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(count >= 1);
        assert!(last >= 0.03);
    }

    #[test]
    fn test_cancel_is_prompt_and_silences() {
        let (tx, rx) = channel();
        let mut ticker = ProgressTicker::spawn(1, Duration::from_secs(60), 1000.0, tx).unwrap();
        let started = Instant::now();
        ticker.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ticker.is_finished());
        assert!(rx.try_recv().is_err());
    }
}
