//! # Background Monitor
//!
//! A named thread that calls [`Session::monitor_tick`] on a fixed interval
//! until stopped. Stopping is explicit and bounded: the thread is signalled,
//! then joined only if it confirms exit within the join timeout.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::session::Session;

pub struct MonitorHandle {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Start ticking every `interval`. The first tick happens one interval
    /// after start.
    pub fn spawn(session: Arc<Session>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("telelink-monitor".into())
            .spawn(move || {
                monitor_worker(session, interval, stop_rx);
                let _ = done_tx.send(());
            })?;
        info!(interval_ms = interval.as_millis() as u64, "monitor started");
        Ok(MonitorHandle {
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait up to `timeout` for it to finish.
    ///
    /// Returns `false` if the thread did not exit in time; it is then
    /// detached. A tick in progress is never interrupted.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(stop_tx) = self.stop_tx.take() else {
            return true;
        };
        let _ = stop_tx.send(());
        drop(stop_tx);
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                info!("monitor stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "monitor did not stop in time");
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(5));
    }
}

fn monitor_worker(session: Arc<Session>, interval: Duration, stop_rx: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                let outcome = session.monitor_tick();
                debug!(
                    score = outcome.quality.quality_score,
                    tier = %outcome.quality.tier,
                    healthy = ?outcome.healthy,
                    recovered = outcome.recovered,
                    flushed = ?outcome.flushed,
                    queue = session.queue_len(),
                    "monitor tick"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::sim::SimModem;

    #[test]
    fn ticks_until_stopped() {
        let modem = SimModem::new();
        let mut cfg = SessionConfig::default();
        cfg.timeouts.query = Duration::from_millis(50);
        cfg.timeouts.poll = Duration::from_millis(1);
        let session = Arc::new(Session::new(cfg, None));
        session.bring_up(&modem.connector()).unwrap();
        let before = modem.count_commands("AT+CSQ");

        let mut monitor = MonitorHandle::spawn(session, Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(monitor.is_running());
        assert!(monitor.stop(Duration::from_secs(2)));
        assert!(!monitor.is_running());

        let after = modem.count_commands("AT+CSQ");
        assert!(after > before);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(modem.count_commands("AT+CSQ"), after);
    }

    #[test]
    fn stop_twice_is_harmless() {
        let session = Arc::new(Session::new(SessionConfig::default(), None));
        let mut monitor = MonitorHandle::spawn(session, Duration::from_secs(60)).unwrap();
        assert!(monitor.stop(Duration::from_secs(1)));
        assert!(monitor.stop(Duration::from_secs(1)));
    }
}
