//! # Uplink
//!
//! Public entry point: brings a [`Session`] up, runs the monitor beside it and
//! tears both down in order.
//!
//! ```no_run
//! use telelink::{sim::SimModem, SessionConfig, Uplink};
//!
//! let modem = SimModem::new();
//! let mut uplink = Uplink::start(SessionConfig::default(), &modem.connector(), None)?;
//! uplink.send(&serde_json::json!({ "temperature": 21.5 }))?;
//! let leftover = uplink.shutdown();
//! # Ok::<(), telelink::LinkError>(())
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::channel::Connector;
use crate::codec;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::monitor::MonitorHandle;
use crate::queue::PendingItem;
use crate::session::{SendOutcome, Session};
use crate::store::TelemetryStore;

pub struct Uplink {
    session: Arc<Session>,
    monitor: Option<MonitorHandle>,
    closed: bool,
}

impl Uplink {
    /// Bring the link up and start the monitor. Fails only with the fatal
    /// kinds ([`crate::LinkError::is_fatal`]); the transport is closed again
    /// before returning the error.
    pub fn start(
        config: SessionConfig,
        connector: &dyn Connector,
        store: Option<Arc<dyn TelemetryStore>>,
    ) -> Result<Self> {
        Self::start_with_backlog(config, connector, store, Vec::new())
    }

    /// As [`Uplink::start`], seeding the deferred queue with items left over
    /// from a previous run.
    pub fn start_with_backlog(
        config: SessionConfig,
        connector: &dyn Connector,
        store: Option<Arc<dyn TelemetryStore>>,
        backlog: Vec<PendingItem>,
    ) -> Result<Self> {
        let monitor_cfg = config.monitor;
        let session = Arc::new(Session::new(config, store));
        if !backlog.is_empty() {
            info!(items = backlog.len(), "restoring deferred backlog");
            session.restore(backlog);
        }

        if let Err(e) = session.bring_up(connector) {
            session.close();
            return Err(e);
        }
        let report = session.assess();
        info!(
            score = report.quality_score,
            tier = %report.tier,
            profile = %session.profile().kind,
            max_score = session.config().quality.weights.max_score(),
            "uplink ready"
        );

        let monitor = if monitor_cfg.enabled {
            match MonitorHandle::spawn(session.clone(), monitor_cfg.interval) {
                Ok(m) => Some(m),
                Err(e) => {
                    session.close();
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Uplink {
            session,
            monitor,
            closed: false,
        })
    }

    /// Serialize `value` into a record and send it.
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<SendOutcome> {
        let record = codec::to_record(value)?;
        self.session.send_sensor_data(record)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Stop the monitor, close the logical connection, close the transport.
    ///
    /// Returns whatever is still queued. Later calls return nothing.
    pub fn shutdown(&mut self) -> Vec<PendingItem> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        if let Some(mut monitor) = self.monitor.take() {
            let join_timeout = self.session.config().monitor.join_timeout;
            if !monitor.stop(join_timeout) {
                warn!("closing link with monitor still running");
            }
        }
        self.session.close();
        let pending = self.session.drain_queue();
        info!(pending = pending.len(), "uplink shut down");
        pending
    }
}

impl Drop for Uplink {
    fn drop(&mut self) {
        let pending = self.shutdown();
        if !pending.is_empty() {
            warn!(items = pending.len(), "deferred records discarded at drop");
        }
    }
}
