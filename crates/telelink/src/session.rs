//! # Transport Session
//!
//! The single owner of all uplink state: the link, the latest channel
//! assessment, the profile in effect, delivery statistics, the deferred queue
//! and the packet sequence counter. The foreground send path and the monitor
//! thread share one `Session` behind an `Arc`.
//!
//! ## Locking
//!
//! The command protocol is half-duplex, so every exchange happens under the
//! `link` mutex. A whole assessment or a whole send attempt is one critical
//! section; retry backoff sleeps outside it. When more than one lock is held
//! they are taken in field order: `link`, `channel_state`, `profile`,
//! `stats`, `queue`, `in_flight`.
//!
//! A deferred record being flushed by the monitor sits in `in_flight` until
//! its send settles, so [`Session::drain_queue`] still returns it if shutdown
//! gives up waiting for the monitor mid-flush.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::{Connector, Expect, Terminal};
use crate::codec::{Packet, PacketCodec, Record};
use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::lifecycle::{ConnectionState, Link, ModuleIdentity};
use crate::profile::TransmissionProfile;
use crate::protocol;
use crate::quality::{ChannelState, QualityMonitor, QualityReport};
use crate::queue::{DeferReason, DeferredQueue, PendingItem};
use crate::retry::RetryPolicy;
use crate::stats::TransmissionStats;
use crate::store::TelemetryStore;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered with the given sequence after `attempts` tries.
    Delivered { sequence: u32, attempts: u32 },
    /// Quality too low; the record is in the deferred queue.
    Deferred { quality_score: u8 },
}

/// What one deferred item did during a monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    Delivered { sequence: u32 },
    Deferred,
    Failed,
}

/// Summary of one monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub quality: QualityReport,
    /// `None` when the link was not up far enough to check.
    pub healthy: Option<bool>,
    pub recovered: bool,
    pub flushed: Option<FlushResult>,
}

/// Where a record being sent came from; decides where it is requeued.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Caller,
    Queue(DateTime<Utc>),
}

pub struct Session {
    config: SessionConfig,
    link: Mutex<Link>,
    channel_state: Mutex<ChannelState>,
    profile: Mutex<TransmissionProfile>,
    stats: Mutex<TransmissionStats>,
    queue: Mutex<DeferredQueue>,
    in_flight: Mutex<Option<PendingItem>>,
    codec: PacketCodec,
    quality: QualityMonitor,
    store: Option<Arc<dyn TelemetryStore>>,
}

impl Session {
    pub fn new(config: SessionConfig, store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Session {
            link: Mutex::new(Link::new(&config)),
            channel_state: Mutex::new(ChannelState::default()),
            profile: Mutex::new(TransmissionProfile::default()),
            stats: Mutex::new(TransmissionStats::new()),
            queue: Mutex::new(DeferredQueue::new(config.queue.capacity)),
            in_flight: Mutex::new(None),
            codec: PacketCodec::new(),
            quality: QualityMonitor::new(config.quality.weights, config.timeouts),
            store,
            config,
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Run the full bring-up. Fails with a fatal error kind.
    pub fn bring_up(&self, connector: &dyn Connector) -> Result<()> {
        let device = self.config.serial.device.clone();
        let baud = self.config.serial.baud;
        lock(&self.link).bring_up(connector, &device, baud)?;
        lock(&self.stats).mark_connected(Utc::now());
        Ok(())
    }

    /// Health check; a failure moves the link to `Degraded`.
    pub fn health_check(&self) -> Result<()> {
        lock(&self.link).health_check()
    }

    /// One recovery attempt from `Degraded`.
    pub fn recover(&self) -> Result<()> {
        lock(&self.link).recover()
    }

    /// Close the logical connection, then the transport. Best-effort.
    pub fn close(&self) {
        lock(&self.link).close();
    }

    // ─── Quality ────────────────────────────────────────────────────────

    /// Re-assess the channel and re-tune the profile.
    pub fn assess(&self) -> QualityReport {
        let success_rate = lock(&self.stats).success_rate();
        let report = {
            let mut link = lock(&self.link);
            let mut state = lock(&self.channel_state);
            match link.channel() {
                Ok(channel) => self.quality.assess(channel, &mut state, success_rate),
                Err(_) => self.quality.score(&mut state, success_rate),
            }
        };
        self.retune(&report);
        report
    }

    fn retune(&self, report: &QualityReport) {
        let next = self.config.profiles.select(report.tier);
        let mut current = lock(&self.profile);
        if current.kind != next.kind {
            info!(from = %current.kind, to = %next.kind, "transmission profile changed");
        }
        *current = next;
    }

    // ─── Send ───────────────────────────────────────────────────────────

    /// Assess, then either defer the record or deliver it within the
    /// profile's retry budget.
    pub fn send_sensor_data(&self, record: Record) -> Result<SendOutcome> {
        self.send_record(record, Origin::Caller)
    }

    fn send_record(&self, record: Record, origin: Origin) -> Result<SendOutcome> {
        let report = self.assess();
        let score = report.quality_score;
        if score < self.config.quality.defer_below {
            info!(score, threshold = self.config.quality.defer_below, "quality too low, deferring");
            self.requeue(record, origin, DeferReason::LowQuality(score));
            return Ok(SendOutcome::Deferred {
                quality_score: score,
            });
        }

        let profile = lock(&self.profile).clone();
        let packet = self.codec.encode(&record)?;
        let sequence = packet.sequence();
        debug!(
            sequence,
            bytes = packet.len(),
            profile = %profile.kind,
            "packet built"
        );

        let policy = RetryPolicy::linear(profile.max_retries, profile.retry_delay);
        match policy.run("send", |_| self.attempt_send(&packet, &profile)) {
            Ok(((), attempts)) => {
                lock(&self.stats).record_success(packet.len(), attempts);
                info!(sequence, attempts, bytes = packet.len(), score, "packet delivered");
                self.store(record, sequence, score);
                Ok(SendOutcome::Delivered { sequence, attempts })
            }
            Err(exhausted) => {
                lock(&self.stats).record_failure(exhausted.attempts);
                warn!(
                    sequence,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "packet not delivered"
                );
                if self.config.queue.requeue_failed {
                    self.requeue(record, origin, DeferReason::SendFailed);
                }
                Err(LinkError::SendFailed {
                    sequence,
                    attempts: exhausted.attempts,
                })
            }
        }
    }

    /// One delivery attempt, under the link lock.
    fn attempt_send(&self, packet: &Packet, profile: &TransmissionProfile) -> Result<()> {
        let mut link = lock(&self.link);
        link.ensure_connected()?;
        let conn = link.connection_id();
        let timeouts = *link.timeouts();
        let announce = protocol::send_data(conn, packet.len());

        let prompt = link
            .channel()?
            .exchange_until(&announce, timeouts.command, Expect::Prompt)?;
        if prompt.terminal != Terminal::Prompt {
            // No prompt usually means the connection went away underneath us.
            if let Err(e) = link.health_check() {
                debug!(error = %e, "send prompt refused");
            }
            return Err(LinkError::CommandRejected {
                command: announce,
                reply: prompt.lines.join(" | "),
            });
        }

        let channel = link.channel()?;
        let result = channel.write_payload(packet.as_bytes(), profile.timeout)?;
        if result.terminal != Terminal::SendOk {
            return Err(LinkError::CommandRejected {
                command: announce,
                reply: result.lines.join(" | "),
            });
        }

        if self.config.send.require_ack {
            let status = protocol::send_status(conn);
            let reply = channel.exchange(&status, timeouts.query)?;
            match protocol::parse_send_counters(&reply.lines) {
                Some(c) if c.unacked == 0 => {}
                Some(c) => {
                    return Err(LinkError::CommandRejected {
                        command: status,
                        reply: format!("{} bytes unacknowledged", c.unacked),
                    })
                }
                None => {
                    return Err(LinkError::CommandRejected {
                        command: status,
                        reply: reply.lines.join(" | "),
                    })
                }
            }
        }
        Ok(())
    }

    fn store(&self, mut record: Record, sequence: u32, score: u8) {
        let Some(store) = &self.store else {
            return;
        };
        record.insert("transmission_status".into(), Value::from("success"));
        record.insert("transmission_sequence".into(), Value::from(sequence));
        record.insert("channel_quality".into(), Value::from(score));
        if !store.save(&record) {
            warn!(sequence, "telemetry store refused record");
        }
    }

    // ─── Deferred Queue ─────────────────────────────────────────────────

    fn requeue(&self, record: Record, origin: Origin, reason: DeferReason) {
        let mut queue = lock(&self.queue);
        match origin {
            Origin::Caller => {
                queue.push(PendingItem::new(record, reason));
            }
            Origin::Queue(enqueued_at) => {
                // Already handed out by drain_queue.
                if lock(&self.in_flight).take().is_none() {
                    debug!(?reason, "flushed record was drained, not requeueing");
                    return;
                }
                queue.push_front(PendingItem {
                    record,
                    enqueued_at,
                    reason,
                });
            }
        }
        debug!(depth = queue.len(), ?reason, "record queued");
    }

    /// Queue a record for the monitor to send later.
    pub fn enqueue(&self, record: Record, reason: DeferReason) {
        self.requeue(record, Origin::Caller, reason);
    }

    /// Put previously drained items back, e.g. after a restart.
    pub fn restore(&self, items: Vec<PendingItem>) {
        let mut queue = lock(&self.queue);
        for item in items {
            queue.push(item);
        }
    }

    /// Take every queued item, including one the monitor is flushing.
    pub fn drain_queue(&self) -> Vec<PendingItem> {
        let mut queue = lock(&self.queue);
        let mut items = Vec::with_capacity(queue.len() + 1);
        items.extend(lock(&self.in_flight).take());
        items.extend(queue.drain());
        items
    }

    /// Items waiting in the queue, not counting one being flushed.
    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn queue_dropped(&self) -> u64 {
        lock(&self.queue).dropped()
    }

    // ─── Monitor Tick ───────────────────────────────────────────────────

    /// Assess, check health (recovering if needed), then flush at most one
    /// deferred item. Never fails; problems are logged.
    pub fn monitor_tick(&self) -> TickOutcome {
        let quality = self.assess();

        let (healthy, recovered) = {
            let mut link = lock(&self.link);
            if !link.state().is_attached() {
                (None, false)
            } else {
                let healthy = link.health_check().is_ok()
                    && link.state() != ConnectionState::Degraded;
                let recovered = if healthy {
                    false
                } else {
                    match link.recover() {
                        Ok(()) => {
                            info!("link recovered");
                            true
                        }
                        Err(e) => {
                            warn!(error = %e, "recovery failed, will retry next tick");
                            false
                        }
                    }
                };
                (Some(healthy), recovered)
            }
        };

        let mut flushed = None;
        if quality.quality_score > self.config.quality.flush_above {
            let next = {
                let mut queue = lock(&self.queue);
                let item = queue.pop_front();
                *lock(&self.in_flight) = item.clone();
                item
            };
            if let Some(item) = next {
                info!(
                    score = quality.quality_score,
                    remaining = self.queue_len(),
                    "flushing deferred record"
                );
                flushed = Some(
                    match self.send_record(item.record, Origin::Queue(item.enqueued_at)) {
                        Ok(SendOutcome::Delivered { sequence, .. }) => {
                            FlushResult::Delivered { sequence }
                        }
                        Ok(SendOutcome::Deferred { .. }) => FlushResult::Deferred,
                        Err(e) => {
                            warn!(error = %e, "deferred record not delivered");
                            FlushResult::Failed
                        }
                    },
                );
                let _queue = lock(&self.queue);
                lock(&self.in_flight).take();
            }
        }

        TickOutcome {
            quality,
            healthy,
            recovered,
            flushed,
        }
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state()
    }

    pub fn identity(&self) -> ModuleIdentity {
        lock(&self.link).identity().clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        lock(&self.channel_state).clone()
    }

    pub fn profile(&self) -> TransmissionProfile {
        lock(&self.profile).clone()
    }

    pub fn stats(&self) -> TransmissionStats {
        lock(&self.stats).clone()
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u32 {
        self.codec.peek_sequence()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("queue", &self.queue_len())
            .field("next_sequence", &self.next_sequence())
            .finish()
    }
}
