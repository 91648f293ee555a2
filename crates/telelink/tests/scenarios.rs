//! # End-to-end scenarios against the simulated module
//!
//! Every test brings a full session up over [`SimModem`] with millisecond
//! timeouts and zero backoff, then drives sends and monitor ticks directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use telelink::codec;
use telelink::config::TimeoutConfig;
use telelink::quality::RecommendedAction;
use telelink::queue::DeferReason;
use telelink::session::FlushResult;
use telelink::sim::{SimModem, TRANSPORT_CLOSED};
use telelink::{
    ConnectionState, LinkError, MemoryStore, PendingItem, QualityTier, SendOutcome,
    SessionConfig, TelemetryStore, Uplink,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn fast_config() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.timeouts = TimeoutConfig {
        probe: Duration::from_millis(100),
        query: Duration::from_millis(100),
        command: Duration::from_millis(100),
        activate: Duration::from_millis(100),
        open: Duration::from_millis(100),
        poll: Duration::from_millis(1),
    };
    cfg.lifecycle.attach_backoff = Duration::ZERO;
    cfg.lifecycle.connect_backoff = Duration::ZERO;
    cfg.lifecycle.reactivate_pause = Duration::ZERO;
    cfg.monitor.enabled = false;
    cfg.monitor.join_timeout = Duration::from_secs(2);
    for p in cfg.profiles.iter_mut() {
        p.max_retries = 3;
        p.retry_delay = Duration::ZERO;
        p.timeout = Duration::from_millis(50);
    }
    cfg
}

/// `RUST_LOG=telelink=debug cargo test` shows every command exchange.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(modem: &SimModem) -> Uplink {
    init_logging();
    Uplink::start(fast_config(), &modem.connector(), None).unwrap()
}

fn reading(n: i64) -> serde_json::Value {
    json!({
        "device_id": "EC800X_001",
        "sensor_type": "environment_monitor",
        "reading": n,
        "status": "normal",
    })
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ─── Quality ────────────────────────────────────────────────────────────────

#[test]
fn mid_signal_without_history_scores_poor_and_defers() {
    let modem = SimModem::new();
    modem.set_signal(15, 0);
    let uplink = start(&modem);

    let report = uplink.session().assess();
    assert_eq!(report.signal_level, 15);
    assert_eq!(report.signal_quality, 48);
    assert_eq!(report.quality_score, 33);
    assert_eq!(report.tier, QualityTier::Poor);
    assert_eq!(report.action, RecommendedAction::Defer);
}

#[test]
fn unparseable_signal_keeps_previous_level() {
    let modem = SimModem::new();
    modem.set_signal(20, 1);
    let uplink = start(&modem);
    uplink.session().assess();

    modem.garble_signal(true);
    modem.set_registration(5);
    let report = uplink.session().assess();
    assert_eq!(report.signal_level, 20);
    assert_eq!(report.bit_error, 1);
    assert_eq!(
        report.registration,
        Some(telelink::protocol::Registration::Roaming)
    );
}

// ─── Send Engine ────────────────────────────────────────────────────────────

#[test]
fn low_quality_send_is_queued_without_touching_the_transport() {
    let modem = SimModem::new();
    modem.set_signal(5, 0);
    let uplink = start(&modem);

    let outcome = uplink.send(&reading(1)).unwrap();
    assert!(matches!(outcome, SendOutcome::Deferred { quality_score } if quality_score < 30));
    assert_eq!(modem.count_commands("AT+QISEND"), 0);
    assert_eq!(uplink.session().queue_len(), 1);
    assert_eq!(uplink.session().stats().packets_attempted, 0);
    assert_eq!(uplink.session().next_sequence(), 0);
}

#[test]
fn two_timeouts_then_success() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    modem.drop_sends(2);

    let outcome = uplink.send(&reading(1)).unwrap();
    assert_eq!(outcome, SendOutcome::Delivered { sequence: 0, attempts: 3 });

    let stats = uplink.session().stats();
    assert_eq!(stats.packets_attempted, 1);
    assert_eq!(stats.packets_succeeded, 1);
    assert_eq!(stats.packets_failed, 0);
    assert_eq!(stats.retransmissions, 2);
    assert_eq!(modem.payloads().len(), 1);
}

#[test]
fn exhausted_retries_count_one_failure() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    modem.drop_sends(3);

    let err = uplink.send(&reading(1)).unwrap_err();
    assert!(matches!(err, LinkError::SendFailed { sequence: 0, attempts: 3 }));
    assert!(!err.is_fatal());

    let stats = uplink.session().stats();
    assert_eq!(stats.packets_attempted, 1);
    assert_eq!(stats.packets_failed, 1);
    assert_eq!(stats.retransmissions, 2);

    let queued = uplink.session().drain_queue();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].reason, DeferReason::SendFailed);
}

#[test]
fn failed_sends_are_not_requeued_when_disabled() {
    let modem = SimModem::new();
    let mut cfg = fast_config();
    cfg.queue.requeue_failed = false;
    let uplink = Uplink::start(cfg, &modem.connector(), None).unwrap();
    modem.fail_sends(3);
    assert!(uplink.send(&reading(1)).is_err());
    assert_eq!(uplink.session().queue_len(), 0);
}

#[test]
fn sequences_increase_across_sends() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    for n in 0..4 {
        uplink.send(&reading(n)).unwrap();
    }
    let sequences: Vec<u32> = modem
        .payloads()
        .iter()
        .map(|p| codec::decode(p).unwrap().sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
}

#[test]
fn awkward_floats_arrive_bit_exact() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    let values = [
        1.0715660391465826e-75,
        0.1,
        -2.5e-308,
        5e-324,
        f64::MIN_POSITIVE,
        f64::MAX,
        1013.2500000000001,
        3.7290000000000005,
    ];
    let record = json!({ "values": values });
    uplink.send(&record).unwrap();

    let decoded = codec::decode(&modem.payloads()[0]).unwrap();
    let got: Vec<f64> = decoded.record["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    for (sent, got) in values.iter().zip(&got) {
        assert_eq!(sent.to_bits(), got.to_bits(), "{sent:e} came back as {got:e}");
    }
}

#[test]
fn non_map_values_are_rejected_before_sending() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    let err = uplink.send(&42).unwrap_err();
    assert!(matches!(err, LinkError::Encoding(_)));
    assert_eq!(modem.count_commands("AT+QISEND"), 0);
    assert_eq!(uplink.session().stats().packets_attempted, 0);
}

#[test]
fn store_receives_annotated_records() {
    let modem = SimModem::new();
    let store = Arc::new(MemoryStore::new());
    let uplink = Uplink::start(
        fast_config(),
        &modem.connector(),
        Some(store.clone() as Arc<dyn TelemetryStore>),
    )
    .unwrap();
    uplink.send(&reading(7)).unwrap();
    let saved = store.records();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["reading"], 7);
    assert_eq!(saved[0]["transmission_status"], "success");
    assert_eq!(saved[0]["transmission_sequence"], 0);
}

// ─── Health & Recovery ──────────────────────────────────────────────────────

#[test]
fn inactive_context_degrades_and_recovers_without_reattaching() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    let session = uplink.session();
    assert_eq!(modem.count_commands("AT+QICSGP"), 1);

    modem.set_context_active(false);
    let err = session.health_check().unwrap_err();
    assert!(matches!(err, LinkError::HealthCheckFailed(_)));
    assert_eq!(session.state(), ConnectionState::Degraded);

    session.recover().unwrap();
    assert_eq!(session.state(), ConnectionState::TransportConnected);
    assert_eq!(modem.count_commands("AT+QICSGP"), 1);
    assert_eq!(modem.count_commands("ATE0"), 1);
    assert!(modem.socket_connected());
}

#[test]
fn monitor_tick_recovers_dropped_socket() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    modem.drop_socket();

    let tick = uplink.session().monitor_tick();
    assert_eq!(tick.healthy, Some(false));
    assert!(tick.recovered);
    assert_eq!(uplink.session().state(), ConnectionState::TransportConnected);
}

#[test]
fn failed_recovery_is_retried_next_tick() {
    let modem = SimModem::new();
    let uplink = start(&modem);
    modem.drop_socket();
    modem.fail_opens(1);

    let first = uplink.session().monitor_tick();
    assert!(!first.recovered);
    assert_eq!(uplink.session().state(), ConnectionState::Degraded);

    let second = uplink.session().monitor_tick();
    assert!(second.recovered);
    assert_eq!(uplink.session().state(), ConnectionState::TransportConnected);
}

// ─── Deferred Queue ─────────────────────────────────────────────────────────

#[test]
fn recovered_quality_flushes_one_item_per_tick() {
    let modem = SimModem::new();
    modem.set_signal(5, 0);
    let uplink = start(&modem);
    let session = uplink.session();
    for n in 0..3 {
        uplink.send(&reading(n)).unwrap();
    }
    assert_eq!(session.queue_len(), 3);

    // 0.5 × 29/31 × 100 + 0.3 × 30 = 55 with no delivery history
    modem.set_signal(29, 0);
    let tick = session.monitor_tick();
    assert_eq!(tick.quality.quality_score, 55);
    assert_eq!(tick.flushed, Some(FlushResult::Delivered { sequence: 0 }));
    assert_eq!(session.queue_len(), 2);
    assert_eq!(modem.payloads().len(), 1);

    let decoded = codec::decode(&modem.payloads()[0]).unwrap();
    assert_eq!(decoded.record["reading"], 0);

    session.monitor_tick();
    assert_eq!(session.queue_len(), 1);
}

#[test]
fn middling_quality_does_not_flush() {
    let modem = SimModem::new();
    modem.set_signal(5, 0);
    let uplink = start(&modem);
    uplink.send(&reading(1)).unwrap();

    // 0.5 × 22/31 × 100 + 9 = 44: good enough to send, not to flush
    modem.set_signal(22, 0);
    let tick = uplink.session().monitor_tick();
    assert_eq!(tick.flushed, None);
    assert_eq!(uplink.session().queue_len(), 1);
}

#[test]
fn bounded_queue_drops_oldest() {
    let modem = SimModem::new();
    modem.set_signal(3, 0);
    let mut cfg = fast_config();
    cfg.queue.capacity = Some(2);
    let uplink = Uplink::start(cfg, &modem.connector(), None).unwrap();
    for n in 0..3 {
        uplink.send(&reading(n)).unwrap();
    }
    assert_eq!(uplink.session().queue_dropped(), 1);
    let left: Vec<i64> = uplink
        .session()
        .drain_queue()
        .iter()
        .map(|i| i.record["reading"].as_i64().unwrap())
        .collect();
    assert_eq!(left, vec![1, 2]);
}

#[test]
fn background_monitor_drains_queue() {
    let modem = SimModem::new();
    modem.set_signal(4, 0);
    let mut cfg = fast_config();
    cfg.monitor.enabled = true;
    cfg.monitor.interval = Duration::from_millis(10);
    let mut uplink = Uplink::start(cfg, &modem.connector(), None).unwrap();
    uplink.send(&reading(1)).unwrap();
    uplink.send(&reading(2)).unwrap();

    modem.set_signal(31, 0);
    let session = uplink.session().clone();
    assert!(wait_until(Duration::from_secs(5), || session.queue_len() == 0));
    assert_eq!(modem.payloads().len(), 2);
    assert!(uplink.shutdown().is_empty());
}

// ─── Start & Shutdown ───────────────────────────────────────────────────────

#[test]
fn unopenable_device_aborts_start() {
    let modem = SimModem::new();
    let err = Uplink::start(fast_config(), &modem.failing_connector(), None).err().unwrap();
    assert!(matches!(err, LinkError::TransportOpen { .. }));
    assert!(err.is_fatal());
}

#[test]
fn attach_exhaustion_aborts_start_and_closes_transport() {
    let modem = SimModem::new();
    modem.fail_activations(u32::MAX);
    let err = Uplink::start(fast_config(), &modem.connector(), None).err().unwrap();
    assert!(matches!(err, LinkError::Lifecycle { stage: "network attach", .. }));
    assert!(!modem.is_open());
}

#[test]
fn connect_exhaustion_aborts_start() {
    let modem = SimModem::new();
    modem.fail_opens(u32::MAX);
    let err = Uplink::start(fast_config(), &modem.connector(), None).err().unwrap();
    assert!(matches!(err, LinkError::Lifecycle { stage: "transport connect", attempts: 3, .. }));
}

#[test]
fn shutdown_stops_monitor_then_closes_connection_then_transport() {
    let modem = SimModem::new();
    modem.set_signal(2, 0);
    let mut cfg = fast_config();
    cfg.monitor.enabled = true;
    cfg.monitor.interval = Duration::from_millis(10);
    let mut uplink = Uplink::start(cfg, &modem.connector(), None).unwrap();
    uplink.send(&reading(9)).unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let pending = uplink.shutdown();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record["reading"], 9);

    let commands = modem.commands();
    let n = commands.len();
    assert_eq!(commands[n - 1], TRANSPORT_CLOSED);
    assert_eq!(commands[n - 2], "AT+QICLOSE=0");
    assert!(!modem.is_open());

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(modem.commands().len(), n);
    assert!(uplink.shutdown().is_empty());
}

#[test]
fn shutdown_mid_flush_returns_the_record_being_flushed() {
    let modem = SimModem::new();
    modem.set_signal(31, 0);
    let mut cfg = fast_config();
    cfg.monitor.enabled = true;
    cfg.monitor.interval = Duration::from_millis(10);
    cfg.monitor.join_timeout = Duration::from_millis(50);
    for p in cfg.profiles.iter_mut() {
        p.retry_delay = Duration::from_millis(300);
    }
    let mut uplink = Uplink::start(cfg, &modem.connector(), None).unwrap();
    let session = uplink.session().clone();

    modem.drop_sends(100);
    session.enqueue(
        codec::to_record(&reading(42)).unwrap(),
        DeferReason::LowQuality(20),
    );
    assert!(wait_until(Duration::from_secs(2), || {
        modem.count_commands("AT+QISEND=") > 0
    }));
    assert_eq!(session.queue_len(), 0);

    // The monitor is asleep between retries and misses the join timeout.
    let pending = uplink.shutdown();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record["reading"], 42);
    assert_eq!(pending[0].reason, DeferReason::LowQuality(20));

    // Once the abandoned flush gives up it must not resurrect the record.
    std::thread::sleep(Duration::from_millis(2000));
    assert_eq!(session.queue_len(), 0);
    assert!(session.drain_queue().is_empty());
}

#[test]
fn backlog_from_previous_run_is_restored() {
    let modem = SimModem::new();
    let backlog = vec![
        PendingItem::new(codec::to_record(&reading(1)).unwrap(), DeferReason::LowQuality(12)),
        PendingItem::new(codec::to_record(&reading(2)).unwrap(), DeferReason::SendFailed),
    ];
    let uplink =
        Uplink::start_with_backlog(fast_config(), &modem.connector(), None, backlog).unwrap();
    assert_eq!(uplink.session().queue_len(), 2);
}
