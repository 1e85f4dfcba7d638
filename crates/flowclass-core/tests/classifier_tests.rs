//! Integration tests for the classification pipeline

use flowclass_core::flow::{EndCause, FlowEntry, FlowObserver};
use flowclass_core::{
    Classifier, Config, ConnId, Error, FlowIdentity, MarkTarget, Packet, PacketMark, Policy, ProtocolBitmask,
    ProtocolId, Reason, SharedClassifier, Transport, Verdict,
};
use mockall::mock;
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr};

mock! {
    pub Observer {}
    impl FlowObserver for Observer {
        fn flow_ended(&mut self, entry: &FlowEntry, cause: EndCause);
    }
}

const KUGOU_CONN: ConnId = ConnId(0xffff_8880_0001_0000);

fn host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))
}

fn remote() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5))
}

fn udp_flow() -> FlowIdentity {
    FlowIdentity::from_tuple(Transport::Udp, host(), 7000, remote(), 8000)
}

fn tcp_flow(sport: u16, dport: u16) -> FlowIdentity {
    FlowIdentity::from_tuple(Transport::Tcp, host(), sport, remote(), dport)
}

fn packet(conn: ConnId, identity: FlowIdentity, payload: &[u8], seq: u64) -> Packet<'_> {
    Packet {
        conn,
        identity,
        payload,
        timestamp: 1_000 + seq,
        token: 0xabc0_0000 + seq,
    }
}

fn probe() -> Vec<u8> {
    let mut p = vec![0u8; 30];
    p[0] = 0x65;
    p
}

fn transfer(head: [u8; 8]) -> Vec<u8> {
    let mut p = vec![0u8; 700];
    p[0] = 0x32;
    p[5..13].copy_from_slice(&head);
    p[26] = 0x11;
    p[30] = 0x00;
    p[31] = 0x04;
    p
}

fn small_config(max_active: usize) -> Config {
    let mut config = Config::default();
    config.cache.max_active_classifications = max_active;
    config
}

fn quiet(config: &Config) -> Classifier {
    let mut observer = MockObserver::new();
    observer.expect_flow_ended().return_const(());
    Classifier::with_observer(config, Box::new(observer)).unwrap()
}

fn matching(ids: &[ProtocolId]) -> Policy {
    Policy::new(ids.iter().copied().collect::<ProtocolBitmask>())
}

// ============ KuGou Music End To End ============

#[test]
fn test_kugou_detected_and_blocked_above_threshold() {
    let mut classifier = quiet(&Config::default());
    let policy = matching(&[ProtocolId::KUGOU_MUSIC]).with_match_above(2);
    let head = *b"fingerpr";
    let datagrams = [probe(), transfer(head), transfer(head), transfer(head), transfer(head)];

    let verdicts: Vec<Verdict> = datagrams
        .iter()
        .zip(1u64..)
        .map(|(d, seq)| {
            classifier
                .process_match(&packet(KUGOU_CONN, udp_flow(), d, seq), &policy)
                .unwrap()
        })
        .collect();

    assert_eq!(
        verdicts,
        vec![Verdict::Pass, Verdict::Pass, Verdict::Block, Verdict::Block, Verdict::Pass]
    );
    let entry = classifier.lookup(KUGOU_CONN).unwrap();
    assert!(entry.is_detected());
    assert_eq!(entry.protocol(), ProtocolId::KUGOU_MUSIC);
    assert_eq!(entry.reason(), Reason::Detected);
    assert_eq!(entry.packets_processed(), 3);
    assert!(!entry.has_scratch());
    assert_eq!(classifier.cache().active_scratch(), 0);
}

#[test]
fn test_kugou_mismatch_finalizes_unknown() {
    let mut classifier = quiet(&Config::default());
    let policy = matching(&[ProtocolId::KUGOU_MUSIC]);

    for (seq, d) in [probe(), transfer(*b"fingerpr")].iter().enumerate() {
        classifier
            .process_match(&packet(KUGOU_CONN, udp_flow(), d, seq as u64), &policy)
            .unwrap();
    }
    let entry = classifier.lookup(KUGOU_CONN).unwrap();
    assert_eq!(entry.protocol(), ProtocolId::NOT_YET);
    assert!(!entry.is_detected());

    let v = classifier
        .process_match(&packet(KUGOU_CONN, udp_flow(), &transfer(*b"other!!!"), 9), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Pass);

    let entry = classifier.lookup(KUGOU_CONN).unwrap();
    assert!(entry.is_detected());
    assert_eq!(entry.protocol(), ProtocolId::UNKNOWN);
    assert!(entry.excluded().contains(ProtocolId::KUGOU_MUSIC));
    assert!(entry.excluded().contains(ProtocolId::DNS));
}

// ============ Fail-Open ============

#[test]
fn test_exhausted_scratch_passes_packet() {
    let mut classifier = quiet(&small_config(1));
    let policy = matching(&[ProtocolId::NOT_YET, ProtocolId::UNKNOWN]);

    // empty payloads keep the first flow classifying, holding the only region
    let v = classifier
        .process_match(&packet(ConnId(0x1000), tcp_flow(40000, 9999), &[], 1), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Block);

    let v = classifier
        .process_match(&packet(ConnId(0x2000), tcp_flow(40001, 9999), &[], 2), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Pass);
    assert!(classifier.lookup(ConnId(0x2000)).is_none());
    assert_eq!(classifier.stats().fail_open, 1);
    assert_eq!(classifier.cache().len(), 1);
}

#[test]
fn test_failed_miss_keeps_latched_flow() {
    let mut config = small_config(1);
    config.cache.capacity = 2;
    let mut classifier = quiet(&config);
    let policy = Policy::empty();
    let hello = [0x16, 0x03, 0x01, 0x02, 0x00, 0x01];

    // the TLS flow latches and returns its region; the empty flow then holds it
    classifier
        .process_match(&packet(ConnId(0x1000), tcp_flow(40000, 443), &hello, 1), &policy)
        .unwrap();
    classifier
        .process_match(&packet(ConnId(0x2000), tcp_flow(40001, 9999), &[], 2), &policy)
        .unwrap();
    assert_eq!(classifier.cache().len(), 2);

    let v = classifier
        .process_match(&packet(ConnId(0x3000), tcp_flow(40002, 9999), &[], 3), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Pass);
    assert_eq!(classifier.stats().fail_open, 1);

    let tls = classifier.lookup(ConnId(0x1000)).unwrap();
    assert!(tls.is_detected());
    assert_eq!(tls.protocol(), ProtocolId::TLS);
    assert!(classifier.lookup(ConnId(0x2000)).is_some());
    assert!(classifier.lookup(ConnId(0x3000)).is_none());
    assert_eq!(classifier.cache().len(), 2);
    assert_eq!(classifier.cache().evictions(), 0);
}

#[test]
fn test_failed_restart_drops_stale_flow() {
    let mut observer = MockObserver::new();
    observer
        .expect_flow_ended()
        .withf(|entry, cause| *cause == EndCause::Recycled && entry.protocol() == ProtocolId::TLS)
        .times(1)
        .return_const(());
    let mut classifier = Classifier::with_observer(&small_config(1), Box::new(observer)).unwrap();
    let policy = Policy::empty();
    let hello = [0x16, 0x03, 0x01, 0x02, 0x00, 0x01];

    classifier
        .process_match(&packet(ConnId(0x1000), tcp_flow(40000, 443), &hello, 1), &policy)
        .unwrap();
    assert!(classifier.lookup(ConnId(0x1000)).unwrap().is_detected());

    classifier
        .process_match(&packet(ConnId(0x2000), tcp_flow(40001, 9999), &[], 2), &policy)
        .unwrap();
    assert_eq!(classifier.cache().active_scratch(), 1);

    // same connection object, new tuple, no scratch left to restart with
    let v = classifier
        .process_match(&packet(ConnId(0x1000), tcp_flow(40002, 80), b"GET /", 3), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Pass);
    assert!(classifier.lookup(ConnId(0x1000)).is_none());
    assert_eq!(classifier.stats().fail_open, 1);
}

// ============ Duplicates and Reconciliation ============

#[test]
fn test_duplicate_delivery_is_idempotent() {
    let mut classifier = quiet(&Config::default());
    let policy = matching(&[ProtocolId::NOT_YET]).with_match_above(5);
    let conn = ConnId(0x3000);
    let first = packet(conn, tcp_flow(40000, 9999), &[], 1);

    assert_eq!(classifier.process_match(&first, &policy).unwrap(), Verdict::Block);
    assert_eq!(classifier.process_match(&first, &policy).unwrap(), Verdict::Block);

    let entry = classifier.lookup(conn).unwrap();
    assert_eq!(entry.packets_processed(), 1);
    assert_eq!(entry.above(0).unwrap().value(), 1);
    assert_eq!(classifier.stats().duplicates, 1);

    classifier
        .process_match(&packet(conn, tcp_flow(40000, 9999), &[], 2), &policy)
        .unwrap();
    let entry = classifier.lookup(conn).unwrap();
    assert_eq!(entry.packets_processed(), 2);
    assert_eq!(entry.above(0).unwrap().value(), 2);
}

#[test]
fn test_reused_connection_restarts_flow() {
    let mut observer = MockObserver::new();
    observer
        .expect_flow_ended()
        .withf(|entry, cause| *cause == EndCause::Recycled && entry.identity().transport() == Transport::Udp)
        .times(1)
        .return_const(());
    let mut classifier = Classifier::with_observer(&Config::default(), Box::new(observer)).unwrap();
    let policy = Policy::empty();

    classifier
        .process_match(&packet(KUGOU_CONN, udp_flow(), &probe(), 1), &policy)
        .unwrap();
    classifier
        .process_match(&packet(KUGOU_CONN, tcp_flow(40000, 9999), b"GET / HTTP/1.1\r\n", 2), &policy)
        .unwrap();

    let entry = classifier.lookup(KUGOU_CONN).unwrap();
    assert_eq!(entry.identity(), &tcp_flow(40000, 9999));
    assert_eq!(entry.packets_processed(), 1);
    assert_eq!(entry.protocol(), ProtocolId::HTTP);
    assert!(!entry.excluded().contains(ProtocolId::DNS));
    assert_eq!(classifier.stats().flows_recycled, 1);
}

// ============ Budget and Guessing ============

#[test]
fn test_port_guess_after_ceiling() {
    let mut classifier = quiet(&Config::default());
    let conn = ConnId(0x5000);
    let flow = tcp_flow(50000, 443);
    let policy = matching(&[ProtocolId::TLS]);

    for seq in 1..20 {
        let v = classifier.process_match(&packet(conn, flow, &[], seq), &policy).unwrap();
        assert_eq!(v, Verdict::Pass);
    }
    assert!(!classifier.lookup(conn).unwrap().is_detected());

    let v = classifier.process_match(&packet(conn, flow, &[], 20), &policy).unwrap();
    assert_eq!(v, Verdict::Block);
    let entry = classifier.lookup(conn).unwrap();
    assert_eq!(entry.protocol(), ProtocolId::TLS);
    assert_eq!(entry.reason(), Reason::Guessed);
    assert_eq!(classifier.stats().flows_guessed, 1);
}

#[test]
fn test_port_guess_respects_exclusions() {
    let mut classifier = quiet(&Config::default());
    let conn = ConnId(0x6000);
    let flow = tcp_flow(50000, 443);
    let policy = Policy::empty();

    // TLS rejects at once, FTP after three lines, HTTP after four
    for seq in 1..=4 {
        classifier
            .process_match(&packet(conn, flow, b"hello there", seq), &policy)
            .unwrap();
    }
    let entry = classifier.lookup(conn).unwrap();
    assert!(entry.is_detected());
    assert_eq!(entry.protocol(), ProtocolId::UNKNOWN);
    assert_eq!(entry.reason(), Reason::Detected);
    assert!(entry.excluded().contains(ProtocolId::TLS));
}

#[test]
fn test_guessing_disabled() {
    let mut config = Config::default();
    config.classification.guess_protocol = false;
    config.classification.packet_ceiling = 3;
    let mut classifier = quiet(&config);
    let conn = ConnId(0x7000);

    for seq in 1..=3 {
        classifier
            .process_match(&packet(conn, tcp_flow(50000, 443), &[], seq), &Policy::empty())
            .unwrap();
    }
    let entry = classifier.lookup(conn).unwrap();
    assert_eq!(entry.protocol(), ProtocolId::UNKNOWN);
    assert_eq!(entry.reason(), Reason::Detected);
}

#[test]
fn test_ftp_control_stays_under_inspection() {
    let mut classifier = quiet(&Config::default());
    let conn = ConnId(0x8000);
    let flow = tcp_flow(50000, 21);
    let policy = matching(&[ProtocolId::FTP_CONTROL]);

    let v = classifier
        .process_match(&packet(conn, flow, b"220 ProFTPD ready\r\n", 0), &policy)
        .unwrap();
    assert_eq!(v, Verdict::Block);
    for seq in 1..40 {
        classifier
            .process_match(&packet(conn, flow, b"LIST\r\n", seq), &policy)
            .unwrap();
    }

    let entry = classifier.lookup(conn).unwrap();
    assert!(!entry.is_detected());
    assert!(entry.has_scratch());
    assert_eq!(entry.protocol(), ProtocolId::FTP_CONTROL);
    assert_eq!(entry.packets_processed(), 40);
}

// ============ Invocation Modes ============

#[test]
fn test_policy_misuse_is_reported() {
    let mut classifier = quiet(&Config::default());
    let p = packet(ConnId(0x9000), udp_flow(), &[], 1);

    let err = classifier
        .process(&p, Some(&Policy::empty()), Some(&MarkTarget { mark: 3 }))
        .unwrap_err();
    assert!(matches!(err, Error::PolicyMisuse { .. }));
    assert!(!err.is_fail_open());
    assert_eq!(classifier.stats().packets, 0);
}

#[test]
fn test_mark_target_never_blocks() {
    let mut classifier = quiet(&Config::default());
    let target = MarkTarget { mark: 0x42 };

    let mark = classifier
        .process_target(&packet(KUGOU_CONN, udp_flow(), &probe(), 1), &target)
        .unwrap();
    assert_eq!(
        mark,
        PacketMark {
            mark: 0x42,
            protocol: ProtocolId::NOT_YET
        }
    );

    let v = classifier
        .process(&packet(KUGOU_CONN, udp_flow(), &[], 2), None, Some(&target))
        .unwrap();
    assert_eq!(v, Verdict::Pass);
    assert_eq!(classifier.stats().blocked, 0);
}

#[test]
fn test_shared_classifier_across_threads() {
    let shared = SharedClassifier::new(quiet(&Config::default()));
    let policy = Policy::empty();

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let shared = shared.clone();
            s.spawn(move || {
                for seq in 0..10 {
                    let flow = tcp_flow(40000 + t as u16, 9999);
                    shared
                        .process_match(&packet(ConnId((t + 1) << 8), flow, &[], seq), &policy)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(shared.with(|c| c.stats().packets), 40);
    assert_eq!(shared.with(|c| c.cache().len()), 4);
}

#[test]
fn test_shutdown_reports_every_flow() {
    let mut observer = MockObserver::new();
    observer
        .expect_flow_ended()
        .withf(|_, cause| *cause == EndCause::Cleared)
        .times(2)
        .return_const(());
    let mut classifier = Classifier::with_observer(&Config::default(), Box::new(observer)).unwrap();

    classifier
        .process_match(&packet(ConnId(0x100), tcp_flow(1, 2), &[], 1), &Policy::empty())
        .unwrap();
    classifier
        .process_match(&packet(ConnId(0x200), tcp_flow(3, 4), &[], 1), &Policy::empty())
        .unwrap();
    classifier.shutdown();
    assert!(classifier.cache().is_empty());
}

// ============ Properties ============

fn tcp_payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        Just(b"GET / HTTP/1.1\r\n".to_vec()),
        Just(b"220 ready\r\n".to_vec()),
        Just(vec![0x16, 0x03, 0x01, 0x00, 0x40, 0x01]),
        prop::collection::vec(any::<u8>(), 1..48),
    ]
}

proptest! {
    #[test]
    fn prop_latch_is_monotonic(payloads in prop::collection::vec(tcp_payload(), 1..40)) {
        let mut classifier = quiet(&Config::default());
        let conn = ConnId(0xa000);
        let flow = tcp_flow(45000, 8443);
        let mut latched: Option<ProtocolId> = None;

        for (seq, payload) in payloads.iter().enumerate() {
            classifier
                .process_match(&packet(conn, flow, payload, seq as u64), &Policy::empty())
                .unwrap();
            let entry = classifier.lookup(conn).unwrap();
            match latched {
                Some(protocol) => {
                    prop_assert!(entry.is_detected());
                    prop_assert_eq!(entry.protocol(), protocol);
                }
                None if entry.is_detected() => latched = Some(entry.protocol()),
                None if entry.protocol() != ProtocolId::FTP_CONTROL => {
                    prop_assert!(entry.packets_processed() < 20);
                }
                None => {}
            }
        }
    }

    #[test]
    fn prop_verdicts_are_never_errors(payloads in prop::collection::vec(tcp_payload(), 1..20), cap in 1usize..4) {
        let mut classifier = quiet(&small_config(cap));
        for (seq, payload) in payloads.iter().enumerate() {
            let conn = ConnId((seq as u64 % 6) << 4);
            let flow = tcp_flow(40000 + (seq % 6) as u16, 9999);
            prop_assert!(classifier.process_match(&packet(conn, flow, payload, seq as u64), &Policy::empty()).is_ok());
        }
    }
}
