// Metadata guard integration tests
// Drive the shared classifier through the userspace stores exactly as the
// hook programs drive it through the kernel maps

use imds_guard::counter_store::BoundedCounterStore;
use imds_guard::inspect::Inspector;
use imds_guard::policy::{METADATA_ADDR, METADATA_PORT};
use imds_guard::{
    classify, ActionTable, AttemptCounter, MetadataGuard, RecordOutcome, SlicePacket, Verdict,
};
use proptest::prelude::*;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

const HEADERS_LEN: usize = 14 + 20 + 20;

fn build_frame(src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADERS_LEN + payload.len());

    // Ethernet
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4, IHL 5, protocol TCP
    let total_len = (20 + 20 + payload.len()) as u16;
    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());

    // TCP, data offset 5
    frame.extend_from_slice(&51000u16.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&[0; 8]);
    frame.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);

    frame.extend_from_slice(payload);
    frame
}

fn metadata_frame(src: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    build_frame(src, Ipv4Addr::from(METADATA_ADDR), METADATA_PORT, payload)
}

fn new_guard() -> MetadataGuard<BoundedCounterStore, BoundedCounterStore> {
    MetadataGuard::new(
        BoundedCounterStore::blocked_attempts(),
        BoundedCounterStore::token_requests(),
    )
}

const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

#[test]
fn test_metadata_read_is_blocked_and_counted() {
    let guard = new_guard();
    let frame = metadata_frame(SOURCE, b"GET /latest/meta-data/ HTTP/1.1\r\nHost: 169.254.169.254\r\n\r\n");

    let classification = guard.inspect(&SlicePacket::new(&frame));

    assert_eq!(classification.verdict, Verdict::Block);
    assert_eq!(classification.source, Some(u32::from(SOURCE)));
    assert_eq!(guard.blocked().get(SOURCE), Some(1));
    assert!(guard.allowed().is_empty());
}

#[test]
fn test_token_request_is_allowed_and_counted() {
    let guard = new_guard();
    let frame = metadata_frame(
        SOURCE,
        b"PUT /latest/api/token HTTP/1.1\r\nX-aws-ec2-metadata-token-ttl-seconds: 21600\r\n\r\n",
    );

    assert_eq!(guard.inspect(&SlicePacket::new(&frame)).verdict, Verdict::Allow);
    assert_eq!(guard.allowed().get(SOURCE), Some(1));
    assert!(guard.blocked().is_empty());
}

#[test]
fn test_token_path_prefix_is_not_enough() {
    let guard = new_guard();
    for payload in [
        &b"PUT /latest/api/tokens HTTP/1.1\r\n"[..],
        &b"PUT /latest/api/token/ HTTP/1.1\r\n"[..],
        &b"PUT /latest/api/TOKEN HTTP/1.1\r\n"[..],
        &b"put /latest/api/token HTTP/1.1\r\n"[..],
    ] {
        let frame = metadata_frame(SOURCE, payload);
        assert_eq!(
            guard.inspect(&SlicePacket::new(&frame)).verdict,
            Verdict::Block,
            "payload {:?} should be blocked",
            String::from_utf8_lossy(payload)
        );
    }
    assert_eq!(guard.blocked().get(SOURCE), Some(4));
}

#[test]
fn test_other_destination_passes_without_counting() {
    let guard = new_guard();
    let frame = build_frame(
        SOURCE,
        Ipv4Addr::new(10, 0, 0, 1),
        80,
        b"GET /latest/meta-data/ HTTP/1.1\r\n",
    );

    let classification = guard.inspect(&SlicePacket::new(&frame));
    assert_eq!(classification.verdict, Verdict::Pass);
    assert_eq!(classification.source, None);
    assert!(guard.blocked().is_empty());
    assert!(guard.allowed().is_empty());
}

#[test]
fn test_other_port_on_metadata_address_passes() {
    let frame = build_frame(
        SOURCE,
        Ipv4Addr::from(METADATA_ADDR),
        443,
        b"GET /latest/meta-data/ HTTP/1.1\r\n",
    );
    assert_eq!(classify(&SlicePacket::new(&frame)).verdict, Verdict::Pass);
}

#[test]
fn test_short_capture_is_blocked() {
    let guard = new_guard();
    let frame = metadata_frame(SOURCE, b"PUT /");

    assert_eq!(guard.inspect(&SlicePacket::new(&frame)).verdict, Verdict::Block);
    assert_eq!(guard.blocked().get(SOURCE), Some(1));
}

#[test]
fn test_truncated_token_request_never_over_reads() {
    let frame = metadata_frame(SOURCE, b"PUT /latest/api/token HTTP/1.1\r\n");
    // method, space, path and the trailing space must all be present
    let allow_from = HEADERS_LEN + 3 + 1 + 18;

    for len in 0..=frame.len() {
        let verdict = classify(&SlicePacket::new(&frame[..len])).verdict;
        let expected = if len < HEADERS_LEN {
            Verdict::Pass
        } else if len < allow_from {
            Verdict::Block
        } else {
            Verdict::Allow
        };
        assert_eq!(verdict, expected, "prefix of {} bytes", len);
    }
}

#[test]
fn test_repeated_attempts_accumulate() {
    let guard = new_guard();
    let other = Ipv4Addr::new(10, 0, 0, 6);
    let blocked = metadata_frame(SOURCE, b"GET /latest/user-data HTTP/1.1\r\n");
    let token = metadata_frame(other, b"PUT /latest/api/token HTTP/1.1\r\n");

    for _ in 0..25 {
        guard.inspect(&SlicePacket::new(&blocked));
    }
    for _ in 0..3 {
        guard.inspect(&SlicePacket::new(&token));
    }

    assert_eq!(guard.blocked().get(SOURCE), Some(25));
    assert_eq!(guard.blocked().get(other), None);
    assert_eq!(guard.allowed().get(other), Some(3));
}

#[test]
fn test_full_store_does_not_change_verdict() {
    let guard = MetadataGuard::new(
        BoundedCounterStore::new("blocked_attempts", 2),
        BoundedCounterStore::new("token_requests", 2),
    );

    for last in 1..=3u8 {
        let frame = metadata_frame(Ipv4Addr::new(10, 0, 0, last), b"GET / HTTP/1.1\r\n");
        assert_eq!(guard.inspect(&SlicePacket::new(&frame)).verdict, Verdict::Block);
    }

    assert_eq!(guard.blocked().len(), 2);
    assert!(guard.blocked().is_full());
    assert_eq!(guard.blocked().get(Ipv4Addr::new(10, 0, 0, 3)), None);

    // existing sources still count
    let frame = metadata_frame(Ipv4Addr::new(10, 0, 0, 1), b"GET / HTTP/1.1\r\n");
    guard.inspect(&SlicePacket::new(&frame));
    assert_eq!(guard.blocked().get(Ipv4Addr::new(10, 0, 0, 1)), Some(2));
}

#[test]
fn test_decide_maps_verdicts_to_hook_actions() {
    // XDP_DROP = 1, XDP_PASS = 2
    let xdp = ActionTable::new(2u32, 1u32);
    // keep whole packet / drop
    let socket = ActionTable::new(-1i64, 0i64);
    let guard = new_guard();

    let blocked = metadata_frame(SOURCE, b"GET / HTTP/1.1\r\n");
    let token = metadata_frame(SOURCE, b"PUT /latest/api/token HTTP/1.1\r\n");
    let other = build_frame(SOURCE, Ipv4Addr::new(8, 8, 8, 8), 80, b"GET / HTTP/1.1\r\n");

    assert_eq!(guard.decide(&SlicePacket::new(&blocked), &xdp), 1);
    assert_eq!(guard.decide(&SlicePacket::new(&token), &xdp), 2);
    assert_eq!(guard.decide(&SlicePacket::new(&other), &xdp), 2);
    assert_eq!(guard.decide(&SlicePacket::new(&blocked), &socket), 0);
    assert_eq!(guard.decide(&SlicePacket::new(&token), &socket), -1);
}

#[test]
fn test_concurrent_recording_is_exact() {
    let store = Arc::new(BoundedCounterStore::new("blocked_attempts", 16));
    let threads = 8;
    let per_thread = 1_000;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..per_thread {
                    // every thread hits one shared source plus one of its own
                    store.record(u32::from(SOURCE));
                    let own = Ipv4Addr::new(10, 1, 0, t as u8);
                    if i % 2 == 0 {
                        store.record(u32::from(own));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.get(SOURCE), Some((threads * per_thread) as u64));
    for t in 0..threads {
        assert_eq!(
            store.get(Ipv4Addr::new(10, 1, 0, t as u8)),
            Some((per_thread / 2) as u64)
        );
    }
    assert_eq!(store.len(), threads + 1);
}

#[test]
fn test_record_outcomes() {
    let store = BoundedCounterStore::new("token_requests", 1);
    assert_eq!(store.record(1), RecordOutcome::Inserted);
    assert_eq!(store.record(1), RecordOutcome::Incremented);
    assert_eq!(store.record(2), RecordOutcome::Dropped);
    assert!(!RecordOutcome::Dropped.is_recorded());
}

#[test]
fn test_inspector_reports_match_stores() {
    let inspector = Inspector::new();
    let text = format!(
        "# blocked read\n{}\n\n# token\n{}\n{}\n",
        hex::encode(metadata_frame(SOURCE, b"GET /latest/meta-data/iam HTTP/1.1\r\n")),
        hex::encode(metadata_frame(SOURCE, b"PUT /latest/api/token HTTP/1.1\r\n")),
        hex::encode(build_frame(SOURCE, Ipv4Addr::new(1, 1, 1, 1), 80, b"GET /")),
    );

    let frames = inspector.inspect_text(&text).unwrap();
    let verdicts: Vec<_> = frames.iter().map(|f| f.verdict).collect();
    assert_eq!(verdicts, vec![Verdict::Block, Verdict::Allow, Verdict::Pass]);
    assert_eq!(frames[0].line, 2);
    assert_eq!(frames[1].line, 5);

    let report = inspector.report();
    assert_eq!(report.blocked.count_for(SOURCE), Some(1));
    assert_eq!(report.allowed.count_for(SOURCE), Some(1));
    assert_eq!(report.blocked.capacity, 1000);
    assert_eq!(report.allowed.capacity, 100);
}

proptest! {
    #[test]
    fn prop_non_metadata_destination_passes(
        dst in any::<u32>().prop_filter("metadata address", |d| *d != METADATA_ADDR),
        port in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let guard = new_guard();
        let frame = build_frame(SOURCE, Ipv4Addr::from(dst), port, &payload);

        prop_assert_eq!(guard.inspect(&SlicePacket::new(&frame)).verdict, Verdict::Pass);
        prop_assert!(guard.blocked().is_empty());
        prop_assert!(guard.allowed().is_empty());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let verdict = classify(&SlicePacket::new(&bytes)).verdict;
        prop_assert!(matches!(verdict, Verdict::Pass | Verdict::Allow | Verdict::Block));
    }

    #[test]
    fn prop_non_put_methods_are_blocked(
        method in "[A-Z]{3,7}".prop_filter("PUT", |m| !m.starts_with("PUT")),
        path in "/[a-z/]{0,40}",
    ) {
        let payload = format!("{} {} HTTP/1.1\r\n", method, path);
        let frame = metadata_frame(SOURCE, payload.as_bytes());
        prop_assert_eq!(classify(&SlicePacket::new(&frame)).verdict, Verdict::Block);
    }
}
