//! Verdict engine.
//!
//! [`classify`] is pure: it parses one packet and decides `Pass`, `Allow` or
//! `Block`. [`MetadataGuard`] wraps it with the two attempt counters and is
//! what the hook adapters call. Counter updates happen after the verdict is
//! final and their outcome is discarded.

use crate::counter::AttemptCounter;
use crate::headers::parse_metadata_segment;
use crate::packet::PacketView;
use crate::request_line::is_token_request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Not metadata traffic; forward unmodified.
    Pass,
    /// IMDSv2 token request; forward and count as allowed.
    Allow,
    /// Any other metadata traffic; discard and count as blocked.
    Block,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Allow => "allow",
            Verdict::Block => "block",
        }
    }

    /// True for verdicts that let the packet continue.
    pub fn forwards(&self) -> bool {
        !matches!(self, Verdict::Block)
    }
}

/// Verdict plus the source address the caller should account it to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Host-order source address; `None` for `Pass`.
    pub source: Option<u32>,
}

impl Classification {
    const PASS: Self = Self {
        verdict: Verdict::Pass,
        source: None,
    };
}

/// Classify a single packet.
#[inline(always)]
pub fn classify<P: PacketView>(packet: &P) -> Classification {
    let segment = match parse_metadata_segment(packet) {
        Some(segment) => segment,
        None => return Classification::PASS,
    };

    let allowed = match segment.payload_offset() {
        Some(offset) => is_token_request(packet, offset),
        None => false,
    };

    Classification {
        verdict: if allowed { Verdict::Allow } else { Verdict::Block },
        source: Some(segment.src_addr),
    }
}

/// Maps the three-way verdict onto a hook's action vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTable<T> {
    /// Returned for `Pass` and `Allow`.
    pub forward: T,
    /// Returned for `Block`.
    pub discard: T,
}

impl<T: Copy> ActionTable<T> {
    pub const fn new(forward: T, discard: T) -> Self {
        Self { forward, discard }
    }

    #[inline(always)]
    pub fn action(&self, verdict: Verdict) -> T {
        match verdict {
            Verdict::Pass | Verdict::Allow => self.forward,
            Verdict::Block => self.discard,
        }
    }
}

/// Classification engine holding the blocked and allowed counter stores.
#[derive(Debug, Clone, Copy)]
pub struct MetadataGuard<B, A> {
    blocked: B,
    allowed: A,
}

impl<B: AttemptCounter, A: AttemptCounter> MetadataGuard<B, A> {
    pub const fn new(blocked: B, allowed: A) -> Self {
        Self { blocked, allowed }
    }

    /// Classify `packet` and record the decision against its source.
    #[inline(always)]
    pub fn inspect<P: PacketView>(&self, packet: &P) -> Classification {
        let classification = classify(packet);
        if let Some(source) = classification.source {
            match classification.verdict {
                Verdict::Allow => {
                    let _ = self.allowed.record(source);
                }
                Verdict::Block => {
                    let _ = self.blocked.record(source);
                }
                Verdict::Pass => {}
            }
        }
        classification
    }

    /// Classify, record and translate through `actions` in one step.
    #[inline(always)]
    pub fn decide<P: PacketView, T: Copy>(&self, packet: &P, actions: &ActionTable<T>) -> T {
        actions.action(self.inspect(packet).verdict)
    }

    pub fn blocked(&self) -> &B {
        &self.blocked
    }

    pub fn allowed(&self) -> &A {
        &self.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::RecordOutcome;
    use crate::packet::SlicePacket;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Single-threaded recording counter for engine tests.
    #[derive(Default)]
    struct Tally {
        capacity: usize,
        counts: RefCell<HashMap<u32, u64>>,
    }

    impl Tally {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                capacity,
                counts: RefCell::new(HashMap::new()),
            }
        }

        fn get(&self, source: u32) -> Option<u64> {
            self.counts.borrow().get(&source).copied()
        }
    }

    impl AttemptCounter for Tally {
        fn record(&self, source: u32) -> RecordOutcome {
            let mut counts = self.counts.borrow_mut();
            if let Some(count) = counts.get_mut(&source) {
                *count += 1;
                return RecordOutcome::Incremented;
            }
            if counts.len() >= self.capacity {
                return RecordOutcome::Dropped;
            }
            counts.insert(source, 1);
            RecordOutcome::Inserted
        }
    }

    const SRC: u32 = 0x0A00_0005;

    fn metadata_frame(dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; 12];
        f.extend_from_slice(&[0x08, 0x00]);
        let mut ip = [0u8; 20];
        ip[0] = 0x45;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&SRC.to_be_bytes());
        ip[16..20].copy_from_slice(&dst);
        f.extend_from_slice(&ip);
        let mut tcp = [0u8; 20];
        tcp[0..2].copy_from_slice(&51000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[12] = 5 << 4;
        f.extend_from_slice(&tcp);
        f.extend_from_slice(payload);
        f
    }

    const META: [u8; 4] = [169, 254, 169, 254];

    #[test]
    fn test_classify_token_request() {
        let f = metadata_frame(META, b"PUT /latest/api/token HTTP/1.1\r\n");
        let c = classify(&SlicePacket::new(&f));
        assert_eq!(c.verdict, Verdict::Allow);
        assert_eq!(c.source, Some(SRC));
    }

    #[test]
    fn test_classify_metadata_get_is_blocked() {
        let f = metadata_frame(META, b"GET /latest/meta-data/ HTTP/1.1\r\n");
        let c = classify(&SlicePacket::new(&f));
        assert_eq!(c.verdict, Verdict::Block);
        assert_eq!(c.source, Some(SRC));
    }

    #[test]
    fn test_classify_empty_payload_is_blocked() {
        // bare handshake segments to the metadata service are blocked too
        let f = metadata_frame(META, b"");
        assert_eq!(classify(&SlicePacket::new(&f)).verdict, Verdict::Block);
    }

    #[test]
    fn test_classify_other_destination_passes() {
        let f = metadata_frame([10, 0, 0, 1], b"GET / HTTP/1.1\r\n");
        let c = classify(&SlicePacket::new(&f));
        assert_eq!(c.verdict, Verdict::Pass);
        assert_eq!(c.source, None);
    }

    #[test]
    fn test_guard_records_by_verdict() {
        let guard = MetadataGuard::new(Tally::with_capacity(10), Tally::with_capacity(10));

        let get = metadata_frame(META, b"GET /latest/meta-data/ HTTP/1.1\r\n");
        let put = metadata_frame(META, b"PUT /latest/api/token HTTP/1.1\r\n");
        let other = metadata_frame([10, 0, 0, 1], b"GET / HTTP/1.1\r\n");

        guard.inspect(&SlicePacket::new(&get));
        guard.inspect(&SlicePacket::new(&get));
        guard.inspect(&SlicePacket::new(&put));
        guard.inspect(&SlicePacket::new(&other));

        assert_eq!(guard.blocked().get(SRC), Some(2));
        assert_eq!(guard.allowed().get(SRC), Some(1));
        assert_eq!(guard.blocked().counts.borrow().len(), 1);
    }

    #[test]
    fn test_full_store_does_not_change_verdict() {
        let guard = MetadataGuard::new(Tally::with_capacity(0), Tally::with_capacity(0));
        let get = metadata_frame(META, b"GET / HTTP/1.1\r\n");
        let put = metadata_frame(META, b"PUT /latest/api/token HTTP/1.1\r\n");

        assert_eq!(guard.inspect(&SlicePacket::new(&get)).verdict, Verdict::Block);
        assert_eq!(guard.inspect(&SlicePacket::new(&put)).verdict, Verdict::Allow);
        assert_eq!(guard.blocked().get(SRC), None);
        assert_eq!(guard.allowed().get(SRC), None);
    }

    #[test]
    fn test_action_table_translation() {
        let xdp = ActionTable::new(2u32, 1u32);
        assert_eq!(xdp.action(Verdict::Pass), 2);
        assert_eq!(xdp.action(Verdict::Allow), 2);
        assert_eq!(xdp.action(Verdict::Block), 1);

        let guard = MetadataGuard::new(Tally::with_capacity(1), Tally::with_capacity(1));
        let get = metadata_frame(META, b"GET / HTTP/1.1\r\n");
        assert_eq!(guard.decide(&SlicePacket::new(&get), &xdp), 1);
    }

    #[test]
    fn test_verdict_helpers() {
        assert!(Verdict::Pass.forwards());
        assert!(Verdict::Allow.forwards());
        assert!(!Verdict::Block.forwards());
        assert_eq!(Verdict::Block.as_str(), "block");
    }
}
