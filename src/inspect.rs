//! Offline policy inspection.
//!
//! Runs captured Ethernet frames through the same classifier the hook
//! programs use, with in-process counter stores, so a policy decision can be
//! checked without attaching anything to an interface.
//!
//! Input format: one hex-encoded frame per line. Whitespace and `:` between
//! digits are ignored; blank lines and lines starting with `#` are skipped.

use serde::{Serialize, Serializer};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::debug;

use imds_guard_common::{MetadataGuard, SlicePacket, Verdict};

use crate::counter_store::BoundedCounterStore;
use crate::errors::{GuardError, Result};
use crate::report::AttemptReport;

/// Verdict for one input frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectedFrame {
    /// 1-based line number in the input.
    pub line: usize,
    pub len: usize,
    #[serde(serialize_with = "serialize_verdict")]
    pub verdict: Verdict,
    pub source: Option<Ipv4Addr>,
}

fn serialize_verdict<S: Serializer>(verdict: &Verdict, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(verdict.as_str())
}

/// Decode the frame list format into `(line, bytes)` pairs.
pub fn parse_frames(text: &str) -> Result<Vec<(usize, Vec<u8>)>> {
    let mut frames = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let digits: String = line
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        let bytes = hex::decode(&digits).map_err(|e| GuardError::InvalidFrame {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        frames.push((idx + 1, bytes));
    }
    Ok(frames)
}

/// Classifier with its own blocked/allowed stores.
pub struct Inspector {
    guard: MetadataGuard<BoundedCounterStore, BoundedCounterStore>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::with_stores(
            BoundedCounterStore::blocked_attempts(),
            BoundedCounterStore::token_requests(),
        )
    }

    pub fn with_stores(blocked: BoundedCounterStore, allowed: BoundedCounterStore) -> Self {
        Self {
            guard: MetadataGuard::new(blocked, allowed),
        }
    }

    pub fn inspect_frame(&self, frame: &[u8]) -> (Verdict, Option<Ipv4Addr>) {
        let classification = self.guard.inspect(&SlicePacket::new(frame));
        (classification.verdict, classification.source.map(Ipv4Addr::from))
    }

    pub fn inspect_text(&self, text: &str) -> Result<Vec<InspectedFrame>> {
        let frames = parse_frames(text)?;
        let results = frames
            .into_iter()
            .map(|(line, bytes)| {
                let (verdict, source) = self.inspect_frame(&bytes);
                debug!(line, len = bytes.len(), verdict = verdict.as_str(), "Inspected frame");
                InspectedFrame {
                    line,
                    len: bytes.len(),
                    verdict,
                    source,
                }
            })
            .collect();
        Ok(results)
    }

    pub fn inspect_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<InspectedFrame>> {
        let text = std::fs::read_to_string(path)?;
        self.inspect_text(&text)
    }

    pub fn blocked(&self) -> &BoundedCounterStore {
        self.guard.blocked()
    }

    pub fn allowed(&self) -> &BoundedCounterStore {
        self.guard.allowed()
    }

    pub fn report(&self) -> AttemptReport {
        AttemptReport::from_stores(self.blocked(), self.allowed())
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 10.0.0.5:51000 -> 169.254.169.254:80, no payload
    const METADATA_HEADERS: &str = "000000000000 000000000000 0800 \
        4500003c000040004006 0000 0a000005 a9fea9fe \
        c7380050 00000000 00000000 5000ffff 00000000";

    fn with_payload(payload: &[u8]) -> String {
        format!("{}{}", METADATA_HEADERS, hex::encode(payload))
    }

    #[test]
    fn test_parse_frames_skips_comments_and_blanks() {
        let text = "# capture\n\n  aa:bb cc \n#dd\n0102\n";
        let frames = parse_frames(text).unwrap();
        assert_eq!(frames, vec![(3, vec![0xaa, 0xbb, 0xcc]), (5, vec![0x01, 0x02])]);
    }

    #[test]
    fn test_parse_frames_reports_bad_line() {
        let err = parse_frames("0102\nzz\n").unwrap_err();
        match err {
            GuardError::InvalidFrame { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_inspect_text_counts_decisions() {
        let inspector = Inspector::new();
        let text = format!(
            "{}\n{}\n{}\n",
            with_payload(b"GET /latest/meta-data/ HTTP/1.1\r\n"),
            with_payload(b"PUT /latest/api/token HTTP/1.1\r\n"),
            "ffff"
        );
        let results = inspector.inspect_text(&text).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].verdict, Verdict::Block);
        assert_eq!(results[0].source, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(results[1].verdict, Verdict::Allow);
        assert_eq!(results[2].verdict, Verdict::Pass);
        assert_eq!(results[2].source, None);

        let src = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(inspector.blocked().get(src), Some(1));
        assert_eq!(inspector.allowed().get(src), Some(1));
    }

    #[test]
    fn test_inspected_frame_json() {
        let frame = InspectedFrame {
            line: 1,
            len: 60,
            verdict: Verdict::Block,
            source: Some(Ipv4Addr::new(10, 0, 0, 5)),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["verdict"], "block");
        assert_eq!(json["source"], "10.0.0.5");
    }
}
