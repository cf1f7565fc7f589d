//! Packet classification engine shared by the eBPF hook programs and the
//! userspace loader.
//!
//! The engine is `no_std` and allocation-free so the same code runs inside the
//! XDP, TC and socket-filter programs and in ordinary userspace tests.

#![cfg_attr(not(test), no_std)]

pub mod counter;
pub mod headers;
pub mod packet;
pub mod policy;
pub mod request_line;
pub mod verdict;

pub use counter::{AttemptCounter, RecordOutcome};
pub use packet::{PacketView, SlicePacket};
pub use verdict::{classify, ActionTable, Classification, MetadataGuard, Verdict};
