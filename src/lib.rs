// Library interface for the IMDS guard loader and tooling
// The packet classifier itself lives in imds-guard-common

pub mod config;
pub mod counter_store;
pub mod errors;
pub mod inspect;
pub mod lock_utils;
pub mod report;

#[cfg(target_os = "linux")]
pub mod ebpf_loader;

pub use imds_guard_common::{
    classify, policy, ActionTable, AttemptCounter, Classification, MetadataGuard, PacketView,
    RecordOutcome, SlicePacket, Verdict,
};
