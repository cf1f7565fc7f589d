#![no_std]
#![no_main]

// Metadata service guard: three hook adapters around the shared classifier.
// Only IMDSv2 token bootstrap (PUT /latest/api/token) may reach
// 169.254.169.254:80; every other metadata request is dropped and counted.

use aya_ebpf::{
    bindings::{xdp_action, TC_ACT_OK, TC_ACT_SHOT},
    macros::{classifier, map, socket_filter, xdp},
    maps::HashMap,
    programs::{SkBuffContext, TcContext, XdpContext},
    EbpfContext,
};
use aya_log_ebpf::debug;
use core::sync::atomic::{AtomicU64, Ordering};

use imds_guard_common::{
    policy::{BLOCKED_ATTEMPTS_CAPACITY, TOKEN_REQUESTS_CAPACITY},
    ActionTable, AttemptCounter, Classification, MetadataGuard, PacketView, RecordOutcome,
    Verdict,
};

// Only insert if the key does not exist yet
const BPF_NOEXIST: u64 = 1;

// Socket filters return the number of bytes to keep
const SOCKET_KEEP_ALL: i64 = -1;
const SOCKET_DROP: i64 = 0;

// Blocked metadata requests per source IP (host byte order)
#[map]
static BLOCKED_ATTEMPTS: HashMap<u32, u64> =
    HashMap::with_max_entries(BLOCKED_ATTEMPTS_CAPACITY, 0);

// Allowed token requests per source IP (host byte order)
#[map]
static TOKEN_REQUESTS: HashMap<u32, u64> = HashMap::with_max_entries(TOKEN_REQUESTS_CAPACITY, 0);

const XDP_ACTIONS: ActionTable<u32> =
    ActionTable::new(xdp_action::XDP_PASS, xdp_action::XDP_DROP);
const TC_ACTIONS: ActionTable<i32> = ActionTable::new(TC_ACT_OK as i32, TC_ACT_SHOT as i32);
const SOCKET_ACTIONS: ActionTable<i64> = ActionTable::new(SOCKET_KEEP_ALL, SOCKET_DROP);

/// Counter backed by a BPF hash map. Existing entries are bumped atomically
/// in place; new entries are inserted with BPF_NOEXIST so a concurrent insert
/// from another CPU falls back to the in-place increment.
struct MapCounter(&'static HashMap<u32, u64>);

impl MapCounter {
    #[inline(always)]
    fn increment(&self, source: u32) -> bool {
        match self.0.get_ptr_mut(&source) {
            Some(count) => {
                // SAFETY: the pointer comes from a successful map lookup and
                // stays valid for the duration of the program.
                unsafe { AtomicU64::from_ptr(count) }.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl AttemptCounter for MapCounter {
    #[inline(always)]
    fn record(&self, source: u32) -> RecordOutcome {
        if self.increment(source) {
            return RecordOutcome::Incremented;
        }
        match self.0.insert(&source, &1, BPF_NOEXIST) {
            Ok(()) => RecordOutcome::Inserted,
            Err(_) if self.increment(source) => RecordOutcome::Incremented,
            // E2BIG: map is full, the attempt is not counted
            Err(_) => RecordOutcome::Dropped,
        }
    }
}

#[inline(always)]
fn guard() -> MetadataGuard<MapCounter, MapCounter> {
    MetadataGuard::new(MapCounter(&BLOCKED_ATTEMPTS), MapCounter(&TOKEN_REQUESTS))
}

// Per-packet events stay at debug; BLOCKED_ATTEMPTS carries the counts.
#[inline(always)]
fn log_decision<C: EbpfContext>(ctx: &C, classification: &Classification) {
    match (classification.verdict, classification.source) {
        (Verdict::Block, Some(src)) => debug!(ctx, "blocked metadata access from {:i}", src),
        (Verdict::Allow, Some(src)) => debug!(ctx, "allowed IMDSv2 token request from {:i}", src),
        _ => {}
    }
}

// =============================================================================
// PACKET VIEWS
// =============================================================================

/// Direct packet access between data and data_end.
struct XdpPacket<'a>(&'a XdpContext);

impl PacketView for XdpPacket<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.0.data_end() - self.0.data()
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.0.data();
        let end = self.0.data_end();
        if start + offset + N > end {
            return None;
        }
        // SAFETY: the range [start + offset, start + offset + N) was checked
        // against data_end above.
        Some(unsafe { core::ptr::read_unaligned((start + offset) as *const [u8; N]) })
    }
}

/// skb access through bpf_skb_load_bytes (handles non-linear skbs).
struct TcPacket<'a>(&'a TcContext);

impl PacketView for TcPacket<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.0.len() as usize
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        if !self.has(offset, N) {
            return None;
        }
        self.0.load::<[u8; N]>(offset).ok()
    }
}

struct SocketPacket<'a>(&'a SkBuffContext);

impl PacketView for SocketPacket<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.0.len() as usize
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        if !self.has(offset, N) {
            return None;
        }
        self.0.load::<[u8; N]>(offset).ok()
    }
}

// =============================================================================
// HOOKS
// =============================================================================

#[xdp]
pub fn xdp_metadata_blocker(ctx: XdpContext) -> u32 {
    let classification = guard().inspect(&XdpPacket(&ctx));
    log_decision(&ctx, &classification);
    XDP_ACTIONS.action(classification.verdict)
}

#[classifier]
pub fn tc_metadata_blocker(ctx: TcContext) -> i32 {
    let classification = guard().inspect(&TcPacket(&ctx));
    log_decision(&ctx, &classification);
    TC_ACTIONS.action(classification.verdict)
}

#[socket_filter]
pub fn socket_metadata_filter(ctx: SkBuffContext) -> i64 {
    let classification = guard().inspect(&SocketPacket(&ctx));
    log_decision(&ctx, &classification);
    SOCKET_ACTIONS.action(classification.verdict)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
