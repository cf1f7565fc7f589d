//! Bounded packet view.
//!
//! Every read the parser performs goes through [`PacketView::load`], which
//! checks `offset + N <= end` before touching memory. Hook programs implement
//! the trait over their native context; userspace uses [`SlicePacket`].

/// A read-only, range-checked view over one packet's captured bytes.
pub trait PacketView {
    /// Number of captured bytes (the `end` bound relative to the start).
    fn len(&self) -> usize;

    /// Copy `N` bytes starting at `offset`, or `None` if any of them lies past
    /// the end of the captured data.
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `n` bytes at `offset` are inside the captured range.
    #[inline(always)]
    fn has(&self, offset: usize, n: usize) -> bool {
        match offset.checked_add(n) {
            Some(end) => end <= self.len(),
            None => false,
        }
    }

    #[inline(always)]
    fn byte(&self, offset: usize) -> Option<u8> {
        self.load::<1>(offset).map(|b| b[0])
    }
}

/// Packet view over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct SlicePacket<'a> {
    data: &'a [u8],
}

impl<'a> SlicePacket<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl PacketView for SlicePacket<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        if !self.has(offset, N) {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[offset..offset + N]);
        Some(out)
    }
}
