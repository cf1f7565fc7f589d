//! Request-line matcher for the IMDSv2 token bootstrap.
//!
//! Only `PUT <sp>/latest/api/token<sp>` at the very start of the TCP payload is
//! accepted. Matching is case-sensitive and exact; anything the matcher cannot
//! confirm within the captured bytes is not a match.

use crate::packet::PacketView;
use crate::policy::{REQUEST_LINE_WINDOW, TOKEN_METHOD, TOKEN_PATH_MATCH};

const PATH_MATCH_LEN: usize = 18;

/// True when the payload at `payload_offset` starts a token request.
#[inline(always)]
pub fn is_token_request<P: PacketView>(packet: &P, payload_offset: usize) -> bool {
    match packet.load::<3>(payload_offset) {
        Some(method) if &method == TOKEN_METHOD => {}
        _ => return false,
    }

    let space = match find_space(packet, payload_offset) {
        Some(offset) => offset,
        None => return false,
    };

    match packet.load::<PATH_MATCH_LEN>(space + 1) {
        Some(path) => &path == TOKEN_PATH_MATCH,
        None => false,
    }
}

/// Offset of the first space at or after `payload_offset`, bounded by the
/// lookahead window and the end of the captured data.
#[inline(always)]
fn find_space<P: PacketView>(packet: &P, payload_offset: usize) -> Option<usize> {
    let window_end = payload_offset
        .saturating_add(REQUEST_LINE_WINDOW)
        .min(packet.len());

    let mut offset = payload_offset;
    while offset < window_end {
        if packet.byte(offset)? == b' ' {
            return Some(offset);
        }
        offset += 1;
    }
    None
}
