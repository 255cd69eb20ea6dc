//! Content identity helpers.

use sha1::{Digest, Sha1};

/// Length of a SHA-1 digest.
pub const SHA1_LEN: usize = 20;

/// SHA-1 of a complete blob, used as the modem configuration id.
pub fn sha1_digest(data: &[u8]) -> [u8; SHA1_LEN] {
    Sha1::digest(data).into()
}

/// Whether a block is erased flash (every byte `0xFF`).
pub fn is_erased(data: &[u8]) -> bool {
    data.iter()
        .all(|b| *b == 0xFF)
}
