//! Payload fingerprinting
//!
//! A cheap fixed-size digest that lets a detector remember "what the payload
//! looked like" across packets without keeping the bytes. Not cryptographic:
//! it only has to be stable for identical input.

/// Shortest input for which [`fold_hash`] produces a non-zero digest
pub const MIN_HASH_LEN: usize = 16;

/// Number of overlapping 4-byte windows folded into the digest
pub const FOLD_WINDOWS: usize = 4;

/// XOR-fold the first [`FOLD_WINDOWS`] overlapping 4-byte windows of `data`
///
/// Window `i` covers `data[i..i + 4]`; digest byte `j` is the XOR of
/// `data[i + j]` over all windows. Bytes beyond the first seven never
/// contribute, which makes this a fingerprint of the head of the region.
/// Inputs shorter than [`MIN_HASH_LEN`] hash to zero.
pub fn fold_hash(data: &[u8]) -> u32 {
    if data.len() < MIN_HASH_LEN {
        return 0;
    }

    let mut digest = [0u8; 4];
    for window in data.windows(4).take(FOLD_WINDOWS) {
        for (d, b) in digest.iter_mut().zip(window) {
            *d ^= *b;
        }
    }
    u32::from_le_bytes(digest)
}
