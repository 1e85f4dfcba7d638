//! Cache key derived from the host's connection object

use crate::packet::ConnId;

const GOLDEN: u64 = 2_654_435_761;

/// Fibonacci-hash digest of a [`ConnId`]
///
/// Distinct connections may collide and the host may recycle an id, so a key
/// is only ever a lookup hint; the stored identity decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey(pub u64);

impl FlowKey {
    /// Key of a connection object
    ///
    /// The low three bits are dropped since connection objects are at least
    /// 8-byte aligned.
    pub fn from_conn(conn: ConnId) -> Self {
        let k = (conn.0 >> 3).wrapping_mul(GOLDEN);
        FlowKey(k.rotate_left(32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(FlowKey::from_conn(ConnId(0)), FlowKey(0));
        assert_eq!(FlowKey::from_conn(ConnId(8)), FlowKey(GOLDEN << 32));
        // alignment bits are ignored
        assert_eq!(FlowKey::from_conn(ConnId(0x1000)), FlowKey::from_conn(ConnId(0x1007)));
    }

    #[test]
    fn test_wrapping() {
        let key = FlowKey::from_conn(ConnId(u64::MAX));
        let expected = (u64::MAX >> 3).wrapping_mul(GOLDEN).rotate_left(32);
        assert_eq!(key.0, expected);
    }
}
