//! The "Daniel J. Bernstein, times 33 with addition" string hash, exactly as
//! computed by the Zend engine for interned strings. The generated C compares
//! `zend_string.h` values against the numeric literals we emit, so this must
//! reproduce PHP's arithmetic bit for bit on the same bytes.

/// Width follows the interpreter: zend_ulong is 64 bits on 64-bit hosts.
#[cfg(target_pointer_width = "64")]
pub type PathHash = u64;
#[cfg(not(target_pointer_width = "64"))]
pub type PathHash = u32;

#[cfg(target_pointer_width = "64")]
const TOP_BIT: PathHash = 1 << 63;
#[cfg(not(target_pointer_width = "64"))]
const TOP_BIT: PathHash = 1 << 31;

/// See Zend/zend_string.h (zend_inline_hash_func) for the C original. The
/// 8-at-a-time block structure is kept from there; bytes are consumed
/// individually so host endianness never matters.
///
/// Zend marks computed hashes by setting the top bit, which distinguishes
/// them from the "uninitialized" value 0. That invariant carries over: every
/// value returned here has its top bit set.
pub fn djbx33a(bytes: &[u8]) -> PathHash {
    let mut hash: PathHash = 5381;
    let mut i = 0;

    let mut length = bytes.len();
    while length >= 8 {
        for _ in 0..8 {
            hash = hash
                .wrapping_shl(5)
                .wrapping_add(hash)
                .wrapping_add(bytes[i] as PathHash);
            i += 1;
        }
        length -= 8;
    }

    for _ in 0..length {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(bytes[i] as PathHash);
        i += 1;
    }

    hash | TOP_BIT
}

#[cfg(test)]
mod test {
    use crate::hash::{djbx33a, PathHash, TOP_BIT};

    // The obvious one-byte-at-a-time fold, for cross checking the blocked
    // implementation.
    fn naive(bytes: &[u8]) -> PathHash {
        let mut hash: PathHash = 5381;
        for &b in bytes {
            hash = hash
                .wrapping_mul(33)
                .wrapping_add(b as PathHash);
        }
        hash | TOP_BIT
    }

    #[test]
    fn known_values() {
        assert_eq!(djbx33a(b""), 5381 | TOP_BIT);
        // 5381 * 33 + 'a'
        assert_eq!(djbx33a(b"a"), (5381 * 33 + 97) | TOP_BIT);
    }

    #[test]
    fn top_bit_always_set() {
        for input in [
            &b""[..],
            b"/var/www/html/index.php",
            b"x",
            b"someverylongpaththatneedsmorethanoneblock/of/eight/bytes.php",
        ]
        .iter()
        {
            assert_eq!(djbx33a(input) >> (8 * std::mem::size_of::<PathHash>() - 1), 1);
        }
    }

    #[test]
    fn blocked_matches_naive_at_boundaries() {
        // Lengths around the 8-byte block boundary exercise both loops.
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789";
        for len in 0..data.len() {
            assert_eq!(djbx33a(&data[..len]), naive(&data[..len]), "len {}", len);
        }
    }
}
