//! Secure memory helpers: clear, constant-time compare, zeroizing concat.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// Overwrite `buffer` with zeros in a way the optimizer will not elide.
pub fn clear(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Constant-time equality. Buffers of different length compare unequal
/// (the length itself is not secret).
pub fn compare(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Concatenate `parts` into a buffer that zeroizes on drop.
pub fn concat(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let len = parts.iter().map(|part| part.len()).sum();
    let mut out = Zeroizing::new(Vec::with_capacity(len));
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_zeroes_buffer() {
        let mut buffer = [0xFFu8; 16];
        clear(&mut buffer);
        assert_eq!(buffer, [0u8; 16]);
    }

    #[test]
    fn compare_matches_equality() {
        assert!(compare(b"abc", b"abc"));
        assert!(!compare(b"abc", b"abd"));
        assert!(!compare(b"abc", b"abcd"));
        assert!(compare(b"", b""));
    }

    #[test]
    fn concat_preserves_order() {
        let joined = concat(&[b"ab".as_slice(), b"".as_slice(), b"cde".as_slice()]);
        assert_eq!(joined.as_slice(), b"abcde");
    }
}
