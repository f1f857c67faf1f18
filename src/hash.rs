use std::fmt;
use std::fs;
use std::path::Path;

use md5::{Digest, Md5};

/// Number of raw digest bytes in a content hash.
pub const HASH_LEN: usize = 16;

/// 128-bit digest identifying a single beatmap difficulty by file content.
///
/// The canonical in-memory form is the raw digest. Database versions before
/// the raw-digest switch persist the 32-character hex form instead; both are
/// accepted on read and converted here.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl ContentHash {
    /// The all-zero hash, used as the "missing" sentinel.
    pub const ZERO: ContentHash = ContentHash([0; HASH_LEN]);

    /// Parse the 32-character hex form.
    pub fn from_hex(s: &str) -> Option<ContentHash> {
        let bytes = s.as_bytes();
        if bytes.len() != HASH_LEN * 2 {
            return None;
        }

        let mut out = [0_u8; HASH_LEN];
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            out[i] = ((hi << 4) | lo) as u8;
        }
        Some(ContentHash(out))
    }

    /// Format as 32 lowercase hex characters (the legacy persisted form).
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;

        let mut s = String::with_capacity(HASH_LEN * 2);
        for b in self.0.iter() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    /// Whether this hash can be trusted as a key. Empty (all-zero) hashes
    /// come from corrupt reads and must not be persisted.
    pub fn is_suspicious(&self) -> bool {
        *self == ContentHash::ZERO
    }

    /// Digest a file's bytes, used to repair entries whose stored hash was
    /// empty or unparseable. Returns `None` if the file can't be read.
    pub fn recalculate(path: impl AsRef<Path>) -> Option<ContentHash> {
        let data = fs::read(path.as_ref()).ok()?;
        let mut hasher = Md5::new();
        hasher.update(&data);
        Some(ContentHash(hasher.finalize().into()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::ContentHash;

    #[test]
    fn test_hex_round_trip() {
        let h = ContentHash([
            0x79, 0x56, 0x38, 0x00, 0x54, 0xf6, 0xa8, 0x02, 0x3f, 0xa7, 0x61, 0x4e, 0x18, 0xff,
            0xe1, 0xb6,
        ]);
        let hex = h.to_hex();
        assert_eq!(hex, "7956380054f6a8023fa7614e18ffe1b6");
        assert_eq!(ContentHash::from_hex(&hex), Some(h));
    }

    #[test]
    fn test_bad_hex() {
        assert_eq!(ContentHash::from_hex("zz"), None);
        assert_eq!(ContentHash::from_hex("7956"), None);
        assert_eq!(
            ContentHash::from_hex("7956380054f6a8023fa7614e18ffe1bg"),
            None
        );
    }

    #[test]
    fn test_suspicious() {
        assert!(ContentHash::ZERO.is_suspicious());
        assert!(!ContentHash([1; 16]).is_suspicious());
    }
}
