//! MD5 content hash, stored as lowercase hex in `MediaRecord::md5`.

use md5::{Digest, Md5};
use std::io::{self, Read};

/// Hex-encodes `digest` as lowercase, matching the record store's `md5` column format.
pub fn to_hex(digest: &[u8; 16]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hashes the full contents of `reader` and returns the lowercase hex digest.
pub fn hash_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest: [u8; 16] = hasher.finalize().into();
    Ok(to_hex(&digest))
}

/// Hashes an in-memory buffer, e.g. a decoded archive member.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest: [u8; 16] = Md5::digest(bytes).into();
    to_hex(&digest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_digest() {
        // md5("") == d41d8cd98f00b204e9800998ecf8427e
        assert_eq!("d41d8cd98f00b204e9800998ecf8427e", hash_bytes(b""));
    }

    #[test]
    fn reader_matches_bytes() {
        let data = b"the quick brown fox";
        assert_eq!(hash_bytes(data), hash_reader(&data[..]).unwrap());
    }
}
