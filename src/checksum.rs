//! MD5 checksum utility. Pure, streaming, no retained state beyond the hasher.

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes the lowercase hex MD5 of everything read from `reader`, consuming it fully.
pub async fn md5_hex_reader<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_simd::encode_to_string(hasher.finalize(), hex_simd::AsciiCase::Lower))
}

/// Computes the lowercase hex MD5 of an in-memory byte slice.
pub fn md5_hex_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex_simd::encode_to_string(hasher.finalize(), hex_simd::AsciiCase::Lower)
}

/// Convenience wrapper: opens `path` and delegates to [`md5_hex_reader`].
pub async fn md5_hex_file(path: &std::path::Path) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    md5_hex_reader(file).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_has_well_known_digest() {
        assert_eq!(md5_hex_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn matches_across_reader_and_bytes() {
        let data = b"some content";
        let from_bytes = md5_hex_bytes(data);
        let from_reader = md5_hex_reader(&data[..]).await.unwrap();
        assert_eq!(from_bytes, from_reader);
        assert_eq!(from_bytes, "d8e8fca2dc0f896fd7cb4cb0031ba249");
    }

    #[tokio::test]
    async fn file_checksum_matches_reader_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, b"some content").await.unwrap();
        let from_file = md5_hex_file(&path).await.unwrap();
        assert_eq!(from_file, "d8e8fca2dc0f896fd7cb4cb0031ba249");
    }
}
