use std::io::{self, Write};

use sha2::{Digest, Sha256};

/// Computes a deterministic SHA-256 hash over snapshot bytes.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Writer adapter that hashes and counts everything passed through to `inner`.
///
/// Lets a snapshot be copied and checksummed in a single pass over the source.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the hex digest and the number of bytes written.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_same_content() {
        let data = b"lifeboat-test";
        assert_eq!(content_hash(data), content_hash(data));
    }

    #[test]
    fn hash_changes_when_content_changes() {
        assert_ne!(content_hash(b"v1"), content_hash(b"v2"));
    }

    #[test]
    fn writer_hash_matches_one_shot_hash() {
        let payload = vec![7u8; 10_000];
        let mut writer = HashingWriter::new(Vec::new());
        io::copy(&mut payload.as_slice(), &mut writer).unwrap();
        let (copied, digest, written) = writer.finish();

        assert_eq!(copied, payload);
        assert_eq!(written, payload.len() as u64);
        assert_eq!(digest, content_hash(&payload));
    }
}
