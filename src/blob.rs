//! The value object moved through the migration pipeline.

/// The four logical buckets this migrator knows how to move. Order matters:
/// it is the order buckets are processed in during a migration run.
pub const LOGICAL_BUCKETS: [&str; 4] = ["cc-buildpacks", "cc-droplets", "cc-packages", "cc-resources"];

/// A single object identified by its path and expected MD5 checksum.
///
/// `path` is slash-separated; its first segment is the logical bucket name
/// and the remainder is the object key within that bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Blob {
    pub path: String,
    pub checksum: String,
}

impl Blob {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), checksum: String::new() }
    }

    pub fn with_checksum(path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self { path: path.into(), checksum: checksum.into() }
    }

    /// Returns a copy of this blob with `checksum` assigned.
    pub fn assign_checksum(&self, checksum: impl Into<String>) -> Self {
        Self { path: self.path.clone(), checksum: checksum.into() }
    }

    /// The logical bucket name: the first `/`-segment of `path`.
    pub fn bucket(&self) -> &str {
        match self.path.find('/') {
            Some(idx) => &self.path[..idx],
            None => &self.path,
        }
    }

    /// The object key within its bucket: everything after the first `/`.
    pub fn key(&self) -> &str {
        match self.path.find('/') {
            Some(idx) => &self.path[idx + 1..],
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bucket_and_key() {
        let blob = Blob::new("cc-buildpacks/aa/bb/file");
        assert_eq!(blob.bucket(), "cc-buildpacks");
        assert_eq!(blob.key(), "aa/bb/file");
    }

    #[test]
    fn assign_checksum_is_immutable() {
        let blob = Blob::new("cc-droplets/x");
        let checksummed = blob.assign_checksum("abc123");
        assert_eq!(blob.checksum, "");
        assert_eq!(checksummed.checksum, "abc123");
    }
}
