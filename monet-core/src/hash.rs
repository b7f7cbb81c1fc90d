//! Content fingerprints for files and directory listings.
//!
//! Files hash their bytes; directories hash their child-name listing. Both
//! produce lowercase hex SHA-256 digests. Entries that are neither get a
//! random placeholder that never matches anything, so they are always
//! treated as changed.

use std::io;
use std::path::Path;
use std::sync::Arc;

use monet_model::FileKind;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::config::DirectoryHashMode;
use crate::fs::FileSystem;

const READ_CHUNK: usize = 64 * 1024;
const PLACEHOLDER_PREFIX: &str = "volatile:";

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash everything readable from `reader`, in fixed-size chunks.
pub async fn hash_reader<R>(mut reader: R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash of the names concatenated in observed order.
///
/// Compatible with hashes stored by earlier catalog versions. Two listings of
/// an unchanged directory can disagree if the filesystem reorders entries.
pub fn raw_listing_hash<S: AsRef<str>>(names: &[S]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Order-independent hash of the names, NUL separated.
pub fn sorted_listing_hash<S: AsRef<str>>(names: &[S]) -> String {
    let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for name in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub fn listing_hash<S: AsRef<str>>(names: &[S], mode: DirectoryHashMode) -> String {
    match mode {
        DirectoryHashMode::Raw => raw_listing_hash(names),
        DirectoryHashMode::Sorted => sorted_listing_hash(names),
    }
}

pub fn placeholder_hash() -> String {
    format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4().simple())
}

pub fn is_placeholder(hash: &str) -> bool {
    hash.starts_with(PLACEHOLDER_PREFIX)
}

/// Computes fingerprints of on-disk content through a [`FileSystem`].
#[derive(Debug, Clone)]
pub struct Hasher {
    fs: Arc<dyn FileSystem>,
    directory_mode: DirectoryHashMode,
}

impl Hasher {
    pub fn new(fs: Arc<dyn FileSystem>, directory_mode: DirectoryHashMode) -> Self {
        Self { fs, directory_mode }
    }

    pub fn directory_mode(&self) -> DirectoryHashMode {
        self.directory_mode
    }

    pub async fn hash_file(&self, path: &Path) -> io::Result<String> {
        let reader = self.fs.open(path).await?;
        hash_reader(reader).await
    }

    pub async fn hash_directory(&self, path: &Path) -> io::Result<String> {
        let names: Vec<String> = self
            .fs
            .read_dir(path)
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        Ok(self.hash_listing(&names))
    }

    pub fn hash_listing<S: AsRef<str>>(&self, names: &[S]) -> String {
        listing_hash(names, self.directory_mode)
    }

    /// Fingerprint whatever currently lives at `path`, interpreted as `kind`.
    pub async fn fingerprint(&self, path: &Path, kind: FileKind) -> io::Result<String> {
        match kind {
            FileKind::File => self.hash_file(path).await,
            FileKind::Directory => self.hash_directory(path).await,
            FileKind::Other => Ok(placeholder_hash()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn identical_bytes_hash_identically_across_paths() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/a/one.txt", "same content");
        fs.add_file("/b/two.txt", "same content");
        fs.add_file("/b/three.txt", "other content");
        let hasher = Hasher::new(fs, DirectoryHashMode::Raw);

        let one = hasher.hash_file(Path::new("/a/one.txt")).await.expect("hash");
        let two = hasher.hash_file(Path::new("/b/two.txt")).await.expect("hash");
        let three = hasher.hash_file(Path::new("/b/three.txt")).await.expect("hash");

        assert_eq!(one, two);
        assert_ne!(one, three);
        assert_eq!(one, hash_bytes(b"same content"));
    }

    #[tokio::test]
    async fn streaming_hash_matches_in_memory_hash_for_large_input() {
        let data: Vec<u8> = (0..(READ_CHUNK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(std::io::Cursor::new(data.clone()))
            .await
            .expect("hash");
        assert_eq!(streamed, hash_bytes(&data));
    }

    #[test]
    fn raw_listing_hash_depends_on_order_but_sorted_does_not() {
        let forward = ["a.txt", "b.txt"];
        let reversed = ["b.txt", "a.txt"];

        assert_ne!(raw_listing_hash(&forward), raw_listing_hash(&reversed));
        assert_eq!(sorted_listing_hash(&forward), sorted_listing_hash(&reversed));
    }

    #[test]
    fn sorted_listing_hash_separates_names() {
        assert_ne!(
            sorted_listing_hash(&["ab", "c"]),
            sorted_listing_hash(&["a", "bc"])
        );
    }

    #[tokio::test]
    async fn other_entries_never_share_a_fingerprint() {
        let fs = Arc::new(InMemoryFs::new());
        fs.add_other("/dev/socket");
        let hasher = Hasher::new(fs, DirectoryHashMode::Raw);

        let first = hasher
            .fingerprint(Path::new("/dev/socket"), FileKind::Other)
            .await
            .expect("hash");
        let second = hasher
            .fingerprint(Path::new("/dev/socket"), FileKind::Other)
            .await
            .expect("hash");
        assert!(is_placeholder(&first));
        assert_ne!(first, second);
    }
}
