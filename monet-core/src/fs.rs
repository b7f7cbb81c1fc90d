use async_trait::async_trait;
use chrono::{DateTime, Utc};
use monet_model::FileStat;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncRead;

/// Byte source returned by [`FileSystem::open`].
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// One child of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    /// True for real directories only; symlinks to directories are not
    /// followed during traversal.
    pub is_dir: bool,
    /// The on-disk name is not valid UTF-8 and `name` is a lossy rendering
    /// of it. Such entries cannot be addressed by `name` and are not
    /// cataloged; they still count toward the parent's listing hash.
    pub lossy_name: bool,
}

/// Absolute form of `path` resolved against the working directory, without
/// touching the filesystem. `.` components and trailing separators are
/// dropped; `..` and symlinks are left as written.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    Ok(std::path::absolute(path)?.components().collect())
}

/// Minimal, async-capable filesystem abstraction used by the catalog.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Check whether a path exists.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Fetch the metadata snapshot recorded on a record.
    async fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// List a directory's children. Ordering is backend-defined.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;

    /// Open a file for streaming reads.
    async fn open(&self, path: &Path) -> io::Result<ByteReader>;
}

/// Real filesystem implementation backed by tokio::fs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        // try_exists avoids errors for permission issues by returning false
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let md = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            size: md.len(),
            mode: permission_bits(&md),
            modified: md.modified().ok().map(DateTime::<Utc>::from),
            is_file: md.is_file(),
            is_directory: md.is_dir(),
        })
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = match entry.file_type().await {
                Ok(file_type) => file_type.is_dir(),
                Err(e) => {
                    tracing::warn!(target: "catalog::fs", path = %entry.path().display(), error = %e, "could not read entry type");
                    false
                }
            };
            let (name, lossy_name) = match entry.file_name().into_string() {
                Ok(name) => (name, false),
                Err(raw) => (raw.to_string_lossy().into_owned(), true),
            };
            entries.push(DirEntryInfo {
                name,
                is_dir,
                lossy_name,
            });
        }
        Ok(entries)
    }

    async fn open(&self, path: &Path) -> io::Result<ByteReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

#[cfg(unix)]
fn permission_bits(md: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn permission_bits(md: &std::fs::Metadata) -> u32 {
    if md.permissions().readonly() { 0o444 } else { 0o644 }
}

/// In-memory filesystem for tests.
///
/// Directory listings are returned in insertion order unless overridden with
/// [`InMemoryFs::set_listing_order`]. Paths are treated literally.
#[derive(Default)]
pub struct InMemoryFs {
    nodes: RwLock<HashMap<PathBuf, Node>>,
}

#[derive(Clone)]
enum Node {
    Dir { children: Vec<String> },
    File { bytes: Vec<u8>, modified: DateTime<Utc> },
    Other,
}

impl fmt::Debug for InMemoryFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.nodes.read().map(|nodes| nodes.len()).unwrap_or(0);
        f.debug_struct("InMemoryFs").field("nodes", &count).finish()
    }
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.write();
        if nodes.contains_key(&path) {
            return;
        }
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
            },
        );
    }

    /// Create or overwrite a file.
    pub fn add_file<P: Into<PathBuf>>(&self, path: P, bytes: impl Into<Vec<u8>>) {
        let path = path.into();
        let mut nodes = self.write();
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::File {
                bytes: bytes.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Add an entry that is neither a file nor a directory (socket, fifo, ...).
    pub fn add_other<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.write();
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::Other);
    }

    pub fn remove(&self, path: &Path) {
        let mut nodes = self.write();
        nodes.remove(path);
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
            && let Some(Node::Dir { children }) = nodes.get_mut(parent)
        {
            let name = name.to_string_lossy();
            children.retain(|child| *child != name);
        }
    }

    /// Replace the order in which a directory reports its children.
    pub fn set_listing_order(&self, path: &Path, names: &[&str]) {
        if let Some(Node::Dir { children }) = self.write().get_mut(path) {
            *children = names.iter().map(|name| name.to_string()).collect();
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Node>> {
        self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Node>> {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if parent.as_os_str().is_empty() {
            return;
        }
        if !nodes.contains_key(parent) {
            Self::ensure_parent_link(nodes, parent);
            nodes.insert(
                parent.to_path_buf(),
                Node::Dir {
                    children: Vec::new(),
                },
            );
        }
        if let Some(Node::Dir { children }) = nodes.get_mut(parent) {
            let name = name.to_string_lossy().to_string();
            if !children.contains(&name) {
                children.push(name);
            }
        }
    }

    fn missing(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such path: {}", path.display()),
        )
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.read().contains_key(path)
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        match self.read().get(path) {
            Some(Node::Dir { .. }) => Ok(FileStat {
                size: 0,
                mode: 0o755,
                modified: None,
                is_file: false,
                is_directory: true,
            }),
            Some(Node::File { bytes, modified }) => Ok(FileStat {
                size: bytes.len() as u64,
                mode: 0o644,
                modified: Some(*modified),
                is_file: true,
                is_directory: false,
            }),
            Some(Node::Other) => Ok(FileStat {
                size: 0,
                mode: 0o600,
                modified: None,
                is_file: false,
                is_directory: false,
            }),
            None => Err(Self::missing(path)),
        }
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let nodes = self.read();
        match nodes.get(path) {
            Some(Node::Dir { children }) => Ok(children
                .iter()
                .map(|name| DirEntryInfo {
                    name: name.clone(),
                    is_dir: matches!(nodes.get(&path.join(name)), Some(Node::Dir { .. })),
                    lossy_name: false,
                })
                .collect()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", path.display()),
            )),
            None => Err(Self::missing(path)),
        }
    }

    async fn open(&self, path: &Path) -> io::Result<ByteReader> {
        match self.read().get(path) {
            Some(Node::File { bytes, .. }) => {
                Ok(Box::new(io::Cursor::new(bytes.clone())))
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a regular file: {}", path.display()),
            )),
            None => Err(Self::missing(path)),
        }
    }
}
