use serde::{Deserialize, Serialize};

/// Schema version stamped on every successfully recomputed record.
///
/// Raising it forces every stored record through recomputation on its next
/// lookup, regardless of content.
pub const RECORD_SCHEMA_VERSION: u32 = 2;

/// Global knobs for the catalog.
///
/// All fields carry defaults so a partial configuration file only needs to
/// name what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Version records must carry to be considered current.
    pub schema_version: u32,
    /// How directory listings are folded into a hash.
    pub directory_hash: DirectoryHashMode,
    /// Directory reconciliation tuning.
    pub sync: SyncConfig,
    /// Where records are persisted.
    pub backend: BackendConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            directory_hash: DirectoryHashMode::default(),
            sync: SyncConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Directory hash strategy.
///
/// `Raw` hashes child names in the order the filesystem returned them, which
/// matches hashes already stored by earlier catalog versions but is not
/// guaranteed stable across listings. `Sorted` is stable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryHashMode {
    #[default]
    Raw,
    Sorted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on concurrent exists/register tasks during one sync.
    pub max_parallel_registrations: usize,
    /// Register dot-files and descend into dot-directories.
    pub include_hidden: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel_registrations: (num_cpus::get() * 2).clamp(4, 32),
            include_hidden: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local store; contents vanish with the process.
    #[default]
    Memory,
    Postgres(PostgresConfig),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/monet".to_string(),
            max_connections: num_cpus::get() as u32,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}
