use std::collections::HashMap;
use std::fs;

use monet_config::{BackendConfig, ConfigLoadError, ConfigLoader, ConfigSource};
use monet_core::config::DirectoryHashMode;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::new().with_search_dir(dir.path()).without_dotenv()
}

#[test]
fn falls_back_to_defaults_without_any_source() {
    let dir = TempDir::new().unwrap();
    let load = loader(&dir).load_with(env(&[])).unwrap();

    assert_eq!(load.source, ConfigSource::Default);
    assert!(load.overrides.is_empty());
    assert!(matches!(load.config.backend, BackendConfig::Memory));
}

#[test]
fn picks_up_default_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monet.toml");
    fs::write(
        &path,
        r#"
directory_hash = "sorted"

[sync]
include_hidden = false
"#,
    )
    .unwrap();

    let load = loader(&dir).load_with(env(&[])).unwrap();

    assert_eq!(load.source, ConfigSource::File(path));
    assert_eq!(load.config.directory_hash, DirectoryHashMode::Sorted);
    assert!(!load.config.sync.include_hidden);
}

#[test]
fn env_path_wins_over_inline_json_and_default_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("monet.toml"), "schema_version = 9\n").unwrap();
    let custom = dir.path().join("custom.json");
    fs::write(&custom, r#"{"schema_version": 5}"#).unwrap();

    let load = loader(&dir)
        .load_with(env(&[
            ("MONET_CONFIG_PATH", custom.to_str().unwrap()),
            ("MONET_CONFIG_JSON", r#"{"schema_version": 7}"#),
        ]))
        .unwrap();

    assert_eq!(load.source, ConfigSource::EnvPath(custom));
    assert_eq!(load.config.schema_version, 5);
}

#[test]
fn explicit_path_wins_over_environment() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("explicit.toml");
    fs::write(&explicit, "schema_version = 3\n").unwrap();

    let load = loader(&dir)
        .with_config_path(&explicit)
        .load_with(env(&[("MONET_CONFIG_JSON", r#"{"schema_version": 7}"#)]))
        .unwrap();

    assert_eq!(load.source, ConfigSource::Explicit(explicit));
    assert_eq!(load.config.schema_version, 3);
}

#[test]
fn inline_json_is_used_when_no_path_given() {
    let dir = TempDir::new().unwrap();
    let load = loader(&dir)
        .load_with(env(&[(
            "MONET_CONFIG_JSON",
            r#"{"backend": {"kind": "postgres", "url": "postgres://db/monet"}}"#,
        )]))
        .unwrap();

    assert_eq!(load.source, ConfigSource::EnvInline);
    match load.config.backend {
        BackendConfig::Postgres(pg) => assert_eq!(pg.url, "postgres://db/monet"),
        other => panic!("unexpected backend {other:?}"),
    }
}

#[test]
fn database_url_switches_memory_backend_to_postgres() {
    let dir = TempDir::new().unwrap();
    let load = loader(&dir)
        .load_with(env(&[
            ("DATABASE_URL", "postgres://override/monet"),
            ("DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();

    assert_eq!(load.overrides, vec!["DATABASE_URL", "DB_MAX_CONNECTIONS"]);
    match load.config.backend {
        BackendConfig::Postgres(pg) => {
            assert_eq!(pg.url, "postgres://override/monet");
            assert_eq!(pg.max_connections, 12);
        }
        other => panic!("unexpected backend {other:?}"),
    }
}

#[test]
fn sync_overrides_apply_on_top_of_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("monet.json"),
        r#"{"sync": {"max_parallel_registrations": 8, "include_hidden": true}}"#,
    )
    .unwrap();

    let load = loader(&dir)
        .load_with(env(&[
            ("MONET_SYNC_PARALLELISM", "3"),
            ("MONET_SYNC_INCLUDE_HIDDEN", "no"),
            ("MONET_DIRECTORY_HASH", "Sorted"),
        ]))
        .unwrap();

    assert_eq!(load.config.sync.max_parallel_registrations, 3);
    assert!(!load.config.sync.include_hidden);
    assert_eq!(load.config.directory_hash, DirectoryHashMode::Sorted);
}

#[test]
fn invalid_override_values_are_rejected() {
    let dir = TempDir::new().unwrap();

    let err = loader(&dir)
        .load_with(env(&[("MONET_SYNC_PARALLELISM", "0")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidEnv { name: "MONET_SYNC_PARALLELISM", .. }
    ));

    let err = loader(&dir)
        .load_with(env(&[("MONET_DIRECTORY_HASH", "murmur")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidEnv { name: "MONET_DIRECTORY_HASH", .. }
    ));

    let err = loader(&dir)
        .load_with(env(&[("MONET_SYNC_INCLUDE_HIDDEN", "sometimes")]))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::InvalidEnv { .. }));
}

#[test]
fn missing_or_malformed_files_surface_errors() {
    let dir = TempDir::new().unwrap();

    let err = loader(&dir)
        .with_config_path(dir.path().join("absent.toml"))
        .load_with(env(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Read { .. }));

    let broken = dir.path().join("broken.conf");
    fs::write(&broken, "this is = = not valid").unwrap();
    let err = loader(&dir)
        .with_config_path(&broken)
        .load_with(env(&[]))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn explicit_env_file_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = ConfigLoader::new()
        .with_search_dir(dir.path())
        .with_env_file(dir.path().join("missing.env"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::EnvFile(_)));
}
