//! Configuration for callsync.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI on top of this)
//! 2. Environment variables (CALLSYNC_HOME, CALLSYNC_ROOT, CALLSYNC_DB)
//! 3. Config file (.callsync/config.yaml)
//! 4. Defaults (~/.callsync, the Asterisk call_sessions directory)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callsync/config.yaml
//! - Paths in config file are relative to the directory containing .callsync/

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ingest::{ConversationLayout, MissingRootPolicy, UnregisteredPolicy, WatcherConfig};

/// Where the recording subsystem writes call sessions by default
pub const DEFAULT_RECORDINGS_ROOT: &str = "/usr/local/share/asterisk/sounds/call_sessions";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    /// Recordings root
    pub recordings_root: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub unregistered_callers: Option<UnregisteredPolicy>,
    pub conversation_layouts: Option<Vec<ConversationLayout>>,
    pub settle_delay_ms: Option<u64>,
    pub scan_registered_only: Option<bool>,
    #[serde(default)]
    pub missing_root: Option<MissingRootConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MissingRootConfig {
    pub scan: Option<MissingRootPolicy>,
    pub watch: Option<MissingRootPolicy>,
    pub wait_poll_secs: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to callsync home (state)
    pub home: PathBuf,
    /// Recordings root the scanner and watcher operate on
    pub recordings_root: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Ingestion policy
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub unregistered_callers: UnregisteredPolicy,
    pub conversation_layouts: Vec<ConversationLayout>,
    pub settle_delay_ms: u64,
    pub scan_registered_only: bool,
    pub missing_root_scan: MissingRootPolicy,
    pub missing_root_watch: MissingRootPolicy,
    pub wait_poll_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            unregistered_callers: UnregisteredPolicy::default(),
            conversation_layouts: ConversationLayout::defaults(),
            settle_delay_ms: 1000,
            scan_registered_only: false,
            missing_root_scan: MissingRootPolicy::Fail,
            missing_root_watch: MissingRootPolicy::Wait,
            wait_poll_secs: 5,
        }
    }
}

impl IngestSettings {
    fn apply(&mut self, file: &IngestConfig) {
        if let Some(policy) = file.unregistered_callers {
            self.unregistered_callers = policy;
        }
        if let Some(layouts) = file.conversation_layouts.as_ref().filter(|l| !l.is_empty()) {
            self.conversation_layouts = layouts.clone();
        }
        if let Some(ms) = file.settle_delay_ms {
            self.settle_delay_ms = ms;
        }
        if let Some(registered_only) = file.scan_registered_only {
            self.scan_registered_only = registered_only;
        }
        if let Some(missing) = &file.missing_root {
            if let Some(policy) = missing.scan {
                self.missing_root_scan = policy;
            }
            if let Some(policy) = missing.watch {
                self.missing_root_watch = policy;
            }
            if let Some(secs) = missing.wait_poll_secs {
                self.wait_poll_secs = secs;
            }
        }
    }

    /// Watcher configuration derived from these settings
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            initial_scan: true,
            scan_registered_only: self.scan_registered_only,
            missing_root: self.missing_root_watch,
            root_poll_interval: Duration::from_secs(self.wait_poll_secs.max(1)),
        }
    }
}

/// Environment overrides, read once
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub recordings_root: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var("CALLSYNC_HOME").ok().map(PathBuf::from),
            recordings_root: std::env::var("CALLSYNC_ROOT").ok().map(PathBuf::from),
            database: std::env::var("CALLSYNC_DB").ok().map(PathBuf::from),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".callsync").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge defaults, an optional config file, and environment overrides
fn resolve(
    file: Option<(&Path, &ConfigFile)>,
    env: &EnvOverrides,
    default_home: PathBuf,
) -> ResolvedConfig {
    let mut ingest = IngestSettings::default();
    let mut home = default_home;
    let mut recordings_root = PathBuf::from(DEFAULT_RECORDINGS_ROOT);
    let mut database = None;

    if let Some((config_path, config)) = file {
        // Base directory is the parent of .callsync/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(ref p) = config.paths.home {
            home = resolve_path(base_dir, p);
        }
        if let Some(ref p) = config.paths.recordings_root {
            recordings_root = resolve_path(base_dir, p);
        }
        if let Some(ref p) = config.paths.database {
            database = Some(resolve_path(base_dir, p));
        }
        if let Some(ref file_ingest) = config.ingest {
            ingest.apply(file_ingest);
        }
    }

    if let Some(ref env_home) = env.home {
        home = env_home.clone();
    }
    if let Some(ref env_root) = env.recordings_root {
        recordings_root = env_root.clone();
    }
    if let Some(ref env_db) = env.database {
        database = Some(env_db.clone());
    }

    ResolvedConfig {
        database: database.unwrap_or_else(|| home.join("callsync.db")),
        home,
        recordings_root,
        config_file: file.map(|(p, _)| p.to_path_buf()),
        ingest,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".callsync");

    let env = EnvOverrides::from_env();

    match find_config_file() {
        Some(config_path) => {
            let config = load_config_file(&config_path)?;
            Ok(resolve(Some((config_path.as_path(), &config)), &env, default_home))
        }
        None => Ok(resolve(None, &env, default_home)),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve(None, &EnvOverrides::default(), PathBuf::from("/home/u/.callsync"));

        assert_eq!(config.home, PathBuf::from("/home/u/.callsync"));
        assert_eq!(config.database, PathBuf::from("/home/u/.callsync/callsync.db"));
        assert_eq!(config.recordings_root, PathBuf::from(DEFAULT_RECORDINGS_ROOT));
        assert!(config.config_file.is_none());
        assert_eq!(config.ingest.unregistered_callers, UnregisteredPolicy::Ownerless);
        assert_eq!(config.ingest.missing_root_scan, MissingRootPolicy::Fail);
        assert_eq!(config.ingest.missing_root_watch, MissingRootPolicy::Wait);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let callsync_dir = temp.path().join(".callsync");
        std::fs::create_dir_all(&callsync_dir).unwrap();

        let config_path = callsync_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  recordings_root: /srv/call_sessions
  database: state/calls.db
ingest:
  unregistered_callers: auto_create
  conversation_layouts: [sibling]
  settle_delay_ms: 250
  missing_root:
    scan: wait
    wait_poll_secs: 2
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version, "1.0");

        let config = resolve(
            Some((config_path.as_path(), &parsed)),
            &EnvOverrides::default(),
            PathBuf::from("/home/u/.callsync"),
        );
        assert_eq!(config.recordings_root, PathBuf::from("/srv/call_sessions"));
        assert_eq!(config.database, temp.path().join("state/calls.db"));
        assert_eq!(config.ingest.unregistered_callers, UnregisteredPolicy::AutoCreate);
        assert_eq!(config.ingest.conversation_layouts, vec![ConversationLayout::Sibling]);
        assert_eq!(config.ingest.settle_delay_ms, 250);
        assert_eq!(config.ingest.missing_root_scan, MissingRootPolicy::Wait);
        assert_eq!(config.ingest.missing_root_watch, MissingRootPolicy::Wait);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(".callsync/config.yaml");
        let parsed: ConfigFile = serde_yaml::from_str(
            "version: \"1.0\"\npaths:\n  recordings_root: /srv/a\n",
        )
        .unwrap();

        let env = EnvOverrides {
            home: Some(PathBuf::from("/var/lib/callsync")),
            recordings_root: Some(PathBuf::from("/srv/b")),
            database: None,
        };
        let config = resolve(Some((config_path.as_path(), &parsed)), &env, PathBuf::from("/unused"));

        assert_eq!(config.recordings_root, PathBuf::from("/srv/b"));
        assert_eq!(config.database, PathBuf::from("/var/lib/callsync/callsync.db"));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result: Result<ConfigFile, _> = serde_yaml::from_str(
            "version: \"1.0\"\ningest:\n  unregistered_callers: drop_silently\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_watcher_config_from_settings() {
        let settings = IngestSettings {
            settle_delay_ms: 1500,
            wait_poll_secs: 0,
            ..IngestSettings::default()
        };
        let watcher = settings.watcher_config();
        assert_eq!(watcher.settle_delay, Duration::from_millis(1500));
        assert_eq!(watcher.root_poll_interval, Duration::from_secs(1));
        assert_eq!(watcher.missing_root, MissingRootPolicy::Wait);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
