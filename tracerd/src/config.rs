use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/tracerd/tracerd.toml";
const ENV_CONFIG_PATH: &str = "TRACERD_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub pid_filter: PidFilterConfig,
}

impl Config {
    /// Load configuration from file. The path can be overridden with the
    /// `TRACERD_CONFIG` environment variable. If the file is missing or
    /// fails to parse, defaults are returned (SPEC_FULL.md §7: setup
    /// degrades gracefully rather than failing the whole process).
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Debug flag, mirrored into the kernel config map's
    /// `CONFIG_DEBUG_ENABLED` slot at startup.
    #[serde(default)]
    pub debug: bool,
    /// Cap on events/second handed to the callback before sampling kicks in
    /// (SPEC_FULL.md §9 Ambient stack choices).
    #[serde(default = "default_events_rate_cap")]
    pub events_rate_cap: u64,
    /// How long `Collector::initialize`'s drain loop blocks between ring
    /// polls when the ring is empty (SPEC_FULL.md §5: "100-200ms recommended").
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Reaper timeout for stalled `WRITING` slots, in milliseconds.
    #[serde(default = "default_reaper_timeout_ms")]
    pub reaper_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            events_rate_cap: default_events_rate_cap(),
            poll_interval_ms: default_poll_interval_ms(),
            reaper_timeout_ms: default_reaper_timeout_ms(),
        }
    }
}

fn default_events_rate_cap() -> u64 {
    100_000
}

fn default_poll_interval_ms() -> u64 {
    150
}

fn default_reaper_timeout_ms() -> u64 {
    10
}

/// Configurable predicate for the PID filter's exec-time re-evaluation
/// (SPEC_FULL.md §4.6): a process is blacklisted if its `comm`, or failing
/// that its `/proc/<pid>/cmdline`, case-insensitively contains any of these
/// patterns.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PidFilterConfig {
    #[serde(default)]
    pub blacklist_patterns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"[runtime]
debug = true
events_rate_cap = 50000
poll_interval_ms = 100
[pid_filter]
blacklist_patterns = ["sshd", "cron"]
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert!(cfg.runtime.debug);
        assert_eq!(cfg.runtime.events_rate_cap, 50_000);
        assert_eq!(cfg.runtime.poll_interval_ms, 100);
        assert_eq!(cfg.pid_filter.blacklist_patterns, vec!["sshd", "cron"]);
    }

    #[test]
    fn defaults_without_file() {
        let cfg = Config::default();
        assert!(!cfg.runtime.debug);
        assert_eq!(cfg.runtime.events_rate_cap, 100_000);
        assert!(cfg.pid_filter.blacklist_patterns.is_empty());
    }

    #[test]
    fn env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\ndebug = true").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert!(cfg.runtime.debug);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }
}
