//! Host configuration loading and parsing.
//!
//! Parses `rell.toml` (or an override path provided by the binary),
//! with discovery falling back from the working directory to the
//! user's config directory. Every knob has a default; unknown fields
//! are ignored so configs survive version skew.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "rell.toml";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MemorySection {
    /// KiB of allocation between garbage collections.
    #[serde(default)]
    pub watermark_kib: Option<usize>,
    /// Largest single allocation honored, in KiB.
    #[serde(default)]
    pub max_request_kib: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct EvaluatorSection {
    /// Call-frame depth ceiling before the stack-overflow error.
    #[serde(default)]
    pub stack_ceiling: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SecureSection {
    /// Default security policy word recorded in the system object.
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub evaluator: EvaluatorSection,
    #[serde(default)]
    pub secure: SecureSection,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub watermark: usize,
    pub max_request: usize,
    pub stack_ceiling: usize,
    pub secure_policy: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            watermark: 4 * 1024 * 1024,
            max_request: 256 * 1024 * 1024,
            stack_ceiling: 4096,
            secure_policy: "allow".into(),
        }
    }
}

impl Config {
    fn from_file(file: ConfigFile) -> Config {
        let defaults = Config::default();
        Config {
            watermark: file
                .memory
                .watermark_kib
                .map(|kib| kib * 1024)
                .unwrap_or(defaults.watermark),
            max_request: file
                .memory
                .max_request_kib
                .map(|kib| kib * 1024)
                .unwrap_or(defaults.max_request),
            stack_ceiling: file
                .evaluator
                .stack_ceiling
                .unwrap_or(defaults.stack_ceiling),
            secure_policy: file.secure.policy.unwrap_or(defaults.secure_policy),
        }
    }
}

/// Candidate config paths, nearest first.
fn discovery_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rell").join(CONFIG_FILE_NAME));
    }
    paths
}

/// Load configuration from an explicit path, or discover it. A missing
/// discovered file means defaults; an explicit path must exist and
/// parse.
pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let candidate = match path {
        Some(path) => Some(path),
        None => discovery_paths().into_iter().find(|p| p.exists()),
    };
    let Some(path) = candidate else {
        info!("no config file found; using defaults");
        return Ok(Config::default());
    };
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    let config = Config::from_file(file);
    info!(path = %path.display(), ?config, "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(load_from(Some(PathBuf::from("/nonexistent/rell.toml"))).is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[memory]\nwatermark_kib = 64").unwrap();
        let config = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.watermark, 64 * 1024);
        assert_eq!(config.stack_ceiling, Config::default().stack_ceiling);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[future]\nshiny = true\n[evaluator]\nstack_ceiling = 128"
        )
        .unwrap();
        let config = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.stack_ceiling, 128);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not toml [[[").unwrap();
        assert!(load_from(Some(file.path().to_path_buf())).is_err());
    }
}
