//! Configuration management for retext
//!
//! Settings are read from `<project>/retext.toml`, falling back to
//! `~/.config/retext/config.toml`, then to built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const PROJECT_CONFIG_FILE: &str = "retext.toml";
const GLOBAL_CONFIG_DIR: &str = "retext";
const GLOBAL_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File extensions (without dot) considered during discovery
    pub extensions: Vec<String>,
    /// Directory names never descended into
    pub ignored_dirs: Vec<String>,
    /// Files larger than this are skipped by the scanner
    pub max_file_bytes: u64,
    /// Nodes per oracle call
    pub batch_size: usize,
    /// Lines of surrounding context attached to every extracted node
    pub context_lines: usize,
    /// Share of phrase words a fragment sequence must cover to be accepted
    pub fragment_min_coverage: f64,
    /// How many text units ahead a fragment sequence may reach
    pub fragment_lookahead: usize,
    /// Share of derived key phrases that must occur for a key-phrase match
    pub key_phrase_threshold: f64,
    /// Share of phrase words that must occur for a word-majority match
    pub word_majority_threshold: f64,
    pub generate_diffs: bool,
    /// Compute changes and diffs without writing files
    pub dry_run: bool,
    pub oracle_timeout_secs: u64,
    /// Lifetime of session records in the local store
    pub session_ttl_hours: i64,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the bearer key
    pub api_key_env: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "anthropic/claude-sonnet-4.5".to_string(),
            max_tokens: 8192,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

impl OracleConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: [
                "html", "htm", "vue", "svelte", "js", "jsx", "mjs", "cjs", "ts", "tsx", "py",
                "rs", "go", "md",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignored_dirs: [
                "target",
                "node_modules",
                ".git",
                ".svn",
                ".hg",
                "dist",
                "build",
                "out",
                ".next",
                "coverage",
                "__pycache__",
                ".venv",
                "venv",
                "vendor",
                ".retext",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_bytes: 1024 * 1024,
            batch_size: 10,
            context_lines: 3,
            fragment_min_coverage: 0.6,
            fragment_lookahead: 5,
            key_phrase_threshold: 0.4,
            word_majority_threshold: 0.6,
            generate_diffs: true,
            dry_run: false,
            oracle_timeout_secs: 120,
            session_ttl_hours: 24,
            oracle: OracleConfig::default(),
        }
    }
}

impl Config {
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(GLOBAL_CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
    }

    /// Path of the project-level config file
    pub fn project_config_path(root: &Path) -> PathBuf {
        root.join(PROJECT_CONFIG_FILE)
    }

    /// Load config for a project, or return defaults
    pub fn load(root: &Path) -> Self {
        let candidates = std::iter::once(Self::project_config_path(root))
            .chain(Self::global_config_path());

        for path in candidates {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match Self::from_toml(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    warn!(
                        path = %path.display(),
                        "Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                        err
                    );
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    /// Parse and sanitize a TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    /// Clamp values that would make the engine misbehave
    pub fn sanitized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.fragment_lookahead = self.fragment_lookahead.max(1);
        self.fragment_min_coverage = self.fragment_min_coverage.clamp(0.0, 1.0);
        self.key_phrase_threshold = self.key_phrase_threshold.clamp(0.0, 1.0);
        self.word_majority_threshold = self.word_majority_threshold.clamp(0.0, 1.0);
        self.oracle_timeout_secs = self.oracle_timeout_secs.max(1);
        for ext in &mut self.extensions {
            *ext = ext.trim_start_matches('.').to_lowercase();
        }
        self
    }

    /// Write this config to `<root>/retext.toml`
    pub fn save(&self, root: &Path) -> anyhow::Result<PathBuf> {
        let path = Self::project_config_path(root);
        let content = toml::to_string_pretty(self)?;
        write_config_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs.iter().any(|d| d == name)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.bak");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.fragment_lookahead, 5);
        assert!((config.fragment_min_coverage - 0.6).abs() < f64::EPSILON);
        assert!(config.accepts_extension("TSX"));
        assert!(config.is_ignored_dir("node_modules"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("batch_size = 3\n[oracle]\nmodel = \"x/y\"\n").unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.oracle.model, "x/y");
        assert_eq!(config.oracle.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.context_lines, 3);
    }

    #[test]
    fn test_sanitize_clamps_values() {
        let config = Config::from_toml(
            "batch_size = 0\nfragment_min_coverage = 4.0\nextensions = [\".HTML\"]\n",
        )
        .unwrap();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.fragment_min_coverage, 1.0);
        assert_eq!(config.extensions, vec!["html".to_string()]);
    }

    #[test]
    fn test_save_then_load_project_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            batch_size: 4,
            dry_run: true,
            ..Config::default()
        };
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()), config);
    }

    #[test]
    fn test_corrupt_project_config_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::project_config_path(dir.path());
        fs::write(&path, "batch_size = [").unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.batch_size, 10);
        assert!(dir.path().join("retext.toml.bak").exists());
    }
}
