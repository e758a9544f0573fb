//! Configuration loading from `.galleria.toml`.
//!
//! Configuration is optional. The library root is searched first, then the
//! user config directory (`~/.config/galleria/config.toml` on Linux); when
//! neither exists, defaults are used.
//!
//! # Example Configuration
//!
//! ```toml
//! [scanner]
//! ignore = ["drafts/", "*.tmp.png"]
//! include_hidden = false
//! video_extensions = ["mp4", "webm"]
//!
//! [sync]
//! workers = 4
//!
//! [catalog]
//! path = "/var/lib/galleria/catalog.duckdb"
//!
//! [extractor]
//! max_trace_depth = 32
//! extra_sinks = ["MyCustomSampler"]
//! extra_pass_through = ["MyLoraStack"]
//!
//! [extractor.widget_layouts]
//! MyCustomSampler = ["seed", "control", "steps", "cfg", "sampler_name", "scheduler"]
//! ```

use anyhow::{Context, Result};
use galleria_core::registry::{NodeRegistry, RegistryOverrides};
use galleria_core::scanner::{
    ScanOptions, DEFAULT_IGNORE_PATTERNS, IMAGE_EXTENSIONS, OTHER_EXTENSIONS, VIDEO_EXTENSIONS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name looked up in the library root.
pub const CONFIG_FILE: &str = ".galleria.toml";

/// Directory, relative to the library root, holding the default catalog.
pub const CATALOG_DIR: &str = ".galleria";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GalleriaConfig {
    /// File discovery.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Sync pass tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Catalog location.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Node registry additions.
    #[serde(default)]
    pub extractor: RegistryOverrides,
}

/// Scanner configuration controlling file discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Additional gitignore-style patterns to skip, combined with the
    /// built-in defaults (thumbnail caches, the catalog directory).
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Whether to walk hidden files and directories.
    #[serde(default)]
    pub include_hidden: bool,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Replaces the built-in image extension list when set.
    #[serde(default)]
    pub image_extensions: Option<Vec<String>>,

    #[serde(default)]
    pub video_extensions: Option<Vec<String>>,

    #[serde(default)]
    pub other_extensions: Option<Vec<String>>,
}

/// Sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Worker threads for per-file extraction. 0 uses one per CPU.
    #[serde(default)]
    pub workers: usize,
}

/// Catalog configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Database file. Defaults to `<root>/.galleria/catalog.duckdb`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl GalleriaConfig {
    /// Load configuration for a library root.
    ///
    /// Read or parse failures are logged and fall back to defaults.
    pub fn load(root: &Path) -> Self {
        let candidates = [
            Some(root.join(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("galleria").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match Self::load_strict(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    return config;
                }
                Err(e) => {
                    warn!("Ignoring config {}: {:#}", path.display(), e);
                    break;
                }
            }
        }
        Self::default()
    }

    /// Load one config file, failing on read or parse errors.
    pub fn load_strict(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Ignore patterns, user entries first, defaults appended once.
    pub fn ignore_patterns(&self) -> Vec<String> {
        let mut patterns = self.scanner.ignore.clone();
        for default in DEFAULT_IGNORE_PATTERNS {
            if !patterns.iter().any(|p| p == default) {
                patterns.push(default.to_string());
            }
        }
        patterns
    }

    /// Walk settings for the scanner.
    pub fn scan_options(&self) -> ScanOptions {
        let list = |configured: &Option<Vec<String>>, builtin: &[&str]| -> Vec<String> {
            match configured {
                Some(exts) => exts
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
                None => builtin.iter().map(|e| e.to_string()).collect(),
            }
        };

        let mut extensions = list(&self.scanner.image_extensions, IMAGE_EXTENSIONS);
        extensions.extend(list(&self.scanner.video_extensions, VIDEO_EXTENSIONS));
        extensions.extend(list(&self.scanner.other_extensions, OTHER_EXTENSIONS));

        ScanOptions {
            extensions: extensions.into_iter().collect(),
            ignore_patterns: self.ignore_patterns(),
            include_hidden: self.scanner.include_hidden,
            follow_symlinks: self.scanner.follow_symlinks,
        }
    }

    /// Built-in registry with the `[extractor]` additions applied.
    pub fn registry(&self) -> NodeRegistry {
        let mut registry = NodeRegistry::builtin();
        if !self.extractor.is_empty() {
            registry.merge(self.extractor.clone());
        }
        registry
    }

    /// Worker thread count, resolving 0 to the number of CPUs.
    pub fn workers(&self) -> usize {
        match self.sync.workers {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Catalog location for `root`.
    pub fn catalog_path(&self, root: &Path) -> PathBuf {
        self.catalog
            .path
            .clone()
            .unwrap_or_else(|| root.join(CATALOG_DIR).join("catalog.duckdb"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GalleriaConfig::default();
        assert!(!config.scanner.include_hidden);
        assert_eq!(config.sync.workers, 0);
        assert!(config.workers() >= 1);
        assert!(config.extractor.is_empty());
        assert_eq!(
            config.catalog_path(Path::new("/library")),
            PathBuf::from("/library/.galleria/catalog.duckdb")
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[scanner]
ignore = ["drafts/"]
include_hidden = true
video_extensions = [".MP4"]

[sync]
workers = 3

[catalog]
path = "/tmp/galleria.duckdb"

[extractor]
max_trace_depth = 8
extra_sinks = ["MySampler"]
"#;
        let config: GalleriaConfig = toml::from_str(toml_content).unwrap();

        assert_eq!(config.workers(), 3);
        assert_eq!(
            config.catalog_path(Path::new("/library")),
            PathBuf::from("/tmp/galleria.duckdb")
        );

        let options = config.scan_options();
        assert!(options.include_hidden);
        assert!(options.extensions.contains("mp4"));
        assert!(!options.extensions.contains("webm"));
        assert!(options.extensions.contains("png"));

        let registry = config.registry();
        assert_eq!(registry.max_trace_depth, 8);
        assert!(registry.sinks.contains("MySampler"));
    }

    #[test]
    fn test_ignore_patterns_with_defaults() {
        let toml_content = r#"
[scanner]
ignore = ["custom/", ".galleria/"]
"#;
        let config: GalleriaConfig = toml::from_str(toml_content).unwrap();
        let patterns = config.ignore_patterns();

        assert_eq!(patterns[0], "custom/");
        assert_eq!(patterns.iter().filter(|p| *p == ".galleria/").count(), 1);
        for default in DEFAULT_IGNORE_PATTERNS {
            assert!(patterns.contains(&default.to_string()), "Missing default pattern: {}", default);
        }
    }

    #[test]
    fn test_load_falls_back_on_malformed_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[sync\nworkers = ").unwrap();

        assert!(GalleriaConfig::load_strict(&dir.path().join(CONFIG_FILE)).is_err());
        assert_eq!(GalleriaConfig::load(dir.path()).sync.workers, 0);
    }

    #[test]
    fn test_load_from_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[sync]\nworkers = 2\n").unwrap();
        assert_eq!(GalleriaConfig::load(dir.path()).sync.workers, 2);
    }
}
