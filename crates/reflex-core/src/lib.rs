pub mod config;

pub use config::{
    load_config, parse_config, Config, KnowledgeBaseConfig, ModelConfig,
    ProviderConfig, ProviderKind, ReflexionConfig, ServerConfig,
};

use tracing::{info, warn};

/// Resolve a config file path independent of the current working directory.
///
/// Search order (first existing wins):
/// - `REFLEX_CONFIG_DIR` environment variable if set (joined with `rel`)
/// - Directory of the current executable (joined with `rel`)
/// - Parent of the executable directory (joined with `rel`)
/// - Workspace root during development: `../../` from this crate (joined with `rel`)
/// - Current working directory (joined with `rel`)
///
/// If `rel` is absolute, it is returned if it exists.
pub fn resolve_config_path(rel: &str) -> Option<std::path::PathBuf> {
    use std::path::{Path, PathBuf};
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return if rel_path.exists() {
            Some(rel_path.to_path_buf())
        } else {
            None
        };
    }

    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(cfg_dir) = std::env::var("REFLEX_CONFIG_DIR") {
        if !cfg_dir.trim().is_empty() {
            candidates.push(PathBuf::from(cfg_dir));
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.to_path_buf());
            if let Some(parent) = exe_dir.parent() {
                candidates.push(parent.to_path_buf());
            }
        }
    }

    let dev_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../");
    candidates.push(dev_root);

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }

    candidates
        .into_iter()
        .map(|base| base.join(rel))
        .find(|p| p.exists())
}

/// Locate and load the service configuration.
///
/// `REFLEX_CONFIG` names an explicit file; otherwise `configs/default.toml` is
/// searched via [`resolve_config_path`]. A missing or invalid file yields the
/// built-in defaults (with a warning for the invalid case).
pub fn load_effective_config() -> (Config, Option<String>) {
    let (path, source) = match std::env::var("REFLEX_CONFIG") {
        Ok(explicit) if !explicit.trim().is_empty() => {
            (Some(std::path::PathBuf::from(explicit)), "env")
        }
        _ => (resolve_config_path("configs/default.toml"), "search"),
    };

    let Some(path) = path else {
        return (Config::default(), None);
    };
    let display_path = path.to_string_lossy().to_string();
    match load_config(&display_path) {
        Ok(cfg) => {
            info!(path = %display_path, source, "loaded config");
            (cfg, Some(display_path))
        }
        Err(err) => {
            warn!(path = %display_path, source, "failed to load config: {err}");
            (Config::default(), None)
        }
    }
}
