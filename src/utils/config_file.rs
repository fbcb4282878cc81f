//! Load `.mediadex.toml` from a library directory (CLI only). Lib callers
//! inject an [`EngineConfig`] directly.

use serde::Deserialize;
use std::path::Path;

use crate::utils::config::{DetectorKind, EngineConfig};

#[derive(Debug, Deserialize)]
pub(crate) struct MediadexToml {
    #[serde(default)]
    engine: EngineSection,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    detector: Option<DetectorKind>,
    poll_interval_ms: Option<u64>,
    debounce_max_ms: Option<u64>,
    idle_timeout_secs: Option<u64>,
    /// Mtime tolerance window in seconds.
    mtime_window: Option<i64>,
    scan_batch_size: Option<usize>,
}

/// Load `.mediadex.toml` from `dir` if present. Returns None if file missing
/// or unreadable. CLI only.
pub(crate) fn load_config_toml(dir: &Path) -> Option<MediadexToml> {
    let path = dir.join(".mediadex.toml");
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $cfg:expr, $field:ident) => {
        if let Some(v) = $sec.$field {
            $cfg.$field = v;
        }
    };
}

/// Apply file config to the engine config (only fields present in the file).
/// Call before applying CLI flags.
pub(crate) fn apply_file_to_config(file: &MediadexToml, cfg: &mut EngineConfig) {
    let sec = &file.engine;
    apply_file_opt!(sec, cfg, detector);
    apply_file_opt!(sec, cfg, poll_interval_ms);
    apply_file_opt!(sec, cfg, debounce_max_ms);
    apply_file_opt!(sec, cfg, idle_timeout_secs);
    apply_file_opt!(sec, cfg, scan_batch_size);
    if let Some(secs) = sec.mtime_window {
        cfg.mtime_window_ns = secs * 1_000_000_000;
    }
}
