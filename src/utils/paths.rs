//! Path and eligibility helpers.

use std::path::{Path, PathBuf};

use crate::utils::config::{MEDIA_EXTENSIONS, PackagePaths};

/// Convert absolute path to relative path from base.
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Normalize a path to the string form stored in the index: forward slashes,
/// no leading separator. Keys are compared byte-wise, so this must be
/// deterministic across platforms.
pub fn path_to_db_string(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.contains('\\') {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Parent folder of a db-string path: `"a/b/c.jpg"` → `"a/b"`, `"c.jpg"` → `""`.
pub fn folder_of(db_path: &str) -> String {
    match db_path.rfind('/') {
        Some(i) => db_path[..i].to_string(),
        None => String::new(),
    }
}

/// Every ancestor folder of a db-string folder path, outermost first, the
/// folder itself included: `"a/b/c"` → `["a", "a/b", "a/b/c"]`. Empty for "".
pub fn ancestor_folders(folder: &str) -> Vec<String> {
    if folder.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut acc = String::new();
    for part in folder.split('/') {
        if !acc.is_empty() {
            acc.push('/');
        }
        acc.push_str(part);
        out.push(acc.clone());
    }
    out
}

/// Check if a file should be excluded based on OS-specific hidden files.
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            _ => {
                // macOS resource fork files start with ._
                name.starts_with("._")
            }
        }
    } else {
        false
    }
}

/// True when the path has an indexable media extension.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// True when the path (or one of its components) is the engine's own hidden
/// directory; never walked, watched, or indexed.
pub fn is_hidden_index_path(path: &Path) -> bool {
    let hidden = PackagePaths::get().hidden_dir_name();
    path.components().any(|c| c.as_os_str() == hidden)
}

/// Check if mtime has changed beyond tolerance window.
pub fn mtime_changed(new_mtime: i64, old_mtime: i64, tolerance_ns: i64) -> bool {
    let mtime_diff = (new_mtime - old_mtime).abs();
    mtime_diff > tolerance_ns
}

/// Mtime in nanoseconds since epoch from file metadata; 0 when unavailable.
pub fn mtime_ns_of(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Wall-clock seconds since epoch.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_of_nested_and_root() {
        assert_eq!(folder_of("a/b/c.jpg"), "a/b");
        assert_eq!(folder_of("c.jpg"), "");
    }

    #[test]
    fn test_ancestor_folders_chain() {
        assert_eq!(ancestor_folders("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert!(ancestor_folders("").is_empty());
    }

    #[test]
    fn test_is_media_file_extensions() {
        assert!(is_media_file(Path::new("x/y/photo.JPG")));
        assert!(is_media_file(Path::new("shot.dng")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("noext")));
    }

    #[test]
    fn test_hidden_index_path_component() {
        let hidden = PackagePaths::get().hidden_dir_name().to_string();
        assert!(is_hidden_index_path(Path::new(&format!(
            "/lib/{hidden}/index.db"
        ))));
        assert!(!is_hidden_index_path(Path::new("/lib/photos/a.jpg")));
    }
}
