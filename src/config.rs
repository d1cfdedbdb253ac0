use directories::ProjectDirs;
use std::path::PathBuf;

/// Resolve the default cache directory using the XDG cache directory.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let cache_dir = dirs.cache_dir();
        std::fs::create_dir_all(cache_dir).ok();
        cache_dir.to_path_buf()
    } else {
        // Fallback: current directory
        PathBuf::from(".crossfade-cache")
    }
}
