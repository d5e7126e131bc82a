//! Directory helpers
//!
//! Per-user locations for the catalog cache and downloads.

use std::path::PathBuf;

/// `<config dir>/<app_name>`, falling back to `~/.config/<app_name>`
pub fn get_config_dir(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(app_name)
}

/// `$XDG_DOWNLOAD_DIR` when it exists, else the platform download
/// directory, else `~/Downloads`
pub fn get_download_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DOWNLOAD_DIR").map(PathBuf::from) {
        if xdg.exists() {
            return xdg;
        }
    }

    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// File name component of a path, or the whole path when there is none
pub fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_config_dir_ends_with_app_name() {
        assert!(get_config_dir("codexctl").ends_with("codexctl"));
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(
            file_name_of(Path::new("/tmp/updates/3.11.2.5_reMarkable2-x.signed")),
            "3.11.2.5_reMarkable2-x.signed"
        );
        assert_eq!(file_name_of(Path::new("firmware.swu")), "firmware.swu");
    }
}
