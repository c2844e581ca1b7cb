//! Cross-platform configuration paths via the `dirs` crate.
//!
//! `settings.toml` lives in the platform config directory:
//!
//!   Windows: %APPDATA%\dictate\settings.toml
//!   macOS:   ~/Library/Application Support/dictate/settings.toml
//!   Linux:   ~/.config/dictate/settings.toml

use std::path::PathBuf;

/// Resolved application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "dictate";

    /// Resolve paths, falling back to the current directory if the platform
    /// cannot provide a standard location.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_lives_under_config_dir() {
        let paths = AppPaths::new();
        assert!(paths.settings_file.starts_with(&paths.config_dir));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|name| name == "settings.toml"));
    }
}
