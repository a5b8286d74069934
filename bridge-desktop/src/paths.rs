//! Default on-disk locations for desktop runs.

use std::path::PathBuf;

const APP_DIR: &str = "photo-backup";

/// Directory for persistent state such as the cursor database.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR)
}

/// Directory for re-creatable files such as staged archive downloads.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Default location of the SQLite cursor database.
pub fn default_cursor_db() -> PathBuf {
    default_data_dir().join("cursor.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_app_scoped() {
        assert!(default_data_dir().ends_with(APP_DIR));
        assert!(default_cache_dir().ends_with(APP_DIR));
        assert_eq!(
            default_cursor_db().file_name().and_then(|n| n.to_str()),
            Some("cursor.db")
        );
    }
}
