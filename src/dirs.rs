use std::path::PathBuf;

/// Returns the base directory for Relay data.
///
/// Uses `$A3S_RELAY_HOME` if set, otherwise defaults to `~/.a3s/relay`.
pub fn relay_home() -> PathBuf {
    if let Ok(home) = std::env::var("A3S_RELAY_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".a3s")
        .join("relay")
}

/// Returns the path to the user configuration file.
pub fn config_path() -> PathBuf {
    relay_home().join("config.toml")
}
