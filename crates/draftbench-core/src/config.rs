//! Configuration management for Draftbench.
//!
//! Loads configuration from ${DRAFTBENCH_HOME}/config.toml with sensible
//! defaults, then applies DRAFTBENCH_* environment overrides on top.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file contents written by `config init`.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Draftbench configuration

# Base URL of the Draftbench API (identity service lives under /user).
api_base_url = "https://api.draftbench.dev"

# Static developer token. When set, stored credentials are ignored.
# token = ""

# Deterministic test mode (blanked avatars; with `development`, stand-in auth).
test_mode = false

# Development build flag.
development = false
"#;

pub mod paths {
    //! Path resolution for Draftbench configuration and data directories.
    //!
    //! DRAFTBENCH_HOME resolution order:
    //! 1. DRAFTBENCH_HOME environment variable (if set)
    //! 2. ~/.config/draftbench (default)

    use std::path::PathBuf;

    /// Returns the Draftbench home directory.
    ///
    /// Checks DRAFTBENCH_HOME env var first, falls back to ~/.config/draftbench
    pub fn draftbench_home() -> PathBuf {
        if let Ok(home) = std::env::var("DRAFTBENCH_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("draftbench"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        draftbench_home().join("config.toml")
    }

    /// Returns the path to the JSON credential cache.
    pub fn credentials_path() -> PathBuf {
        draftbench_home().join("credentials.json")
    }

    /// Returns the path to the durable token file.
    ///
    /// Raw token text, kept outside the credential cache so it survives
    /// cache resets and reinstalls.
    pub fn token_file_path() -> PathBuf {
        draftbench_home().join("token")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Draftbench API.
    pub api_base_url: String,

    /// Static developer token; takes precedence over every stored credential.
    pub token: Option<String>,

    /// Deterministic test mode (blanked avatars, stand-in auth eligibility).
    pub test_mode: bool,

    /// Development build flag.
    pub development: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: Self::DEFAULT_API_BASE_URL.to_string(),
            token: None,
            test_mode: false,
            development: false,
        }
    }
}

impl Config {
    const DEFAULT_API_BASE_URL: &str = "https://api.draftbench.dev";

    /// Loads configuration from the default config path and applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Applies DRAFTBENCH_* environment overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DRAFTBENCH_API_URL")
            && !url.trim().is_empty()
        {
            self.api_base_url = url.trim().to_string();
        }
        if let Ok(token) = std::env::var("DRAFTBENCH_TOKEN")
            && !token.trim().is_empty()
        {
            self.token = Some(token.trim().to_string());
        }
        if env_flag("DRAFTBENCH_TEST_MODE") {
            self.test_mode = true;
        }
        if env_flag("DRAFTBENCH_DEV") {
            self.development = true;
        }
    }

    /// Returns true when the stand-in identity provider should be used.
    ///
    /// Both flags are required so a stray test-mode variable can never skip
    /// authentication outside development builds.
    pub fn bypass_auth(&self) -> bool {
        self.test_mode && self.development
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        fs::write(path, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write to {}", path.display()))
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| {
        let v = v.trim();
        v == "1" || v.eq_ignore_ascii_case("true")
    })
}
