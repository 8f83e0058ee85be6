//! Configuration management
//!
//! This module holds the values the bridge reads from its host: server
//! launch locations, Java runtime settings, Gradle connection settings and
//! daemon view preferences. They are loaded from a TOML file.

mod toml_parser;
mod validation;

pub use toml_parser::TomlConfig;

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that turns on the remote-debug agent for the server
pub const DEBUG_SERVER_ENV: &str = "DEBUG_GRADLE_SERVER";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gradle server launch settings
    pub server: ServerConfig,
    /// Java runtime settings
    pub java: JavaConfig,
    /// Gradle connection settings
    pub gradle: GradleConfig,
    /// Daemon view settings
    pub daemons: DaemonsConfig,
}

/// Gradle server launch settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding the server launcher; also the working directory
    pub lib_dir: PathBuf,
    /// Bundle directory handed to the build server
    pub bundle_dir: PathBuf,
    /// Explicit launcher path, overriding the platform default under `lib_dir`
    pub command: Option<PathBuf>,
    /// Start the server with a JDWP agent listening
    pub debug: bool,
    /// Whether the Java language support (and its importer) is present
    pub java_extension_installed: bool,
}

/// Java runtime settings, in the order they are consulted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JavaConfig {
    /// Java home dedicated to Gradle imports
    pub import_gradle_java_home: Option<PathBuf>,
    /// Java home used by the Java language server
    pub jdt_ls_java_home: Option<PathBuf>,
    /// Generic Java home setting
    pub home: Option<PathBuf>,
    /// Directory containing the JRE embedded in the Java extension
    pub embedded_jre_dir: Option<PathBuf>,
    /// Configured runtimes list
    pub runtimes: Vec<RuntimeEntry>,
}

/// One entry of the configured runtimes list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    /// Runtime home directory
    pub path: PathBuf,
    /// Marks the preferred runtime
    pub default: bool,
}

/// Gradle connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradleConfig {
    /// Use the project's Gradle wrapper
    pub wrapper_enabled: bool,
    /// Pinned Gradle version to download on demand
    pub version: Option<String>,
    /// Gradle executable of a local installation
    pub home: Option<PathBuf>,
    /// Gradle user home, where the daemon registry lives
    pub user_home: Option<PathBuf>,
}

impl Default for GradleConfig {
    fn default() -> Self {
        Self {
            wrapper_enabled: true,
            version: None,
            home: None,
            user_home: None,
        }
    }
}

/// Daemon view settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonsConfig {
    /// Include stopped daemons in refresh results
    pub show_stopped: bool,
}

impl Config {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Config = TomlConfig::from_file(path)?.into();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        let config: Config = TomlConfig::parse(toml)?.into();
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        let optional_paths = [
            ("server.command", self.server.command.as_deref()),
            ("java.import_gradle_java_home", self.java.import_gradle_java_home.as_deref()),
            ("java.jdt_ls_java_home", self.java.jdt_ls_java_home.as_deref()),
            ("java.home", self.java.home.as_deref()),
            ("java.embedded_jre_dir", self.java.embedded_jre_dir.as_deref()),
            ("gradle.home", self.gradle.home.as_deref()),
            ("gradle.user_home", self.gradle.user_home.as_deref()),
        ];
        for (field, path) in optional_paths {
            if let Some(path) = path {
                validation::validate_path(field, path)?;
            }
        }

        validation::validate_runtimes(&self.java.runtimes)
            .map_err(|e| BridgeError::Config(format!("java.runtimes: {}", e)))?;

        if let Some(version) = &self.gradle.version {
            validation::validate_gradle_version(version)?;
        }

        Ok(())
    }

    /// Whether the debug agent should be attached to the server
    pub fn debug_enabled(&self) -> bool {
        self.server.debug || std::env::var(DEBUG_SERVER_ENV).as_deref() == Ok("true")
    }
}
