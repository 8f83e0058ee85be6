//! TOML configuration file parser
//!
//! This module handles parsing of the TOML configuration file. Every
//! section and key is optional; missing values fall back to the defaults
//! of the internal [`Config`].

use crate::config::{Config, DaemonsConfig, GradleConfig, JavaConfig, RuntimeEntry, ServerConfig};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Server section
    #[serde(default)]
    pub server: TomlServerConfig,

    /// Java section
    #[serde(default)]
    pub java: TomlJavaConfig,

    /// Gradle section
    #[serde(default)]
    pub gradle: TomlGradleConfig,

    /// Daemons section
    #[serde(default)]
    pub daemons: TomlDaemonsConfig,
}

/// TOML server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlServerConfig {
    /// Launcher directory
    #[serde(default = "default_lib_dir")]
    pub lib_dir: String,

    /// Bundle directory
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: String,

    /// Explicit launcher path
    pub command: Option<String>,

    /// Attach the debug agent
    #[serde(default)]
    pub debug: bool,

    /// Java language support presence
    #[serde(default)]
    pub java_extension_installed: bool,
}

impl Default for TomlServerConfig {
    fn default() -> Self {
        Self {
            lib_dir: default_lib_dir(),
            bundle_dir: default_bundle_dir(),
            command: None,
            debug: false,
            java_extension_installed: false,
        }
    }
}

/// TOML Java configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlJavaConfig {
    /// Java home for Gradle imports
    pub import_gradle_java_home: Option<String>,

    /// Java home of the Java language server
    pub jdt_ls_java_home: Option<String>,

    /// Generic Java home
    pub home: Option<String>,

    /// Embedded JRE directory
    pub embedded_jre_dir: Option<String>,

    /// Configured runtimes
    #[serde(default)]
    pub runtimes: Vec<TomlRuntimeEntry>,
}

/// TOML runtime entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlRuntimeEntry {
    /// Runtime home
    pub path: String,

    /// Preferred runtime marker
    #[serde(default)]
    pub default: bool,
}

/// TOML Gradle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlGradleConfig {
    /// Use the Gradle wrapper
    #[serde(default = "default_wrapper_enabled")]
    pub wrapper_enabled: bool,

    /// Pinned Gradle version
    pub version: Option<String>,

    /// Local Gradle installation
    pub home: Option<String>,

    /// Gradle user home
    pub user_home: Option<String>,
}

impl Default for TomlGradleConfig {
    fn default() -> Self {
        Self {
            wrapper_enabled: default_wrapper_enabled(),
            version: None,
            home: None,
            user_home: None,
        }
    }
}

/// TOML daemons configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlDaemonsConfig {
    /// Show stopped daemons
    #[serde(default)]
    pub show_stopped: bool,
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| BridgeError::Config(format!("Failed to parse TOML config: {}", e)))
    }
}

// Convert TOML config to internal Config
impl From<TomlConfig> for Config {
    fn from(toml: TomlConfig) -> Self {
        Config {
            server: toml.server.into(),
            java: toml.java.into(),
            gradle: toml.gradle.into(),
            daemons: DaemonsConfig {
                show_stopped: toml.daemons.show_stopped,
            },
        }
    }
}

impl From<TomlServerConfig> for ServerConfig {
    fn from(toml: TomlServerConfig) -> Self {
        ServerConfig {
            lib_dir: PathBuf::from(toml.lib_dir),
            bundle_dir: PathBuf::from(toml.bundle_dir),
            command: toml.command.map(PathBuf::from),
            debug: toml.debug,
            java_extension_installed: toml.java_extension_installed,
        }
    }
}

impl From<TomlJavaConfig> for JavaConfig {
    fn from(toml: TomlJavaConfig) -> Self {
        JavaConfig {
            import_gradle_java_home: toml.import_gradle_java_home.map(PathBuf::from),
            jdt_ls_java_home: toml.jdt_ls_java_home.map(PathBuf::from),
            home: toml.home.map(PathBuf::from),
            embedded_jre_dir: toml.embedded_jre_dir.map(PathBuf::from),
            runtimes: toml
                .runtimes
                .into_iter()
                .map(|r| RuntimeEntry {
                    path: PathBuf::from(r.path),
                    default: r.default,
                })
                .collect(),
        }
    }
}

impl From<TomlGradleConfig> for GradleConfig {
    fn from(toml: TomlGradleConfig) -> Self {
        GradleConfig {
            wrapper_enabled: toml.wrapper_enabled,
            version: toml.version,
            home: toml.home.map(PathBuf::from),
            user_home: toml.user_home.map(PathBuf::from),
        }
    }
}

// Default value functions
fn default_lib_dir() -> String {
    "lib".to_string()
}

fn default_bundle_dir() -> String {
    "server".to_string()
}

fn default_wrapper_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [server]
            lib_dir = "/opt/gradle-bridge/lib"
            bundle_dir = "/opt/gradle-bridge/server"
            java_extension_installed = true

            [java]
            import_gradle_java_home = "/usr/lib/jvm/java-17"
            runtimes = [
                { path = "/usr/lib/jvm/java-11" },
                { path = "/usr/lib/jvm/java-21", default = true },
            ]

            [gradle]
            wrapper_enabled = false
            home = "/opt/gradle/bin/gradle"

            [daemons]
            show_stopped = true
        "#;

        let config = TomlConfig::parse(toml).expect("Failed to parse TOML");
        assert_eq!(config.server.lib_dir, "/opt/gradle-bridge/lib");
        assert!(config.server.java_extension_installed);
        assert_eq!(config.java.runtimes.len(), 2);
        assert!(config.java.runtimes[1].default);
        assert!(!config.gradle.wrapper_enabled);
        assert!(config.daemons.show_stopped);
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = TomlConfig::parse("").expect("Failed to parse TOML");

        assert_eq!(config.server.lib_dir, "lib");
        assert_eq!(config.server.bundle_dir, "server");
        assert!(!config.server.debug);
        assert!(config.gradle.wrapper_enabled);
        assert!(config.gradle.version.is_none());
        assert!(config.java.runtimes.is_empty());
        assert!(!config.daemons.show_stopped);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = TomlConfig::parse("[server\nlib_dir = ");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_convert_to_config() {
        let toml = r#"
            [gradle]
            wrapper_enabled = false
            version = "8.5"
        "#;

        let config: Config = TomlConfig::parse(toml).expect("Failed to parse TOML").into();

        assert!(!config.gradle.wrapper_enabled);
        assert_eq!(config.gradle.version.as_deref(), Some("8.5"));
        assert_eq!(config.server.lib_dir, PathBuf::from("lib"));
    }
}
