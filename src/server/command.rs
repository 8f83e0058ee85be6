//! Gradle server launch command
//!
//! The launcher is run through the platform shell with every argument
//! wrapped in double quotes.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// JVM options the server always needs
pub const BASE_JVM_OPTS: &str = "--add-opens=java.base/java.util=ALL-UNNAMED \
--add-opens=java.base/java.lang=ALL-UNNAMED \
--add-opens=java.base/java.lang.invoke=ALL-UNNAMED \
--add-opens=java.prefs/java.util.prefs=ALL-UNNAMED \
--add-opens=java.base/java.nio.charset=ALL-UNNAMED \
--add-opens=java.base/java.net=ALL-UNNAMED \
--add-opens=java.base/java.util.concurrent.atomic=ALL-UNNAMED";

/// Remote-debug agent prepended to the JVM options in debug mode
pub const JDWP_AGENT: &str = "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address=8089";

/// Java home handed to the launcher script
pub const JAVA_HOME_ENV: &str = "VSCODE_JAVA_HOME";

/// JVM options handed to the launcher script
pub const SERVER_OPTS_ENV: &str = "GRADLE_SERVER_OPTS";

/// Wrap an argument in double quotes
pub fn quote_arg(arg: &str) -> String {
    format!("\"{}\"", arg)
}

/// Launcher script name for this platform
pub fn server_command_name() -> &'static str {
    if cfg!(windows) {
        "gradle-server.bat"
    } else {
        "gradle-server"
    }
}

/// Arguments of one server launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    /// Task server TCP port
    pub port: u16,
    /// Language server endpoint address (may be the empty sentinel)
    pub language_server_pipe_path: String,
    /// Build-server endpoint address when bridging
    pub build_server_pipe_name: Option<String>,
    /// Bundle directory handed to the build server
    pub bundle_dir: PathBuf,
}

impl LaunchArgs {
    /// Quoted command-line arguments.
    ///
    /// The build-server address and bundle directory are only passed when
    /// bridging.
    pub fn to_args(&self) -> Vec<String> {
        let start_build_server = self.build_server_pipe_name.is_some();
        let mut args = vec![
            quote_arg(&format!("--port={}", self.port)),
            quote_arg(&format!("--startBuildServer={}", start_build_server)),
            quote_arg(&format!(
                "--languageServerPipePath={}",
                self.language_server_pipe_path
            )),
        ];
        if let Some(pipe_name) = &self.build_server_pipe_name {
            args.push(quote_arg(&format!("--pipeName={}", pipe_name)));
            args.push(quote_arg(&format!("--bundleDir={}", self.bundle_dir.display())));
        }
        args
    }
}

/// Environment variables injected for a resolved Java home
pub fn server_env(java_home: &Path, debug: bool) -> Vec<(&'static str, String)> {
    let opts = if debug {
        format!("{} {}", JDWP_AGENT, BASE_JVM_OPTS)
    } else {
        BASE_JVM_OPTS.to_string()
    };
    vec![
        (JAVA_HOME_ENV, java_home.to_string_lossy().into_owned()),
        (SERVER_OPTS_ENV, opts),
    ]
}

/// Reserve a free ephemeral TCP port on loopback
pub fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Shell command line running `program` with already-quoted `args`
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut line = quote_arg(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Command that runs `line` through the platform shell
pub fn shell_command(line: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut command = tokio::process::Command::new("cmd");
        // cmd.exe needs the line unescaped to honour the quotes
        command.arg("/S").arg("/C").raw_arg(format!("\"{}\"", line));
        command
    }

    #[cfg(not(windows))]
    {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(line);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_without_bridge() {
        let args = LaunchArgs {
            port: 51234,
            language_server_pipe_path: "/run/user/1000/ab12.sock".to_string(),
            build_server_pipe_name: None,
            bundle_dir: PathBuf::from("/ext/server"),
        };
        assert_eq!(
            args.to_args(),
            vec![
                "\"--port=51234\"",
                "\"--startBuildServer=false\"",
                "\"--languageServerPipePath=/run/user/1000/ab12.sock\"",
            ]
        );
    }

    #[test]
    fn test_args_with_bridge() {
        let args = LaunchArgs {
            port: 1,
            language_server_pipe_path: String::new(),
            build_server_pipe_name: Some("/tmp/bs.sock".to_string()),
            bundle_dir: PathBuf::from("/ext/server"),
        };
        let rendered = args.to_args();
        assert_eq!(rendered.len(), 5);
        assert_eq!(rendered[1], "\"--startBuildServer=true\"");
        assert_eq!(rendered[2], "\"--languageServerPipePath=\"");
        assert_eq!(rendered[3], "\"--pipeName=/tmp/bs.sock\"");
        assert_eq!(rendered[4], "\"--bundleDir=/ext/server\"");
    }

    #[test]
    fn test_server_env_debug_prefix() {
        let env = server_env(Path::new("/jdk"), true);
        assert_eq!(env[0], (JAVA_HOME_ENV, "/jdk".to_string()));
        assert!(env[1].1.starts_with(JDWP_AGENT));
        assert!(env[1].1.ends_with(BASE_JVM_OPTS));

        let env = server_env(Path::new("/jdk"), false);
        assert_eq!(env[1].1, BASE_JVM_OPTS);
    }

    #[test]
    fn test_command_line() {
        let line = command_line(Path::new("/lib/gradle-server"), &[quote_arg("--port=1")]);
        assert_eq!(line, "\"/lib/gradle-server\" \"--port=1\"");
    }

    #[test]
    fn test_free_port() {
        assert_ne!(free_port().unwrap(), 0);
    }
}
