//! Local IPC endpoint naming
//!
//! Windows uses the reserved `\\.\pipe\` namespace. Elsewhere the endpoint is
//! a socket file under the runtime directory, and the random part is sized
//! so the full path stays under the platform's `sun_path` limit.

use crate::error::{BridgeError, Result};
use crate::telemetry;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::error;

/// Fixed suffix of socket-file endpoints
pub const PIPE_SUFFIX: &str = ".sock";

/// Longest random part ever generated
pub const MAX_RANDOM_LENGTH: usize = 32;

/// Shortest random part accepted
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Safe socket path length for the current platform, `None` when unrestricted
pub fn safe_ipc_path_length() -> Option<usize> {
    if cfg!(target_os = "linux") {
        Some(107)
    } else if cfg!(target_os = "macos") {
        Some(103)
    } else {
        None
    }
}

/// Length of the random part for a directory of `dir_len` bytes.
///
/// Returns `None` when the ceiling leaves room for fewer than
/// [`MIN_RANDOM_LENGTH`] characters.
pub fn random_length(dir_len: usize, ceiling: Option<usize>) -> Option<usize> {
    let length = match ceiling {
        Some(limit) => {
            let available = limit as isize - dir_len as isize - PIPE_SUFFIX.len() as isize;
            available.min(MAX_RANDOM_LENGTH as isize)
        }
        None => MAX_RANDOM_LENGTH as isize,
    };

    if length < MIN_RANDOM_LENGTH as isize {
        None
    } else {
        Some(length as usize)
    }
}

/// Generate a socket path inside `dir` under the given length ceiling
pub fn generate_in(dir: &Path, ceiling: Option<usize>) -> Result<PathBuf> {
    let dir_len = dir.as_os_str().len();
    let length = random_length(dir_len, ceiling).ok_or_else(|| {
        BridgeError::EndpointSetup(format!(
            "Unable to generate a random pipe name in {:?}: fewer than {} characters available",
            dir, MIN_RANDOM_LENGTH
        ))
    })?;

    let suffix = random_hex(length / 2);
    Ok(dir.join(format!("{}{}", suffix, PIPE_SUFFIX)))
}

/// Generate an endpoint address for the current platform
pub fn generate() -> Result<String> {
    if cfg!(windows) {
        return Ok(format!(r"\\.\pipe\{}-sock", random_hex(16)));
    }

    let dir = runtime_dir()?;
    let path = generate_in(&dir, safe_ipc_path_length())?;
    Ok(path.to_string_lossy().into_owned())
}

/// Generate an endpoint address, or the empty sentinel on failure.
///
/// Failures are logged and reported; callers must check for `""` and skip
/// whatever depended on the endpoint.
pub fn random_pipe_name() -> String {
    match generate() {
        Ok(name) => name,
        Err(e) => {
            error!("Failed to generate pipe name: {}", e);
            telemetry::send_info("generateRandomPipeNameError");
            String::new()
        }
    }
}

/// Symlink-free runtime directory: `$XDG_RUNTIME_DIR`, else the temp dir
fn runtime_dir() -> Result<PathBuf> {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    dir.canonicalize().map_err(|e| {
        BridgeError::EndpointSetup(format!("Failed to resolve runtime directory {:?}: {}", dir, e))
    })
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_random_length_unrestricted() {
        assert_eq!(random_length(500, None), Some(MAX_RANDOM_LENGTH));
    }

    #[test]
    fn test_random_length_capped_at_max() {
        assert_eq!(random_length(10, Some(107)), Some(32));
    }

    #[test]
    fn test_random_length_bounded_by_ceiling() {
        // 107 - 80 - 5
        assert_eq!(random_length(80, Some(107)), Some(22));
        assert_eq!(random_length(86, Some(107)), Some(16));
        assert_eq!(random_length(87, Some(107)), None);
    }

    #[test]
    fn test_random_length_directory_longer_than_ceiling() {
        assert_eq!(random_length(200, Some(103)), None);
    }

    #[test]
    fn test_generate_in_respects_ceiling() {
        let dir = Path::new("/tmp/some/runtime/dir");
        let ceiling = 60;
        let path = generate_in(dir, Some(ceiling)).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let random = name.strip_suffix(PIPE_SUFFIX).unwrap();
        assert!(random.len() <= ceiling - dir.as_os_str().len() - PIPE_SUFFIX.len());
        assert!(random.len() >= MIN_RANDOM_LENGTH);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(path.as_os_str().len() <= ceiling);
    }

    #[test]
    fn test_generate_in_fails_when_too_long() {
        let dir = PathBuf::from(format!("/{}", "d".repeat(90)));
        let result = generate_in(&dir, Some(107));
        assert!(matches!(result, Err(BridgeError::EndpointSetup(_))));
    }

    #[test]
    fn test_generate_in_is_unique() {
        let dir = Path::new("/run/user/1000");
        let a = generate_in(dir, Some(107)).unwrap();
        let b = generate_in(dir, Some(107)).unwrap();
        assert_ne!(a, b);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_random_pipe_name_under_runtime_dir() {
        let tmp = TempDir::new().unwrap();
        let previous = std::env::var_os("XDG_RUNTIME_DIR");
        std::env::set_var("XDG_RUNTIME_DIR", tmp.path());

        let name = random_pipe_name();

        match previous {
            Some(value) => std::env::set_var("XDG_RUNTIME_DIR", value),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }

        let canonical = tmp.path().canonicalize().unwrap();
        assert!(name.starts_with(&*canonical.to_string_lossy()));
        assert!(name.ends_with(PIPE_SUFFIX));
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial]
    fn test_random_pipe_name_sentinel_on_long_dir() {
        let tmp = TempDir::new().unwrap();
        let base_len = tmp.path().canonicalize().unwrap().as_os_str().len();
        // Push the directory past the point where 16 random characters fit
        let needed = 107usize.saturating_sub(base_len + PIPE_SUFFIX.len() + MIN_RANDOM_LENGTH) + 2;
        let deep = tmp.path().join("x".repeat(needed.max(2)));
        std::fs::create_dir_all(&deep).unwrap();

        let previous = std::env::var_os("XDG_RUNTIME_DIR");
        std::env::set_var("XDG_RUNTIME_DIR", &deep);

        let name = random_pipe_name();

        match previous {
            Some(value) => std::env::set_var("XDG_RUNTIME_DIR", value),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }

        assert_eq!(name, "");
    }
}
