//! File logging for programs that own the terminal.
//!
//! While the runtime is active, stdout belongs to the UI, so `tracing`
//! output has to go to a file instead.

use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "sprig=debug,sprig_core=debug";

/// Send `tracing` output to `path`, appending to the file.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
/// Returns `Ok(false)` if a global subscriber was already installed, in
/// which case that one keeps receiving events.
///
/// # Example
///
/// ```no_run
/// sprig_core::logging::log_to_file("debug.log").unwrap();
/// tracing::debug!("written to debug.log");
/// ```
pub fn log_to_file(path: impl AsRef<Path>) -> Result<bool, std::io::Error> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_an_error() {
        let path = std::env::temp_dir()
            .join("sprig-no-such-dir")
            .join("nested")
            .join("debug.log");
        assert!(log_to_file(path).is_err());
    }

    #[test]
    fn creates_the_file() {
        let path = std::env::temp_dir().join(format!("sprig-log-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        log_to_file(&path).unwrap();
        assert!(path.exists());

        let _ = std::fs::remove_file(&path);
    }
}
