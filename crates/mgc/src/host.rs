//! The embedder interface.
//!
//! A [`Host`] supplies everything the VM needs from its surroundings:
//! loading script sources, resolving import paths, writing `print` output
//! and receiving error reports. The host is handed to [`Vm::new`] and the
//! VM keeps it for its lifetime.
//!
//! [`Vm::new`]: crate::heap::Vm::new

use thiserror::Error;

/// Classifies reports delivered to [`Host::error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A compile-time error (syntax error, over-budget construct, ...).
    Compile,
    /// A runtime error message.
    Runtime,
    /// One entry of a runtime error's stack trace, reported after the
    /// `Runtime` message, one call per frame.
    Stacktrace,
}

/// Failures a host can produce while serving the VM.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("script '{0}' was not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Embedder callbacks supplied at VM creation.
pub trait Host {
    /// Resolves an import name against the importing script's path.
    /// `from` is `None` when resolving the root script.
    ///
    /// The default implementation returns the name unchanged.
    fn resolve_path(&mut self, from: Option<&str>, name: &str) -> Result<String, HostError> {
        let _ = from;
        Ok(name.to_string())
    }

    /// Loads the source text of the script at `path`.
    fn load_script(&mut self, path: &str) -> Result<String, HostError>;

    /// Called once the VM is done consuming a loaded source, whether or not
    /// compiling it succeeded.
    fn load_done(&mut self, path: &str) {
        let _ = path;
    }

    /// Receives output produced by the `print` facility.
    fn write(&mut self, text: &str);

    /// Receives an error report. `file` is `None` when no source file is
    /// associated with the report.
    fn error(&mut self, kind: ErrorKind, file: Option<&str>, line: u32, message: &str);
}

/// A host backed by the local file system and the standard streams.
#[derive(Debug, Default)]
pub struct FileHost;

impl FileHost {
    /// Creates a file-system host.
    pub fn new() -> Self {
        FileHost
    }
}

impl Host for FileHost {
    fn load_script(&mut self, path: &str) -> Result<String, HostError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write(&mut self, text: &str) {
        print!("{}", text);
    }

    fn error(&mut self, kind: ErrorKind, file: Option<&str>, line: u32, message: &str) {
        match kind {
            ErrorKind::Compile => {
                eprintln!("{}:{}: error: {}", file.unwrap_or("<source>"), line, message)
            }
            ErrorKind::Runtime => eprintln!("Runtime error: {}", message),
            ErrorKind::Stacktrace => {
                eprintln!("  at {}:{}", file.unwrap_or("<source>"), line)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_host_load_missing_script() {
        let mut host = FileHost::new();
        let result = host.load_script("/definitely/not/a/real/path.ms");
        assert!(matches!(result, Err(HostError::Io(_))));
    }

    #[test]
    fn test_default_resolve_path_is_identity() {
        let mut host = FileHost::new();
        let resolved = host.resolve_path(Some("lib/a.ms"), "b.ms").unwrap();
        assert_eq!(resolved, "b.ms");
    }

    #[test]
    fn test_host_error_display() {
        let err = HostError::NotFound("main.ms".to_string());
        assert_eq!(format!("{}", err), "script 'main.ms' was not found");
    }
}
