//! SSH keypair generation for new machines.
//!
//! Keys are produced by `ssh-keygen` so the on-disk format matches what the
//! host's SSH client expects. The public half always lives next to the
//! private key with a `.pub` suffix.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::command::{CommandRunner, ProcessCommandRunner, SpawnError};

/// Default `ssh-keygen` binary name.
pub const DEFAULT_SSH_KEYGEN_BIN: &str = "ssh-keygen";

const PUBLIC_KEY_SUFFIX: &str = ".pub";
const KEY_BITS: &str = "2048";

/// Errors raised while generating or reading a keypair.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshKeyError {
    /// Raised when the key generator cannot be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Raised when the key generator exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    GeneratorFailed {
        /// Program that failed.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the key path has no parent directory or file name.
    #[error("invalid key path {path}")]
    InvalidPath {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when the public key cannot be read back.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Underlying I/O error message.
        message: String,
    },
}

/// Returns the public key path for `private_key`.
#[must_use]
pub fn public_key_path(private_key: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{private_key}{PUBLIC_KEY_SUFFIX}"))
}

/// Produces a keypair at a path and returns the public key text.
pub trait KeyGenerator {
    /// Generates a keypair whose private half is written to `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SshKeyError`] when generation fails or the public key cannot
    /// be read.
    fn generate(&self, private_key: &Utf8Path) -> Result<String, SshKeyError>;
}

/// Key generator that shells out to `ssh-keygen`.
#[derive(Clone, Debug)]
pub struct SshKeygen<R: CommandRunner = ProcessCommandRunner> {
    program: String,
    runner: R,
}

impl SshKeygen<ProcessCommandRunner> {
    /// Creates a generator wired to the real process runner.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(DEFAULT_SSH_KEYGEN_BIN, ProcessCommandRunner)
    }
}

impl Default for SshKeygen<ProcessCommandRunner> {
    fn default() -> Self {
        Self::with_process_runner()
    }
}

impl<R: CommandRunner> SshKeygen<R> {
    /// Creates a generator that runs `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn keygen_args(private_key: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-t"),
            OsString::from("rsa"),
            OsString::from("-b"),
            OsString::from(KEY_BITS),
            OsString::from("-N"),
            OsString::new(),
            OsString::from("-q"),
            OsString::from("-f"),
            OsString::from(private_key.as_str()),
        ]
    }
}

impl<R: CommandRunner> KeyGenerator for SshKeygen<R> {
    fn generate(&self, private_key: &Utf8Path) -> Result<String, SshKeyError> {
        let output = self
            .runner
            .run(&self.program, &Self::keygen_args(private_key))?;
        if !output.is_success() {
            return Err(SshKeyError::GeneratorFailed {
                program: self.program.clone(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }

        read_public_key(private_key)
    }
}

/// Reads the public key that accompanies `private_key`.
///
/// # Errors
///
/// Returns [`SshKeyError::Read`] when the `.pub` file is missing or
/// unreadable.
pub fn read_public_key(private_key: &Utf8Path) -> Result<String, SshKeyError> {
    let path = public_key_path(private_key);
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(SshKeyError::InvalidPath { path: path.clone() });
    };
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };

    let read = |err: io::Error| SshKeyError::Read {
        path: path.clone(),
        message: err.to_string(),
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(read)?;
    let contents = dir.read_to_string(file_name).map_err(read)?;
    Ok(contents.trim_end().to_owned())
}
