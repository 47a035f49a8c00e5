//! Remote side of a deployment.
//!
//! `Transport` opens a `RemoteSession` for a validated config; the executor
//! only ever talks to the session. All remote paths handed to a session are
//! relative to the configured remote folder, forward-slash separated.
//!
//! Two implementations:
//! - `FtpTransport`: a real FTP server (binary mode, socket timeouts)
//! - `MirrorTransport`: a local directory standing in for the server,
//!   selected with a `file://` host

mod ftp;
mod mirror;

pub use ftp::FtpTransport;
pub use mirror::MirrorTransport;

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::config::DeployConfig;

/// Why a remote call failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server could not be reached
    #[error("connection failed: {0}")]
    Connect(String),

    /// Login rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No answer within the configured timeout
    #[error("operation timed out")]
    Timeout,

    /// Local or socket I/O failure
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Server answered with an error reply
    #[error("server rejected request: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Map an I/O error, turning socket timeouts into `Timeout`.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            _ => TransportError::Io(err),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from_io(err)
    }
}

/// Opens sessions against a remote.
pub trait Transport {
    /// Connect, log in, then create and enter the remote folder.
    ///
    /// # Errors
    /// Any failure here is fatal for the run.
    fn connect(&self, config: &DeployConfig) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// One open connection. Calls are made serially, in plan order.
pub trait RemoteSession {
    /// Create one directory level. Succeeds if it already exists.
    fn mkdir(&mut self, path: &str) -> Result<(), TransportError>;

    /// Store the contents of `local` at `remote`, replacing any existing
    /// file. Returns the number of bytes sent.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError>;

    /// Remove a file.
    fn delete(&mut self, path: &str) -> Result<(), TransportError>;

    /// Move a file within the remote folder.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError>;

    /// End the session politely.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Pick the transport for `config`: a `file://` host is a local mirror,
/// anything else is FTP.
pub fn transport_for(config: &DeployConfig) -> Box<dyn Transport> {
    if config.mirror_root().is_some() {
        Box::new(MirrorTransport)
    } else {
        Box::new(FtpTransport)
    }
}
