//! Local directory acting as the remote server.
//!
//! Behaves like a plain FTP server would: `mkdir` creates a single level,
//! uploads and renames fail when the target directory is missing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{RemoteSession, Transport, TransportError};
use crate::config::DeployConfig;
use crate::error::EngineError;
use crate::fs_ops;

/// Transport for `file://` hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorTransport;

impl Transport for MirrorTransport {
    fn connect(&self, config: &DeployConfig) -> Result<Box<dyn RemoteSession>, TransportError> {
        let root = config.mirror_root().ok_or_else(|| {
            TransportError::Connect(format!("{} is not a file:// location", config.host))
        })?;
        if !root.is_dir() {
            return Err(TransportError::Connect(format!(
                "mirror root {} is not a directory",
                root.display()
            )));
        }

        let base = join_relative(&root, &config.remote_folder);
        fs_ops::ensure_dir_exists(&base)
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(base = %base.display(), "Mirror session opened");
        Ok(Box::new(MirrorSession { base }))
    }
}

/// Session over a local directory.
#[derive(Debug)]
pub struct MirrorSession {
    base: PathBuf,
}

impl MirrorSession {
    fn resolve(&self, remote: &str) -> PathBuf {
        join_relative(&self.base, remote)
    }

    fn require_parent(&self, target: &Path) -> Result<(), TransportError> {
        match target.parent() {
            Some(parent) if !parent.is_dir() => Err(TransportError::Protocol(format!(
                "550 {}: no such directory",
                parent.display()
            ))),
            _ => Ok(()),
        }
    }
}

impl RemoteSession for MirrorSession {
    fn mkdir(&mut self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(path);
        match fs::create_dir(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(TransportError::Protocol(
                format!("550 {}: file exists", path),
            )),
            Err(e) => Err(TransportError::from_io(e)),
        }
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let target = self.resolve(remote);
        self.require_parent(&target)?;
        if target.is_dir() {
            return Err(TransportError::Protocol(format!(
                "553 {}: is a directory",
                remote
            )));
        }
        fs_ops::copy_file_with_metadata(local, &target).map_err(|e| match e {
            EngineError::ReadError { source, .. } => TransportError::Io(source),
            other => TransportError::Protocol(other.to_string()),
        })
    }

    fn delete(&mut self, path: &str) -> Result<(), TransportError> {
        fs::remove_file(self.resolve(path)).map_err(TransportError::from_io)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        if !source.is_file() {
            return Err(TransportError::Protocol(format!(
                "550 {}: no such file",
                from
            )));
        }
        self.require_parent(&target)?;
        fs::rename(source, target).map_err(TransportError::from_io)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        debug!(base = %self.base.display(), "Mirror session closed");
        Ok(())
    }
}

fn join_relative(base: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}
