//! The daemon's Unix socket
//!
//! A [`SocketListener`] owns its socket file. Binding clears a file left by a
//! daemon that died without cleaning up, but refuses to take over a socket
//! that still answers. Dropping the listener removes the file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};

/// Listening socket of a running daemon
#[derive(Debug)]
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketListener {
    /// Listen on `path`, replacing a stale socket file
    pub async fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(DaemonError::Ipc(format!(
                    "Another fpsim daemon is serving on {:?}",
                    path
                )));
            }
            info!("Removing stale socket {:?}", path);
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| DaemonError::Ipc(format!("Failed to bind {:?}: {}", path, e)))?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove socket {:?}: {}", self.path, e),
        }
    }
}

/// Connect to the daemon serving on `path`
pub async fn connect(path: &Path) -> Result<UnixStream> {
    UnixStream::connect(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
            DaemonError::DaemonNotRunning(path.to_path_buf())
        }
        _ => DaemonError::Ipc(format!("Failed to connect to {:?}: {}", path, e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fpsim.sock");

        let first = SocketListener::bind(&path).await.unwrap();
        match SocketListener::bind(&path).await {
            Err(DaemonError::Ipc(message)) => assert!(message.contains("Another fpsim daemon")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(path.exists());

        let stream = connect(first.path()).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fpsim.sock");
        std::fs::write(&path, b"left over").unwrap();

        let listener = SocketListener::bind(&path).await.unwrap();
        assert!(connect(listener.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fpsim.sock");

        let listener = SocketListener::bind(&path).await.unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());

        // The address is free again
        let again = SocketListener::bind(&path).await.unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn test_connect_without_daemon() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.sock");
        match connect(&path).await {
            Err(DaemonError::DaemonNotRunning(reported)) => assert_eq!(reported, path),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
