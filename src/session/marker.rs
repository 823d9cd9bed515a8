//! Persisted "was connected" marker driving silent reconnect on startup

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("marker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("marker encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConnectionMarker: Send + Sync {
    /// Unreadable markers count as "not connected"
    async fn was_connected(&self) -> bool;

    async fn set_connected(&self) -> Result<(), MarkerError>;

    async fn clear(&self) -> Result<(), MarkerError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    connected: bool,
    updated_at: DateTime<Utc>,
}

/// Marker stored as a small JSON file
#[derive(Debug, Clone)]
pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn write(&self, connected: bool) -> Result<(), MarkerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec(&MarkerFile {
            connected,
            updated_at: Utc::now(),
        })?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionMarker for FileMarker {
    async fn was_connected(&self) -> bool {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return false,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Cannot read connection marker");
                return false;
            }
        };
        match serde_json::from_slice::<MarkerFile>(&bytes) {
            Ok(marker) => marker.connected,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Corrupt connection marker");
                false
            }
        }
    }

    async fn set_connected(&self) -> Result<(), MarkerError> {
        self.write(true).await
    }

    async fn clear(&self) -> Result<(), MarkerError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryMarker {
    connected: AtomicBool,
}

impl MemoryMarker {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }
}

#[async_trait]
impl ConnectionMarker for MemoryMarker {
    async fn was_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_connected(&self) -> Result<(), MarkerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), MarkerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
