//! File store boundary
//!
//! Receipt photos and documents live behind this trait; the core only
//! ever moves opaque bytes and `FileRef`s.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::FileRef;

#[derive(Debug, Clone, Default)]
pub struct FileMetadata {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, metadata: FileMetadata) -> Result<FileRef>;
    async fn retrieve(&self, file_ref: &FileRef) -> Result<Vec<u8>>;
}

/// In-memory file store for development and tests
pub struct InMemoryFileStore {
    blobs: Arc<RwLock<HashMap<Uuid, Vec<u8>>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FileStore for InMemoryFileStore {
    async fn store(&self, bytes: Vec<u8>, metadata: FileMetadata) -> Result<FileRef> {
        let file_ref = FileRef {
            file_id: Uuid::new_v4(),
            filename: metadata.filename,
            mime_type: metadata.mime_type,
            size: bytes.len() as u64,
            checksum: hex::encode(Sha256::digest(&bytes)),
        };

        let mut blobs = self.blobs.write().await;
        blobs.insert(file_ref.file_id, bytes);
        Ok(file_ref)
    }

    async fn retrieve(&self, file_ref: &FileRef) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().await;
        blobs
            .get(&file_ref.file_id)
            .cloned()
            .ok_or_else(|| BotError::Persistence(format!("file {} not found", file_ref.file_id)))
    }
}
