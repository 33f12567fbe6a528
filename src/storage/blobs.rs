//! Shallow, config and index capabilities.
//!
//! All three live as single blobs in the object store and default to
//! empty when absent, which is the common case on a bare server.

use super::{backend_err, RepoStore};
use crate::object_store::ObjectStoreError;
use async_trait::async_trait;
use gitvault_git::config::RepoConfig;
use gitvault_git::index::Index;
use gitvault_git::object::ObjectId;
use gitvault_git::store::{ConfigDatabase, IndexDatabase, ShallowDatabase};
use gitvault_git::{Error, Result};

#[async_trait]
impl ShallowDatabase for RepoStore {
    async fn shallow(&self) -> Result<Vec<ObjectId>> {
        let raw = match self.objects.get(&self.shallow_key()).await {
            Ok(raw) => raw,
            Err(ObjectStoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(backend_err(err)),
        };
        let text = String::from_utf8(raw)
            .map_err(|_| Error::Storage("shallow blob is not utf-8".into()))?;
        let mut commits = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = ObjectId::from_hex(line)
                .ok_or_else(|| Error::Storage(format!("malformed shallow entry {line:?}")))?;
            commits.push(id);
        }
        Ok(commits)
    }

    async fn set_shallow(&self, commits: &[ObjectId]) -> Result<()> {
        let mut blob = String::new();
        for id in commits {
            blob.push_str(&id.to_hex());
            blob.push('\n');
        }
        self.objects
            .put(&self.shallow_key(), blob.into_bytes())
            .await
            .map_err(backend_err)
    }
}

#[async_trait]
impl ConfigDatabase for RepoStore {
    async fn config(&self) -> Result<RepoConfig> {
        match self.objects.get(&self.config_key()).await {
            Ok(raw) => RepoConfig::parse(&raw),
            Err(ObjectStoreError::NotFound(_)) => Ok(RepoConfig::new()),
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn set_config(&self, config: &RepoConfig) -> Result<()> {
        self.objects
            .put(&self.config_key(), config.to_bytes())
            .await
            .map_err(backend_err)
    }
}

#[async_trait]
impl IndexDatabase for RepoStore {
    async fn index(&self) -> Result<Index> {
        match self.objects.get(&self.index_key()).await {
            Ok(raw) => Index::decode(&raw),
            Err(ObjectStoreError::NotFound(_)) => Ok(Index::default()),
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn set_index(&self, index: &Index) -> Result<()> {
        self.objects
            .put(&self.index_key(), index.encode())
            .await
            .map_err(backend_err)
    }
}
