//! Object capability over the object store.
//!
//! Objects are stored loose (`"<kind> <size>\0<payload>"`) under
//! their hash. Writes are idempotent because the key is the hash.

use super::{backend_err, RepoStore};
use crate::object_store::ObjectStoreError;
use async_trait::async_trait;
use gitvault_git::object::{GitObject, ObjectId, ObjectKind};
use gitvault_git::store::ObjectDatabase;
use gitvault_git::{Error, Result};

#[async_trait]
impl ObjectDatabase for RepoStore {
    async fn put_object(&self, obj: &GitObject) -> Result<ObjectId> {
        let id = obj.id();
        self.objects
            .put(&self.object_key(&id), obj.encode_loose())
            .await
            .map_err(backend_err)?;
        Ok(id)
    }

    async fn object(&self, kind: Option<ObjectKind>, id: &ObjectId) -> Result<GitObject> {
        let raw = match self.objects.get(&self.object_key(id)).await {
            Ok(raw) => raw,
            Err(ObjectStoreError::NotFound(_)) => {
                return Err(Error::ObjectNotFound(id.to_hex()));
            }
            Err(err) => return Err(backend_err(err)),
        };
        let obj = GitObject::decode_loose(&raw)?;
        // A kind hint that disagrees reads as not-found, not as a
        // type error; the engine relies on that.
        if kind.is_some_and(|k| k != obj.kind) {
            return Err(Error::ObjectNotFound(id.to_hex()));
        }
        Ok(obj)
    }

    async fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        match self.objects.head(&self.object_key(id)).await {
            Ok(()) => Ok(true),
            Err(ObjectStoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn object_size(&self, id: &ObjectId) -> Result<u64> {
        self.object(None, id).await.map(|obj| obj.size())
    }

    async fn object_ids(&self) -> Result<Vec<ObjectId>> {
        let prefix = self.objects_prefix();
        let keys = self.objects.list(&prefix).await.map_err(backend_err)?;
        Ok(keys
            .iter()
            .filter_map(|key| key.rsplit('/').next())
            .filter_map(ObjectId::from_hex)
            .collect())
    }
}
