//! In-memory repository store.
//!
//! Backs the engine's unit and protocol tests; also a reference
//! implementation of the capability traits.

use crate::config::RepoConfig;
use crate::index::Index;
use crate::object::{GitObject, ObjectId, ObjectKind};
use crate::refs::{validate_ref_name, NamedRef, Ref};
use crate::store::{
    ConfigDatabase, IndexDatabase, ObjectDatabase, ReferenceDatabase, ShallowDatabase,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
struct State {
    objects: HashMap<ObjectId, GitObject>,
    refs: BTreeMap<String, Ref>,
    shallow: Vec<ObjectId>,
    config: RepoConfig,
    index: Index,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| Error::Storage(format!("lock: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| Error::Storage(format!("lock: {e}")))
    }
}

#[async_trait]
impl ObjectDatabase for MemoryStore {
    async fn put_object(&self, obj: &GitObject) -> Result<ObjectId> {
        let id = obj.id();
        self.write()?.objects.insert(id, obj.clone());
        Ok(id)
    }

    async fn object(&self, kind: Option<ObjectKind>, id: &ObjectId) -> Result<GitObject> {
        let state = self.read()?;
        let obj = state
            .objects
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound(id.to_hex()))?;
        if kind.is_some_and(|k| k != obj.kind) {
            return Err(Error::ObjectNotFound(id.to_hex()));
        }
        Ok(obj.clone())
    }

    async fn contains_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.read()?.objects.contains_key(id))
    }

    async fn object_size(&self, id: &ObjectId) -> Result<u64> {
        self.object(None, id).await.map(|obj| obj.size())
    }

    async fn object_ids(&self) -> Result<Vec<ObjectId>> {
        Ok(self.read()?.objects.keys().copied().collect())
    }
}

#[async_trait]
impl ReferenceDatabase for MemoryStore {
    async fn set_ref(&self, r: &NamedRef) -> Result<()> {
        validate_ref_name(&r.name)?;
        self.write()?.refs.insert(r.name.clone(), r.target.clone());
        Ok(())
    }

    async fn check_and_set_ref(
        &self,
        name: &str,
        old: Option<&Ref>,
        new: Option<&Ref>,
    ) -> Result<()> {
        validate_ref_name(name)?;
        let mut state = self.write()?;
        let current = state.refs.get(name);
        match (old, current) {
            (None, None) => {}
            (Some(expected), Some(current)) if expected == current => {}
            _ => return Err(Error::RefConflict(name.to_string())),
        }
        match new {
            Some(target) => {
                state.refs.insert(name.to_string(), target.clone());
            }
            None => {
                state.refs.remove(name);
            }
        }
        Ok(())
    }

    async fn reference(&self, name: &str) -> Result<NamedRef> {
        let state = self.read()?;
        let target = state
            .refs
            .get(name)
            .ok_or_else(|| Error::RefNotFound(name.to_string()))?;
        Ok(NamedRef::new(name, target.clone()))
    }

    async fn references(&self) -> Result<Vec<NamedRef>> {
        Ok(self
            .read()?
            .refs
            .iter()
            .map(|(name, target)| NamedRef::new(name.clone(), target.clone()))
            .collect())
    }

    async fn remove_ref(&self, name: &str) -> Result<()> {
        self.write()?.refs.remove(name);
        Ok(())
    }
}

#[async_trait]
impl ShallowDatabase for MemoryStore {
    async fn shallow(&self) -> Result<Vec<ObjectId>> {
        Ok(self.read()?.shallow.clone())
    }

    async fn set_shallow(&self, commits: &[ObjectId]) -> Result<()> {
        self.write()?.shallow = commits.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ConfigDatabase for MemoryStore {
    async fn config(&self) -> Result<RepoConfig> {
        Ok(self.read()?.config.clone())
    }

    async fn set_config(&self, config: &RepoConfig) -> Result<()> {
        self.write()?.config = config.clone();
        Ok(())
    }
}

#[async_trait]
impl IndexDatabase for MemoryStore {
    async fn index(&self) -> Result<Index> {
        Ok(self.read()?.index.clone())
    }

    async fn set_index(&self, index: &Index) -> Result<()> {
        self.write()?.index = index.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{resolve_ref, ObjectIter};
    use std::ops::ControlFlow;

    #[tokio::test]
    async fn object_round_trip_and_idempotent_put() {
        let store = MemoryStore::new();
        let obj = GitObject::blob(b"hello world\n".to_vec());

        let id = store.put_object(&obj).await.unwrap();
        let again = store.put_object(&obj).await.unwrap();
        assert_eq!(id, again);

        let read = store.object(None, &id).await.unwrap();
        assert_eq!(read, obj);
        assert_eq!(store.object_size(&id).await.unwrap(), 12);
        assert!(store.contains_object(&id).await.unwrap());
        assert!(!store.contains_object(&ObjectId::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn kind_hint_mismatch_reads_as_not_found() {
        let store = MemoryStore::new();
        let id = store
            .put_object(&GitObject::blob(b"x".to_vec()))
            .await
            .unwrap();

        assert!(store.object(Some(ObjectKind::Blob), &id).await.is_ok());
        assert!(matches!(
            store.object(Some(ObjectKind::Commit), &id).await,
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn ref_round_trip() {
        let store = MemoryStore::new();
        let id = store
            .put_object(&GitObject::blob(b"x".to_vec()))
            .await
            .unwrap();

        store
            .set_ref(&NamedRef::new("refs/heads/main", Ref::Hash(id)))
            .await
            .unwrap();
        store
            .set_ref(&NamedRef::new("HEAD", Ref::symbolic("refs/heads/main")))
            .await
            .unwrap();

        let main = store.reference("refs/heads/main").await.unwrap();
        assert_eq!(main.target, Ref::Hash(id));
        assert_eq!(resolve_ref(&store, "HEAD").await.unwrap(), id);

        let all = store.references().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.iter().filter(|r| r.name == "refs/heads/main").count(),
            1
        );

        store.remove_ref("refs/heads/main").await.unwrap();
        assert!(store.reference("refs/heads/main").await.is_err());
    }

    #[tokio::test]
    async fn cas_detects_stale_old_value() {
        let store = MemoryStore::new();
        let a = store
            .put_object(&GitObject::blob(b"a".to_vec()))
            .await
            .unwrap();
        let b = store
            .put_object(&GitObject::blob(b"b".to_vec()))
            .await
            .unwrap();

        // Create succeeds only when absent.
        store
            .check_and_set_ref("refs/heads/main", None, Some(&Ref::Hash(a)))
            .await
            .unwrap();
        assert!(matches!(
            store
                .check_and_set_ref("refs/heads/main", None, Some(&Ref::Hash(b)))
                .await,
            Err(Error::RefConflict(_))
        ));

        // Update requires the stored value.
        assert!(matches!(
            store
                .check_and_set_ref("refs/heads/main", Some(&Ref::Hash(b)), Some(&Ref::Hash(b)))
                .await,
            Err(Error::RefConflict(_))
        ));
        store
            .check_and_set_ref("refs/heads/main", Some(&Ref::Hash(a)), Some(&Ref::Hash(b)))
            .await
            .unwrap();

        // Delete with matching old value.
        store
            .check_and_set_ref("refs/heads/main", Some(&Ref::Hash(b)), None)
            .await
            .unwrap();
        assert!(store.reference("refs/heads/main").await.is_err());
    }

    #[tokio::test]
    async fn object_iter_filters_and_stops() {
        let store = MemoryStore::new();
        store
            .put_object(&GitObject::blob(b"one".to_vec()))
            .await
            .unwrap();
        store
            .put_object(&GitObject::blob(b"two".to_vec()))
            .await
            .unwrap();
        store
            .put_object(&GitObject::new(ObjectKind::Tree, Vec::new()))
            .await
            .unwrap();

        let mut iter = ObjectIter::new(&store, Some(ObjectKind::Blob)).await.unwrap();
        let mut blobs = 0;
        while let Some(obj) = iter.next().await.unwrap() {
            assert_eq!(obj.kind, ObjectKind::Blob);
            blobs += 1;
        }
        assert_eq!(blobs, 2);

        let iter = ObjectIter::new(&store, None).await.unwrap();
        let mut seen = 0;
        iter.for_each(|_| {
            seen += 1;
            if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await
        .unwrap();
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn shallow_config_index_defaults() {
        let store = MemoryStore::new();
        assert!(store.shallow().await.unwrap().is_empty());
        assert!(store.config().await.unwrap().is_empty());
        assert_eq!(store.index().await.unwrap().version, 2);

        let id = ObjectId::from_hex("3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap();
        store.set_shallow(&[id]).await.unwrap();
        assert_eq!(store.shallow().await.unwrap(), vec![id]);
    }
}
