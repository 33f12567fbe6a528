//! Storage capabilities consumed by the protocol engine.
//!
//! A repository is presented to the engine as five narrow interfaces
//! (objects, references, shallow set, config, index) composed into
//! [`RepositoryStore`]. Backends implement the traits; the engine
//! never sees where the bytes live.

use crate::config::RepoConfig;
use crate::index::Index;
use crate::object::{GitObject, ObjectId, ObjectKind};
use crate::refs::{NamedRef, Ref};
use crate::{Error, Result};
use async_trait::async_trait;
use std::ops::ControlFlow;

/// Content-addressed object access.
#[async_trait]
pub trait ObjectDatabase: Send + Sync {
    /// In-memory object builder; the hash is fixed by `put_object`.
    fn new_object(&self, kind: ObjectKind, data: Vec<u8>) -> GitObject {
        GitObject::new(kind, data)
    }

    /// Write an object and return its id. Writing the same object
    /// twice is idempotent.
    async fn put_object(&self, obj: &GitObject) -> Result<ObjectId>;

    /// Read an object. A `kind` hint of `None` matches any kind; a
    /// hint that disagrees with the stored kind reads as not-found.
    async fn object(&self, kind: Option<ObjectKind>, id: &ObjectId) -> Result<GitObject>;

    async fn contains_object(&self, id: &ObjectId) -> Result<bool>;

    async fn object_size(&self, id: &ObjectId) -> Result<u64>;

    /// Ids of every stored object, in no particular order.
    async fn object_ids(&self) -> Result<Vec<ObjectId>>;

    /// Alternates are unsupported; accepted and ignored.
    fn add_alternate(&self, _url: &str) {}
}

/// Named reference access.
#[async_trait]
pub trait ReferenceDatabase: Send + Sync {
    /// Unconditional upsert.
    async fn set_ref(&self, r: &NamedRef) -> Result<()>;

    /// Compare-and-swap. `old` of `None` requires the reference to be
    /// absent; `new` of `None` deletes it. A mismatch with the stored
    /// value fails with [`Error::RefConflict`].
    async fn check_and_set_ref(
        &self,
        name: &str,
        old: Option<&Ref>,
        new: Option<&Ref>,
    ) -> Result<()>;

    async fn reference(&self, name: &str) -> Result<NamedRef>;

    /// Every reference of the repository, materialized.
    async fn references(&self) -> Result<Vec<NamedRef>>;

    async fn remove_ref(&self, name: &str) -> Result<()>;

    /// Backends here have no loose/packed split.
    fn loose_ref_count(&self) -> usize {
        0
    }

    fn pack_refs(&self) -> Result<()> {
        Ok(())
    }
}

/// The shallow-boundary commit set.
#[async_trait]
pub trait ShallowDatabase: Send + Sync {
    /// Empty when no shallow state exists.
    async fn shallow(&self) -> Result<Vec<ObjectId>>;

    async fn set_shallow(&self, commits: &[ObjectId]) -> Result<()>;
}

/// Per-repository configuration.
#[async_trait]
pub trait ConfigDatabase: Send + Sync {
    /// Empty config when none was ever stored.
    async fn config(&self) -> Result<RepoConfig>;

    async fn set_config(&self, config: &RepoConfig) -> Result<()>;
}

/// The working-tree index; bare deployments rarely materialize one.
#[async_trait]
pub trait IndexDatabase: Send + Sync {
    /// Empty version-2 index when none was ever stored.
    async fn index(&self) -> Result<Index>;

    async fn set_index(&self, index: &Index) -> Result<()>;
}

/// The composite capability set a protocol session runs against.
pub trait RepositoryStore:
    ObjectDatabase + ReferenceDatabase + ShallowDatabase + ConfigDatabase + IndexDatabase
{
}

impl<T> RepositoryStore for T where
    T: ObjectDatabase + ReferenceDatabase + ShallowDatabase + ConfigDatabase + IndexDatabase
{
}

const MAX_SYMBOLIC_DEPTH: usize = 10;

/// Follow a (possibly symbolic) reference down to an object id.
pub async fn resolve_ref<S: ReferenceDatabase + ?Sized>(store: &S, name: &str) -> Result<ObjectId> {
    let mut current = name.to_string();
    for _ in 0..MAX_SYMBOLIC_DEPTH {
        match store.reference(&current).await?.target {
            Ref::Hash(id) => return Ok(id),
            Ref::Symbolic(next) => current = next,
        }
    }
    Err(Error::RefNotFound(format!(
        "symbolic chain too deep starting at {name:?}"
    )))
}

/// Lazy object iteration: ids are listed up front, each object is
/// fetched and decoded on demand, and entries whose kind does not
/// match the filter are skipped.
pub struct ObjectIter<'a, S: ObjectDatabase + ?Sized> {
    store: &'a S,
    ids: Vec<ObjectId>,
    pos: usize,
    filter: Option<ObjectKind>,
}

impl<'a, S: ObjectDatabase + ?Sized> ObjectIter<'a, S> {
    pub async fn new(store: &'a S, filter: Option<ObjectKind>) -> Result<Self> {
        let ids = store.object_ids().await?;
        Ok(Self {
            store,
            ids,
            pos: 0,
            filter,
        })
    }

    /// Next matching object; read errors surface to the caller.
    pub async fn next(&mut self) -> Result<Option<GitObject>> {
        while self.pos < self.ids.len() {
            let id = self.ids[self.pos];
            self.pos += 1;
            let obj = self.store.object(None, &id).await?;
            match self.filter {
                Some(kind) if obj.kind != kind => continue,
                _ => return Ok(Some(obj)),
            }
        }
        Ok(None)
    }

    /// Drive the iterator; `ControlFlow::Break` stops cleanly.
    pub async fn for_each(
        mut self,
        mut f: impl FnMut(GitObject) -> ControlFlow<()> + Send,
    ) -> Result<()> {
        while let Some(obj) = self.next().await? {
            if f(obj).is_break() {
                break;
            }
        }
        Ok(())
    }
}
