//! Storage adapter: presents one repository to the protocol engine.
//!
//! Implements the engine's capability traits over the object-store
//! and metadata-store clients. A `RepoStore` is built per request
//! from the shared clients and a repository name; it holds no state
//! of its own, so any number can exist concurrently.
//!
//! Key layout under the bucket:
//!   repositories/<repo>/objects/<hash40>  loose object bytes
//!   repositories/<repo>/shallow           newline-delimited hashes
//!   repositories/<repo>/config            git-config text
//!   repositories/<repo>/index             version-2 index

mod blobs;
mod objects;
mod refs;

use crate::meta_store::MetaStore;
use crate::object_store::{ObjectStore, ObjectStoreError};
use gitvault_git::object::ObjectId;
use gitvault_git::Error;

pub struct RepoStore {
    objects: ObjectStore,
    meta: MetaStore,
    repo: String,
}

impl RepoStore {
    pub fn new(objects: ObjectStore, meta: MetaStore, repo: impl Into<String>) -> Self {
        Self {
            objects,
            meta,
            repo: repo.into(),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn object_key(&self, id: &ObjectId) -> String {
        object_key(&self.repo, id)
    }

    fn objects_prefix(&self) -> String {
        objects_prefix(&self.repo)
    }

    fn shallow_key(&self) -> String {
        format!("repositories/{}/shallow", self.repo)
    }

    fn config_key(&self) -> String {
        format!("repositories/{}/config", self.repo)
    }

    fn index_key(&self) -> String {
        format!("repositories/{}/index", self.repo)
    }
}

fn object_key(repo: &str, id: &ObjectId) -> String {
    format!("repositories/{repo}/objects/{}", id.to_hex())
}

fn objects_prefix(repo: &str) -> String {
    format!("repositories/{repo}/objects/")
}

/// Backend failures that are not a simple miss.
fn backend_err(err: ObjectStoreError) -> Error {
    Error::Storage(err.to_string())
}
