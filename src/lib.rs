//! Multi-tenant Git Smart-HTTP hosting service.
//!
//! Git objects live in an S3-compatible object store; the repository
//! registry and references live in Postgres. The protocol work is
//! done by the `gitvault-git` engine against a per-request storage
//! adapter.

pub mod config;
pub mod meta_store;
pub mod object_store;
pub mod server;
pub mod storage;

pub use config::Config;
pub use meta_store::MetaStore;
pub use object_store::ObjectStore;
pub use server::Server;
pub use storage::RepoStore;
