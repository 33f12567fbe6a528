//! Repository admin API: JSON CRUD over repository names.
//!
//! Name validation happens here, before anything reaches a store.
//! Unknown names are a uniform 404; a duplicate create or rename
//! collision is a 409.

use super::AppState;
use crate::meta_store::MetaStoreError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RepositoryName {
    name: String,
}

/// Repository names: `^[a-z0-9_-]+$`, case-sensitive.
pub(crate) fn valid_repo_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_'))
}

fn internal_error(action: &str, repo: &str, err: MetaStoreError) -> Response {
    tracing::error!(repo, %err, "{action} failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<RepositoryName>,
) -> Response {
    if !valid_repo_name(&req.name) {
        return (StatusCode::BAD_REQUEST, "invalid repository name").into_response();
    }
    match state.meta.create_repository(&req.name).await {
        Ok(repo) => (StatusCode::CREATED, Json(repo)).into_response(),
        Err(MetaStoreError::AlreadyExists) => {
            (StatusCode::CONFLICT, "repository already exists").into_response()
        }
        Err(err) => internal_error("create repository", &req.name, err),
    }
}

pub async fn list(State(state): State<AppState>) -> Response {
    match state.meta.list_repositories().await {
        Ok(repos) => Json(repos).into_response(),
        Err(err) => internal_error("list repositories", "*", err),
    }
}

pub async fn get_one(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if !valid_repo_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid repository name").into_response();
    }
    match state.meta.get_repository(&name).await {
        Ok(repo) => Json(repo).into_response(),
        Err(MetaStoreError::NotFound) => {
            (StatusCode::NOT_FOUND, "repository not found").into_response()
        }
        Err(err) => internal_error("get repository", &name, err),
    }
}

pub async fn rename(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RepositoryName>,
) -> Response {
    if !valid_repo_name(&name) || !valid_repo_name(&req.name) {
        return (StatusCode::BAD_REQUEST, "invalid repository name").into_response();
    }
    match state.meta.rename_repository(&name, &req.name).await {
        Ok(repo) => Json(repo).into_response(),
        Err(MetaStoreError::NotFound) => {
            (StatusCode::NOT_FOUND, "repository not found").into_response()
        }
        Err(MetaStoreError::AlreadyExists) => {
            (StatusCode::CONFLICT, "repository already exists").into_response()
        }
        Err(err) => internal_error("rename repository", &name, err),
    }
}

pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if !valid_repo_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid repository name").into_response();
    }
    match state.meta.delete_repository(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(MetaStoreError::NotFound) => {
            (StatusCode::NOT_FOUND, "repository not found").into_response()
        }
        Err(err) => internal_error("delete repository", &name, err),
    }
}
