//! Git Smart-HTTP endpoints.
//!
//! Each request builds a fresh storage adapter for the target
//! repository and hands the body to the protocol engine. The receive
//! path splits command pkt-lines from the packfile by walking
//! lengths before anything gets decoded, so no buffering can eat
//! into the pack bytes.

use super::AppState;
use crate::meta_store::MetaStoreError;
use crate::storage::RepoStore;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use gitvault_git::protocol::{command_section_len, pkt_text, FLUSH_PKT};
use gitvault_git::{service, Error, Service};

#[derive(serde::Deserialize)]
pub struct InfoRefsQuery {
    service: String,
}

/// Clients address repositories as `<name>.git`.
fn repo_name(path: &str) -> &str {
    path.strip_suffix(".git").unwrap_or(path)
}

async fn open_repo(state: &AppState, path: &str) -> Result<RepoStore, Response> {
    let name = repo_name(path);
    match state.meta.get_repository(name).await {
        Ok(repo) => Ok(RepoStore::new(
            state.objects.clone(),
            state.meta.clone(),
            repo.name,
        )),
        Err(MetaStoreError::NotFound) => {
            Err((StatusCode::NOT_FOUND, "repository not found").into_response())
        }
        Err(err) => {
            tracing::error!(repo = name, %err, "repository lookup failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response())
        }
    }
}

/// Client mistakes are 400s; everything else from the engine is a 500.
fn engine_error(repo: &str, action: &str, err: Error) -> Response {
    match &err {
        Error::Protocol(_) | Error::InvalidRefName(_) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        _ => {
            tracing::error!(repo, %err, "{action} failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

fn protocol_response(content_type: &'static str, body: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .unwrap()
}

/// GET /repositories/{repo}.git/info/refs?service=git-upload-pack|git-receive-pack
pub async fn info_refs(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
) -> Response {
    let Some(service) = Service::from_name(&query.service) else {
        return (StatusCode::BAD_REQUEST, "unknown service").into_response();
    };
    let store = match open_repo(&state, &repo).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    match service::advertise_refs(&store, service).await {
        Ok(advertisement) => {
            let mut body = pkt_text(&format!("# service={}", service.name()));
            body.extend_from_slice(FLUSH_PKT);
            body.extend_from_slice(&advertisement);
            protocol_response(service.advertisement_content_type(), body)
        }
        Err(err) => engine_error(store.repo(), "ref advertisement", err),
    }
}

/// POST /repositories/{repo}.git/git-upload-pack
pub async fn upload_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Response {
    let store = match open_repo(&state, &repo).await {
        Ok(store) => store,
        Err(response) => return response,
    };
    match service::upload_pack(&store, &body).await {
        Ok(response) => {
            protocol_response(Service::UploadPack.result_content_type(), response)
        }
        Err(err) => engine_error(store.repo(), "upload-pack", err),
    }
}

/// POST /repositories/{repo}.git/git-receive-pack
pub async fn receive_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Response {
    let store = match open_repo(&state, &repo).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    // Exact command/packfile split; a malformed length is the
    // client's fault.
    let split = match command_section_len(&body) {
        Ok(split) => split,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let (commands, packfile) = body.split_at(split);

    match service::receive_pack(&store, commands, packfile).await {
        Ok(report) => protocol_response(Service::ReceivePack.result_content_type(), report),
        Err(err) => engine_error(store.repo(), "receive-pack", err),
    }
}
