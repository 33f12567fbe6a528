//! Integration tests driving the engine with the real git CLI.
//!
//! An axum server over the in-memory store speaks Smart-HTTP to a
//! stock git client: push, clone, fetch and pull must all work.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use gitvault_git::protocol::{command_section_len, pkt_text, FLUSH_PKT};
use gitvault_git::service::{advertise_refs, receive_pack, upload_pack};
use gitvault_git::{MemoryStore, Service};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn info_refs_handler(
    Path(_repo): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(store): State<Arc<MemoryStore>>,
) -> impl IntoResponse {
    let Some(service) = params.get("service").and_then(|s| Service::from_name(s)) else {
        return (StatusCode::BAD_REQUEST, "unknown service").into_response();
    };
    match advertise_refs(store.as_ref(), service).await {
        Ok(advertisement) => {
            let mut body = pkt_text(&format!("# service={}", service.name()));
            body.extend_from_slice(FLUSH_PKT);
            body.extend_from_slice(&advertisement);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, service.advertisement_content_type())],
                body,
            )
                .into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn upload_pack_handler(
    Path(_repo): Path<String>,
    State(store): State<Arc<MemoryStore>>,
    body: Bytes,
) -> impl IntoResponse {
    match upload_pack(store.as_ref(), &body).await {
        Ok(response) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, Service::UploadPack.result_content_type())],
            response,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn receive_pack_handler(
    Path(_repo): Path<String>,
    State(store): State<Arc<MemoryStore>>,
    body: Bytes,
) -> impl IntoResponse {
    let split = match command_section_len(&body) {
        Ok(split) => split,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match receive_pack(store.as_ref(), &body[..split], &body[split..]).await {
        Ok(report) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, Service::ReceivePack.result_content_type())],
            report,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn start_test_server(store: Arc<MemoryStore>) -> SocketAddr {
    let app = Router::new()
        .route("/:repo/info/refs", get(info_refs_handler))
        .route("/:repo/git-upload-pack", post(upload_pack_handler))
        .route("/:repo/git-receive-pack", post(receive_pack_handler))
        .with_state(store);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn run_git(args: &[&str], cwd: Option<&std::path::Path>) -> Output {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.output().expect("spawn git")
}

fn assert_git(args: &[&str], cwd: Option<&std::path::Path>) -> Output {
    let out = run_git(args, cwd);
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_clone_fetch_pull_cycle() {
    if !git_available() {
        eprintln!("git not available, skipping test");
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let addr = start_test_server(store).await;
    let url = format!("http://{addr}/test.git");

    let work = tempdir().unwrap();
    let repo1 = work.path().join("repo-1");
    std::fs::create_dir(&repo1).unwrap();

    assert_git(&["init", "-b", "main"], Some(&repo1));
    assert_git(&["config", "user.email", "test@test.com"], Some(&repo1));
    assert_git(&["config", "user.name", "Test"], Some(&repo1));

    let content = b"Hello, Git Server!";
    std::fs::write(repo1.join("hello.txt"), content).unwrap();
    assert_git(&["add", "."], Some(&repo1));
    assert_git(&["commit", "-m", "Initial commit"], Some(&repo1));
    assert_git(&["remote", "add", "origin", &url], Some(&repo1));
    assert_git(&["push", "origin", "main"], Some(&repo1));

    // A second clone sees the pushed content byte for byte.
    assert_git(&["clone", &url, "repo-2"], Some(work.path()));
    let repo2 = work.path().join("repo-2");
    assert_eq!(std::fs::read(repo2.join("hello.txt")).unwrap(), content);
    let log = assert_git(&["log", "-1", "--pretty=%B"], Some(&repo2));
    assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "Initial commit");

    // Incremental push, then fetch and pull from the second clone.
    let v2 = b"Hello, Git Server! (v2)";
    std::fs::write(repo1.join("hello.txt"), v2).unwrap();
    assert_git(&["add", "."], Some(&repo1));
    assert_git(&["commit", "-m", "Second commit"], Some(&repo1));
    assert_git(&["push", "origin", "main"], Some(&repo1));

    assert_git(&["fetch", "origin"], Some(&repo2));
    let log = assert_git(&["log", "origin/main", "-1", "--pretty=%B"], Some(&repo2));
    assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "Second commit");

    assert_git(&["pull", "origin", "main"], Some(&repo2));
    assert_eq!(std::fs::read(repo2.join("hello.txt")).unwrap(), v2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clone_of_empty_repository_succeeds() {
    if !git_available() {
        eprintln!("git not available, skipping test");
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let addr = start_test_server(store).await;
    let url = format!("http://{addr}/empty.git");

    let work = tempdir().unwrap();
    let out = run_git(&["clone", &url, "cloned"], Some(work.path()));
    assert!(
        out.status.success(),
        "clone of empty repo failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    // Empty working tree, but a valid repository.
    assert!(work.path().join("cloned/.git").is_dir());
    assert!(!work.path().join("cloned/hello.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ls_remote_lists_refs() {
    if !git_available() {
        eprintln!("git not available, skipping test");
        return;
    }

    use gitvault_git::object::{encode_tree, GitObject, ObjectKind, TreeEntry};
    use gitvault_git::refs::{NamedRef, Ref};
    use gitvault_git::store::{ObjectDatabase, ReferenceDatabase};

    let store = Arc::new(MemoryStore::new());

    let blob = store
        .put_object(&GitObject::blob(b"hello\n".to_vec()))
        .await
        .unwrap();
    let tree = store
        .put_object(&GitObject::new(
            ObjectKind::Tree,
            encode_tree(&[TreeEntry {
                mode: 0o100644,
                name: "hello.txt".into(),
                id: blob,
            }]),
        ))
        .await
        .unwrap();
    let commit = store
        .put_object(&GitObject::new(
            ObjectKind::Commit,
            format!(
                "tree {tree}\nauthor T <t@t> 1700000000 +0000\ncommitter T <t@t> 1700000000 +0000\n\nseed\n"
            )
            .into_bytes(),
        ))
        .await
        .unwrap();
    store
        .set_ref(&NamedRef::new("refs/heads/main", Ref::Hash(commit)))
        .await
        .unwrap();
    store
        .set_ref(&NamedRef::new("HEAD", Ref::symbolic("refs/heads/main")))
        .await
        .unwrap();

    let addr = start_test_server(store).await;
    let url = format!("http://{addr}/seeded.git");

    let out = assert_git(&["ls-remote", &url], None);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains(&commit.to_hex()));
    assert!(stdout.contains("refs/heads/main"));
}
