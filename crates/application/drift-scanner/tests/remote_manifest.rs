use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use drift_core::{FileInfo, Manifest};
use drift_scanner::{remote::scan_remote_at, ScanError};

fn sample_manifest() -> Manifest {
    let mut m = Manifest::new("/data");
    m.add(FileInfo::dir("Show", Utc.timestamp_opt(10, 0).unwrap()));
    m.add(FileInfo::file(
        "Show/e1.mkv",
        99,
        Utc.timestamp_opt(10, 0).unwrap(),
    ));
    m
}

#[derive(serde::Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

async fn start_server(fail: bool) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/api/manifest",
        get(move |Query(q): Query<PathQuery>| async move {
            if fail {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            // The sender always sends the path parameter, even when empty.
            let _ = q.path;
            Json(sample_manifest()).into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn remote_scan_parses_the_receiver_manifest() {
    let (addr, handle) = start_server(false).await;
    let client = reqwest::Client::new();

    let manifest = scan_remote_at(&client, "127.0.0.1::media/Shows", None, addr.port())
        .await
        .unwrap();

    assert!(manifest.has_dir("Show"));
    assert_eq!(manifest.get_file("Show/e1.mkv").unwrap().size, 99);

    handle.abort();
}

#[tokio::test]
async fn remote_scan_uses_dest_host_fallback() {
    let (addr, handle) = start_server(false).await;
    let client = reqwest::Client::new();

    let manifest = scan_remote_at(&client, "::media", Some("127.0.0.1"), addr.port())
        .await
        .unwrap();
    assert!(manifest.has_file("Show/e1.mkv"));

    let err = scan_remote_at(&client, "::media", None, addr.port())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Remote { .. }));

    handle.abort();
}

#[tokio::test]
async fn non_200_is_a_remote_error() {
    let (addr, handle) = start_server(true).await;
    let client = reqwest::Client::new();

    let err = scan_remote_at(&client, "127.0.0.1::media", None, addr.port())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Remote { .. }));

    handle.abort();
}
