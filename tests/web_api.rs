// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP API tests driven through the router without a listener

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tower::util::ServiceExt;

use pixsort::archive::list_entries;
use pixsort::classifier::Classifier;
use pixsort::config::AppConfig;
use pixsort::pipeline::{Pipeline, RunOptions};
use pixsort::web::{create_router, AppState};
use pixsort::Result;

const BOUNDARY: &str = "pixsort-test-boundary";

/// Everything is a cat
struct CatClassifier;

#[async_trait]
impl Classifier for CatClassifier {
    fn name(&self) -> &'static str {
        "cat"
    }

    async fn classify(&self, _path: &Path) -> Result<String> {
        Ok("cat_images".to_string())
    }
}

/// Says cat once released; signals each call as it starts
#[derive(Default)]
struct GatedClassifier {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Classifier for GatedClassifier {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn classify(&self, _path: &Path) -> Result<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("cat_images".to_string())
    }
}

fn app_with(classifier: Arc<dyn Classifier>) -> Router {
    let config = AppConfig::default();
    let pipeline = Arc::new(Pipeline::new(classifier, RunOptions::from_config(&config)));
    create_router(Arc::new(AppState::new(config, pipeline)))
}

fn app() -> Router {
    app_with(Arc::new(CatClassifier))
}

/// Serve `app` on an ephemeral local port
async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 100, 50]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}

fn multipart_body(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

async fn send_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn new_session(app: &Router) -> String {
    let (status, body) = send_json(app, "POST", "/api/sessions").await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn upload(app: &Router, id: &str, files: &[(&str, Vec<u8>)]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/sessions/{}/files", id))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(files)))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn wait_for_phase(app: &Router, id: &str, phase: &str) -> Value {
    for _ in 0..200 {
        let (_, status) = send_json(app, "GET", &format!("/api/sessions/{}", id)).await;
        if status["phase"] == phase {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached phase {}", phase);
}

#[tokio::test]
async fn test_index_page() {
    let app = app();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("Image Classifier and Renamer"));
}

#[tokio::test]
async fn test_api_status() {
    let app = app();
    let (status, body) = send_json(&app, "GET", "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "cat");
    assert_eq!(body["healthy"], true);
    assert_eq!(body["on_failure"], "skip");
    assert_eq!(body["archive_name"], "classified_images.zip");
}

#[tokio::test]
async fn test_full_batch_flow() {
    let app = app();
    let id = new_session(&app).await;

    let (status, summary) = upload(
        &app,
        &id,
        &[
            ("b.png", png_bytes()),
            ("a.png", png_bytes()),
            ("notes.txt", b"not an image".to_vec()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["accepted"].as_array().unwrap().len(), 2);
    assert_eq!(summary["rejected"][0]["file"], "notes.txt");
    assert_eq!(summary["pending"], 2);

    let (status, body) = send_json(&app, "POST", &format!("/api/sessions/{}/process", id)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["phase"], "processing");

    let ready = wait_for_phase(&app, &id, "ready").await;
    assert_eq!(ready["progress"]["processed"], 2);
    assert_eq!(ready["progress"]["finished"], true);
    assert_eq!(ready["report"]["renamed"].as_array().unwrap().len(), 2);
    assert_eq!(ready["archive_name"], "classified_images.zip");

    let request = Request::builder()
        .uri(format!("/api/sessions/{}/download", id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"classified_images.zip\""
    );
    assert_eq!(list_entries(&body).unwrap(), vec!["cat_0.jpg", "cat_1.jpg"]);

    // Download resets the session
    let (_, after) = send_json(&app, "GET", &format!("/api/sessions/{}", id)).await;
    assert_eq!(after["phase"], "idle");
}

#[tokio::test]
async fn test_upload_with_no_readable_files() {
    let app = app();
    let id = new_session(&app).await;

    let (status, summary) = upload(&app, &id, &[("broken.png", b"garbage".to_vec())]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(summary["accepted"].as_array().unwrap().is_empty());

    let (_, session) = send_json(&app, "GET", &format!("/api/sessions/{}", id)).await;
    assert_eq!(session["phase"], "idle");
}

#[tokio::test]
async fn test_process_without_uploads() {
    let app = app();
    let id = new_session(&app).await;

    let (status, body) = send_json(&app, "POST", &format!("/api/sessions/{}/process", id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "EMPTY_BATCH");
}

#[tokio::test]
async fn test_download_before_ready_conflicts() {
    let app = app();
    let id = new_session(&app).await;

    let (status, body) = send_json(&app, "GET", &format!("/api/sessions/{}/download", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_reset_drops_pending_uploads() {
    let app = app();
    let id = new_session(&app).await;
    upload(&app, &id, &[("a.png", png_bytes())]).await;

    let (status, body) = send_json(&app, "POST", &format!("/api/sessions/{}/reset", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["pending_files"], 0);
}

#[tokio::test]
async fn test_unknown_session() {
    let app = app();
    let uri = format!("/api/sessions/{}", uuid::Uuid::new_v4());

    let (status, body) = send_json(&app, "GET", &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_running_batch() {
    let classifier = Arc::new(GatedClassifier::default());
    let app = app_with(classifier.clone());
    let id = new_session(&app).await;
    upload(&app, &id, &[("a.png", png_bytes()), ("b.png", png_bytes())]).await;

    let (status, _) = send_json(&app, "POST", &format!("/api/sessions/{}/process", id)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    classifier.started.notified().await;

    let (status, body) = send_json(&app, "POST", &format!("/api/sessions/{}/cancel", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "processing");
    classifier.release.notify_one();

    let idle = wait_for_phase(&app, &id, "idle").await;
    assert!(idle["last_error"].as_str().unwrap().contains("cancelled"));
    assert_eq!(idle["progress"]["finished"], true);
    assert!(idle.get("report").is_none());

    let (status, _) = send_json(&app, "GET", &format!("/api/sessions/{}/download", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_when_idle_conflicts() {
    let app = app();
    let id = new_session(&app).await;

    let (status, _) = send_json(&app, "POST", &format!("/api/sessions/{}/cancel", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_progress_socket_streams_until_finished() {
    let classifier = Arc::new(GatedClassifier::default());
    let app = app_with(classifier.clone());
    let addr = serve(app.clone()).await;

    let id = new_session(&app).await;
    upload(&app, &id, &[("a.png", png_bytes())]).await;
    send_json(&app, "POST", &format!("/api/sessions/{}/process", id)).await;
    classifier.started.notified().await;

    let url = format!("ws://{}/api/sessions/{}/progress", addr, id);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let mut frames = Vec::new();
    while let Some(message) = socket.next().await {
        match message.unwrap() {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                let finished = frame["finished"] == true;
                frames.push(frame);
                if frames.len() == 1 {
                    classifier.release.notify_one();
                }
                if finished {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let first = frames.first().unwrap();
    assert_eq!(first["processed"], 0);
    assert_eq!(first["total"], 1);
    assert_eq!(first["finished"], false);

    let last = frames.last().unwrap();
    assert_eq!(last["processed"], 1);
    assert_eq!(last["finished"], true);

    let ready = wait_for_phase(&app, &id, "ready").await;
    assert_eq!(ready["summary"], "Processed 1/1 files");
}

#[tokio::test]
async fn test_progress_socket_unknown_session() {
    let addr = serve(app()).await;
    let url = format!("ws://{}/api/sessions/{}/progress", addr, uuid::Uuid::new_v4());
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}
