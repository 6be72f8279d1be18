//! HTTP behaviour of the router, driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use common::{
    blank_frame, encode, frame_with_square, test_pipeline, test_state, FailingSource, MemorySink,
    MemorySource,
};
use http_body_util::BodyExt;
use image::ImageFormat;
use pothole_web::media::UploadedMedia;
use pothole_web::server::{build_router, run_batch, ArtifactStore, PipelineEvent, VideoReporter};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "pothole-test-boundary";

fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_files(app: Router, uri: &str, files: &[(&str, &[u8])]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(files)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn ndjson_events(response: Response<Body>) -> Vec<Value> {
    let bytes = body_bytes(response).await;
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Static routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_model_classes() {
    let app = build_router(test_state());
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model"]["classes"][0], "pothole");
    assert_eq!(json["artifacts"], 0);
}

#[tokio::test]
async fn index_serves_the_upload_page() {
    let app = build_router(test_state());
    let response = get(app, "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("Road Damage Detection"));
    assert!(html.contains(r#"type="range" min="0.1" max="1.0""#));
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_extension_is_rejected_before_processing() {
    let state = test_state();
    let app = build_router(state.clone());
    let png = encode(&blank_frame(8, 8), ImageFormat::Png);

    let response = post_files(app, "/api/process", &[("ok.png", &png), ("notes.txt", b"hi")]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNSUPPORTED_MEDIA");
    assert!(state.artifacts.is_empty());
}

#[tokio::test]
async fn confidence_out_of_range_is_rejected() {
    let png = encode(&blank_frame(8, 8), ImageFormat::Png);

    for uri in ["/api/process?confidence=1.5", "/api/process?confidence=0.05"] {
        let app = build_router(test_state());
        let response = post_files(app, uri, &[("ok.png", &png)]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_json(response).await["code"], "INVALID_CONFIDENCE");
    }
}

#[tokio::test]
async fn non_numeric_confidence_gets_a_json_error() {
    let png = encode(&blank_frame(8, 8), ImageFormat::Png);
    let state = test_state();
    let response = post_files(
        build_router(state.clone()),
        "/api/process?confidence=abc",
        &[("ok.png", &png)],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_CONFIDENCE");
    assert!(json["error"].as_str().unwrap().contains("abc"));
    assert!(state.artifacts.is_empty());
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let app = build_router(test_state());
    let response = post_files(app, "/api/process", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn image_upload_streams_events_and_serves_artifact() {
    let state = test_state();
    let source = frame_with_square(40, 30, 4, 4, 8);
    let png = encode(&source, ImageFormat::Png);

    let response = post_files(
        build_router(state.clone()),
        "/api/process?confidence=0.5",
        &[("road.png", &png)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let events = ndjson_events(response).await;
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["file_started", "image_completed", "batch_completed"]);

    let completed = &events[1];
    assert_eq!(completed["summary"], "Potholes Detected: 1");
    assert_eq!(completed["width"], 40);
    assert_eq!(completed["height"], 30);
    assert_eq!(events[2]["failed"], 0);

    let url = completed["artifact"]["url"].as_str().unwrap();
    let download = get(build_router(state), url).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        download.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"processed_road.png\""
    );

    let bytes = body_bytes(download).await;
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (40, 30));
}

#[tokio::test]
async fn failing_file_does_not_stop_the_batch() {
    let png = encode(&blank_frame(16, 16), ImageFormat::Png);
    let response = post_files(
        build_router(test_state()),
        "/api/process",
        &[("broken.jpg", b"garbage"), ("fine.png", &png)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = ndjson_events(response).await;
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        [
            "file_started",
            "file_failed",
            "file_started",
            "image_completed",
            "batch_completed"
        ]
    );
    assert_eq!(events[1]["name"], "broken.jpg");
    assert_eq!(events[3]["summary"], "No potholes detected.");
    assert_eq!(events[4]["files"], 2);
    assert_eq!(events[4]["failed"], 1);
}

#[tokio::test]
async fn unknown_artifact_is_404() {
    let app = build_router(test_state());
    let response = get(app, &format!("/api/artifacts/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Batch runner
// ---------------------------------------------------------------------------

#[test]
fn unreadable_video_fails_alone() {
    let pipeline = test_pipeline();
    let store = ArtifactStore::default();
    let png = encode(&blank_frame(12, 12), ImageFormat::Png);
    let uploads = vec![
        UploadedMedia::new("dashcam.mp4", b"not really a video".to_vec()).unwrap(),
        UploadedMedia::new("still.png", png).unwrap(),
    ];

    let mut events = Vec::new();
    run_batch(&pipeline, &store, &uploads, 0.3, 5, |e| events.push(e));

    assert_eq!(events.len(), 5);
    assert!(matches!(&events[1], PipelineEvent::FileFailed { index: 0, .. }));
    assert!(matches!(&events[3], PipelineEvent::ImageCompleted { index: 1, .. }));
    assert_eq!(
        events[4],
        PipelineEvent::BatchCompleted {
            files: 2,
            failed: 1
        }
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn video_progress_and_previews_follow_the_interval() {
    let pipeline = test_pipeline();
    let store = ArtifactStore::default();
    let frames: Vec<_> = (0..12u32)
        .map(|i| frame_with_square(64, 64, 4 + i, 20, 12))
        .collect();
    let mut source = MemorySource::new(frames, Some(12));
    let mut sink = MemorySink::default();

    let reporter = VideoReporter::new(&store, 2, "dashcam.mp4", 5);
    let preview_url = format!("/api/artifacts/{}", reporter.preview_id());
    let mut events = Vec::new();
    let mut slots_in_use = Vec::new();
    pipeline
        .process_video(&mut source, &mut sink, 0.3, |progress| {
            reporter.report(&progress, &mut |e| events.push(e));
            slots_in_use.push(store.len());
        })
        .unwrap();

    let progress: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress {
                index: 2,
                frame_index,
                ..
            } => Some(*frame_index),
            _ => None,
        })
        .collect();
    assert_eq!(progress, (0..12).collect::<Vec<u64>>());

    let previews: Vec<(u64, &str)> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Preview {
                frame_index, url, ..
            } => Some((*frame_index, url.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        previews,
        [
            (0, preview_url.as_str()),
            (5, preview_url.as_str()),
            (10, preview_url.as_str())
        ]
    );

    // Every preview lands in the same slot, which goes away with the reporter
    assert!(slots_in_use.iter().all(|&n| n == 1));
    let preview = store.get(&reporter.preview_id()).unwrap();
    assert_eq!(preview.mime_type, "image/jpeg");
    assert_eq!(preview.file_name, "preview_dashcam.mp4.jpg");
    drop(reporter);
    assert!(store.is_empty());
}

#[test]
fn failed_video_leaves_no_preview_behind() {
    let pipeline = test_pipeline();
    let store = ArtifactStore::default();
    let mut source = FailingSource::new(vec![blank_frame(16, 16); 2]);
    let mut sink = MemorySink::default();

    let reporter = VideoReporter::new(&store, 0, "broken.mp4", 1);
    let mut previews = 0;
    let result = pipeline.process_video(&mut source, &mut sink, 0.3, |progress| {
        reporter.report(&progress, &mut |e| {
            if matches!(e, PipelineEvent::Preview { .. }) {
                previews += 1;
            }
        })
    });
    drop(reporter);

    assert!(result.is_err());
    assert_eq!(previews, 2);
    assert!(store.is_empty());
}
