//! Integration tests for video job polling.
//!
//! Verifies that:
//! - blocking mode polls until the job is terminal, then downloads once
//! - a failed job is never downloaded and reports its reasons
//! - decoupled submission answers with the escaped job id
//! - a decoupled status check of a running job returns an empty 200

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{Request, StatusCode};
use tower::ServiceExt;

use common::{body_text, collect_frames, test_app, test_config, MockVideo};
use genproxy::config::ProviderKind;
use genproxy::protocol::{FrameWriter, THINKING_MARKER};
use genproxy::provider::{AsyncJob, JobStatus, ProviderError, VideoRequest};
use genproxy::proxy::jobs::{self, JobCheck, PollSettings, NO_RESULTS_MESSAGE};
use genproxy::router::ProviderHandle;

fn fast_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        status_delay: Duration::from_millis(1),
        max_wait: None,
    }
}

fn request() -> VideoRequest {
    VideoRequest {
        model: "sora".into(),
        prompt: "waves at dusk".into(),
        params: serde_json::Map::new(),
    }
}

fn succeeded(id: &str) -> AsyncJob {
    let mut job = AsyncJob::new(id, JobStatus::Succeeded);
    job.result_refs = vec!["gen_1".into()];
    job
}

#[tokio::test]
async fn test_blocking_polls_until_done_then_fetches_once() {
    let video = MockVideo::new(
        "job_1",
        vec![
            AsyncJob::new("job_1", JobStatus::Queued),
            AsyncJob::new("job_1", JobStatus::Running),
            succeeded("job_1"),
        ],
    );

    let (mut writer, frames) = FrameWriter::channel();
    jobs::run_blocking(&request(), &video, &mut writer, &fast_settings()).await;
    let body = collect_frames(writer, frames).await;

    assert_eq!(video.polls(), 3);
    assert_eq!(video.fetches(), 1);
    assert_eq!(
        body,
        format!(
            "data: {}\rdata: {}\rdata: [DONE]",
            THINKING_MARKER,
            STANDARD.encode(b"video-bytes")
        )
    );
}

#[tokio::test]
async fn test_blocking_failed_job_is_not_fetched() {
    let mut failed = AsyncJob::new("job_2", JobStatus::Failed);
    failed.failure_reasons = vec!["Prompt was filtered.".into()];
    let video = MockVideo::new(
        "job_2",
        vec![AsyncJob::new("job_2", JobStatus::Running), failed],
    );

    let (mut writer, frames) = FrameWriter::channel();
    jobs::run_blocking(&request(), &video, &mut writer, &fast_settings()).await;
    let body = collect_frames(writer, frames).await;

    assert_eq!(video.polls(), 2);
    assert_eq!(video.fetches(), 0);
    assert!(body.ends_with("data: [ERROR]\rdata:  Prompt was filtered."));
}

#[tokio::test]
async fn test_blocking_success_without_results() {
    let video = MockVideo::new("job_3", vec![AsyncJob::new("job_3", JobStatus::Succeeded)]);

    let (mut writer, frames) = FrameWriter::channel();
    jobs::run_blocking(&request(), &video, &mut writer, &fast_settings()).await;
    let body = collect_frames(writer, frames).await;

    assert_eq!(video.fetches(), 0);
    assert!(body.ends_with(&format!("data: [ERROR]\rdata:  {}", NO_RESULTS_MESSAGE)));
}

#[tokio::test]
async fn test_blocking_submit_failure() {
    let video = MockVideo::failing_submit(ProviderError::new("quota exceeded"));

    let (mut writer, frames) = FrameWriter::channel();
    jobs::run_blocking(&request(), &video, &mut writer, &fast_settings()).await;
    let body = collect_frames(writer, frames).await;

    assert_eq!(video.polls(), 0);
    assert!(body.ends_with("data: [ERROR]\rdata:  Create job failed: quota exceeded"));
}

#[tokio::test]
async fn test_blocking_gives_up_after_max_wait() {
    let video = MockVideo::new(
        "job_4",
        (0..1000)
            .map(|_| AsyncJob::new("job_4", JobStatus::Running))
            .collect(),
    );
    let settings = PollSettings {
        interval: Duration::from_millis(5),
        status_delay: Duration::from_millis(1),
        max_wait: Some(Duration::from_millis(20)),
    };

    let (mut writer, frames) = FrameWriter::channel();
    jobs::run_blocking(&request(), &video, &mut writer, &settings).await;
    let body = collect_frames(writer, frames).await;

    assert_eq!(video.fetches(), 0);
    assert!(body.contains("data: [ERROR]\rdata:  Video generation job timed out"));
}

#[tokio::test]
async fn test_check_job_unescapes_id() {
    let video = MockVideo::new(
        "models/veo/operations/abc",
        vec![AsyncJob::new("models/veo/operations/abc", JobStatus::Running)],
    );

    let check = jobs::check_job("models|veo|operations|abc", &video, &fast_settings())
        .await
        .unwrap();

    assert_eq!(check, JobCheck::Pending);
    assert_eq!(video.polls(), 1);
    assert_eq!(video.fetches(), 0);
}

fn video_app(video: Arc<MockVideo>) -> axum::Router {
    let handle = ProviderHandle::new("sora", ProviderKind::Azure)
        .with_video(video)
        .as_default();
    test_app(
        vec![handle],
        test_config("[video]\npoll_interval_secs = 1\nstatus_delay_secs = 0\n"),
    )
}

#[tokio::test]
async fn test_submit_returns_escaped_job_id() {
    let video = Arc::new(MockVideo::new("abc/123", Vec::new()));
    let app = video_app(video.clone());

    let response = app
        .oneshot(
            Request::post("/api/sora/video/jobs")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"sora","prompt":"waves"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        format!("data: {}\rjobId: abc|123\r", THINKING_MARKER)
    );
    assert_eq!(video.polls(), 0);
}

#[tokio::test]
async fn test_pending_status_returns_empty_body() {
    let video = Arc::new(MockVideo::new(
        "abc/123",
        vec![AsyncJob::new("abc/123", JobStatus::Running)],
    ));
    let app = video_app(video.clone());

    let response = app
        .oneshot(
            Request::get("/api/sora/video/abc%7C123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.is_empty());
    assert_eq!(video.polls(), 1);
    assert_eq!(video.fetches(), 0);
}

#[tokio::test]
async fn test_ready_status_returns_base64_asset() {
    let video = Arc::new(MockVideo::new("abc/123", vec![succeeded("abc/123")]));
    let app = video_app(video.clone());

    let response = app
        .oneshot(
            Request::get("/api/sora/video/abc%7C123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, STANDARD.encode(b"video-bytes"));
    assert_eq!(video.fetches(), 1);
}

#[tokio::test]
async fn test_failed_status_returns_500_with_reason() {
    let mut failed = AsyncJob::new("abc/123", JobStatus::Failed);
    failed.failure_reasons = vec!["Unsafe content.".into()];
    let video = Arc::new(MockVideo::new("abc/123", vec![failed]));
    let app = video_app(video.clone());

    let response = app
        .oneshot(
            Request::get("/api/sora/video/abc%7C123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Unsafe content.");
    assert_eq!(video.fetches(), 0);
}
