use httpmock::prelude::*;
use scriptoon::api::{
    GenerationParams, HttpJobClient, JobApi, JobMode, RemoteStatus, UploadEndpoints,
};
use scriptoon::error::JobError;
use serde_json::json;
use std::time::Duration;

fn client_for(server: &MockServer) -> HttpJobClient {
    HttpJobClient::new(
        server.url("/fal-ai/model"),
        UploadEndpoints::from_bases(&server.url("/storage/upload"), vec![server.url("/legacy")]),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[test]
fn submit_posts_params_and_defaults_urls() {
    let server = MockServer::start();
    let submit = server.mock(|when, then| {
        when.method(POST)
            .path("/fal-ai/model")
            .header("authorization", "Key secret")
            .json_body_partial(r#"{"prompt":"a cat","num_images":2,"aspect_ratio":"1:1","sync_mode":false}"#);
        then.status(200).json_body(json!({ "request_id": "abc" }));
    });

    let client = client_for(&server);
    let mut params = GenerationParams::new("a cat");
    params.count = 2;
    let job = client.submit("secret", &params, JobMode::Generate).unwrap();

    submit.assert();
    assert_eq!(job.request_id, "abc");
    assert_eq!(job.status_url, server.url("/fal-ai/model/requests/abc/status"));
    assert_eq!(job.result_url, server.url("/fal-ai/model/requests/abc"));
}

#[test]
fn edit_mode_posts_to_edit_endpoint_with_image_urls() {
    let server = MockServer::start();
    let submit = server.mock(|when, then| {
        when.method(POST)
            .path("/fal-ai/model/edit")
            .json_body_partial(r#"{"image_urls":["https://cdn/ref.png"]}"#);
        then.status(200).json_body(json!({
            "request_id": "e1",
            "status_url": "https://queue/s",
            "response_url": "https://queue/r"
        }));
    });

    let client = client_for(&server);
    let mut params = GenerationParams::new("swap the hat");
    params.image_urls = vec!["https://cdn/ref.png".into()];
    let job = client.submit("k", &params, JobMode::Edit).unwrap();

    submit.assert();
    assert_eq!(job.status_url, "https://queue/s");
    assert_eq!(job.result_url, "https://queue/r");
}

#[test]
fn submit_error_surfaces_server_detail() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/fal-ai/model");
        then.status(422).json_body(json!({ "detail": "prompt too long" }));
    });

    let err = client_for(&server)
        .submit("k", &GenerationParams::new("x"), JobMode::Generate)
        .unwrap_err();
    assert_eq!(err, JobError::Submission("prompt too long".into()));
}

#[test]
fn submit_error_without_body_uses_status_code() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/fal-ai/model");
        then.status(503);
    });

    let err = client_for(&server)
        .submit("k", &GenerationParams::new("x"), JobMode::Generate)
        .unwrap_err();
    assert_eq!(err, JobError::Submission("HTTP error! status: 503".into()));
}

#[test]
fn poll_decodes_logs_and_inline_images() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/status")
            .header("authorization", "Key k");
        then.status(200).json_body(json!({
            "status": "IN_PROGRESS",
            "logs": [{ "message": "step 1" }, { "message": "step 2" }]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/done");
        then.status(200).json_body(json!({
            "status": "COMPLETED",
            "images": [{ "url": "https://cdn/1.png", "width": 1024, "height": 1024 }]
        }));
    });

    let client = client_for(&server);
    let running = client.poll_once("k", &server.url("/status")).unwrap();
    assert_eq!(running.status, RemoteStatus::InProgress);
    assert_eq!(running.logs, vec!["step 1".to_string(), "step 2".to_string()]);

    let done = client.poll_once("k", &server.url("/done")).unwrap();
    assert_eq!(done.status, RemoteStatus::Completed);
    assert_eq!(done.images[0].width, Some(1024));
}

#[test]
fn poll_http_error_is_transport_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/status");
        then.status(500);
    });

    let err = client_for(&server)
        .poll_once("k", &server.url("/status"))
        .unwrap_err();
    assert_eq!(err, JobError::Transport("Status check failed: 500".into()));
}

#[test]
fn result_fetch_accepts_nested_payload() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/result");
        then.status(200).json_body(json!({
            "data": { "images": [{ "url": "https://cdn/a.jpg", "content_type": "image/jpeg" }] }
        }));
    });

    let payload = client_for(&server)
        .fetch_result("k", &server.url("/result"))
        .unwrap();
    assert_eq!(payload.images.len(), 1);
    assert_eq!(payload.images[0].content_type.as_deref(), Some("image/jpeg"));
}
