mod support;

use crate::support::setup_archive;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use kirin::server::{create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "letmein";
const BOUNDARY: &str = "kirin-test-boundary";

async fn app(admin_token: Option<&str>) -> (Router, support::TestArchive) {
    let env = setup_archive().await;
    let state = AppState {
        archive: env.archive.clone(),
        admin_token: admin_token.map(str::to_string),
    };
    (create_router(state, None), env)
}

fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (name, file_name, content) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, method: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, method: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let (app, _env) = app(None).await;
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let (app, _env) = app(Some(TOKEN)).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/admin/works/1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "failed");

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/admin/works/1")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_disabled_without_token() {
    let (app, _env) = app(None).await;
    let request = json_request("/api/admin/sync", "POST", json!({}));
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_flow_over_http() {
    let (app, env) = app(Some(TOKEN)).await;

    // Create a work with a thumbnail
    let body = multipart_body(&[("title", "Title A")], &[("thumbnail", "cover.png", "png")]);
    let (status, body) = send(&app, multipart_request("/api/admin/works", "POST", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"]["title"], "Title A");
    assert_eq!(body["data"]["refreshed"]["scope"], "works");
    let work_id = body["data"]["value"]["id"].as_i64().unwrap();
    assert!(body["data"]["value"]["thumbnail_url"]
        .as_str()
        .unwrap()
        .starts_with("https://cdn.test/thumbnails/"));

    // Create an episode
    let (status, body) = send(
        &app,
        json_request(
            &format!("/api/admin/works/{}/episodes", work_id),
            "POST",
            json!({"episode_number": 1, "tags": "#action #prologue"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"]["title"], "1화");
    let episode_id = body["data"]["value"]["id"].as_i64().unwrap();

    // Upload images, one of which fails
    env.storage.fail_uploads_containing("broken");
    let body = multipart_body(
        &[],
        &[
            ("files", "01.png", "1"),
            ("files", "02_broken.png", "2"),
            ("files", "03.png", "3"),
        ],
    );
    let (status, body) = send(
        &app,
        multipart_request(&format!("/api/admin/episodes/{}/images", episode_id), "POST", body),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["data"]["value"]["succeeded"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["value"]["failed"][0]["file_name"], "02_broken.png");
    assert_eq!(body["data"]["value"]["failed"][0]["reason"]["kind"], "upload");

    // Move the last image to the front
    let last_id = body["data"]["value"]["succeeded"][1]["id"].as_i64().unwrap();
    let (status, body) = send(
        &app,
        json_request(
            &format!("/api/admin/episodes/{}/images/order", episode_id),
            "PUT",
            json!({"edits": [{"image_id": last_id, "sequence": 0}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"][0]["id"].as_i64(), Some(last_id));

    // Public reader
    let (status, body) = send(&app, get(&format!("/api/episodes/{}/reader", episode_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["images"][0]["id"].as_i64(), Some(last_id));
    assert_eq!(body["data"]["navigation"]["work_title"], "Title A");
    assert_eq!(body["data"]["tags"]["kind"], "tags");

    // Search
    let (status, body) = send(&app, get("/api/search?q=PROLOG")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "results");
    assert_eq!(body["data"]["matches"][0]["episode"]["id"].as_i64(), Some(episode_id));

    let (_, body) = send(&app, get("/api/search?q=")).await;
    assert_eq!(body["data"]["state"], "inactive");

    // Delete the work
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/admin/works/{}", work_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"]["images"], 2);

    let (status, body) = send(&app, get(&format!("/api/episodes/{}/reader", episode_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let (app, _env) = app(Some(TOKEN)).await;

    let body = multipart_body(&[("title", "   ")], &[]);
    let (status, body) = send(&app, multipart_request("/api/admin/works", "POST", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["code"], 400);

    let (status, _) = send(&app, get("/api/works/12345")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_use_error_envelope() {
    let (app, env) = app(Some(TOKEN)).await;
    let work = env.archive.create_work("Title A", None).await.unwrap().value;

    // Episode number sent as a string
    let (status, body) = send(
        &app,
        json_request(
            &format!("/api/admin/works/{}/episodes", work.id),
            "POST",
            json!({ "episode_number": "3" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["code"], 400);

    let (status, body) = send(&app, get("/api/works/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["code"], 400);

    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/works")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from("title=A"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");

    assert_eq!(env.archive.list_works().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_episode_list_newest_first() {
    let (app, env) = app(Some(TOKEN)).await;
    let work = env.archive.create_work("Title A", None).await.unwrap().value;
    for number in [2, 1, 3] {
        let (status, _) = send(
            &app,
            json_request(
                &format!("/api/admin/works/{}/episodes", work.id),
                "POST",
                json!({ "episode_number": number }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder()
        .uri(format!("/api/admin/works/{}/episodes", work.id))
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let numbers: Vec<i64> = body["data"]["episodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|episode| episode["episode_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![3, 1, 2]);

    let request = Request::builder()
        .uri("/api/admin/works/999/episodes")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "failed");
}
