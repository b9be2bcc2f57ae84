//! Integration tests for the tavern-server HTTP API

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use helpers::*;
use serde_json::json;
use std::sync::Arc;
use tavern_common::limits::{MAX_FILE_SIZE, MAX_REQUEST_SIZE, MIB};
use tavern_server::storage::ObjectStore;

/// `n` bytes of recognizable content
fn payload(n: usize, seed: u8) -> Vec<u8> {
    (0..n).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}

// ========================================
// Health
// ========================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(test_config()).await;

    let (status, body) = send(&app.router, get_request("/api/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

// ========================================
// Presigned URLs
// ========================================

#[tokio::test]
async fn test_presigned_url_at_limit_is_issued() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/generate-presigned-url",
            &json!({"fileName": "campaignC1Session9.mp3", "fileSize": MAX_FILE_SIZE, "contentType": "audio/mpeg"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "public/audioUploads/campaignC1Session9.mp3");
    assert_eq!(body["bucket"], "tavern-local");
    assert!(body["presignedUrl"].as_str().unwrap().contains("expires=3600"));
}

#[tokio::test]
async fn test_presigned_url_over_limit_rejected() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/generate-presigned-url",
            &json!({"fileName": "big.mp3", "fileSize": MAX_FILE_SIZE + 1, "contentType": "audio/mpeg"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_presigned_url_missing_fields() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/generate-presigned-url",
            &json!({"fileName": "", "fileSize": 10, "contentType": "audio/mpeg"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_FIELDS");

    let (status, body) = send(
        &app.router,
        json_request("POST", "/api/generate-presigned-url", &json!({"fileSize": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_FIELDS");
}

#[tokio::test]
async fn test_path_traversal_file_name_rejected() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/generate-presigned-url",
            &json!({"fileName": "../private/x.mp3", "fileSize": 10, "contentType": "audio/mpeg"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");
}

// ========================================
// Global size guard
// ========================================

#[tokio::test]
async fn test_content_length_guard() {
    let app = test_app(test_config()).await;

    let oversized = |uri: &str, length: u64| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, length)
            .body(Body::from("{}"))
            .unwrap()
    };

    let (status, body) = send(&app.router, oversized("/api/initiate-multipart", MAX_REQUEST_SIZE + 1)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "REQUEST_TOO_LARGE");

    let (status, body) = send(&app.router, oversized("/api/upload-server-side", MAX_FILE_SIZE + 1)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "REQUEST_TOO_LARGE");
}

// ========================================
// Single-shot upload
// ========================================

#[tokio::test]
async fn test_single_shot_upload_stores_object() {
    let app = test_app(test_config()).await;
    let data = payload(4096, 7);

    let (status, body) = send(
        &app.router,
        multipart_request(
            "/api/upload-server-side",
            &[
                ("fileName", None, b"campaignC1Session2.mp3"),
                ("file", Some("session.mp3"), &data),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "public/audioUploads/campaignC1Session2.mp3");
    assert!(body["location"].as_str().unwrap().ends_with("campaignC1Session2.mp3"));

    let stored = app
        .storage
        .get_object("tavern-local", "public/audioUploads/campaignC1Session2.mp3")
        .await
        .unwrap();
    assert_eq!(&stored.bytes[..], &data[..]);
    assert_eq!(stored.content_type.as_deref(), Some("audio/mpeg"));
}

#[tokio::test]
async fn test_single_shot_upload_requires_file() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        multipart_request("/api/upload-server-side", &[("fileName", None, b"a.mp3")]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_FIELDS");
}

// ========================================
// Multipart upload
// ========================================

async fn initiate(app: &TestApp, file_name: &str) -> String {
    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/initiate-multipart",
            &json!({"fileName": file_name, "bucket": "tavern-local", "totalSize": 2048}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "initiate failed: {}", body);
    body["uploadId"].as_str().unwrap().to_string()
}

async fn upload_part(app: &TestApp, upload_id: &str, file_name: &str, part: i32, data: &[u8]) -> serde_json::Value {
    let part_number = part.to_string();
    let (status, body) = send(
        &app.router,
        multipart_request(
            "/api/upload-chunk",
            &[
                ("uploadId", None, upload_id.as_bytes()),
                ("partNumber", None, part_number.as_bytes()),
                ("fileName", None, file_name.as_bytes()),
                ("bucket", None, b"tavern-local"),
                ("chunk", Some("blob"), data),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "chunk failed: {}", body);
    body
}

#[tokio::test]
async fn test_multipart_upload_round_trip() {
    let app = test_app(test_config()).await;
    let file_name = "campaignC1Session3.mp3";
    let upload_id = initiate(&app, file_name).await;

    let first = payload(1024, 1);
    let second = payload(1024, 2);
    // Parts may arrive out of order
    let part2 = upload_part(&app, &upload_id, file_name, 2, &second).await;
    let part1 = upload_part(&app, &upload_id, file_name, 1, &first).await;
    assert_eq!(part1["partNumber"], 1);

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/complete-multipart",
            &json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "bucket": "tavern-local",
                "parts": [
                    {"etag": part1["etag"], "partNumber": 1},
                    {"etag": part2["etag"], "partNumber": 2}
                ]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "complete failed: {}", body);
    assert_eq!(body["key"], "public/audioUploads/campaignC1Session3.mp3");

    let stored = app
        .storage
        .get_object("tavern-local", "public/audioUploads/campaignC1Session3.mp3")
        .await
        .unwrap();
    assert_eq!(stored.bytes.len(), 2048);
    assert_eq!(&stored.bytes[..1024], &first[..]);
    assert_eq!(&stored.bytes[1024..], &second[..]);
    assert_eq!(app.storage.pending_uploads(), 0);
}

#[tokio::test]
async fn test_complete_with_mismatched_parts_rejected() {
    let app = test_app(test_config()).await;
    let file_name = "campaignC1Session4.mp3";
    let upload_id = initiate(&app, file_name).await;

    let part1 = upload_part(&app, &upload_id, file_name, 1, &payload(100, 1)).await;
    let part2 = upload_part(&app, &upload_id, file_name, 2, &payload(100, 2)).await;

    // Swapped order
    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/complete-multipart",
            &json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "bucket": "tavern-local",
                "parts": [
                    {"etag": part2["etag"], "partNumber": 2},
                    {"etag": part1["etag"], "partNumber": 1}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "PART_LIST_MISMATCH");

    // Part 2 left out
    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/complete-multipart",
            &json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "bucket": "tavern-local",
                "parts": [{"etag": part1["etag"], "partNumber": 1}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "PART_LIST_MISMATCH");

    // The upload is still open after a rejected completion
    assert_eq!(app.storage.pending_uploads(), 1);
}

#[tokio::test]
async fn test_abort_multipart() {
    let app = test_app(test_config()).await;
    let file_name = "campaignC1Session5.mp3";
    let upload_id = initiate(&app, file_name).await;
    upload_part(&app, &upload_id, file_name, 1, &payload(10, 0)).await;

    let abort = json!({"uploadId": upload_id, "fileName": file_name, "bucket": "tavern-local"});

    let (status, body) = send(&app.router, json_request("POST", "/api/abort-multipart", &abort)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.storage.pending_uploads(), 0);

    let (status, body) = send(&app.router, json_request("POST", "/api/abort-multipart", &abort)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_bucket_rejected() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/initiate-multipart",
            &json!({"fileName": "a.mp3", "bucket": "someone-elses-bucket", "totalSize": 10}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");
}

#[tokio::test]
async fn test_oversized_chunk_rejected() {
    let app = test_app(test_config()).await;
    let file_name = "campaignC1Session6.mp3";
    let upload_id = initiate(&app, file_name).await;
    let chunk = vec![0u8; (45 * MIB + 1) as usize];

    let (status, body) = send(
        &app.router,
        multipart_request(
            "/api/upload-chunk",
            &[
                ("uploadId", None, upload_id.as_bytes()),
                ("partNumber", None, b"1"),
                ("fileName", None, file_name.as_bytes()),
                ("bucket", None, b"tavern-local"),
                ("chunk", Some("blob"), &chunk),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_invalid_part_number_rejected() {
    let app = test_app(test_config()).await;
    let upload_id = initiate(&app, "a.mp3").await;

    let (status, body) = send(
        &app.router,
        multipart_request(
            "/api/upload-chunk",
            &[
                ("uploadId", None, upload_id.as_bytes()),
                ("partNumber", None, b"0"),
                ("fileName", None, b"a.mp3"),
                ("bucket", None, b"tavern-local"),
                ("chunk", Some("blob"), b"abc"),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");
}

// ========================================
// Images and sharing
// ========================================

#[tokio::test]
async fn test_image_requires_bearer_token() {
    let app = test_app(test_config()).await;
    app.storage
        .put_object("tavern-local", "private/images/map.png", vec![1u8, 2, 3].into(), Some("image/png"))
        .await
        .unwrap();
    let uri = format!("/api/image/{}", URL_SAFE_NO_PAD.encode("private/images/map.png"));

    let (status, body) = send(&app.router, get_request(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHORIZED");

    let (status, _) = send(&app.router, get_request(&uri, Some("forged"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = tower::ServiceExt::oneshot(app.router.clone(), get_request(&uri, Some("valid-u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn test_share_image_limited_to_public_prefix() {
    let app = test_app(test_config()).await;
    for key in ["public/images/banner.png", "private/images/secret.png"] {
        app.storage
            .put_object("tavern-local", key, vec![9u8].into(), Some("image/png"))
            .await
            .unwrap();
    }

    let public = format!("/api/share-image/{}", URL_SAFE_NO_PAD.encode("public/images/banner.png"));
    let (status, _) = send(&app.router, get_request(&public, None)).await;
    assert_eq!(status, StatusCode::OK);

    let private = format!("/api/share-image/{}", URL_SAFE_NO_PAD.encode("private/images/secret.png"));
    let (status, body) = send(&app.router, get_request(&private, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let missing = format!("/api/share-image/{}", URL_SAFE_NO_PAD.encode("public/images/gone.png"));
    let (status, _) = send(&app.router, get_request(&missing, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_share_session() {
    let app = test_app_with(test_config(), |state| {
        state.with_sessions(Arc::new(FakeSessions::with_session("s1", "The Sunken Vault")))
    })
    .await;

    let (status, body) = send(&app.router, get_request("/api/share/s1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "The Sunken Vault");
    assert_eq!(body["transcriptionStatus"], "COMPLETED");
    assert!(body.get("audioFile").is_none());

    let (status, body) = send(&app.router, get_request("/api/share/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

// ========================================
// Processing trigger
// ========================================

#[tokio::test]
async fn test_trigger_lambda_forwards_payload() {
    let invoker = Arc::new(RecordingInvoker::default());
    let recorded = invoker.clone();
    let app = test_app_with(test_config(), move |state| state.with_functions(invoker)).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/trigger-lambda",
            &json!({
                "sessionId": "s1",
                "campaignId": "c1",
                "audio_filename": "campaignc1Sessions1.mp3",
                "user_specified_fields": {"language": "en"}
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 202);

    let payloads = recorded.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["sessionId"], "s1");
    assert_eq!(payloads[0]["audio_filename"], "campaignc1Sessions1.mp3");
    assert_eq!(payloads[0]["user_specified_fields"]["language"], "en");
}

#[tokio::test]
async fn test_trigger_lambda_missing_fields() {
    let app = test_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/trigger-lambda",
            &json!({"sessionId": "s1", "campaignId": "", "audio_filename": "a.mp3"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_FIELDS");
}

#[tokio::test]
async fn test_handler_panic_becomes_500() {
    let app = test_app_with(test_config(), |state| state.with_functions(Arc::new(PanickingInvoker))).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/trigger-lambda",
            &json!({"sessionId": "s1", "campaignId": "c1", "audio_filename": "a.mp3"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "INTERNAL_ERROR");

    // The router keeps serving
    let (status, _) = send(&app.router, get_request("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}

// ========================================
// Referral endpoints
// ========================================

fn referral_config() -> tavern_server::config::ServerConfig {
    let mut config = test_config();
    config.referral.enabled = true;
    config
}

#[tokio::test]
async fn test_referral_endpoints_disabled() {
    let app = test_app(test_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/referrals/code")
        .header(header::AUTHORIZATION, "Bearer valid-u1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "FEATURE_DISABLED");

    let (status, body) = send(&app.router, get_request("/api/referrals/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["monthlyCap"], 3);
}

#[tokio::test]
async fn test_referral_code_created_once() {
    let app = test_app(referral_config()).await;

    let create = || {
        Request::builder()
            .method("POST")
            .uri("/api/referrals/code")
            .header(header::AUTHORIZATION, "Bearer valid-u1")
            .body(Body::empty())
            .unwrap()
    };

    let (status, first) = send(&app.router, create()).await;
    assert_eq!(status, StatusCode::OK, "create failed: {}", first);
    let mut fields: Vec<&str> = first.as_object().unwrap().keys().map(String::as_str).collect();
    fields.sort_unstable();
    assert_eq!(fields, ["code", "createdAt"]);
    let code = first["code"].as_str().unwrap();
    assert_eq!(code.len(), 8);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let (_, second) = send(&app.router, create()).await;
    assert_eq!(second["code"], first["code"]);
    assert_eq!(app.gateway.coupon_count(), 1);

    let coupon = app.gateway.coupons.lock().unwrap()[0].clone();
    assert_eq!(coupon.percent_off, 20);
    assert_eq!(coupon.metadata["type"], "referral");
    assert_eq!(coupon.metadata["referrer_user_id"], "u1");

    let (status, summary) = send(&app.router, get_request("/api/referrals", Some("valid-u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["code"]["code"], first["code"]);
    assert_eq!(summary["stats"]["totalRewards"], 0);
    assert_eq!(summary["stats"]["remainingThisMonth"], 3);
}

#[tokio::test]
async fn test_referrals_require_token() {
    let app = test_app(referral_config()).await;

    let (status, body) = send(&app.router, get_request("/api/referrals", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHORIZED");
}

#[tokio::test]
async fn test_stripe_config() {
    let app = test_app(test_config()).await;

    let (status, body) = send(&app.router, get_request("/api/stripe/config", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["publishableKey"], "pk_test_123");
}
