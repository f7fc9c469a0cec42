use super::*;
use crate::state::test_helpers::{MockUpstream, test_app_state};
use axum::http::HeaderValue;
use serde_json::json;

async fn call(
    upstream: &std::sync::Arc<MockUpstream>,
    method: Method,
    endpoint: Option<&str>,
    headers: HeaderMap,
    body: &'static str,
) -> Response {
    let state = test_app_state(upstream.clone());
    let query = Ok(Query(ProxyQuery { endpoint: endpoint.map(str::to_owned) }));
    forward(State(state), method, query, headers, Bytes::from(body))
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_static(value));
    }
    map
}

// =============================================================================
// endpoint handling
// =============================================================================

#[tokio::test]
async fn missing_endpoint_is_400_without_upstream_call() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({}));
    let response = call(&upstream, Method::GET, None, HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "message": "No endpoint specified" }));
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn empty_endpoint_is_treated_as_missing() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({}));
    let response = call(&upstream, Method::POST, Some(""), HeaderMap::new(), "{}").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn endpoint_that_could_change_host_is_400_without_upstream_call() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({}));
    for endpoint in ["@127.0.0.1:8080/steal", ".evil.example/x", "api/users/me", "//evil.example/x"] {
        let hdrs = headers(&[("authorization", "Bearer secret-token")]);
        let response = call(&upstream, Method::GET, Some(endpoint), hdrs, "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{endpoint}");
        assert_eq!(body_json(response).await, json!({ "message": "Invalid endpoint" }));
    }
    assert_eq!(upstream.call_count(), 0);
}

#[test]
fn upstream_paths_must_be_absolute() {
    assert!(is_upstream_path("/api/users/me"));
    assert!(is_upstream_path("/api/chats?limit=5"));
    assert!(!is_upstream_path("@evil/x"));
    assert!(!is_upstream_path(".evil.example/x"));
    assert!(!is_upstream_path("//evil.example/x"));
}

#[tokio::test]
async fn multipart_body_is_415_without_upstream_call() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({}));
    let hdrs = headers(&[("content-type", "multipart/form-data; boundary=XB")]);
    let body = "--XB\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nhello\r\n--XB--\r\n";
    let response = call(&upstream, Method::POST, Some("/api/chats"), hdrs, body).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await, json!({ "message": "Unsupported content type" }));
    assert_eq!(upstream.call_count(), 0);
}

// =============================================================================
// forwarding
// =============================================================================

#[tokio::test]
async fn get_forwards_without_body_and_defaults_headers() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({ "id": "u1" }));
    let response = call(&upstream, Method::GET, Some("/api/users/me"), HeaderMap::new(), "ignored").await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = upstream.last_call();
    assert_eq!(sent.method, Method::GET);
    assert_eq!(sent.endpoint, "/api/users/me");
    assert_eq!(sent.authorization, "");
    assert_eq!(sent.content_type, "application/json");
    assert_eq!(sent.body, UpstreamBody::Empty);
}

#[tokio::test]
async fn post_form_body_is_reencoded_as_form() {
    let upstream = MockUpstream::json(StatusCode::OK, &json!({ "access_token": "t" }));
    let hdrs = headers(&[("content-type", "application/x-www-form-urlencoded"), ("authorization", "Bearer abc")]);
    call(
        &upstream,
        Method::POST,
        Some("/api/auth/jwt/login"),
        hdrs,
        "username=ada%40example.test&password=pw&grant_type=password",
    )
    .await;

    let sent = upstream.last_call();
    assert_eq!(sent.authorization, "Bearer abc");
    assert_eq!(sent.content_type, "application/x-www-form-urlencoded");
    assert_eq!(
        sent.body,
        UpstreamBody::Form(vec![
            ("username".into(), "ada@example.test".into()),
            ("password".into(), "pw".into()),
            ("grant_type".into(), "password".into()),
        ])
    );
}

#[tokio::test]
async fn post_json_body_is_forwarded_as_json() {
    let upstream = MockUpstream::json(StatusCode::CREATED, &json!({ "id": 7 }));
    let hdrs = headers(&[("content-type", "application/json")]);
    let response = call(&upstream, Method::POST, Some("/api/chats"), hdrs, r#"{"prompt":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({ "id": 7 }));
    assert_eq!(upstream.last_call().body, UpstreamBody::Json(json!({ "prompt": "hi" })));
}

#[test]
fn malformed_json_body_degrades_to_empty_object() {
    assert_eq!(decode_body("application/json", b"{not json"), UpstreamBody::Json(json!({})));
    assert_eq!(decode_body("text/plain", b""), UpstreamBody::Json(json!({})));
}

#[test]
fn form_content_type_with_charset_still_decodes_form() {
    let body = decode_body("application/x-www-form-urlencoded; charset=UTF-8", b"a=1");
    assert_eq!(body, UpstreamBody::Form(vec![("a".into(), "1".into())]));
}

// =============================================================================
// response normalization
// =============================================================================

#[tokio::test]
async fn bad_credentials_maps_to_friendly_message() {
    let upstream = MockUpstream::json(StatusCode::BAD_REQUEST, &json!({ "detail": "LOGIN_BAD_CREDENTIALS" }));
    let response = call(&upstream, Method::POST, Some("/api/auth/jwt/login"), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "message": "Invalid email or password" }));
}

#[tokio::test]
async fn unverified_user_maps_to_verification_message() {
    let upstream = MockUpstream::json(StatusCode::BAD_REQUEST, &json!({ "detail": "LOGIN_USER_NOT_VERIFIED" }));
    let response = call(&upstream, Method::POST, Some("/api/auth/jwt/login"), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "message": "Please verify your email before logging in" }));
}

#[tokio::test]
async fn validation_array_takes_first_message() {
    let upstream = MockUpstream::json(
        StatusCode::UNPROCESSABLE_ENTITY,
        &json!({ "detail": [{ "msg": "X" }, { "msg": "Y" }] }),
    );
    let response = call(&upstream, Method::POST, Some("/api/chats"), HeaderMap::new(), "{}").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await, json!({ "message": "X" }));
}

#[test]
fn unknown_error_shapes_fall_back_to_generic_message() {
    assert_eq!(error_message(br#"{"detail":"SOMETHING_ELSE"}"#), "An error occurred");
    assert_eq!(error_message(br#"{"detail":[]}"#), "An error occurred");
    assert_eq!(error_message(br#"{"detail":[{"loc":["body"]}]}"#), "An error occurred");
    assert_eq!(error_message(b"<html>502</html>"), "An error occurred");
    assert_eq!(error_message(b""), "An error occurred");
}

#[tokio::test]
async fn logout_relays_status_with_empty_body() {
    let upstream = MockUpstream::raw(StatusCode::NO_CONTENT, "not json at all");
    let response = call(&upstream, Method::POST, Some(LOGOUT_ENDPOINT), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn logout_error_status_is_still_relayed_verbatim() {
    let upstream = MockUpstream::raw(StatusCode::UNAUTHORIZED, "");
    let response = call(&upstream, Method::POST, Some(LOGOUT_ENDPOINT), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_success_body_is_relayed_empty() {
    let upstream = MockUpstream::raw(StatusCode::NO_CONTENT, "");
    let response = call(&upstream, Method::GET, Some("/api/chats"), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// =============================================================================
// opaque failures
// =============================================================================

#[tokio::test]
async fn transport_failure_is_opaque_500() {
    let upstream = MockUpstream::failing();
    let response = call(&upstream, Method::GET, Some("/api/users/me"), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await, json!({ "message": "Internal server error" }));
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn non_json_success_body_is_opaque_500() {
    let upstream = MockUpstream::raw(StatusCode::OK, "<html>ok</html>");
    let response = call(&upstream, Method::GET, Some("/api/charts/suggestion"), HeaderMap::new(), "").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await, json!({ "message": "Internal server error" }));
}
