//! Integration tests for the REST backend client against a mock server.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedline::api::{ApiError, FeedApi, HttpFeedApi};
use feedline::feed::{ControllerOptions, CoordinatorConfig, FeedController};
use feedline::model::{Author, CommentId, FeedSource, Id};

fn api(server: &MockServer) -> HttpFeedApi {
    HttpFeedApi::new(
        reqwest::Client::new(),
        &format!("{}/api/", server.uri()),
        Some(SecretString::from("tok-123")),
    )
    .unwrap()
}

fn item_json(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "type": "project",
        "author": {"id": 1, "firstName": "Ada", "lastName": "Lovelace"},
        "title": format!("Achievement {id}"),
        "createdAt": "2024-05-01T09:00:00Z",
        "likeCount": 2,
        "isLikedByCurrentUser": false,
        "commentCount": 0,
        "comments": []
    })
}

#[tokio::test]
async fn test_fetch_page_sends_query_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/achievements/popular"))
        .and(query_param("page", "2"))
        .and(query_param("per_page", "10"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item_json(5), item_json(6)],
            "meta": {"current_page": 2, "last_page": 4, "total": 37}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = api(&server)
        .fetch_page(FeedSource::Popular, 2, 10)
        .await
        .unwrap();

    let ids: Vec<_> = page.items.iter().map(|i| i.id.to_string()).collect();
    assert_eq!(ids, vec!["5", "6"]);
    let meta = page.pagination.unwrap();
    assert_eq!(meta.current_page, 2);
    assert_eq!(meta.last_page, Some(4));
    assert_eq!(meta.total, Some(37));
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
        .mount(&server)
        .await;

    let err = api(&server)
        .fetch_page(FeedSource::All, 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApiError::RateLimited {
            retry_after: Some(d)
        } if d == Duration::from_secs(5)
    ));
}

#[tokio::test]
async fn test_server_error_maps_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = api(&server)
        .fetch_page(FeedSource::Mine, 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Status(503)));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = api(&server)
        .fetch_page(FeedSource::All, 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5 * 1024 * 1024 + 1)))
        .mount(&server)
        .await;

    let err = api(&server)
        .fetch_page(FeedSource::All, 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::ResponseTooLarge));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = api(&server)
        .with_timeout(Duration::from_millis(50))
        .fetch_page(FeedSource::All, 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout));
}

#[tokio::test]
async fn test_like_and_unlike_routes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/achievements/42/like"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "likeCount": 3,
            "isLiked": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/achievements/42/like"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"likeCount": 2})))
        .expect(1)
        .mount(&server)
        .await;

    let api = api(&server);
    let liked = api.like(&Id::from(42)).await.unwrap();
    assert_eq!(liked.like_count, Some(3));
    assert_eq!(liked.is_liked, Some(true));

    let unliked = api.unlike(&Id::from(42)).await.unwrap();
    assert_eq!(unliked.like_count, Some(2));
    assert_eq!(unliked.is_liked, None);
}

#[tokio::test]
async fn test_add_comment_posts_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/achievements/42/comments"))
        .and(body_json(json!({"content": "Congrats!"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "comment": {
                "id": 900,
                "author": {"id": "me"},
                "content": "Congrats!",
                "createdAt": "2024-05-02T09:00:00Z"
            },
            "commentCount": 4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = api(&server)
        .add_comment(&Id::from(42), "Congrats!")
        .await
        .unwrap();

    assert_eq!(response.comment.id, CommentId::from("900"));
    assert_eq!(response.comment_count, Some(4));
}

#[tokio::test]
async fn test_delete_comment_route() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/comments/900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = api(&server)
        .delete_comment(&Id::from(900))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.comment_count, None);
}

#[tokio::test]
async fn test_controller_retries_rate_limited_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/achievements"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/achievements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item_json(1), item_json(2)],
            "meta": {"current_page": 1, "last_page": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let options = ControllerOptions {
        coordinator: CoordinatorConfig {
            min_interval: Duration::ZERO,
            backoff_base: Duration::from_millis(20),
            max_retries: 3,
        },
        ..ControllerOptions::default()
    };
    let me = Author {
        id: Id::from("me"),
        first_name: "Test".into(),
        last_name: "User".into(),
        avatar_url: None,
    };
    let feed = FeedController::new(api(&server), me, options, None);

    feed.refresh().await.unwrap();

    let view = feed.view();
    assert_eq!(view.items.len(), 2);
    assert!(!view.has_more);
    assert_eq!(view.error, None);
}
