use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use courier_api::state::AppStateInner;
use courier_core::{ChangeFeed, Messaging, NoopNotifier};
use courier_db::Database;
use courier_types::api::Claims;

const SECRET: &str = "route-test-secret-0123456789";

struct Harness {
    app: Router,
    ada: Uuid,
    bo: Uuid,
    media_dir: std::path::PathBuf,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (ada, bo) = (Uuid::new_v4(), Uuid::new_v4());
        db.upsert_user(ada, "ada").unwrap();
        db.upsert_user(bo, "bo").unwrap();

        let media_dir = std::env::temp_dir().join(format!("courier-media-{}", Uuid::new_v4()));
        let state = Arc::new(AppStateInner {
            messaging: Messaging::new(db, ChangeFeed::new(16), Arc::new(NoopNotifier)),
            jwt_secret: SECRET.to_string(),
            media_dir: media_dir.clone(),
            public_url: "http://courier.test/".to_string(),
        });

        Self {
            app: courier_api::router(state),
            ada,
            bo,
            media_dir,
        }
    }

    fn token(&self, sub: Uuid) -> String {
        let claims = Claims {
            sub,
            username: String::new(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn call(&self, method: Method, uri: &str, as_user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = as_user {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", self.token(user)));
        }
        let req = match body {
            Some(json) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn direct(&self) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/conversations",
                Some(self.ada),
                Some(json!({ "participantIds": [self.bo], "isGroup": false })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.media_dir);
    }
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = Harness::new();
    let (status, _) = h.call(Method::GET, "/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_then_read_history_with_reactions() {
    let h = Harness::new();
    let conv = h.direct().await;

    let (status, sent) = h
        .call(
            Method::POST,
            "/messages",
            Some(h.ada),
            Some(json!({ "conversationId": conv, "content": "hi", "messageType": "text" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = sent["id"].as_str().unwrap().to_string();

    let (status, toggled) = h
        .call(
            Method::POST,
            "/reactions/toggle",
            Some(h.bo),
            Some(json!({ "messageId": message_id, "emoji": "❤️" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["applied"], true);

    let (status, page) = h
        .call(Method::GET, &format!("/conversations/{}/messages?limit=10", conv), Some(h.bo), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page[0]["content"], "hi");
    assert_eq!(page[0]["reactions"][0], json!({ "emoji": "❤️", "count": 1, "viewer_reacted": true }));

    let (_, inbox) = h.call(Method::GET, "/conversations", Some(h.bo), None).await;
    assert_eq!(inbox[0]["display_name"], "ada");
    assert_eq!(inbox[0]["unread"], true);
}

#[tokio::test]
async fn core_errors_become_status_codes() {
    let h = Harness::new();
    let conv = h.direct().await;
    let outsider = Uuid::new_v4();

    let (status, body) = h
        .call(
            Method::POST,
            "/messages",
            Some(h.ada),
            Some(json!({ "conversationId": conv, "messageType": "text" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = h
        .call(Method::GET, &format!("/conversations/{}/messages", conv), Some(outsider), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .call(Method::DELETE, &format!("/messages/{}", Uuid::new_v4()), Some(h.ada), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mute_and_mark_read_return_no_content() {
    let h = Harness::new();
    let conv = h.direct().await;

    let (status, _) = h
        .call(
            Method::POST,
            "/mute",
            Some(h.bo),
            Some(json!({ "conversationId": conv, "durationHours": 8 })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = h
        .call(Method::POST, "/unmute", Some(h.bo), Some(json!({ "conversationId": conv })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = h
        .call(Method::POST, &format!("/conversations/{}/read", conv), Some(h.bo), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn future_read_time_does_not_hide_later_messages() {
    let h = Harness::new();
    let conv = h.direct().await;

    let future = chrono::Utc::now() + chrono::Duration::days(30);
    let (status, _) = h
        .call(
            Method::POST,
            &format!("/conversations/{}/read", conv),
            Some(h.bo),
            Some(json!({ "at": future })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = h
        .call(
            Method::POST,
            "/messages",
            Some(h.ada),
            Some(json!({ "conversationId": conv, "content": "are you there?", "messageType": "text" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, inbox) = h.call(Method::GET, "/conversations", Some(h.bo), None).await;
    assert_eq!(inbox[0]["unread"], true);
}

#[tokio::test]
async fn media_round_trips_by_content_hash() {
    let h = Harness::new();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/media")
        .header(header::AUTHORIZATION, format!("Bearer {}", h.token(h.ada)))
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(&b"\x89PNG fake"[..]))
        .unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
    let url = body["media_url"].as_str().unwrap();
    let path = url.strip_prefix("http://courier.test").unwrap();
    assert!(path.starts_with("/media/") && path.ends_with(".png"));

    let res = h
        .app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(&to_bytes(res.into_body(), usize::MAX).await.unwrap()[..], b"\x89PNG fake");
}
