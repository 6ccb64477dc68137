use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use huddle_chat::broadcast::{Channel, RecordingBroadcaster, MESSAGE_SENT};
use huddle_chat::config::AppConfig;
use huddle_chat::models::NewBlockedIp;
use huddle_chat::services::messages::DELETED_PLACEHOLDER;
use huddle_chat::store::{ChatStore, MemoryStore};
use huddle_chat::{build_router, AppState};
use huddle_shared::middleware::{issue_jwt, DEFAULT_JWT_SECRET};
use huddle_shared::types::auth::{Claims, UserRole};

struct TestApp {
    store: Arc<MemoryStore>,
    hub: Arc<RecordingBroadcaster>,
    router: Router,
}

struct Caller {
    id: Uuid,
    token: String,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(RecordingBroadcaster::new());
        let state = Arc::new(AppState {
            store: store.clone(),
            broadcaster: hub.clone(),
            config,
            metrics_handle: None,
        });
        Self {
            store,
            hub,
            router: build_router(state, None),
        }
    }

    fn caller(&self, name: &str, role: UserRole) -> Caller {
        let id = Uuid::now_v7();
        self.store.upsert_user(id, name, None).unwrap();
        let token = issue_jwt(&Claims::new(id, role, 3600), DEFAULT_JWT_SECRET).unwrap();
        Caller { id, token }
    }

    /// Sends the request as if it arrived on a connection from `ip`.
    async fn call(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&Caller>,
        body: Option<Value>,
        ip: &str,
    ) -> (StatusCode, Value) {
        self.call_via(method, uri, caller, body, ip, None).await
    }

    async fn call_via(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&Caller>,
        body: Option<Value>,
        peer_ip: &str,
        forwarded_for: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "api-test");
        if let Some(forwarded_for) = forwarded_for {
            builder = builder.header("x-forwarded-for", forwarded_for);
        }
        if let Some(caller) = caller {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", caller.token));
        }
        let mut request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let peer = SocketAddr::new(peer_ip.parse::<IpAddr>().unwrap(), 40000);
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn get(&self, uri: &str, caller: &Caller) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(caller), None, CLIENT_IP).await
    }

    async fn post(&self, uri: &str, caller: &Caller, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(caller), Some(body), CLIENT_IP).await
    }

    async fn create_room(&self, owner: &Caller, members: &[&Caller]) -> String {
        let ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
        let (status, body) = self
            .post(
                "/chat-rooms",
                owner,
                json!({ "name": "Team", "kind": "group", "participant_ids": ids }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

const CLIENT_IP: &str = "198.51.100.20";

#[tokio::test]
async fn health_reports_storage() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/health", None, None, CLIENT_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"][0]["name"], "storage");
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/chat-rooms", None, None, CLIENT_IP).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "E0004");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn room_lifecycle_scenario() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let b = app.caller("Bob", UserRole::User);

    let room = app.create_room(&a, &[&b]).await;
    let (_, detail) = app.get(&format!("/chat-rooms/{room}"), &b).await;
    let owners: Vec<&Value> = detail["data"]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["role"] == "owner")
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0]["user_id"], a.id.to_string());

    let (status, sent) = app
        .post(&format!("/chat-rooms/{room}/messages"), &a, json!({ "content": "hi" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();

    let (status, listed) = app.get(&format!("/chat-rooms/{room}/messages"), &b).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"]["total"], 1);
    assert_eq!(listed["data"]["items"][0]["content"], "hi");
    assert_eq!(listed["data"]["items"][0]["user"]["id"], a.id.to_string());

    let reactions = format!("/chat-rooms/{room}/messages/{message_id}/reactions");
    for _ in 0..2 {
        let (status, _) = app.post(&reactions, &b, json!({ "emoji": "👍" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, listed) = app.get(&format!("/chat-rooms/{room}/messages"), &a).await;
    let reactions = listed["data"]["items"][0]["reactions"].as_array().unwrap().clone();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0]["user_id"], b.id.to_string());

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/chat-rooms/{room}/messages/{message_id}"),
            Some(&a),
            None,
            CLIENT_IP,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = app.get(&format!("/chat-rooms/{room}/messages"), &b).await;
    let item = &listed["data"]["items"][0];
    assert_eq!(item["content"], DELETED_PLACEHOLDER);
    assert_eq!(item["is_deleted"], true);
    assert_eq!(item["reactions"].as_array().unwrap().len(), 1);

    let room_id = Uuid::parse_str(&room).unwrap();
    assert!(app
        .hub
        .events()
        .iter()
        .all(|e| e.channel == Channel::Room(room_id) && e.event == MESSAGE_SENT));
}

#[tokio::test]
async fn sender_socket_is_excluded_from_send_broadcast() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let room = app.create_room(&a, &[]).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/chat-rooms/{room}/messages"))
        .header(header::AUTHORIZATION, format!("Bearer {}", a.token))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-socket-id", "sid-42")
        .body(Body::from(json!({ "content": "hello" }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let events = app.hub.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].except_socket.as_deref(), Some("sid-42"));
}

#[tokio::test]
async fn validation_failures_carry_field_errors() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);

    let (status, body) = app.post("/chat-rooms", &a, json!({ "name": "", "kind": "group" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "E0002");
    assert!(body["errors"]["name"].is_array());

    let room = app.create_room(&a, &[]).await;
    let (status, body) = app.post(&format!("/chat-rooms/{room}/messages"), &a, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "E2002");
    assert!(body["errors"]["content"].is_array());
}

#[tokio::test]
async fn owner_cannot_leave_and_outsiders_are_forbidden() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let c = app.caller("Carol", UserRole::User);
    let room = app.create_room(&a, &[]).await;

    let (status, body) = app.post(&format!("/chat-rooms/{room}/leave"), &a, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "E1007");

    let (status, _) = app.get(&format!("/chat-rooms/{room}/messages"), &c).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get(&format!("/chat-rooms/{}", Uuid::now_v7()), &a).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_report_conflicts_and_queue_needs_moderator() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let b = app.caller("Bob", UserRole::User);
    let m = app.caller("Mod", UserRole::Moderator);
    let room = app.create_room(&a, &[&b]).await;
    let (_, sent) = app
        .post(&format!("/chat-rooms/{room}/messages"), &a, json!({ "content": "spam spam" }))
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();

    let report_uri = format!("/messages/{message_id}/report");
    let (status, report) = app.post(&report_uri, &b, json!({ "reason": "spam" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.post(&report_uri, &b, json!({ "reason": "spam" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "E3002");

    let (status, _) = app.get("/moderation/reports", &b).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, queue) = app.get("/moderation/reports", &m).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["data"]["total"], 1);

    let report_id = report["data"]["id"].as_str().unwrap();
    let (status, reviewed) = app
        .call(
            Method::PUT,
            &format!("/moderation/reports/{report_id}"),
            Some(&m),
            Some(json!({ "status": "resolved", "moderator_notes": "spam" })),
            CLIENT_IP,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["data"]["status"], "resolved");

    let (_, logs) = app.get("/moderation/audit-logs", &m).await;
    let actions: Vec<&str> = logs["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["report_reviewed", "message_deleted_by_moderation", "message_reported"]);
}

#[tokio::test]
async fn blocked_ips_are_turned_away_at_the_gate() {
    let app = TestApp::new();
    let m = app.caller("Mod", UserRole::Moderator);
    let blocked = "203.0.113.50";

    let (status, _) = app
        .post("/moderation/block-ip", &m, json!({ "ip_address": blocked, "reason": "abuse" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.call(Method::GET, "/chat-rooms", Some(&m), None, blocked).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "E3005");
    assert_eq!(body["error"], "Access denied. Your IP address has been blocked.");

    // unauthenticated requests are gated too
    let (status, _) = app.call(Method::GET, "/chat-rooms", None, None, blocked).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.call(Method::GET, "/health", None, None, blocked).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, "/chat-rooms", Some(&m), None, CLIENT_IP).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_blocks_let_requests_through() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let ip = "203.0.113.51";
    app.store
        .upsert_blocked_ip(NewBlockedIp {
            ip_address: ip.to_string(),
            blocked_by: None,
            reason: None,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        })
        .unwrap();

    let (status, _) = app.call(Method::GET, "/chat-rooms", Some(&a), None, ip).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn presence_updates_publish_on_users_channel() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);

    let (status, body) = app
        .call(
            Method::PUT,
            "/users/me/status",
            Some(&a),
            Some(json!({ "status": "away" })),
            CLIENT_IP,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "away");

    let events = app.hub.events();
    assert_eq!(events[0].channel, Channel::Users);
    assert_eq!(events[0].payload["user_id"], a.id.to_string());
}

#[tokio::test]
async fn forged_forwarded_for_cannot_dodge_a_block() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let blocked = "203.0.113.50";
    block(&app, blocked);

    let (status, body) = app
        .call_via(Method::GET, "/chat-rooms", Some(&a), None, blocked, Some("192.0.2.1"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "E3005");
}

#[tokio::test]
async fn forwarded_for_is_read_through_trusted_proxies() {
    let proxy = "10.0.0.1";
    let app = TestApp::with_config(AppConfig {
        trust_forwarded_for: true,
        trusted_proxies: vec![proxy.parse().unwrap()],
        ..AppConfig::default()
    });
    let a = app.caller("Alice", UserRole::User);
    let blocked = "203.0.113.50";
    block(&app, blocked);

    // the proxy appends the real client after whatever the client wrote
    let (status, _) = app
        .call_via(Method::GET, "/chat-rooms", Some(&a), None, proxy, Some(format!("192.0.2.1, {blocked}").as_str()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call_via(Method::GET, "/chat-rooms", Some(&a), None, proxy, Some(format!("{blocked}, 192.0.2.1").as_str()))
        .await;
    assert_eq!(status, StatusCode::OK);

    // a direct connection is not a proxy, so its header is ignored
    let (status, _) = app
        .call_via(Method::GET, "/chat-rooms", Some(&a), None, blocked, Some("192.0.2.1"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

fn block(app: &TestApp, ip: &str) {
    app.store
        .upsert_blocked_ip(NewBlockedIp {
            ip_address: ip.to_string(),
            blocked_by: None,
            reason: Some("abuse".into()),
            expires_at: None,
        })
        .unwrap();
}

#[tokio::test]
async fn page_numbers_past_the_end_return_an_empty_page() {
    let app = TestApp::new();
    let a = app.caller("Alice", UserRole::User);
    let room = app.create_room(&a, &[]).await;
    app.post(&format!("/chat-rooms/{room}/messages"), &a, json!({ "content": "hi" }))
        .await;

    let (status, body) = app
        .get(&format!("/chat-rooms/{room}/messages?page={}", u64::MAX), &a)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["total"], 1);
    assert!(body["data"]["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn first_time_callers_are_registered_from_their_token() {
    let app = TestApp::new();
    let id = Uuid::now_v7();
    let token = issue_jwt(&Claims::new(id, UserRole::User, 3600).with_name("Dana"), DEFAULT_JWT_SECRET).unwrap();
    let dana = Caller { id, token };
    assert!(app.store.find_user(id).unwrap().is_none());

    let room = app.create_room(&dana, &[]).await;
    let (status, _) = app
        .post(&format!("/chat-rooms/{room}/messages"), &dana, json!({ "content": "first" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let events = app.hub.events();
    let sent = events.iter().find(|e| e.event == MESSAGE_SENT).unwrap();
    assert_eq!(sent.payload["message"]["user"]["id"], id.to_string());
    assert_eq!(sent.payload["message"]["user"]["name"], "Dana");

    let (status, body) = app
        .call(
            Method::PUT,
            "/users/me/status",
            Some(&dana),
            Some(json!({ "status": "busy" })),
            CLIENT_IP,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Dana");
}

#[tokio::test]
async fn malformed_ip_literals_are_field_errors() {
    let app = TestApp::new();
    let m = app.caller("Mod", UserRole::Moderator);

    for uri in ["/moderation/block-ip", "/moderation/unblock-ip"] {
        let (status, body) = app.post(uri, &m, json!({ "ip_address": "999.1.1.1" })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        assert_eq!(body["code"], "E0002");
        assert!(body["errors"]["ip_address"].is_array());
    }
}
