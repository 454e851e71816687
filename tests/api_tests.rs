// End-to-end tests of the HTTP surface over the in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use axum::body::BodyDataStream;
use futures::StreamExt;
use live_polls::config::LiveConfig;
use live_polls::db::MemoryPollRepository;
use live_polls::startup::{AppState, build_router};
use serde_json::{Value, json};
use tokio::time::timeout;
use tower::ServiceExt;

// ===========================================================================
// Test helpers
// ===========================================================================

fn app() -> (AppState, Router) {
    let state = AppState::new(Arc::new(MemoryPollRepository::new()), &LiveConfig::default());
    let router = build_router(state.clone());
    (state, router)
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create(router: &Router, question: &str, options: &[&str]) -> Value {
    let (status, poll) = call(
        router,
        Method::POST,
        "/polls",
        Some(json!({ "question": question, "options": options })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {poll}");
    poll
}

async fn vote(router: &Router, id: i64, option_index: i64) -> (StatusCode, Value) {
    call(
        router,
        Method::POST,
        &format!("/polls/{id}/vote"),
        Some(json!({ "option_index": option_index })),
    )
    .await
}

/// Reads server-sent events off a streaming response body.
struct EventReader {
    body: BodyDataStream,
    buffer: String,
}

impl EventReader {
    /// The next `event:`/`data:` block, or `None` once the stream has ended.
    async fn next_event(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if block.starts_with(':') {
                    continue; // keep-alive comment
                }
                return Some(block);
            }
            let chunk = timeout(Duration::from_secs(1), self.body.next())
                .await
                .expect("no event within a second")?
                .unwrap();
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

async fn open_events(router: &Router, uri: &str) -> EventReader {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    EventReader {
        body: response.into_body().into_data_stream(),
        buffer: String::new(),
    }
}

fn event_name(block: &str) -> &str {
    block
        .lines()
        .find_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .unwrap_or("")
}

fn event_data(block: &str) -> Value {
    let data = block
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .expect("event without data");
    serde_json::from_str(data.trim()).unwrap()
}

// ===========================================================================
// CRUD
// ===========================================================================

#[tokio::test]
async fn create_then_get_returns_the_same_poll() {
    let (_, router) = app();
    let created = create(&router, "Best editor?", &["VS Code", "Vim"]).await;
    assert_eq!(created["votes"], json!([0, 0]));

    let uri = format!("/polls/{}", created["id"]);
    for _ in 0..2 {
        let (status, fetched) = call(&router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }
}

#[tokio::test]
async fn invalid_polls_are_rejected() {
    let (_, router) = app();

    for options in [json!(["A", "A"]), json!(["only"]), json!(["A", " "])] {
        let (status, body) = call(
            &router,
            Method::POST,
            "/polls",
            Some(json!({ "question": "Q?", "options": options })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "Invalid poll");
    }
}

#[tokio::test]
async fn list_supports_offset_and_skip() {
    let (_, router) = app();
    for i in 0..4 {
        create(&router, &format!("Q{i}"), &["A", "B"]).await;
    }

    let (status, all) = call(&router, Method::GET, "/polls", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 4);

    let (_, page) = call(&router, Method::GET, "/polls?offset=1&limit=2", None).await;
    let questions: Vec<&str> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["question"].as_str().unwrap())
        .collect();
    assert_eq!(questions, vec!["Q1", "Q2"]);

    let (_, skipped) = call(&router, Method::GET, "/polls?skip=3", None).await;
    assert_eq!(skipped[0]["question"], "Q3");
}

#[tokio::test]
async fn unknown_polls_are_not_found() {
    let (_, router) = app();
    for (method, uri) in [
        (Method::GET, "/polls/404"),
        (Method::GET, "/polls/404/stats"),
        (Method::DELETE, "/polls/404"),
    ] {
        let (status, body) = call(&router, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Poll not found");
    }
    let (status, _) = vote(&router, 404, 0).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_the_poll() {
    let (_, router) = app();
    let poll = create(&router, "Temporary?", &["Yes", "No"]).await;
    let uri = format!("/polls/{}", poll["id"]);

    let (status, body) = call(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["deleted_poll_id"], poll["id"]);

    let (status, _) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// Voting and stats
// ===========================================================================

#[tokio::test]
async fn votes_update_tallies_and_stats() {
    let (_, router) = app();
    let poll = create(&router, "Language?", &["Python", "JavaScript"]).await;
    let id = poll["id"].as_i64().unwrap();

    for _ in 0..15 {
        assert_eq!(vote(&router, id, 0).await.0, StatusCode::OK);
    }
    let mut last = Value::Null;
    for _ in 0..23 {
        last = vote(&router, id, 1).await.1;
    }
    assert_eq!(last["votes"], json!([15, 23]));

    let (status, stats) = call(&router, Method::GET, &format!("/polls/{id}/stats"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["poll_id"], json!(id));
    assert_eq!(stats["total_votes"], 38);
    assert_eq!(stats["results"][0]["option"], "Python");
    assert_eq!(stats["results"][0]["percentage"], 39.47);
    assert_eq!(stats["results"][1]["percentage"], 60.53);
}

#[tokio::test]
async fn stats_for_an_unvoted_poll_are_zero() {
    let (_, router) = app();
    let poll = create(&router, "Quiet?", &["A", "B"]).await;
    let uri = format!("/polls/{}/stats", poll["id"]);
    let (_, stats) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(stats["total_votes"], 0);
    assert_eq!(stats["results"][0]["percentage"], 0.0);
}

#[tokio::test]
async fn out_of_range_votes_are_rejected() {
    let (_, router) = app();
    let poll = create(&router, "Pick", &["A", "B"]).await;
    let id = poll["id"].as_i64().unwrap();

    for index in [2, -1] {
        let (status, body) = vote(&router, id, index).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid option index");
    }

    let (_, unchanged) = call(&router, Method::GET, &format!("/polls/{id}"), None).await;
    assert_eq!(unchanged["votes"], json!([0, 0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_http_votes_are_all_counted() {
    let (_, router) = app();
    let poll = create(&router, "Race?", &["A", "B", "C"]).await;
    let id = poll["id"].as_i64().unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { vote(&router, id, 2).await.0 })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    let (_, stored) = call(&router, Method::GET, &format!("/polls/{id}"), None).await;
    assert_eq!(stored["votes"], json!([0, 0, 100]));
}

// ===========================================================================
// Live updates
// ===========================================================================

#[tokio::test]
async fn subscribers_receive_one_update_per_vote() {
    let (state, router) = app();
    let poll = create(&router, "Live?", &["A", "B"]).await;
    let id = poll["id"].as_i64().unwrap();

    let mut subscription = state.registry.subscribe();
    let departed = state.registry.subscribe();
    let departed_handle = departed.handle();
    drop(departed);

    assert_eq!(vote(&router, id, 1).await.0, StatusCode::OK);

    let update = timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("no update within a second")
        .unwrap();
    assert_eq!(update.total_votes, 1);
    assert_eq!(update.poll.id, id);
    assert_eq!(update.poll.votes, vec![0, 1]);

    let extra = timeout(Duration::from_millis(100), subscription.recv()).await;
    assert!(extra.is_err(), "received more than one update for one vote");
    assert!(!state.registry.contains(departed_handle));
    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn rejected_votes_are_not_broadcast() {
    let (state, router) = app();
    let poll = create(&router, "Quiet?", &["A", "B"]).await;
    let mut subscription = state.registry.subscribe();

    vote(&router, poll["id"].as_i64().unwrap(), 9).await;
    vote(&router, 12345, 0).await;

    let nothing = timeout(Duration::from_millis(100), subscription.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn deleting_a_poll_retires_its_dispatcher() {
    let (state, router) = app();
    let poll = create(&router, "Short lived", &["A", "B"]).await;
    let id = poll["id"].as_i64().unwrap();

    vote(&router, id, 0).await;
    assert_eq!(state.dispatcher.active_workers(), 1);

    call(&router, Method::DELETE, &format!("/polls/{id}"), None).await;
    assert_eq!(state.dispatcher.active_workers(), 0);
}

// ===========================================================================
// Server-sent events
// ===========================================================================

#[tokio::test]
async fn poll_events_start_with_a_snapshot_then_follow_that_poll() {
    let (state, router) = app();
    let watched = create(&router, "Watched?", &["A", "B"]).await;
    let other = create(&router, "Other?", &["C", "D"]).await;
    let id = watched["id"].as_i64().unwrap();
    vote(&router, id, 0).await;
    vote(&router, id, 1).await;

    let mut events = open_events(&router, &format!("/polls/{id}/events")).await;
    assert_eq!(state.registry.len(), 1);

    let init = events.next_event().await.unwrap();
    assert_eq!(event_name(&init), "init");
    let snapshot = event_data(&init);
    assert_eq!(snapshot["total_votes"], 2);
    assert_eq!(snapshot["poll"]["votes"], json!([1, 1]));

    vote(&router, other["id"].as_i64().unwrap(), 0).await;
    vote(&router, id, 1).await;

    let update = events.next_event().await.unwrap();
    assert_eq!(event_name(&update), "vote_update");
    let update = event_data(&update);
    assert_eq!(update["type"], "vote_update");
    assert_eq!(update["poll"]["id"], json!(id));
    assert_eq!(update["total_votes"], 3);

    drop(events);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn poll_events_skip_updates_older_than_the_snapshot() {
    let (state, router) = app();
    let poll = create(&router, "Stale?", &["A", "B"]).await;
    let id = poll["id"].as_i64().unwrap();
    vote(&router, id, 0).await;
    let stale = state.store.get(id).await.unwrap();
    vote(&router, id, 0).await;

    let mut events = open_events(&router, &format!("/polls/{id}/events")).await;
    let init = events.next_event().await.unwrap();
    assert_eq!(event_data(&init)["total_votes"], 2);

    state.dispatcher.dispatch(&stale);
    vote(&router, id, 1).await;

    let update = event_data(&events.next_event().await.unwrap());
    assert_eq!(update["total_votes"], 3);
    assert_eq!(update["poll"]["votes"], json!([2, 1]));
}

#[tokio::test]
async fn poll_events_for_a_missing_poll_report_an_error_and_end() {
    let (state, router) = app();

    let mut events = open_events(&router, "/polls/404/events").await;
    let error = events.next_event().await.unwrap();
    assert_eq!(event_name(&error), "error");
    assert_eq!(event_data(&error)["error"], "Poll not found");

    assert!(events.next_event().await.is_none());
    drop(events);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn global_events_carry_every_poll() {
    let (state, router) = app();
    let first = create(&router, "First?", &["A", "B"]).await;
    let second = create(&router, "Second?", &["C", "D"]).await;

    let mut events = open_events(&router, "/events").await;
    assert_eq!(state.registry.len(), 1);

    vote(&router, first["id"].as_i64().unwrap(), 1).await;
    let update = event_data(&events.next_event().await.unwrap());
    assert_eq!(update["poll"]["id"], first["id"]);
    assert_eq!(update["poll"]["votes"], json!([0, 1]));

    vote(&router, second["id"].as_i64().unwrap(), 0).await;
    let update = event_data(&events.next_event().await.unwrap());
    assert_eq!(update["poll"]["id"], second["id"]);
    assert_eq!(update["total_votes"], 1);

    drop(events);
    assert!(state.registry.is_empty());
}

// ===========================================================================
// Service endpoints
// ===========================================================================

#[tokio::test]
async fn init_data_seeds_once() {
    let (_, router) = app();

    let (status, body) = call(&router, Method::POST, "/init-data", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["created_polls"], 3);

    let (_, again) = call(&router, Method::POST, "/init-data", None).await;
    assert_eq!(again["status"], "info");

    let (_, health) = call(&router, Method::GET, "/", None).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["data"]["total_polls"], 3);
}

#[tokio::test]
async fn unknown_routes_fall_through_to_404() {
    let (_, router) = app();
    let (status, _) = call(&router, Method::GET, "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
