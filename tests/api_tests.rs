//! API integration tests over the in-process router.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{TOKEN, harness, harness_with, kubernetes_harness};

fn request(
    method: Method,
    uri: &str,
    session: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    if let Some(session) = session {
        builder = builder.header("X-SESSION-ID", session);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn allocate(router: &Router, session: &str, ttl: i64) -> (StatusCode, Value) {
    send(
        router,
        request(
            Method::POST,
            "/ship",
            Some(session),
            Some(json!({"ttl": ttl})),
        ),
    )
    .await
}

#[tokio::test]
async fn health_works_without_auth() {
    let h = harness().await;
    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_endpoints_require_auth() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/ships").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ships")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_scoped_endpoint_requires_session_header() {
    let h = harness().await;
    let (status, body) = send(
        &h.router,
        request(Method::POST, "/ship", None, Some(json!({"ttl": 3600}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("X-SESSION-ID"));
}

#[tokio::test]
async fn allocation_creates_and_then_reuses_the_same_ship() {
    let h = harness().await;

    let (status, first) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-1"),
            Some(json!({"ttl": 3600, "spec": {"cpus": 0.5, "memory": "256m"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "running");
    assert!(first["endpoint"].is_string());
    let expires = chrono::DateTime::parse_from_rfc3339(first["expires_at"].as_str().unwrap())
        .unwrap()
        .with_timezone(&chrono::Utc);
    let delta = (expires - chrono::Utc::now()).num_seconds();
    assert!((3590..=3610).contains(&delta), "expires_at ~ now+3600, got {delta}");

    let (status, second) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-1"),
            Some(json!({"ttl": 3600, "spec": {"cpus": 0.5, "memory": "256m"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(h.driver.create_count(), 1);
}

/// Property 1: concurrent allocations for one session bind exactly one ship.
#[tokio::test]
async fn concurrent_same_session_allocations_converge() {
    let h = harness().await;

    let mut calls = Vec::new();
    for _ in 0..5 {
        let router = h.router.clone();
        calls.push(tokio::spawn(async move {
            send(&router, request(
                Method::POST,
                "/ship",
                Some("s-conc"),
                Some(json!({"ttl": 3600})),
            ))
            .await
        }));
    }

    let mut ids = Vec::new();
    for call in calls {
        let (status, body) = call.await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all calls must return the same ship");
    assert_eq!(h.driver.create_count(), 1);
}

/// Property 2: a pool of N absorbs N claims; the rest are fresh creations.
#[tokio::test]
async fn pool_claims_before_fresh_creation() {
    let h = harness_with(|s| s.warm_pool_enabled = true).await;

    h.service.create_warm_ship().await.unwrap();
    h.service.create_warm_ship().await.unwrap();
    assert_eq!(h.service.ships().count_warm_pool().await.unwrap(), 2);
    assert_eq!(h.driver.create_count(), 2);

    let mut calls = Vec::new();
    for i in 0..3 {
        let router = h.router.clone();
        calls.push(tokio::spawn(async move {
            let session = format!("s-pool-{i}");
            send(&router, request(
                Method::POST,
                "/ship",
                Some(&session),
                Some(json!({"ttl": 3600})),
            ))
            .await
        }));
    }
    for call in calls {
        let (status, _) = call.await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
    }

    // Two pool claims, one fresh container.
    assert_eq!(h.driver.create_count(), 3);
    assert_eq!(h.service.ships().count_warm_pool().await.unwrap(), 0);
}

/// Property 3: cap plus reject policy: the overflow allocation gets 409 and
/// the store holds exactly the cap.
#[tokio::test]
async fn cap_reject_leaves_exactly_max_ships() {
    let h = harness_with(|s| {
        s.max_ship_num = 3;
    })
    .await;

    let mut calls = Vec::new();
    for i in 0..4 {
        let router = h.router.clone();
        calls.push(tokio::spawn(async move {
            let session = format!("s-cap-{i}");
            send(&router, request(
                Method::POST,
                "/ship",
                Some(&session),
                Some(json!({"ttl": 3600})),
            ))
            .await
        }));
    }

    let mut created = 0;
    let mut rejected = 0;
    for call in calls {
        let (status, body) = call.await.unwrap();
        match status {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => {
                rejected += 1;
                assert_eq!(body["code"], "CAPACITY_EXHAUSTED");
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(rejected, 1);
    assert_eq!(h.service.ships().count_active().await.unwrap(), 3);
}

/// Property 4: cap plus wait policy: a blocked allocator unblocks within a
/// second of a slot freeing.
#[tokio::test]
async fn cap_wait_unblocks_on_release() {
    let h = harness_with(|s| {
        s.max_ship_num = 1;
        s.behavior_after_max_ship = bay::config::CapacityPolicy::Wait;
        s.ship_wait_timeout = 10;
    })
    .await;

    let (status, first) = allocate(&h.router, "s-wait-1", 3600).await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_str().unwrap().to_string();

    let router = h.router.clone();
    let waiter = tokio::spawn(async move { allocate(&router, "s-wait-2", 3600).await });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(!waiter.is_finished(), "allocator should be blocked on the cap");

    let (status, _) = send(
        &h.router,
        request(Method::DELETE, &format!("/ship/{first_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) =
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter must unblock within 1s of the release")
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body["id"].as_str().unwrap(), first_id);
}

/// Cap plus wait policy with no release: 504 after the wait deadline.
#[tokio::test]
async fn cap_wait_times_out() {
    let h = harness_with(|s| {
        s.max_ship_num = 1;
        s.behavior_after_max_ship = bay::config::CapacityPolicy::Wait;
        s.ship_wait_timeout = 1;
    })
    .await;

    let (status, _) = allocate(&h.router, "s-full", 3600).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = allocate(&h.router, "s-waiting", 3600).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "WAIT_TIMEOUT");
}

/// Property 5: extend_ttl never shortens the expiry.
#[tokio::test]
async fn extend_ttl_is_monotonic() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-ttl", 3600).await;
    let ship_id = ship["id"].as_str().unwrap();
    let original = ship["expires_at"].as_str().unwrap().to_string();

    let (status, shortened) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/extend-ttl"),
            None,
            Some(json!({"ttl": 10})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shortened["expires_at"].as_str().unwrap(), original);

    let (status, extended) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/extend-ttl"),
            None,
            Some(json!({"ttl": 7200})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let original_ts = chrono::DateTime::parse_from_rfc3339(&original).unwrap();
    let extended_ts =
        chrono::DateTime::parse_from_rfc3339(extended["expires_at"].as_str().unwrap()).unwrap();
    assert!(extended_ts > original_ts);
}

/// Re-acquiring with a shorter ttl never shrinks the session window, so
/// the session and its ship stay in sync.
#[tokio::test]
async fn reacquire_with_shorter_ttl_keeps_session_window() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-mono", 3600).await;
    let original_expiry = ship["expires_at"].as_str().unwrap().to_string();

    let (status, same) = allocate(&h.router, "s-mono", 1).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(same["id"], ship["id"]);
    assert_eq!(same["expires_at"].as_str().unwrap(), original_expiry);

    let (status, session) = send(
        &h.router,
        request(Method::GET, "/sessions/s-mono", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["is_active"], true);
    let session_expiry =
        chrono::DateTime::parse_from_rfc3339(session["expires_at"].as_str().unwrap()).unwrap();
    let remaining = (session_expiry.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_seconds();
    assert!(remaining > 3000, "session window shrank to {remaining}s");
}

/// Property 6: the reaper stops an expired ship and removes its session.
#[tokio::test]
async fn reaper_stops_expired_ships() {
    let h = harness_with(|s| s.reaper_interval = 1).await;
    let reaper = bay::ship::reaper::spawn(h.service.clone(), h.settings.clone());

    let (_, ship) = allocate(&h.router, "s-reap", 1).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    reaper.abort();

    let (status, body) = send(
        &h.router,
        request(Method::GET, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert!(body["endpoint"].is_null());
    assert!(body["expires_at"].is_null());

    let (status, _) = send(
        &h.router,
        request(Method::GET, "/sessions/s-reap", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Property 8 / scenario B: exec round-trips and lands in history verbatim.
#[tokio::test]
async fn exec_roundtrip_records_history() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-exec", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, exec) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/exec"),
            Some("s-exec"),
            Some(json!({"type": "ipython/exec", "payload": {"code": "print(2+2)"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exec["success"], true);
    assert!(exec["data"].to_string().contains('4'));
    assert!(exec["execution_id"].is_string());

    let (status, history) = send(
        &h.router,
        request(Method::GET, "/sessions/s-exec/history", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);
    let entry = &history["entries"][0];
    assert_eq!(entry["exec_type"], "python");
    assert_eq!(entry["code"], "print(2+2)");
    assert_eq!(entry["success"], true);
}

#[tokio::test]
async fn shell_exec_and_last_history() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-shell", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, exec) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/exec"),
            Some("s-shell"),
            Some(json!({"type": "shell/exec", "payload": {"command": "echo hi"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exec["success"], true);
    assert!(exec["data"]["stdout"].as_str().unwrap().contains("hi\n"));

    let (status, last) = send(
        &h.router,
        request(Method::GET, "/sessions/s-shell/history/last", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(last["exec_type"], "shell");
    assert_eq!(last["code"], "echo hi");
    assert_eq!(last["success"], true);
}

/// Exec from a session that is not bound to the ship is refused.
#[tokio::test]
async fn exec_requires_the_binding() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-owner", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/exec"),
            Some("s-intruder"),
            Some(json!({"type": "shell/exec", "payload": {"command": "echo hi"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

/// Scenario C: stop keeps the row; a second stop is 404.
#[tokio::test]
async fn stop_is_soft_and_not_repeatable() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-stop", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &h.router,
        request(Method::DELETE, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &h.router,
        request(Method::GET, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    let (status, _) = send(
        &h.router,
        request(Method::DELETE, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// A stopped ship with data revives on the next allocation for its session.
#[tokio::test]
async fn stopped_ship_is_revived_for_its_session() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-revive", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &h.router,
        request(Method::DELETE, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, revived) = allocate(&h.router, "s-revive", 3600).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(revived["id"].as_str().unwrap(), ship_id);
    assert_eq!(revived["status"], "running");
    assert_eq!(h.driver.create_count(), 2);
}

#[tokio::test]
async fn permanent_delete_removes_ship_and_sessions() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-perm", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &h.router,
        request(
            Method::DELETE,
            &format!("/ship/{ship_id}/permanent"),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &h.router,
        request(Method::GET, &format!("/ship/{ship_id}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &h.router,
        request(Method::GET, "/sessions/s-perm", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Scenario D: the replenisher tops the pool up and refills after a claim.
#[tokio::test]
async fn warm_pool_replenishes() {
    let h = harness_with(|s| {
        s.warm_pool_enabled = true;
        s.warm_pool_min_size = 2;
        s.warm_pool_max_size = 4;
        s.warm_pool_replenish_interval = 1;
    })
    .await;
    let pool = bay::ship::warm_pool::spawn(h.service.clone(), h.settings.clone());

    tokio::time::sleep(std::time::Duration::from_millis(1800)).await;
    assert_eq!(h.service.ships().count_warm_pool().await.unwrap(), 2);

    let (status, _) = allocate(&h.router, "s-warm", 3600).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(h.service.ships().count_warm_pool().await.unwrap(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(1800)).await;
    pool.abort();
    assert_eq!(h.service.ships().count_warm_pool().await.unwrap(), 2);
}

/// Property 7 / scenario E: annotation is idempotent, touches only the
/// metadata fields, and drives the tag filters.
#[tokio::test]
async fn annotate_and_filter_history() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-1", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (_, exec) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/exec"),
            Some("s-1"),
            Some(json!({"type": "shell/exec", "payload": {"command": "echo cleanup"}})),
        ),
    )
    .await;
    let eid = exec["execution_id"].as_str().unwrap().to_string();

    let annotate_body = json!({"tags": "data,cleanup", "notes": "reusable"});
    let (status, first) = send(
        &h.router,
        request(
            Method::PATCH,
            &format!("/sessions/s-1/history/{eid}"),
            None,
            Some(annotate_body.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["tags"], "data,cleanup");
    assert_eq!(first["notes"], "reusable");
    assert_eq!(first["code"], "echo cleanup");

    let (status, second) = send(
        &h.router,
        request(
            Method::PATCH,
            &format!("/sessions/s-1/history/{eid}"),
            None,
            Some(annotate_body),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second, "same body must be idempotent");

    let (status, filtered) = send(
        &h.router,
        request(
            Method::GET,
            "/sessions/s-1/history?tags=cleanup&has_notes=true",
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(filtered["entries"][0]["id"].as_str().unwrap(), eid);
}

/// Property 10: Kubernetes memory-unit guard fires at the Bay boundary.
#[tokio::test]
async fn kubernetes_rejects_docker_memory_units() {
    let h = kubernetes_harness().await;

    let (status, body) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-k8s"),
            Some(json!({"ttl": 3600, "spec": {"memory": "512m"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("Mi") && error.contains("Gi"), "got: {error}");
    assert_eq!(h.driver.create_count(), 0);
}

#[tokio::test]
async fn upload_over_limit_is_rejected() {
    let h = harness_with(|s| s.max_upload_size = 1024).await;
    let (_, ship) = allocate(&h.router, "s-up", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let boundary = "bay-test-boundary";
    let big = "x".repeat(4096);
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n{big}\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"file_path\"\r\n\r\n/home/big\r\n\
         --{boundary}--\r\n"
    );

    let req = Request::builder()
        .uri(format!("/ship/{ship_id}/upload"))
        .method(Method::POST)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header("X-SESSION-ID", "s-up")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&h.router, req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn download_streams_file_content() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-dl", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let response = h
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/ship/{ship_id}/download?file_path=/home/agent/notes.txt"),
            Some("s-dl"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("notes.txt"));
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"mock-file-content");
}

#[tokio::test]
async fn logs_endpoint_returns_tail() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-logs", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &h.router,
        request(
            Method::GET,
            &format!("/ship/logs/{ship_id}?tail=100"),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["logs"].as_str().unwrap().contains("log tail"));
}

#[tokio::test]
async fn stat_reports_counts() {
    let h = harness().await;
    allocate(&h.router, "s-stat-1", 3600).await;
    allocate(&h.router, "s-stat-2", 3600).await;

    let (status, body) = send(&h.router, request(Method::GET, "/stat", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], 2);
    assert_eq!(body["total"], 2);

    let (status, overview) = send(
        &h.router,
        request(Method::GET, "/stat/overview", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["capacity"]["in_use"], 2);
    assert_eq!(overview["sessions"]["total"], 2);
}

#[tokio::test]
async fn session_lifecycle() {
    let h = harness().await;
    allocate(&h.router, "s-life", 3600).await;

    let (status, body) = send(
        &h.router,
        request(Method::GET, "/sessions/s-life", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);

    let (status, body) = send(&h.router, request(Method::GET, "/sessions", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(
        &h.router,
        request(Method::DELETE, "/sessions/s-life", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &h.router,
        request(Method::GET, "/sessions/s-life", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn force_create_bypasses_reuse() {
    let h = harness().await;
    let (_, first) = allocate(&h.router, "s-force", 3600).await;

    let (status, second) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-force"),
            Some(json!({"ttl": 3600, "force_create": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(second["id"], first["id"]);
    assert_eq!(h.driver.create_count(), 2);
}

#[tokio::test]
async fn start_recovers_a_stopped_ship() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-start", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    send(
        &h.router,
        request(Method::DELETE, &format!("/ship/{ship_id}"), None, None),
    )
    .await;

    let (status, body) = send(
        &h.router,
        request(
            Method::POST,
            &format!("/ship/{ship_id}/start"),
            Some("s-start"),
            Some(json!({"ttl": 1800})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["endpoint"].is_string());
}

/// A dead container behind a "running" ship is detected and the ship is
/// revived from its data volume on the next allocation.
#[tokio::test]
async fn dead_container_triggers_revival() {
    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-dead", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();
    let container_id = ship["container_id"].as_str().unwrap().to_string();

    h.driver.mark_dead(&container_id).await;

    let (status, revived) = allocate(&h.router, "s-dead", 3600).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(revived["id"].as_str().unwrap(), ship_id);
    assert_eq!(revived["status"], "running");
    assert_eq!(h.driver.create_count(), 2);
}

/// Scenario F: terminal WebSocket proxy forwards frames both ways,
/// including resize control messages.
#[tokio::test]
async fn terminal_proxy_round_trip() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-term", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = h.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    let url = format!(
        "ws://{addr}/ship/{ship_id}/term?token={TOKEN}&session_id=s-term&cols=80&rows=24"
    );
    let (mut ws, response) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::Text(
        r#"{"type":"resize","cols":120,"rows":40}"#.into(),
    ))
    .await
    .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert!(reply.to_text().unwrap().contains("120x40"), "got {reply:?}");

    ws.send(Message::Text("ls -la".into())).await.unwrap();
    let echo = ws.next().await.unwrap().unwrap();
    assert_eq!(echo.to_text().unwrap(), "ls -la");
}

/// Terminal auth failures surface as WebSocket close codes.
#[tokio::test]
async fn terminal_close_codes() {
    use futures::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let h = harness().await;
    let (_, ship) = allocate(&h.router, "s-term2", 3600).await;
    let ship_id = ship["id"].as_str().unwrap().to_string();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = h.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    // Bad token -> 4001.
    let url =
        format!("ws://{addr}/ship/{ship_id}/term?token=wrong&session_id=s-term2&cols=80&rows=24");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4001),
        other => panic!("expected close frame, got {other:?}"),
    }

    // Missing session -> 4003.
    let url = format!("ws://{addr}/ship/{ship_id}/term?token={TOKEN}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4003),
        other => panic!("expected close frame, got {other:?}"),
    }

    // Unknown ship -> 4004.
    let url = format!("ws://{addr}/ship/no-such-ship/term?token={TOKEN}&session_id=s-term2");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4004),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_spec_is_rejected() {
    let h = harness().await;

    let (status, _) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-bad"),
            Some(json!({"ttl": 0})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.router,
        request(
            Method::POST,
            "/ship",
            Some("s-bad"),
            Some(json!({"ttl": 3600, "bogus": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
