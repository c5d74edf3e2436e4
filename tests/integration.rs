use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dispatch_broker::api::rest::router;
use dispatch_broker::config::Config;
use dispatch_broker::engine::distributor::run_distributor;
use dispatch_broker::engine::resolver::{self, run_reject_sweeper};
use dispatch_broker::models::offer::OfferStatus;
use dispatch_broker::state::AppState;
use dispatch_broker::store::OrderStore;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        db_path: String::new(),
        broadcast_queue_size: 1024,
        sweep_queue_size: 1024,
        poll_interval_secs: 30,
        broadcast_radius_km: 0.0,
    }
}

/// Router plus a handle on the shared state, with the distributor and
/// reject sweeper running.
fn setup() -> (Arc<AppState>, Router) {
    let store = OrderStore::open_in_memory().unwrap();
    let (state, broadcast_rx, sweep_rx) = AppState::new(store, &test_config());
    let shared = Arc::new(state);

    tokio::spawn(run_distributor(shared.clone(), broadcast_rx));
    tokio::spawn(run_reject_sweeper(shared.clone(), sweep_rx));

    (shared.clone(), router(shared))
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn register_driver(app: &Router, seed: u128) -> String {
    let driver_id = Uuid::from_u128(seed).to_string();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    driver_id
}

async fn create_order(app: &Router) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "pickup": { "lat": 52.51, "lng": 13.39 },
                "dropoff": { "lat": 52.54, "lng": 13.42 },
                "total": "18.50",
                "priority": "Normal"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order = body_json(res).await;
    order["id"].as_str().unwrap().to_string()
}

async fn settle() {
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
}

#[tokio::test]
async fn health_returns_ok() {
    let (_state, app) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drivers_online"], 0);
    assert_eq!(body["pending_pool"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (_state, app) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("orders_awaiting_broadcast"));
    assert!(body.contains("drivers_online"));
}

#[tokio::test]
async fn register_driver_starts_online() {
    let (_state, app) = setup();
    let response = app
        .oneshot(json_request("POST", "/drivers", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["online"], true);
    assert!(body["driver_id"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn set_online_toggles_and_upserts() {
    let (_state, app) = setup();
    let driver_id = register_driver(&app, 1).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{driver_id}/online"),
            json!({ "online": false }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["online"], false);

    // Toggling an unknown driver registers it.
    let unknown = Uuid::from_u128(42);
    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{unknown}/online"),
            json!({ "online": true }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["online"], true);
}

#[tokio::test]
async fn create_order_returns_pending() {
    let (_state, app) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "pickup": { "lat": 52.51, "lng": 13.39 },
                "dropoff": { "lat": 52.54, "lng": 13.42 },
                "total": "18.50",
                "priority": "Urgent"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "Pending");
    assert!(body["driver_id"].is_null());
    assert_eq!(body["total"], "18.50");
}

#[tokio::test]
async fn negative_total_returns_400() {
    let (_state, app) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "pickup": { "lat": 52.51, "lng": 13.39 },
                "dropoff": { "lat": 52.54, "lng": 13.42 },
                "total": "-1.00",
                "priority": "Normal"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (_state, app) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broadcast_reaches_online_driver_only() {
    let (_state, app) = setup();
    let online = register_driver(&app, 1).await;
    let offline = register_driver(&app, 2).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{offline}/online"),
            json!({ "online": false }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let order_id = create_order(&app).await;
    settle().await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{online}/offers")))
        .await
        .unwrap();
    let offers = body_json(res).await;
    assert_eq!(offers.as_array().unwrap().len(), 1);
    assert_eq!(offers[0]["order_id"], order_id);

    let res = app
        .oneshot(get_request(&format!("/drivers/{offline}/offers")))
        .await
        .unwrap();
    let offers = body_json(res).await;
    assert_eq!(offers.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn accept_binds_winner_and_rejects_loser_offer() {
    let (state, app) = setup();
    let winner = register_driver(&app, 1).await;
    let loser = register_driver(&app, 2).await;

    let order_id = create_order(&app).await;
    settle().await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": winner }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "Assigned");
    assert_eq!(body["driver_id"], winner);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": loser }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Winner retry stays successful and leaves the binding unchanged.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": winner }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["driver_id"], winner);

    // The sweeper rejects the loser's pending offer.
    settle().await;
    let offers = state
        .store
        .offers_for_order(order_id.parse().unwrap())
        .unwrap();
    let loser_id: Uuid = loser.parse().unwrap();
    assert!(offers
        .iter()
        .filter(|offer| offer.driver_id == loser_id)
        .all(|offer| offer.status == OfferStatus::Rejected));
    assert_eq!(
        offers
            .iter()
            .filter(|offer| offer.status == OfferStatus::Accepted)
            .count(),
        1
    );
}

#[tokio::test]
async fn concurrent_accepts_have_exactly_one_winner() {
    let (state, app) = setup();
    for seed in 1..=8u128 {
        register_driver(&app, seed).await;
    }
    let order_id: Uuid = create_order(&app).await.parse().unwrap();
    settle().await;

    let mut handles = Vec::new();
    for seed in 1..=8u128 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            resolver::accept(&state, order_id, Uuid::from_u128(seed))
                .await
                .is_ok()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let order = state.store.get_order(order_id).unwrap().unwrap();
    assert!(order.driver_id.is_some());
}

#[tokio::test]
async fn reject_never_blocks_other_drivers() {
    let (_state, app) = setup();
    let rejecting = register_driver(&app, 1).await;
    let accepting = register_driver(&app, 2).await;

    let order_id = create_order(&app).await;
    settle().await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/reject"),
            json!({ "driver_id": rejecting }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": accepting }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["driver_id"], accepting);
}

#[tokio::test]
async fn unbroadcast_order_is_claimable_from_pending_pool() {
    let (_state, app) = setup();

    // No drivers online at distribution time.
    let order_id = create_order(&app).await;
    settle().await;

    let res = app.clone().oneshot(get_request("/orders/pending")).await.unwrap();
    let pool = body_json(res).await;
    assert_eq!(pool.as_array().unwrap().len(), 1);
    assert_eq!(pool[0]["id"], order_id);

    let driver_id = register_driver(&app, 3).await;
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/claim"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["driver_id"], driver_id);

    // Claimed orders leave the pool.
    let res = app.oneshot(get_request("/orders/pending")).await.unwrap();
    let pool = body_json(res).await;
    assert_eq!(pool.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn claim_missing_or_terminal_order_returns_404() {
    let (_state, app) = setup();
    let driver_id = register_driver(&app, 1).await;

    let fake_id = "00000000-0000-0000-0000-000000000001";
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{fake_id}/claim"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let order_id = create_order(&app).await;
    let res = app
        .clone()
        .oneshot(json_request("POST", &format!("/orders/{order_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/claim"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_updates_follow_the_lifecycle() {
    let (_state, app) = setup();
    let driver_id = register_driver(&app, 1).await;
    let stranger = register_driver(&app, 2).await;

    let order_id = create_order(&app).await;
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/claim"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Wrong driver.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/status"),
            json!({ "driver_id": stranger, "status": "PickedUp" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Skipping PickedUp.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/status"),
            json!({ "driver_id": driver_id, "status": "InTransit" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    for status in ["PickedUp", "InTransit", "Delivered"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/orders/{order_id}/status"),
                json!({ "driver_id": driver_id, "status": status }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "transition to {status}");
    }

    // Terminal orders are frozen, backward moves included.
    for status in ["Assigned", "InTransit", "Cancelled"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/orders/{order_id}/status"),
                json!({ "driver_id": driver_id, "status": status }),
            ))
            .await
            .unwrap();
        assert_eq!(
            res.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "transition to {status}"
        );
    }
}

#[tokio::test]
async fn rebroadcast_is_idempotent_and_conflicts_once_claimed() {
    let (_state, app) = setup();
    let driver_id = register_driver(&app, 1).await;

    let order_id = create_order(&app).await;
    settle().await;

    let res = app
        .clone()
        .oneshot(json_request("POST", &format!("/orders/{order_id}/broadcast"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["offers_created"], 0);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request("POST", &format!("/orders/{order_id}/broadcast"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delivered_order_keeps_binding_and_leaves_terminal_state_frozen() {
    let (state, app) = setup();
    let driver_id = register_driver(&app, 1).await;
    let order_id = create_order(&app).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/claim"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for status in ["PickedUp", "InTransit", "Delivered"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/orders/{order_id}/status"),
                json!({ "driver_id": driver_id, "status": status }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let order = state
        .store
        .get_order(order_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(order.driver_id, Some(driver_id.parse().unwrap()));

    // Operator cancel cannot thaw a delivered order.
    let res = app
        .oneshot(json_request("POST", &format!("/orders/{order_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
