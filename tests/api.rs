//! End-to-end tests of the REST surface against an in-memory ledger.

#![allow(clippy::panic)]

use std::sync::Arc;

use chrono::Duration;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

use kwh_ledger::api;
use kwh_ledger::app_state::AppState;
use kwh_ledger::domain::ImpactPolicy;
use kwh_ledger::persistence::{LedgerStore, MemoryLedgerStore};
use kwh_ledger::service::LedgerService;

async fn spawn_server() -> String {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
    let service = LedgerService::new(store, Duration::hours(24), ImpactPolicy::default());
    let app = api::build_router().with_state(AppState {
        ledger_service: Arc::new(service),
    });

    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn send(request: reqwest::RequestBuilder) -> (StatusCode, Value) {
    let Ok(response) = request.send().await else {
        panic!("request failed");
    };
    let status = response.status();
    let Ok(body) = response.json::<Value>().await else {
        panic!("response was not JSON");
    };
    (status, body)
}

fn reading(day: u32, balance: &str) -> Value {
    json!({
        "event_type": "reading",
        "event_date": format!("2024-05-{day:02}T09:00:00Z"),
        "balance_kwh": balance,
    })
}

fn topup(day: u32, purchase: &str, confirm: bool) -> Value {
    json!({
        "event_type": "topup",
        "event_date": format!("2024-05-{day:02}T09:00:00Z"),
        "purchase_kwh": purchase,
        "confirm_cascade": confirm,
    })
}

#[tokio::test]
async fn health_reports_healthy() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let (status, body) = send(client.get(format!("{base}/health"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn backdated_topup_round_trip_with_undo() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let user = Uuid::new_v4();
    let events = format!("{base}/api/v1/users/{user}/events");

    for (day, value) in [(1, "60"), (10, "45"), (11, "30")] {
        let (status, body) = send(client.post(&events).json(&reading(day, value))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = send(client.post(&events).json(&topup(5, "40", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "needs_confirmation");
    assert_eq!(body["impact"]["affected"][0]["after_kwh"], "85");
    assert_eq!(body["impact"]["affected"][1]["after_kwh"], "70");
    assert_eq!(body["impact"]["blocked"], false);

    let (status, body) = send(client.post(&events).json(&topup(5, "40", true))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["event"]["balance_kwh"], "100");
    assert_eq!(body["recalculation"]["trigger_type"], "NEW_BACKDATE_TOPUP");
    let Some(audit_id) = body["recalculation"]["audit_id"].as_str().map(str::to_string) else {
        panic!("no audit id in {body}");
    };

    let balance_url = format!("{base}/api/v1/users/{user}/balance");
    let (_, body) = send(client.get(&balance_url)).await;
    assert_eq!(body["balance_kwh"], "70");

    let (status, body) = send(client.get(format!("{base}/api/v1/users/{user}/recalculations"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let undo = format!("{base}/api/v1/users/{user}/recalculations/{audit_id}/undo");
    let (status, body) = send(client.post(&undo)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["undone_at"].is_string());

    let (_, body) = send(client.get(&balance_url)).await;
    assert_eq!(body["balance_kwh"], "30");

    let (status, body) = send(client.post(&undo)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], 4005);
}

#[tokio::test]
async fn increasing_reading_is_rejected_with_hint() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let events = format!("{base}/api/v1/users/{}/events", Uuid::new_v4());

    let (status, _) = send(client.post(&events).json(&reading(1, "50"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(client.post(&events).json(&reading(2, "60"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], 4001);
    assert_eq!(body["error"]["details"], "re-enter this event as a top-up");
}

#[tokio::test]
async fn duplicate_date_then_replace() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let user = Uuid::new_v4();
    let events = format!("{base}/api/v1/users/{user}/events");

    let (_, first) = send(client.post(&events).json(&reading(1, "50"))).await;

    let (status, body) = send(client.post(&events).json(&reading(1, "45"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["outcome"], "duplicate_date");
    assert_eq!(body["conflict"]["existing"]["event_id"], first["event"]["event_id"]);

    let mut replace = reading(1, "45");
    replace["resolution"] = json!("replace");
    let (status, body) = send(client.post(&events).json(&replace)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["event"]["supersedes"], first["event"]["event_id"]);

    let (_, history) = send(client.get(format!("{events}?include_voided=true"))).await;
    assert_eq!(history["pagination"]["total"], 2);
    let (_, active) = send(client.get(&events)).await;
    assert_eq!(active["pagination"]["total"], 1);
}

#[tokio::test]
async fn edit_and_void_through_the_api() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let user = Uuid::new_v4();
    let events = format!("{base}/api/v1/users/{user}/events");

    send(client.post(&events).json(&reading(1, "50"))).await;
    let (_, created) = send(client.post(&events).json(&reading(2, "40"))).await;
    let Some(event_id) = created["event"]["event_id"].as_str().map(str::to_string) else {
        panic!("no event id in {created}");
    };
    let event_url = format!("{events}/{event_id}");

    let (status, body) = send(client.put(&event_url).json(&json!({ "balance_kwh": "35" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["event"]["balance_kwh"], "35");
    let Some(new_id) = body["event"]["event_id"].as_str().map(str::to_string) else {
        panic!("no event id in {body}");
    };

    let (status, body) = send(client.get(&event_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "voided");
    assert_eq!(body["voided_reason"], "edited");

    let (status, body) = send(client.delete(format!("{events}/{new_id}?reason=typo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["voided_reason"], "typo");

    let (status, body) = send(client.delete(format!("{events}/{new_id}"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 2003);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!(
        "{base}/api/v1/users/{}/events/{}",
        Uuid::new_v4(),
        Uuid::new_v4()
    );
    let (status, body) = send(client.get(url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 2001);
}

#[tokio::test]
async fn live_validation_and_duplicate_check() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let user = Uuid::new_v4();
    let events = format!("{base}/api/v1/users/{user}/events");
    send(client.post(&events).json(&reading(1, "50"))).await;

    let validate = format!("{events}/validate");
    let (status, body) = send(client.post(&validate).json(&json!({
        "event_type": "reading",
        "event_date": "2024-05-02T09:00:00Z",
        "value": "abc",
    })))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "invalid_value");
    assert_eq!(body["blocking"], true);

    let (_, body) = send(client.post(&validate).json(&json!({
        "event_type": "reading",
        "event_date": "2024-05-02T09:00:00Z",
        "value": "30",
    })))
    .await;
    assert_eq!(body["status"], "valid");
    assert_eq!(body["consumption_kwh"], "20");

    let duplicates = format!("{base}/api/v1/users/{user}/duplicates?date=2024-05-01T09:00:00Z");
    let (status, body) = send(client.get(duplicates)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);
}
