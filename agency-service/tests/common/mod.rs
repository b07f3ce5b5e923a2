//! Shared harness for the HTTP integration tests.
#![allow(dead_code)]

use agency_service::config::AgencyConfig;
use agency_service::numbering::{NumberAllocator, RetryingAllocator, SequenceAllocator};
use agency_service::services::{DocumentService, FixedClock, MemoryStore};
use agency_service::startup::{build_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<DocumentService>,
}

impl TestApp {
    /// In-memory app on the sequence strategy with the clock at 2026-03-02.
    pub fn spawn() -> Self {
        let store = Arc::new(MemoryStore::new());
        let allocator = Arc::new(SequenceAllocator::new(store.clone()));
        Self::with_allocator(store, allocator)
    }

    /// In-memory app on the retry strategy.
    pub fn spawn_retrying() -> Self {
        let store = Arc::new(MemoryStore::new());
        let allocator = Arc::new(
            RetryingAllocator::new(store.clone()).with_retry_delay(Duration::from_millis(1)),
        );
        Self::with_allocator(store, allocator)
    }

    pub fn with_allocator(store: Arc<MemoryStore>, allocator: Arc<dyn NumberAllocator>) -> Self {
        let clock = Arc::new(FixedClock::at_date(date(2026, 3, 2)));
        let service = Arc::new(DocumentService::new(
            store.clone(),
            allocator,
            clock.clone(),
        ));
        let state = AppState {
            config: AgencyConfig::in_memory(),
            service: service.clone(),
        };

        Self {
            router: build_router(state),
            store,
            clock,
            service,
        }
    }

    pub async fn request(
        &self,
        method: &str,
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

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    /// GET a non-JSON body such as `/metrics`.
    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("PATCH", uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request("DELETE", uri, None).await
    }

    pub async fn create_client(&self, name: &str) -> String {
        let (status, body) = self
            .post(
                "/api/clients",
                json!({ "name": name, "email": "billing@example.com", "tax_id": "IT01234567890" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["client_id"].as_str().unwrap().to_string()
    }

    /// Create a quote or an invoice with one 2 × 100.00 line at 22% tax.
    pub async fn create_document(&self, kind: &str) -> Value {
        let (status, body) = self.post(&format!("/api/{kind}"), document_body()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn document_body() -> Value {
    json!({
        "client": { "name": "Rossi & Figli", "email": "amministrazione@rossi.example" },
        "due_date": "2026-03-31",
        "tax_rate": "0.22",
        "line_items": [
            { "description": "Brand identity", "quantity": "2", "unit_price": "100.00" }
        ]
    })
}

/// Parse a decimal field, whatever its JSON representation.
pub fn dec(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}
