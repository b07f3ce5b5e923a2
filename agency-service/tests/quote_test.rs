//! Quote lifecycle and conversion over HTTP.

mod common;

use axum::http::StatusCode;
use common::{dec, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};

async fn set_status(app: &TestApp, id: &str, status: &str) -> (StatusCode, Value) {
    app.post(
        &format!("/api/quotes/{id}/status"),
        json!({ "status": status }),
    )
    .await
}

#[tokio::test]
async fn new_quote_is_a_draft_with_totals() {
    let app = TestApp::spawn();

    let quote = app.create_document("quotes").await;

    assert_eq!(quote["kind"], "quote");
    assert_eq!(quote["status"], "draft");
    assert_eq!(quote["issue_date"], "2026-03-02");
    assert_eq!(dec(&quote["subtotal"]), Decimal::new(200, 0));
    assert_eq!(dec(&quote["tax_amount"]), Decimal::new(44, 0));
    assert_eq!(dec(&quote["total"]), Decimal::new(244, 0));
    assert_eq!(quote["line_items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_line_items_are_rejected() {
    let app = TestApp::spawn();

    let (status, _) = app
        .post(
            "/api/quotes",
            json!({
                "client": { "name": "Rossi" },
                "tax_rate": "0.22",
                "line_items": [{ "description": "Logo", "quantity": "0", "unit_price": "10" }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn editing_recomputes_totals() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    let (status, quote) = app
        .patch(
            &format!("/api/quotes/{id}"),
            json!({
                "tax_rate": "0.10",
                "line_items": [
                    { "description": "Logo", "quantity": "1", "unit_price": "300" },
                    { "description": "Business cards", "quantity": "2", "unit_price": "50" }
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&quote["subtotal"]), Decimal::new(400, 0));
    assert_eq!(dec(&quote["tax_amount"]), Decimal::new(40, 0));
    assert_eq!(dec(&quote["total"]), Decimal::new(440, 0));
    assert_eq!(quote["number"], "ORC-2026-001");
}

#[tokio::test]
async fn status_follows_lifecycle() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    let (status, _) = set_status(&app, id, "accepted").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = set_status(&app, id, "sent").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");

    let (status, body) = set_status(&app, id, "accepted").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (status, _) = set_status(&app, id, "converted").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Accepted quotes are no longer editable.
    let (status, _) = app
        .patch(&format!("/api/quotes/{id}"), json!({ "notes": "late change" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn conversion_creates_pending_invoice_once() {
    let app = TestApp::spawn();
    app.create_document("invoices").await;
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    let (status, invoice) = app
        .post(
            &format!("/api/quotes/{id}/convert"),
            json!({ "due_date": "2026-04-01" }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invoice["kind"], "invoice");
    assert_eq!(invoice["status"], "pending");
    assert_eq!(invoice["number"], "FAT-2026-002");
    assert_eq!(invoice["quote_id"], quote["document_id"]);
    assert_eq!(invoice["client"], quote["client"]);
    assert_eq!(dec(&invoice["total"]), dec(&quote["total"]));
    assert_eq!(invoice["due_date"], "2026-04-01");

    let (_, quote) = app.get(&format!("/api/quotes/{id}")).await;
    assert_eq!(quote["status"], "converted");

    let (status, _) = app
        .request("POST", &format!("/api/quotes/{id}/convert"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, invoices) = app.get("/api/invoices").await;
    assert_eq!(invoices["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn declined_quote_cannot_be_converted() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    set_status(&app, id, "declined").await;
    let (status, _) = app
        .request("POST", &format!("/api/quotes/{id}/convert"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn converted_quote_cannot_be_deleted() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    app.request("POST", &format!("/api/quotes/{id}/convert"), None)
        .await;
    let (status, _) = app.delete(&format!("/api/quotes/{id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleted_quote_is_gone_but_keeps_its_number() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();

    let (status, _) = app.delete(&format!("/api/quotes/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/api/quotes/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let next = app.create_document("quotes").await;
    assert_eq!(next["number"], "ORC-2026-002");
}

#[tokio::test]
async fn list_quotes_filters_by_status() {
    let app = TestApp::spawn();
    let quote = app.create_document("quotes").await;
    app.create_document("quotes").await;
    let id = quote["document_id"].as_str().unwrap();
    set_status(&app, id, "sent").await;

    let (status, body) = app.get("/api/quotes?status=sent").await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["number"], "ORC-2026-001");

    let (status, _) = app.get("/api/quotes?status=paid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
