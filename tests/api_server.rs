// tests/api_server.rs
//! HTTP API tests driven through the router with `oneshot`.

use anoncreds_system::config::Settings;
use anoncreds_system::models::credential::CredentialValues;
use anoncreds_system::wallet::sqlite::{SqliteStorageType, SQLITE_STORAGE_TYPE};
use anoncreds_system::{ApiServer, BlobStorageService, WalletService};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const ISSUER_DID: &str = "NcYxiDXkpYi6ov5FcYDi1e";

fn app() -> (Router, TempDir) {
    let tails_dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::from_file("does-not-exist").unwrap();
    settings.blob_storage.base_dir = tails_dir.path().to_string_lossy().into_owned();
    settings.server.max_body_bytes = 256 * 1024;

    let wallets = WalletService::new();
    wallets
        .register_storage_type(
            SQLITE_STORAGE_TYPE,
            Arc::new(SqliteStorageType::new(tails_dir.path().join("wallets"))),
        )
        .unwrap();

    let server = ApiServer::new(&settings, Arc::new(wallets), Arc::new(BlobStorageService::new()));
    (server.router(), tails_dir)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|body| body.to_string()).unwrap_or_default();
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn open_wallet(app: &Router, id: &str) -> u64 {
    let config = json!({ "config": { "id": id } });
    let (status, _) = call(app, "POST", "/wallets", Some(config.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(app, "POST", "/wallets/open", Some(config)).await;
    assert_eq!(status, StatusCode::OK);
    body["wallet_handle"].as_u64().unwrap()
}

#[tokio::test]
async fn test_wallet_errors_carry_codes() {
    let (app, _dir) = app();
    open_wallet(&app, "w1").await;

    let (status, body) = call(&app, "POST", "/wallets", Some(json!({ "config": { "id": "w1" } }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], 203);

    let (status, body) = call(
        &app,
        "POST",
        "/wallets/99/prover/master-secrets",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 200);
    assert!(body["message"].as_str().unwrap().contains("wallet"));

    let (status, body) = call(&app, "POST", "/prover/credential-searches/12345/fetch", Some(json!({ "count": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 100);
}

#[tokio::test]
async fn test_export_and_import_wallet() {
    let (app, dir) = app();
    let handle = open_wallet(&app, "exported").await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/master-secrets", handle),
        Some(json!({ "master_secret_id": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let path = dir.path().join("exported.json").to_string_lossy().into_owned();
    let (status, body) = call(&app, "POST", &format!("/wallets/{}/export", handle), Some(json!({ "path": path }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], 1);

    let import = json!({ "config": { "id": "imported" }, "path": path });
    let (status, body) = call(&app, "POST", "/wallets/import", Some(import.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], 1);
    let (status, body) = call(&app, "POST", "/wallets/import", Some(import)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], 203);

    let (status, body) = call(&app, "POST", "/wallets/open", Some(json!({ "config": { "id": "imported" } }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/master-secrets", body["wallet_handle"]),
        Some(json!({ "master_secret_id": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], 404);
}

#[tokio::test]
async fn test_schema_validation_errors() {
    let (app, _dir) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/issuer/schemas",
        Some(json!({ "issuer_did": "not-a-did!", "name": "gvt", "version": "1.0", "attr_names": ["name"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 113);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (app, _dir) = app();
    let padding = "x".repeat(512 * 1024);
    let (status, _) = call(
        &app,
        "POST",
        "/issuer/schemas",
        Some(json!({ "issuer_did": ISSUER_DID, "name": padding, "version": "1.0", "attr_names": ["name"] })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_issue_store_prove_verify_over_http() {
    let (app, _dir) = app();
    let issuer = open_wallet(&app, "issuer").await;
    let prover = open_wallet(&app, "prover").await;

    let (status, body) = call(
        &app,
        "POST",
        "/issuer/schemas",
        Some(json!({ "issuer_did": ISSUER_DID, "name": "degree", "version": "1.0", "attr_names": ["name", "age"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let schema_id = body["schema_id"].as_str().unwrap().to_string();
    let schema = body["schema"].clone();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/issuer/credential-definitions", issuer),
        Some(json!({ "issuer_did": ISSUER_DID, "schema": schema, "tag": "tag1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let cred_def_id = body["cred_def_id"].as_str().unwrap().to_string();
    let cred_def = body["cred_def"].clone();

    let (status, offer) = call(
        &app,
        "POST",
        &format!("/wallets/{}/issuer/credential-offers", issuer),
        Some(json!({ "cred_def_id": cred_def_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/master-secrets", prover),
        Some(json!({ "master_secret_id": "ms" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["master_secret_id"], "ms");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/credential-requests", prover),
        Some(json!({
            "prover_did": "did:sov:VsKV7grR1BUE29mG2Fm2kX",
            "offer": offer,
            "cred_def": cred_def,
            "master_secret_id": "ms",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let request = body["request"].clone();
    let metadata = body["metadata"].clone();

    let values: CredentialValues = [("name", "Alice"), ("age", "28")].into_iter().collect();
    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/issuer/credentials", issuer),
        Some(json!({ "offer": offer, "request": request, "values": values })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["cred_rev_id"].is_null());
    let credential = body["credential"].clone();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/credentials", prover),
        Some(json!({ "cred_id": "cred1", "metadata": metadata, "credential": credential, "cred_def": cred_def })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cred_id"], "cred1");

    let (status, info) = call(&app, "GET", &format!("/wallets/{}/prover/credentials/cred1", prover), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["attrs"]["name"], "Alice");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/credential-searches", prover),
        Some(json!({ "query": { "schema_name": "degree" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    let search = body["search_handle"].as_u64().unwrap();
    let (status, body) = call(
        &app,
        "POST",
        &format!("/prover/credential-searches/{}/fetch", search),
        Some(json!({ "count": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["referent"], "cred1");
    let (status, _) = call(&app, "DELETE", &format!("/prover/credential-searches/{}", search), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/verifier/nonce", None).await;
    assert_eq!(status, StatusCode::OK);
    let proof_request = json!({
        "name": "age check",
        "version": "1.0",
        "nonce": body["nonce"],
        "requested_attributes": { "attr1_referent": { "name": "name" } },
        "requested_predicates": { "predicate1_referent": { "name": "age", "p_type": ">=", "p_value": 18 } }
    });

    let mut schemas = serde_json::Map::new();
    schemas.insert(schema_id, schema);
    let mut cred_defs = serde_json::Map::new();
    cred_defs.insert(cred_def_id, cred_def.clone());
    let (status, proof) = call(
        &app,
        "POST",
        &format!("/wallets/{}/prover/proofs", prover),
        Some(json!({
            "proof_request": proof_request,
            "requested_credentials": {
                "requested_attributes": { "attr1_referent": { "cred_id": "cred1", "revealed": true } },
                "requested_predicates": { "predicate1_referent": { "cred_id": "cred1" } }
            },
            "master_secret_id": "ms",
            "schemas": schemas,
            "cred_defs": cred_defs,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proof["requested_proof"]["revealed_attrs"]["attr1_referent"]["raw"], "Alice");

    let (status, body) = call(
        &app,
        "POST",
        "/verifier/proofs/verify",
        Some(json!({
            "proof_request": proof_request,
            "proof": proof,
            "schemas": schemas,
            "cred_defs": cred_defs,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (status, _) = call(&app, "DELETE", &format!("/wallets/{}/prover/credentials/cred1", prover), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", &format!("/wallets/{}/prover/credentials/cred1", prover), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 212);
}
