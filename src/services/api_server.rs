// src/services/api_server.rs
//! REST API over the anoncreds services.
//!
//! Built with Axum. Endpoints are grouped by role:
//! - wallet lifecycle and blob storage handles
//! - issuer: schemas, credential definitions, revocation registries, issuance, revocation
//! - prover: master secrets, requests, credential storage and search, proofs, revocation states
//! - verifier: nonces and proof verification
//!
//! Wallet, blob and search handles cross the wire as integers. Failures are
//! returned as `{"error_code": <code>, "message": "..."}` with an HTTP status
//! derived from the error class.

use crate::config::{BlobStorageSettings, Settings};
use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::{
    Credential, CredentialAttrTagPolicy, CredentialOffer, CredentialRequest, CredentialRequestMetadata,
    CredentialValues,
};
use crate::models::credential_definition::{CredentialDefinition, CredentialDefinitionConfig};
use crate::models::proof::{Proof, RequestedCredentials};
use crate::models::proof_request::ProofRequest;
use crate::models::revocation::{
    RevocationRegistryConfig, RevocationRegistryDefinition, RevocationRegistryDelta, RevocationState,
};
use crate::models::schema::{AttributeNames, Schema};
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::prover::Prover;
use crate::services::verifier::Verifier;
use crate::storage::BlobStorageService;
use crate::utils::handles::Handle;
use crate::wallet::query::Query;
use crate::wallet::{Wallet, WalletConfig, WalletService};
use crate::zkp::proof_generation::RevocationStates;
use crate::zkp::proof_verification::RevocationRegistries;
use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

// =====================
// Error responses
// =====================

/// An [`AnoncredsError`] rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(AnoncredsError);

impl From<AnoncredsError> for ApiError {
    fn from(err: AnoncredsError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AnoncredsError::InvalidParam(..)
            | AnoncredsError::InvalidStructure(_)
            | AnoncredsError::WalletQuery(_)
            | AnoncredsError::WalletUnknownType(_)
            | AnoncredsError::UnknownCryptoType(_) => StatusCode::BAD_REQUEST,
            AnoncredsError::WalletInvalidHandle
            | AnoncredsError::WalletNotFound(_)
            | AnoncredsError::WalletItemNotFound(_) => StatusCode::NOT_FOUND,
            AnoncredsError::WalletAlreadyExists(_)
            | AnoncredsError::WalletAlreadyOpened(_)
            | AnoncredsError::WalletItemAlreadyExists(_)
            | AnoncredsError::WalletTypeAlreadyRegistered(_)
            | AnoncredsError::MasterSecretDuplicateName(_)
            | AnoncredsError::CredDefAlreadyExists(_) => StatusCode::CONFLICT,
            AnoncredsError::RevocationRegistryFull(_)
            | AnoncredsError::InvalidUserRevocId(_)
            | AnoncredsError::AccumulatorIsFull(_)
            | AnoncredsError::NotIssued(_)
            | AnoncredsError::ProofRejected(_)
            | AnoncredsError::CredentialRevoked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AnoncredsError::InvalidState(_) | AnoncredsError::IOError(_) | AnoncredsError::WalletStorage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_fatal() {
            error!("API request failed: {}", self.0);
        }
        let body = json!({
            "error_code": self.0.code().as_i32(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn respond<T: serde::Serialize>(value: T) -> ApiResult {
    Ok(Json(serde_json::to_value(value).map_err(AnoncredsError::from)?))
}

// =====================
// Request payloads
// =====================

#[derive(Deserialize)]
struct WalletConfigRequest {
    config: WalletConfig,
}

#[derive(Deserialize)]
struct ExportWalletRequest {
    path: String,
}

#[derive(Deserialize)]
struct ImportWalletRequest {
    config: WalletConfig,
    path: String,
}

#[derive(Deserialize)]
struct OpenBlobRequest {
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Deserialize)]
struct CreateSchemaRequest {
    issuer_did: String,
    name: String,
    version: String,
    attr_names: AttributeNames,
}

#[derive(Deserialize)]
struct CreateCredDefRequest {
    issuer_did: String,
    schema: Schema,
    tag: String,
    #[serde(default)]
    signature_type: Option<String>,
    #[serde(default)]
    config: CredentialDefinitionConfig,
}

#[derive(Deserialize)]
struct RotateCredDefRequest {
    cred_def_id: String,
    #[serde(default)]
    config: Option<CredentialDefinitionConfig>,
}

#[derive(Deserialize)]
struct CreateRevRegRequest {
    issuer_did: String,
    #[serde(default)]
    revoc_def_type: Option<String>,
    tag: String,
    cred_def_id: String,
    #[serde(default)]
    config: RevocationRegistryConfig,
    /// Writer to put the tails file through; the configured default when absent.
    #[serde(default)]
    tails_writer_handle: Option<u64>,
}

#[derive(Deserialize)]
struct CredDefIdRequest {
    cred_def_id: String,
}

#[derive(Deserialize)]
struct CreateCredentialRequest {
    offer: CredentialOffer,
    request: CredentialRequest,
    values: CredentialValues,
    #[serde(default)]
    rev_reg_id: Option<String>,
    #[serde(default)]
    tails_reader_handle: Option<u64>,
}

#[derive(Deserialize)]
struct RevokeRequest {
    tails_reader_handle: u64,
    rev_reg_id: String,
    cred_rev_id: String,
}

#[derive(Deserialize)]
struct MergeDeltasRequest {
    rev_reg_delta: RevocationRegistryDelta,
    other_rev_reg_delta: RevocationRegistryDelta,
}

#[derive(Deserialize)]
struct CreateMasterSecretRequest {
    #[serde(default)]
    master_secret_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateCredReqRequest {
    prover_did: String,
    offer: CredentialOffer,
    cred_def: CredentialDefinition,
    master_secret_id: String,
}

#[derive(Deserialize)]
struct StoreCredentialRequest {
    #[serde(default)]
    cred_id: Option<String>,
    metadata: CredentialRequestMetadata,
    credential: Credential,
    cred_def: CredentialDefinition,
    #[serde(default)]
    rev_reg_def: Option<RevocationRegistryDefinition>,
}

#[derive(Deserialize)]
struct SearchCredentialsRequest {
    #[serde(default)]
    query: Query,
}

#[derive(Deserialize)]
struct FetchRequest {
    count: usize,
}

#[derive(Deserialize)]
struct SearchForProofReqRequest {
    proof_request: ProofRequest,
    #[serde(default)]
    extra_query: Option<HashMap<String, Query>>,
}

#[derive(Deserialize)]
struct FetchForProofReqRequest {
    item_referent: String,
    count: usize,
}

#[derive(Deserialize)]
struct CreateProofRequest {
    proof_request: ProofRequest,
    requested_credentials: RequestedCredentials,
    master_secret_id: String,
    #[serde(default)]
    schemas: HashMap<String, Schema>,
    #[serde(default)]
    cred_defs: HashMap<String, CredentialDefinition>,
    #[serde(default)]
    rev_states: RevocationStates,
}

#[derive(Deserialize)]
struct TagPolicyRequest {
    #[serde(default)]
    policy: CredentialAttrTagPolicy,
    #[serde(default)]
    retroactive: bool,
}

#[derive(Deserialize)]
struct CreateRevStateRequest {
    tails_reader_handle: u64,
    rev_reg_def: RevocationRegistryDefinition,
    rev_reg_delta: RevocationRegistryDelta,
    /// Defaults to the current time.
    #[serde(default)]
    timestamp: Option<u64>,
    cred_rev_id: String,
}

#[derive(Deserialize)]
struct UpdateRevStateRequest {
    tails_reader_handle: u64,
    rev_state: RevocationState,
    rev_reg_def: RevocationRegistryDefinition,
    rev_reg_delta: RevocationRegistryDelta,
    #[serde(default)]
    timestamp: Option<u64>,
    cred_rev_id: String,
}

#[derive(Deserialize)]
struct VerifyProofRequest {
    proof_request: ProofRequest,
    proof: Proof,
    #[serde(default)]
    schemas: HashMap<String, Schema>,
    #[serde(default)]
    cred_defs: HashMap<String, CredentialDefinition>,
    #[serde(default)]
    rev_reg_defs: HashMap<String, RevocationRegistryDefinition>,
    #[serde(default)]
    rev_regs: RevocationRegistries,
}

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiServer {
    wallets: Arc<WalletService>,
    blob_storage: Arc<BlobStorageService>,
    issuer: Arc<CredentialIssuer>,
    prover: Arc<Prover>,
    verifier: Arc<Verifier>,
    blob_defaults: BlobStorageSettings,
    wallet_storage_type: String,
    max_body_bytes: usize,
}

impl ApiServer {
    /// Creates the API server over the given wallet and blob services.
    ///
    /// # Arguments
    /// * `settings` - Body limit and blob storage defaults
    /// * `wallets` - Wallet registry shared with embedding code
    /// * `blob_storage` - Blob storage with any extra backends already registered
    pub fn new(settings: &Settings, wallets: Arc<WalletService>, blob_storage: Arc<BlobStorageService>) -> Self {
        ApiServer {
            issuer: Arc::new(CredentialIssuer::new(blob_storage.clone())),
            prover: Arc::new(Prover::new(blob_storage.clone())),
            verifier: Arc::new(Verifier::new()),
            wallets,
            blob_storage,
            blob_defaults: settings.blob_storage.clone(),
            wallet_storage_type: settings.wallet.storage_type.clone(),
            max_body_bytes: settings.server.max_body_bytes,
        }
    }

    /// Builds the router with every endpoint and the body size limit.
    pub fn router(self) -> Router {
        let max_body_bytes = self.max_body_bytes;
        Router::new()
            // Wallets and blob storage
            .route("/wallets", post(Self::create_wallet_handler))
            .route("/wallets/open", post(Self::open_wallet_handler))
            .route("/wallets/delete", post(Self::delete_wallet_handler))
            .route("/wallets/:wallet_handle/close", post(Self::close_wallet_handler))
            .route("/wallets/:wallet_handle/export", post(Self::export_wallet_handler))
            .route("/wallets/import", post(Self::import_wallet_handler))
            .route("/blob-storage/writers", post(Self::open_blob_writer_handler))
            .route("/blob-storage/writers/:handle", delete(Self::close_blob_writer_handler))
            .route("/blob-storage/readers", post(Self::open_blob_reader_handler))
            .route("/blob-storage/readers/:handle", delete(Self::close_blob_reader_handler))
            // Issuer
            .route("/issuer/schemas", post(Self::create_schema_handler))
            .route("/issuer/deltas/merge", post(Self::merge_deltas_handler))
            .route("/wallets/:wallet_handle/issuer/credential-definitions", post(Self::create_cred_def_handler))
            .route(
                "/wallets/:wallet_handle/issuer/credential-definitions/rotate/start",
                post(Self::rotate_cred_def_start_handler),
            )
            .route(
                "/wallets/:wallet_handle/issuer/credential-definitions/rotate/apply",
                post(Self::rotate_cred_def_apply_handler),
            )
            .route("/wallets/:wallet_handle/issuer/revocation-registries", post(Self::create_rev_reg_handler))
            .route("/wallets/:wallet_handle/issuer/credential-offers", post(Self::create_offer_handler))
            .route("/wallets/:wallet_handle/issuer/credentials", post(Self::create_credential_handler))
            .route("/wallets/:wallet_handle/issuer/revocations", post(Self::revoke_credential_handler))
            // Prover
            .route("/wallets/:wallet_handle/prover/master-secrets", post(Self::create_master_secret_handler))
            .route("/wallets/:wallet_handle/prover/credential-requests", post(Self::create_cred_req_handler))
            .route("/wallets/:wallet_handle/prover/credentials", post(Self::store_credential_handler))
            .route(
                "/wallets/:wallet_handle/prover/credentials/:cred_id",
                get(Self::get_credential_handler).delete(Self::delete_credential_handler),
            )
            .route("/wallets/:wallet_handle/prover/credential-searches", post(Self::search_credentials_handler))
            .route("/prover/credential-searches/:handle/fetch", post(Self::fetch_credentials_handler))
            .route("/prover/credential-searches/:handle", delete(Self::close_credentials_search_handler))
            .route(
                "/wallets/:wallet_handle/prover/proof-request-searches",
                post(Self::search_for_proof_req_handler),
            )
            .route("/prover/proof-request-searches/:handle/fetch", post(Self::fetch_for_proof_req_handler))
            .route("/prover/proof-request-searches/:handle", delete(Self::close_proof_req_search_handler))
            .route("/wallets/:wallet_handle/prover/proofs", post(Self::create_proof_handler))
            .route(
                "/wallets/:wallet_handle/prover/tag-policies/:cred_def_id",
                get(Self::get_tag_policy_handler).put(Self::set_tag_policy_handler),
            )
            .route("/prover/revocation-states", post(Self::create_rev_state_handler))
            .route("/prover/revocation-states/update", post(Self::update_rev_state_handler))
            // Verifier
            .route("/verifier/nonce", get(Self::generate_nonce_handler))
            .route("/verifier/proofs/verify", post(Self::verify_proof_handler))
            .with_state(Arc::new(self))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(max_body_bytes))
    }

    /// Starts the API server and serves until the listener fails.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Anoncreds API listening on {}", addr);
        axum::serve(listener, self.router()).await
    }

    fn wallet(&self, handle: u64) -> AnoncredsResult<Wallet> {
        self.wallets.get_wallet(Handle::from_u64(handle))
    }

    /// Fills in the configured storage type when the request names none.
    fn wallet_config(&self, mut config: WalletConfig) -> WalletConfig {
        if config.storage_type.is_none() {
            config.storage_type = Some(self.wallet_storage_type.clone());
        }
        config
    }

    // =====================
    // Wallet and Blob Storage Handlers
    // =====================

    /// POST /wallets
    async fn create_wallet_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<WalletConfigRequest>,
    ) -> ApiResult {
        state.wallets.create_wallet(&state.wallet_config(payload.config))?;
        respond(json!({}))
    }

    /// POST /wallets/open
    async fn open_wallet_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<WalletConfigRequest>,
    ) -> ApiResult {
        let handle = state.wallets.open_wallet(&state.wallet_config(payload.config))?;
        respond(json!({ "wallet_handle": handle.as_u64() }))
    }

    /// POST /wallets/delete
    async fn delete_wallet_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<WalletConfigRequest>,
    ) -> ApiResult {
        state.wallets.delete_wallet(&state.wallet_config(payload.config))?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/close
    async fn close_wallet_handler(State(state): State<Arc<ApiServer>>, Path(wallet_handle): Path<u64>) -> ApiResult {
        state.wallets.close_wallet(Handle::from_u64(wallet_handle))?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/export
    async fn export_wallet_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<ExportWalletRequest>,
    ) -> ApiResult {
        let count = state
            .wallets
            .export_wallet(Handle::from_u64(wallet_handle), std::path::Path::new(&payload.path))?;
        respond(json!({ "records": count }))
    }

    /// POST /wallets/import
    async fn import_wallet_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<ImportWalletRequest>,
    ) -> ApiResult {
        let config = state.wallet_config(payload.config);
        let count = state.wallets.import_wallet(&config, std::path::Path::new(&payload.path))?;
        respond(json!({ "records": count }))
    }

    fn blob_channel_args(&self, payload: OpenBlobRequest, default_type: &str) -> (String, Value) {
        let type_name = payload.type_name.unwrap_or_else(|| default_type.to_string());
        let config = payload
            .config
            .unwrap_or_else(|| json!({ "base_dir": self.blob_defaults.base_dir }));
        (type_name, config)
    }

    /// POST /blob-storage/writers
    ///
    /// Type and config default to the configured blob storage settings.
    async fn open_blob_writer_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<OpenBlobRequest>,
    ) -> ApiResult {
        let (type_name, config) = state.blob_channel_args(payload, &state.blob_defaults.writer_type);
        let handle = state.blob_storage.open_writer(&type_name, config)?;
        respond(json!({ "handle": handle.as_u64() }))
    }

    /// DELETE /blob-storage/writers/:handle
    async fn close_blob_writer_handler(State(state): State<Arc<ApiServer>>, Path(handle): Path<u64>) -> ApiResult {
        state.blob_storage.close_writer(Handle::from_u64(handle))?;
        respond(json!({}))
    }

    /// POST /blob-storage/readers
    async fn open_blob_reader_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<OpenBlobRequest>,
    ) -> ApiResult {
        let (type_name, config) = state.blob_channel_args(payload, &state.blob_defaults.reader_type);
        let handle = state.blob_storage.open_reader(&type_name, config)?;
        respond(json!({ "handle": handle.as_u64() }))
    }

    /// DELETE /blob-storage/readers/:handle
    async fn close_blob_reader_handler(State(state): State<Arc<ApiServer>>, Path(handle): Path<u64>) -> ApiResult {
        state.blob_storage.close_reader(Handle::from_u64(handle))?;
        respond(json!({}))
    }

    // =====================
    // Issuer Handlers
    // =====================

    /// POST /issuer/schemas
    ///
    /// # Responses
    /// - 200 OK: `{"schema_id", "schema"}`
    /// - 400 Bad Request: invalid DID or attribute list
    async fn create_schema_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<CreateSchemaRequest>,
    ) -> ApiResult {
        let (schema_id, schema) =
            state
                .issuer
                .create_schema(&payload.issuer_did, &payload.name, &payload.version, payload.attr_names)?;
        respond(json!({ "schema_id": schema_id, "schema": schema }))
    }

    /// POST /wallets/:wallet_handle/issuer/credential-definitions
    ///
    /// # Responses
    /// - 200 OK: `{"cred_def_id", "cred_def"}`
    /// - 409 Conflict: the credential definition already exists
    async fn create_cred_def_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateCredDefRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let (cred_def_id, cred_def) = state
            .issuer
            .create_and_store_credential_def(
                &wallet,
                &payload.issuer_did,
                &payload.schema,
                &payload.tag,
                payload.signature_type.as_deref(),
                &payload.config,
            )
            .await?;
        respond(json!({ "cred_def_id": cred_def_id, "cred_def": cred_def }))
    }

    /// POST /wallets/:wallet_handle/issuer/credential-definitions/rotate/start
    async fn rotate_cred_def_start_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<RotateCredDefRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let cred_def = state
            .issuer
            .rotate_credential_def_start(&wallet, &payload.cred_def_id, payload.config.as_ref())
            .await?;
        respond(cred_def)
    }

    /// POST /wallets/:wallet_handle/issuer/credential-definitions/rotate/apply
    async fn rotate_cred_def_apply_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CredDefIdRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        state
            .issuer
            .rotate_credential_def_apply(&wallet, &payload.cred_def_id)
            .await?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/issuer/revocation-registries
    ///
    /// Without `tails_writer_handle`, the tails file goes through a writer
    /// opened from the configured defaults and closed afterwards.
    async fn create_rev_reg_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateRevRegRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let (tails_writer, owned) = match payload.tails_writer_handle {
            Some(handle) => (Handle::from_u64(handle), false),
            None => {
                let config = json!({ "base_dir": state.blob_defaults.base_dir });
                (state.blob_storage.open_writer(&state.blob_defaults.writer_type, config)?, true)
            }
        };

        let created = state
            .issuer
            .create_and_store_revoc_reg(
                &wallet,
                &payload.issuer_did,
                payload.revoc_def_type.as_deref(),
                &payload.tag,
                &payload.cred_def_id,
                &payload.config,
                tails_writer,
            )
            .await;
        if owned {
            state.blob_storage.close_writer(tails_writer)?;
        }

        let (rev_reg_id, rev_reg_def, rev_reg) = created?;
        respond(json!({ "rev_reg_id": rev_reg_id, "rev_reg_def": rev_reg_def, "rev_reg": rev_reg }))
    }

    /// POST /wallets/:wallet_handle/issuer/credential-offers
    async fn create_offer_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CredDefIdRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let offer = state
            .issuer
            .create_credential_offer(&wallet, &payload.cred_def_id)
            .await?;
        respond(offer)
    }

    /// POST /wallets/:wallet_handle/issuer/credentials
    ///
    /// # Responses
    /// - 200 OK: `{"credential", "cred_rev_id", "rev_reg_delta"}`
    /// - 422 Unprocessable Entity: the revocation registry is full
    async fn create_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateCredentialRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let (credential, cred_rev_id, rev_reg_delta) = state
            .issuer
            .create_credential(
                &wallet,
                &payload.offer,
                &payload.request,
                &payload.values,
                payload.rev_reg_id.as_deref(),
                payload.tails_reader_handle.map(Handle::from_u64),
            )
            .await?;
        respond(json!({
            "credential": credential,
            "cred_rev_id": cred_rev_id,
            "rev_reg_delta": rev_reg_delta,
        }))
    }

    /// POST /wallets/:wallet_handle/issuer/revocations
    async fn revoke_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<RevokeRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let delta = state
            .issuer
            .revoke_credential(
                &wallet,
                Handle::from_u64(payload.tails_reader_handle),
                &payload.rev_reg_id,
                &payload.cred_rev_id,
            )
            .await?;
        respond(delta)
    }

    /// POST /issuer/deltas/merge
    async fn merge_deltas_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<MergeDeltasRequest>,
    ) -> ApiResult {
        let merged = state
            .issuer
            .merge_revocation_registry_deltas(&payload.rev_reg_delta, &payload.other_rev_reg_delta)?;
        respond(merged)
    }

    // =====================
    // Prover Handlers
    // =====================

    /// POST /wallets/:wallet_handle/prover/master-secrets
    async fn create_master_secret_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateMasterSecretRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let id = state
            .prover
            .create_master_secret(&wallet, payload.master_secret_id.as_deref())
            .await?;
        respond(json!({ "master_secret_id": id }))
    }

    /// POST /wallets/:wallet_handle/prover/credential-requests
    ///
    /// # Responses
    /// - 200 OK: `{"request", "metadata"}`; the metadata stays with the prover
    async fn create_cred_req_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateCredReqRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let (request, metadata) = state
            .prover
            .create_credential_req(
                &wallet,
                &payload.prover_did,
                &payload.offer,
                &payload.cred_def,
                &payload.master_secret_id,
            )
            .await?;
        respond(json!({ "request": request, "metadata": metadata }))
    }

    /// POST /wallets/:wallet_handle/prover/credentials
    async fn store_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<StoreCredentialRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let cred_id = state
            .prover
            .store_credential(
                &wallet,
                payload.cred_id.as_deref(),
                &payload.metadata,
                payload.credential,
                &payload.cred_def,
                payload.rev_reg_def.as_ref(),
            )
            .await?;
        respond(json!({ "cred_id": cred_id }))
    }

    /// GET /wallets/:wallet_handle/prover/credentials/:cred_id
    async fn get_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path((wallet_handle, cred_id)): Path<(u64, String)>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        respond(state.prover.get_credential(&wallet, &cred_id).await?)
    }

    /// DELETE /wallets/:wallet_handle/prover/credentials/:cred_id
    async fn delete_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Path((wallet_handle, cred_id)): Path<(u64, String)>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        state.prover.delete_credential(&wallet, &cred_id).await?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/prover/credential-searches
    async fn search_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<SearchCredentialsRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let (handle, total_count) = state.prover.search_credentials(&wallet, &payload.query).await?;
        respond(json!({ "search_handle": handle.as_u64(), "total_count": total_count }))
    }

    /// POST /prover/credential-searches/:handle/fetch
    async fn fetch_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        Path(handle): Path<u64>,
        Json(payload): Json<FetchRequest>,
    ) -> ApiResult {
        respond(state.prover.fetch_credentials(Handle::from_u64(handle), payload.count)?)
    }

    /// DELETE /prover/credential-searches/:handle
    async fn close_credentials_search_handler(
        State(state): State<Arc<ApiServer>>,
        Path(handle): Path<u64>,
    ) -> ApiResult {
        state.prover.close_credentials_search(Handle::from_u64(handle))?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/prover/proof-request-searches
    async fn search_for_proof_req_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<SearchForProofReqRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let handle = state
            .prover
            .search_credentials_for_proof_req(&wallet, &payload.proof_request, payload.extra_query.as_ref())
            .await?;
        respond(json!({ "search_handle": handle.as_u64() }))
    }

    /// POST /prover/proof-request-searches/:handle/fetch
    async fn fetch_for_proof_req_handler(
        State(state): State<Arc<ApiServer>>,
        Path(handle): Path<u64>,
        Json(payload): Json<FetchForProofReqRequest>,
    ) -> ApiResult {
        respond(state.prover.fetch_credentials_for_proof_req(
            Handle::from_u64(handle),
            &payload.item_referent,
            payload.count,
        )?)
    }

    /// DELETE /prover/proof-request-searches/:handle
    async fn close_proof_req_search_handler(
        State(state): State<Arc<ApiServer>>,
        Path(handle): Path<u64>,
    ) -> ApiResult {
        state
            .prover
            .close_credentials_search_for_proof_req(Handle::from_u64(handle))?;
        respond(json!({}))
    }

    /// POST /wallets/:wallet_handle/prover/proofs
    async fn create_proof_handler(
        State(state): State<Arc<ApiServer>>,
        Path(wallet_handle): Path<u64>,
        Json(payload): Json<CreateProofRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        let proof = state
            .prover
            .create_proof(
                &wallet,
                &payload.proof_request,
                &payload.requested_credentials,
                &payload.master_secret_id,
                &payload.schemas,
                &payload.cred_defs,
                &payload.rev_states,
            )
            .await?;
        respond(proof)
    }

    /// GET /wallets/:wallet_handle/prover/tag-policies/:cred_def_id
    async fn get_tag_policy_handler(
        State(state): State<Arc<ApiServer>>,
        Path((wallet_handle, cred_def_id)): Path<(u64, String)>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        respond(state.prover.get_credential_attr_tag_policy(&wallet, &cred_def_id).await?)
    }

    /// PUT /wallets/:wallet_handle/prover/tag-policies/:cred_def_id
    async fn set_tag_policy_handler(
        State(state): State<Arc<ApiServer>>,
        Path((wallet_handle, cred_def_id)): Path<(u64, String)>,
        Json(payload): Json<TagPolicyRequest>,
    ) -> ApiResult {
        let wallet = state.wallet(wallet_handle)?;
        state
            .prover
            .set_credential_attr_tag_policy(&wallet, &cred_def_id, &payload.policy, payload.retroactive)
            .await?;
        respond(json!({}))
    }

    /// POST /prover/revocation-states
    async fn create_rev_state_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<CreateRevStateRequest>,
    ) -> ApiResult {
        let rev_state = state
            .prover
            .create_revocation_state(
                Handle::from_u64(payload.tails_reader_handle),
                &payload.rev_reg_def,
                &payload.rev_reg_delta,
                payload.timestamp.unwrap_or_else(now),
                &payload.cred_rev_id,
            )
            .await?;
        respond(rev_state)
    }

    /// POST /prover/revocation-states/update
    async fn update_rev_state_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<UpdateRevStateRequest>,
    ) -> ApiResult {
        let rev_state = state
            .prover
            .update_revocation_state(
                Handle::from_u64(payload.tails_reader_handle),
                payload.rev_state,
                &payload.rev_reg_def,
                &payload.rev_reg_delta,
                payload.timestamp.unwrap_or_else(now),
                &payload.cred_rev_id,
            )
            .await?;
        respond(rev_state)
    }

    // =====================
    // Verifier Handlers
    // =====================

    /// GET /verifier/nonce
    async fn generate_nonce_handler(State(state): State<Arc<ApiServer>>) -> ApiResult {
        respond(json!({ "nonce": state.verifier.generate_nonce()? }))
    }

    /// POST /verifier/proofs/verify
    ///
    /// # Responses
    /// - 200 OK: `{"valid": bool}`; a proof that does not hold is `false`, not an error
    /// - 400 Bad Request: the proof does not match the request's shape
    async fn verify_proof_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<VerifyProofRequest>,
    ) -> ApiResult {
        let valid = state.verifier.verify_proof(
            &payload.proof_request,
            &payload.proof,
            &payload.schemas,
            &payload.cred_defs,
            &payload.rev_reg_defs,
            &payload.rev_regs,
        )?;
        respond(json!({ "valid": valid }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_follows_error_class() {
        let cases = [
            (AnoncredsError::InvalidStructure("x".into()), StatusCode::BAD_REQUEST),
            (AnoncredsError::WalletInvalidHandle, StatusCode::NOT_FOUND),
            (AnoncredsError::CredDefAlreadyExists("x".into()), StatusCode::CONFLICT),
            (AnoncredsError::RevocationRegistryFull("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AnoncredsError::InvalidState("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
