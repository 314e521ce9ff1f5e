//! # HTTP API
//!
//! Builds the axum router for the service. All endpoints share application
//! state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path             | Auth   | Description                          |
//! |--------|------------------|--------|--------------------------------------|
//! | GET    | `/health`        | none   | Liveness probe                       |
//! | POST   | `/auth/nonce`    | none   | Issue a sign-in challenge            |
//! | POST   | `/auth/wallet`   | none   | Submit a signed challenge, sign in   |
//! | POST   | `/wallet/link`   | bearer | Link another wallet to the caller    |
//! | POST   | `/credits/debit` | bearer | Spend credits                        |
//! | GET    | `/credits`       | bearer | Balance and recent transactions      |
//!
//! ## Error contract
//!
//! Failures return `{"error": <code>, "message": <text>}` where the code is
//! stable and machine-readable. Internal failures are logged in full and
//! surfaced as a generic `internal` — clients never see storage or identity
//! platform detail.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use walletgate_core::auth::{
    challenge_message, AuthError, AuthRequest, LinkOutcome, NonceStore, WalletAuthenticator,
    WalletLinker,
};
use walletgate_core::config::{
    self, DEFAULT_TRANSACTION_PAGE, LOGIN_NONCE_WINDOW, SIGNUP_CREDIT_GRANT,
};
use walletgate_core::identity::{IdentityId, IdentityProvider};
use walletgate_core::ledger::{CreditLedger, CreditTransaction, LedgerError};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc` or reference-counted handles.
#[derive(Clone)]
pub struct AppState {
    /// The service's reported version string.
    pub version: String,
    /// Domain presented in challenge messages.
    pub challenge_domain: String,
    /// Challenge nonce issuance.
    pub nonces: NonceStore,
    /// The sign-in flow.
    pub authenticator: WalletAuthenticator,
    /// The session-gated link flow.
    pub linker: WalletLinker,
    /// Balances and the transaction log.
    pub ledger: CreditLedger,
    /// The identity/session platform.
    pub identity: Arc<dyn IdentityProvider>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/nonce", post(nonce_handler))
        .route("/auth/wallet", post(login_handler))
        .route("/wallet/link", post(link_handler))
        .route("/credits/debit", post(debit_handler))
        .route("/credits", get(credits_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Request payload for `POST /auth/nonce`.
#[derive(Debug, Deserialize)]
pub struct NonceRequest {
    /// Wallet address requesting a challenge.
    pub address: String,
    /// Chain identifier, e.g. `eip155:1`.
    pub chain: String,
}

/// Response payload for `POST /auth/nonce`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    /// The challenge value the signed message must embed.
    pub nonce: String,
    /// Suggested message text for the wallet to display and sign.
    pub message: String,
    /// Seconds until the challenge expires for sign-in. The link flow
    /// accepts the same challenge for longer; clients pacing a link prompt
    /// can treat this as a safe lower bound.
    pub expires_in_secs: u64,
}

/// Response payload for `POST /auth/wallet`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The identity the wallet resolved to.
    pub identity_id: IdentityId,
    /// One-time session link minted by the identity platform.
    pub session_link: String,
    /// `true` when this sign-in created the account.
    pub new_identity: bool,
    /// Credit balance after any signup grant.
    pub credits: u64,
}

/// Response payload for `POST /wallet/link`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkResponse {
    /// The identity the wallet is bound to.
    pub identity_id: IdentityId,
    /// Whether the wallet was newly linked or already present.
    pub outcome: LinkOutcome,
}

/// Request payload for `POST /credits/debit`.
#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    /// Credits to spend. Must be positive.
    pub amount: u64,
    /// Human-readable reason recorded in the ledger.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional correlation id for the caller's session or request.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response payload for `POST /credits/debit`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DebitResponse {
    /// Balance after the debit.
    pub credits: u64,
}

/// Query parameters for `GET /credits`.
#[derive(Debug, Deserialize)]
pub struct CreditsQuery {
    /// Page size, clamped server-side.
    pub limit: Option<usize>,
    /// Entries to skip (newest-first).
    pub offset: Option<usize>,
}

/// Response payload for `GET /credits`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreditsResponse {
    /// Current balance.
    pub credits: u64,
    /// Newest-first page of the transaction log.
    pub transactions: Vec<CreditTransaction>,
}

/// Uniform error envelope for all failure responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub error: String,
    /// Human-readable description.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// Maps an [`AuthError`] to its HTTP status plus wire code.
fn auth_error(e: AuthError) -> Response {
    let status = match &e {
        AuthError::InvalidNonce
        | AuthError::InvalidSignature
        | AuthError::InvalidMessage
        | AuthError::UnsupportedChain(_) => StatusCode::BAD_REQUEST,
        AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::WalletAlreadyLinked => StatusCode::CONFLICT,
        AuthError::Provisioning(_) | AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if e.is_internal() {
        tracing::error!(error = %e, "internal failure in auth flow");
        return error_response(status, e.code(), "internal error");
    }
    error_response(status, e.code(), e.to_string())
}

/// Maps a [`LedgerError`] to its HTTP status plus wire code.
fn ledger_error(e: LedgerError) -> Response {
    match &e {
        LedgerError::InsufficientCredits { .. } => {
            error_response(StatusCode::PAYMENT_REQUIRED, e.code(), e.to_string())
        }
        LedgerError::InvalidAmount | LedgerError::Overflow => {
            error_response(StatusCode::BAD_REQUEST, e.code(), e.to_string())
        }
        // A live session with no credit account is a server-side
        // inconsistency; the code is surfaced for operators, not clients.
        LedgerError::IdentityNotProvisioned(_) => {
            tracing::error!(error = %e, "authenticated identity has no credit account");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), "internal error")
        }
        LedgerError::Db(_) | LedgerError::Serialization(_) => {
            tracing::error!(error = %e, "internal failure in ledger");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), "internal error")
        }
    }
}

/// Pulls the bearer token out of the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolves the caller's session or fails with 401.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<IdentityId, Response> {
    let Some(token) = bearer_token(headers) else {
        return Err(auth_error(AuthError::Unauthenticated));
    };
    match state.identity.resolve_session(token).await {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(auth_error(AuthError::Unauthenticated)),
        Err(e) => Err(auth_error(AuthError::from(e))),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
    }))
}

/// `POST /auth/nonce` — issue a challenge for sign-in or linking.
///
/// The advertised expiry is the tighter login window, so the same response
/// works for both flows without overpromising.
async fn nonce_handler(
    State(state): State<AppState>,
    Json(req): Json<NonceRequest>,
) -> Response {
    if !config::is_supported_chain(&req.chain) {
        return auth_error(AuthError::UnsupportedChain(req.chain));
    }

    match state.nonces.issue(&req.address, &req.chain) {
        Ok(record) => {
            state.metrics.nonces_issued_total.inc();
            let message = challenge_message(&state.challenge_domain, &record);
            (
                StatusCode::OK,
                Json(NonceResponse {
                    nonce: record.value,
                    message,
                    expires_in_secs: LOGIN_NONCE_WINDOW.as_secs(),
                }),
            )
                .into_response()
        }
        Err(e) => auth_error(AuthError::from(e)),
    }
}

/// `POST /auth/wallet` — submit a signed challenge and sign in.
///
/// First-time sign-ins get their credit account provisioned here, with the
/// signup grant, before the response goes out.
async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Response {
    let timer = state.metrics.auth_latency_seconds.start_timer();
    let result = state.authenticator.authenticate(&req).await;
    timer.observe_duration();

    let success = match result {
        Ok(s) => s,
        Err(e) => {
            state.metrics.auth_failure_total.inc();
            return auth_error(e);
        }
    };

    if success.new_identity {
        if let Err(e) = state.ledger.provision(success.identity_id, SIGNUP_CREDIT_GRANT) {
            return ledger_error(e);
        }
    }
    let credits = match state.ledger.balance(success.identity_id) {
        Ok(c) => c,
        Err(e) => return ledger_error(e),
    };

    state.metrics.auth_success_total.inc();
    (
        StatusCode::OK,
        Json(LoginResponse {
            identity_id: success.identity_id,
            session_link: success.session_link,
            new_identity: success.new_identity,
            credits,
        }),
    )
        .into_response()
}

/// `POST /wallet/link` — attach another wallet to the authenticated caller.
async fn link_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AuthRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return auth_error(AuthError::Unauthenticated);
    };

    match state.linker.link(token, &req).await {
        Ok((identity_id, outcome)) => {
            if outcome == LinkOutcome::Linked {
                state.metrics.links_total.inc();
            }
            (StatusCode::OK, Json(LinkResponse { identity_id, outcome })).into_response()
        }
        Err(e) => {
            if matches!(e, AuthError::WalletAlreadyLinked) {
                state.metrics.link_conflicts_total.inc();
            }
            auth_error(e)
        }
    }
}

/// `POST /credits/debit` — spend credits against the caller's balance.
async fn debit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DebitRequest>,
) -> Response {
    let identity_id = match require_session(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let description = req.description.as_deref().unwrap_or("usage");
    match state.ledger.debit(identity_id, req.amount, description, req.session_id) {
        Ok(credits) => {
            state.metrics.credits_debited_total.inc_by(req.amount);
            (StatusCode::OK, Json(DebitResponse { credits })).into_response()
        }
        Err(e) => {
            if matches!(e, LedgerError::InsufficientCredits { .. }) {
                state.metrics.insufficient_credit_rejections_total.inc();
            }
            ledger_error(e)
        }
    }
}

/// `GET /credits` — balance plus a newest-first page of the log.
async fn credits_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CreditsQuery>,
) -> Response {
    let identity_id = match require_session(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_PAGE);
    let offset = query.offset.unwrap_or(0);

    let credits = match state.ledger.balance(identity_id) {
        Ok(c) => c,
        Err(e) => return ledger_error(e),
    };
    match state.ledger.recent_transactions(identity_id, limit, offset) {
        Ok(transactions) => {
            (StatusCode::OK, Json(CreditsResponse { credits, transactions })).into_response()
        }
        Err(e) => ledger_error(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
