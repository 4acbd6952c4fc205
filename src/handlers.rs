//! HTTP endpoints of the paydrop server.
//!
//! - `GET /health`
//! - `GET /api/file/{id}/info` quote and payment coordinates for a listing
//! - `POST /api/file/{id}/unlock` release the bytes against `{payment_tx, payer}`
//! - `POST /api/upload` multipart `{file, price}`
//!
//! Unlock failures are mapped to statuses and short messages here and nowhere else.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tracing::instrument;
use url::Url;

use crate::gate::{PaymentClaim, Release, UnlockFailure, UnlockGate};
use crate::listing::DEFAULT_MIME_TYPE;
use crate::proto::{
    ErrorResponse, FileInfo, HealthResponse, UnlockRequest, UploadResponse, reason_code,
};
use crate::store::StoreError;
use crate::util::MoneyAmount;

pub struct AppState {
    pub gate: Arc<UnlockGate>,
    /// Base of the share links handed out on upload.
    pub public_url: Url,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/file/{id}/info", get(get_file_info))
        .route("/api/file/{id}/unlock", post(post_unlock))
        .route("/api/upload", post(post_upload))
}

/// `GET /health`
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/file/{id}/info`: everything a buyer needs to construct the transfer.
#[instrument(skip(state))]
pub async fn get_file_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.gate.quote(&id).await {
        Ok(listing) => {
            let info = FileInfo::new(
                &listing,
                state.gate.receiver(),
                state.gate.chain().as_chain_id(),
            );
            (StatusCode::OK, Json(info)).into_response()
        }
        Err(failure) => failure_response(&failure),
    }
}

/// `POST /api/file/{id}/unlock`: runs the unlock gate and streams the file on success.
///
/// An absent or unparsable body is treated as "no payment info", which is all a free
/// listing needs.
#[instrument(skip(state, body))]
pub async fn post_unlock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UnlockRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unlock body ignored");
            UnlockRequest::default()
        }
    };
    let claim = match (request.payment_tx, request.payer) {
        (Some(payment_tx), Some(payer)) if !payment_tx.is_empty() && !payer.is_empty() => {
            Some(PaymentClaim { payment_tx, payer })
        }
        _ => None,
    };

    let grant = match state.gate.unlock(&id, claim).await {
        Ok(grant) => grant,
        Err(failure) => return failure_response(&failure),
    };
    match state.gate.release(grant).await {
        Ok(release) => file_response(release),
        Err(failure) => failure_response(&failure),
    }
}

/// `POST /api/upload`: stores a file and returns its share link.
#[instrument(skip_all)]
pub async fn post_upload(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let (filename, bytes, price) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };
    match state.gate.store().put(&filename, price, bytes).await {
        Ok(listing) => {
            let mut link = state.public_url.clone();
            link.query_pairs_mut()
                .clear()
                .append_pair("id", listing.id.as_str());
            (
                StatusCode::OK,
                Json(UploadResponse {
                    status: "ok".to_string(),
                    file_id: listing.id,
                    link: link.to_string(),
                }),
            )
                .into_response()
        }
        Err(StoreError::Filename(error)) => bad_request(error.to_string()),
        Err(error) => {
            tracing::error!(error = %error, "Upload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::message("Failed to store file")),
            )
                .into_response()
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Bytes, MoneyAmount), Response> {
    let mut file: Option<(String, Bytes)> = None;
    let mut price: Option<String> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, bytes));
            }
            Some("price") => {
                price = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("No file provided"))?;
    if filename.trim().is_empty() {
        return Err(bad_request("No selected file"));
    }
    let price = price
        .filter(|price| !price.trim().is_empty())
        .ok_or_else(|| bad_request("Price is required"))?;
    let price = MoneyAmount::parse(&price).map_err(|_| bad_request("Invalid price"))?;
    Ok((filename, bytes, price))
}

fn multipart_error(error: MultipartError) -> Response {
    tracing::warn!(error = %error, "Malformed upload");
    (error.status(), Json(ErrorResponse::message(error.body_text()))).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::message(message))).into_response()
}

fn file_response(release: Release) -> Response {
    let listing = release.listing;
    let content_type = HeaderValue::from_str(&listing.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));
    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", listing.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        release.bytes,
    )
        .into_response()
}

/// Status and short message for each failure.
pub fn failure_status(failure: &UnlockFailure) -> (StatusCode, String) {
    match failure {
        UnlockFailure::NotFound => (StatusCode::NOT_FOUND, "File not found".into()),
        UnlockFailure::InvalidPayment(message) => (StatusCode::BAD_REQUEST, message.clone()),
        UnlockFailure::WrongNetwork(_) => (StatusCode::BAD_REQUEST, "Wrong network".into()),
        UnlockFailure::SubmissionRejected(_) => {
            (StatusCode::BAD_REQUEST, "Payment submission rejected".into())
        }
        UnlockFailure::TransactionFailed(_) => (
            StatusCode::PAYMENT_REQUIRED,
            "Payment transaction failed".into(),
        ),
        UnlockFailure::TransactionTimeout { .. } => (
            StatusCode::PAYMENT_REQUIRED,
            "Payment not confirmed in time".into(),
        ),
        UnlockFailure::PaymentMismatch(_) => (
            StatusCode::PAYMENT_REQUIRED,
            "Payment verification failed".into(),
        ),
        UnlockFailure::NetworkError(_) => (StatusCode::BAD_GATEWAY, "Chain unavailable".into()),
        UnlockFailure::StorageError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "File missing on server".into(),
        ),
        UnlockFailure::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
        }
        UnlockFailure::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Server shutting down".into(),
        ),
    }
}

fn failure_response(failure: &UnlockFailure) -> Response {
    let (status, error) = failure_status(failure);
    let body = ErrorResponse {
        error,
        reason: Some(reason_code(failure).to_string()),
        detail: Some(failure.to_string()),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SettlementLedger;
    use crate::poller::ConfirmationPoller;
    use crate::store::{AssetStore, FsAssetStore};
    use crate::testing::{PAYER, RECEIVER, ScriptedChain};
    use crate::verifier::PaymentVerifier;
    use alloy_primitives::{TxHash, U256};
    use axum::body::Body;
    use axum::extract::DefaultBodyLimit;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "paydrop-test-boundary";

    struct TestApp {
        _dir: TempDir,
        store: Arc<FsAssetStore>,
        chain: Arc<ScriptedChain>,
        router: Router,
    }

    async fn app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsAssetStore::open(dir.path()).await.unwrap());
        let chain = Arc::new(ScriptedChain::new());
        let gate = UnlockGate::new(
            store.clone(),
            chain.clone(),
            ConfirmationPoller::new(Duration::from_secs(1), 3),
            PaymentVerifier::new(RECEIVER, true),
            Arc::new(SettlementLedger::in_memory()),
        );
        let state = Arc::new(AppState {
            gate: Arc::new(gate),
            public_url: Url::parse("https://drop.example.com/").unwrap(),
        });
        let router = Router::new()
            .merge(routes().with_state(state))
            .layer(DefaultBodyLimit::max(1024));
        TestApp {
            _dir: dir,
            store,
            chain,
            router,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    fn json_body(body: &Bytes) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    /// Parts are `(name, filename, content)`.
    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn unlock_request(id: &str, body: Value) -> Request<Body> {
        Request::post(format!("/api/file/{id}/unlock"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn put(app: &TestApp, filename: &str, price: &str) -> crate::listing::FileListing {
        app.store
            .put(
                filename,
                price.parse().unwrap(),
                Bytes::from_static(b"payload"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app().await;
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn upload_returns_share_link() {
        let app = app().await;
        let request = multipart(&[
            ("file", Some("notes.txt"), b"hello"),
            ("price", None, b"0.01"),
        ]);
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);

        let response: UploadResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.status, "ok");
        assert_eq!(
            response.link,
            format!("https://drop.example.com/?id={}", response.file_id)
        );
        let listing = app.store.listing(&response.file_id).await.unwrap().unwrap();
        assert_eq!(listing.filename, "notes.txt");
        assert_eq!(listing.price, "0.01".parse().unwrap());
    }

    #[tokio::test]
    async fn upload_validation_messages() {
        let app = app().await;
        let cases: [(&[(&str, Option<&str>, &[u8])], &str); 7] = [
            (&[("price", None, b"1")], "No file provided"),
            (&[("file", Some(""), b"x"), ("price", None, b"1")], "No selected file"),
            (&[("file", Some("a.txt"), b"x")], "Price is required"),
            (&[("file", Some("a.txt"), b"x"), ("price", None, b"abc")], "Invalid price"),
            (&[("file", Some("a.txt"), b"x"), ("price", None, b"-1")], "Invalid price"),
            (&[("file", Some("a.txt"), b"x"), ("price", None, b"1e5")], "Invalid price"),
            (&[("file", Some("a.txt"), b"x"), ("price", None, b"0,5")], "Invalid price"),
        ];
        for (parts, message) in cases {
            let (status, _, body) = send(&app.router, multipart(parts)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{message}");
            assert_eq!(json_body(&body)["error"], message);
        }
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = app().await;
        let big = vec![b'x'; 4096];
        let request = multipart(&[("file", Some("big.bin"), &big), ("price", None, b"1")]);
        let (status, _, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn info_describes_listing() {
        let app = app().await;
        let listing = put(&app, "photo.png", "0.01").await;
        let request = Request::get(format!("/api/file/{}/info", listing.id))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);

        let info = json_body(&body);
        assert_eq!(info["filename"], "photo.png");
        assert_eq!(info["price"], "0.01");
        assert_eq!(info["price_eth"], 0.01);
        assert_eq!(info["price_wei"], "10000000000000000");
        assert_eq!(info["mime_type"], "image/png");
        assert_eq!(info["size_bytes"], 7);
        assert_eq!(info["chain_id"], "eip155:84532");
        let receiver: alloy_primitives::Address =
            info["receiver_wallet"].as_str().unwrap().parse().unwrap();
        assert_eq!(receiver, RECEIVER);
    }

    #[tokio::test]
    async fn info_for_unknown_listing_is_404() {
        let app = app().await;
        let request = Request::get("/api/file/deadbeef/info")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&body)["error"], "File not found");
    }

    #[tokio::test]
    async fn free_unlock_streams_attachment() {
        let app = app().await;
        let listing = put(&app, "free.txt", "0").await;
        let request = Request::post(format!("/api/file/{}/unlock", listing.id))
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"free.txt\""
        );
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn paid_unlock_with_confirmed_payment() {
        let app = app().await;
        let listing = put(&app, "paid.pdf", "0.01").await;
        let hash = TxHash::repeat_byte(0x21);
        app.chain
            .mined_after(hash, 0, ScriptedChain::record(hash, true));

        let request = unlock_request(
            listing.id.as_str(),
            json!({"payment_tx": hash.to_string(), "payer": PAYER.to_string().to_lowercase()}),
        );
        let (status, headers, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn paid_unlock_failures_map_to_statuses() {
        let app = app().await;
        let listing = put(&app, "paid.pdf", "0.01").await;

        let (status, _, body) = send(&app.router, unlock_request(listing.id.as_str(), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(&body)["error"],
            "Payment info required (tx hash, payer)"
        );

        let underpaid = TxHash::repeat_byte(0x22);
        let mut record = ScriptedChain::record(underpaid, true);
        record.value = U256::from(5_000_000_000_000_000u64);
        app.chain.mined_after(underpaid, 0, record);
        let request = unlock_request(
            listing.id.as_str(),
            json!({"payment_tx": underpaid.to_string(), "payer": PAYER.to_string()}),
        );
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let body = json_body(&body);
        assert_eq!(body["error"], "Payment verification failed");
        assert_eq!(body["reason"], "payment_mismatch");

        let unreachable = TxHash::repeat_byte(0x23);
        app.chain.unreachable(unreachable);
        let request = unlock_request(
            listing.id.as_str(),
            json!({"payment_tx": unreachable.to_string(), "payer": PAYER.to_string()}),
        );
        let (status, _, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let request = unlock_request(
            "0123456789abcdef0123456789abcdef",
            json!({"payment_tx": unreachable.to_string(), "payer": PAYER.to_string()}),
        );
        let (status, _, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn failure_statuses() {
        let hash = TxHash::repeat_byte(1);
        let cases = [
            (UnlockFailure::TransactionFailed(hash), StatusCode::PAYMENT_REQUIRED),
            (
                UnlockFailure::TransactionTimeout { hash, attempts: 60 },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (UnlockFailure::NetworkError("down".into()), StatusCode::BAD_GATEWAY),
            (
                UnlockFailure::StorageError("gone".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (UnlockFailure::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (failure, status) in cases {
            assert_eq!(failure_status(&failure).0, status, "{failure}");
        }
    }

    #[test]
    fn server_faults_are_not_reported_as_missing_files() {
        let missing = failure_status(&UnlockFailure::StorageError("gone".into()));
        assert_eq!(missing.1, "File missing on server");

        let ledger = failure_status(&UnlockFailure::Internal("ledger write failed".into()));
        assert_eq!(ledger, (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()));
        assert_eq!(
            reason_code(&UnlockFailure::Internal("invalid transition".into())),
            "internal"
        );
    }
}
