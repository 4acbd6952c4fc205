//! The buyer side of an unlock: pay with a wallet, then ask the server for the file.
//!
//! The buyer runs the same session state machine as the server, but its
//! `Verifying` step is the server's answer: the server re-checks the payment on
//! chain and is the only party that can release the bytes.

use alloy_primitives::TxHash;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::chain::Eip155ChainReference;
use crate::gate::UnlockFailure;
use crate::listing::{ListingId, Quote};
use crate::poller::{ConfirmationPoller, PollError};
use crate::proto::{ErrorResponse, FileInfo, UnlockRequest};
use crate::session::{Payer, SessionRegistry, SessionState, UnlockSession};
use crate::verifier::MismatchReason;
use crate::wallet::{WalletConnector, WalletError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {}", .body.error)]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: ErrorResponse,
    },
    #[error("Failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// A file handed out by the server.
#[derive(Debug, Clone)]
pub struct Download {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// HTTP client for a paydrop server.
#[derive(Clone, Debug)]
pub struct PaydropClient {
    base_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl PaydropClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: Client::new(),
            timeout: None,
        }
    }

    /// Splits a share link (`https://host/?id=<id>`) into a client for its server and
    /// the listing id.
    pub fn from_share_link(link: &str) -> Result<(Self, ListingId), ShareLinkError> {
        let mut url = Url::parse(link).map_err(|_| ShareLinkError::NotALink(link.to_string()))?;
        let id = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| ShareLinkError::MissingId(link.to_string()))?;
        let id = id
            .parse::<ListingId>()
            .map_err(|_| ShareLinkError::MissingId(link.to_string()))?;
        url.set_query(None);
        url.set_fragment(None);
        Ok((Self::new(url), id))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    fn file_url(&self, id: &ListingId, leaf: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(&format!("api/file/{id}/{leaf}"))
            .map_err(|source| ClientError::UrlParse {
                context: "Failed to construct file URL",
                source,
            })
    }

    /// `GET /api/file/{id}/info`
    pub async fn info(&self, id: &ListingId) -> Result<FileInfo, ClientError> {
        let context = "GET /api/file/{id}/info";
        let mut request = self.client.get(self.file_url(id, "info")?);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Http { context, source })?;
        let response = Self::ensure_ok(response, context).await?;
        response
            .json::<FileInfo>()
            .await
            .map_err(|source| ClientError::JsonDeserialization { context, source })
    }

    /// `POST /api/file/{id}/unlock`
    ///
    /// No timeout is applied: the server holds the request while it waits for
    /// confirmation.
    pub async fn unlock(
        &self,
        id: &ListingId,
        body: &UnlockRequest,
    ) -> Result<Download, ClientError> {
        let context = "POST /api/file/{id}/unlock";
        let response = self
            .client
            .post(self.file_url(id, "unlock")?)
            .json(body)
            .send()
            .await
            .map_err(|source| ClientError::Http { context, source })?;
        let response = Self::ensure_ok(response, context).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::ResponseBodyRead { context, source })?;
        Ok(Download {
            content_type,
            bytes,
        })
    }

    async fn ensure_ok(
        response: reqwest::Response,
        context: &'static str,
    ) -> Result<reqwest::Response, ClientError> {
        if response.status() == StatusCode::OK {
            return Ok(response);
        }
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ClientError::ResponseBodyRead { context, source })?;
        let body = serde_json::from_str::<ErrorResponse>(&text)
            .unwrap_or_else(|_| ErrorResponse::message(text));
        Err(ClientError::HttpStatus {
            context,
            status,
            body,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShareLinkError {
    #[error("{0:?} is not a URL")]
    NotALink(String),
    #[error("{0:?} does not carry a listing id")]
    MissingId(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BuyerError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Failed(#[from] UnlockFailure),
    #[error("Listing advertises an invalid {field}: {value}")]
    InvalidListing { field: &'static str, value: String },
}

/// A completed purchase.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub listing_id: ListingId,
    pub filename: String,
    pub payer: Payer,
    pub transaction_hash: Option<TxHash>,
    pub download: Download,
}

pub struct Buyer<W> {
    client: PaydropClient,
    wallet: W,
    poller: ConfirmationPoller,
    sessions: SessionRegistry,
    cancel: CancellationToken,
}

impl<W: WalletConnector> Buyer<W> {
    pub fn new(client: PaydropClient, wallet: W, poller: ConfirmationPoller) -> Self {
        Self {
            client,
            wallet,
            poller,
            sessions: SessionRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Quote, pay if needed, wait for the transfer to be mined, then unlock.
    #[tracing::instrument(skip(self), fields(listing = %id))]
    pub async fn purchase(&self, id: &ListingId) -> Result<Purchase, BuyerError> {
        let info = self.client.info(id).await?;
        let quote = Quote {
            listing_id: id.clone(),
            filename: info.filename.clone(),
            price: info.price,
        };
        tracing::info!(filename = %quote.filename, price = %quote.price, "Quoted");

        if quote.is_free() {
            let mut session = UnlockSession::open(&self.sessions, quote, Payer::Anonymous);
            let request = UnlockRequest::default();
            let download = self.request_unlock(&mut session, &request, None).await?;
            return Ok(Purchase {
                listing_id: id.clone(),
                filename: info.filename,
                payer: Payer::Anonymous,
                transaction_hash: None,
                download,
            });
        }

        let chain = Eip155ChainReference::try_from(&info.chain_id).map_err(|_| {
            BuyerError::InvalidListing {
                field: "chain_id",
                value: info.chain_id.to_string(),
            }
        })?;
        let payer = self
            .wallet
            .active_account()
            .await
            .map_err(|e| UnlockFailure::SubmissionRejected(e.to_string()))?;
        let mut session = UnlockSession::open(&self.sessions, quote, Payer::Address(payer));

        if let Err(error) = self.wallet.switch_network(chain).await {
            let failure = match error {
                WalletError::WrongNetwork { .. } => UnlockFailure::WrongNetwork(error.to_string()),
                other => UnlockFailure::NetworkError(other.to_string()),
            };
            return Err(session.fail(failure).into());
        }
        transition(&mut session, SessionState::AwaitingSubmission)?;

        let amount = match session.quote().amount_wei() {
            Ok(amount) => amount,
            Err(error) => {
                return Err(session
                    .fail(UnlockFailure::InvalidPayment(error.to_string()))
                    .into());
            }
        };
        let hash = match self
            .wallet
            .submit_transfer(info.receiver_wallet, amount)
            .await
        {
            Ok(hash) => hash,
            Err(error) => {
                return Err(session
                    .fail(UnlockFailure::SubmissionRejected(error.to_string()))
                    .into());
            }
        };
        if let Err(error) = session.submitted(hash, Instant::now() + self.poller.deadline()) {
            return Err(session
                .fail(UnlockFailure::Internal(error.to_string()))
                .into());
        }

        match self.poller.wait(&self.wallet, hash, &self.cancel).await {
            Ok(confirmation) => session.record_attempts(confirmation.attempts),
            Err(error) => {
                let failure = match error {
                    PollError::Reverted { .. } => UnlockFailure::TransactionFailed(hash),
                    PollError::Timeout { attempts } => {
                        UnlockFailure::TransactionTimeout { hash, attempts }
                    }
                    PollError::Unreachable { last_error, .. } => {
                        UnlockFailure::NetworkError(last_error)
                    }
                    PollError::Cancelled { .. } => UnlockFailure::Cancelled,
                };
                return Err(session.fail(failure).into());
            }
        }
        transition(&mut session, SessionState::Verifying)?;

        let request = UnlockRequest {
            payment_tx: Some(hash.to_string()),
            payer: Some(payer.to_string()),
        };
        let download = self
            .request_unlock(&mut session, &request, Some(hash))
            .await?;
        Ok(Purchase {
            listing_id: id.clone(),
            filename: info.filename,
            payer: Payer::Address(payer),
            transaction_hash: Some(hash),
            download,
        })
    }

    /// Asks the server to release the file and moves the session to its terminal state.
    async fn request_unlock(
        &self,
        session: &mut UnlockSession,
        request: &UnlockRequest,
        hash: Option<TxHash>,
    ) -> Result<Download, BuyerError> {
        let id = session.quote().listing_id.clone();
        match self.client.unlock(&id, request).await {
            Ok(download) => {
                transition(session, SessionState::Unlocked)?;
                Ok(download)
            }
            Err(ClientError::HttpStatus { status, body, .. }) => {
                let failure = failure_from_response(status, &body, hash);
                tracing::warn!(status = %status, reason = %failure, "Server refused unlock");
                Err(session.fail(failure).into())
            }
            Err(error) => {
                session.fail(UnlockFailure::NetworkError(error.to_string()));
                Err(error.into())
            }
        }
    }
}

fn transition(session: &mut UnlockSession, next: SessionState) -> Result<(), BuyerError> {
    session
        .advance(next)
        .map_err(|error| session.fail(UnlockFailure::Internal(error.to_string())).into())
}

/// Reads a server-side failure back from its wire form.
pub fn failure_from_response(
    status: StatusCode,
    body: &ErrorResponse,
    hash: Option<TxHash>,
) -> UnlockFailure {
    let detail = body.detail.clone().unwrap_or_else(|| body.error.clone());
    let hash = hash.unwrap_or_default();
    match body.reason.as_deref() {
        Some("not_found") => UnlockFailure::NotFound,
        Some("transaction_failed") => UnlockFailure::TransactionFailed(hash),
        Some("transaction_timeout") => UnlockFailure::TransactionTimeout { hash, attempts: 0 },
        Some("payment_mismatch") => UnlockFailure::PaymentMismatch(MismatchReason::Reported(detail)),
        Some("network_error") => UnlockFailure::NetworkError(detail),
        Some("invalid_payment") => UnlockFailure::InvalidPayment(body.error.clone()),
        Some("storage_error") => UnlockFailure::StorageError(detail),
        Some("internal") => UnlockFailure::Internal(detail),
        Some("cancelled") => UnlockFailure::Cancelled,
        _ => match status {
            StatusCode::NOT_FOUND => UnlockFailure::NotFound,
            StatusCode::BAD_REQUEST => UnlockFailure::InvalidPayment(body.error.clone()),
            StatusCode::PAYMENT_REQUIRED => {
                UnlockFailure::PaymentMismatch(MismatchReason::Reported(detail))
            }
            StatusCode::SERVICE_UNAVAILABLE => UnlockFailure::Cancelled,
            status if status.is_server_error() && status != StatusCode::INTERNAL_SERVER_ERROR => {
                UnlockFailure::NetworkError(detail)
            }
            _ => UnlockFailure::Internal(detail),
        },
    }
}
