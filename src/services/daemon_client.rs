use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domains::message::RecordedEntry;
use crate::domains::transition::{FinalizedTransition, TransitionId};
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessagesRequest {
    pub contents: String,
    pub recipient: String,
    pub number_of_states_to_create: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub tx_id: String,
    pub index_to_consume: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub tx_id: String,
    pub index: usize,
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessageRequest {
    pub contents: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub observers: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

/// HTTP client for a running `message-ledgerd`.
pub struct DaemonClient {
    base_url: String,
    token: String,
    party: Option<String>,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: String, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LedgerError::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            token,
            party: None,
            client,
        })
    }

    /// Acts as `party` instead of the daemon's local party.
    pub fn acting_as(mut self, party: Option<String>) -> Self {
        self.party = party;
        self
    }

    pub async fn create_messages(&self, request: &CreateMessagesRequest) -> Result<String> {
        self.post_text("/messages", request).await
    }

    pub async fn consume(&self, request: &ConsumeRequest) -> Result<String> {
        self.post_text("/messages/consume", request).await
    }

    pub async fn reply(&self, request: &ReplyRequest) -> Result<String> {
        self.post_text("/messages/reply", request).await
    }

    pub async fn send_and_broadcast(&self, request: &BroadcastMessageRequest) -> Result<String> {
        self.post_text("/messages/broadcast", request).await
    }

    pub async fn broadcast(
        &self,
        tx_id: &TransitionId,
        request: &BroadcastRequest,
    ) -> Result<String> {
        self.post_text(&format!("/transactions/{tx_id}/broadcast"), request)
            .await
    }

    pub async fn messages(&self, status: &str) -> Result<Vec<RecordedEntry>> {
        let request = self
            .authorized(self.client.get(join_url(&self.base_url, "/messages")))
            .query(&[("status", status)]);
        let response = request
            .send()
            .await
            .map_err(|e: reqwest::Error| LedgerError::Http(e.to_string()))?;
        decode_json(response).await
    }

    /// `Ok(None)` when the daemon does not know the transaction.
    pub async fn transaction(&self, tx_id: &TransitionId) -> Result<Option<FinalizedTransition>> {
        let url = join_url(&self.base_url, &format!("/transactions/{tx_id}"));
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e: reqwest::Error| LedgerError::Http(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_json(response).await.map(Some)
    }

    async fn post_text<T: Serialize>(&self, path: &str, body: &T) -> Result<String> {
        let url = join_url(&self.base_url, path);
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e: reqwest::Error| LedgerError::Http(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e: reqwest::Error| LedgerError::Http(e.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(status_error(status, &text))
        }
    }

    fn authorized(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.token.trim().is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.token));
        }
        if let Some(party) = &self.party {
            request = request.header("x-party", party.as_str());
        }
        request
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e: reqwest::Error| LedgerError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    serde_json::from_str(&text).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Maps a daemon error response back onto the error it was raised from.
fn status_error(status: StatusCode, body: &str) -> LedgerError {
    let (reason, kind) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => (parsed.error, parsed.kind),
        Err(_) => (body.to_string(), None),
    };
    if let Some(kind) = kind {
        if let Some(err) = LedgerError::from_kind(&kind, reason.clone()) {
            return err;
        }
    }
    match status {
        StatusCode::BAD_REQUEST => LedgerError::ValidationRejected(reason),
        StatusCode::CONFLICT => LedgerError::CounterpartyRejected(reason),
        StatusCode::NOT_FOUND => LedgerError::NotFound(reason),
        StatusCode::GATEWAY_TIMEOUT => LedgerError::Timeout(reason),
        StatusCode::BAD_GATEWAY => LedgerError::PeerUnreachable(reason),
        _ => LedgerError::Http(format!("{status}: {reason}")),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
