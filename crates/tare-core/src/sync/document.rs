//! Regulatory waste-document client boundary.
//!
//! The relay forwards authenticated requests to the regulator and answers with
//! `{ success, documentId, error }`. Transport failures are folded into a failed
//! response so the queue treats them like any other retryable failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::{Carrier, Client, Product, WeighTicket};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the relay needs to issue a document for one ticket
#[derive(Clone, Serialize)]
pub struct DocumentRequest {
    pub ticket: WeighTicket,
    pub client: Client,
    pub product: Option<Product>,
    pub carrier: Option<Carrier>,
    #[serde(skip)]
    pub token: String,
}

impl std::fmt::Debug for DocumentRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DocumentRequest")
            .field("ticket", &self.ticket.id)
            .field("client", &self.client.id)
            .field("product", &self.product.as_ref().map(|product| &product.id))
            .field("carrier", &self.carrier.as_ref().map(|carrier| &carrier.id))
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub success: bool,
    #[serde(default, alias = "document_id")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DocumentResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            document_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn create_document(&self, request: &DocumentRequest) -> DocumentResponse;
}

/// Relay client over HTTPS
#[derive(Clone)]
pub struct HttpDocumentClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDocumentClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| Error::InvalidInput(format!("HTTP client setup failed: {error}")))?;
        Ok(Self {
            endpoint: format!("{endpoint}/documents"),
            client,
        })
    }

    async fn send(&self, request: &DocumentRequest) -> std::result::Result<DocumentResponse, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&request.token)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|error| format!("Relay request failed: {error}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_api_error(status, &body));
        }

        response
            .json::<DocumentResponse>()
            .await
            .map_err(|error| format!("Invalid relay response: {error}"))
    }
}

#[async_trait]
impl DocumentClient for HttpDocumentClient {
    async fn create_document(&self, request: &DocumentRequest) -> DocumentResponse {
        match self.send(request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Document request for ticket {} failed: {error}", request.ticket.id);
                DocumentResponse::failed(error)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RelayErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("relay endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "relay endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> DocumentRequest {
        let client = Client::new("Acme Quarries");
        DocumentRequest {
            ticket: WeighTicket::new("T-000001", client.id.clone(), 30_000, 12_000),
            client,
            product: None,
            carrier: None,
            token: "secret".to_string(),
        }
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("relay.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://relay.example.com/".to_string()).unwrap(),
            "https://relay.example.com"
        );
    }

    #[test]
    fn request_never_exposes_token() {
        let request = request();
        assert!(!format!("{request:?}").contains("secret"));
        assert!(!serde_json::to_string(&request).unwrap().contains("secret"));
    }

    #[test]
    fn response_accepts_both_id_spellings() {
        let camel: DocumentResponse =
            serde_json::from_str(r#"{"success":true,"documentId":"DI-1"}"#).unwrap();
        let snake: DocumentResponse =
            serde_json::from_str(r#"{"success":true,"document_id":"DI-1"}"#).unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.document_id.as_deref(), Some("DI-1"));
    }

    #[test]
    fn api_errors_prefer_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, r#"{"message":"upstream down"}"#),
            "upstream down (502)"
        );
        assert_eq!(parse_api_error(StatusCode::UNAUTHORIZED, ""), "HTTP 401");
        assert_eq!(parse_api_error(StatusCode::BAD_REQUEST, "nope"), "nope (400)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_errors_become_failed_responses() {
        let client = HttpDocumentClient::new("http://127.0.0.1:9").unwrap();
        let response = client.create_document(&request()).await;
        assert!(!response.success);
        assert!(response.error.is_some());
    }
}
