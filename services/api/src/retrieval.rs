//! HTTP client for the product search collaborator.

use async_trait::async_trait;
use concierge_core::product::{RetrievalError, RetrievalResult, RetrievedProduct, Retriever};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    k: u32,
}

pub struct HttpRetriever {
    http: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpRetriever {
    pub fn new(http: reqwest::Client, url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            http,
            url: url.into(),
            token,
        }
    }
}

/// Interprets a retrieval response body.
///
/// A `{"error": ...}` body is a rejection even when it arrives with a
/// success status.
pub fn parse_response(status: StatusCode, body: &str) -> Result<Vec<RetrievedProduct>, RetrievalError> {
    if !status.is_success() {
        return Err(RetrievalError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    match serde_json::from_str::<RetrievalResult>(body) {
        Ok(RetrievalResult::Found { results }) => Ok(results),
        Ok(RetrievalResult::Failed { error }) => Err(RetrievalError::Rejected {
            status: status.as_u16(),
            body: error,
        }),
        Err(e) => Err(RetrievalError::Decode(e.to_string())),
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn retrieve(&self, query: &str, k: u32) -> Result<Vec<RetrievedProduct>, RetrievalError> {
        // A missing credential is a precondition failure, never retried.
        let token = self.token.as_ref().ok_or(RetrievalError::MissingCredential)?;

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(token.expose_secret())
            .json(&RetrieveRequest { query, k })
            .send()
            .await
            .map_err(|e| RetrievalError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;
        debug!(%status, bytes = body.len(), "Retrieval response received");
        parse_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let body = r#"{"results": [
            {"sku": "X200", "name": "X200 Blender", "price": 39.0,
             "location": {"aisle": 7, "section": "Kitchen", "shelf": "2"}, "score": 0.91}
        ]}"#;
        let products = parse_response(StatusCode::OK, body).unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].sku, "X200");
        assert_eq!(products[0].name(), "X200 Blender");
        assert_eq!(products[0].score, Some(0.91));
        assert_eq!(
            products[0].location.as_ref().and_then(|l| l.aisle.as_deref()),
            Some("7")
        );
    }

    #[test]
    fn test_error_body_is_a_rejection() {
        let err = parse_response(StatusCode::OK, r#"{"error": "index offline"}"#).unwrap_err();
        match err {
            RetrievalError::Rejected { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body, "index offline");
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_http_failure_keeps_the_body() {
        let err = parse_response(StatusCode::UNAUTHORIZED, "bad token").unwrap_err();
        assert_eq!(
            err.to_string(),
            "retrieval service rejected the request (401): bad token"
        );
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            parse_response(StatusCode::OK, "<html>"),
            Err(RetrievalError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_any_request() {
        let retriever = HttpRetriever::new(reqwest::Client::new(), "http://127.0.0.1:1/retrieve", None);
        assert!(matches!(
            retriever.retrieve("blender", 4).await,
            Err(RetrievalError::MissingCredential)
        ));
    }
}
