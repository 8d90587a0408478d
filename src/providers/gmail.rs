use crate::models::{ItemOutcome, MessageOp, MessageQuery, MessageRef, Session};
use crate::providers::{batch, MailboxApi, ProviderError};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const BATCH_ENDPOINT: &str = "https://www.googleapis.com/batch/gmail/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageId>,
    #[serde(default)]
    result_size_estimate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MessageId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Extracts the human readable message from a Google API error body, falling
/// back to the canonical reason phrase of the status.
pub(crate) fn api_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .or_else(|| {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// Gmail REST client bound to one authenticated session.
#[derive(Clone)]
pub struct GmailClient {
    http: Client,
    session: Session,
}

impl GmailClient {
    pub fn new(http: Client, session: Session) -> Self {
        Self { http, session }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = api_error_message(status.as_u16(), &body);
        if status == StatusCode::UNAUTHORIZED {
            Err(ProviderError::Authentication(message))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

impl MailboxApi for GmailClient {
    async fn list_messages(
        &self,
        query: &MessageQuery,
        max_results: usize,
    ) -> Result<Vec<MessageRef>, ProviderError> {
        let mut params: Vec<(&str, String)> = vec![("maxResults", max_results.to_string())];
        match query {
            MessageQuery::Search(expression) => params.push(("q", expression.clone())),
            MessageQuery::Label(label) => params.push(("labelIds", label.as_str().to_string())),
        }

        let response = self
            .http
            .get(format!("{API_BASE}/messages"))
            .bearer_auth(self.session.bearer())
            .query(&params)
            .send()
            .await?;
        let listed: ListMessagesResponse = Self::check(response).await?.json().await?;

        debug!(
            ?query,
            returned = listed.messages.len(),
            estimate = ?listed.result_size_estimate,
            "listed messages"
        );

        Ok(listed
            .messages
            .into_iter()
            .map(|message| MessageRef::new(message.id))
            .collect())
    }

    async fn execute_batch(&self, ops: &[MessageOp]) -> Result<Vec<ItemOutcome>, ProviderError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let request = batch::encode(ops);
        let response = self
            .http
            .post(BATCH_ENDPOINT)
            .bearer_auth(self.session.bearer())
            .header(header::CONTENT_TYPE, request.content_type())
            .body(request.body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        let body = response.bytes().await?;
        let outcomes = batch::decode(ops, &content_type, &body)?;

        let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
        info!(
            size = ops.len(),
            kind = ops[0].kind.as_str(),
            failed,
            "batch request completed"
        );

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_message_prefers_body() {
        let body = r#"{"error": {"code": 403, "message": "Insufficient Permission", "errors": []}}"#;
        assert_eq!(api_error_message(403, body), "Insufficient Permission");
    }

    #[test]
    fn api_error_message_falls_back_to_reason() {
        assert_eq!(api_error_message(404, ""), "Not Found");
        assert_eq!(api_error_message(599, "garbage"), "HTTP 599");
    }

    #[test]
    fn list_response_tolerates_missing_messages() {
        let parsed: ListMessagesResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).expect("parses");
        assert!(parsed.messages.is_empty());
    }
}
