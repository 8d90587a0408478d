use crate::models::{ItemOutcome, MessageOp, MessageQuery, MessageRef};
use std::future::Future;
use thiserror::Error;

pub mod batch;
pub mod gmail;

pub use gmail::GmailClient;

/// Upper bound on the number of messages a single list call returns, which is
/// also the number of operations one batch may carry.
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed batch response: {0}")]
    Batch(String),
    #[error("unexpected provider error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(value: serde_json::Error) -> Self {
        Self::Other(value.to_string())
    }
}

/// The two remote primitives the cleanup passes are built from.
///
/// `execute_batch` returns one outcome per submitted operation, in submission
/// order. A per-item failure is reported in its outcome; `Err` is reserved for
/// failures of the whole round trip.
pub trait MailboxApi {
    fn list_messages(
        &self,
        query: &MessageQuery,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<MessageRef>, ProviderError>> + Send;

    fn execute_batch(
        &self,
        ops: &[MessageOp],
    ) -> impl Future<Output = Result<Vec<ItemOutcome>, ProviderError>> + Send;
}

pub fn provider_error_to_message(error: &ProviderError) -> String {
    match error {
        ProviderError::Authentication(message) => message.clone(),
        ProviderError::Network(message) => format!("Network error: {message}"),
        ProviderError::Api { status, message } => format!("Gmail API error {status}: {message}"),
        ProviderError::Batch(message) => format!("Batch error: {message}"),
        ProviderError::Other(message) => message.clone(),
    }
}
