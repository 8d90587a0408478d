//! Wire format of the Gmail batch endpoint.
//!
//! A batch is a `multipart/mixed` body with one `application/http` part per
//! inner request. Each part carries `Content-ID: <item-N>`; the response part
//! for it carries `Content-ID: <response-item-N>`, in no guaranteed order.

use crate::models::{ItemOutcome, MessageOp, OpKind};
use crate::providers::gmail::api_error_message;
use crate::providers::ProviderError;
use mailparse::MailHeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

const API_PATH: &str = "/gmail/v1/users/me/messages";
const MALFORMED_PART: &str = "malformed batch part";

static RESPONSE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"response-item-(\d+)").expect("valid content-id pattern"));
static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HTTP/\d(?:\.\d)?\s+(\d{3})").expect("valid status line pattern"));

#[derive(Debug)]
pub struct BatchRequest {
    pub boundary: String,
    pub body: String,
}

impl BatchRequest {
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }
}

pub fn encode(ops: &[MessageOp]) -> BatchRequest {
    let boundary = format!("batch_{}", Uuid::new_v4().simple());
    let mut body = String::new();

    for (index, op) in ops.iter().enumerate() {
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item-{index}>\r\n\r\n"));
        body.push_str(&inner_request(op));
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    BatchRequest { boundary, body }
}

fn inner_request(op: &MessageOp) -> String {
    let id = &op.message_id;
    match op.kind {
        OpKind::Archive => {
            let payload = r#"{"removeLabelIds":["INBOX"]}"#;
            format!(
                "POST {API_PATH}/{id}/modify HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{payload}",
                payload.len()
            )
        }
        OpKind::Delete => format!("DELETE {API_PATH}/{id} HTTP/1.1\r\n\r\n"),
        OpKind::Trash => format!("POST {API_PATH}/{id}/trash HTTP/1.1\r\nContent-Length: 0\r\n\r\n"),
    }
}

/// Maps a batch response back onto the submitted operations.
///
/// The result has one entry per op in submission order. An op the server did
/// not answer is reported as a failed item rather than failing the batch.
pub fn decode(
    ops: &[MessageOp],
    content_type: &str,
    body: &[u8],
) -> Result<Vec<ItemOutcome>, ProviderError> {
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return Err(ProviderError::Batch(format!(
            "unexpected content type `{content_type}`"
        )));
    }

    let mut raw = format!("Content-Type: {content_type}\r\n\r\n").into_bytes();
    raw.extend_from_slice(body);
    let parsed =
        mailparse::parse_mail(&raw).map_err(|err| ProviderError::Batch(err.to_string()))?;

    let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; ops.len()];

    for (position, part) in parsed.subparts.iter().enumerate() {
        let index = part
            .get_headers()
            .get_first_value("Content-ID")
            .and_then(|value| {
                RESPONSE_ID
                    .captures(&value)
                    .and_then(|caps| caps[1].parse::<usize>().ok())
            })
            .unwrap_or(position);

        let Some(op) = ops.get(index) else {
            return Err(ProviderError::Batch(format!(
                "response part refers to unknown item {index}"
            )));
        };

        outcomes[index] = Some(match part.get_body_raw() {
            Ok(inner) => decode_inner_response(&op.message_id, &inner),
            Err(err) => ItemOutcome::failed(op.message_id.clone(), 0, err.to_string()),
        });
    }

    Ok(outcomes
        .into_iter()
        .zip(ops)
        .map(|(outcome, op)| {
            outcome.unwrap_or_else(|| {
                ItemOutcome::failed(op.message_id.clone(), 0, "missing from batch response")
            })
        })
        .collect())
}

/// A part without a readable status line fails only its own item.
fn decode_inner_response(message_id: &str, raw: &[u8]) -> ItemOutcome {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start();
    let Some(status) = STATUS_LINE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u16>().ok())
    else {
        return ItemOutcome::failed(message_id, 0, MALFORMED_PART);
    };

    if (200..300).contains(&status) {
        return ItemOutcome::ok(message_id);
    }

    let payload = text
        .split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();

    ItemOutcome::failed(message_id, status, api_error_message(status, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRef;

    fn ops() -> Vec<MessageOp> {
        vec![
            MessageOp::delete(&MessageRef::new("18c1a")),
            MessageOp::delete(&MessageRef::new("18c1b")),
        ]
    }

    #[test]
    fn encodes_one_part_per_operation() {
        let ops = vec![
            MessageOp::archive(&MessageRef::new("a1")),
            MessageOp::delete(&MessageRef::new("d1")),
            MessageOp::trash(&MessageRef::new("t1")),
        ];
        let request = encode(&ops);

        assert!(request.content_type().ends_with(&request.boundary));
        assert_eq!(request.body.matches("Content-Type: application/http").count(), 3);
        assert!(request.body.contains("Content-ID: <item-2>"));
        assert!(request
            .body
            .contains("POST /gmail/v1/users/me/messages/a1/modify HTTP/1.1"));
        assert!(request.body.contains(r#"{"removeLabelIds":["INBOX"]}"#));
        assert!(request
            .body
            .contains("DELETE /gmail/v1/users/me/messages/d1 HTTP/1.1"));
        assert!(request
            .body
            .contains("POST /gmail/v1/users/me/messages/t1/trash HTTP/1.1"));
        assert!(request.body.ends_with(&format!("--{}--\r\n", request.boundary)));
    }

    #[test]
    fn decodes_mixed_outcomes_by_content_id() {
        let body = concat!(
            "--batch_xyz\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-item-1>\r\n",
            "\r\n",
            "HTTP/1.1 404 Not Found\r\n",
            "Content-Type: application/json; charset=UTF-8\r\n",
            "\r\n",
            "{\"error\": {\"code\": 404, \"message\": \"Requested entity was not found.\"}}\r\n",
            "--batch_xyz\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-item-0>\r\n",
            "\r\n",
            "HTTP/1.1 204 No Content\r\n",
            "\r\n",
            "\r\n",
            "--batch_xyz--\r\n",
        );

        let outcomes = decode(&ops(), "multipart/mixed; boundary=batch_xyz", body.as_bytes())
            .expect("decodes");

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0], ItemOutcome::ok("18c1a"));
        assert_eq!(
            outcomes[1],
            ItemOutcome::failed("18c1b", 404, "Requested entity was not found.")
        );
    }

    #[test]
    fn unanswered_items_fail_individually() {
        let body = concat!(
            "--batch_xyz\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-item-0>\r\n",
            "\r\n",
            "HTTP/1.1 204 No Content\r\n",
            "\r\n",
            "\r\n",
            "--batch_xyz--\r\n",
        );

        let outcomes = decode(&ops(), "multipart/mixed; boundary=batch_xyz", body.as_bytes())
            .expect("decodes");

        assert!(outcomes[0].is_ok());
        assert!(!outcomes[1].is_ok());
        assert_eq!(outcomes[1].message_id, "18c1b");
    }

    #[test]
    fn garbage_part_fails_only_its_item() {
        let body = concat!(
            "--batch_xyz\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-item-0>\r\n",
            "\r\n",
            "HTTP/1.1 204 No Content\r\n",
            "\r\n",
            "\r\n",
            "--batch_xyz\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-item-1>\r\n",
            "\r\n",
            "garbage\r\n",
            "--batch_xyz--\r\n",
        );

        let outcomes = decode(&ops(), "multipart/mixed; boundary=batch_xyz", body.as_bytes())
            .expect("envelope decodes");

        assert_eq!(outcomes[0], ItemOutcome::ok("18c1a"));
        assert_eq!(outcomes[1], ItemOutcome::failed("18c1b", 0, MALFORMED_PART));
    }

    #[test]
    fn rejects_non_multipart_response() {
        let result = decode(&ops(), "application/json", b"{}");
        assert!(matches!(result, Err(ProviderError::Batch(_))));
    }
}
