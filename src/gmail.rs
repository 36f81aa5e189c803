use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use google_gmail1::Gmail;
use google_gmail1::api::MessagePart;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::{debug, warn};

use crate::mail::{MailError, MailProvider};
use crate::models;

/// Largest page the messages.list endpoint serves.
const PAGE_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn account_address(&self) -> Result<String, MailError> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .doit()
            .await
            .map_err(|e| MailError::transport("Failed to fetch profile", e))?;

        profile
            .email_address
            .filter(|address| !address.is_empty())
            .ok_or_else(|| MailError::transport("Failed to fetch profile", "no email address"))
    }

    async fn list_labels(&self) -> Result<Vec<models::Label>, MailError> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list("me")
            .doit()
            .await
            .map_err(|e| MailError::transport("Failed to list labels", e))?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| {
                Some(models::Label {
                    id: l.id?,
                    name: l.name.unwrap_or_default(),
                    label_type: l.type_.unwrap_or_default(),
                    messages_total: l.messages_total.and_then(|n| u32::try_from(n).ok()),
                    messages_unread: l.messages_unread.and_then(|n| u32::try_from(n).ok()),
                })
            })
            .collect();

        Ok(labels)
    }

    async fn list_messages(
        &self,
        label_id: &str,
        max_results: u32,
        not_older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, MailError> {
        let query = not_older_than.map(after_query);
        if let Some(q) = &query {
            debug!("listing {label_id} with query '{q}'");
        }

        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_results.saturating_sub(ids.len() as u32);
            let mut req = self
                .hub
                .users()
                .messages_list("me")
                .add_label_ids(label_id)
                .max_results(remaining.min(PAGE_LIMIT));

            if let Some(q) = &query {
                req = req.q(q);
            }
            if let Some(token) = &page_token {
                req = req.page_token(token);
            }

            let (_, message_list) = req
                .doit()
                .await
                .map_err(|e| MailError::transport(format!("Failed to list messages in {label_id}"), e))?;

            ids.extend(
                message_list
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match message_list.next_page_token {
                Some(token) if (ids.len() as u32) < max_results => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(max_results as usize);
        if ids.len() as u32 >= max_results {
            warn!("hit message limit ({max_results}) for label {label_id}, there may be more");
        }

        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<models::Message, MailError> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await
            .map_err(|e| MailError::transport(format!("Failed to get message {id}"), e))?;

        parse_message(id, msg)
    }
}

/// Gmail's `after:` is exclusive and day-granular, so the query starts a day
/// early and the caller trims to the exact instant.
pub fn after_query(since: DateTime<Utc>) -> String {
    let adjusted = since - Duration::days(1);
    format!("after:{}", adjusted.format("%Y/%m/%d"))
}

/// Validates a raw API message. Anything without an id or a usable
/// internal date is rejected here rather than stored half-filled.
fn parse_message(
    requested_id: &str,
    msg: google_gmail1::api::Message,
) -> Result<models::Message, MailError> {
    let malformed = |reason: &str| MailError::Malformed {
        id: requested_id.to_string(),
        reason: reason.to_string(),
    };

    let id = msg
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("missing id"))?;
    let internal_date = msg
        .internal_date
        .filter(|millis| *millis > 0)
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| malformed("missing internal date"))?;

    let mut from = None;
    let mut to = None;
    let mut subject = None;
    let mut body_plain = None;
    let mut body_other = None;

    if let Some(payload) = &msg.payload {
        for header in payload.headers.iter().flatten() {
            match header.name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("from") => from = header.value.clone(),
                Some("to") => to = header.value.clone(),
                Some("subject") => subject = header.value.clone(),
                _ => {}
            }
        }

        body_plain = extract_text_body(payload, "text/plain");
        if body_plain.is_none() {
            body_other = extract_any_body(payload);
        }
    }

    Ok(models::Message {
        thread_id: msg.thread_id.unwrap_or_else(|| id.clone()),
        id,
        label_ids: msg.label_ids.unwrap_or_default(),
        snippet: msg.snippet.unwrap_or_default(),
        from_address: from,
        to_address: to,
        subject,
        internal_date,
        body_plain,
        body_other,
    })
}

fn decode_part(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_ref()?;

    // The hub already decoded the transfer encoding.
    if let Ok(text) = std::str::from_utf8(data) {
        return Some(text.to_string());
    }

    use base64::{Engine as _, engine::general_purpose};
    let data_str = String::from_utf8_lossy(data);
    let data_str = data_str.trim();

    general_purpose::URL_SAFE_NO_PAD
        .decode(data_str)
        .or_else(|_| general_purpose::URL_SAFE.decode(data_str))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(data_str))
        .or_else(|_| general_purpose::STANDARD.decode(data_str))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn extract_text_body(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(body) = decode_part(part) {
            return Some(body);
        }
    }

    let mut full_body = String::new();
    for p in part.parts.iter().flatten() {
        if let Some(body) = extract_text_body(p, mime_type) {
            full_body.push_str(&body);
        }
    }

    (!full_body.is_empty()).then_some(full_body)
}

/// First decodable leaf part of any type.
fn extract_any_body(part: &MessagePart) -> Option<String> {
    decode_part(part).or_else(|| part.parts.iter().flatten().find_map(extract_any_body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn leaf(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(text.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn raw(parts: Vec<MessagePart>) -> google_gmail1::api::Message {
        google_gmail1::api::Message {
            id: Some("18f".to_string()),
            thread_id: Some("t1".to_string()),
            internal_date: Some(1_714_557_600_000),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: Some("Hello".to_string()),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: Some(vec![
                    header("From", "Ops <ops@corp.com>"),
                    header("To", "me@example.com"),
                    header("subject", "Shipment delayed"),
                ]),
                parts: Some(parts),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_after_query_backs_off_one_day() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 15, 30, 0).unwrap();
        assert_eq!(after_query(since), "after:2024/02/29");
    }

    #[test]
    fn test_parse_prefers_plain_text() {
        let msg = parse_message(
            "18f",
            raw(vec![leaf("text/html", "<b>hi</b>"), leaf("text/plain", "hi")]),
        )
        .unwrap();

        assert_eq!(msg.body_plain.as_deref(), Some("hi"));
        assert_eq!(msg.body_other, None);
        assert_eq!(msg.subject.as_deref(), Some("Shipment delayed"));
        assert_eq!(msg.from_address.as_deref(), Some("Ops <ops@corp.com>"));
        assert_eq!(
            msg.internal_date,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(msg.label_ids, vec!["INBOX", "UNREAD"]);
    }

    #[test]
    fn test_parse_falls_back_to_other_part() {
        let msg = parse_message("18f", raw(vec![leaf("text/html", "<b>hi</b>")])).unwrap();
        assert_eq!(msg.body_plain, None);
        assert_eq!(msg.body_other.as_deref(), Some("<b>hi</b>"));
    }

    #[test]
    fn test_plain_body_that_looks_like_base64_is_kept() {
        let msg = parse_message("18f", raw(vec![leaf("text/plain", "aGVsbG8")])).unwrap();
        assert_eq!(msg.body_plain.as_deref(), Some("aGVsbG8"));
    }

    #[test]
    fn test_parse_rejects_missing_date() {
        let mut message = raw(vec![]);
        message.internal_date = None;
        assert!(matches!(
            parse_message("18f", message),
            Err(MailError::Malformed { .. })
        ));
    }
}
