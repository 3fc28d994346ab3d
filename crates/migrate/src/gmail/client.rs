//! Gmail API HTTP client
//!
//! Provides the handful of Gmail API calls a migration needs: paged
//! listing, header metadata, message import and `rfc822msgid:` search.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use base64::prelude::*;
use log::debug;
use std::time::Duration;

use super::GmailAuth;
use super::api::{ImportRequest, ImportedMessage, ListMessagesResponse, MetadataMessage};

/// Error indicating the OAuth token could not be obtained
#[derive(Debug, thiserror::Error)]
#[error("Gmail authentication failed")]
pub struct AuthFailedError;

/// Gmail API client bound to one mailbox owner
pub struct GmailClient {
    auth: GmailAuth,
    user_id: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the list endpoint accepts
    pub const MAX_PAGE_SIZE: usize = 500;

    /// Create a new Gmail client; `user_id` is usually `me`
    pub fn new(auth: GmailAuth, user_id: impl Into<String>) -> Self {
        Self {
            auth,
            user_id: user_id.into(),
        }
    }

    fn access_token(&self) -> Result<String> {
        self.auth.get_access_token().context(AuthFailedError)
    }

    fn user_url(&self) -> String {
        format!(
            "{}/users/{}",
            Self::BASE_URL,
            urlencoding::encode(&self.user_id)
        )
    }

    /// List one page of message IDs
    ///
    /// # Arguments
    /// * `query` - Optional Gmail search expression (`q` parameter)
    /// * `max_results` - Page size (1-500)
    /// * `page_token` - Optional page token for pagination
    pub fn list_messages(
        &self,
        query: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let access_token = self.access_token()?;
        let url = list_url(
            &self.user_url(),
            query,
            max_results.clamp(1, Self::MAX_PAGE_SIZE),
            page_token,
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to send list messages request")?;

        let list: ListMessagesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")?;

        Ok(list)
    }

    /// List every message ID matching `query`, following page tokens
    pub fn list_message_ids_all(&self, query: Option<&str>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response =
                self.list_messages(query, Self::MAX_PAGE_SIZE, page_token.as_deref())?;
            if let Some(messages) = response.messages {
                ids.extend(messages.into_iter().map(|m| m.id));
            }
            debug!(
                "Listed {} Gmail messages so far (estimate {:?})",
                ids.len(),
                response.result_size_estimate
            );

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(ids)
    }

    /// Get a message's selected headers (`format=metadata`)
    pub fn get_message_metadata(&self, id: &str, headers: &[&str]) -> Result<MetadataMessage> {
        let access_token = self.access_token()?;

        let mut url = format!(
            "{}/messages/{}?format=metadata",
            self.user_url(),
            urlencoding::encode(id)
        );
        for header in headers {
            url.push_str(&format!("&metadataHeaders={}", urlencoding::encode(header)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to send get message request")?;

        let message: MetadataMessage = response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")?;

        Ok(message)
    }

    /// Get message metadata with exponential backoff retry
    pub fn get_message_metadata_with_retry(
        &self,
        id: &str,
        headers: &[&str],
        max_retries: u32,
    ) -> Result<MetadataMessage> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 0;

        loop {
            match self.get_message_metadata(id, headers) {
                Ok(msg) => return Ok(msg),
                Err(e) if attempt + 1 >= max_retries => return Err(e),
                Err(e) => {
                    debug!("Metadata fetch for {} failed (attempt {}): {:#}", id, attempt + 1, e);
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Import a raw message with `users.messages.import`
    ///
    /// The internal date is taken from the message's `Date` header, spam
    /// classification and calendar processing are disabled.
    pub fn import_message(&self, raw: &[u8], label_ids: &[String]) -> Result<ImportedMessage> {
        let access_token = self.access_token()?;

        let url = format!(
            "{}/messages/import?internalDateSource=dateHeader&neverMarkSpam=true&processForCalendar=false",
            self.user_url()
        );
        let body = ImportRequest {
            raw: BASE64_URL_SAFE.encode(raw),
            label_ids: label_ids.to_vec(),
        };

        let mut response = ureq::post(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(&body)
            .context("Failed to send import request")?;

        let imported: ImportedMessage = response
            .body_mut()
            .read_json()
            .context("Failed to parse import response")?;

        Ok(imported)
    }

    /// Whether any message carries the given `Message-ID`
    ///
    /// `message_id` is the bare identifier, without angle brackets.
    pub fn exists_by_message_id(&self, message_id: &str) -> Result<bool> {
        let query = format!("rfc822msgid:{}", message_id);
        let response = self.list_messages(Some(&query), 1, None)?;
        Ok(response.messages.is_some_and(|m| !m.is_empty()))
    }

    /// Check if the client is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Trigger authentication flow
    pub fn authenticate(&self) -> Result<()> {
        self.access_token()?;
        Ok(())
    }
}

/// Build a `messages.list` URL
fn list_url(
    user_url: &str,
    query: Option<&str>,
    max_results: usize,
    page_token: Option<&str>,
) -> String {
    let mut url = format!("{}/messages?maxResults={}", user_url, max_results);
    if let Some(q) = query {
        url.push_str(&format!("&q={}", urlencoding::encode(q)));
    }
    if let Some(token) = page_token {
        url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
    }
    url
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::MessageRef;

    #[test]
    fn test_list_url() {
        let url = list_url("https://x/users/me", None, 500, None);
        assert_eq!(url, "https://x/users/me/messages?maxResults=500");

        let url = list_url(
            "https://x/users/me",
            Some("rfc822msgid:a+b@host"),
            1,
            Some("tok"),
        );
        assert_eq!(
            url,
            "https://x/users/me/messages?maxResults=1&q=rfc822msgid%3Aa%2Bb%40host&pageToken=tok"
        );
    }

    #[test]
    fn test_import_request_encoding() {
        let body = ImportRequest {
            raw: BASE64_URL_SAFE.encode(b"Subject: ??>\r\n\r\n"),
            label_ids: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("labelIds").is_none());
        let raw = json["raw"].as_str().unwrap();
        assert!(!raw.contains('+') && !raw.contains('/'));

        let body = ImportRequest {
            raw: String::new(),
            label_ids: vec!["UNREAD".to_string()],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["labelIds"][0], "UNREAD");
    }

    #[test]
    fn test_parse_list_response() {
        let json = r#"{
            "messages": [{"id": "m1", "threadId": "t1"}],
            "nextPageToken": "next",
            "resultSizeEstimate": 1
        }"#;
        let list: ListMessagesResponse = serde_json::from_str(json).unwrap();
        let messages: Vec<MessageRef> = list.messages.unwrap();
        assert_eq!(messages[0].id, "m1");
        assert_eq!(list.next_page_token.as_deref(), Some("next"));

        let empty: ListMessagesResponse = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(empty.messages.is_none());
    }

    #[test]
    fn test_parse_metadata_response() {
        let json = r#"{
            "id": "m1",
            "threadId": "t1",
            "payload": {"headers": [{"name": "Message-Id", "value": "<x@y>"}]}
        }"#;
        let msg: MetadataMessage = serde_json::from_str(json).unwrap();
        let headers = msg.payload.unwrap().headers.unwrap();
        assert_eq!(headers[0].value, "<x@y>");
    }

    #[test]
    fn test_auth_failure_is_downcastable() {
        let err: anyhow::Error = anyhow::anyhow!("io").context(AuthFailedError);
        assert!(err.downcast_ref::<AuthFailedError>().is_some());
    }
}
