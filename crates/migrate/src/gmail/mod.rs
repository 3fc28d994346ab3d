//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication with an on-disk token cache
//! - Gmail API client for listing, importing and searching messages
//! - A [`MailStoreClient`](crate::store::MailStoreClient) adapter that makes
//!   Gmail usable as a migration destination

mod auth;
mod client;
mod store;

pub use auth::GmailAuth;
pub use client::{AuthFailedError, GmailClient};
pub use store::GmailStore;

/// Gmail API request and response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Message returned with `format=metadata`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MetadataMessage {
        pub id: String,
        pub payload: Option<MetadataPayload>,
    }

    /// Payload of a metadata message: headers only
    #[derive(Debug, Deserialize)]
    pub struct MetadataPayload {
        pub headers: Option<Vec<Header>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Body of `users.messages.import`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ImportRequest {
        /// Full RFC 822 message, base64url encoded
        pub raw: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub label_ids: Vec<String>,
    }

    /// Message resource returned by import
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ImportedMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
    }
}
