//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow for installed apps. Tokens
//! are cached in the configured token file and refreshed when they expire;
//! a browser-based consent flow through a loopback listener is only needed
//! when no usable refresh token exists.
//! Uses synchronous HTTP (ureq) to stay executor-agnostic.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use crate::settings::GmailCredentials;

/// Seconds before expiry at which a cached token is treated as stale
const EXPIRY_SKEW_SECS: i64 = 300;

/// OAuth2 configuration and token cache for Gmail
pub struct GmailAuth {
    credentials: GmailCredentials,
    token_path: PathBuf,
}

/// Token data persisted in the token file
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    /// Whether the access token is still usable at `now` (unix seconds)
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_SKEW_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: String,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Import, search and label changes all fall under `gmail.modify`
    const GMAIL_MODIFY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.modify";

    /// Port range to try for the local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create a new GmailAuth caching tokens at `token_path`
    pub fn new(credentials: GmailCredentials, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials,
            token_path: token_path.into(),
        }
    }

    /// Path of the token cache
    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        if let Ok(token) = self.load_token() {
            if token.is_fresh(chrono::Utc::now().timestamp()) {
                return Ok(token.access_token);
            }

            if let Some(refresh_token) = token.refresh_token {
                match self.refresh_access_token(&refresh_token) {
                    Ok(new_token) => {
                        debug!("Refreshed Gmail access token");
                        self.save_token_response(&new_token)?;
                        return Ok(new_token.access_token);
                    }
                    Err(e) => warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let token = self.authorization_code_auth()?;
        self.save_token_response(&token)?;
        Ok(token.access_token)
    }

    /// Perform the interactive authorization code flow
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_MODIFY_SCOPE),
        );

        println!("\n=== Gmail Authentication Required ===");
        println!("Opening browser for authentication...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        println!("Waiting for authorization...");
        let code = self.wait_for_callback(listener)?;

        info!("Exchanging authorization code for tokens");
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        println!("Authentication successful!\n");
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for the OAuth redirect and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let code = callback_param(&request_line, "code");
        let error = callback_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }
        code.context("No authorization code received")
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh; keep the old one
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        let token: StoredToken = serde_json::from_str(&content)?;
        Ok(token)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<()> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };
        config::save_json_file(&self.token_path, &stored)
            .with_context(|| format!("Failed to save token to {}", self.token_path.display()))
    }

    /// Check whether a cached token exists and is usable without a browser
    pub fn is_authenticated(&self) -> bool {
        match self.load_token() {
            Ok(token) if token.is_fresh(chrono::Utc::now().timestamp()) => true,
            Ok(token) => token
                .refresh_token
                .is_some_and(|rt| self.refresh_access_token(&rt).is_ok()),
            Err(_) => false,
        }
    }

    /// Remove the cached token
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// Extract a query parameter from an HTTP request line
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn callback_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key == name {
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> GmailCredentials {
        GmailCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_callback_param() {
        let line = "GET /?code=4%2F0Abc&scope=https%3A%2F%2Fmail HTTP/1.1\r\n";
        assert_eq!(callback_param(line, "code"), Some("4/0Abc".to_string()));
        assert_eq!(callback_param(line, "error"), None);

        let line = "GET /?error=access_denied HTTP/1.1\r\n";
        assert_eq!(callback_param(line, "error"), Some("access_denied".to_string()));
        assert_eq!(callback_param(line, "code"), None);

        assert_eq!(callback_param("GET /favicon.ico HTTP/1.1", "code"), None);
        assert_eq!(callback_param("", "code"), None);
    }

    #[test]
    fn test_token_freshness() {
        let now = 1_700_000_000;
        let token = |expires_at| StoredToken {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at,
        };
        assert!(token(Some(now + 3600)).is_fresh(now));
        assert!(!token(Some(now + 60)).is_fresh(now));
        assert!(!token(Some(now - 10)).is_fresh(now));
        assert!(!token(None).is_fresh(now));
    }

    #[test]
    fn test_cached_token_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let stored = StoredToken {
            access_token: "cached-token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        };
        config::save_json_file(&path, &stored).unwrap();

        let auth = GmailAuth::new(credentials(), &path);
        assert_eq!(auth.get_access_token().unwrap(), "cached-token");
        assert!(auth.is_authenticated());

        auth.logout().unwrap();
        assert!(!path.exists());
    }
}
