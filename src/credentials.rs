//! Credential endpoint client
//!
//! Fetches the single-use token the transcription session needs. A fresh
//! token is fetched for every (re)connect.

use async_trait::async_trait;
use secrecy::SecretString;
use url::Url;

use crate::{Error, Result};

/// Response body of the credential endpoint
#[derive(serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Source of transcription credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a fresh credential
    ///
    /// # Errors
    ///
    /// Returns `CredentialFetch` on transport failure, non-2xx status, or a
    /// missing/empty token
    async fn fetch(&self) -> Result<SecretString>;
}

/// Fetches credentials over HTTP
pub struct HttpCredentials {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpCredentials {
    /// Create a client for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// The endpoint this client fetches from
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialSource for HttpCredentials {
    async fn fetch(&self) -> Result<SecretString> {
        tracing::debug!(endpoint = %self.endpoint, "fetching transcription credential");

        let response = self
            .client
            .get(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "credential request failed");
                Error::CredentialFetch(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, "credential endpoint error");
            return Err(Error::CredentialFetch(format!(
                "Token request failed ({})",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse credential response");
            Error::CredentialFetch(e.to_string())
        })?;

        match body.token {
            Some(token) if !token.is_empty() => {
                tracing::debug!("credential received");
                Ok(SecretString::from(token))
            }
            _ => Err(Error::CredentialFetch("Missing token".to_string())),
        }
    }
}
