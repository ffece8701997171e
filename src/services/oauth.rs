//! OAuth 2.0 clients for the Google and Instagram integrations

use base64::Engine;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use thiserror::Error;

use crate::config::OAuthCredentials;

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const INSTAGRAM_AUTHORIZE_URL: &str = "https://www.instagram.com/oauth/authorize";
const INSTAGRAM_TOKEN_URL: &str = "https://api.instagram.com/oauth/access_token";
const INSTAGRAM_LONG_LIVED_URL: &str = "https://graph.instagram.com/access_token";
const INSTAGRAM_REFRESH_URL: &str = "https://graph.instagram.com/refresh_access_token";

/// Instagram short-lived tokens last an hour
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Instagram,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Instagram => "instagram",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "instagram" => Some(Provider::Instagram),
            _ => None,
        }
    }

    /// Table holding this provider's integration records
    pub fn table(&self) -> &'static str {
        match self {
            Provider::Google => "google_integrations",
            Provider::Instagram => "instagram_integrations",
        }
    }

    fn scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &[
                "openid",
                "email",
                "https://www.googleapis.com/auth/youtube.readonly",
                "https://www.googleapis.com/auth/yt-analytics.readonly",
                "https://www.googleapis.com/auth/drive.file",
            ],
            Provider::Instagram => &[
                "instagram_business_basic",
                "instagram_business_content_publish",
                "instagram_business_manage_insights",
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
}

#[derive(Debug)]
pub struct AuthorizeRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenResponse, OAuthError>> + Send;
}

#[derive(Clone)]
pub struct OAuthClient {
    provider: Provider,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: Client,
}

impl OAuthClient {
    pub fn new(provider: Provider, credentials: &OAuthCredentials) -> Self {
        Self {
            provider,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            redirect_uri: credentials.redirect_uri.clone(),
            http: Client::new(),
        }
    }

    /// Generate PKCE code verifier and challenge
    fn generate_pkce() -> (String, String) {
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);

        let hash = Sha256::digest(code_verifier.as_bytes());
        let code_challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash);

        (code_verifier, code_challenge)
    }

    /// Generate random state for CSRF protection
    fn generate_state() -> String {
        let bytes: [u8; 16] = rand::rng().random();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Build the consent URL. Google gets PKCE; Instagram Login does not support it.
    pub fn get_authorize_url(&self) -> AuthorizeRequest {
        let state = Self::generate_state();

        match self.provider {
            Provider::Google => {
                let (code_verifier, code_challenge) = Self::generate_pkce();
                let scope = self
                    .provider
                    .scopes()
                    .iter()
                    .map(|s| percent_encode(s))
                    .collect::<Vec<_>>()
                    .join("%20");
                let url = format!(
                    "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&access_type=offline&prompt=consent&code_challenge={}&code_challenge_method=S256",
                    GOOGLE_AUTHORIZE_URL,
                    percent_encode(&self.client_id),
                    percent_encode(&self.redirect_uri),
                    scope,
                    percent_encode(&state),
                    percent_encode(&code_challenge)
                );
                AuthorizeRequest {
                    url,
                    state,
                    code_verifier: Some(code_verifier),
                }
            }
            Provider::Instagram => {
                let scope = self.provider.scopes().join(",");
                let url = format!(
                    "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
                    INSTAGRAM_AUTHORIZE_URL,
                    percent_encode(&self.client_id),
                    percent_encode(&self.redirect_uri),
                    percent_encode(&scope),
                    percent_encode(&state)
                );
                AuthorizeRequest {
                    url,
                    state,
                    code_verifier: None,
                }
            }
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// For Instagram the short-lived token is immediately traded for a
    /// long-lived one, which then doubles as the refresh credential.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        match self.provider {
            Provider::Google => {
                let mut params = vec![
                    ("code", code),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("redirect_uri", self.redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ];
                if let Some(verifier) = code_verifier {
                    params.push(("code_verifier", verifier));
                }

                let resp = self.http.post(GOOGLE_TOKEN_URL).form(&params).send().await?;
                self.parse_token(resp).await
            }
            Provider::Instagram => {
                let params = [
                    ("code", code),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("redirect_uri", self.redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ];

                let resp = self
                    .http
                    .post(INSTAGRAM_TOKEN_URL)
                    .form(&params)
                    .send()
                    .await?;
                let short_lived = self.parse_token(resp).await?;

                let resp = self
                    .http
                    .get(INSTAGRAM_LONG_LIVED_URL)
                    .query(&[
                        ("grant_type", "ig_exchange_token"),
                        ("client_secret", self.client_secret.as_str()),
                        ("access_token", short_lived.access_token.as_str()),
                    ])
                    .send()
                    .await?;
                let mut long_lived = self.parse_token(resp).await?;
                long_lived.refresh_token = Some(long_lived.access_token.clone());
                Ok(long_lived)
            }
        }
    }

    /// Refresh an access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        match self.provider {
            Provider::Google => {
                let params = [
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ];

                let resp = self.http.post(GOOGLE_TOKEN_URL).form(&params).send().await?;
                self.parse_token(resp).await
            }
            Provider::Instagram => {
                let resp = self
                    .http
                    .get(INSTAGRAM_REFRESH_URL)
                    .query(&[
                        ("grant_type", "ig_refresh_token"),
                        ("access_token", refresh_token),
                    ])
                    .send()
                    .await?;
                let mut token = self.parse_token(resp).await?;
                token.refresh_token = Some(token.access_token.clone());
                Ok(token)
            }
        }
    }

    async fn parse_token(&self, resp: reqwest::Response) -> Result<TokenResponse, OAuthError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            return Err(OAuthError::Api {
                provider: self.provider.as_str(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json().await?)
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenResponse, OAuthError>> + Send {
        self.refresh_token(refresh_token)
    }
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}
