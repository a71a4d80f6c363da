use ftpclaim_core::{OAuthClient, OAuthToken, ServiceAccountClient};
use thiserror::Error;

const REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("oauth client is required to refresh expired token")]
    MissingOAuthClient,
    #[error("refresh token is missing")]
    MissingRefreshToken,
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] ftpclaim_core::OAuthError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` never expires.
    pub expires_at: Option<i64>,
}

impl OAuthState {
    pub fn from_oauth_token(token: &OAuthToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|secs| now_unix().saturating_add(secs as i64)),
        }
    }
}

/// Hands out bearer tokens for the spreadsheet API, refreshing shortly
/// before they expire.
pub struct TokenProvider {
    state: OAuthState,
    oauth_client: Option<OAuthClient>,
    service_account: Option<ServiceAccountClient>,
    refresh_skew_secs: i64,
}

impl TokenProvider {
    pub fn new(state: OAuthState, oauth_client: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth_client,
            service_account: None,
            refresh_skew_secs: REFRESH_SKEW_SECS,
        }
    }

    /// A pre-issued token that is used as-is.
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self::new(
            OAuthState {
                access_token: access_token.into(),
                refresh_token: None,
                expires_at: None,
            },
            None,
        )
    }

    /// Starts without an access token, so the first request triggers a refresh.
    pub fn from_refresh_token(refresh_token: impl Into<String>, oauth_client: OAuthClient) -> Self {
        Self::new(
            OAuthState {
                access_token: String::new(),
                refresh_token: Some(refresh_token.into()),
                expires_at: Some(0),
            },
            Some(oauth_client),
        )
    }

    /// Mints a new token from the service account key whenever the current
    /// one is about to expire.
    pub fn from_service_account(client: ServiceAccountClient) -> Self {
        let mut provider = Self::new(
            OAuthState {
                access_token: String::new(),
                refresh_token: None,
                expires_at: Some(0),
            },
            None,
        );
        provider.service_account = Some(client);
        provider
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.should_refresh() {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }

    pub async fn refresh_now(&mut self) -> Result<String, TokenProviderError> {
        self.refresh().await?;
        Ok(self.state.access_token.clone())
    }

    fn should_refresh(&self) -> bool {
        let Some(expires_at) = self.state.expires_at else {
            return false;
        };
        expires_at <= now_unix().saturating_add(self.refresh_skew_secs)
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        if let Some(client) = &self.service_account {
            let token = client.fetch_token().await?;
            self.state = OAuthState::from_oauth_token(&token);
            tracing::debug!(
                account = client.client_email(),
                expires_at = ?self.state.expires_at,
                "service account token issued"
            );
            return Ok(());
        }
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .oauth_client
            .as_ref()
            .ok_or(TokenProviderError::MissingOAuthClient)?;
        let token = client.refresh_token(&refresh_token).await?;
        let mut refreshed = OAuthState::from_oauth_token(&token);
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        tracing::debug!(expires_at = ?refreshed.expires_at, "spreadsheet token refreshed");
        self.state = refreshed;
        Ok(())
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
