use crate::correlator::{OAuthCorrelator, WaitError};
use async_trait::async_trait;
use shared::http::BoxError;
use std::future::Future;

/// Temporary credentials from the first leg of the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestToken {
    pub token: String,
    pub token_secret: String,
    /// Where the user has to go to grant access.
    pub authorize_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    pub token_secret: String,
}

/// The tracker's OAuth endpoints.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn request_token(&self) -> Result<RequestToken, BoxError>;

    async fn exchange(&self, request: &RequestToken, verifier: &str) -> Result<AccessGrant, BoxError>;
}

#[derive(thiserror::Error, Debug)]
pub enum AuthorizationError {
    #[error("authorization was not granted in time")]
    Timeout,
    #[error("a newer authorization attempt replaced this one")]
    Superseded,
    #[error("could not send the authorization link: {0}")]
    Announce(BoxError),
    #[error("authorization provider failed: {0}")]
    Provider(BoxError),
}

impl From<WaitError> for AuthorizationError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => AuthorizationError::Timeout,
            WaitError::Superseded => AuthorizationError::Superseded,
        }
    }
}

/// Runs the three-legged handshake for one user.
///
/// The request token is registered with `correlator` before `announce` hands
/// the authorization URL to the user, so a fast redirect cannot be missed.
pub async fn authorize<P, A, Fut>(
    provider: &P,
    correlator: &OAuthCorrelator,
    announce: A,
) -> Result<AccessGrant, AuthorizationError>
where
    P: AuthorizationProvider + ?Sized,
    A: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    let request = provider
        .request_token()
        .await
        .map_err(AuthorizationError::Provider)?;

    let wait = correlator.begin_wait(&request.token);
    if let Err(err) = announce(request.authorize_url.clone()).await {
        // Nobody was sent to the authorization page, so no callback should
        // find this attempt.
        correlator.cancel(wait);
        return Err(AuthorizationError::Announce(err));
    }

    let callback = wait.wait().await?;
    tracing::debug!("Authorization granted, exchanging for an access token");

    provider
        .exchange(&request, &callback.oauth_verifier)
        .await
        .map_err(AuthorizationError::Provider)
}
