//! External identity providers
//!
//! The provider knows who a user is, never what role they play. Auth state
//! changes are published on a watch channel; dropping the receiver ends the
//! subscription.

use super::models::Identity;
use crate::error::AuthError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<Identity, AuthError>;

    /// End the provider session
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Current identity, followed by every change
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

struct MockAccount {
    uid: String,
    email: String,
    password: SecretString,
    display_name: Option<String>,
}

/// In-memory provider for local runs and tests
pub struct MockIdentityProvider {
    accounts: DashMap<String, MockAccount>,
    state: watch::Sender<Option<Identity>>,
    latency: Duration,
    accept_any: bool,
    fail_sign_out: AtomicBool,
}

impl MockIdentityProvider {
    pub fn new(latency: Duration) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            accounts: DashMap::new(),
            state,
            latency,
            accept_any: false,
            fail_sign_out: AtomicBool::new(false),
        }
    }

    /// Accept any non-empty credentials, registering unknown emails on first use
    pub fn accept_any(mut self, accept: bool) -> Self {
        self.accept_any = accept;
        self
    }

    pub fn with_account(self, email: &str, password: &str, display_name: Option<&str>) -> Self {
        self.add_account(email, password, display_name);
        self
    }

    /// Register an account and return its uid
    pub fn add_account(&self, email: &str, password: &str, display_name: Option<&str>) -> String {
        let uid = uuid::Uuid::new_v4().to_string();
        self.accounts.insert(
            email.to_lowercase(),
            MockAccount {
                uid: uid.clone(),
                email: email.to_string(),
                password: SecretString::new(password.to_string()),
                display_name: display_name.map(str::to_string),
            },
        );
        uid
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Push an auth state change, as the provider would on token expiry
    pub fn emit(&self, identity: Option<Identity>) {
        self.state.send_replace(identity);
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<Identity, AuthError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let email = email.trim();
        if email.is_empty() || password.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let key = email.to_lowercase();
        if self.accept_any && !self.accounts.contains_key(&key) {
            self.add_account(email, password.expose_secret(), None);
        }

        let identity = {
            let account = self.accounts.get(&key).ok_or(AuthError::InvalidCredentials)?;
            if account.password.expose_secret() != password.expose_secret() {
                return Err(AuthError::InvalidCredentials);
            }
            Identity {
                uid: account.uid.clone(),
                email: Some(account.email.clone()),
                display_name: account.display_name.clone(),
            }
        };

        debug!("Mock provider signed in {}", identity.uid);
        self.state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::SignOutFailed("provider unavailable".to_string()));
        }
        self.state.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

const CREDENTIAL_ERRORS: [&str; 5] = [
    "EMAIL_NOT_FOUND",
    "INVALID_PASSWORD",
    "INVALID_LOGIN_CREDENTIALS",
    "INVALID_EMAIL",
    "USER_DISABLED",
];

/// Password sign-in against an Identity Toolkit style REST API
pub struct RestIdentityProvider {
    http: Client,
    base_url: String,
    api_key: SecretString,
    state: watch::Sender<Option<Identity>>,
}

impl RestIdentityProvider {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        let (state, _) = watch::channel(None);

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            state,
        })
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<Identity, AuthError> {
        let url = format!("{}/v1/accounts:signInWithPassword", self.base_url);
        debug!("Signing in via {}", url);

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.expose_secret().as_str())])
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            warn!("Identity provider rejected sign-in: {}", message);

            if CREDENTIAL_ERRORS.iter().any(|code| message.starts_with(code)) {
                return Err(AuthError::InvalidCredentials);
            }
            return Err(AuthError::Provider(message));
        }

        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("Invalid sign-in response: {}", e)))?;

        let identity = Identity {
            uid: body.local_id,
            email: body.email.or_else(|| Some(email.to_string())),
            display_name: body.display_name.filter(|n| !n.is_empty()),
        };
        info!("Signed in {}", identity.uid);
        self.state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        // Tokens are only held locally, so signing out is forgetting them
        self.state.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[tokio::test]
    async fn test_mock_sign_in_and_out() {
        let provider = MockIdentityProvider::new(Duration::ZERO).with_account(
            "harper@mission.control",
            "orbit",
            Some("Dr. Elizabeth Harper"),
        );
        let mut rx = provider.subscribe();
        assert!(rx.borrow_and_update().is_none());

        let identity = provider
            .sign_in("Harper@Mission.Control", &secret("orbit"))
            .await
            .unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Dr. Elizabeth Harper"));
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&identity));

        provider.sign_out().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_mock_rejects_bad_password() {
        let provider =
            MockIdentityProvider::new(Duration::ZERO).with_account("a@b.c", "right", None);
        assert_eq!(
            provider.sign_in("a@b.c", &secret("wrong")).await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            provider.sign_in("nobody@b.c", &secret("right")).await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_mock_accept_any_is_stable() {
        let provider = MockIdentityProvider::new(Duration::ZERO).accept_any(true);
        let first = provider.sign_in("new@crew.space", &secret("pw")).await.unwrap();
        let second = provider.sign_in("new@crew.space", &secret("pw")).await.unwrap();
        assert_eq!(first.uid, second.uid);
        assert!(provider.sign_in("new@crew.space", &secret("")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_sign_out_failure() {
        let provider = MockIdentityProvider::new(Duration::ZERO);
        provider.set_fail_sign_out(true);
        assert!(matches!(provider.sign_out().await, Err(AuthError::SignOutFailed(_))));
    }

    #[tokio::test]
    async fn test_rest_sign_in_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "test-key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"localId":"uid-7","email":"chen@crew.space","displayName":"Sarah Chen","idToken":"t"}"#)
            .create_async()
            .await;

        let provider =
            RestIdentityProvider::new(&server.url(), secret("test-key"), Duration::from_secs(5)).unwrap();
        let rx = provider.subscribe();

        let identity = provider.sign_in("chen@crew.space", &secret("pw")).await.unwrap();
        assert_eq!(identity.uid, "uid-7");
        assert_eq!(identity.display_name.as_deref(), Some("Sarah Chen"));
        assert_eq!(rx.borrow().as_ref(), Some(&identity));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rest_invalid_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"INVALID_LOGIN_CREDENTIALS"}}"#)
            .create_async()
            .await;

        let provider =
            RestIdentityProvider::new(&server.url(), secret("k"), Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.sign_in("x@y.z", &secret("bad")).await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_rest_provider_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let provider =
            RestIdentityProvider::new(&server.url(), secret("k"), Duration::from_secs(5)).unwrap();
        let err = provider.sign_in("x@y.z", &secret("pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(msg) if msg.contains("503")));
    }
}
