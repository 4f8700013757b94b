//! Crew health console backend
//!
//! Role-based monitoring for a space-mission medical team:
//! - Sessions join an external identity with a locally stored role
//! - An access guard debounces redirects while sessions settle
//! - An in-memory crew store holds fixture records, tasks, queries and chat

pub mod api;
pub mod config;
pub mod crew;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod session;

pub use api::{build_router, AppState};
pub use config::Config;
pub use error::{HealthError, Result};

use crate::config::ProviderKind;
use crate::crew::CrewStore;
use crate::guard::AccessGuard;
use crate::session::{
    FileStorage, IdentityProvider, KeyValueStore, MemoryStorage, MockIdentityProvider,
    RestIdentityProvider, SessionSettings, SessionStore,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

/// Identity provider selected by the auth section
pub fn build_identity_provider(config: &Config) -> Result<Arc<dyn IdentityProvider>> {
    let auth = &config.auth;
    match auth.provider {
        ProviderKind::Mock => {
            let provider = MockIdentityProvider::new(auth.simulated_latency()).accept_any(auth.accept_any);
            for account in &auth.accounts {
                provider.add_account(
                    &account.email,
                    account.password.expose_secret(),
                    account.display_name.as_deref(),
                );
            }
            info!("Using mock identity provider with {} accounts", auth.accounts.len());
            Ok(Arc::new(provider))
        }
        ProviderKind::Rest => {
            let base_url = auth
                .base_url
                .as_deref()
                .ok_or_else(|| HealthError::Config("auth.base_url is required".to_string()))?;
            let api_key = auth
                .api_key
                .as_ref()
                .map(|k| SecretString::new(k.expose_secret().clone()))
                .ok_or_else(|| HealthError::Config("auth.api_key is required".to_string()))?;
            info!("Using REST identity provider at {}", base_url);
            Ok(Arc::new(RestIdentityProvider::new(base_url, api_key, auth.timeout())?))
        }
    }
}

/// Session persistence selected by the storage section
pub fn build_storage(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    match &config.storage.path {
        Some(path) => {
            info!("Persisting sessions to {}", path);
            Ok(Arc::new(FileStorage::open(path)?))
        }
        None => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Wire the stores and the guard. Must run inside a tokio runtime: the
/// session store starts its auth-state listener here.
pub fn build_state(config: &Config) -> Result<AppState> {
    let crew = Arc::new(CrewStore::with_fixtures()?);
    let provider = build_identity_provider(config)?;
    let storage = build_storage(config)?;

    let sessions = SessionStore::spawn(
        provider,
        storage,
        crew.clone(),
        SessionSettings {
            fallback_role: config.auth.fallback_role,
            default_crew_id: config.auth.default_crew_id.clone(),
            provider_timeout: config.auth.timeout(),
        },
    );
    let guard = Arc::new(AccessGuard::new(
        config.guard.redirect_delay(),
        config.guard.loading_grace(),
    ));

    Ok(AppState {
        crew,
        sessions,
        guard,
    })
}
