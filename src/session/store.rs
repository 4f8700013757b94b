//! Session store
//!
//! Bridges the identity provider and the local role records. The provider's
//! auth-state stream is the source of truth: a background listener resolves
//! every identity it reports into a session and publishes the result. Login
//! publishes the same session directly so callers do not wait for the stream.

use super::identity::IdentityProvider;
use super::models::{resolve_session, Identity, Role, RoleRecord, Session, SessionState};
use super::storage::KeyValueStore;
use crate::crew::CrewStore;
use crate::error::AuthError;
use crate::metrics::METRICS;
use secrecy::SecretString;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Storage key of the last known session
pub const LEGACY_SESSION_KEY: &str = "astronaut-health-user";

/// Storage key of the role record for an external identity
pub fn role_key(uid: &str) -> String {
    format!("user-role:{}", uid)
}

/// Session store settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Role for identities without a stored record
    pub fallback_role: Role,
    /// Crew member assigned to astronauts that did not pick one
    pub default_crew_id: String,
    /// Upper bound for every provider call
    pub provider_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fallback_role: Role::Doctor,
            default_crew_id: "ast-001".to_string(),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRole {
    email: String,
    record: RoleRecord,
}

/// Login bookkeeping that is undone when the login ends, including when
/// the login future is dropped before the provider answers
struct LoginAttempt<'a> {
    store: &'a SessionStore,
    settled: bool,
}

impl Drop for LoginAttempt<'_> {
    fn drop(&mut self) {
        self.store.set_pending(None);
        if !self.settled {
            warn!("Login abandoned before the provider answered");
            self.store.state.send_modify(|s| s.is_loading = false);
        }
    }
}

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn KeyValueStore>,
    crew: Arc<CrewStore>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    /// Role chosen by a login that has not finished yet, keyed by email
    pending_role: Mutex<Option<PendingRole>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Create the store and attach the auth-state listener.
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        storage: Arc<dyn KeyValueStore>,
        crew: Arc<CrewStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::loading());
        let store = Arc::new(Self {
            provider,
            storage,
            crew,
            settings,
            state,
            pending_role: Mutex::new(None),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(listen(Arc::downgrade(&store), store.provider.subscribe()));
        *store.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        store
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Wait until the first provider report has been handled
    pub async fn ready(&self) -> SessionState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|s| !s.is_loading).await {
            Ok(state) => state.clone(),
            Err(_) => SessionState::signed_out(),
        };
        state
    }

    /// Sign in and remember the chosen role for this identity
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
        role: Role,
        crew_id: Option<&str>,
    ) -> Result<Session, AuthError> {
        let record = RoleRecord {
            role,
            crew_id: match role {
                Role::Doctor => None,
                Role::Astronaut => Some(
                    crew_id
                        .unwrap_or(&self.settings.default_crew_id)
                        .to_string(),
                ),
            },
        };
        if let Some(crew_id) = &record.crew_id {
            if !self.crew.contains(crew_id) {
                warn!("Login rejected, unknown crew member {}", crew_id);
                METRICS.record_auth("login", false);
                return Err(AuthError::UnknownCrewMember(crew_id.clone()));
            }
        }

        info!("Login attempt for {} as {}", email, role);
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        self.set_pending(Some(PendingRole {
            email: email.trim().to_lowercase(),
            record: record.clone(),
        }));
        let mut attempt = LoginAttempt {
            store: self,
            settled: false,
        };

        let outcome = match tokio::time::timeout(
            self.settings.provider_timeout,
            self.provider.sign_in(email, password),
        )
        .await
        {
            Ok(Ok(identity)) => self.complete_login(&identity, record),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AuthError::Timeout(self.settings.provider_timeout)),
        };
        attempt.settled = true;
        drop(attempt);

        match outcome {
            Ok(session) => {
                METRICS.record_auth("login", true);
                info!("Signed in {} as {}", session.id, session.role);
                self.publish(SessionState::signed_in(session.clone()));
                Ok(session)
            }
            Err(e) => {
                METRICS.record_auth("login", false);
                error!("Login failed: {}", e);
                self.state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    fn complete_login(&self, identity: &Identity, record: RoleRecord) -> Result<Session, AuthError> {
        let raw = serde_json::to_string(&record).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.storage.set(&role_key(&identity.uid), &raw)?;

        let session = self.resolve(identity, Some(record))?;
        self.remember(&session);
        Ok(session)
    }

    /// Sign out at the provider. The role record stays in storage.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let result = match tokio::time::timeout(self.settings.provider_timeout, self.provider.sign_out()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(self.settings.provider_timeout)),
        };

        if let Err(e) = result {
            METRICS.record_auth("logout", false);
            error!("Logout failed: {}", e);
            self.state.send_modify(|s| s.error = Some(e.to_string()));
            return Err(e);
        }

        METRICS.record_auth("logout", true);
        self.forget();
        self.publish(SessionState::signed_out());
        info!("Signed out");
        Ok(())
    }

    /// Session written by the last successful resolution, if any
    pub fn last_known_session(&self) -> Option<Session> {
        let raw = self.storage.get(LEGACY_SESSION_KEY).ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }

    /// Stored role record for an external identity
    pub fn role_record(&self, uid: &str) -> Option<RoleRecord> {
        match self.storage.get(&role_key(uid)) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Ignoring unreadable role record for {}: {}", uid, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Role record lookup failed for {}: {}", uid, e);
                None
            }
        }
    }

    fn resolve(&self, identity: &Identity, record: Option<RoleRecord>) -> Result<Session, AuthError> {
        resolve_session(
            identity,
            record,
            self.settings.fallback_role,
            &self.settings.default_crew_id,
            |crew_id| self.crew.contains(crew_id),
        )
    }

    /// Listener step: turn a provider report into published state
    fn apply_identity(&self, identity: Option<Identity>) {
        let Some(identity) = identity else {
            debug!("Provider reports no identity");
            self.forget();
            self.publish(SessionState::signed_out());
            return;
        };

        let record = self
            .pending_for(&identity)
            .or_else(|| self.role_record(&identity.uid));
        match self.resolve(&identity, record) {
            Ok(session) => {
                self.remember(&session);
                self.publish(SessionState::signed_in(session));
            }
            Err(e) => {
                warn!("Could not resolve session for {}: {}", identity.uid, e);
                self.publish(SessionState::failed(e.to_string()));
            }
        }
    }

    fn publish(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(
                "Session state: user={:?} loading={}",
                next.user.as_ref().map(|u| &u.id),
                next.is_loading
            );
            *current = next;
            true
        });
    }

    fn remember(&self, session: &Session) {
        let written = serde_json::to_string(session)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                self.storage
                    .set(LEGACY_SESSION_KEY, &raw)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = written {
            warn!("Could not persist last known session: {}", e);
        }
    }

    fn forget(&self) {
        if let Err(e) = self.storage.remove(LEGACY_SESSION_KEY) {
            warn!("Could not clear last known session: {}", e);
        }
    }

    /// Pending role of an in-flight login by this identity
    fn pending_for(&self, identity: &Identity) -> Option<RoleRecord> {
        let email = identity.email.as_deref()?.trim().to_lowercase();
        self.pending_role
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|pending| pending.email == email)
            .map(|pending| pending.record.clone())
    }

    fn set_pending(&self, pending: Option<PendingRole>) {
        *self.pending_role.lock().unwrap_or_else(PoisonError::into_inner) = pending;
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn listen(store: Weak<SessionStore>, mut identities: watch::Receiver<Option<Identity>>) {
    loop {
        let identity = identities.borrow_and_update().clone();
        match store.upgrade() {
            Some(store) => store.apply_identity(identity),
            None => break,
        }
        if identities.changed().await.is_err() {
            debug!("Identity provider closed its auth-state stream");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::identity::MockIdentityProvider;
    use crate::session::storage::MemoryStorage;

    const DOCTOR_EMAIL: &str = "harper@mission.control";
    const ASTRONAUT_EMAIL: &str = "mitchell@crew.space";

    struct Harness {
        provider: Arc<MockIdentityProvider>,
        storage: Arc<MemoryStorage>,
        store: Arc<SessionStore>,
    }

    fn harness(latency: Duration, timeout: Duration) -> Harness {
        let provider = Arc::new(
            MockIdentityProvider::new(latency)
                .with_account(DOCTOR_EMAIL, "orbit", Some("Dr. Elizabeth Harper"))
                .with_account(ASTRONAUT_EMAIL, "apogee", Some("Alex Mitchell")),
        );
        let storage = Arc::new(MemoryStorage::new());
        let crew = Arc::new(CrewStore::with_fixtures().unwrap());
        let store = SessionStore::spawn(
            provider.clone(),
            storage.clone(),
            crew,
            SessionSettings {
                provider_timeout: timeout,
                ..Default::default()
            },
        );
        Harness {
            provider,
            storage,
            store,
        }
    }

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[tokio::test]
    async fn test_starts_loading_then_signed_out() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        let state = h.store.ready().await;
        assert!(!state.is_loading);
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn test_login_persists_role_record() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;

        let session = h
            .store
            .login(ASTRONAUT_EMAIL, &secret("apogee"), Role::Astronaut, Some("ast-004"))
            .await
            .unwrap();
        assert_eq!(session.role, Role::Astronaut);
        assert_eq!(session.crew_id.as_deref(), Some("ast-004"));
        assert_eq!(session.name, "Alex Mitchell");

        let raw = h.storage.get(&role_key(&session.id)).unwrap().unwrap();
        assert_eq!(raw, r#"{"role":"astronaut","crew_id":"ast-004"}"#);
        assert_eq!(h.store.current().user, Some(session.clone()));
        assert_eq!(h.store.last_known_session(), Some(session));
    }

    #[tokio::test]
    async fn test_listener_agrees_with_login() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        let session = h
            .store
            .login(DOCTOR_EMAIL, &secret("orbit"), Role::Doctor, None)
            .await
            .unwrap();

        // Let the listener handle the provider's report
        tokio::task::yield_now().await;
        assert_eq!(h.store.current().user, Some(session));
    }

    #[tokio::test]
    async fn test_role_survives_reconnect() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        let session = h
            .store
            .login(ASTRONAUT_EMAIL, &secret("apogee"), Role::Astronaut, None)
            .await
            .unwrap();

        // Provider drops and restores the identity without a login call
        let identity = Identity {
            uid: session.id.clone(),
            email: Some(ASTRONAUT_EMAIL.to_string()),
            display_name: Some("Alex Mitchell".to_string()),
        };
        h.provider.emit(None);
        let mut rx = h.store.subscribe();
        rx.wait_for(|s| s.user.is_none()).await.unwrap();

        h.provider.emit(Some(identity));
        let state = rx.wait_for(|s| s.user.is_some()).await.unwrap().clone();
        assert_eq!(state.user.unwrap().role, Role::Astronaut);
    }

    #[tokio::test]
    async fn test_unknown_identity_gets_fallback_role() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        h.provider.emit(Some(Identity {
            uid: "external-only".to_string(),
            email: Some("ops@mission.control".to_string()),
            display_name: None,
        }));

        let mut rx = h.store.subscribe();
        let state = rx.wait_for(|s| s.user.is_some()).await.unwrap().clone();
        let user = state.user.unwrap();
        assert_eq!(user.role, Role::Doctor);
        assert_eq!(user.name, "ops");
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        let err = h
            .store
            .login(DOCTOR_EMAIL, &secret("wrong"), Role::Doctor, None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);

        let state = h.store.current();
        assert!(!state.is_loading);
        assert!(state.user.is_none());
        assert_eq!(state.error.as_deref(), Some("Invalid email or password"));
    }

    #[tokio::test]
    async fn test_login_unknown_crew_never_reaches_provider() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        let err = h
            .store
            .login(ASTRONAUT_EMAIL, &secret("apogee"), Role::Astronaut, Some("ast-999"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::UnknownCrewMember("ast-999".to_string()));
        assert!(h.provider.subscribe().borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_times_out() {
        let h = harness(Duration::from_secs(30), Duration::from_secs(2));
        h.store.ready().await;
        let err = h
            .store
            .login(DOCTOR_EMAIL, &secret("orbit"), Role::Doctor, None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Timeout(Duration::from_secs(2)));
        assert!(!h.store.current().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_login_releases_loading() {
        let h = harness(Duration::from_secs(1), Duration::from_secs(10));
        h.store.ready().await;

        let store = h.store.clone();
        let attempt = tokio::spawn(async move {
            store
                .login(ASTRONAUT_EMAIL, &secret("apogee"), Role::Astronaut, Some("ast-004"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.store.current().is_loading);

        attempt.abort();
        assert!(attempt.await.unwrap_err().is_cancelled());

        let state = h.store.current();
        assert!(!state.is_loading);
        assert!(state.user.is_none());

        let admission = crate::guard::AccessGuard::default()
            .admit("/chat", &[], h.store.subscribe())
            .await;
        assert!(matches!(admission, crate::guard::Admission::Redirect(_)));

        // The abandoned role choice does not leak onto the next identity
        h.provider.emit(Some(Identity {
            uid: "mitchell-uid".to_string(),
            email: Some(ASTRONAUT_EMAIL.to_string()),
            display_name: None,
        }));
        let mut rx = h.store.subscribe();
        let state = rx.wait_for(|s| s.user.is_some()).await.unwrap().clone();
        assert_eq!(state.user.unwrap().role, Role::Doctor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_role_only_applies_to_its_identity() {
        let h = harness(Duration::from_secs(1), Duration::from_secs(10));
        h.store.ready().await;

        let store = h.store.clone();
        let attempt = tokio::spawn(async move {
            store
                .login(ASTRONAUT_EMAIL, &secret("apogee"), Role::Astronaut, Some("ast-004"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.provider.emit(Some(Identity {
            uid: "external-only".to_string(),
            email: Some("ops@mission.control".to_string()),
            display_name: None,
        }));
        let mut rx = h.store.subscribe();
        let state = rx
            .wait_for(|s| s.user.as_ref().is_some_and(|u| u.id == "external-only"))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.user.unwrap().role, Role::Doctor);

        let session = attempt.await.unwrap().unwrap();
        assert_eq!(session.role, Role::Astronaut);
        assert_eq!(session.crew_id.as_deref(), Some("ast-004"));
    }

    #[tokio::test]
    async fn test_logout_keeps_role_record() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        let session = h
            .store
            .login(DOCTOR_EMAIL, &secret("orbit"), Role::Doctor, None)
            .await
            .unwrap();

        h.store.logout().await.unwrap();
        assert!(h.store.current().user.is_none());
        assert!(h.store.last_known_session().is_none());
        assert_eq!(
            h.store.role_record(&session.id),
            Some(RoleRecord {
                role: Role::Doctor,
                crew_id: None
            })
        );
    }

    #[tokio::test]
    async fn test_logout_failure_is_reported() {
        let h = harness(Duration::ZERO, Duration::from_secs(1));
        h.store.ready().await;
        h.store
            .login(DOCTOR_EMAIL, &secret("orbit"), Role::Doctor, None)
            .await
            .unwrap();

        h.provider.set_fail_sign_out(true);
        assert!(matches!(h.store.logout().await, Err(AuthError::SignOutFailed(_))));
        // Still signed in
        assert!(h.store.current().user.is_some());
    }
}
