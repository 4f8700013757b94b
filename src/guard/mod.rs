//! Role-based access guard
//!
//! Decides per navigation whether to render, keep showing the loading
//! placeholder, or redirect. Redirects are debounced so a session that is
//! still settling does not bounce the user to the login view.

pub mod machine;

pub use machine::{login_location, GuardMachine, GuardState, Redirect, RedirectCause};

use crate::session::{Role, Session, SessionState};
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Sleep};
use tracing::debug;

/// Default debounce before a redirect is acted on
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(750);

/// Default time a request may wait for the session to resolve
pub const DEFAULT_LOADING_GRACE: Duration = Duration::from_millis(3000);

/// Guard decision for one navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Render(Session),
    Redirect(Redirect),
    /// Session did not resolve within the loading grace window
    Loading,
}

#[derive(Debug, Clone)]
pub struct AccessGuard {
    redirect_delay: Duration,
    loading_grace: Duration,
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REDIRECT_DELAY, DEFAULT_LOADING_GRACE)
    }
}

impl AccessGuard {
    pub fn new(redirect_delay: Duration, loading_grace: Duration) -> Self {
        Self {
            redirect_delay,
            loading_grace,
        }
    }

    pub fn redirect_delay(&self) -> Duration {
        self.redirect_delay
    }

    pub fn loading_grace(&self) -> Duration {
        self.loading_grace
    }

    /// Run the guard for `requested` until it reaches a decision.
    ///
    /// Every session update re-evaluates the machine and drops the pending
    /// debounce timer; it is re-armed only while the new state still calls
    /// for a redirect.
    pub async fn admit(
        &self,
        requested: &str,
        allowed: &[Role],
        mut sessions: watch::Receiver<SessionState>,
    ) -> Admission {
        let mut machine = GuardMachine::new(requested, allowed);
        let grace = sleep(self.loading_grace);
        tokio::pin!(grace);
        let mut timer: Option<Pin<Box<Sleep>>> = None;
        let mut closed = false;

        loop {
            let state = if closed {
                SessionState::signed_out()
            } else {
                sessions.borrow_and_update().clone()
            };

            match machine.evaluate(&state) {
                GuardState::AuthenticatedAllowed => {
                    if let Some(session) = machine.session() {
                        debug!("Guard admits {} to {}", session.id, requested);
                        return Admission::Render(session.clone());
                    }
                }
                _ if machine.awaiting_redirect() => {
                    timer = Some(Box::pin(sleep(self.redirect_delay)));
                }
                _ => timer = None,
            }

            tokio::select! {
                changed = sessions.changed(), if !closed => {
                    if changed.is_err() {
                        debug!("Session channel closed while guarding {}", requested);
                        closed = true;
                    }
                }
                _ = async {
                    match timer.as_mut() {
                        Some(t) => t.await,
                        None => pending().await,
                    }
                } => {
                    if let Some(redirect) = machine.timer_elapsed() {
                        machine.complete_redirect();
                        debug!("Guard redirects {} to {}", requested, redirect.location());
                        return Admission::Redirect(redirect);
                    }
                    timer = None;
                }
                _ = &mut grace, if machine.state() == GuardState::Loading => {
                    debug!("Session still loading after {:?} for {}", self.loading_grace, requested);
                    return Admission::Loading;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn signed_in(role: Role) -> SessionState {
        SessionState::signed_in(Session {
            id: format!("uid-{}", role),
            name: "Test".to_string(),
            email: "test@crew.space".to_string(),
            role,
            crew_id: (role == Role::Astronaut).then(|| "ast-002".to_string()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowed_renders_without_delay() {
        let (_tx, rx) = watch::channel(signed_in(Role::Doctor));
        let start = Instant::now();
        let admission = AccessGuard::default()
            .admit("/earth-dashboard", &[Role::Doctor], rx)
            .await;
        assert!(matches!(admission, Admission::Render(s) if s.role == Role::Doctor));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_redirects_after_debounce() {
        let (_tx, rx) = watch::channel(SessionState::signed_out());
        let start = Instant::now();
        let admission = AccessGuard::default().admit("/astronauts", &[Role::Doctor], rx).await;

        assert!(start.elapsed() >= DEFAULT_REDIRECT_DELAY);
        match admission {
            Admission::Redirect(redirect) => {
                assert_eq!(redirect.location(), "/?from=%2Fastronauts")
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_role_redirects_to_own_dashboard() {
        let (_tx, rx) = watch::channel(signed_in(Role::Astronaut));
        let admission = AccessGuard::default()
            .admit("/earth-dashboard", &[Role::Doctor], rx)
            .await;
        match admission {
            Admission::Redirect(redirect) => {
                assert_eq!(redirect.location(), "/astronaut-dashboard")
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_signed_out_flash_is_absorbed() {
        let (tx, rx) = watch::channel(SessionState::signed_out());
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            tx.send_replace(signed_in(Role::Doctor));
            // Keep the sender alive past the debounce
            sleep(Duration::from_secs(5)).await;
        });

        let admission = AccessGuard::default().admit("/alerts", &[], rx).await;
        assert!(matches!(admission, Admission::Render(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_never_redirects() {
        let (_tx, rx) = watch::channel(SessionState::loading());
        let start = Instant::now();
        let admission = AccessGuard::default().admit("/astronauts", &[Role::Doctor], rx).await;
        assert_eq!(admission, Admission::Loading);
        assert!(start.elapsed() >= DEFAULT_LOADING_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_then_resolved_within_grace() {
        let (tx, rx) = watch::channel(SessionState::loading());
        tokio::spawn(async move {
            sleep(Duration::from_millis(1000)).await;
            tx.send_replace(signed_in(Role::Astronaut));
            sleep(Duration::from_secs(5)).await;
        });

        let admission = AccessGuard::default()
            .admit("/astronaut-dashboard", &[Role::Astronaut], rx)
            .await;
        assert!(matches!(admission, Admission::Render(s) if s.crew_id.as_deref() == Some("ast-002")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_rearm_the_debounce() {
        let (tx, rx) = watch::channel(SessionState::signed_out());
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            tx.send_replace(SessionState::failed("provider unavailable"));
            sleep(Duration::from_secs(5)).await;
        });

        let start = Instant::now();
        let admission = AccessGuard::default().admit("/chat", &[], rx).await;
        assert!(matches!(admission, Admission::Redirect(_)));
        assert!(start.elapsed() >= Duration::from_millis(500) + DEFAULT_REDIRECT_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_counts_as_signed_out() {
        let (tx, rx) = watch::channel(SessionState::loading());
        drop(tx);
        let admission = AccessGuard::default().admit("/settings", &[], rx).await;
        assert!(matches!(
            admission,
            Admission::Redirect(Redirect { cause: RedirectCause::Unauthenticated, .. })
        ));
    }
}
