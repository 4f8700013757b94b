//! Access guard state machine
//!
//! Pure transitions only; timing lives in [`super::AccessGuard`].

use crate::session::{Role, Session, SessionState};
use reqwest::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Session still resolving, no decision yet
    Loading,
    Unauthenticated,
    AuthenticatedAllowed,
    AuthenticatedDenied,
    /// Debounce elapsed, redirect decided
    RedirectPending,
    /// Terminal
    Redirected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectCause {
    Unauthenticated,
    /// Signed in with a role the route does not accept
    WrongRole(Role),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub cause: RedirectCause,
    /// Location the user asked for
    pub requested: String,
}

impl Redirect {
    /// Target of the redirect. Unauthenticated users go to the login view,
    /// which forwards to `requested` after sign-in.
    pub fn location(&self) -> String {
        match &self.cause {
            RedirectCause::Unauthenticated => login_location(&self.requested),
            RedirectCause::WrongRole(role) => role.dashboard_path().to_string(),
        }
    }
}

/// Login view URL carrying the requested location
pub fn login_location(from: &str) -> String {
    // Only the query serializer is used, the base is never exposed
    let mut url = match Url::parse("http://console.local/") {
        Ok(url) => url,
        Err(_) => return "/".to_string(),
    };
    url.query_pairs_mut().append_pair("from", from);
    format!("/?{}", url.query().unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct GuardMachine {
    requested: String,
    allowed: Vec<Role>,
    state: GuardState,
    session: Option<Session>,
}

impl GuardMachine {
    /// `allowed` empty means any authenticated role
    pub fn new(requested: impl Into<String>, allowed: &[Role]) -> Self {
        Self {
            requested: requested.into(),
            allowed: allowed.to_vec(),
            state: GuardState::Loading,
            session: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Session the last evaluation saw
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn requested(&self) -> &str {
        &self.requested
    }

    fn admits(&self, role: Role) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&role)
    }

    /// Re-evaluate against the latest session state. A decided redirect is
    /// never revisited.
    pub fn evaluate(&mut self, session: &SessionState) -> GuardState {
        if matches!(self.state, GuardState::RedirectPending | GuardState::Redirected) {
            return self.state;
        }

        self.session = session.user.clone();
        self.state = if session.is_loading {
            GuardState::Loading
        } else {
            match &session.user {
                None => GuardState::Unauthenticated,
                Some(user) if self.admits(user.role) => GuardState::AuthenticatedAllowed,
                Some(_) => GuardState::AuthenticatedDenied,
            }
        };
        self.state
    }

    /// Whether the current state calls for the debounce timer
    pub fn awaiting_redirect(&self) -> bool {
        matches!(
            self.state,
            GuardState::Unauthenticated | GuardState::AuthenticatedDenied
        )
    }

    /// Debounce fired. Returns the redirect when one is due.
    pub fn timer_elapsed(&mut self) -> Option<Redirect> {
        let cause = match (self.state, &self.session) {
            (GuardState::Unauthenticated, _) => RedirectCause::Unauthenticated,
            (GuardState::AuthenticatedDenied, Some(user)) => RedirectCause::WrongRole(user.role),
            _ => return None,
        };
        self.state = GuardState::RedirectPending;
        Some(Redirect {
            cause,
            requested: self.requested.clone(),
        })
    }

    pub fn complete_redirect(&mut self) {
        if self.state == GuardState::RedirectPending {
            self.state = GuardState::Redirected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: Role) -> SessionState {
        SessionState::signed_in(Session {
            id: "uid-1".to_string(),
            name: "Test".to_string(),
            email: "test@crew.space".to_string(),
            role,
            crew_id: (role == Role::Astronaut).then(|| "ast-001".to_string()),
        })
    }

    #[test]
    fn test_loading_makes_no_decision() {
        let mut machine = GuardMachine::new("/astronauts", &[Role::Doctor]);
        let mut loading = session(Role::Astronaut);
        loading.is_loading = true;

        assert_eq!(machine.evaluate(&loading), GuardState::Loading);
        assert!(!machine.awaiting_redirect());
        assert_eq!(machine.timer_elapsed(), None);
        assert_eq!(machine.state(), GuardState::Loading);
    }

    #[test]
    fn test_signed_out_redirects_to_login() {
        let mut machine = GuardMachine::new("/astronauts", &[Role::Doctor]);
        assert_eq!(
            machine.evaluate(&SessionState::signed_out()),
            GuardState::Unauthenticated
        );
        assert!(machine.awaiting_redirect());

        let redirect = machine.timer_elapsed().unwrap();
        assert_eq!(redirect.cause, RedirectCause::Unauthenticated);
        assert_eq!(redirect.location(), "/?from=%2Fastronauts");
        assert_eq!(machine.state(), GuardState::RedirectPending);

        machine.complete_redirect();
        assert_eq!(machine.state(), GuardState::Redirected);
        assert_eq!(machine.evaluate(&session(Role::Doctor)), GuardState::Redirected);
    }

    #[test]
    fn test_wrong_role_goes_to_own_dashboard() {
        let mut machine = GuardMachine::new("/earth-dashboard", &[Role::Doctor]);
        assert_eq!(
            machine.evaluate(&session(Role::Astronaut)),
            GuardState::AuthenticatedDenied
        );
        let redirect = machine.timer_elapsed().unwrap();
        assert_eq!(redirect.cause, RedirectCause::WrongRole(Role::Astronaut));
        assert_eq!(redirect.location(), "/astronaut-dashboard");
    }

    #[test]
    fn test_empty_role_list_admits_everyone() {
        let mut machine = GuardMachine::new("/chat", &[]);
        assert_eq!(
            machine.evaluate(&session(Role::Astronaut)),
            GuardState::AuthenticatedAllowed
        );
        assert_eq!(machine.session().map(|s| s.role), Some(Role::Astronaut));
        assert_eq!(machine.timer_elapsed(), None);
    }

    #[test]
    fn test_session_error_counts_as_signed_out() {
        let mut machine = GuardMachine::new("/alerts", &[]);
        assert_eq!(
            machine.evaluate(&SessionState::failed("Unknown crew member: ast-999")),
            GuardState::Unauthenticated
        );
    }

    #[test]
    fn test_login_location_keeps_query() {
        assert_eq!(
            login_location("/astronauts?risk=Critical"),
            "/?from=%2Fastronauts%3Frisk%3DCritical"
        );
    }
}
