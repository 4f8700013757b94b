//! Session data models

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Console role, chosen at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Earth-side medical staff
    Doctor,
    Astronaut,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Astronaut => "astronaut",
        }
    }

    /// Landing view for the role
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Doctor => "/earth-dashboard",
            Role::Astronaut => "/astronaut-dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doctor" => Ok(Role::Doctor),
            "astronaut" => Ok(Role::Astronaut),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity as reported by the external provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Locally persisted role choice for one external identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_id: Option<String>,
}

/// Authenticated console user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Set only for astronauts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_id: Option<String>,
}

/// Published session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user: Option<Session>,
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionState {
    /// Initial state before the provider has reported anything
    pub fn loading() -> Self {
        Self {
            user: None,
            is_loading: true,
            error: None,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            user: None,
            is_loading: false,
            error: None,
        }
    }

    pub fn signed_in(session: Session) -> Self {
        Self {
            user: Some(session),
            is_loading: false,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            user: None,
            is_loading: false,
            error: Some(error.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Join an external identity with its local role record.
///
/// Without a record the fallback role applies. Astronaut sessions always
/// reference a crew member that `crew_exists` accepts; a record without a
/// crew id gets `default_crew_id`.
pub fn resolve_session(
    identity: &Identity,
    record: Option<RoleRecord>,
    fallback: Role,
    default_crew_id: &str,
    crew_exists: impl Fn(&str) -> bool,
) -> Result<Session, AuthError> {
    let record = record.unwrap_or(RoleRecord {
        role: fallback,
        crew_id: None,
    });

    let crew_id = match record.role {
        Role::Doctor => None,
        Role::Astronaut => {
            let crew_id = record.crew_id.unwrap_or_else(|| default_crew_id.to_string());
            if !crew_exists(&crew_id) {
                return Err(AuthError::UnknownCrewMember(crew_id));
            }
            Some(crew_id)
        }
    };

    Ok(Session {
        id: identity.uid.clone(),
        name: display_name(identity),
        email: identity.email.clone().unwrap_or_default(),
        role: record.role,
        crew_id,
    })
}

fn display_name(identity: &Identity) -> String {
    if let Some(name) = identity.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    identity
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or(identity.uid.as_str())
        .to_string()
}
