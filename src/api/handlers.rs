//! Session endpoints, console views and operational endpoints
//!
//! Views answer with the JSON a page renders from. Guarded views receive the
//! resolved [`Session`] from the access guard middleware.

use super::{auth_failure, data_failure, error_codes, failure, ApiResult, AppState};
use crate::crew::{ChatMessage, CrewMember, RiskLevel, TrendPoint, Vital};
use crate::error::DataError;
use crate::metrics::METRICS;
use crate::session::{Role, Session, SessionState};
use axum::{
    extract::{Path, Query, State},
    http::{header, uri::PathAndQuery, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Login form submission
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
    pub role: Role,
    /// Crew record an astronaut signs in as
    #[serde(default)]
    pub crew_id: Option<String>,
    /// Location the guard sent the user away from
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub session: Session,
    pub redirect_to: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub from: Option<String>,
}

/// Choice offered on the login view
#[derive(Debug, Serialize, Deserialize)]
pub struct CrewChoice {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginView {
    pub from: Option<String>,
    pub roles: Vec<Role>,
    pub crew: Vec<CrewChoice>,
}

/// One roster row
#[derive(Debug, Serialize, Deserialize)]
pub struct CrewSummary {
    pub id: String,
    pub name: String,
    pub risk_level: RiskLevel,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

impl From<&CrewMember> for CrewSummary {
    fn from(member: &CrewMember) -> Self {
        Self {
            id: member.id.clone(),
            name: member.profile.name.clone(),
            risk_level: member.risk_level(),
            is_anomaly: member.is_anomaly(),
            anomaly_score: member.anomaly_detection.anomaly_score,
        }
    }
}

fn summaries(members: &[CrewMember]) -> Vec<CrewSummary> {
    members.iter().map(CrewSummary::from).collect()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EarthDashboard {
    pub user: Session,
    pub crew: Vec<CrewSummary>,
    pub anomalies: Vec<CrewSummary>,
    pub risk_breakdown: BTreeMap<RiskLevel, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AstronautDashboard {
    pub user: Session,
    pub member: CrewMember,
    pub chat: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AstronautDetail {
    pub member: CrewMember,
    pub trends: IndexMap<String, Vec<TrendPoint>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RosterParams {
    #[serde(default)]
    pub risk: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub crew: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatView {
    pub crew_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub crew_members: usize,
}

/// Only local absolute paths that are valid in a Location header are
/// followed after login
fn safe_return_path(from: Option<&str>) -> Option<&str> {
    from.filter(|p| {
        p.starts_with('/')
            && !p.starts_with("//")
            && !p.contains('\\')
            && !p.chars().any(char::is_control)
            && p.parse::<PathAndQuery>().is_ok()
    })
}

/// Login view, or straight back to where the user was going when already
/// signed in
///
/// GET /?from=/astronauts
pub async fn login_view(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> Response {
    let current = state.sessions.current();
    if let Some(user) = current.user {
        let target = safe_return_path(params.from.as_deref()).unwrap_or(user.role.dashboard_path());
        return Redirect::to(target).into_response();
    }

    let crew = state
        .crew
        .list_crew()
        .into_iter()
        .map(|m| CrewChoice {
            id: m.id,
            name: m.profile.name,
        })
        .collect();
    Json(LoginView {
        from: params.from,
        roles: vec![Role::Doctor, Role::Astronaut],
        crew,
    })
    .into_response()
}

/// POST /api/session/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    if request.email.trim().is_empty() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            error_codes::VALIDATION_ERROR,
            "Email cannot be empty",
        ));
    }

    let session = state
        .sessions
        .login(
            &request.email,
            &request.password,
            request.role,
            request.crew_id.as_deref(),
        )
        .await
        .map_err(auth_failure)?;

    let redirect_to = safe_return_path(request.from.as_deref())
        .unwrap_or(session.role.dashboard_path())
        .to_string();
    Ok(Json(LoginResponse {
        session,
        redirect_to,
    }))
}

/// POST /api/session/logout
pub async fn logout(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.sessions.logout().await.map_err(auth_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/session
pub async fn session_state(State(state): State<AppState>) -> Json<SessionState> {
    Json(state.sessions.current())
}

/// Legacy entry point, forwards to the role's own dashboard
///
/// GET /dashboard
pub async fn dashboard(Extension(session): Extension<Session>) -> Redirect {
    Redirect::to(session.role.dashboard_path())
}

/// GET /earth-dashboard
pub async fn earth_dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Json<EarthDashboard> {
    let crew = state.crew.list_crew();
    let anomalies = state.crew.list_anomalies();
    Json(EarthDashboard {
        user: session,
        crew: summaries(&crew),
        anomalies: summaries(&anomalies),
        risk_breakdown: state.crew.risk_breakdown(),
    })
}

/// GET /astronaut-dashboard
pub async fn astronaut_dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<AstronautDashboard>> {
    let crew_id = session.crew_id.clone().unwrap_or_default();
    let member = state
        .crew
        .get_crew(&crew_id)
        .ok_or_else(|| data_failure(DataError::CrewNotFound(crew_id.clone())))?;
    let chat = state.crew.chat_history(&crew_id);
    Ok(Json(AstronautDashboard {
        user: session,
        member,
        chat,
    }))
}

/// Full record with a trend series per vital
///
/// GET /astronaut/:id
pub async fn astronaut_detail(
    State(state): State<AppState>,
    Path(crew_id): Path<String>,
) -> ApiResult<Json<AstronautDetail>> {
    let member = state
        .crew
        .get_crew(&crew_id)
        .ok_or_else(|| data_failure(DataError::CrewNotFound(crew_id.clone())))?;

    let mut trends = IndexMap::new();
    for vital in Vital::ALL {
        let series = state.crew.vital_trend(&crew_id, vital).map_err(data_failure)?;
        trends.insert(vital.as_str().to_string(), series);
    }
    Ok(Json(AstronautDetail { member, trends }))
}

/// GET /astronauts?risk=High
pub async fn astronauts(
    State(state): State<AppState>,
    Query(params): Query<RosterParams>,
) -> ApiResult<Json<Vec<CrewSummary>>> {
    let members = match params.risk.as_deref() {
        Some(raw) => {
            let level = raw.parse::<RiskLevel>().map_err(|e| {
                failure(StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, e)
            })?;
            state.crew.list_by_risk(level)
        }
        None => state.crew.list_crew(),
    };
    Ok(Json(summaries(&members)))
}

/// Flagged crew members; astronauts only see their own flag
///
/// GET /alerts
pub async fn alerts(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Json<Vec<CrewSummary>> {
    let anomalies = state.crew.list_anomalies();
    let visible: Vec<CrewMember> = match session.role {
        Role::Doctor => anomalies,
        Role::Astronaut => anomalies
            .into_iter()
            .filter(|m| session.crew_id.as_deref() == Some(m.id.as_str()))
            .collect(),
    };
    Json(summaries(&visible))
}

/// Transcript for the astronaut's own record, or the doctor's pick
///
/// GET /chat?crew=ast-002
pub async fn chat(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<ChatParams>,
) -> ApiResult<Json<ChatView>> {
    let crew_id = match session.role {
        Role::Astronaut => session.crew_id.clone(),
        Role::Doctor => params
            .crew
            .or_else(|| state.crew.list_crew().first().map(|m| m.id.clone())),
    }
    .unwrap_or_default();

    if !state.crew.contains(&crew_id) {
        return Err(data_failure(DataError::CrewNotFound(crew_id)));
    }
    let messages = state.crew.chat_history(&crew_id);
    Ok(Json(ChatView { crew_id, messages }))
}

/// GET /settings
pub async fn settings(Extension(session): Extension<Session>) -> Json<Session> {
    Json(session)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        crew_members: state.crew.list_crew().len(),
    })
}

/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    debug!("Metrics scrape");
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}
