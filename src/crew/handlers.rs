//! Crew data API handlers
//!
//! Every route here sits behind the access guard, so a [`Session`] is always
//! present in the request extensions. Astronauts only reach their own record.

use super::models::*;
use super::trend::Vital;
use crate::api::{data_failure, error_codes, failure, ApiResult, AppState};
use crate::error::DataError;
use crate::metrics::METRICS;
use crate::session::{Role, Session};
use axum::{
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    Extension, Json,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Filter for the crew list
#[derive(Debug, Default, Deserialize)]
pub struct CrewFilter {
    #[serde(default)]
    pub risk: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub task_id: String,
    pub completed: bool,
}

/// Reject roles outside `roles` (empty = any) and astronauts addressing
/// another crew member's record
fn authorize(session: &Session, crew_id: &str, roles: &[Role]) -> ApiResult<()> {
    if !roles.is_empty() && !roles.contains(&session.role) {
        warn!("{} {} denied on {}", session.role, session.id, crew_id);
        return Err(failure(
            StatusCode::FORBIDDEN,
            error_codes::FORBIDDEN,
            format!("Not available to the {} role", session.role),
        ));
    }
    if session.role == Role::Astronaut && session.crew_id.as_deref() != Some(crew_id) {
        warn!("Astronaut {} denied on foreign record {}", session.id, crew_id);
        return Err(failure(
            StatusCode::FORBIDDEN,
            error_codes::FORBIDDEN,
            "Astronauts can only access their own record",
        ));
    }
    Ok(())
}

fn parse_risk(raw: Option<&str>) -> ApiResult<Option<RiskLevel>> {
    raw.map(|r| {
        r.parse::<RiskLevel>()
            .map_err(|e| failure(StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, e))
    })
    .transpose()
}

/// List crew members, optionally by risk level
///
/// GET /api/crew?risk=Critical
pub async fn list_crew(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    QueryParams(filter): QueryParams<CrewFilter>,
) -> ApiResult<Json<Vec<CrewMember>>> {
    if session.role != Role::Doctor {
        return Err(failure(
            StatusCode::FORBIDDEN,
            error_codes::FORBIDDEN,
            "Crew roster is available to doctors only",
        ));
    }
    let members = match parse_risk(filter.risk.as_deref())? {
        Some(level) => state.crew.list_by_risk(level),
        None => state.crew.list_crew(),
    };
    Ok(Json(members))
}

/// GET /api/crew/:id
pub async fn get_crew(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
) -> ApiResult<Json<CrewMember>> {
    authorize(&session, &crew_id, &[])?;
    state
        .crew
        .get_crew(&crew_id)
        .map(Json)
        .ok_or_else(|| data_failure(DataError::CrewNotFound(crew_id)))
}

/// GET /api/crew/:id/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
) -> ApiResult<Json<IndexMap<String, Task>>> {
    authorize(&session, &crew_id, &[])?;
    state.crew.tasks(&crew_id).map(Json).map_err(data_failure)
}

/// Assign a task
///
/// POST /api/crew/:id/tasks
pub async fn add_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    authorize(&session, &crew_id, &[Role::Doctor])?;
    info!("Task assignment for {} by {}", crew_id, session.id);

    let result = state
        .crew
        .add_task(&crew_id, &request.title, request.description.as_deref());
    METRICS.record_crew_mutation("add_task", result.is_ok());
    result
        .map(|task| (StatusCode::CREATED, Json(task)))
        .map_err(data_failure)
}

/// PUT /api/crew/:id/tasks/:task_id
pub async fn update_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((crew_id, task_id)): Path<(String, String)>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<Json<Task>> {
    authorize(&session, &crew_id, &[])?;

    let result = state.crew.update_task(
        &crew_id,
        &task_id,
        &request.title,
        request.description.as_deref(),
    );
    METRICS.record_crew_mutation("update_task", result.is_ok());
    result.map(Json).map_err(data_failure)
}

/// POST /api/crew/:id/tasks/:task_id/toggle
pub async fn toggle_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((crew_id, task_id)): Path<(String, String)>,
) -> ApiResult<Json<ToggleResponse>> {
    authorize(&session, &crew_id, &[])?;

    let result = state.crew.toggle_task_completion(&crew_id, &task_id);
    METRICS.record_crew_mutation("toggle_task", result.is_ok());
    let completed = result.map_err(data_failure)?;
    Ok(Json(ToggleResponse { task_id, completed }))
}

/// DELETE /api/crew/:id/tasks/:task_id
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((crew_id, task_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    authorize(&session, &crew_id, &[Role::Doctor])?;

    let result = state.crew.delete_task(&crew_id, &task_id);
    METRICS.record_crew_mutation("delete_task", result.is_ok());
    result.map(|_| StatusCode::NO_CONTENT).map_err(data_failure)
}

/// GET /api/crew/:id/queries
pub async fn list_queries(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
) -> ApiResult<Json<Vec<Query>>> {
    authorize(&session, &crew_id, &[])?;
    state.crew.queries(&crew_id).map(Json).map_err(data_failure)
}

/// Submit a question; the answer is attached immediately
///
/// POST /api/crew/:id/queries
pub async fn submit_query(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<(StatusCode, Json<Query>)> {
    authorize(&session, &crew_id, &[Role::Astronaut])?;

    let result = state.crew.add_query(&crew_id, &request.message);
    METRICS.record_crew_mutation("add_query", result.is_ok());
    result
        .map(|query| (StatusCode::CREATED, Json(query)))
        .map_err(data_failure)
}

/// GET /api/crew/:id/trend/:vital
pub async fn vital_trend(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((crew_id, vital)): Path<(String, String)>,
) -> ApiResult<Json<Vec<TrendPoint>>> {
    authorize(&session, &crew_id, &[])?;
    let vital: Vital = vital.parse().map_err(data_failure)?;
    state
        .crew
        .vital_trend(&crew_id, vital)
        .map(Json)
        .map_err(data_failure)
}

/// GET /api/crew/:id/chat
pub async fn chat_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    authorize(&session, &crew_id, &[])?;
    if !state.crew.contains(&crew_id) {
        return Err(data_failure(DataError::CrewNotFound(crew_id)));
    }
    Ok(Json(state.crew.chat_history(&crew_id)))
}

/// Post as the signed-in role
///
/// POST /api/crew/:id/chat
pub async fn post_chat(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    authorize(&session, &crew_id, &[])?;

    let sender = match session.role {
        Role::Doctor => ChatSender::Doctor,
        Role::Astronaut => ChatSender::Astronaut,
    };
    let result = state.crew.post_chat_message(&crew_id, sender, &request.text);
    METRICS.record_crew_mutation("post_chat", result.is_ok());
    result
        .map(|message| (StatusCode::CREATED, Json(message)))
        .map_err(data_failure)
}

/// Inject a system alert into the transcript
///
/// POST /api/crew/:id/alerts
pub async fn raise_alert(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(crew_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    authorize(&session, &crew_id, &[Role::Doctor])?;

    let result = state.crew.raise_alert(&crew_id, &request.text);
    METRICS.record_crew_mutation("raise_alert", result.is_ok());
    result
        .map(|message| (StatusCode::CREATED, Json(message)))
        .map_err(data_failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: Role, crew_id: Option<&str>) -> Session {
        Session {
            id: "uid-1".to_string(),
            name: "Test".to_string(),
            email: "test@crew.space".to_string(),
            role,
            crew_id: crew_id.map(str::to_string),
        }
    }

    #[test]
    fn test_doctor_reaches_any_record() {
        let doctor = session(Role::Doctor, None);
        assert!(authorize(&doctor, "ast-003", &[]).is_ok());
        assert!(authorize(&doctor, "ast-003", &[Role::Doctor]).is_ok());
        assert!(authorize(&doctor, "ast-003", &[Role::Astronaut]).is_err());
    }

    #[test]
    fn test_astronaut_limited_to_own_record() {
        let astronaut = session(Role::Astronaut, Some("ast-002"));
        assert!(authorize(&astronaut, "ast-002", &[Role::Astronaut]).is_ok());

        let (status, body) = authorize(&astronaut, "ast-001", &[]).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, error_codes::FORBIDDEN);
    }

    #[test]
    fn test_parse_risk_filter() {
        assert_eq!(parse_risk(Some("critical")).unwrap(), Some(RiskLevel::Critical));
        assert_eq!(parse_risk(None).unwrap(), None);
        assert!(parse_risk(Some("extreme")).is_err());
    }
}
