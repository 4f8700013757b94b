//! Route table and access guard middleware

use super::{error_codes, failure, handlers, AppState};
use crate::crew::handlers as crew_handlers;
use crate::guard::{Admission, RedirectCause};
use crate::metrics::METRICS;
use crate::session::Role;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Router,
};
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const ANY_ROLE: &[Role] = &[];
const DOCTOR_ONLY: &[Role] = &[Role::Doctor];
const ASTRONAUT_ONLY: &[Role] = &[Role::Astronaut];

/// How a guarded route reports a refusal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Pages: redirect the browser
    View,
    /// JSON endpoints: 401/403 with an error body
    Api,
}

/// Per-route guard configuration
#[derive(Clone)]
pub struct RouteAccess {
    state: AppState,
    allowed: &'static [Role],
    surface: Surface,
}

impl RouteAccess {
    pub fn new(state: AppState, allowed: &'static [Role], surface: Surface) -> Self {
        Self {
            state,
            allowed,
            surface,
        }
    }
}

/// Access guard middleware
///
/// Renders with the resolved session in the request extensions, or
/// answers with the redirect (or its API equivalent) the guard decided on.
pub async fn guard_middleware(
    State(access): State<RouteAccess>,
    mut request: Request,
    next: Next,
) -> Response {
    let requested = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let admission = access
        .state
        .guard
        .admit(&requested, access.allowed, access.state.sessions.subscribe())
        .await;
    let waited = started.elapsed().as_secs_f64();

    match admission {
        Admission::Render(session) => {
            METRICS.record_guard("render", waited);
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Admission::Redirect(redirect) => {
            let (outcome, status, code) = match redirect.cause {
                RedirectCause::Unauthenticated => {
                    ("redirect_login", StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED)
                }
                RedirectCause::WrongRole(_) => {
                    ("redirect_role", StatusCode::FORBIDDEN, error_codes::FORBIDDEN)
                }
            };
            METRICS.record_guard(outcome, waited);
            let location = redirect.location();
            info!("Guard sends {} to {}", requested, location);

            match access.surface {
                Surface::View => Redirect::to(&location).into_response(),
                Surface::Api => {
                    let message = match redirect.cause {
                        RedirectCause::Unauthenticated => "Sign in required".to_string(),
                        RedirectCause::WrongRole(role) => format!("Not available to the {} role", role),
                    };
                    (
                        [(header::LOCATION, location)],
                        failure(status, code, message),
                    )
                        .into_response()
                }
            }
        }
        Admission::Loading => {
            METRICS.record_guard("loading", waited);
            warn!("Session still loading, deferring {}", requested);
            let retry_after = access.state.guard.redirect_delay().as_secs().max(1).to_string();
            (
                [(header::RETRY_AFTER, retry_after)],
                failure(
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_codes::SESSION_LOADING,
                    "Session is still loading",
                ),
            )
                .into_response()
        }
    }
}

fn guarded(
    router: Router<AppState>,
    state: &AppState,
    allowed: &'static [Role],
    surface: Surface,
) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(
        RouteAccess::new(state.clone(), allowed, surface),
        guard_middleware,
    ))
}

/// Build the application router
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let public_routes: Router<AppState> = Router::new()
        .route("/", get(handlers::login_view))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/session", get(handlers::session_state))
        .route("/api/session/login", post(handlers::login))
        .route("/api/session/logout", post(handlers::logout));

    let shared_views = guarded(
        Router::new()
            .route("/dashboard", get(handlers::dashboard))
            .route("/astronaut/:id", get(handlers::astronaut_detail))
            .route("/alerts", get(handlers::alerts))
            .route("/chat", get(handlers::chat))
            .route("/settings", get(handlers::settings)),
        &state,
        ANY_ROLE,
        Surface::View,
    );

    let doctor_views = guarded(
        Router::new()
            .route("/earth-dashboard", get(handlers::earth_dashboard))
            .route("/astronauts", get(handlers::astronauts)),
        &state,
        DOCTOR_ONLY,
        Surface::View,
    );

    let astronaut_views = guarded(
        Router::new().route("/astronaut-dashboard", get(handlers::astronaut_dashboard)),
        &state,
        ASTRONAUT_ONLY,
        Surface::View,
    );

    let crew_api = guarded(
        Router::new()
            .route("/api/crew", get(crew_handlers::list_crew))
            .route("/api/crew/:id", get(crew_handlers::get_crew))
            .route(
                "/api/crew/:id/tasks",
                get(crew_handlers::list_tasks).post(crew_handlers::add_task),
            )
            .route(
                "/api/crew/:id/tasks/:task_id",
                put(crew_handlers::update_task).delete(crew_handlers::delete_task),
            )
            .route(
                "/api/crew/:id/tasks/:task_id/toggle",
                post(crew_handlers::toggle_task),
            )
            .route(
                "/api/crew/:id/queries",
                get(crew_handlers::list_queries).post(crew_handlers::submit_query),
            )
            .route("/api/crew/:id/trend/:vital", get(crew_handlers::vital_trend))
            .route(
                "/api/crew/:id/chat",
                get(crew_handlers::chat_history).post(crew_handlers::post_chat),
            )
            .route("/api/crew/:id/alerts", post(crew_handlers::raise_alert)),
        &state,
        ANY_ROLE,
        Surface::Api,
    );

    public_routes
        .merge(shared_views)
        .merge(doctor_views)
        .merge(astronaut_views)
        .merge(crew_api)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
