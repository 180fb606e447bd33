use crate::{
    config::HttpSettings,
    dispatcher::{DispatchError, Dispatcher},
    notification::render_notification,
    rate_limit::{enforce_rate_limit, GlobalRateLimiter},
    security_headers::with_security_headers,
    submission::{CallbackRequest, ValidationError},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

pub const HEALTH_PATH: &str = "/health";
pub const CALLBACK_PATH: &str = "/api/callback";

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const RATE_LIMITED_MESSAGE: &str = "Too many requests, try again later.";
const MALFORMED_BODY_MESSAGE: &str = "Invalid request body";

/// Shared by every request. The dispatcher is absent when no mail relay is configured.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
        }
    }

    pub fn without_dispatcher() -> Self {
        Self { dispatcher: None }
    }
}

pub fn router(state: AppState, settings: &HttpSettings) -> Router {
    let limiter = Arc::new(GlobalRateLimiter::new(&settings.rate_limit));
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(settings.allowed_origin.clone()))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let router = Router::new()
        .route(HEALTH_PATH, get(health))
        .route(CALLBACK_PATH, post(receive_callback))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, enforce_rate_limit))
        .layer(cors);
    with_security_headers(router).layer(TraceLayer::new_for_http())
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    ok: bool,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

#[derive(Serialize, Debug)]
pub struct CallbackResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn receive_callback(
    State(state): State<AppState>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackResponse>, CallbackError> {
    let Json(request) =
        payload.map_err(|rejection| CallbackError::MalformedBody(rejection.body_text()))?;
    let submission = request.validate()?;
    let notification = render_notification(&submission, Utc::now());
    let dispatcher = state
        .dispatcher
        .as_ref()
        .ok_or(CallbackError::ConfigurationNotReady)?;
    dispatcher.deliver(&notification, None).await?;
    info!("Delivered callback notification: {}", notification.subject);
    Ok(Json(CallbackResponse {
        success: true,
        error: None,
    }))
}

#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("mail dispatcher is not configured")]
    ConfigurationNotReady,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("global request limit reached")]
    RateLimited,
}

impl CallbackError {
    fn log(&self) {
        match self {
            CallbackError::Validation(_) | CallbackError::MalformedBody(_) => {
                warn!("Client error handling callback request: {self}");
            }
            CallbackError::RateLimited => warn!("Rejecting callback request: {self}"),
            CallbackError::ConfigurationNotReady | CallbackError::Dispatch(_) => {
                error!("Internal error sending callback email: {self}");
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CallbackError::Validation(_) | CallbackError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            CallbackError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CallbackError::ConfigurationNotReady | CallbackError::Dispatch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Only validation failures are reported verbatim.
    fn client_message(&self) -> String {
        match self {
            CallbackError::Validation(error) => error.to_string(),
            CallbackError::MalformedBody(_) => MALFORMED_BODY_MESSAGE.into(),
            CallbackError::RateLimited => RATE_LIMITED_MESSAGE.into(),
            CallbackError::ConfigurationNotReady | CallbackError::Dispatch(_) => {
                INTERNAL_ERROR_MESSAGE.into()
            }
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        self.log();
        let body = CallbackResponse {
            success: false,
            error: Some(self.client_message()),
        };
        (self.status(), Json(body)).into_response()
    }
}
