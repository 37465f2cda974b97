//! HTTP API over the shared state.
//!
//! ## Endpoints
//!
//! - `GET /api/info`: version, record count and services
//! - `GET /api/db`: the whole database
//! - `GET /api/people/{id}`: one person
//! - `POST /api/people`: insert or replace a person
//! - `DELETE /api/people/{id}`: remove a person
//! - `GET /api/services`: registered seekrd services

use crate::database::{DataBase, Person};
use crate::error::SeekrError;
use crate::scheduler::{ServiceInfo, ServiceRegistrar};
use crate::state::SharedState;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// `GET /api/info` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Crate name.
    pub name: String,
    /// Crate version.
    pub version: String,
    /// Number of records in the database.
    pub records: usize,
    /// Registered seekrd services.
    pub services: Vec<ServiceInfo>,
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorBody,
}

/// Error message and machine-readable kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Error kind (`not_found`, `bad_request`, `internal`).
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Error returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    /// No record with the requested id.
    NotFound(String),
    /// The request body is inconsistent.
    BadRequest(String),
    /// Shared state could not be accessed.
    Internal(SeekrError),
}

impl From<SeekrError> for ApiError {
    fn from(e: SeekrError) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no person with id '{id}'"),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Internal(e) => {
                tracing::error!("API request failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        };
        let body = ErrorResponse {
            error: ErrorBody {
                message,
                error_type: error_type.to_owned(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    shared: Arc<SharedState>,
    services: ServiceRegistrar,
}

// ---------------------------------------------------------------------------
// ApiServer
// ---------------------------------------------------------------------------

/// Running API server.
///
/// Aborts the server task when dropped.
pub struct ApiServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ApiServer {
    /// Build the router for `shared` and `services`.
    pub fn router(shared: Arc<SharedState>, services: ServiceRegistrar, cors: bool) -> Router {
        let app = Router::new()
            .route("/api/info", get(handle_info))
            .route("/api/db", get(handle_db))
            .route("/api/people", axum::routing::post(handle_put_person))
            .route(
                "/api/people/{id}",
                get(handle_get_person).delete(handle_delete_person),
            )
            .route("/api/services", get(handle_services))
            .with_state(AppState { shared, services });

        if cors {
            app.layer(axum::middleware::map_response(add_cors_header))
        } else {
            app
        }
    }

    /// Bind to the configured address and start serving in a background task.
    ///
    /// When the configured port is taken and `server.force_port` is off,
    /// falls back to a free port chosen by the OS.
    pub async fn start(
        shared: Arc<SharedState>,
        services: ServiceRegistrar,
    ) -> crate::Result<Self> {
        let server = shared.read_settings(|s| s.server.clone())?;
        let app = Self::router(Arc::clone(&shared), services, server.set_cors_header);

        let bind_addr = format!("{}:{}", server.ip, server.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) if !server.force_port => {
                warn!("cannot bind {bind_addr} ({e}), falling back to a free port");
                TcpListener::bind(format!("{}:0", server.ip))
                    .await
                    .map_err(|e| SeekrError::Server(format!("API server bind failed: {e}")))?
            }
            Err(e) => {
                return Err(SeekrError::Server(format!(
                    "API server bind to {bind_addr} failed: {e}"
                )));
            }
        };

        let addr = listener
            .local_addr()
            .map_err(|e| SeekrError::Server(format!("failed to get local addr: {e}")))?;

        info!("API server listening on http://{addr}/api");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop serving.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn add_cors_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn handle_info(State(app): State<AppState>) -> Result<Json<InfoResponse>, ApiError> {
    let records = app.shared.read_db(|db| db.len())?;
    let services = app.services.infos()?;
    Ok(Json(InfoResponse {
        name: env!("CARGO_PKG_NAME").to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        records,
        services,
    }))
}

async fn handle_db(State(app): State<AppState>) -> Result<Json<DataBase>, ApiError> {
    Ok(Json(app.shared.database_snapshot()?))
}

async fn handle_get_person(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Person>, ApiError> {
    app.shared
        .read_db(|db| db.get(&id).cloned())?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn handle_put_person(
    State(app): State<AppState>,
    Json(person): Json<Person>,
) -> Result<(StatusCode, Json<Person>), ApiError> {
    if person.id.trim().is_empty() {
        return Err(ApiError::BadRequest("person id must not be empty".to_owned()));
    }
    let stored = person.clone();
    app.shared.write_db(move |db| db.insert(person))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn handle_delete_person(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match app.shared.write_db(|db| db.remove(&id))? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(id)),
    }
}

async fn handle_services(State(app): State<AppState>) -> Result<Json<Vec<ServiceInfo>>, ApiError> {
    Ok(Json(app.services.infos()?))
}
