// Registration Intake - Web Server
// REST API with Axum over the SQLite backend

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use registration_intake::{
    env_vars, load_config_from_env, registration_registry, Collaborators, CorrelationEntry,
    CorrelationLedger, Database, DispatchError, Failure, HandlerRegistry, QueueRecord,
    StoredRecord,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    registry: Arc<HandlerRegistry>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn failed(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize)]
struct ValidateResponse {
    queue_uuid: String,
    warnings: Vec<Failure>,
}

#[derive(Serialize)]
struct ProcessResponse {
    queue_uuid: String,
    entity_id: String,
    created: bool,
    warnings: Vec<Failure>,
}

#[derive(Serialize)]
struct RegistrationResponse {
    correlation: CorrelationEntry,
    patient: Option<StoredRecord>,
}

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    log::error!("{}: {:#}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failed((), format!("{}: {}", context, e))),
    )
        .into_response()
}

/// Handler failures list every cause; unknown discriminators are client errors
fn dispatch_error(e: DispatchError) -> Response {
    match e {
        DispatchError::Failed(failures) => {
            let summary = failures.to_string();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::failed(failures.entries().to_vec(), summary)),
            )
                .into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failed(Vec::<Failure>::new(), other.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/queue/validate - Dry-run one queue record
async fn validate_record(State(state): State<AppState>, Json(record): Json<QueueRecord>) -> Response {
    match state.registry.validate(&record) {
        Ok(warnings) => Json(ApiResponse::ok(ValidateResponse {
            queue_uuid: record.uuid,
            warnings,
        }))
        .into_response(),
        Err(e) => dispatch_error(e),
    }
}

/// POST /api/queue/process - Register one queue record
async fn process_record(State(state): State<AppState>, Json(record): Json<QueueRecord>) -> Response {
    match state.registry.process(&record) {
        Ok(outcome) => {
            let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
            (
                status,
                Json(ApiResponse::ok(ProcessResponse {
                    queue_uuid: record.uuid,
                    entity_id: outcome.entity_id,
                    created: outcome.created,
                    warnings: outcome.warnings,
                })),
            )
                .into_response()
        }
        Err(e) => dispatch_error(e),
    }
}

/// GET /api/registrations/:correlation_id - Entity a correlation id maps to
async fn get_registration(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Response {
    let entry = match state.db.find(&correlation_id) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::failed((), format!("No registration for {}", correlation_id))),
            )
                .into_response()
        }
        Err(e) => return internal_error("Error reading correlation ledger", e),
    };

    match state.db.get_patient(&entry.permanent_id) {
        Ok(patient) => Json(ApiResponse::ok(RegistrationResponse {
            correlation: entry,
            patient,
        }))
        .into_response(),
        Err(e) => internal_error("Error loading patient", e),
    }
}

/// GET /api/patients - All registered patients
async fn get_patients(State(state): State<AppState>) -> Response {
    match state.db.list_patients() {
        Ok(patients) => Json(ApiResponse::ok(patients)).into_response(),
        Err(e) => internal_error("Error listing patients", e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("🌐 Registration Intake - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var(env_vars::DB_PATH)
        .unwrap_or_else(|_| env_vars::DEFAULT_DB_PATH.to_string());
    let db = Arc::new(Database::open(&db_path)?);
    println!("✓ Database opened: {}", db_path);

    let registry = registration_registry(load_config_from_env()?, Collaborators::shared(db.clone()))?;
    println!("✓ Handlers: {}", registry.discriminators().join(", "));

    // Create shared state
    let state = AppState {
        db,
        registry: Arc::new(registry),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/queue/validate", post(validate_record))
        .route("/queue/process", post(process_record))
        .route("/registrations/:correlation_id", get(get_registration))
        .route("/patients", get(get_patients))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var(env_vars::BIND_ADDR)
        .unwrap_or_else(|_| env_vars::DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/patients", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
