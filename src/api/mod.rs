use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Local;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::catalog::{FundCatalog, FundEntry};
use crate::core::Violation;
use crate::prices::PriceSource;
use crate::service::{SimulationRequest, run_simulation};

/// Shared read-only services handed to every request.
#[derive(Clone)]
pub struct AppState {
    catalog: Arc<FundCatalog>,
    prices: Arc<dyn PriceSource>,
}

impl AppState {
    pub fn new(catalog: Arc<FundCatalog>, prices: Arc<dyn PriceSource>) -> Self {
        Self { catalog, prices }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<Violation>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct FundsResponse<'a> {
    funds: &'a [FundEntry],
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/funds", get(funds_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn funds_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        FundsResponse {
            funds: state.catalog.entries(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", Vec::new())
}

async fn simulate_handler(
    State(state): State<AppState>,
    payload: Result<Json<SimulationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid API JSON payload: {}", rejection.body_text()),
                Vec::new(),
            );
        }
    };

    let today = Local::now().date_naive();
    let job = tokio::task::spawn_blocking(move || {
        run_simulation(request, &state.catalog, state.prices.as_ref(), today)
    });

    match job.await {
        Ok(Ok(report)) => json_response(StatusCode::OK, report),
        Ok(Err(err)) if err.is_client_error() => {
            warn!(error = %err, "simulation request rejected");
            let violations = err.violations().to_vec();
            error_response(StatusCode::BAD_REQUEST, &err.to_string(), violations)
        }
        Ok(Err(err)) => {
            error!(error = %err, "simulation failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &err.to_string(),
                Vec::new(),
            )
        }
        Err(join_err) => {
            error!(error = %join_err, "simulation task aborted");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Simulation task aborted",
                Vec::new(),
            )
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str, violations: Vec<Violation>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            violations,
        },
    )
}
