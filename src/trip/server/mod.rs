// SPDX-License-Identifier: MIT

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::itinerary::Itinerary;
use super::service::PlanningService;
use super::state::RunSummary;
use super::types::{AccommodationTier, BudgetTier, TransportMode, TripRequest};
use crate::engine::error::{PlannerError, StoreError};

pub fn router(service: PlanningService) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/resume", post(resume_run))
        .route("/api/runs/{id}/itinerary", get(get_itinerary))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub async fn serve(service: PlanningService, host: &str, port: u16) -> Result<(), PlannerError> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| PlannerError::config(format!("Invalid listen address {}:{}: {}", host, port, e)))?;
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(service)).await?;

    Ok(())
}

enum ApiError {
    Planner(PlannerError),
    NoItinerary(RunSummary),
}

impl From<PlannerError> for ApiError {
    fn from(err: PlannerError) -> Self {
        Self::Planner(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NoItinerary(summary) => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": format!("Run {} has no itinerary", summary.run_id),
                    "status": summary.status,
                    "failure": summary.failure,
                })),
            )
                .into_response(),
            ApiError::Planner(err) => {
                let status = match &err {
                    PlannerError::Validation(_) => StatusCode::BAD_REQUEST,
                    PlannerError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    log::error!("Request failed: {}", err);
                }
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
        }
    }
}

/// Body of `POST /api/runs`; `end_date` is derived from `days` when omitted
#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    destination: String,
    start_date: NaiveDate,
    #[serde(default)]
    end_date: Option<NaiveDate>,
    days: u32,
    #[serde(default)]
    transport: TransportMode,
    #[serde(default)]
    accommodation: AccommodationTier,
    #[serde(default)]
    budget: BudgetTier,
    #[serde(default)]
    preferences: Vec<String>,
}

impl From<CreateRunRequest> for TripRequest {
    fn from(body: CreateRunRequest) -> Self {
        let mut request = TripRequest::new(body.destination, body.start_date, body.days)
            .with_transport(body.transport)
            .with_accommodation(body.accommodation)
            .with_budget(body.budget)
            .with_preferences(body.preferences);
        if let Some(end_date) = body.end_date {
            request.end_date = end_date;
        }
        request
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_runs(State(service): State<PlanningService>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(service.list_runs().await?))
}

async fn create_run(
    State(service): State<PlanningService>,
    Json(body): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run_id = service.create_run(body.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))))
}

async fn get_run(
    State(service): State<PlanningService>,
    Path(id): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(service.get_run_status(&id).await?))
}

async fn resume_run(
    State(service): State<PlanningService>,
    Path(id): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(service.resume_run(&id).await?))
}

async fn get_itinerary(
    State(service): State<PlanningService>,
    Path(id): Path<String>,
) -> Result<Json<Itinerary>, ApiError> {
    let state = service.get_run(&id).await?;
    match state.itinerary {
        Some(itinerary) => Ok(Json(itinerary)),
        None => Err(ApiError::NoItinerary(state.summary())),
    }
}
