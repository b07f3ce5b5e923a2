//! Client handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    ClientResponse, ClientsQuery, CreateClientRequest, ListResponse, UpdateClientRequest,
};
use crate::models::ListClientsFilter;
use crate::startup::AppState;

/// POST /api/clients
pub async fn create_client(
    State(state): State<AppState>,
    Json(req): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientResponse>), AppError> {
    req.validate()?;
    let client = state.service.create_client(req.into()).await?;

    tracing::info!(client_id = %client.client_id, "Client created");

    Ok((StatusCode::CREATED, Json(client.into())))
}

/// GET /api/clients
pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientsQuery>,
) -> Result<Json<ListResponse<ClientResponse>>, AppError> {
    let filter: ListClientsFilter = query.into();
    let clients = state.service.list_clients(&filter).await?;

    Ok(Json(ListResponse::new(
        clients.into_iter().map(Into::into).collect(),
        filter.page.max(1),
        filter.limit() as u32,
    )))
}

/// GET /api/clients/:id
pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<ClientResponse>, AppError> {
    let client = state.service.get_client(client_id).await?;
    Ok(Json(client.into()))
}

/// PATCH /api/clients/:id
pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<Json<ClientResponse>, AppError> {
    req.validate()?;
    let client = state.service.update_client(client_id, req.into()).await?;
    Ok(Json(client.into()))
}

/// Existing documents keep their client snapshot.
///
/// DELETE /api/clients/:id
pub async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.service.delete_client(client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
