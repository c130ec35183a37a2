//! Handlers for `/cursors/{source}/{identity}`.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use rook_core::{cursor::SyncCursor, game::SourceName, store::GameStore};
use rook_sync::{JobRegistry, orchestrator::normalize_identity, transport::HttpTransport};

use crate::error::ApiError;

fn key(source: &str, identity: &str) -> Result<(SourceName, String), ApiError> {
  Ok((SourceName::parse(source)?, normalize_identity(identity)?))
}

/// `GET /cursors/{source}/{identity}`
pub async fn get_one<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Path((source, identity)): Path<(String, String)>,
) -> Result<Json<SyncCursor>, ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  let (source, identity) = key(&source, &identity)?;
  jobs
    .orchestrator()
    .cursors()
    .get(source, &identity)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no cursor for {source}/{identity}")))
}

/// `DELETE /cursors/{source}/{identity}` — the next import starts from the
/// newest games again; dedup still prevents rewrites.
pub async fn reset<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Path((source, identity)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  let (source, identity) = key(&source, &identity)?;
  if jobs.orchestrator().cursors().reset(source, &identity).await? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("no cursor for {source}/{identity}")))
  }
}
