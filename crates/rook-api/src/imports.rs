//! Handlers for `/imports` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/imports` | Body: [`StartBody`]; returns 202 + `{"job_id"}` |
//! | `POST` | `/imports/pgn` | Body: [`UploadBody`]; returns 202 + `{"job_id"}` |
//! | `GET`  | `/imports/{id}` | Job status, progress and (when finished) summary |
//! | `POST` | `/imports/{id}/cancel` | Returns 202 + current progress |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use rook_core::{game::SourceName, store::GameStore};
use rook_sync::{
  ImportRequest, JobId, JobProgress, JobRegistry, JobStatus, transport::HttpTransport,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Largest `limit` a single job may request.
pub const MAX_LIMIT: usize = 1_000;

fn default_limit() -> usize { 100 }

#[derive(Debug, Deserialize)]
pub struct StartBody {
  /// `chess_com` or `lichess`.
  pub source:   String,
  pub identity: String,
  #[serde(default = "default_limit")]
  pub limit:    usize,
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
  pub identity: String,
  pub pgn:      String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Started {
  pub job_id: JobId,
}

fn require_identity(identity: &str) -> Result<(), ApiError> {
  if identity.trim().is_empty() {
    return Err(ApiError::BadRequest("identity must not be empty".into()));
  }
  Ok(())
}

// ─── Start ────────────────────────────────────────────────────────────────────

/// `POST /imports`
pub async fn start<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Json(body): Json<StartBody>,
) -> Result<(StatusCode, Json<Started>), ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  let source = SourceName::parse(&body.source)?;
  if source == SourceName::Upload {
    return Err(ApiError::BadRequest(
      "uploads go through POST /imports/pgn".into(),
    ));
  }
  require_identity(&body.identity)?;
  if body.limit == 0 || body.limit > MAX_LIMIT {
    return Err(ApiError::BadRequest(format!(
      "limit must be between 1 and {MAX_LIMIT}"
    )));
  }

  let job_id = jobs.start_import(ImportRequest {
    source,
    identity: body.identity,
    limit: body.limit,
  });
  Ok((StatusCode::ACCEPTED, Json(Started { job_id })))
}

/// `POST /imports/pgn`
pub async fn upload<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Json(body): Json<UploadBody>,
) -> Result<(StatusCode, Json<Started>), ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  require_identity(&body.identity)?;
  if body.pgn.trim().is_empty() {
    return Err(ApiError::BadRequest("pgn must not be empty".into()));
  }
  let job_id = jobs.start_pgn_import(body.identity, body.pgn);
  Ok((StatusCode::ACCEPTED, Json(Started { job_id })))
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// `GET /imports/{id}`
pub async fn get_one<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Path(id): Path<JobId>,
) -> Result<Json<JobStatus>, ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  Ok(Json(jobs.status(id)?))
}

/// `POST /imports/{id}/cancel`
pub async fn cancel<S, T>(
  State(jobs): State<JobRegistry<S, T>>,
  Path(id): Path<JobId>,
) -> Result<(StatusCode, Json<JobProgress>), ApiError>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  let progress = jobs.cancel(id)?;
  Ok((StatusCode::ACCEPTED, Json(progress)))
}
