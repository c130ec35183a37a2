//! JSON REST API for rook imports.
//!
//! Exposes an axum [`Router`] over a [`rook_sync::JobRegistry`]: start
//! imports, poll and cancel them, and inspect or reset sync cursors. Auth
//! and TLS are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", rook_api::api_router(jobs.clone()))
//! ```

pub mod cursors;
pub mod error;
pub mod imports;

use axum::{
  Router,
  routing::{get, post},
};
use rook_core::store::GameStore;
use rook_sync::{JobRegistry, transport::HttpTransport};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Build a fully-materialised API router for `jobs`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, T>(jobs: JobRegistry<S, T>) -> Router<()>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  Router::new()
    // Imports
    .route("/imports", post(imports::start::<S, T>))
    .route("/imports/pgn", post(imports::upload::<S, T>))
    .route("/imports/{id}", get(imports::get_one::<S, T>))
    .route("/imports/{id}/cancel", post(imports::cancel::<S, T>))
    // Cursors
    .route(
      "/cursors/{source}/{identity}",
      get(cursors::get_one::<S, T>).delete(cursors::reset::<S, T>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(jobs)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
