//! API routes.

pub mod lookup;
pub mod soar;
pub mod workbooks;

use crate::state::AppState;
use axum::Router;

/// Creates the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/lookup_editor", lookup::routes())
        .nest("/soar_export", soar::routes().merge(workbooks::routes()))
        .with_state(state)
}
