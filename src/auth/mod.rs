use crate::state::AppState;
use axum::Router;

pub mod accounts;
mod dto;
pub mod handlers;
pub mod password;
pub mod permissions;
pub mod repo;
pub mod repo_types;
pub mod tokens;
pub(crate) mod extractors;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
        .merge(handlers::admin_routes())
}
