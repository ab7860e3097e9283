pub mod notify;
pub mod status;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(notify::router())
        .merge(status::router())
}
