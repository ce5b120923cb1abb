use axum::routing::{get, post};
use axum::Router;
use http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use http::Method;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

pub mod auth;
pub mod client;
pub mod user;

use crate::State;

/// Body of a successful call that returns nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Tags a submission touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<String>,
}

pub fn router(state: State) -> Router<State> {
    let cors_layer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec![ACCEPT, CONTENT_TYPE, ORIGIN])
        .allow_origin(Any)
        .allow_credentials(false);

    Router::new()
        .route("/auth/generators", get(auth::generators))
        .route("/auth/pks", get(auth::pks))
        .route("/auth/reEncrypt/:id/:redirect", post(auth::re_encrypt))
        .route("/user/:id", get(user::identity).post(user::register))
        .route("/user/:id/data", get(user::get_data).post(user::set_data))
        .route("/user/:id/backup", post(user::backup))
        .route("/user/:id/code", post(user::recover))
        .route("/user/:id/code/:email", get(user::send_code))
        .with_state(state)
        .layer(cors_layer)
}
