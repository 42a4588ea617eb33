use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{AppState, middleware::auth_middleware, routes};

// 位置相关的路由
fn location_routes() -> Router<AppState> {
    Router::new()
        .route("/locations", put(routes::location::upsert_location))
        .route(
            "/locations/active",
            get(routes::location::get_active_locations).patch(routes::location::set_location_active),
        )
        .route("/locations/changes", get(routes::location::location_changes))
}

// 用户资料相关的路由
fn profile_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/profiles/me",
            get(routes::profile::get_me).put(routes::profile::update_me),
        )
        .route(
            "/profiles/me/sharing",
            get(routes::profile::get_sharing).put(routes::profile::update_sharing),
        )
}

// 私聊消息相关的路由
fn message_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/messages",
            post(routes::message::send_message).get(routes::message::get_conversation),
        )
        .route("/messages/changes", get(routes::message::message_changes))
}

/// 所有接口都需要认证，挂载在 `api_base_uri` 之下
pub fn create_router(state: AppState) -> Router<AppState> {
    let api = Router::new()
        .merge(location_routes())
        .merge(profile_routes())
        .merge(message_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().nest(&state.config.api_base_uri, api)
}
