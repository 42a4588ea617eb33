use std::convert::Infallible;

use axum::{
    Json,
    extract::{Extension, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;

use super::model::{ConversationChangesQuery, ConversationQuery, MessageRecord, SendMessageRequest};
use crate::{
    AppState,
    error::AppError,
    feed::{self, sse_events},
    models::{ChangeEvent, ChangeKind, DirectMessage},
    result::ApiResponse,
    utils::{Claims, success_to_api_response},
};

#[axum::debug_handler]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<DirectMessage>>), AppError> {
    let content = req
        .validated_content(&claims.sub)
        .map_err(AppError::Validation)?;

    let message = MessageRecord::create(&state.pool, &claims.sub, &req.receiver_id, &content)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create message: {}", e);
            AppError::FailedToStoreMessage
        })?;

    feed::publish(
        &state.redis,
        &ChangeEvent::Messages {
            kind: ChangeKind::Insert,
            message: message.clone(),
        },
    )
    .await;

    Ok((StatusCode::CREATED, success_to_api_response(message)))
}

#[axum::debug_handler]
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ApiResponse<Vec<DirectMessage>>>, AppError> {
    let messages =
        MessageRecord::conversation(&state.pool, &claims.sub, &query.peer_id, query.limit())
            .await
            .map_err(|e| {
                tracing::error!("Failed to get messages: {}", e);
                AppError::FailedToGetMessage
            })?;

    Ok(success_to_api_response(messages))
}

pub async fn message_changes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ConversationChangesQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = claims.sub;
    let peer_id = query.peer_id;

    let events = sse_events(
        state.feed.subscribe(),
        move |event| event.matches_conversation(&user_id, &peer_id),
        None,
    );
    Sse::new(events).keep_alive(KeepAlive::default())
}
