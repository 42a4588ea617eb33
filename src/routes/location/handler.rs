use std::convert::Infallible;

use axum::{
    Json,
    extract::{Extension, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;

use super::model::{
    ActiveLocationsQuery, ChangesQuery, LocationRecord, LocationWritten, UpdateActiveRequest,
    UpsertLocationRequest,
};
use crate::{
    AppState,
    error::AppError,
    feed::{self, resync_event, sse_events},
    models::{ChangeEvent, ChangeKind, Coordinate, FeedFilter, PeerLocation},
    result::ApiResponse,
    utils::{Claims, success_to_api_response},
};

#[axum::debug_handler]
pub async fn upsert_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpsertLocationRequest>,
) -> Result<Json<ApiResponse<LocationWritten>>, AppError> {
    let coordinate = Coordinate::new(req.latitude, req.longitude)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let is_active = req.is_active.unwrap_or(true);

    let written =
        LocationRecord::upsert(&state.pool, &state.redis, &claims.sub, coordinate, is_active)
            .await
            .map_err(|e| {
                tracing::error!("Failed to upsert location for {}: {}", claims.sub, e);
                AppError::FailedToStoreLocation
            })?;

    let kind = if written.inserted {
        ChangeKind::Insert
    } else {
        ChangeKind::Update
    };
    feed::publish(
        &state.redis,
        &ChangeEvent::Locations {
            kind,
            location_id: written.location_id.clone(),
            user_id: claims.sub,
            is_active,
        },
    )
    .await;

    Ok(success_to_api_response(LocationWritten {
        location_id: Some(written.location_id),
    }))
}

#[axum::debug_handler]
pub async fn set_location_active(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateActiveRequest>,
) -> Result<Json<ApiResponse<LocationWritten>>, AppError> {
    let location_id =
        LocationRecord::set_active(&state.pool, &state.redis, &claims.sub, req.is_active)
            .await
            .map_err(|e| {
                tracing::error!("Failed to update active flag for {}: {}", claims.sub, e);
                AppError::FailedToStoreLocation
            })?;

    // 还没有上报过位置的用户没有记录可更新
    if let Some(location_id) = &location_id {
        feed::publish(
            &state.redis,
            &ChangeEvent::Locations {
                kind: ChangeKind::Update,
                location_id: location_id.clone(),
                user_id: claims.sub,
                is_active: req.is_active,
            },
        )
        .await;
    }

    Ok(success_to_api_response(LocationWritten { location_id }))
}

#[axum::debug_handler]
pub async fn get_active_locations(
    State(state): State<AppState>,
    Query(query): Query<ActiveLocationsQuery>,
) -> Result<Json<ApiResponse<Vec<PeerLocation>>>, AppError> {
    let locations = LocationRecord::find_active(&state.pool, &state.redis, query.user_id.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch active locations: {}", e);
            AppError::FailedToGetLocations
        })?;

    Ok(success_to_api_response(locations))
}

pub async fn location_changes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChangesQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = if query.active.unwrap_or(false) {
        FeedFilter::ActiveOnly
    } else {
        FeedFilter::All
    };
    tracing::debug!("{} subscribed to location changes ({:?})", claims.sub, filter);

    let events = sse_events(
        state.feed.subscribe(),
        move |event| event.matches_locations(filter),
        Some(resync_event()),
    );
    Sse::new(events).keep_alive(KeepAlive::default())
}
