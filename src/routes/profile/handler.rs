use axum::{
    Json,
    extract::{Extension, State},
};

use super::model::{Profile, SharingStatus, UpdateProfileRequest};
use crate::{
    AppState,
    error::AppError,
    result::ApiResponse,
    routes::location::invalidate_active_cache,
    utils::{Claims, success_to_api_response},
};

#[axum::debug_handler]
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Profile>>, AppError> {
    let profile = Profile::find_by_id(&state.pool, &claims.sub)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load profile {}: {}", claims.sub, e);
            AppError::FailedToGetProfile
        })?
        .unwrap_or_else(|| Profile::placeholder(&claims.sub));

    Ok(success_to_api_response(profile))
}

#[axum::debug_handler]
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<Profile>>, AppError> {
    let username = req.validated_username().map_err(AppError::Validation)?;

    let profile =
        Profile::upsert_details(&state.pool, &claims.sub, &username, req.avatar_url.as_deref())
            .await
            .map_err(|e| {
                tracing::error!("Failed to update profile {}: {}", claims.sub, e);
                AppError::FailedToStoreProfile
            })?;

    // 活跃位置快照里带着用户名
    invalidate_active_cache(&state.redis).await;
    Ok(success_to_api_response(profile))
}

#[axum::debug_handler]
pub async fn get_sharing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<SharingStatus>>, AppError> {
    let is_sharing = Profile::sharing_flag(&state.pool, &claims.sub)
        .await
        .map_err(|e| {
            tracing::error!("Failed to read sharing flag for {}: {}", claims.sub, e);
            AppError::FailedToGetProfile
        })?;

    Ok(success_to_api_response(SharingStatus { is_sharing }))
}

#[axum::debug_handler]
pub async fn update_sharing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SharingStatus>,
) -> Result<Json<ApiResponse<SharingStatus>>, AppError> {
    let is_sharing = Profile::set_sharing_flag(&state.pool, &claims.sub, req.is_sharing)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update sharing flag for {}: {}", claims.sub, e);
            AppError::FailedToStoreProfile
        })?;

    tracing::info!("User {} set location sharing to {}", claims.sub, is_sharing);
    Ok(success_to_api_response(SharingStatus { is_sharing }))
}
