use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, ProfileResponse,
            RegisterRequest, RegisterResponse, SuccessResponse, VerifyTokenRequest,
            VerifyTokenResponse,
        },
        extractors::{ApiJson, AuthUser},
        services,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify", post(verify))
        .route("/auth/change-password", post(change_password))
        .route("/auth/profile", get(profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    services::register(state.users.as_ref(), payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    services::login(state.users.as_ref(), &state.keys, payload)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    payload: Option<Json<VerifyTokenRequest>>,
) -> Json<VerifyTokenResponse> {
    // a body without a token is just another invalid token
    let Some(Json(payload)) = payload else {
        return Json(VerifyTokenResponse::invalid());
    };
    Json(services::verify_token(state.users.as_ref(), &state.keys, &payload.token).await)
}

#[instrument(skip(state, payload), fields(user_id = payload.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::change_password(state.users.as_ref(), payload)
        .await
        .map(Json)
}

#[instrument(skip(state, claims), fields(user_id = claims.user_id))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = services::profile(state.users.as_ref(), claims.user_id).await?;
    Ok(Json(ProfileResponse { user }))
}
