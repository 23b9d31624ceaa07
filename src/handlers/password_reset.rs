use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, JsonBody};
use crate::models::CallerContext;
use crate::services::PasswordResetService;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn ok() -> Self {
        Self { status: "OK" }
    }
}

fn password_reset_service(state: &AppState) -> PasswordResetService {
    PasswordResetService::new(
        state.account_store.clone(),
        state.token_issuer.clone(),
        state.dispatcher.clone(),
        state.config.clone(),
    )
}

// === user:forgot-password ===

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /api/user/forgot-password
///
/// # Security
/// secure_match 無効時はユーザー存在有無にかかわらず同じレスポンスを返す
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ForgotPasswordRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    password_reset_service(&state)
        .request_reset(request.email.as_deref())
        .await?;

    Ok(Json(StatusResponse::ok()))
}

// === user:forgot-password:test ===

#[derive(Debug, Deserialize)]
pub struct TestForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub text_template: Option<String>,
    #[serde(default)]
    pub html_template: Option<String>,
}

/// POST /api/user/forgot-password/test
///
/// マスターキー（`X-Access-Key`）が必要
pub async fn test_forgot_password(
    State(state): State<AppState>,
    caller: CallerContext,
    JsonBody(request): JsonBody<TestForgotPasswordRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    password_reset_service(&state)
        .send_test_email(
            &caller,
            request.email.as_deref(),
            request.text_template.as_deref(),
            request.html_template.as_deref(),
        )
        .await?;

    Ok(Json(StatusResponse::ok()))
}
