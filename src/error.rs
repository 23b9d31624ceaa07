use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// RPC エラー種別
///
/// クライアントに返す `name` / `code` の組。コード値は既存クライアントとの互換のため固定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    AccessKeyNotAccepted,
    UnexpectedError,
}

impl ErrorKind {
    pub fn code(self) -> u32 {
        match self {
            Self::AccessKeyNotAccepted => 103,
            Self::InvalidArgument => 108,
            Self::UnexpectedError => 10000,
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::AccessKeyNotAccepted => StatusCode::UNAUTHORIZED,
            Self::UnexpectedError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AccessKeyNotAccepted(String),

    /// 送信処理中の失敗（元エラーのメッセージのみ保持）
    #[error("{0}")]
    UnexpectedError(String),

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AccessKeyNotAccepted(_) => ErrorKind::AccessKeyNotAccepted,
            Self::UnexpectedError(_) | Self::Database(_) | Self::Internal(_) => {
                ErrorKind::UnexpectedError
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    name: ErrorKind,
    code: u32,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match &self {
            Self::InvalidArgument(msg)
            | Self::AccessKeyNotAccepted(msg)
            | Self::UnexpectedError(msg) => msg.clone(),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                "内部エラーが発生しました".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                "内部エラーが発生しました".to_string()
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                name: kind,
                code: kind.code(),
                message,
            },
        };

        (kind.status(), Json(body)).into_response()
    }
}

/// JSON ボディ抽出
///
/// axum 標準の `Json` はパース失敗時にプレーンテキストを返すため、
/// `InvalidArgument` として RPC エラー形式に揃える
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(status = %rejection.status(), "リクエストボディの解析に失敗");
                Err(AppError::InvalidArgument(rejection.body_text()))
            }
        }
    }
}
