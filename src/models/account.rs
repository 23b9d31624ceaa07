use serde::Serialize;
use sqlx::FromRow;

/// アカウント（外部アカウントストアの読み取り専用ビュー）
///
/// `email` は通常必須だが、移行データ等で欠けている行が存在し得る
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: String,
    pub email: Option<String>,
}

/// アカウントに紐づくプロフィールレコード
///
/// テンプレートのコンテキストとしてのみ使用する。フィールドは `user_record.<name>` で参照可能
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountProfile {
    pub id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl AccountProfile {
    /// フィールドを持たない空のプロフィール
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: serde_json::Map::new(),
        }
    }
}
