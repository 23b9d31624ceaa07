use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, types::Json};

use crate::error::AppError;
use crate::models::{Account, AccountProfile};

/// アカウントストア
///
/// 存在有無を返すのみで、不在時の扱いは呼び出し側（ポリシー）が決める
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// メールアドレスでアカウントを検索
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    /// プロフィールを取得（行が無い場合は空のプロフィール）
    async fn find_profile(&self, account_id: &str) -> Result<AccountProfile, AppError>;
}

/// PostgreSQL 実装
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id::text AS id, email
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn find_profile(&self, account_id: &str) -> Result<AccountProfile, AppError> {
        let row = sqlx::query_as::<_, (String, Json<Map<String, Value>>)>(
            r#"
            SELECT id::text AS id, data
            FROM user_profiles
            WHERE id::text = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((id, Json(mut fields))) => {
                // id はレコードキーを優先
                fields.remove("id");
                AccountProfile { id, fields }
            }
            None => {
                tracing::debug!(account_id = %account_id, "プロフィール未登録（空のプロフィールを使用）");
                AccountProfile::empty(account_id)
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;

    use super::*;

    /// テスト用インメモリストア（検索キー → アカウント）
    #[derive(Default)]
    pub struct InMemoryAccountStore {
        pub accounts: HashMap<String, Account>,
        pub profiles: HashMap<String, AccountProfile>,
    }

    impl InMemoryAccountStore {
        pub fn with_account(lookup_email: &str, id: &str, email: Option<&str>) -> Self {
            let mut store = Self::default();
            store.accounts.insert(
                lookup_email.to_string(),
                Account {
                    id: id.to_string(),
                    email: email.map(str::to_string),
                },
            );
            store
        }
    }

    #[async_trait]
    impl AccountStore for InMemoryAccountStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
            Ok(self.accounts.get(email).cloned())
        }

        async fn find_profile(&self, account_id: &str) -> Result<AccountProfile, AppError> {
            Ok(self
                .profiles
                .get(account_id)
                .cloned()
                .unwrap_or_else(|| AccountProfile::empty(account_id)))
        }
    }
}
