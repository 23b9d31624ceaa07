use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{AccountStore, PgAccountStore};
use crate::services::email::MailTransport;
use crate::services::{NotificationDispatcher, ResetTokenIssuer, SmtpMailer, TemplateProvider};
use secrecy::ExposeSecret;

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。起動後は読み取り専用。
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// アカウントストア
    pub account_store: Arc<dyn AccountStore>,
    /// リセットコード発行サービス
    pub token_issuer: ResetTokenIssuer,
    /// メール送信サービス
    pub dispatcher: NotificationDispatcher,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let account_store = Arc::new(PgAccountStore::new(db_pool));
        let token_issuer = ResetTokenIssuer::new(config.reset_code_secret.expose_secret())?;

        // SMTP_HOST 未設定でも起動はする（送信時にエラー）
        let transport = SmtpMailer::from_config(&config).map_err(|e| {
            tracing::error!(error = ?e, "SMTP トランスポートの初期化に失敗");
            AppError::Internal(anyhow::anyhow!("failed to initialize smtp transport: {}", e))
        })?;
        if transport.is_none() {
            tracing::warn!("SMTP_HOST 未設定（メール送信は失敗します）");
        }
        let transport = transport.map(|mailer| Arc::new(mailer) as Arc<dyn MailTransport>);

        let dispatcher = NotificationDispatcher::new(TemplateProvider::from_config(&config), transport);

        Ok(Self::from_parts(
            Arc::new(config),
            account_store,
            token_issuer,
            dispatcher,
        ))
    }

    /// 構築済みのコンポーネントから AppState を作成
    pub fn from_parts(
        config: Arc<Config>,
        account_store: Arc<dyn AccountStore>,
        token_issuer: ResetTokenIssuer,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            config,
            account_store,
            token_issuer,
            dispatcher,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::test_config;
    use crate::repositories::account::fake::InMemoryAccountStore;
    use crate::services::template::test_support::{file_specs, template_dir};

    /// インメモリのストアとテンプレートディレクトリで AppState を構築
    pub fn state(
        store: InMemoryAccountStore,
        transport: Option<Arc<dyn MailTransport>>,
    ) -> (AppState, tempfile::TempDir) {
        let dir = template_dir(&[("forgot_password_email.txt", "{{ link }}")]);
        let dispatcher =
            NotificationDispatcher::new(TemplateProvider::new(dir.path(), file_specs()), transport);

        let state = AppState::from_parts(
            Arc::new(test_config(&[])),
            Arc::new(store),
            ResetTokenIssuer::new("test-secret").unwrap(),
            dispatcher,
        );
        (state, dir)
    }
}
