use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{Account, AccountProfile, CallerContext};
use crate::repositories::AccountStore;
use crate::services::email::{DispatchError, DispatchRequest, NotificationDispatcher};
use crate::services::template::TemplateParams;
use crate::services::token::ResetTokenIssuer;

/// テスト送信で使用するダミー値
pub const DUMMY_ACCOUNT_ID: &str = "dummy-id";
pub const DUMMY_ACCOUNT_EMAIL: &str = "dummy-user@example.com";
pub const DUMMY_RESET_CODE: &str = "dummy-reset-code";

/// パスワードリセットサービス
#[derive(Clone)]
pub struct PasswordResetService {
    account_store: Arc<dyn AccountStore>,
    token_issuer: ResetTokenIssuer,
    dispatcher: NotificationDispatcher,
    config: Arc<Config>,
}

impl PasswordResetService {
    /// 新しい PasswordResetService を作成
    pub fn new(
        account_store: Arc<dyn AccountStore>,
        token_issuer: ResetTokenIssuer,
        dispatcher: NotificationDispatcher,
        config: Arc<Config>,
    ) -> Self {
        Self {
            account_store,
            token_issuer,
            dispatcher,
            config,
        }
    }

    /// パスワードリセットをリクエスト（user:forgot-password）
    ///
    /// # Security
    /// - secure_match 無効時はユーザー不在でも成功を返す（情報漏洩防止）
    /// - リセットコード・リンクはログに出力しない
    pub async fn request_reset(&self, email: Option<&str>) -> Result<(), AppError> {
        let email = require_email(email)?;

        tracing::info!(email = %email, "パスワードリセットリクエスト");

        let Some(account) = self.account_store.find_by_email(email).await? else {
            if !self.config.secure_match {
                tracing::info!(email = %email, "パスワードリセット: ユーザー不在（成功レスポンス返却）");
                return Ok(());
            }
            tracing::info!(email = %email, "パスワードリセット: ユーザー不在");
            return Err(AppError::InvalidArgument("user_id must be set".to_string()));
        };

        let Some(account_email) = account.email.clone() else {
            tracing::warn!(user_id = %account.id, "メールアドレス未登録のアカウント");
            return Err(AppError::InvalidArgument("email must be set".to_string()));
        };

        let profile = self.account_store.find_profile(&account.id).await?;

        let token = self
            .token_issuer
            .issue(&account.id, self.config.reset_url_lifetime)?;

        let url_prefix = self.config.url_prefix();
        let params = TemplateParams {
            appname: self.config.app_name.clone(),
            link: token.link(url_prefix),
            url_prefix: url_prefix.to_string(),
            email: account_email.clone(),
            user_id: account.id.clone(),
            code: token.code,
            user: account,
            user_record: profile,
        };

        self.dispatch(&account_email, &params, None, None)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, user_id = %params.user_id, "パスワードリセットメールの送信に失敗");
                AppError::UnexpectedError(e.to_string())
            })?;

        tracing::info!(user_id = %params.user_id, "パスワードリセットメール送信完了");

        Ok(())
    }

    /// テンプレート確認用のテストメールを送信（user:forgot-password:test）
    ///
    /// アカウント検索・コード発行は行わず、ダミー値で `email` 宛てに送信する
    pub async fn send_test_email(
        &self,
        caller: &CallerContext,
        email: Option<&str>,
        text_template: Option<&str>,
        html_template: Option<&str>,
    ) -> Result<(), AppError> {
        if !caller.is_master() {
            tracing::warn!(access_key_type = ?caller.access_key_type, "テスト送信: マスターキーなし");
            return Err(AppError::AccessKeyNotAccepted(
                "master key is required".to_string(),
            ));
        }

        let email = require_email(email)?;

        let url_prefix = self.config.url_prefix();
        let user = Account {
            id: DUMMY_ACCOUNT_ID.to_string(),
            email: Some(DUMMY_ACCOUNT_EMAIL.to_string()),
        };
        let params = TemplateParams {
            appname: self.config.app_name.clone(),
            link: format!("{}/example-reset-password-link", url_prefix),
            url_prefix: url_prefix.to_string(),
            email: DUMMY_ACCOUNT_EMAIL.to_string(),
            user_id: DUMMY_ACCOUNT_ID.to_string(),
            code: DUMMY_RESET_CODE.to_string(),
            user,
            user_record: AccountProfile::empty(DUMMY_ACCOUNT_ID),
        };

        self.dispatch(email, &params, text_template, html_template)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, to = %email, "テストメールの送信に失敗");
                AppError::UnexpectedError(e.to_string())
            })?;

        tracing::info!(to = %email, "テストメール送信完了");

        Ok(())
    }

    async fn dispatch(
        &self,
        recipient: &str,
        params: &TemplateParams,
        text_override: Option<&str>,
        html_override: Option<&str>,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send(DispatchRequest {
                sender: &self.config.email_sender,
                recipient,
                subject: &self.config.email_subject,
                params,
                text_override,
                html_override,
                reply_to: self.config.email_reply_to.as_deref(),
            })
            .await
    }
}

/// メールアドレスの必須チェック
fn require_email(email: Option<&str>) -> Result<&str, AppError> {
    match email.map(str::trim) {
        Some(email) if !email.is_empty() => Ok(email),
        _ => Err(AppError::InvalidArgument("email must be set".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::config::test_config;
    use crate::models::AccessKeyType;
    use crate::repositories::account::fake::InMemoryAccountStore;
    use crate::services::email::MailTransport;
    use crate::services::email::fake::{FailingTransport, RecordingTransport};
    use crate::services::template::TemplateProvider;
    use crate::services::template::test_support::{file_specs, template_dir};

    const LINK_TEMPLATE: &str = "{{ link }}";

    struct Fixture {
        service: PasswordResetService,
        transport: Arc<RecordingTransport>,
        issuer: ResetTokenIssuer,
        _dir: tempfile::TempDir,
    }

    fn fixture(
        store: InMemoryAccountStore,
        overrides: &[(&str, &str)],
        text_template: &str,
    ) -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        fixture_with_transport(store, overrides, text_template, Some(transport.clone()), transport)
    }

    fn fixture_with_transport(
        store: InMemoryAccountStore,
        overrides: &[(&str, &str)],
        text_template: &str,
        transport: Option<Arc<dyn MailTransport>>,
        recording: Arc<RecordingTransport>,
    ) -> Fixture {
        let config = Arc::new(test_config(overrides));
        let dir = template_dir(&[("forgot_password_email.txt", text_template)]);
        let issuer = ResetTokenIssuer::new("test-secret").unwrap();
        let dispatcher =
            NotificationDispatcher::new(TemplateProvider::new(dir.path(), file_specs()), transport);

        Fixture {
            service: PasswordResetService::new(
                Arc::new(store),
                issuer.clone(),
                dispatcher,
                config,
            ),
            transport: recording,
            issuer,
            _dir: dir,
        }
    }

    fn known_user() -> InMemoryAccountStore {
        InMemoryAccountStore::with_account("user@example.com", "user-1", Some("user@example.com"))
    }

    fn master() -> CallerContext {
        CallerContext::new(Some(AccessKeyType::Master))
    }

    /// リンクからクエリパラメータを取り出す
    fn query_param<'a>(link: &'a str, key: &str) -> &'a str {
        let query = link.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{}=", key)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_email_is_invalid_argument() {
        let f = fixture(known_user(), &[], LINK_TEMPLATE);

        for email in [None, Some(""), Some("   ")] {
            let result = f.service.request_reset(email).await;
            assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        }
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_email_without_secure_match_returns_ok() {
        let f = fixture(known_user(), &[], LINK_TEMPLATE);

        let result = f.service.request_reset(Some("nobody@example.com")).await;

        assert!(result.is_ok());
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_email_with_secure_match_is_invalid_argument() {
        let f = fixture(known_user(), &[("SECURE_MATCH", "true")], LINK_TEMPLATE);

        let result = f.service.request_reset(Some("nobody@example.com")).await;

        assert!(matches!(result, Err(AppError::InvalidArgument(msg)) if msg == "user_id must be set"));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_account_without_email_is_invalid_argument() {
        let store = InMemoryAccountStore::with_account("legacy@example.com", "user-2", None);
        let f = fixture(store, &[], LINK_TEMPLATE);

        let result = f.service.request_reset(Some("legacy@example.com")).await;

        assert!(matches!(result, Err(AppError::InvalidArgument(msg)) if msg == "email must be set"));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reset_link_is_sent_to_account() {
        let f = fixture(
            known_user(),
            &[("RESET_URL_PREFIX", "https://x/"), ("RESET_URL_LIFETIME", "600")],
            LINK_TEMPLATE,
        );

        let before = OffsetDateTime::now_utc().unix_timestamp();
        f.service.request_reset(Some("user@example.com")).await.unwrap();
        let after = OffsetDateTime::now_utc().unix_timestamp();

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "user@example.com");
        assert_eq!(sent[0].sender, "no-reply@example.com");

        let link = sent[0].text_body.as_str();
        assert!(link.starts_with("https://x/reset-password?code="));
        assert_eq!(query_param(link, "user_id"), "user-1");

        let expire_at: i64 = query_param(link, "expire_at").parse().unwrap();
        assert!(expire_at >= before + 600 && expire_at <= after + 601);

        let code = query_param(link, "code");
        let now = OffsetDateTime::from_unix_timestamp(after).unwrap();
        assert!(f.issuer.verify("user-1", expire_at, code, now));
    }

    #[tokio::test]
    async fn test_template_receives_account_context() {
        let mut store = known_user();
        let mut profile = AccountProfile::empty("user-1");
        profile
            .fields
            .insert("name".to_string(), serde_json::json!("Alice"));
        store.profiles.insert("user-1".to_string(), profile);

        let f = fixture(
            store,
            &[("EMAIL_REPLY_TO", "support@example.com")],
            "{{ appname }}|{{ email }}|{{ user_id }}|{{ user.id }}|{{ user_record.name }}|{{ url_prefix }}",
        );

        f.service.request_reset(Some("user@example.com")).await.unwrap();

        let sent = f.transport.sent();
        assert_eq!(
            sent[0].text_body,
            "TestApp|user@example.com|user-1|user-1|Alice|https://example.com"
        );
        assert_eq!(sent[0].reply_to.as_deref(), Some("support@example.com"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_unexpected_error() {
        let recording = Arc::new(RecordingTransport::default());
        let f = fixture_with_transport(
            known_user(),
            &[],
            LINK_TEMPLATE,
            Some(Arc::new(FailingTransport)),
            recording,
        );

        let result = f.service.request_reset(Some("user@example.com")).await;

        assert!(matches!(result, Err(AppError::UnexpectedError(msg)) if msg == "connection refused"));
    }

    #[tokio::test]
    async fn test_render_failure_is_unexpected_error() {
        let f = fixture(known_user(), &[], "{{ nope }}");

        let result = f.service.request_reset(Some("user@example.com")).await;

        match result {
            Err(AppError::UnexpectedError(msg)) => assert!(msg.contains("nope")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_transport_is_unexpected_error() {
        let recording = Arc::new(RecordingTransport::default());
        let f = fixture_with_transport(known_user(), &[], LINK_TEMPLATE, None, recording);

        let result = f.service.request_reset(Some("user@example.com")).await;

        assert!(matches!(
            result,
            Err(AppError::UnexpectedError(msg)) if msg == "mail server is not configured"
        ));
    }

    #[tokio::test]
    async fn test_test_email_requires_master_key() {
        let f = fixture(known_user(), &[], LINK_TEMPLATE);

        for caller in [
            CallerContext::default(),
            CallerContext::new(Some(AccessKeyType::Api)),
        ] {
            let result = f
                .service
                .send_test_email(&caller, Some("ops@example.com"), None, None)
                .await;
            assert!(matches!(result, Err(AppError::AccessKeyNotAccepted(_))));
        }
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_test_email_uses_dummy_payload() {
        let f = fixture(
            known_user(),
            &[("RESET_URL_PREFIX", "https://x/")],
            "{{ link }}|{{ code }}|{{ user_id }}|{{ email }}|{{ user_record.id }}",
        );

        f.service
            .send_test_email(&master(), Some("ops@example.com"), None, None)
            .await
            .unwrap();

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "ops@example.com");
        assert_eq!(
            sent[0].text_body,
            "https://x/example-reset-password-link|dummy-reset-code|dummy-id|dummy-user@example.com|dummy-id"
        );
    }

    #[tokio::test]
    async fn test_test_email_with_override_templates() {
        let f = fixture(known_user(), &[], "file template");

        f.service
            .send_test_email(
                &master(),
                Some("ops@example.com"),
                Some("override {{ code }}"),
                Some("<b>{{ user_id }}</b>"),
            )
            .await
            .unwrap();

        let sent = f.transport.sent();
        assert_eq!(sent[0].text_body, "override dummy-reset-code");
        assert_eq!(sent[0].html_body.as_deref(), Some("<b>dummy-id</b>"));
    }

    #[tokio::test]
    async fn test_test_email_requires_recipient() {
        let f = fixture(known_user(), &[], LINK_TEMPLATE);

        let result = f.service.send_test_email(&master(), None, None, None).await;

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_test_email_failure_is_unexpected_error() {
        let f = fixture(known_user(), &[], LINK_TEMPLATE);

        let result = f
            .service
            .send_test_email(&master(), Some("ops@example.com"), Some("{{ nope }}"), None)
            .await;

        assert!(matches!(result, Err(AppError::UnexpectedError(_))));
        assert!(f.transport.sent().is_empty());
    }
}
