use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::Config;
use crate::models::EmailMessage;
use crate::services::template::{
    RESET_EMAIL_HTML, RESET_EMAIL_TEXT, Template, TemplateParams, TemplateProvider,
};

/// SMTP接続モード
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpMode {
    /// 平文（暗号化なし）
    #[default]
    Normal,
    /// 接続時からTLS（SMTPS）
    Ssl,
    /// STARTTLS
    Tls,
}

/// メール送信処理のエラー
///
/// 表示文字列はそのまま呼び出し元へ返されるメッセージになる
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("mail server is not configured")]
    NotConfigured,

    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error("failed to fetch template {name}: {message}")]
    TemplateFetch { name: String, message: String },

    #[error("failed to read template {name}: {source}")]
    TemplateIo {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Render { name: String, message: String },

    #[error("invalid email address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error(transparent)]
    Message(#[from] lettre::error::Error),

    #[error("{0}")]
    Transport(String),
}

/// メール送信トランスポート
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// 1回だけ送信を試みる（リトライしない）
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError>;
}

/// lettre による SMTP 送信
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// 設定から SmtpMailer を作成
    ///
    /// # Returns
    /// `SMTP_HOST` 未設定の場合は `None`
    pub fn from_config(config: &Config) -> Result<Option<Self>, DispatchError> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let builder = match config.smtp_mode {
            SmtpMode::Normal => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            SmtpMode::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| DispatchError::Transport(e.to_string()))?,
            SmtpMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DispatchError::Transport(e.to_string()))?,
        };

        let mut builder = builder.port(config.smtp_port);
        if let (Some(login), Some(password)) = (&config.smtp_login, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(
                login.clone(),
                password.expose_secret().clone(),
            ));
        }

        tracing::info!(
            host = %host,
            port = config.smtp_port,
            mode = ?config.smtp_mode,
            "SMTP トランスポートを初期化"
        );

        Ok(Some(Self {
            transport: builder.build(),
        }))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError> {
        let email = build_message(&message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DispatchError> {
    address.parse().map_err(|source| DispatchError::Address {
        address: address.to_string(),
        source,
    })
}

/// lettre のメッセージを構築
///
/// HTML本文がある場合は multipart/alternative、無い場合は text/plain のみ
fn build_message(message: &EmailMessage) -> Result<Message, DispatchError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&message.sender)?)
        .to(parse_mailbox(&message.recipient)?)
        .subject(message.subject.clone());

    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to)?);
    }

    let email = match &message.html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            message.text_body.clone(),
            html.clone(),
        ))?,
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body.clone())?,
    };

    Ok(email)
}

/// 送信リクエスト
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub sender: &'a str,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub params: &'a TemplateParams,
    /// 指定時はファイルテンプレートの代わりに使用（テスト送信用）
    pub text_override: Option<&'a str>,
    pub html_override: Option<&'a str>,
    pub reply_to: Option<&'a str>,
}

/// テンプレートメール送信サービス
#[derive(Clone)]
pub struct NotificationDispatcher {
    templates: TemplateProvider,
    transport: Option<Arc<dyn MailTransport>>,
}

impl NotificationDispatcher {
    /// 新しい NotificationDispatcher を作成
    ///
    /// `transport` が `None` の場合、送信は常に `NotConfigured` で失敗する
    pub fn new(templates: TemplateProvider, transport: Option<Arc<dyn MailTransport>>) -> Self {
        Self {
            templates,
            transport,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    /// テンプレートをレンダリングしてメールを送信
    pub async fn send(&self, request: DispatchRequest<'_>) -> Result<(), DispatchError> {
        // テンプレート解決より先にチェック
        let Some(transport) = &self.transport else {
            tracing::debug!("メールサーバーが未設定（SMTP_HOST を設定してください）");
            return Err(DispatchError::NotConfigured);
        };

        let (text_template, html_template) = self
            .select_templates(request.text_override, request.html_override)
            .await?;

        let text_body = text_template.render(request.params)?;
        let html_body = html_template
            .map(|template| template.render(request.params))
            .transpose()?;

        let message = EmailMessage {
            sender: request.sender.to_string(),
            recipient: request.recipient.to_string(),
            subject: request.subject.to_string(),
            text_body,
            html_body,
            reply_to: request.reply_to.map(str::to_string),
        };

        transport.send(message).await?;

        tracing::info!(recipient = %request.recipient, "メール送信完了");
        Ok(())
    }

    async fn select_templates(
        &self,
        text_override: Option<&str>,
        html_override: Option<&str>,
    ) -> Result<(Template, Option<Template>), DispatchError> {
        if let Some(text) = text_override.filter(|s| !s.is_empty()) {
            let html = html_override
                .filter(|s| !s.is_empty())
                .map(|html| Template::literal(RESET_EMAIL_HTML, html));
            return Ok((Template::literal(RESET_EMAIL_TEXT, text), html));
        }

        let text = self
            .templates
            .get_template(RESET_EMAIL_TEXT)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(RESET_EMAIL_TEXT.to_string()))?;
        let html = self.templates.get_template(RESET_EMAIL_HTML).await?;

        Ok((text, html))
    }
}
