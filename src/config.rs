use secrecy::SecretBox;
use serde::Deserialize;

use crate::services::email::SmtpMode;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // SMTP設定（SMTP_HOST 未設定時はメール送信不可）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_mode: SmtpMode,
    #[serde(default)]
    pub smtp_login: Option<String>,
    pub smtp_password: Option<SecretBox<String>>,

    // パスワードリセット設定
    /// リセットリンクのURLプレフィックス
    pub reset_url_prefix: String,
    /// リセットコードの有効期間（秒）
    #[serde(default = "default_reset_url_lifetime")]
    pub reset_url_lifetime: i64,
    /// リセットコード署名用シークレット
    pub reset_code_secret: SecretBox<String>,
    /// ユーザー不在時に InvalidArgument を返すか
    #[serde(default)]
    pub secure_match: bool,

    // メール設定
    #[serde(default = "default_email_sender")]
    pub email_sender: String,
    #[serde(default = "default_email_subject")]
    pub email_subject: String,
    #[serde(default)]
    pub email_reply_to: Option<String>,
    #[serde(default = "default_app_name")]
    pub app_name: String,

    // テンプレート設定
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    #[serde(default)]
    pub email_text_url: Option<String>,
    #[serde(default)]
    pub email_html_url: Option<String>,

    /// 通常のAPIキー（任意）
    pub api_key: Option<SecretBox<String>>,
    /// テスト送信に必要なマスターキー
    pub master_key: SecretBox<String>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 25;
const DEFAULT_RESET_URL_LIFETIME: i64 = 43200;
const DEFAULT_EMAIL_SENDER: &str = "no-reply@example.com";
const DEFAULT_EMAIL_SUBJECT: &str = "Reset password instruction";
const DEFAULT_APP_NAME: &str = "My App";
const DEFAULT_TEMPLATE_DIR: &str = "templates";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_reset_url_lifetime() -> i64 {
    DEFAULT_RESET_URL_LIFETIME
}

fn default_email_sender() -> String {
    DEFAULT_EMAIL_SENDER.to_string()
}

fn default_email_subject() -> String {
    DEFAULT_EMAIL_SUBJECT.to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_template_dir() -> String {
    DEFAULT_TEMPLATE_DIR.to_string()
}

/// 設定値の検証エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("RESET_URL_LIFETIME must be a positive integer (got {0})")]
    InvalidLifetime(i64),

    #[error("RESET_URL_PREFIX must not be empty")]
    EmptyUrlPrefix,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 起動時に検出すべき設定不備をチェック
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset_url_lifetime <= 0 {
            return Err(ConfigError::InvalidLifetime(self.reset_url_lifetime));
        }
        if self.reset_url_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyUrlPrefix);
        }
        Ok(())
    }

    /// 末尾スラッシュを1つだけ除去したURLプレフィックス
    pub fn url_prefix(&self) -> &str {
        self.reset_url_prefix
            .strip_suffix('/')
            .unwrap_or(&self.reset_url_prefix)
    }
}

#[cfg(test)]
pub(crate) fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: Vec<(String, String)> = vec![
        ("DATABASE_URL".into(), "postgres://localhost/test".into()),
        ("RESET_URL_PREFIX".into(), "https://example.com/".into()),
        ("RESET_CODE_SECRET".into(), "test-secret".into()),
        ("MASTER_KEY".into(), "test-master-key".into()),
        ("APP_NAME".into(), "TestApp".into()),
    ];
    for (key, value) in overrides {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
    }
    envy::from_iter(vars).unwrap()
}
