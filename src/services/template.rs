use std::error::Error as _;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::models::{Account, AccountProfile};
use crate::services::email::DispatchError;

/// テキスト本文テンプレート名（必須）
pub const RESET_EMAIL_TEXT: &str = "reset_email_text";
/// HTML本文テンプレート名（任意）
pub const RESET_EMAIL_HTML: &str = "reset_email_html";

/// テンプレートに渡すパラメータ
///
/// テキスト・HTML の両テンプレートに同一の値を渡す
#[derive(Debug, Clone, Serialize)]
pub struct TemplateParams {
    pub appname: String,
    pub link: String,
    pub url_prefix: String,
    pub email: String,
    pub user_id: String,
    pub code: String,
    pub user: Account,
    pub user_record: AccountProfile,
}

/// レンダリング可能なテンプレート
#[derive(Debug, Clone)]
pub enum Template {
    /// ファイル（またはダウンロードURL）から読み込んだテンプレート
    FileBacked { name: String, body: Arc<str> },
    /// 呼び出し側が指定した文字列テンプレート（テスト送信用）
    Literal { name: String, body: String },
}

impl Template {
    pub fn literal(name: &str, body: &str) -> Self {
        Self::Literal {
            name: name.to_string(),
            body: body.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::FileBacked { name, .. } | Self::Literal { name, .. } => name,
        }
    }

    fn body(&self) -> &str {
        match self {
            Self::FileBacked { body, .. } => body.as_ref(),
            Self::Literal { body, .. } => body.as_str(),
        }
    }

    /// パラメータを埋め込んで本文を生成
    ///
    /// HTMLテンプレートのみ自動エスケープを有効にする
    pub fn render(&self, params: &TemplateParams) -> Result<String, DispatchError> {
        let context = tera::Context::from_serialize(params).map_err(|e| self.render_error(&e))?;
        let autoescape = self.name() == RESET_EMAIL_HTML;

        tera::Tera::one_off(self.body(), &context, autoescape).map_err(|e| self.render_error(&e))
    }

    fn render_error(&self, error: &tera::Error) -> DispatchError {
        // tera のエラーは原因が source に積まれるため連結する
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        DispatchError::Render {
            name: self.name().to_string(),
            message,
        }
    }
}

/// テンプレート定義
#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub name: &'static str,
    pub file_name: &'static str,
    /// 設定されている場合はファイルの代わりにこのURLから取得
    pub download_url: Option<String>,
    pub required: bool,
}

struct TemplateEntry {
    spec: TemplateSpec,
    body: OnceCell<Arc<str>>,
}

struct ProviderInner {
    template_dir: PathBuf,
    entries: Vec<TemplateEntry>,
    http_client: reqwest::Client,
}

/// テンプレートプロバイダー
///
/// 本文は初回取得時に読み込み、以降はキャッシュを返す。
/// 読み込み失敗はキャッシュしない（次回アクセス時に再試行）。
#[derive(Clone)]
pub struct TemplateProvider {
    inner: Arc<ProviderInner>,
}

impl TemplateProvider {
    /// 新しい TemplateProvider を作成
    pub fn new(template_dir: impl Into<PathBuf>, specs: Vec<TemplateSpec>) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| TemplateEntry {
                spec,
                body: OnceCell::new(),
            })
            .collect();

        Self {
            inner: Arc::new(ProviderInner {
                template_dir: template_dir.into(),
                entries,
                http_client: reqwest::Client::new(),
            }),
        }
    }

    /// リセットメール用テンプレートを登録したプロバイダーを作成
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.template_dir,
            vec![
                TemplateSpec {
                    name: RESET_EMAIL_TEXT,
                    file_name: "forgot_password_email.txt",
                    download_url: config.email_text_url.clone(),
                    required: true,
                },
                TemplateSpec {
                    name: RESET_EMAIL_HTML,
                    file_name: "forgot_password_email.html",
                    download_url: config.email_html_url.clone(),
                    required: false,
                },
            ],
        )
    }

    /// テンプレートを取得
    ///
    /// # Returns
    /// 任意テンプレートが存在しない・取得できない場合は `None`
    pub async fn get_template(&self, name: &str) -> Result<Option<Template>, DispatchError> {
        let entry = self
            .inner
            .entries
            .iter()
            .find(|entry| entry.spec.name == name)
            .ok_or_else(|| DispatchError::TemplateNotFound(name.to_string()))?;

        match entry.body.get_or_try_init(|| self.load(&entry.spec)).await {
            Ok(body) => Ok(Some(Template::FileBacked {
                name: name.to_string(),
                body: body.clone(),
            })),
            Err(e) if !entry.spec.required => {
                tracing::warn!(template = %name, error = %e, "任意テンプレートを利用できないためスキップ");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn load(&self, spec: &TemplateSpec) -> Result<Arc<str>, DispatchError> {
        let body = match &spec.download_url {
            Some(url) => self.download(spec.name, url).await?,
            None => self.read_file(spec).await?,
        };

        tracing::debug!(template = %spec.name, "テンプレート読み込み完了");
        Ok(Arc::from(body))
    }

    async fn read_file(&self, spec: &TemplateSpec) -> Result<String, DispatchError> {
        let path = self.inner.template_dir.join(spec.file_name);

        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DispatchError::TemplateNotFound(spec.name.to_string()))
            }
            Err(e) => Err(DispatchError::TemplateIo {
                name: spec.name.to_string(),
                source: e,
            }),
        }
    }

    async fn download(&self, name: &str, url: &str) -> Result<String, DispatchError> {
        let fetch_error = |message: String| DispatchError::TemplateFetch {
            name: name.to_string(),
            message,
        };

        let response = self
            .inner
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(template = %name, status = %status, "テンプレートのダウンロード失敗");
            return Err(fetch_error(format!("server returned status {}", status)));
        }

        response.text().await.map_err(|e| fetch_error(e.to_string()))
    }
}
