/// 送信用メール（送信ごとに生成、保存しない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    /// HTMLテンプレートが無い場合は None（テキストのみで送信）
    pub html_body: Option<String>,
    pub reply_to: Option<String>,
}
