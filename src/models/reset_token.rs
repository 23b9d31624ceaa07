/// 発行済みリセットコード
///
/// DBには保存しない。検証側は `account_id` と `expires_at` から再計算して照合する
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    pub account_id: String,
    /// 有効期限（UNIX秒）
    pub expires_at: i64,
    pub code: String,
}

impl ResetToken {
    /// リセットリンクを構築
    ///
    /// `url_prefix` の末尾スラッシュは呼び出し側で除去済みであること
    pub fn link(&self, url_prefix: &str) -> String {
        format!(
            "{}/reset-password?code={}&user_id={}&expire_at={}",
            url_prefix, self.code, self.account_id, self.expires_at
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_format() {
        let token = ResetToken {
            account_id: "user-1".to_string(),
            expires_at: 1_700_000_000,
            code: "abc".to_string(),
        };
        assert_eq!(
            token.link("https://x"),
            "https://x/reset-password?code=abc&user_id=user-1&expire_at=1700000000"
        );
    }
}
