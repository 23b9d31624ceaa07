use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::models::ResetToken;

type HmacSha256 = Hmac<Sha256>;

/// リセットコード発行サービス
///
/// コードは `HMAC-SHA256(secret, account_id || 0x00 || expires_at)` を
/// Base64 URL-safe（パディングなし）でエンコードしたもの。
/// サーバー側に状態を持たず、検証側は同じ入力から再計算して照合する。
///
/// # Security
/// - シークレットはログに出力しない
/// - コードの使い回し防止（一回限りの使用）はこのサービスでは扱わない
#[derive(Clone)]
pub struct ResetTokenIssuer {
    mac: HmacSha256,
}

impl ResetTokenIssuer {
    /// 新しい ResetTokenIssuer を作成
    pub fn new(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            tracing::error!("リセットコード用シークレットが空");
            return Err(AppError::Internal(anyhow::anyhow!(
                "reset code secret must not be empty"
            )));
        }

        let mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "HMACキーの初期化エラー");
            AppError::Internal(anyhow::anyhow!("invalid reset code secret"))
        })?;

        Ok(Self { mac })
    }

    /// 現在時刻を基準にリセットコードを発行
    pub fn issue(&self, account_id: &str, lifetime_secs: i64) -> Result<ResetToken, AppError> {
        self.issue_at(account_id, lifetime_secs, OffsetDateTime::now_utc())
    }

    /// 指定時刻を基準にリセットコードを発行
    ///
    /// `expires_at` = 秒単位に丸めた `now` + `lifetime_secs`
    pub fn issue_at(
        &self,
        account_id: &str,
        lifetime_secs: i64,
        now: OffsetDateTime,
    ) -> Result<ResetToken, AppError> {
        if lifetime_secs <= 0 {
            return Err(AppError::InvalidArgument(
                "reset code lifetime must be a positive integer".to_string(),
            ));
        }

        let expires_at = round_to_seconds(now)
            .checked_add(lifetime_secs)
            .ok_or_else(|| {
                AppError::InvalidArgument("reset code lifetime is too large".to_string())
            })?;

        let tag = self.keyed(account_id, expires_at).finalize().into_bytes();

        Ok(ResetToken {
            account_id: account_id.to_string(),
            expires_at,
            code: URL_SAFE_NO_PAD.encode(tag),
        })
    }

    /// リセットコードを検証
    ///
    /// 期限切れ、改ざん、デコード不能のいずれも false
    pub fn verify(&self, account_id: &str, expires_at: i64, code: &str, now: OffsetDateTime) -> bool {
        if now.unix_timestamp() > expires_at {
            return false;
        }

        let Ok(tag) = URL_SAFE_NO_PAD.decode(code) else {
            return false;
        };

        // 定数時間比較
        self.keyed(account_id, expires_at)
            .verify_slice(&tag)
            .is_ok()
    }

    fn keyed(&self, account_id: &str, expires_at: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(account_id.as_bytes());
        mac.update(&[0]);
        mac.update(&expires_at.to_be_bytes());
        mac
    }
}

/// UNIX秒に四捨五入
fn round_to_seconds(now: OffsetDateTime) -> i64 {
    let secs = now.unix_timestamp();
    if now.nanosecond() >= 500_000_000 {
        secs + 1
    } else {
        secs
    }
}
