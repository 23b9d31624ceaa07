use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

use crate::config::Config;
use crate::models::{AccessKeyType, CallerContext};
use crate::state::AppState;

/// アクセスキーを受け取るヘッダー
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

/// ヘッダーのアクセスキーから CallerContext を構築
///
/// 不明なキー・キーなしは拒否せず `access_key_type = None` とする。
/// 権限チェックは各操作側で行う。
impl FromRequestParts<AppState> for CallerContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let access_key_type = parts
            .headers
            .get(ACCESS_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|key| resolve_access_key(&state.config, key));

        Ok(CallerContext::new(access_key_type))
    }
}

fn resolve_access_key(config: &Config, key: &str) -> Option<AccessKeyType> {
    if key.is_empty() {
        return None;
    }
    if key_matches(config.master_key.expose_secret(), key) {
        return Some(AccessKeyType::Master);
    }
    match &config.api_key {
        Some(api_key) if key_matches(api_key.expose_secret(), key) => Some(AccessKeyType::Api),
        _ => None,
    }
}

/// 定数時間でのキー比較
///
/// 長さの異なるキーも同じ長さのダイジェストに揃えてから `verify_slice` で比較する
fn key_matches(expected: &str, candidate: &str) -> bool {
    let Ok(mut expected_mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    let Ok(mut candidate_mac) = Hmac::<Sha256>::new_from_slice(candidate.as_bytes()) else {
        return false;
    };
    expected_mac.update(ACCESS_KEY_HEADER.as_bytes());
    candidate_mac.update(ACCESS_KEY_HEADER.as_bytes());

    let tag = expected_mac.finalize().into_bytes();
    candidate_mac.verify_slice(&tag).is_ok()
}
