/// アクセスキー種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKeyType {
    /// 通常のAPIキー
    Api,
    /// 管理者用マスターキー
    Master,
}

/// 呼び出し元のコンテキスト
///
/// リクエストごとに生成し、特権チェックが必要な操作へ明示的に渡す
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub access_key_type: Option<AccessKeyType>,
}

impl CallerContext {
    pub fn new(access_key_type: Option<AccessKeyType>) -> Self {
        Self { access_key_type }
    }

    pub fn is_master(&self) -> bool {
        self.access_key_type == Some(AccessKeyType::Master)
    }
}
