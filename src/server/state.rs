use std::sync::Arc;

use crate::FaceDB;

/// 应用状态
pub struct AppState {
    /// 人脸图库
    pub db: FaceDB,
    /// 鉴权 token，用于保护手动同步接口
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: FaceDB, token: String) -> Arc<Self> {
        Arc::new(AppState { db, token })
    }
}
