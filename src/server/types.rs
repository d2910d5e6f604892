use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::matcher::MatchResult;
use crate::sync::SyncReport;

/// 匹配请求参数
#[derive(TryFromMultipart)]
pub struct MatchRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

/// 匹配表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct MatchForm {
    /// 上传的人脸图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 匹配响应
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchResponse {
    /// 是否匹配成功
    #[serde(rename = "match")]
    pub is_match: bool,
    /// 匹配到的图库图片名
    pub matched_with: Option<String>,
    /// 与最接近的图库图片的距离，图库为空时不返回
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// 远程存储不可用，结果基于上一次同步的缓存
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl From<MatchResult> for MatchResponse {
    fn from(r: MatchResult) -> Self {
        Self { is_match: r.is_match, matched_with: r.matched_with, distance: r.distance, degraded: r.degraded }
    }
}

/// 同步响应
#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateResponse {
    /// 新增的图片数量
    pub new: usize,
    /// 提取失败的图片数量
    pub failed: usize,
    /// 移除的图片数量
    pub removed: usize,
    /// 推迟处理的图片数量
    pub deferred: usize,
}

impl From<SyncReport> for UpdateResponse {
    fn from(r: SyncReport) -> Self {
        Self { new: r.new, failed: r.failed, removed: r.removed, deferred: r.deferred }
    }
}

/// 图库状态
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// 缓存中的特征数量
    pub encodings: usize,
    /// 其中提取成功、可参与匹配的数量
    pub usable: usize,
    /// 是否有尚未保存到远程的修改
    pub dirty: bool,
}

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
