use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use axum_typed_multipart::{TypedMultipart, TypedMultipartError};
use log::info;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::Error;

/// 上传一张图片，与图库中的人脸进行匹配
#[utoipa::path(
    post,
    path = "/match",
    request_body(content = MatchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = MatchResponse),
        (status = 400, body = ErrorResponse),
        (status = 422, description = "图片中没有检测到人脸", body = ErrorResponse),
        (status = 503, description = "特征提取服务不可用", body = ErrorResponse),
    )
)]
pub async fn match_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<TypedMultipart<MatchRequest>, TypedMultipartError>,
) -> Result<Json<MatchResponse>> {
    let data = data.map_err(|e| Error::InvalidInput(format!("缺少上传文件: {e}")))?;
    let file_name = data.file.metadata.file_name.as_deref();
    info!("正在匹配上传图片 {}", file_name.unwrap_or("<upload>"));

    let result = state.db.match_probe(&data.file.contents, file_name).await?;
    Ok(Json(result.into()))
}

/// 手动触发一次同步
#[utoipa::path(
    get,
    path = "/update",
    responses(
        (status = 200, body = UpdateResponse),
        (status = 401, body = ErrorResponse),
        (status = 503, body = ErrorResponse),
    )
)]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    auth: std::result::Result<AuthBearer, (StatusCode, &'static str)>,
) -> Result<Json<UpdateResponse>> {
    match auth {
        // blake3::Hash 的比较是常数时间的
        Ok(AuthBearer(token)) if blake3::hash(token.as_bytes()) == blake3::hash(state.token.as_bytes()) => {}
        _ => return Err(AppError::Unauthorized),
    }
    info!("收到手动同步请求");
    let report = state.db.sync().await?;
    Ok(Json(report.into()))
}

/// 获取图库状态
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>> {
    let cache = state.db.cache();
    let snapshot = cache.snapshot();
    Ok(Json(StatusResponse {
        encodings: snapshot.len(),
        usable: snapshot.values().filter(|e| e.is_success()).count(),
        dirty: cache.is_dirty(),
    }))
}
