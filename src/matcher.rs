use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::distance::{self, DistanceMetric};
use crate::error::{Error, Result};
use crate::extractor::{ExtractError, FeatureExtractor};
use crate::metrics;
use crate::sync::SyncEngine;

/// 匹配参数
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub metric: DistanceMetric,
    /// 距离严格小于该值时视为同一个人
    pub threshold: f32,
    /// 匹配前是否先与远程同步
    pub sync_before_match: bool,
}

/// 一次匹配的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// 上传图片的文件名
    pub probe: Option<String>,
    /// 匹配到的图库图片，没有距离小于阈值的图片时为 `None`
    pub matched_with: Option<String>,
    /// 最近距离，未命中时同样返回，图库为空时为 `None`
    pub distance: Option<f32>,
    #[serde(rename = "match")]
    pub is_match: bool,
    /// 同步失败，结果基于上一次可用的缓存
    pub degraded: bool,
}

/// 在特征缓存中查找与上传图片最接近的人脸
pub struct Matcher {
    engine: Arc<SyncEngine>,
    extractor: Arc<dyn FeatureExtractor>,
    settings: MatchSettings,
}

impl Matcher {
    pub fn new(engine: Arc<SyncEngine>, extractor: Arc<dyn FeatureExtractor>, settings: MatchSettings) -> Self {
        Self { engine, extractor, settings }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub async fn match_probe(&self, probe: &[u8], probe_name: Option<&str>) -> Result<MatchResult> {
        let start = Instant::now();
        let result = self.match_probe_inner(probe, probe_name).await;
        let outcome = match &result {
            Ok(r) if r.is_match => "match",
            Ok(_) => "no_match",
            Err(Error::NoFaceDetected) => "no_face",
            Err(_) => "error",
        };
        metrics::inc_match(outcome, start.elapsed().as_secs_f32());
        result
    }

    async fn match_probe_inner(&self, probe: &[u8], probe_name: Option<&str>) -> Result<MatchResult> {
        if probe.is_empty() {
            return Err(Error::InvalidInput("上传的图片为空".to_string()));
        }

        let mut degraded = false;
        if self.settings.sync_before_match {
            if let Err(e) = self.engine.sync().await {
                warn!("同步失败，使用已有的特征缓存进行匹配: {e}");
                degraded = true;
            }
        }

        let vector = self.extractor.extract(probe).await.map_err(|e| match e {
            ExtractError::NoFace => Error::NoFaceDetected,
            ExtractError::Model(e) => Error::InvalidInput(format!("无法处理上传的图片: {e}")),
            ExtractError::Unavailable(e) => Error::RemoteUnavailable(e),
        })?;

        let snapshot = self.engine.cache().snapshot();
        let metric = self.settings.metric;
        let nearest = spawn_blocking(move || {
            let candidates: Vec<(&str, &[f32])> = snapshot
                .iter()
                .filter(|(_, e)| e.is_success())
                .map(|(id, e)| (id.as_str(), e.vector.as_slice()))
                .collect();
            distance::nearest(metric, &vector, candidates).map(|(id, d)| (id.to_string(), d))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let result = match nearest {
            Some((id, distance)) => {
                metrics::observe_match_distance(metric.name(), distance);
                let is_match = distance < self.settings.threshold;
                if !is_match {
                    debug!("最近的是 {id}，距离 {distance} 未达到阈值 {}", self.settings.threshold);
                }
                MatchResult {
                    probe: probe_name.map(str::to_string),
                    matched_with: is_match.then_some(id),
                    distance: Some(distance),
                    is_match,
                    degraded,
                }
            }
            None => {
                debug!("图库中没有可用的特征");
                MatchResult {
                    probe: probe_name.map(str::to_string),
                    matched_with: None,
                    distance: None,
                    is_match: false,
                    degraded,
                }
            }
        };

        info!(
            "匹配 {}: {:?} 距离 {:?} ({})",
            probe_name.unwrap_or("<upload>"),
            result.matched_with,
            result.distance,
            if result.is_match { "命中" } else { "未命中" }
        );
        Ok(result)
    }
}
