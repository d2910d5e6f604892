use std::sync::Arc;

use log::info;
use regex::Regex;

use crate::cache::{CacheLocation, EncodingCache};
use crate::config::ConfDir;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::extractor::{FeatureExtractor, ModelProfile};
use crate::gallery::LocalGallery;
use crate::matcher::{MatchResult, MatchSettings, Matcher};
use crate::store::RemoteStore;
use crate::sync::{SyncEngine, SyncReport, SyncSettings};

pub struct FaceDBBuilder {
    conf_dir: ConfDir,
    store: Arc<dyn RemoteStore>,
    extractor: Arc<dyn FeatureExtractor>,
    sync: SyncSettings,
    encodings_container: String,
    encodings_name: String,
    metric: DistanceMetric,
    threshold: Option<f32>,
    sync_before_match: bool,
}

impl FaceDBBuilder {
    pub fn new(conf_dir: ConfDir, store: Arc<dyn RemoteStore>, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            conf_dir,
            store,
            extractor,
            sync: SyncSettings::new("images"),
            encodings_container: "encodings".to_string(),
            encodings_name: "encodings.bin".to_string(),
            metric: DistanceMetric::Cosine,
            threshold: None,
            sync_before_match: true,
        }
    }

    /// 图库图片所在的远程容器
    pub fn images(mut self, container: impl Into<String>) -> Self {
        self.sync.images_container = container.into();
        self
    }

    /// 特征缓存所在的远程容器及文件名
    pub fn encodings(mut self, container: impl Into<String>, name: impl Into<String>) -> Self {
        self.encodings_container = container.into();
        self.encodings_name = name.into();
        self
    }

    pub fn suffix(mut self, suffix: Regex) -> Self {
        self.sync.suffix = Some(suffix);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.sync.concurrency = concurrency;
        self
    }

    pub fn prune(mut self, prune: bool) -> Self {
        self.sync.prune = prune;
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn sync_before_match(mut self, sync_before_match: bool) -> Self {
        self.sync_before_match = sync_before_match;
        self
    }

    /// 创建各组件并加载特征缓存
    pub async fn open(self) -> Result<FaceDB> {
        let model = self.extractor.model().to_string();
        let threshold = match self.threshold {
            Some(threshold) => threshold,
            None => ModelProfile::find(&model)
                .map(|p| p.threshold(self.metric))
                .ok_or_else(|| Error::InvalidInput(format!("模型 {model} 没有默认阈值，请指定阈值")))?,
        };
        info!("模型 {model}，距离 {}，阈值 {threshold}", self.metric.name());

        let location = CacheLocation {
            local_path: self.conf_dir.encodings(),
            container: self.encodings_container,
            name: self.encodings_name,
        };
        let cache = Arc::new(EncodingCache::new(
            location,
            self.store.clone(),
            model,
            self.extractor.dimension(),
        ));
        cache.load().await?;

        let engine = Arc::new(SyncEngine::new(
            self.store,
            LocalGallery::new(self.conf_dir.gallery()),
            cache.clone(),
            self.extractor.clone(),
            self.sync,
        ));
        let settings =
            MatchSettings { metric: self.metric, threshold, sync_before_match: self.sync_before_match };
        let matcher = Matcher::new(engine.clone(), self.extractor, settings);

        Ok(FaceDB { cache, engine, matcher })
    }
}

/// 人脸图库：同步引擎、特征缓存与匹配器的组合
pub struct FaceDB {
    cache: Arc<EncodingCache>,
    engine: Arc<SyncEngine>,
    matcher: Matcher,
}

impl FaceDB {
    /// 与远程图库同步
    pub async fn sync(&self) -> Result<SyncReport> {
        self.engine.sync().await
    }

    /// 匹配一张图片，`probe_name` 仅用于日志和结果展示
    pub async fn match_probe(&self, probe: &[u8], probe_name: Option<&str>) -> Result<MatchResult> {
        self.matcher.match_probe(probe, probe_name).await
    }

    /// 清空本地图片和特征缓存
    pub async fn reset(&self) -> Result<()> {
        self.engine.reset().await
    }

    pub fn cache(&self) -> &Arc<EncodingCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn match_settings(&self) -> &MatchSettings {
        self.matcher.settings()
    }
}
