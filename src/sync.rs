use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{Encoding, EncodingCache, Encodings};
use crate::error::{Error, Result};
use crate::extractor::{ExtractError, FeatureExtractor};
use crate::gallery::{LocalGallery, is_valid_name};
use crate::metrics;
use crate::store::{RemoteObject, RemoteStore};

/// 一次同步的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// 新写入缓存的条目数量，包括提取失败的条目
    pub new: usize,
    /// 其中提取失败的数量
    pub failed: usize,
    /// 因远程图片被删除而移除的条目数量
    pub removed: usize,
    /// 提取服务不可用而推迟到下次处理的数量
    pub deferred: usize,
}

/// 同步参数
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// 图片所在的远程容器
    pub images_container: String,
    /// 只处理文件名匹配该正则的图片
    pub suffix: Option<Regex>,
    /// 同时下载、提取的图片数量
    pub concurrency: usize,
    /// 删除远程已不存在的图片
    pub prune: bool,
}

impl SyncSettings {
    pub fn new(images_container: impl Into<String>) -> Self {
        Self {
            images_container: images_container.into(),
            suffix: None,
            concurrency: num_cpus::get(),
            prune: false,
        }
    }

    fn accepts(&self, name: &str) -> bool {
        if !is_valid_name(name) {
            warn!("忽略非法的图片名: {name:?}");
            return false;
        }
        self.suffix.as_ref().is_none_or(|re| re.is_match(name))
    }
}

/// 远程列表中本地尚不存在的图片
pub fn new_items<'a>(listing: &'a [RemoteObject], local: &HashSet<String>) -> Vec<&'a RemoteObject> {
    listing.iter().filter(|o| !local.contains(&o.name)).collect()
}

enum Source {
    /// 需要下载
    Remote(RemoteObject),
    /// 本地已有但尚未提取，通常是上次同步中途被打断
    Local(RemoteObject),
}

enum Outcome {
    Encoded(String, Encoding),
    Skipped,
    Deferred,
}

/// 增量同步引擎，特征缓存唯一的写入者
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    gallery: LocalGallery,
    cache: Arc<EncodingCache>,
    extractor: Arc<dyn FeatureExtractor>,
    settings: SyncSettings,
    lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        gallery: LocalGallery,
        cache: Arc<EncodingCache>,
        extractor: Arc<dyn FeatureExtractor>,
        settings: SyncSettings,
    ) -> Self {
        Self { store, gallery, cache, extractor, settings, lock: Mutex::new(()) }
    }

    pub fn gallery(&self) -> &LocalGallery {
        &self.gallery
    }

    pub fn cache(&self) -> &Arc<EncodingCache> {
        &self.cache
    }

    /// 与远程容器同步，只下载并提取新增的图片
    ///
    /// 并发调用会被串行化，后一次调用能看到前一次的结果，因此不会重复处理同一张图片。
    pub async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.lock.lock().await;
        let start = Instant::now();
        let result = self.sync_locked().await;
        match &result {
            Ok(report) => {
                metrics::observe_sync_duration(start.elapsed().as_secs_f32());
                if report.new + report.removed + report.deferred > 0 {
                    info!(
                        "同步完成：新增 {}，失败 {}，移除 {}，推迟 {}，耗时 {:.2}s",
                        report.new,
                        report.failed,
                        report.removed,
                        report.deferred,
                        start.elapsed().as_secs_f32()
                    );
                } else {
                    debug!("同步完成，没有变化");
                }
            }
            Err(e) => {
                metrics::inc_sync_failure();
                warn!("同步失败: {e}");
            }
        }
        result
    }

    async fn sync_locked(&self) -> Result<SyncReport> {
        let listing = self.store.list(&self.settings.images_container).await?;
        let listing: Vec<_> = listing.into_iter().filter(|o| self.settings.accepts(&o.name)).collect();
        // 启动时远程不可达而没能加载的缓存，在远程恢复后补上
        self.cache.reload_if_pending().await?;
        let local = self.gallery.list_local_names()?;

        let downloads = new_items(&listing, &local);
        debug!("远程 {} 张，本地 {} 张，待下载 {} 张", listing.len(), local.len(), downloads.len());
        let mut sources: Vec<Source> = downloads.into_iter().cloned().map(Source::Remote).collect();
        sources.extend(
            listing
                .iter()
                .filter(|o| local.contains(&o.name) && !self.cache.contains(&o.name))
                .cloned()
                .map(Source::Local),
        );

        let outcomes: Vec<Outcome> = stream::iter(sources)
            .map(|source| self.process(source))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut report = SyncReport::default();
        let mut batch = Encodings::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Encoded(id, encoding) => {
                    metrics::inc_sync_image(encoding.status);
                    if !encoding.is_success() {
                        report.failed += 1;
                    }
                    batch.insert(id, encoding);
                }
                Outcome::Deferred => report.deferred += 1,
                Outcome::Skipped => {}
            }
        }
        report.new = batch.len();

        let stale = if self.settings.prune { self.prune_local(&listing).await? } else { vec![] };

        if !batch.is_empty() || !stale.is_empty() {
            report.removed = self.cache.commit(batch, &stale).await?;
        } else if self.cache.is_dirty() {
            info!("重试保存上次未能保存的特征缓存");
            self.cache.save().await?;
        }

        Ok(report)
    }

    /// 处理单张图片，下载或读取失败时推迟到下次同步，不影响同批次的其它图片
    async fn process(&self, source: Source) -> Outcome {
        let (object, data) = match source {
            Source::Remote(object) => {
                let data = match self.store.fetch(&object.id).await {
                    Ok(data) => data,
                    Err(Error::NotFound(_)) => {
                        warn!("{} 在列出后被删除，跳过", object.name);
                        return Outcome::Skipped;
                    }
                    Err(e) => {
                        warn!("下载 {} 失败，推迟到下次同步: {e}", object.name);
                        return Outcome::Deferred;
                    }
                };
                if let Err(e) = self.gallery.write_local(&object.name, &data).await {
                    warn!("写入 {} 失败，推迟到下次同步: {e}", object.name);
                    return Outcome::Deferred;
                }
                debug!("已下载 {}", object.name);
                // 本地镜像丢失但缓存仍在时，只恢复文件
                if self.cache.contains(&object.name) {
                    return Outcome::Skipped;
                }
                (object, data)
            }
            Source::Local(object) => match self.gallery.read_local(&object.name).await {
                Ok(data) => (object, data),
                Err(e) => {
                    warn!("读取本地 {} 失败，推迟到下次同步: {e}", object.name);
                    return Outcome::Deferred;
                }
            },
        };

        let encoding = match self.extractor.extract(&data).await {
            Ok(vector) => Encoding::success(vector),
            Err(ExtractError::NoFace) => {
                warn!("{} 中没有检测到人脸", object.name);
                Encoding::no_face()
            }
            Err(ExtractError::Model(e)) => {
                warn!("无法提取 {} 的特征: {e}", object.name);
                Encoding::failed()
            }
            Err(ExtractError::Unavailable(e)) => {
                warn!("提取服务不可用，{} 推迟到下次同步: {e}", object.name);
                return Outcome::Deferred;
            }
        };
        Outcome::Encoded(object.name, encoding)
    }

    /// 删除远程已不存在的本地图片，返回缓存中需要一并删除的条目
    async fn prune_local(&self, listing: &[RemoteObject]) -> Result<Vec<String>> {
        let remote: HashSet<&str> = listing.iter().map(|o| o.name.as_str()).collect();
        for name in self.gallery.list_local_names()? {
            if !remote.contains(name.as_str()) {
                debug!("删除本地图片 {name}");
                self.gallery.remove_local(&name).await?;
            }
        }
        Ok(self
            .cache
            .snapshot()
            .keys()
            .filter(|id| !remote.contains(id.as_str()))
            .cloned()
            .collect())
    }

    /// 清空本地镜像和特征缓存，下次同步会从头开始
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.gallery.clear().await?;
        self.cache.reset().await?;
        info!("已清空本地图片和特征缓存");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects(names: &[&str]) -> Vec<RemoteObject> {
        names.iter().map(|n| RemoteObject::new(format!("id-{n}"), *n)).collect()
    }

    #[test]
    fn test_new_items() {
        let listing = objects(&["alice.jpg", "bob.jpg", "carol.jpg"]);
        let local = HashSet::from(["bob.jpg".to_string(), "dave.jpg".to_string()]);
        let names: Vec<_> = new_items(&listing, &local).iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["alice.jpg", "carol.jpg"]);
    }

    #[test]
    fn test_new_items_all_local() {
        let listing = objects(&["alice.jpg"]);
        let local = HashSet::from(["alice.jpg".to_string()]);
        assert!(new_items(&listing, &local).is_empty());
        assert!(new_items(&[], &local).is_empty());
    }

    #[test]
    fn test_accepts_suffix() {
        let mut settings = SyncSettings::new("images");
        assert!(settings.accepts("notes.txt"));
        settings.suffix = Some(Regex::new(r"(?i)\.(jpg|png)$").unwrap());
        assert!(settings.accepts("alice.JPG"));
        assert!(!settings.accepts("notes.txt"));
        assert!(!settings.accepts("../alice.jpg"));
    }
}
