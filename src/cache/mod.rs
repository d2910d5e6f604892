pub mod blob;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::RemoteStore;

/// 特征提取结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionStatus {
    Success,
    /// 没有检测到人脸
    NoFace,
    /// 其它原因导致的失败
    Failed,
}

/// 一张图片的特征向量
///
/// 只有 `Success` 状态的向量才会参与匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub status: ExtractionStatus,
    pub vector: Vec<f32>,
}

impl Encoding {
    pub fn success(vector: Vec<f32>) -> Self {
        Self { status: ExtractionStatus::Success, vector }
    }

    pub fn no_face() -> Self {
        Self { status: ExtractionStatus::NoFace, vector: vec![] }
    }

    pub fn failed() -> Self {
        Self { status: ExtractionStatus::Failed, vector: vec![] }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }
}

/// 图片名 => 特征，使用有序映射以保证遍历顺序稳定
pub type Encodings = BTreeMap<String, Encoding>;

/// 缓存的存放位置
#[derive(Debug, Clone)]
pub struct CacheLocation {
    /// 本地副本路径
    pub local_path: PathBuf,
    /// 远程容器
    pub container: String,
    /// 远程对象名
    pub name: String,
}

/// 持久化的特征缓存
///
/// 读者通过 [`snapshot`](Self::snapshot) 获取某一时刻的只读快照，不会被写入阻塞；
/// 合并与保存由内部的写锁串行化。
pub struct EncodingCache {
    location: CacheLocation,
    store: Arc<dyn RemoteStore>,
    model: String,
    dimension: usize,
    entries: RwLock<Arc<Encodings>>,
    writer: Mutex<()>,
    // 每次修改内存数据时递增
    generation: AtomicU64,
    // 最近一次成功保存时的 generation
    persisted: AtomicU64,
    // 加载时远程不可达且没有本地副本，远程恢复后需要重新加载
    load_pending: AtomicBool,
}

enum RemoteBlob {
    Found(Encodings, Vec<u8>),
    Missing,
    Unreachable,
}

impl EncodingCache {
    pub fn new(
        location: CacheLocation,
        store: Arc<dyn RemoteStore>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            location,
            store,
            model: model.into(),
            dimension,
            entries: RwLock::new(Arc::new(Encodings::new())),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            load_pending: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 加载持久化的缓存并替换内存中的数据
    ///
    /// 依次尝试本地副本和远程容器，都不存在时得到空缓存。
    /// 损坏的数据或模型不一致的数据会被丢弃，之后由同步流程重建。
    pub async fn load(&self) -> Result<Arc<Encodings>> {
        let _guard = self.writer.lock().await;

        let mut pending = false;
        let entries = match self.read_local().await {
            Some(entries) => entries,
            None => match self.read_remote().await {
                RemoteBlob::Found(entries, data) => {
                    // 远程数据可用时顺便刷新本地副本
                    if let Err(e) = self.write_local(&data).await {
                        warn!("写入本地特征缓存失败: {e}");
                    }
                    entries
                }
                RemoteBlob::Missing => Encodings::new(),
                RemoteBlob::Unreachable => {
                    pending = true;
                    Encodings::new()
                }
            },
        };
        self.load_pending.store(pending, Ordering::SeqCst);
        info!("已加载 {} 条特征", entries.len());

        let entries = Arc::new(entries);
        *self.entries.write().expect("failed to acquire rw lock") = entries.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.persisted.store(generation, Ordering::SeqCst);
        Ok(entries)
    }

    async fn read_local(&self) -> Option<Encodings> {
        let path = &self.location.local_path;
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("读取本地特征缓存 {} 失败: {e}", path.display());
                }
                return None;
            }
        };
        match self.decode(&data) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("本地特征缓存不可用，将尝试远程副本: {e}");
                None
            }
        }
    }

    async fn read_remote(&self) -> RemoteBlob {
        let result = self.store.fetch_by_name(&self.location.container, &self.location.name).await;
        match result {
            Ok(Some(data)) => match self.decode(&data) {
                Ok(entries) => RemoteBlob::Found(entries, data),
                Err(e) => {
                    warn!("远程特征缓存不可用，将从头重建: {e}");
                    RemoteBlob::Missing
                }
            },
            Ok(None) => {
                debug!("远程容器中没有特征缓存");
                RemoteBlob::Missing
            }
            Err(e) => {
                warn!("无法获取远程特征缓存，将在远程恢复后重新加载: {e}");
                RemoteBlob::Unreachable
            }
        }
    }

    /// 上次加载时远程不可达，则重新加载一次
    ///
    /// 只在尚未合并任何新数据时才会替换内存数据。
    pub async fn reload_if_pending(&self) -> Result<()> {
        if !self.load_pending.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.generation.load(Ordering::SeqCst) != self.persisted.load(Ordering::SeqCst) {
            self.load_pending.store(false, Ordering::SeqCst);
            return Ok(());
        }
        info!("远程已恢复，重新加载特征缓存");
        self.load().await?;
        if self.is_load_pending() {
            return Err(Error::RemoteUnavailable("无法获取远程特征缓存".to_string()));
        }
        Ok(())
    }

    /// 是否在等待远程恢复后重新加载
    pub fn is_load_pending(&self) -> bool {
        self.load_pending.load(Ordering::SeqCst)
    }

    fn decode(&self, data: &[u8]) -> Result<Encodings> {
        let blob = blob::decode(data)?;
        if !blob.model.eq_ignore_ascii_case(&self.model) || blob.dimension != self.dimension {
            return Err(Error::CacheCorrupt(format!(
                "模型不一致: {}({}) != {}({})",
                blob.model, blob.dimension, self.model, self.dimension
            )));
        }
        Ok(blob.entries)
    }

    /// 返回当前数据的快照
    pub fn snapshot(&self) -> Arc<Encodings> {
        self.entries.read().expect("failed to acquire rw lock").clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().expect("failed to acquire rw lock").contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("failed to acquire rw lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 内存中的数据是否有尚未保存的修改
    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.persisted.load(Ordering::SeqCst)
    }

    /// 将 `updates` 合并进内存数据，同名条目整体覆盖，其它条目保持不变
    ///
    /// 维度不符的成功结果会被降级为失败。
    pub fn merge(&self, updates: Encodings) {
        if updates.is_empty() {
            return;
        }
        let mut guard = self.entries.write().expect("failed to acquire rw lock");
        let entries = Arc::make_mut(&mut *guard);
        for (id, mut encoding) in updates {
            if encoding.is_success() && encoding.vector.len() != self.dimension {
                warn!(
                    "{id} 的特征维度为 {}，期望 {}，标记为失败",
                    encoding.vector.len(),
                    self.dimension
                );
                encoding = Encoding::failed();
            }
            entries.insert(id, encoding);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// 从内存数据中删除指定条目，返回实际删除的数量
    pub fn remove(&self, ids: &[String]) -> usize {
        let mut guard = self.entries.write().expect("failed to acquire rw lock");
        if !ids.iter().any(|id| guard.contains_key(id)) {
            return 0;
        }
        let entries = Arc::make_mut(&mut *guard);
        let removed = ids.iter().filter(|id| entries.remove(*id).is_some()).count();
        self.generation.fetch_add(1, Ordering::SeqCst);
        removed
    }

    /// 序列化当前数据，原子地写入本地副本后上传到远程容器
    ///
    /// 失败时不会推进已保存的标记，下次同步会重试。
    pub async fn save(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.save_locked().await
    }

    async fn save_locked(&self) -> Result<()> {
        let (entries, generation) = {
            let guard = self.entries.read().expect("failed to acquire rw lock");
            (guard.clone(), self.generation.load(Ordering::SeqCst))
        };
        let data = blob::encode(&self.model, self.dimension, &entries)?;
        self.write_local(&data).await?;
        self.store.upsert(&self.location.container, &self.location.name, &data).await?;
        self.persisted.fetch_max(generation, Ordering::SeqCst);
        info!("特征缓存已保存，共 {} 条", entries.len());
        Ok(())
    }

    /// 合并 `updates`、删除 `removals` 后保存，整个过程作为一个临界区串行执行
    ///
    /// 返回实际删除的条目数量。
    pub async fn commit(&self, updates: Encodings, removals: &[String]) -> Result<usize> {
        let _guard = self.writer.lock().await;
        self.merge(updates);
        let removed = self.remove(removals);
        self.save_locked().await?;
        Ok(removed)
    }

    /// 清空所有条目并保存
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        *self.entries.write().expect("failed to acquire rw lock") = Arc::new(Encodings::new());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.load_pending.store(false, Ordering::SeqCst);
        self.save_locked().await
    }

    async fn write_local(&self, data: &[u8]) -> Result<()> {
        let path = &self.location.local_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}
