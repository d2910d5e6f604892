#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use facesync::config::ConfDir;
use facesync::extractor::{ExtractError, FeatureExtractor};
use facesync::store::{RemoteObject, RemoteStore};
use facesync::{Error, FaceDB, FaceDBBuilder, Result};
use tempfile::TempDir;

/// 把图片内容当作逗号分隔的浮点数解析的提取器
///
/// 特殊内容：`noface` 表示没有人脸，`broken` 表示模型出错，`down` 表示服务不可用。
#[derive(Default)]
pub struct MockExtractor {
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureExtractor for MockExtractor {
    fn model(&self) -> &str {
        "Mock"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn extract(&self, image: &[u8]) -> std::result::Result<Vec<f32>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // 让并发的同步有机会交错执行
        tokio::time::sleep(Duration::from_millis(5)).await;
        let text = std::str::from_utf8(image).map_err(|e| ExtractError::Model(e.to_string()))?;
        match text.trim() {
            "noface" => Err(ExtractError::NoFace),
            "broken" => Err(ExtractError::Model("broken image".to_string())),
            "down" => Err(ExtractError::Unavailable("connection refused".to_string())),
            text => text
                .split(',')
                .map(|s| s.trim().parse::<f32>().map_err(|e| ExtractError::Model(e.to_string())))
                .collect(),
        }
    }
}

/// 内存中的对象存储，对象 ID 为 `容器/名称`
#[derive(Default)]
pub struct MemoryStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    failing: AtomicBool,
    // 下载总是失败的对象名
    broken: Mutex<HashSet<String>>,
    upserts: AtomicUsize,
    upserts_failing: AtomicBool,
}

impl MemoryStore {
    pub fn put(&self, container: &str, name: &str, data: &[u8]) {
        self.containers
            .lock()
            .unwrap()
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), data.to_vec());
    }

    pub fn delete(&self, container: &str, name: &str) {
        if let Some(objects) = self.containers.lock().unwrap().get_mut(container) {
            objects.remove(name);
        }
    }

    pub fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.containers.lock().unwrap().get(container)?.get(name).cloned()
    }

    /// 该对象能被列出，但下载总是失败
    pub fn break_object(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// 只让写入失败，列出和下载照常
    pub fn set_upserts_failing(&self, failing: bool) {
        self.upserts_failing.store(failing, Ordering::SeqCst);
    }

    /// 之后的所有调用都返回远程不可用
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::RemoteUnavailable("network is unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, container: &str) -> Result<Vec<RemoteObject>> {
        self.check()?;
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(container)
            .map(|objects| {
                objects.keys().map(|name| RemoteObject::new(format!("{container}/{name}"), name)).collect()
            })
            .unwrap_or_default())
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        self.check()?;
        let (container, name) = id.split_once('/').ok_or_else(|| Error::NotFound(id.to_string()))?;
        if self.broken.lock().unwrap().contains(name) {
            return Err(Error::RemoteUnavailable(format!("403 Forbidden: {id}")));
        }
        self.get(container, name).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn upsert(&self, container: &str, name: &str, data: &[u8]) -> Result<()> {
        self.check()?;
        if self.upserts_failing.load(Ordering::SeqCst) {
            return Err(Error::RemoteUnavailable("503 Service Unavailable".to_string()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.put(container, name, data);
        Ok(())
    }
}

pub struct Fixture {
    pub conf_dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub extractor: Arc<MockExtractor>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            conf_dir: TempDir::new().unwrap(),
            store: Arc::new(MemoryStore::default()),
            extractor: Arc::new(MockExtractor::default()),
        }
    }

    pub fn conf_dir(&self) -> ConfDir {
        ConfDir::from_str(self.conf_dir.path().to_str().unwrap()).unwrap()
    }

    pub fn add_image(&self, name: &str, data: &str) {
        self.store.put("images", name, data.as_bytes());
    }

    pub fn builder(&self) -> FaceDBBuilder {
        self.builder_in(self.conf_dir())
    }

    /// 在另一个数据目录上打开同一个远程图库，模拟重新部署
    pub fn builder_in(&self, conf_dir: ConfDir) -> FaceDBBuilder {
        FaceDBBuilder::new(conf_dir, self.store.clone(), self.extractor.clone())
            .images("images")
            .encodings("encodings", "encodings.bin")
            .threshold(0.4)
            .concurrency(4)
    }

    pub async fn open(&self) -> FaceDB {
        self.builder().open().await.unwrap()
    }
}
