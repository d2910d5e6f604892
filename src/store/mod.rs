mod drive;
mod fs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::drive::DriveStore;
pub use self::fs::FsStore;
use crate::error::Result;

/// 远程容器中的一个对象
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObject {
    /// 远程对象 ID，只在所属的存储中有意义
    pub id: String,
    /// 对象名，在容器内唯一
    pub name: String,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// 远程对象存储
///
/// 所有操作都是网络调用，出错时原样返回，重试策略由调用方决定。
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// 列出容器中的所有对象，按名称排序
    async fn list(&self, container: &str) -> Result<Vec<RemoteObject>>;

    /// 读取对象内容，不存在时返回 [`Error::NotFound`](crate::Error::NotFound)
    async fn fetch(&self, id: &str) -> Result<Vec<u8>>;

    /// 按名称创建或覆盖对象
    async fn upsert(&self, container: &str, name: &str, data: &[u8]) -> Result<()>;

    /// 按名称读取对象，不存在时返回 `None`
    async fn fetch_by_name(&self, container: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.list(container).await?;
        match objects.into_iter().find(|o| o.name == name) {
            Some(object) => Ok(Some(self.fetch(&object.id).await?)),
            None => Ok(None),
        }
    }
}
