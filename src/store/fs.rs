use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{RemoteObject, RemoteStore};
use crate::error::{Error, Result};
use crate::gallery::temp_name;

/// 以本地目录模拟的对象存储，每个容器对应根目录下的一个子目录
///
/// 对象 ID 的格式为 `容器/名称`。
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &str) -> Result<PathBuf> {
        let (container, name) =
            id.split_once('/').ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self.container_path(container)?.join(checked_name(name)?))
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_name(container)?))
    }
}

fn checked_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::InvalidInput(format!("非法的对象名: {name}")));
    }
    Ok(name)
}

#[async_trait]
impl RemoteStore for FsStore {
    async fn list(&self, container: &str) -> Result<Vec<RemoteObject>> {
        let dir = self.container_path(container)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut objects = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // 以 . 开头的是写入中的临时文件
            if name.starts_with('.') {
                continue;
            }
            objects.push(RemoteObject::new(format!("{container}/{name}"), name));
        }
        objects.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        match fs::read(self.object_path(id)?).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, container: &str, name: &str, data: &[u8]) -> Result<()> {
        let dir = self.container_path(container)?;
        let name = checked_name(name)?;
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(temp_name(name));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, dir.join(name)).await?;
        Ok(())
    }
}
