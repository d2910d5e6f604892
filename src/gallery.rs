use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// 远程图片在本地的镜像目录
///
/// 仅作为字节缓存使用，内容随时可以从远程容器重建。
#[derive(Debug, Clone)]
pub struct LocalGallery {
    dir: PathBuf,
}

impl LocalGallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 列出本地已有的图片名，目录不存在时返回空集合
    pub fn list_local_names(&self) -> Result<HashSet<String>> {
        if !self.dir.exists() {
            return Ok(HashSet::new());
        }
        let mut names = HashSet::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.starts_with('.') {
                names.insert(name.into_owned());
            }
        }
        Ok(names)
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.dir.join(name).is_file()
    }

    /// 写入图片，先写临时文件再重命名，避免留下写了一半的文件
    pub async fn write_local(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(temp_name(name));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn read_local(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(name)?).await?)
    }

    pub async fn remove_local(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)?).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// 清空整个镜像目录
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_name(name) {
            return Err(Error::InvalidInput(format!("非法的图片名: {name}")));
        }
        Ok(self.dir.join(name))
    }
}

/// 写入 `name` 时使用的临时文件名
///
/// 长度固定，不会因为原文件名接近文件系统上限而写入失败；以 `.` 开头，列出时会被忽略。
pub(crate) fn temp_name(name: &str) -> String {
    format!(".{}.tmp", &blake3::hash(name.as_bytes()).to_hex()[..16])
}

/// 图片名会直接作为本地文件名使用，不能包含路径分隔符或以 `.` 开头
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}
