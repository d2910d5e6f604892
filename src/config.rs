use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use regex::Regex;

use crate::cli::*;
use crate::distance::DistanceMetric;
use crate::extractor::{FeatureExtractor, ModelProfile, RemoteExtractor};
use crate::facedb::{FaceDB, FaceDBBuilder};
use crate::store::{DriveStore, FsStore, RemoteStore};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "facesync", "facesync").expect("failed to get project dir");
    ConfDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facesync", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 本地数据目录，存放图片镜像和特征缓存副本
    #[arg(short, long, env = "FACESYNC_CONF_DIR", default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 匹配服务
    Server(ServerCommand),
    /// 与远程图库同步一次
    Sync(SyncCommand),
    /// 在图库中匹配一张图片
    Match(MatchCommand),
    /// 清空本地图片和特征缓存
    Reset(ResetCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回本地图片镜像目录
    pub fn gallery(&self) -> PathBuf {
        self.path.join("gallery")
    }

    /// 返回特征缓存本地副本的路径
    pub fn encodings(&self) -> PathBuf {
        self.path.join("encodings.bin")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Google Drive，容器为文件夹 ID
    Drive,
    /// 本地目录，容器为子目录名
    Fs,
}

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 远程存储类型
    #[arg(long, value_enum, env = "FACESYNC_STORE", default_value_t = StoreKind::Drive)]
    pub store: StoreKind,
    /// 图库图片所在的远程容器
    #[arg(long, value_name = "ID", env = "FACESYNC_IMAGES_CONTAINER")]
    pub images_container: String,
    /// 特征缓存所在的远程容器
    #[arg(long, value_name = "ID", env = "FACESYNC_ENCODINGS_CONTAINER")]
    pub encodings_container: String,
    /// 特征缓存在远程容器中的文件名
    #[arg(long, value_name = "NAME", default_value = "encodings.bin")]
    pub encodings_name: String,
    /// Drive 凭据文件，内容为 access token 或包含 access_token 字段的 JSON
    #[arg(long, value_name = "FILE", env = "FACESYNC_CREDENTIALS", default_value = "/etc/secrets/credentials.json")]
    pub credentials: PathBuf,
    /// fs 存储的根目录
    #[arg(long, value_name = "DIR", env = "FACESYNC_STORE_ROOT")]
    pub store_root: Option<PathBuf>,
    /// 只同步这些后缀的图片，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
}

impl StoreOptions {
    pub fn build_store(&self) -> anyhow::Result<Arc<dyn RemoteStore>> {
        Ok(match self.store {
            StoreKind::Drive => Arc::new(DriveStore::new(&self.credentials)),
            StoreKind::Fs => {
                let root = self.store_root.as_ref().ok_or_else(|| anyhow!("fs 存储需要指定 --store-root"))?;
                Arc::new(FsStore::new(root))
            }
        })
    }

    pub fn suffix_regex(&self) -> anyhow::Result<Option<Regex>> {
        if self.suffix.trim().is_empty() {
            return Ok(None);
        }
        let re = format!(r"(?i)\.({})$", self.suffix.replace(',', "|"));
        Ok(Some(Regex::new(&re).context("无效的后缀")?))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// DeepFace 兼容的 HTTP 服务
    Remote,
    /// 本地 OpenCV YuNet + SFace，需要启用 opencv 特性
    Sface,
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 特征提取方式
    #[arg(long, value_enum, env = "FACESYNC_EXTRACTOR", default_value_t = ExtractorKind::Remote)]
    pub extractor: ExtractorKind,
    /// 特征提取模型
    #[arg(long, env = "FACESYNC_MODEL", default_value = "Facenet")]
    pub model: String,
    /// 提取服务地址
    #[arg(long, value_name = "URL", env = "FACESYNC_EXTRACTOR_URL", default_value = "http://127.0.0.1:5005")]
    pub extractor_url: String,
    /// 特征维度，未知模型必须指定
    #[arg(long, value_name = "N")]
    pub dimension: Option<usize>,
    /// YuNet 人脸检测模型
    #[arg(long, value_name = "FILE", default_value = "face_detection_yunet_2023mar.onnx")]
    pub detector_model: PathBuf,
    /// SFace 人脸识别模型
    #[arg(long, value_name = "FILE", default_value = "face_recognition_sface_2021dec.onnx")]
    pub recognizer_model: PathBuf,
}

impl ExtractorOptions {
    pub fn build_extractor(&self) -> anyhow::Result<Arc<dyn FeatureExtractor>> {
        match self.extractor {
            ExtractorKind::Remote => {
                let dimension = match (self.dimension, ModelProfile::find(&self.model)) {
                    (Some(dimension), _) => dimension,
                    (None, Some(profile)) => profile.dimension,
                    (None, None) => return Err(anyhow!("未知模型 {}，请指定 --dimension", self.model)),
                };
                Ok(Arc::new(RemoteExtractor::new(&self.extractor_url, &self.model, dimension)))
            }
            #[cfg(feature = "opencv")]
            ExtractorKind::Sface => Ok(Arc::new(crate::extractor::SFaceExtractor::new(
                self.detector_model.clone(),
                self.recognizer_model.clone(),
            ))),
            #[cfg(not(feature = "opencv"))]
            ExtractorKind::Sface => Err(anyhow!("未启用 opencv 特性，无法使用 sface")),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 距离度量方式
    #[arg(long, value_enum, env = "FACESYNC_METRIC", default_value_t = DistanceMetric::Cosine)]
    pub metric: DistanceMetric,
    /// 距离阈值，默认使用模型推荐值
    #[arg(long, value_name = "DISTANCE", env = "FACESYNC_THRESHOLD")]
    pub threshold: Option<f32>,
    /// 匹配前不与远程同步
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct SyncOptions {
    /// 同时下载和提取的图片数量
    #[arg(long, value_name = "N", default_value_t = num_cpus::get())]
    pub concurrency: usize,
    /// 删除远程已不存在的图片及其特征
    #[arg(long)]
    pub prune: bool,
}

/// 打开图库所需的全部选项
#[derive(Parser, Debug, Clone)]
pub struct GalleryOptions {
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub sync: SyncOptions,
}

impl GalleryOptions {
    pub fn builder(&self, conf_dir: &ConfDir) -> anyhow::Result<FaceDBBuilder> {
        let mut builder = FaceDBBuilder::new(
            conf_dir.clone(),
            self.store.build_store()?,
            self.extractor.build_extractor()?,
        )
        .images(&self.store.images_container)
        .encodings(&self.store.encodings_container, &self.store.encodings_name)
        .concurrency(self.sync.concurrency)
        .prune(self.sync.prune);
        if let Some(re) = self.store.suffix_regex()? {
            builder = builder.suffix(re);
        }
        Ok(builder)
    }

    pub async fn open(&self, conf_dir: &ConfDir, matching: Option<&MatchOptions>) -> anyhow::Result<FaceDB> {
        let mut builder = self.builder(conf_dir)?;
        if let Some(matching) = matching {
            builder = builder.metric(matching.metric).sync_before_match(!matching.no_sync);
            if let Some(threshold) = matching.threshold {
                builder = builder.threshold(threshold);
            }
        }
        Ok(builder.open().await?)
    }
}
