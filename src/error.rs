use thiserror::Error;

use crate::extractor::ExtractError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 同步与匹配过程中可能出现的错误
#[derive(Error, Debug)]
pub enum Error {
    /// 远程存储不可用（网络、鉴权或服务端错误），可恢复
    #[error("远程存储不可用: {0}")]
    RemoteUnavailable(String),

    /// 远程对象不存在
    #[error("远程对象不存在: {0}")]
    NotFound(String),

    /// 单张图片特征提取失败
    #[error("特征提取失败: {0}")]
    ExtractionFailed(String),

    /// 上传的图片中没有检测到人脸
    #[error("未检测到人脸")]
    NoFaceDetected,

    /// 持久化的特征缓存无法解析
    #[error("特征缓存已损坏: {0}")]
    CacheCorrupt(String),

    /// 请求参数无效
    #[error("无效的输入: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(404) {
            Self::NotFound(err.to_string())
        } else {
            Self::RemoteUnavailable(err.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::CacheCorrupt(err.to_string())
    }
}

impl From<ExtractError> for Error {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFace => Self::NoFaceDetected,
            ExtractError::Model(msg) => Self::ExtractionFailed(msg),
            ExtractError::Unavailable(msg) => Self::RemoteUnavailable(msg),
        }
    }
}
