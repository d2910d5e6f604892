mod remote;
#[cfg(feature = "opencv")]
mod sface;

use async_trait::async_trait;
use thiserror::Error;

pub use self::remote::RemoteExtractor;
#[cfg(feature = "opencv")]
pub use self::sface::SFaceExtractor;
use crate::distance::DistanceMetric;

/// 单张图片特征提取失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// 图片中没有可检测的人脸
    #[error("未检测到人脸")]
    NoFace,
    /// 模型无法处理该图片
    #[error("模型错误: {0}")]
    Model(String),
    /// 提取服务本身不可用，与具体图片无关
    #[error("提取服务不可用: {0}")]
    Unavailable(String),
}

/// 人脸特征提取器
///
/// 输入图片的原始字节，输出固定维度的特征向量。
#[async_trait]
pub trait FeatureExtractor: Send + Sync + 'static {
    /// 模型名称，会随特征缓存一起持久化
    fn model(&self) -> &str;

    /// 特征向量的维度
    fn dimension(&self) -> usize;

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError>;
}

/// 已知模型的维度以及各距离度量下的推荐阈值
#[derive(Debug, Clone, Copy)]
pub struct ModelProfile {
    pub name: &'static str,
    pub dimension: usize,
    pub cosine: f32,
    pub euclidean: f32,
    pub euclidean_l2: f32,
}

const MODEL_PROFILES: &[ModelProfile] = &[
    ModelProfile { name: "Facenet", dimension: 128, cosine: 0.40, euclidean: 10.0, euclidean_l2: 0.80 },
    ModelProfile { name: "Facenet512", dimension: 512, cosine: 0.30, euclidean: 23.56, euclidean_l2: 1.04 },
    ModelProfile { name: "ArcFace", dimension: 512, cosine: 0.68, euclidean: 4.15, euclidean_l2: 1.13 },
    ModelProfile { name: "SFace", dimension: 128, cosine: 0.593, euclidean: 10.734, euclidean_l2: 1.055 },
];

impl ModelProfile {
    /// 按名称查找模型，忽略大小写
    pub fn find(name: &str) -> Option<&'static ModelProfile> {
        MODEL_PROFILES.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn threshold(&self, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => self.cosine,
            DistanceMetric::Euclidean => self.euclidean,
            DistanceMetric::EuclideanL2 => self.euclidean_l2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_profile() {
        let p = ModelProfile::find("facenet").unwrap();
        assert_eq!(p.dimension, 128);
        assert_eq!(p.threshold(DistanceMetric::Cosine), 0.40);
        assert!(ModelProfile::find("VGG-Unknown").is_none());
    }
}
