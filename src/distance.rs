use std::cmp::Ordering;

use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// 特征向量之间的距离度量方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// 余弦距离，范围为 [0, 2]
    Cosine,
    /// 欧氏距离
    Euclidean,
    /// 先做 L2 归一化再计算欧氏距离
    EuclideanL2,
}

impl DistanceMetric {
    /// 计算两个向量的距离，维度不一致时返回无穷大
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
            Self::EuclideanL2 => euclidean_distance(&l2_normalize(a), &l2_normalize(b)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }
}

/// 余弦距离，零向量返回 2.0
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0. || norm_b == 0. {
        return 2.;
    }
    // 浮点误差可能让相似度略微超出 [-1, 1]
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1., 1.);
    (1. - similarity) as f32
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt();
    if norm == 0. {
        return v.to_vec();
    }
    v.iter().map(|&x| (x as f64 / norm) as f32).collect()
}

/// 在候选向量中寻找距离最近的一个，返回 `(标识, 距离)`
///
/// 距离相同时选择字典序最小的标识，保证结果可复现。
pub fn nearest<'a, I>(metric: DistanceMetric, probe: &[f32], candidates: I) -> Option<(&'a str, f32)>
where
    I: IntoParallelIterator<Item = (&'a str, &'a [f32])>,
{
    candidates
        .into_par_iter()
        .map(|(id, vector)| (id, metric.distance(probe, vector)))
        .min_by(|a, b| compare_neighbor(*a, *b))
}

fn compare_neighbor(a: (&str, f32), b: (&str, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0))
}
