use std::cell::RefCell;
use std::path::PathBuf;

use async_trait::async_trait;
use opencv::core::{Mat, Ptr, Size, Vector};
use opencv::imgcodecs;
use opencv::objdetect::{FaceDetectorYN, FaceRecognizerSF};
use opencv::prelude::*;
use tokio::task::block_in_place;

use super::{ExtractError, FeatureExtractor};

// YuNet 每一行输出 15 列，最后一列为置信度
const SCORE_COL: i32 = 14;

struct SFaceModels {
    detector: Ptr<FaceDetectorYN>,
    recognizer: Ptr<FaceRecognizerSF>,
}

// OpenCV 的模型对象不能跨线程共享，每个线程各自加载一份
thread_local! {
    static MODELS: RefCell<Option<SFaceModels>> = const { RefCell::new(None) };
}

/// 使用 OpenCV YuNet 检测人脸、SFace 计算特征
pub struct SFaceExtractor {
    detector_model: PathBuf,
    recognizer_model: PathBuf,
}

impl SFaceExtractor {
    pub fn new(detector_model: PathBuf, recognizer_model: PathBuf) -> Self {
        Self { detector_model, recognizer_model }
    }

    fn load(&self) -> opencv::Result<SFaceModels> {
        let detector = FaceDetectorYN::create(
            &self.detector_model.to_string_lossy(),
            "",
            Size::new(320, 320),
            0.9,
            0.3,
            5000,
            0,
            0,
        )?;
        let recognizer =
            FaceRecognizerSF::create(&self.recognizer_model.to_string_lossy(), "", 0, 0)?;
        Ok(SFaceModels { detector, recognizer })
    }

    fn extract_blocking(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError> {
        MODELS.with(|cell| {
            let mut cell = cell.borrow_mut();
            if cell.is_none() {
                *cell = Some(self.load().map_err(|e| ExtractError::Unavailable(e.to_string()))?);
            }
            let models = cell.as_mut().expect("models loaded above");
            detect_and_feature(models, image)
        })
    }
}

fn detect_and_feature(models: &mut SFaceModels, image: &[u8]) -> Result<Vec<f32>, ExtractError> {
    let model_err = |e: opencv::Error| ExtractError::Model(e.to_string());

    let buf = Vector::<u8>::from_slice(image);
    let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR).map_err(model_err)?;
    if img.empty() {
        return Err(ExtractError::Model("无法解码图片".to_string()));
    }

    models.detector.set_input_size(img.size().map_err(model_err)?).map_err(model_err)?;
    let mut faces = Mat::default();
    models.detector.detect(&img, &mut faces).map_err(model_err)?;
    if faces.rows() == 0 {
        return Err(ExtractError::NoFace);
    }

    let mut best = 0;
    let mut best_score = f32::MIN;
    for row in 0..faces.rows() {
        let score = *faces.at_2d::<f32>(row, SCORE_COL).map_err(model_err)?;
        if score > best_score {
            best = row;
            best_score = score;
        }
    }
    let face = faces.row(best).map_err(model_err)?.try_clone().map_err(model_err)?;

    let mut aligned = Mat::default();
    models.recognizer.align_crop(&img, &face, &mut aligned).map_err(model_err)?;
    let mut feature = Mat::default();
    models.recognizer.feature(&aligned, &mut feature).map_err(model_err)?;

    Ok(feature.data_typed::<f32>().map_err(model_err)?.to_vec())
}

#[async_trait]
impl FeatureExtractor for SFaceExtractor {
    fn model(&self) -> &str {
        "SFace"
    }

    fn dimension(&self) -> usize {
        128
    }

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError> {
        block_in_place(|| self.extract_blocking(image))
    }
}
