use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{ExtractError, FeatureExtractor};

/// 通过 HTTP 调用 DeepFace 兼容的 `/represent` 接口提取特征
pub struct RemoteExtractor {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct RepresentRequest<'a> {
    img: String,
    model_name: &'a str,
    enforce_detection: bool,
}

#[derive(Deserialize)]
struct RepresentResponse {
    results: Vec<Representation>,
}

#[derive(Deserialize)]
struct Representation {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl RemoteExtractor {
    pub fn new(url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, url: url.into(), model: model.into(), dimension }
    }

    fn endpoint(&self) -> String {
        format!("{}/represent", self.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl FeatureExtractor for RemoteExtractor {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError> {
        let request = RepresentRequest {
            img: format!("data:{};base64,{}", sniff_mime(image), STANDARD.encode(image)),
            model_name: &self.model,
            enforce_detection: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ExtractError::Unavailable(e.to_string()))?;

        if status.is_server_error() && !is_no_face(&String::from_utf8_lossy(&body)) {
            return Err(ExtractError::Unavailable(format!("{status}")));
        }
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            debug!("represent 返回 {status}: {message}");
            if is_no_face(&message) {
                return Err(ExtractError::NoFace);
            }
            return Err(ExtractError::Model(message));
        }

        let response: RepresentResponse =
            serde_json::from_slice(&body).map_err(|e| ExtractError::Model(e.to_string()))?;
        // 多张人脸时取第一张，与 DeepFace 的排序一致
        let first = response.results.into_iter().next().ok_or(ExtractError::NoFace)?;
        Ok(first.embedding)
    }
}

fn is_no_face(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("face could not be detected") || message.contains("no face")
}

fn sniff_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_no_face() {
        assert!(is_no_face(
            "Exception while representing: Face could not be detected in numpy array."
        ));
        assert!(!is_no_face("model weights missing"));
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8"), "image/webp");
        assert_eq!(sniff_mime(b"\xff\xd8\xff"), "image/jpeg");
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let e = RemoteExtractor::new("http://127.0.0.1:5005/", "Facenet", 128);
        assert_eq!(e.endpoint(), "http://127.0.0.1:5005/represent");
    }
}
