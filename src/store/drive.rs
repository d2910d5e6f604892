use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::{RemoteObject, RemoteStore};
use crate::error::{Error, Result};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";

/// Google Drive v3 存储，容器即文件夹 ID
///
/// 鉴权使用凭据文件中的 access token，每次请求都会重新读取以便外部轮换。
/// 文件内容可以是裸 token，也可以是包含 `access_token` 字段的 JSON。
pub struct DriveStore {
    client: Client,
    credentials: PathBuf,
    api: String,
    upload_api: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

impl DriveStore {
    pub fn new(credentials: impl Into<PathBuf>) -> Self {
        Self::with_endpoint(credentials, DRIVE_API, DRIVE_UPLOAD_API)
    }

    /// 指定 API 地址，主要用于接入兼容的代理服务
    pub fn with_endpoint(
        credentials: impl Into<PathBuf>,
        api: impl Into<String>,
        upload_api: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { client, credentials: credentials.into(), api: api.into(), upload_api: upload_api.into() }
    }

    async fn token(&self) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.credentials)
            .await
            .map_err(|e| Error::RemoteUnavailable(format!("无法读取凭据 {}: {e}", self.credentials.display())))?;
        parse_token(&content)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.bearer_auth(self.token().await?))
    }

    async fn query_files(&self, q: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.to_string()),
                ("fields", "nextPageToken, files(id, name)".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let request = self.client.get(format!("{}/files", self.api)).query(&params);
            let list: FileList = self
                .authorized(request)
                .await?
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            objects.extend(list.files.into_iter().map(|f| RemoteObject::new(f.id, f.name)));
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn upload_media(&self, id: &str, data: &[u8]) -> Result<()> {
        let request = self
            .client
            .patch(format!("{}/files/{id}", self.upload_api))
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec());
        self.authorized(request).await?.send().await?.error_for_status()?;
        Ok(())
    }
}

fn parse_token(content: &str) -> Result<String> {
    let content = content.trim();
    let token = if content.starts_with('{') {
        serde_json::from_str::<AccessToken>(content)
            .map_err(|e| Error::RemoteUnavailable(format!("凭据格式错误: {e}")))?
            .access_token
    } else {
        content.to_string()
    };
    if token.is_empty() {
        return Err(Error::RemoteUnavailable("凭据为空".to_string()));
    }
    Ok(token)
}

/// 转义 Drive 查询语句中的字符串字面量
fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn list(&self, container: &str) -> Result<Vec<RemoteObject>> {
        let q = format!("'{}' in parents and trashed = false", escape_query(container));
        let mut objects = self.query_files(&q).await?;
        objects.sort_unstable_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        // 同名文件只保留一个，保证名称在容器内唯一
        objects.dedup_by(|a, b| a.name == b.name);
        Ok(objects)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(format!("{}/files/{id}", self.api))
            .query(&[("alt", "media")]);
        let response = self.authorized(request).await?.send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn upsert(&self, container: &str, name: &str, data: &[u8]) -> Result<()> {
        let q = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query(container),
            escape_query(name)
        );
        if let Some(existing) = self.query_files(&q).await?.into_iter().next() {
            debug!("更新 Drive 文件 {name} ({})", existing.id);
            return self.upload_media(&existing.id, data).await;
        }

        let request = self
            .client
            .post(format!("{}/files", self.api))
            .query(&[("fields", "id, name")])
            .json(&json!({ "name": name, "parents": [container] }));
        let created: DriveFile =
            self.authorized(request).await?.send().await?.error_for_status()?.json().await?;
        debug!("创建 Drive 文件 {} ({})", created.name, created.id);
        self.upload_media(&created.id, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("o'neil.jpg"), "o\\'neil.jpg");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token("  ya29.abc\n").unwrap(), "ya29.abc");
        assert_eq!(parse_token(r#"{"access_token": "ya29.def", "expires_in": 3599}"#).unwrap(), "ya29.def");
        assert!(matches!(parse_token(""), Err(Error::RemoteUnavailable(_))));
        assert!(matches!(parse_token("{oops"), Err(Error::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_unavailable() {
        let store = DriveStore::new("/nonexistent/credentials.json");
        assert!(matches!(store.list("folder").await, Err(Error::RemoteUnavailable(_))));
    }
}
