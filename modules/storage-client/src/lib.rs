pub mod error;

pub use error::{Result, StorageError};

use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file that now lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    url: &'a str,
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    size: Option<u64>,
}

pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: String,
    public_base_url: String,
}

impl StorageClient {
    pub fn new(base_url: &str, bucket: &str, token: String, public_base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            token,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload raw bytes under `key`.
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject> {
        let size = bytes.len() as u64;
        let url = self.join(&self.base_url, &format!("{}/{}", self.bucket, key))?;

        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(key, size, "Stored object");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key)?,
            size: Some(size),
        })
    }

    /// Ask the store to pull `source_url` itself and keep it under `key`.
    pub async fn fetch_to_store(&self, source_url: &str, key: &str) -> Result<StoredObject> {
        let url = self.join(&self.base_url, &format!("{}/fetch", self.bucket))?;

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&FetchRequest {
                url: source_url,
                key,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Some deployments answer with an empty body.
        let size = resp
            .json::<FetchResponse>()
            .await
            .ok()
            .and_then(|r| r.size);

        tracing::info!(key, source_url, "Fetched remote file into store");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key)?,
            size,
        })
    }

    /// Public, percent-encoded URL for a key.
    pub fn public_url(&self, key: &str) -> Result<String> {
        Ok(self.join(&self.public_base_url, key)?.to_string())
    }

    fn join(&self, base: &str, key: &str) -> Result<Url> {
        Url::parse(&format!("{base}/{key}")).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }
}

/// Build a collision-free key: `{city}/{yyyymmdd}/{uuid}-{file name}`.
pub fn object_key(city: &str, file_name: &str, date: NaiveDate, id: Uuid) -> String {
    format!(
        "{}/{}/{}-{}",
        sanitize_segment(city),
        date.format("%Y%m%d"),
        id.simple(),
        sanitize_segment(file_name)
    )
}

/// Strip characters that would change the key's path structure. CJK names are kept.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '#' | '%' => '_',
            c if c.is_whitespace() => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_grouped_by_city_and_day() {
        let id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            object_key("杭州", "2025 医保政策.pdf", date, id),
            "杭州/20250307/00000000000000000000000000000000-2025_医保政策.pdf"
        );
    }

    #[test]
    fn sanitize_blocks_path_traversal() {
        assert_eq!(sanitize_segment("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_segment("   "), "file");
        assert_eq!(sanitize_segment("a?b#c%d"), "a_b_c_d");
    }

    #[test]
    fn public_url_is_percent_encoded() {
        let client = StorageClient::new(
            "https://store.example",
            "policies",
            "t".into(),
            "https://cdn.example/policies/",
        );
        assert_eq!(
            client.public_url("杭州/a.pdf").unwrap(),
            "https://cdn.example/policies/%E6%9D%AD%E5%B7%9E/a.pdf"
        );
    }
}
