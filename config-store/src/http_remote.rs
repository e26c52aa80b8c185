use crate::errors::RemoteStoreError;
use crate::remote::{RemoteEntry, RemoteStore};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest<'a> {
    entry_value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryResponse {
    entry_value: Option<String>,
    revision: u64,
}

#[derive(Deserialize)]
struct RevisionResponse {
    revision: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysResponse {
    entry_keys: Vec<String>,
}

/// Client for the platform's key-value HTTP API:
///
/// - `GET|PUT|DELETE {base}/namespaces/{namespace}/entries/{key}`
/// - `GET {base}/namespaces/{namespace}/keys`
///
/// Failures are returned as-is; there is no retry here.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRemoteStore {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, RemoteStoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpRemoteStore { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteStoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteStoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn entry_url(&self, namespace: &str, key: &str) -> Result<Url, RemoteStoreError> {
        self.url(&["namespaces", namespace, "entries", key])
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<RemoteEntry>, RemoteStoreError> {
        let response = self
            .client
            .get(self.entry_url(namespace, key)?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.json::<EntryResponse>().await?;
                // The platform reports deleted entries with an empty value.
                Ok(body
                    .entry_value
                    .filter(|value| !value.is_empty())
                    .map(|value| RemoteEntry {
                        value,
                        revision: body.revision,
                    }))
            }
            status => Err(RemoteStoreError::UnexpectedStatus(status)),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, RemoteStoreError> {
        let response = self
            .client
            .put(self.entry_url(namespace, key)?)
            .json(&PutRequest {
                entry_value: &value,
                revision: expected_revision,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(RemoteStoreError::RevisionConflict),
            status if status.is_success() => Ok(response.json::<RevisionResponse>().await?.revision),
            status => Err(RemoteStoreError::UnexpectedStatus(status)),
        }
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), RemoteStoreError> {
        let response = self
            .client
            .delete(self.entry_url(namespace, key)?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(RemoteStoreError::UnexpectedStatus(status)),
        }
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, RemoteStoreError> {
        let response = self
            .client
            .get(self.url(&["namespaces", namespace, "keys"])?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<KeysResponse>().await?.entry_keys),
            status => Err(RemoteStoreError::UnexpectedStatus(status)),
        }
    }
}
