//! etcd v2 keys API client.
//!
//! Speaks the HTTP keys API directly: form-encoded PUTs with optional TTL
//! and compare-and-swap guards, recursive GETs and DELETEs. Every round
//! trip runs under the configured deadline and is logged at debug level.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{DeleteOptions, KvClient, KvError, KvPair, SetOptions};

// etcd v2 error codes the client acts on.
const CODE_KEY_NOT_FOUND: i64 = 100;
const CODE_TEST_FAILED: i64 = 101;
const CODE_NOT_A_FILE: i64 = 102;
const CODE_NODE_EXIST: i64 = 105;

/// Client for an etcd v2 keys endpoint.
pub struct EtcdClient {
    http: reqwest::Client,
    base_url: String,
}

impl EtcdClient {
    /// Create a client for `endpoint` (e.g. `http://127.0.0.1:2379`) with a
    /// per-operation deadline.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, KvError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KvError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        format!("{}/v2/keys/{}", self.base_url, key)
    }

    async fn read_node(&self, key: &str, recursive: bool) -> Result<EtcdNode, KvError> {
        let url = self.url(key);
        let mut request = self.http.get(&url);
        if recursive {
            request = request.query(&[("recursive", "true"), ("sorted", "true")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let status = response.status();
        debug!(method = "GET", url = %url, status = %status, "kv round trip");

        let body = response
            .text()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(decode_error(key, status, &body));
        }

        let decoded: EtcdResponse = serde_json::from_str(&body)
            .map_err(|e| KvError::Response(format!("{url}: {e}")))?;
        decoded
            .node
            .ok_or_else(|| KvError::Response(format!("{url}: response without node")))
    }
}

#[async_trait::async_trait]
impl KvClient for EtcdClient {
    async fn get(&self, key: &str) -> Result<KvPair, KvError> {
        let node = self.read_node(key, false).await?;
        if node.dir {
            return Err(KvError::Response(format!("{key} is a directory")));
        }
        Ok(KvPair {
            key: node.key,
            value: node.value.unwrap_or_default(),
        })
    }

    async fn list(&self, key: &str) -> Result<Vec<KvPair>, KvError> {
        let node = self.read_node(key, true).await?;
        let mut pairs = Vec::new();
        flatten(node, &mut pairs);
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pairs)
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<(), KvError> {
        let url = self.url(key);
        let mut form = vec![("value".to_string(), value.to_string())];
        if let Some(ttl) = opts.ttl {
            form.push(("ttl".to_string(), ttl.as_secs().max(1).to_string()));
        }
        if let Some(prev_exist) = opts.prev_exist {
            form.push(("prevExist".to_string(), prev_exist.to_string()));
        }
        if let Some(prev_value) = opts.prev_value {
            form.push(("prevValue".to_string(), prev_value));
        }

        let response = self
            .http
            .put(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let status = response.status();
        debug!(method = "PUT", url = %url, status = %status, "kv round trip");

        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(decode_error(key, status, &body))
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), KvError> {
        let url = self.url(key);
        let mut query: Vec<(&str, String)> = Vec::new();
        if opts.recursive {
            query.push(("recursive", "true".to_string()));
        } else if let Some(prev_value) = opts.prev_value {
            query.push(("prevValue", prev_value));
        }

        let response = self
            .http
            .delete(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let status = response.status();
        debug!(method = "DELETE", url = %url, status = %status, "kv round trip");

        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(decode_error(key, status, &body))
    }
}

fn flatten(node: EtcdNode, out: &mut Vec<KvPair>) {
    if node.dir {
        for child in node.nodes {
            flatten(child, out);
        }
    } else {
        out.push(KvPair {
            key: node.key,
            value: node.value.unwrap_or_default(),
        });
    }
}

fn decode_error(key: &str, status: reqwest::StatusCode, body: &str) -> KvError {
    if let Ok(err) = serde_json::from_str::<EtcdErrorBody>(body) {
        return match err.error_code {
            CODE_KEY_NOT_FOUND => KvError::NotFound(key.to_string()),
            CODE_NODE_EXIST => KvError::AlreadyExists(key.to_string()),
            CODE_TEST_FAILED | CODE_NOT_A_FILE => KvError::CompareFailed {
                key: key.to_string(),
                message: err.message,
            },
            code => KvError::Response(format!("{key}: error code {code}: {}", err.message)),
        };
    }
    KvError::Response(format!("{key}: HTTP {status}"))
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: i64,
    #[serde(default)]
    message: String,
}
