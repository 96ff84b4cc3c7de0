//! Search-engine storage backend (§4.3.2).
//!
//! A Meilisearch-shaped HTTP client: one index per `(year, month)`
//! partition, settings pushed on `ensure_partition`, documents uploaded in
//! bulk on `write_batch`. The reqwest client-construction/header shape
//! follows the forwarding client used elsewhere in the corpus; the
//! document schema and index-settings payloads are new, per §4.3.2.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use syslogd_core::backend::StorageBackend;
use syslogd_core::error::BackendError;
use syslogd_core::metrics::BACKEND_PARTITION_ROLLOVERS_TOTAL;
use syslogd_core::types::{LogRecord, PartitionKey};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub url: String,
    pub api_key: String,
}

/// One Meilisearch-style HTTP client per configured endpoint. Tracks, per
/// partition, the next composite-primary-key sequence number so restarts
/// don't collide with previously indexed documents.
pub struct SearchBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    current: Option<(PartitionKey, AtomicI64)>,
}

#[derive(Serialize)]
struct IndexSettings<'a> {
    searchable_attributes: &'a [&'a str],
    filterable_attributes: &'a [&'a str],
    sortable_attributes: &'a [&'a str],
}

#[derive(Serialize)]
struct Document {
    id: String,
    facility: u8,
    severity: u8,
    priority: u8,
    host: String,
    tag: String,
    message: String,
    device_reported_time: String,
    received_at: String,
}

impl SearchBackend {
    pub fn new(config: SearchConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::PartitionOpen {
                partition: "<init>".to_owned(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            api_key: config.api_key,
            current: None,
        })
    }

    fn index_name(&self, key: PartitionKey) -> String {
        format!("syslog_{}", key.as_yyyymm())
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn create_index_if_missing(&self, index: &str) -> Result<(), BackendError> {
        let url = format!("{}/indexes", self.base_url);
        let body = serde_json::json!({ "uid": index, "primaryKey": "id" });
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("create index request failed: {e}")))?;
        // 202 Accepted = created; 400 with index_already_exists = fine; anything
        // else is treated as a transient backend problem.
        if resp.status().is_success() || resp.status() == StatusCode::ACCEPTED {
            Ok(())
        } else if resp.status() == StatusCode::BAD_REQUEST {
            Ok(())
        } else {
            Err(BackendError::Transient(format!(
                "unexpected status creating index {index}: {}",
                resp.status()
            )))
        }
    }

    async fn push_settings(&self, index: &str) -> Result<(), BackendError> {
        let url = format!("{}/indexes/{index}/settings", self.base_url);
        let settings = IndexSettings {
            searchable_attributes: &["message", "tag", "host"],
            filterable_attributes: &["facility", "severity", "host", "device_reported_time"],
            sortable_attributes: &["device_reported_time", "received_at", "id"],
        };
        let resp = self
            .authed(self.client.patch(&url).json(&settings))
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("settings request failed: {e}")))?;
        if resp.status().is_success() || resp.status() == StatusCode::ACCEPTED {
            Ok(())
        } else {
            Err(BackendError::Transient(format!(
                "unexpected status pushing settings to {index}: {}",
                resp.status()
            )))
        }
    }

    /// Queries the current maximum sequence number for `index` so a restart
    /// does not reuse composite keys (§4.3.2).
    async fn current_max_sequence(&self, index: &str) -> Result<i64, BackendError> {
        let url = format!("{}/indexes/{index}/search", self.base_url);
        let body = serde_json::json!({
            "q": "",
            "limit": 1,
            "sort": ["id:desc"],
        });
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("sequence query failed: {e}")))?;
        if !resp.status().is_success() {
            // Fresh index: treat as sequence 0.
            return Ok(0);
        }
        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("sequence query decode failed: {e}")))?;
        let max_id = parsed
            .get("hits")
            .and_then(|h| h.as_array())
            .and_then(|hits| hits.first())
            .and_then(|hit| hit.get("id"))
            .and_then(|id| id.as_str())
            .and_then(|id| id.rsplit('-').next())
            .and_then(|seq| seq.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(max_id)
    }
}

impl StorageBackend for SearchBackend {
    async fn ensure_partition(&mut self, key: PartitionKey) -> Result<(), BackendError> {
        match self.current.as_ref().map(|(k, _)| *k) {
            Some(current) if current == key => return Ok(()),
            Some(_) => metrics::counter!(BACKEND_PARTITION_ROLLOVERS_TOTAL).increment(1),
            None => {}
        }
        let index = self.index_name(key);
        self.create_index_if_missing(&index).await?;
        self.push_settings(&index).await?;
        let max_seq = self.current_max_sequence(&index).await?;
        self.current = Some((key, AtomicI64::new(max_seq)));
        Ok(())
    }

    async fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> Result<usize, BackendError> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.current.as_ref().map(|(k, _)| *k) != Some(key) {
            self.ensure_partition(key).await?;
        }
        let (_, seq) = self.current.as_ref().expect("partition just ensured");
        let index = self.index_name(key);

        let documents: Vec<Document> = records
            .iter()
            .map(|record| {
                let sequence = seq.fetch_add(1, Ordering::SeqCst) + 1;
                Document {
                    id: format!("{}-{sequence}", key.as_yyyymm()),
                    facility: record.facility,
                    severity: record.severity,
                    priority: record.priority,
                    host: record.hostname.clone(),
                    tag: record.tag.clone(),
                    message: record.message.clone(),
                    device_reported_time: record.device_reported_time.to_rfc3339(),
                    received_at: record.received_at.to_rfc3339(),
                }
            })
            .collect();

        let url = format!("{}/indexes/{index}/documents", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&documents))
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("document upload failed: {e}")))?;

        if resp.status().is_success() || resp.status() == StatusCode::ACCEPTED {
            Ok(documents.len())
        } else if resp.status().is_server_error() {
            Err(BackendError::Transient(format!(
                "document upload returned {}",
                resp.status()
            )))
        } else {
            Err(BackendError::Fatal {
                count: documents.len(),
                reason: format!("document upload rejected with status {}", resp.status()),
            })
        }
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_follows_yyyymm_pattern() {
        let backend = SearchBackend::new(SearchConfig {
            url: "http://localhost:7700".to_owned(),
            api_key: String::new(),
        })
        .unwrap();
        let key = PartitionKey { year: 2024, month: 3 };
        assert_eq!(backend.index_name(key), "syslog_202403");
    }

    #[test]
    fn builds_client_without_api_key() {
        let backend = SearchBackend::new(SearchConfig {
            url: "http://localhost:7700/".to_owned(),
            api_key: String::new(),
        })
        .unwrap();
        assert_eq!(backend.base_url, "http://localhost:7700");
    }

    #[test]
    fn document_serializes_with_composite_key_shape() {
        let doc = Document {
            id: "202403-1".to_owned(),
            facility: 4,
            severity: 2,
            priority: 34,
            host: "host1".to_owned(),
            tag: "myapp".to_owned(),
            message: "hello".to_owned(),
            device_reported_time: "2024-03-15T12:00:00Z".to_owned(),
            received_at: "2024-03-15T12:00:00Z".to_owned(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], "202403-1");
        assert_eq!(json["message"], "hello");
    }
}
