//! Elasticsearch client for content indices.
//!
//! Speaks the REST API directly with `reqwest`: bulk writes use NDJSON `_bulk` requests and
//! id listing walks a point-in-time with `search_after` so that concurrent writes during a
//! sync do not shift pages.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use super::{CONTENT_INDEX_MAPPINGS, IndexError, SearchIndex};
use crate::config::ElasticsearchConfig;
use crate::domain::Document;

#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    page_size: usize,
    pit_keep_alive: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenPitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pit_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    sort: Vec<Value>,
}

impl ElasticsearchIndex {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, IndexError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| IndexError::Configuration(format!("invalid url '{}': {e}", config.url)))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::Configuration(format!(
                "url '{}' cannot be used as a base",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
            pit_keep_alive: config.pit_keep_alive.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::Configuration("url cannot be used as a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        if let Some(api_key) = &self.api_key {
            builder.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(username) = &self.username {
            builder.basic_auth(username, self.password.as_deref())
        } else {
            builder
        }
    }

    async fn bulk(
        &self,
        operation: &'static str,
        index: &str,
        body: String,
    ) -> Result<(), IndexError> {
        let response = self
            .request(Method::POST, self.endpoint(&["_bulk"])?)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response = expect_success(operation, response).await?;
        let bulk: BulkResponse = response.json().await?;

        if !bulk.errors {
            return Ok(());
        }

        let failures: Vec<&BulkItem> = bulk
            .items
            .iter()
            .flat_map(|item| item.iter())
            // Deleting an id that is already gone is not a failure.
            .filter(|(op, item)| !(op.as_str() == "delete" && item.status == 404))
            .map(|(_, item)| item)
            .filter(|item| item.error.is_some())
            .collect();

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(IndexError::BulkRejected {
                operation,
                index: index.to_string(),
                failed: failures.len(),
                first_reason: first
                    .error
                    .as_ref()
                    .map(describe_bulk_error)
                    .unwrap_or_default(),
            }),
        }
    }

    async fn create_index(&self, index: &str, mappings: Value) -> Result<(), IndexError> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index])?)
            .json(&json!({ "mappings": mappings }))
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            // Another writer created it between our check and this request.
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(IndexError::Http {
                operation: "create index",
                status: StatusCode::BAD_REQUEST.as_u16(),
                body,
            });
        }

        expect_success("create index", response).await?;
        info!(index, "Created content index with mappings");
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mappings: Value) -> Result<(), IndexError> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index, "_mapping"])?)
            .json(&mappings)
            .send()
            .await?;
        expect_success("put mapping", response).await?;
        info!(index, "Created mappings for content index");
        Ok(())
    }

    async fn open_pit(&self, index: &str) -> Result<Option<String>, IndexError> {
        let mut url = self.endpoint(&[index, "_pit"])?;
        url.query_pairs_mut()
            .append_pair("keep_alive", &self.pit_keep_alive);

        let response = self.request(Method::POST, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success("open point in time", response).await?;
        let pit: OpenPitResponse = response.json().await?;
        Ok(Some(pit.id))
    }

    async fn close_pit(&self, pit_id: &str) {
        let result = async {
            let response = self
                .request(Method::DELETE, self.endpoint(&["_pit"])?)
                .json(&json!({ "id": pit_id }))
                .send()
                .await?;
            expect_success("close point in time", response).await?;
            Ok::<(), IndexError>(())
        }
        .await;

        if let Err(err) = result {
            warn!(error = %err, "Failed to close point in time");
        }
    }

    async fn collect_ids(
        &self,
        pit_id: &mut String,
        ids: &mut HashSet<String>,
    ) -> Result<(), IndexError> {
        let mut search_after: Option<Vec<Value>> = None;

        loop {
            let mut body = json!({
                "size": self.page_size,
                "_source": false,
                "track_total_hits": false,
                "pit": { "id": pit_id.as_str(), "keep_alive": self.pit_keep_alive },
                "sort": [{ "_shard_doc": "asc" }],
            });
            if let Some(after) = &search_after {
                body["search_after"] = Value::Array(after.clone());
            }

            let response = self
                .request(Method::POST, self.endpoint(&["_search"])?)
                .json(&body)
                .send()
                .await?;
            let response = expect_success("search", response).await?;
            let page: SearchResponse = response.json().await?;

            if let Some(next_pit) = page.pit_id {
                *pit_id = next_pit;
            }

            let fetched = page.hits.hits.len();
            let Some(last) = page.hits.hits.last() else {
                return Ok(());
            };
            if last.sort.is_empty() {
                return Err(IndexError::UnexpectedResponse {
                    operation: "search",
                    details: "hit without sort values".to_string(),
                });
            }
            search_after = Some(last.sort.clone());
            ids.extend(page.hits.hits.into_iter().map(|hit| hit.id));

            if fetched < self.page_size {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn ensure_mapping(&self, index: &str) -> Result<(), IndexError> {
        let mappings: Value =
            serde_json::from_str(CONTENT_INDEX_MAPPINGS).map_err(|e| {
                IndexError::Configuration(format!("bundled content mappings are invalid: {e}"))
            })?;

        let response = self
            .request(Method::GET, self.endpoint(&[index, "_mapping"])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return self.create_index(index, mappings).await;
        }

        let response = expect_success("get mapping", response).await?;
        let current: Value = response.json().await?;
        let has_properties = current
            .as_object()
            .and_then(|indices| indices.values().next())
            .and_then(|entry| entry.pointer("/mappings/properties"))
            .and_then(Value::as_object)
            .is_some_and(|properties| !properties.is_empty());

        if has_properties {
            debug!(index, "Content index mappings already exist");
            Ok(())
        } else {
            self.put_mapping(index, mappings).await
        }
    }

    async fn upsert(&self, index: &str, document: &Document) -> Result<(), IndexError> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index, "_doc", &document.id])?)
            .json(document)
            .send()
            .await?;
        expect_success("index document", response).await?;
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<(), IndexError> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for document in documents {
            let action = json!({ "index": { "_index": index, "_id": document.id } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(document).map_err(|e| {
                IndexError::UnexpectedResponse {
                    operation: "bulk index",
                    details: format!("failed to serialize document {}: {e}", document.id),
                }
            })?);
            body.push('\n');
        }

        self.bulk("bulk index", index, body).await
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::DELETE, self.endpoint(&[index, "_doc", id])?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success("delete document", response).await?;
        Ok(())
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for id in ids {
            body.push_str(&json!({ "delete": { "_index": index, "_id": id } }).to_string());
            body.push('\n');
        }

        self.bulk("bulk delete", index, body).await
    }

    async fn list_all_ids(&self, index: &str) -> Result<HashSet<String>, IndexError> {
        let Some(mut pit_id) = self.open_pit(index).await? else {
            debug!(index, "Index does not exist, no document ids to list");
            return Ok(HashSet::new());
        };

        let mut ids = HashSet::new();
        let result = self.collect_ids(&mut pit_id, &mut ids).await;
        self.close_pit(&pit_id).await;
        result?;

        debug!(index, count = ids.len(), "Listed document ids");
        Ok(ids)
    }
}

async fn expect_success(
    operation: &'static str,
    response: Response,
) -> Result<Response, IndexError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Http {
        operation,
        status,
        body,
    })
}

fn describe_bulk_error(error: &Value) -> String {
    match (
        error.get("type").and_then(Value::as_str),
        error.get("reason").and_then(Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}
