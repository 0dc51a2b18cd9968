//! Pinecone-backed vector index.
//!
//! Talks to an index's data-plane host over its REST API. Chunk text and
//! provenance travel as vector metadata so queries can rebuild chunks
//! without a second store.

use crate::types::{Chunk, EmbeddingVector, IndexStats, ScoredChunk};
use crate::vector_index::{rank, validate_query, validate_upsert, VectorIndexClient};
use ragchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

const API_VERSION: &str = "2024-07";
const UPSERT_BATCH: usize = 100;
const DELETE_BATCH: usize = 1000;
const LIST_PAGE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorMetadata {
    document_id: String,
    ordinal: u32,
    text: String,
    #[serde(default)]
    source_ref: String,
    #[serde(default)]
    start: usize,
    #[serde(default)]
    end: usize,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: VectorMetadata,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    metadata: Option<VectorMetadata>,
}

impl QueryMatch {
    fn into_scored(self) -> Option<ScoredChunk> {
        let Some(metadata) = self.metadata else {
            tracing::warn!(id = %self.id, "Skipping match without metadata");
            return None;
        };
        Some(ScoredChunk {
            chunk: Chunk {
                id: self.id,
                document_id: metadata.document_id,
                source_ref: metadata.source_ref,
                text: metadata.text,
                ordinal: metadata.ordinal,
                start: metadata.start,
                end: metadata.end,
            },
            score: self.score,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedVector>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ListedVector {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStatsResponse {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: usize,
    #[serde(default)]
    namespaces: std::collections::HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}

/// Pinecone index client.
pub struct PineconeIndex {
    name: String,
    host: String,
    api_key: String,
    namespace: Option<String>,
    dimensions: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for PineconeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeIndex")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("namespace", &self.namespace)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl PineconeIndex {
    /// Create a client for the index served at `host`.
    pub fn new(
        name: impl Into<String>,
        host: &str,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Self {
            name: name.into(),
            host,
            api_key: api_key.into(),
            namespace: None,
            dimensions,
            client: reqwest::Client::new(),
        }
    }

    /// Scope every operation to a namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|n| !n.is_empty());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> AppResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AppError::ServiceUnavailable(format!("Failed to reach vector index: {}", e))
            })?;

        check_index_status(response).await
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> AppResult<reqwest::Response> {
        let response = self
            .client
            .get(self.url(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                AppError::ServiceUnavailable(format!("Failed to reach vector index: {}", e))
            })?;

        check_index_status(response).await
    }

    /// Query parameters for one page of `/vectors/list`.
    fn list_params(&self, prefix: &str, token: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("prefix", prefix.to_string()),
            ("limit", LIST_PAGE.to_string()),
        ];
        if let Some(ns) = &self.namespace {
            params.push(("namespace", ns.clone()));
        }
        if let Some(token) = token {
            params.push(("paginationToken", token.to_string()));
        }
        params
    }

    fn delete_body(&self, ids: &[String]) -> serde_json::Value {
        json!({
            "ids": ids,
            "namespace": self.namespace_field(),
        })
    }

    fn namespace_field(&self) -> serde_json::Value {
        match &self.namespace {
            Some(ns) => json!(ns),
            None => json!(""),
        }
    }
}

/// Map an index HTTP status to an error. 5xx and 429 are transient.
async fn check_index_status(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = format!("Vector index error ({}): {}", status, body);

    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(AppError::ServiceUnavailable(message))
    } else {
        Err(AppError::Knowledge(message))
    }
}

fn upsert_payload<'a>(
    chunks: &'a [Chunk],
    embeddings: &'a [EmbeddingVector],
) -> Vec<UpsertVector<'a>> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| UpsertVector {
            id: &chunk.id,
            values: &embedding.values,
            metadata: VectorMetadata {
                document_id: chunk.document_id.clone(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                source_ref: chunk.source_ref.clone(),
                start: chunk.start,
                end: chunk.end,
            },
        })
        .collect()
}

#[async_trait::async_trait]
impl VectorIndexClient for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, chunks: &[Chunk], embeddings: &[EmbeddingVector]) -> AppResult<()> {
        validate_upsert(chunks, embeddings, self.dimensions)?;

        let vectors = upsert_payload(chunks, embeddings);
        for batch in vectors.chunks(UPSERT_BATCH) {
            let body = json!({
                "vectors": batch,
                "namespace": self.namespace_field(),
            });
            self.post("/vectors/upsert", &body).await?;
        }

        tracing::debug!(index = %self.name, upserted = chunks.len(), "Upserted vectors");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> AppResult<Vec<ScoredChunk>> {
        validate_query(vector, k, self.dimensions)?;

        let body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.namespace_field(),
        });
        let response: QueryResponse = self
            .post("/query", &body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to parse query response: {}", e)))?;

        let scored = response
            .matches
            .into_iter()
            .filter_map(QueryMatch::into_scored)
            .collect();
        Ok(rank(scored, k))
    }

    /// Lists ids by the `"{document_id}:"` prefix. Serverless indexes do
    /// not support deleting by metadata filter, so deletes go by id.
    async fn chunk_ids(&self, document_id: &str) -> AppResult<Vec<String>> {
        let prefix = format!("{}:", document_id);
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page: ListResponse = self
                .get("/vectors/list", &self.list_params(&prefix, token.as_deref()))
                .await?
                .json()
                .await
                .map_err(|e| AppError::Knowledge(format!("Failed to parse vector list: {}", e)))?;

            ids.extend(page.vectors.into_iter().map(|v| v.id));
            token = page.pagination.and_then(|p| p.next).filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn delete_chunks(&self, ids: &[String]) -> AppResult<()> {
        for batch in ids.chunks(DELETE_BATCH) {
            self.post("/vectors/delete", &self.delete_body(batch)).await?;
        }

        tracing::debug!(index = %self.name, deleted = ids.len(), "Deleted vectors");
        Ok(())
    }

    async fn stats(&self) -> AppResult<IndexStats> {
        let response: DescribeStatsResponse = self
            .post("/describe_index_stats", &json!({}))
            .await?
            .json()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to parse index stats: {}", e)))?;

        let chunks = match &self.namespace {
            Some(ns) => response.namespaces.get(ns).map_or(0, |s| s.vector_count),
            None => response.total_vector_count,
        };

        Ok(IndexStats {
            documents: None,
            chunks,
            dimensions: response.dimension.unwrap_or(self.dimensions),
        })
    }
}
