//! Qdrant REST backend.
//!
//! Each record becomes one point with a named dense vector (`dense`) and a
//! named sparse vector (`sparse`). Queries use Qdrant's universal query API:
//! two prefetch branches carrying the same `video_id` filter, fused
//! server-side with `{"fusion": "rrf"}`. The sparse space declares the
//! schema's modifier, so term-frequency vectors get IDF from the server.
//!
//! `QDRANT_API_KEY`, when set, is sent as the `api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{ScoredPayload, StoredRecord};
use crate::normalize::normalize_value;

use super::{
    CollectionSchema, EnsureOutcome, HybridQuery, SparseModifier, VectorIndex, DENSE_VECTOR, SPARSE_VECTOR,
};

const BACKEND: &str = "qdrant";

#[derive(Clone)]
pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config("storage.url must be an http(s) URL".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(key) = std::env::var("QDRANT_API_KEY") {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|_| Error::Config("invalid QDRANT_API_KEY".into()))?;
            headers.insert("api-key", value);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn collection_url(&self, name: &str, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, name, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = request.send().await.map_err(|e| Error::backend(BACKEND, e))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn expect_ok(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(Error::backend(BACKEND, format!("{}: {}", status, body)));
        }
        Ok(body)
    }

    async fn existing_dims(&self, name: &str) -> Result<Option<usize>> {
        let body = self
            .expect_ok(self.client.get(self.collection_url(name, "/exists")))
            .await?;
        if !body["result"]["exists"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        let info = self
            .expect_ok(self.client.get(self.collection_url(name, "")))
            .await?;
        let dims = info["result"]["config"]["params"]["vectors"][DENSE_VECTOR]["size"]
            .as_u64()
            .ok_or_else(|| {
                Error::Config(format!(
                    "collection '{}' exists without a '{}' vector space",
                    name, DENSE_VECTOR
                ))
            })?;
        Ok(Some(dims as usize))
    }

    async fn index_video_field(&self, name: &str) -> Result<()> {
        self.expect_ok(
            self.client
                .put(self.collection_url(name, "/index"))
                .json(&json!({"field_name": "video_id", "field_schema": "keyword"})),
        )
        .await?;
        Ok(())
    }
}

fn video_filter(video_id: Option<&str>) -> Value {
    match video_id {
        Some(v) => json!({"must": [{"key": "video_id", "match": {"value": v}}]}),
        None => Value::Null,
    }
}

/// Create-collection body: a named dense space and a named sparse space
/// carrying the schema's modifier.
fn collection_body(schema: &CollectionSchema) -> Value {
    let sparse = match schema.sparse_modifier {
        SparseModifier::Idf => json!({"modifier": "idf"}),
        SparseModifier::None => json!({}),
    };
    json!({
        "vectors": {
            DENSE_VECTOR: {"size": schema.dense_dims, "distance": schema.distance.as_str()}
        },
        "sparse_vectors": {SPARSE_VECTOR: sparse},
    })
}

/// Translate a hybrid query into the universal query request body.
fn query_body(query: &HybridQuery) -> Value {
    let filter = video_filter(query.video_id.as_deref());
    let mut prefetch = vec![json!({
        "query": query.dense,
        "using": DENSE_VECTOR,
        "limit": query.prefetch_limit,
        "filter": filter,
    })];
    if !query.sparse.is_empty() {
        prefetch.push(json!({
            "query": {"indices": query.sparse.indices, "values": query.sparse.values},
            "using": SPARSE_VECTOR,
            "limit": query.prefetch_limit,
            "filter": filter,
        }));
    }
    json!({
        "prefetch": prefetch,
        "query": {"fusion": "rrf"},
        "limit": query.limit,
        "with_payload": true,
    })
}

fn point_body(record: &StoredRecord) -> Result<Value> {
    Ok(json!({
        "id": record.id.to_string(),
        "vector": {
            DENSE_VECTOR: record.dense,
            SPARSE_VECTOR: {
                "indices": record.sparse.indices,
                "values": record.sparse.values,
            },
        },
        "payload": serde_json::to_value(&record.payload)?,
    }))
}

fn parse_points(body: &Value) -> Vec<ScoredPayload> {
    let points = body["result"]["points"]
        .as_array()
        .or_else(|| body["result"].as_array())
        .cloned()
        .unwrap_or_default();
    points
        .iter()
        .map(|p| {
            let payload = &p["payload"];
            let video_id = payload["video_id"].as_str().unwrap_or_default();
            ScoredPayload {
                id: match &p["id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                score: p["score"].as_f64().unwrap_or(0.0),
                payload: normalize_value(video_id, payload),
            }
        })
        .filter(|sp| !sp.payload.text.is_empty())
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<EnsureOutcome> {
        if let Some(dims) = self.existing_dims(&schema.name).await? {
            schema.check_dims(dims)?;
            return Ok(EnsureOutcome::AlreadyExists);
        }

        let (status, response) = self
            .send(
                self.client
                    .put(self.collection_url(&schema.name, ""))
                    .json(&collection_body(schema)),
            )
            .await?;

        if status.is_success() {
            self.index_video_field(&schema.name).await?;
            info!(collection = %schema.name, dims = schema.dense_dims, "created collection");
            return Ok(EnsureOutcome::Created);
        }
        // Lost a creation race.
        if status == StatusCode::CONFLICT
            || response.to_string().to_lowercase().contains("already exists")
        {
            if let Some(dims) = self.existing_dims(&schema.name).await? {
                schema.check_dims(dims)?;
            }
            return Ok(EnsureOutcome::AlreadyExists);
        }
        Err(Error::backend(BACKEND, format!("{}: {}", status, response)))
    }

    async fn upsert(&self, records: &[StoredRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let points = records.iter().map(point_body).collect::<Result<Vec<_>>>()?;
        self.expect_ok(
            self.client
                .put(self.url("/points?wait=true"))
                .json(&json!({"points": points})),
        )
        .await?;
        debug!(collection = %self.collection, records = records.len(), "upserted batch");
        Ok(records.len())
    }

    async fn query(&self, query: &HybridQuery) -> Result<Vec<ScoredPayload>> {
        let body = self
            .expect_ok(self.client.post(self.url("/points/query")).json(&query_body(query)))
            .await?;
        Ok(parse_points(&body))
    }

    async fn count(&self, video_id: Option<&str>) -> Result<u64> {
        let body = self
            .expect_ok(
                self.client
                    .post(self.url("/points/count"))
                    .json(&json!({"filter": video_filter(video_id), "exact": true})),
            )
            .await?;
        Ok(body["result"]["count"].as_u64().unwrap_or(0))
    }

    async fn delete_video(&self, video_id: &str) -> Result<u64> {
        let existing = self.count(Some(video_id)).await?;
        self.expect_ok(
            self.client
                .post(self.url("/points/delete?wait=true"))
                .json(&json!({"filter": video_filter(Some(video_id))})),
        )
        .await?;
        info!(video_id, removed = existing, "deleted video records");
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, SourceKind, SparseVector};

    fn query(video: Option<&str>, sparse: SparseVector) -> HybridQuery {
        HybridQuery {
            dense: vec![0.1, 0.2],
            sparse,
            prefetch_limit: 30,
            limit: 15,
            video_id: video.map(String::from),
            rrf_k: 60.0,
        }
    }

    #[test]
    fn test_query_body_filters_every_prefetch() {
        let body = query_body(&query(
            Some("abc"),
            SparseVector {
                indices: vec![3],
                values: vec![1.0],
            },
        ));
        let prefetch = body["prefetch"].as_array().unwrap();
        assert_eq!(prefetch.len(), 2);
        for p in prefetch {
            assert_eq!(p["limit"], 30);
            assert_eq!(p["filter"]["must"][0]["key"], "video_id");
            assert_eq!(p["filter"]["must"][0]["match"]["value"], "abc");
        }
        assert_eq!(prefetch[0]["using"], "dense");
        assert_eq!(prefetch[1]["using"], "sparse");
        assert_eq!(body["query"]["fusion"], "rrf");
        assert_eq!(body["limit"], 15);
    }

    #[test]
    fn test_query_body_skips_empty_sparse() {
        let body = query_body(&query(None, SparseVector::default()));
        let prefetch = body["prefetch"].as_array().unwrap();
        assert_eq!(prefetch.len(), 1);
        assert!(prefetch[0]["filter"].is_null());
    }

    #[test]
    fn test_point_body_shape() {
        let record = StoredRecord::new(
            Payload {
                video_id: "v".into(),
                text: "hello".into(),
                kind: SourceKind::Visual,
                start: 30.0,
                end: 30.0,
                frame_ref: Some("frame_00030_000030.jpg".into()),
            },
            vec![1.0, 0.0],
            SparseVector {
                indices: vec![9],
                values: vec![1.0],
            },
        );
        let body = point_body(&record).unwrap();
        assert_eq!(body["vector"]["dense"].as_array().unwrap().len(), 2);
        assert_eq!(body["vector"]["sparse"]["indices"][0], 9);
        assert_eq!(body["payload"]["type"], "visual");
        assert_eq!(body["payload"]["video_id"], "v");
    }

    #[test]
    fn test_parse_points_normalizes_payloads() {
        let body = json!({
            "result": {"points": [
                {"id": "a", "score": 0.5, "payload": {"video_id": "v", "text": "spoken", "type": "audio", "start": 1.0, "end": 2.0}},
                {"id": 7, "score": 0.25, "payload": {"video_id": "v", "page_content": "slide", "metadata": {"timestamp": 30.0}}},
                {"id": "bad", "score": 0.1, "payload": {"video_id": "v"}}
            ]}
        });
        let points = parse_points(&body);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].payload.kind, SourceKind::Audio);
        assert_eq!(points[1].id, "7");
        assert_eq!(points[1].payload.kind, SourceKind::Visual);
    }

    #[test]
    fn test_collection_body_declares_sparse_modifier() {
        let plain = collection_body(&CollectionSchema::new("talks", 384));
        assert_eq!(plain["vectors"]["dense"]["size"], 384);
        assert_eq!(plain["vectors"]["dense"]["distance"], "Cosine");
        assert!(plain["sparse_vectors"]["sparse"]["modifier"].is_null());

        let idf = collection_body(&CollectionSchema::new("talks", 384).with_sparse_modifier(SparseModifier::Idf));
        assert_eq!(idf["sparse_vectors"]["sparse"]["modifier"], "idf");
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(QdrantIndex::new("localhost:6333", "c").is_err());
    }
}
