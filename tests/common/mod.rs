//! In-memory search backend evaluating queries over JSON documents

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploy_notifier::query::{Query, SearchRequest, TermsAggregation};
use deploy_notifier::{Config, Result, SearchBackend, SearchResponse};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryBackend {
    indices: HashMap<String, Vec<Value>>,
    queried: Mutex<Vec<Vec<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: &str, document: Value) {
        self.indices
            .entry(index.to_string())
            .or_default()
            .push(document);
    }

    /// Every index list passed to `count` or `search`, in call order
    pub fn queried_indices(&self) -> Vec<Vec<String>> {
        self.queried.lock().unwrap().clone()
    }

    fn matching(&self, indices: &[String], query: Option<&Query>) -> Vec<Value> {
        self.queried.lock().unwrap().push(indices.to_vec());

        indices
            .iter()
            .filter_map(|index| self.indices.get(index))
            .flatten()
            .filter(|doc| query.is_none_or(|q| matches(q, doc)))
            .cloned()
            .collect()
    }
}

fn field<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    doc.get(name.trim_end_matches(".keyword"))
}

fn field_string(doc: &Value, name: &str) -> Option<String> {
    field(doc, name).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn parse_instant(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| panic!("bad timestamp {}: {}", value, e))
}

fn matches(query: &Query, doc: &Value) -> bool {
    match query {
        Query::Term(term) => field_string(doc, &term.field).as_deref() == Some(term.value.as_str()),
        Query::Range(range) => {
            let Some(at) = field_string(doc, &range.field).map(|s| parse_instant(&s)) else {
                return false;
            };
            range.gte.as_deref().is_none_or(|b| at >= parse_instant(b))
                && range.gt.as_deref().is_none_or(|b| at > parse_instant(b))
                && range.lte.as_deref().is_none_or(|b| at <= parse_instant(b))
                && range.lt.as_deref().is_none_or(|b| at < parse_instant(b))
        }
        Query::Bool(bool_query) => {
            bool_query.must.iter().all(|q| matches(q, doc))
                && bool_query.filter.iter().all(|q| matches(q, doc))
                && !bool_query.must_not.iter().any(|q| matches(q, doc))
        }
    }
}

fn aggregate(aggregation: &TermsAggregation, docs: &[Value]) -> Value {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for doc in docs {
        if let Some(key) = field_string(doc, &aggregation.field) {
            groups.entry(key).or_default().push(doc.clone());
        }
    }

    let mut groups: Vec<(String, Vec<Value>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    groups.truncate(aggregation.size.unwrap_or(10));

    let buckets: Vec<Value> = groups
        .iter()
        .map(|(key, members)| {
            let mut bucket = Map::new();
            bucket.insert("key".to_string(), json!(key));
            bucket.insert("doc_count".to_string(), json!(members.len()));
            for (name, sub) in &aggregation.sub_aggregations {
                bucket.insert(name.clone(), aggregate(sub, members));
            }
            Value::Object(bucket)
        })
        .collect();

    json!({ "doc_count_error_upper_bound": 0, "sum_other_doc_count": 0, "buckets": buckets })
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn count(&self, indices: &[String], query: &Query) -> Result<u64> {
        Ok(self.matching(indices, Some(query)).len() as u64)
    }

    async fn search(&self, indices: &[String], request: &SearchRequest) -> Result<SearchResponse> {
        let mut docs = self.matching(indices, request.query.as_ref());
        let total = docs.len();

        for sort in request.sort.iter().rev() {
            docs.sort_by(|a, b| {
                let ordering = field_string(a, &sort.field).cmp(&field_string(b, &sort.field));
                if sort.ascending { ordering } else { ordering.reverse() }
            });
        }

        let mut aggregations = Map::new();
        for (name, aggregation) in &request.aggregations {
            aggregations.insert(name.clone(), aggregate(aggregation, &docs));
        }

        let hits: Vec<Value> = docs
            .iter()
            .take(request.size.unwrap_or(10))
            .map(|doc| json!({ "_index": "memory", "_id": "", "_source": doc }))
            .collect();

        let response = json!({
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits },
            "aggregations": aggregations
        });
        Ok(serde_json::from_value(response)?)
    }
}

/// A deploy document as the indexer writes it
pub fn deploy(timestamp: &str, user: &str, production: bool, state: &str) -> Value {
    json!({
        "@timestamp": timestamp,
        "finish_timestamp": timestamp,
        "user": user,
        "msg": format!("deploy by {}", user),
        "tags": "",
        "build": "b-1",
        "datacenter": "dc1",
        "annotags": "",
        "apps": ["api"],
        "production": if production { "true" } else { "false" },
        "state": state,
        "namespace": "default"
    })
}

/// A valid configuration pointing nowhere in particular
pub fn test_config() -> Config {
    Config {
        index_prefix: "deploy".to_string(),
        webhook_url: "http://127.0.0.1:9/hook".to_string(),
        channel: "#deploys".to_string(),
        ..Config::default()
    }
}
