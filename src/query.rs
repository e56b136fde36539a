//! Fluent builders for the Elasticsearch query DSL

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

/// A query clause
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Term(TermQuery),
    Range(RangeQuery),
    Bool(BoolQuery),
}

impl Query {
    pub fn to_json(&self) -> Value {
        match self {
            Query::Term(term) => json!({
                "term": { term.field.as_str(): { "value": term.value } }
            }),
            Query::Range(range) => {
                let mut bounds = Map::new();
                if let Some(gte) = &range.gte {
                    bounds.insert("gte".to_string(), json!(gte));
                }
                if let Some(gt) = &range.gt {
                    bounds.insert("gt".to_string(), json!(gt));
                }
                if let Some(lte) = &range.lte {
                    bounds.insert("lte".to_string(), json!(lte));
                }
                if let Some(lt) = &range.lt {
                    bounds.insert("lt".to_string(), json!(lt));
                }
                if let Some(time_zone) = &range.time_zone {
                    bounds.insert("time_zone".to_string(), json!(time_zone));
                }
                json!({ "range": { range.field.as_str(): bounds } })
            }
            Query::Bool(bool_query) => {
                let mut clauses = Map::new();
                for (name, queries) in [
                    ("must", &bool_query.must),
                    ("must_not", &bool_query.must_not),
                    ("filter", &bool_query.filter),
                ] {
                    if !queries.is_empty() {
                        let rendered: Vec<Value> = queries.iter().map(Query::to_json).collect();
                        clauses.insert(name.to_string(), Value::Array(rendered));
                    }
                }
                json!({ "bool": clauses })
            }
        }
    }
}

/// Exact match on a keyword field
#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    pub field: String,
    pub value: String,
}

impl TermQuery {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Range over a date field, bounds rendered as RFC 3339
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub field: String,
    pub gte: Option<String>,
    pub gt: Option<String>,
    pub lte: Option<String>,
    pub lt: Option<String>,
    pub time_zone: Option<String>,
}

impl RangeQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gte: None,
            gt: None,
            lte: None,
            lt: None,
            time_zone: None,
        }
    }

    pub fn gte(mut self, at: DateTime<Utc>) -> Self {
        self.gte = Some(format_instant(at));
        self
    }

    pub fn gt(mut self, at: DateTime<Utc>) -> Self {
        self.gt = Some(format_instant(at));
        self
    }

    pub fn lte(mut self, at: DateTime<Utc>) -> Self {
        self.lte = Some(format_instant(at));
        self
    }

    pub fn lt(mut self, at: DateTime<Utc>) -> Self {
        self.lt = Some(format_instant(at));
        self
    }

    pub fn time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }
}

/// Boolean combination of clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub filter: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: impl Into<Query>) -> Self {
        self.must.push(query.into());
        self
    }

    pub fn must_not(mut self, query: impl Into<Query>) -> Self {
        self.must_not.push(query.into());
        self
    }

    pub fn filter(mut self, query: impl Into<Query>) -> Self {
        self.filter.push(query.into());
        self
    }
}

impl From<TermQuery> for Query {
    fn from(query: TermQuery) -> Self {
        Query::Term(query)
    }
}

impl From<RangeQuery> for Query {
    fn from(query: RangeQuery) -> Self {
        Query::Range(query)
    }
}

impl From<BoolQuery> for Query {
    fn from(query: BoolQuery) -> Self {
        Query::Bool(query)
    }
}

/// Terms bucket aggregation, optionally nested
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    pub field: String,
    pub size: Option<usize>,
    pub sub_aggregations: Vec<(String, TermsAggregation)>,
}

impl TermsAggregation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            size: None,
            sub_aggregations: Vec::new(),
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sub_aggregation(mut self, name: impl Into<String>, aggregation: TermsAggregation) -> Self {
        self.sub_aggregations.push((name.into(), aggregation));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut terms = Map::new();
        terms.insert("field".to_string(), json!(self.field));
        if let Some(size) = self.size {
            terms.insert("size".to_string(), json!(size));
        }

        let mut body = Map::new();
        body.insert("terms".to_string(), Value::Object(terms));
        if !self.sub_aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_json(&self.sub_aggregations));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub ascending: bool,
}

/// Body of a `_search` request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: Option<Query>,
    pub size: Option<usize>,
    pub sort: Vec<SortField>,
    pub aggregations: Vec<(String, TermsAggregation)>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            ascending,
        });
        self
    }

    pub fn aggregation(mut self, name: impl Into<String>, aggregation: TermsAggregation) -> Self {
        self.aggregations.push((name.into(), aggregation));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.to_json());
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| {
                    let order = if s.ascending { "asc" } else { "desc" };
                    json!({ s.field.as_str(): { "order": order } })
                })
                .collect();
            body.insert("sort".to_string(), Value::Array(sort));
        }
        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_json(&self.aggregations));
        }
        Value::Object(body)
    }
}

/// Body of a `_count` request
pub fn count_body(query: &Query) -> Value {
    json!({ "query": query.to_json() })
}

fn aggregations_json(aggregations: &[(String, TermsAggregation)]) -> Value {
    let mut aggs = Map::new();
    for (name, aggregation) in aggregations {
        aggs.insert(name.clone(), aggregation.to_json());
    }
    Value::Object(aggs)
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
