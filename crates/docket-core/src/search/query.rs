//! Structured query model.
//!
//! `Query` is what the engine hands to an `Indexer`. It converts to and from the
//! JSON query DSL understood by the search backend, so query templates written
//! by users go through the same model as the queries the engine builds itself.

use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Bool(BoolQuery),
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Prefix { field: String, value: String },
    Match { field: String, text: String },
    MatchPhrase { field: String, text: String, slop: u32 },
    /// Free text with boolean operators (see `search::query_string`).
    QueryString {
        query: String,
        fuzziness: u32,
        default_field: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    pub filter: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }
}

impl From<BoolQuery> for Query {
    fn from(query: BoolQuery) -> Self {
        Query::Bool(query)
    }
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Prefix {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Every `QueryString` clause in this query, depth first.
    pub fn query_strings(&self) -> Vec<&str> {
        let mut found = Vec::new();
        self.collect_query_strings(&mut found);
        found
    }

    fn collect_query_strings<'a>(&'a self, found: &mut Vec<&'a str>) {
        match self {
            Query::QueryString { query, .. } => found.push(query),
            Query::Bool(b) => {
                for q in b.must.iter().chain(&b.should).chain(&b.must_not).chain(&b.filter) {
                    q.collect_query_strings(found);
                }
            }
            _ => {}
        }
    }

    /// Render as the backend's JSON query DSL.
    pub fn to_dsl(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Bool(b) => {
                let mut body = Map::new();
                for (key, clauses) in [
                    ("must", &b.must),
                    ("should", &b.should),
                    ("must_not", &b.must_not),
                    ("filter", &b.filter),
                ] {
                    if !clauses.is_empty() {
                        body.insert(
                            key.to_string(),
                            Value::Array(clauses.iter().map(Query::to_dsl).collect()),
                        );
                    }
                }
                json!({ "bool": body })
            }
            Query::Term { field, value } => json!({ "term": { field: value } }),
            Query::Terms { field, values } => json!({ "terms": { field: values } }),
            Query::Prefix { field, value } => json!({ "prefix": { field: value } }),
            Query::Match { field, text } => json!({ "match": { field: text } }),
            Query::MatchPhrase { field, text, slop } => {
                json!({ "match_phrase": { field: { "query": text, "slop": slop } } })
            }
            Query::QueryString {
                query,
                fuzziness,
                default_field,
            } => {
                let mut body = Map::new();
                body.insert("query".into(), json!(query));
                body.insert("fuzziness".into(), json!(fuzziness));
                if let Some(field) = default_field {
                    body.insert("default_field".into(), json!(field));
                }
                json!({ "query_string": body })
            }
        }
    }

    /// Parse a JSON query DSL body. The error is a human readable parser detail.
    pub fn from_dsl(value: &Value) -> Result<Query, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("query must be an object, got {value}"))?;
        let mut entries = object.iter();
        let (kind, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => return Err("query object is empty".to_string()),
            (Some(_), Some((extra, _))) => {
                return Err(format!("[{extra}] malformed query, expected a single query type"));
            }
        };

        match kind.as_str() {
            "match_all" => Ok(Query::MatchAll),
            "bool" => parse_bool(body),
            "term" => {
                let (field, value) = single_field(kind, body)?;
                let value = match value {
                    Value::Object(o) => o
                        .get("value")
                        .cloned()
                        .ok_or_else(|| format!("[term] query on [{field}] has no [value]"))?,
                    other => other.clone(),
                };
                Ok(Query::Term { field, value })
            }
            "terms" => {
                let (field, value) = single_field(kind, body)?;
                let values = value
                    .as_array()
                    .ok_or_else(|| format!("[terms] query on [{field}] expects an array"))?
                    .clone();
                Ok(Query::Terms { field, values })
            }
            "prefix" => {
                let (field, value) = single_field(kind, body)?;
                let value = match value {
                    Value::Object(o) => o.get("value").cloned().unwrap_or(Value::Null),
                    other => other.clone(),
                };
                let value = value
                    .as_str()
                    .ok_or_else(|| format!("[prefix] query on [{field}] expects a string"))?
                    .to_string();
                Ok(Query::Prefix { field, value })
            }
            "match" => {
                let (field, value) = single_field(kind, body)?;
                let text = text_of(kind, &field, value)?;
                Ok(Query::Match { field, text })
            }
            "match_phrase" => {
                let (field, value) = single_field(kind, body)?;
                let text = text_of(kind, &field, value)?;
                let slop = value
                    .get("slop")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                Ok(Query::MatchPhrase { field, text, slop })
            }
            "query_string" => {
                let query = body
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "[query_string] requires a [query] string".to_string())?
                    .to_string();
                let fuzziness = match body.get("fuzziness") {
                    None => 0,
                    Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
                    Some(Value::String(s)) if s.eq_ignore_ascii_case("auto") => 2,
                    Some(Value::String(s)) => s
                        .parse()
                        .map_err(|_| format!("[query_string] invalid fuzziness [{s}]"))?,
                    Some(other) => return Err(format!("[query_string] invalid fuzziness [{other}]")),
                };
                let default_field = body
                    .get("default_field")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Query::QueryString {
                    query,
                    fuzziness,
                    default_field,
                })
            }
            other => Err(format!("unknown query [{other}]")),
        }
    }
}

fn parse_bool(body: &Value) -> Result<Query, String> {
    let object = body
        .as_object()
        .ok_or_else(|| "[bool] query must be an object".to_string())?;
    let mut query = BoolQuery::new();
    for (occur, clauses) in object {
        let clauses = match clauses {
            Value::Array(items) => items
                .iter()
                .map(Query::from_dsl)
                .collect::<Result<Vec<_>, _>>()?,
            single => vec![Query::from_dsl(single)?],
        };
        match occur.as_str() {
            "must" => query.must.extend(clauses),
            "should" => query.should.extend(clauses),
            "must_not" => query.must_not.extend(clauses),
            "filter" => query.filter.extend(clauses),
            other => return Err(format!("[bool] query does not support [{other}]")),
        }
    }
    Ok(Query::Bool(query))
}

fn single_field<'a>(kind: &str, body: &'a Value) -> Result<(String, &'a Value), String> {
    let object = body
        .as_object()
        .ok_or_else(|| format!("[{kind}] query must be an object"))?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((field, value)), None) => Ok((field.clone(), value)),
        _ => Err(format!("[{kind}] query expects exactly one field")),
    }
}

fn text_of(kind: &str, field: &str, value: &Value) -> Result<String, String> {
    let text = match value {
        Value::Object(o) => o.get("query").and_then(Value::as_str),
        other => other.as_str(),
    };
    text.map(str::to_string)
        .ok_or_else(|| format!("[{kind}] query on [{field}] expects a text"))
}
