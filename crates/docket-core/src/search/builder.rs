//! Builds the structured query for one query string of a batch.

use serde_json::Value;

use super::query::{BoolQuery, Query};
use super::query_string;
use crate::domain::BatchSearch;
use crate::error::SearchError;

pub const QUERY_PLACEHOLDER: &str = "<query>";
pub const CONTENT_FIELD: &str = "content";

/// Filters shared by every query of the batch plus the text clause for `query`.
pub fn build_query(batch: &BatchSearch, query: &str) -> Result<Query, SearchError> {
    let mut root = BoolQuery::new()
        .filter(Query::term("type", "Document"))
        .must_not(Query::term("deleted", true));

    if !batch.file_types.is_empty() {
        root = root.filter(Query::terms("content_type", batch.file_types.iter().cloned()));
    }
    if !batch.paths.is_empty() {
        let any_path = batch
            .paths
            .iter()
            .fold(BoolQuery::new(), |b, path| b.should(Query::prefix("path", path.clone())));
        root = root.filter(any_path.into());
    }

    Ok(root.must(text_clause(batch, query)?).into())
}

fn text_clause(batch: &BatchSearch, query: &str) -> Result<Query, SearchError> {
    if let Some(template) = &batch.query_template {
        return from_template(template, query, batch.fuzziness);
    }
    if batch.phrase_matches {
        return Ok(Query::MatchPhrase {
            field: CONTENT_FIELD.to_string(),
            text: query.to_string(),
            slop: batch.slop,
        });
    }
    validate_query_string(query)?;
    Ok(Query::QueryString {
        query: query.to_string(),
        fuzziness: batch.fuzziness,
        default_field: Some(CONTENT_FIELD.to_string()),
    })
}

fn from_template(template: &str, query: &str, fuzziness: u32) -> Result<Query, SearchError> {
    let body = template.replace(QUERY_PLACEHOLDER, &json_escape(query));
    let parse_error = |detail: String| SearchError::QueryParse {
        query: query.to_string(),
        detail,
    };
    let value: Value = serde_json::from_str(&body).map_err(|e| parse_error(e.to_string()))?;
    let parsed = Query::from_dsl(&value).map_err(parse_error)?;
    for embedded in parsed.query_strings() {
        validate_query_string(embedded)?;
    }
    Ok(with_default_fuzziness(parsed, fuzziness))
}

/// Template query strings without their own fuzziness take the batch's.
fn with_default_fuzziness(query: Query, fuzziness: u32) -> Query {
    match query {
        Query::QueryString {
            query,
            fuzziness: 0,
            default_field,
        } => Query::QueryString {
            query,
            fuzziness,
            default_field,
        },
        Query::Bool(b) => {
            let map = |clauses: Vec<Query>| {
                clauses
                    .into_iter()
                    .map(|q| with_default_fuzziness(q, fuzziness))
                    .collect()
            };
            Query::Bool(BoolQuery {
                must: map(b.must),
                should: map(b.should),
                must_not: map(b.must_not),
                filter: map(b.filter),
            })
        }
        other => other,
    }
}

pub fn validate_query_string(query: &str) -> Result<(), SearchError> {
    query_string::parse(query)
        .map(|_| ())
        .map_err(|detail| SearchError::QueryParse {
            query: query.to_string(),
            detail,
        })
}

/// Escaped string body, without the surrounding quotes.
fn json_escape(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, Project, User};
    use chrono::Utc;

    fn batch(queries: &[&str]) -> BatchSearch {
        BatchSearch::new(
            BatchId::new("b1"),
            vec![Project::new("test-project")],
            "name",
            queries.iter().copied(),
            User::local(),
            Utc::now(),
        )
    }

    #[test]
    fn free_text_query_is_validated_up_front() {
        let err = build_query(&batch(&["AND mydoc"]), "AND mydoc").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse query [AND mydoc]"), "{err}");
    }

    #[test]
    fn filters_are_added_for_file_types_and_paths() {
        let batch = batch(&["mydoc"])
            .with_file_types(["application/pdf"])
            .with_paths(["/a", "/b"]);
        let Query::Bool(root) = build_query(&batch, "mydoc").unwrap() else {
            panic!("expected a bool query");
        };
        assert!(root.filter.contains(&Query::terms("content_type", ["application/pdf"])));
        assert!(root.filter.contains(&Query::Bool(
            BoolQuery::new()
                .should(Query::prefix("path", "/a"))
                .should(Query::prefix("path", "/b"))
        )));
        assert_eq!(root.must_not, vec![Query::term("deleted", true)]);
    }

    #[test]
    fn phrase_mode_uses_the_batch_slop() {
        let batch = batch(&["find mydoc"]).with_phrase_matches(2);
        let Query::Bool(root) = build_query(&batch, "find mydoc").unwrap() else {
            panic!("expected a bool query");
        };
        assert_eq!(
            root.must,
            vec![Query::MatchPhrase {
                field: "content".into(),
                text: "find mydoc".into(),
                slop: 2
            }]
        );
    }

    #[test]
    fn template_placeholder_is_substituted_with_an_escaped_query() {
        let template = r#"{"bool":{"must":[{"query_string":{"query":"<query>"}}]}}"#;
        let batch = batch(&["say \"hi\""]).with_query_template(template).with_fuzziness(1);
        let query = build_query(&batch, "say \"hi\"").unwrap();
        assert_eq!(query.query_strings(), vec!["say \"hi\""]);
        assert!(query.to_dsl().to_string().contains(r#""fuzziness":1"#));
    }

    #[test]
    fn broken_template_is_a_parse_error() {
        let batch = batch(&["mydoc"]).with_query_template(r#"{"bool": <query>"#);
        let err = build_query(&batch, "mydoc").unwrap_err();
        assert!(matches!(err, SearchError::QueryParse { .. }));
    }
}
