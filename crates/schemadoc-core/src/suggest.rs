//! Suggested questions.
//!
//! Suggestions are derived from the dictionary itself, never from provider
//! output, so every table or column they name exists in the snapshot.

use std::collections::HashSet;

use crate::context::mentioned_tables;
use crate::models::{ChatTurn, Dictionary, IssueKind, QuestionCategory, SuggestedQuestion};

const MIN_FOLLOW_UPS: usize = 2;
const MAX_FOLLOW_UPS: usize = 5;
const MAX_STARTERS: usize = 6;

fn push_unique(out: &mut Vec<SuggestedQuestion>, q: SuggestedQuestion) {
    if !out.iter().any(|existing| existing.question == q.question) {
        out.push(q);
    }
}

/// Two to five follow-ups for the question just answered.
///
/// Preference order: relationships from the tables in focus to tables not
/// yet discussed, tables not yet discussed, the worst null-value issue, an
/// analysis question about the focus table. Short lists are padded with
/// column questions about real tables.
pub fn follow_up_questions(
    dictionary: &Dictionary,
    question: &str,
    history: &[ChatTurn],
) -> Vec<SuggestedQuestion> {
    let snapshot = &dictionary.metadata;
    let focus = mentioned_tables(question, snapshot);
    let mut explored: HashSet<String> = focus.iter().cloned().collect();
    for turn in history {
        explored.extend(mentioned_tables(&turn.content, snapshot));
    }

    let mut out = Vec::new();
    let relationships = snapshot.relationships();

    for rel in relationships.iter().filter(|r| !r.dangling) {
        let from_focus = focus.contains(&rel.from_table);
        let to_focus = focus.contains(&rel.to_table);
        let other = match (from_focus, to_focus) {
            (true, false) => &rel.to_table,
            (false, true) => &rel.from_table,
            _ => continue,
        };
        if explored.contains(other) {
            continue;
        }
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!(
                    "How are {} and {} related through {}?",
                    rel.from_table, rel.to_table, rel.edge_label()
                ),
                QuestionCategory::Relationships,
            ),
        );
    }

    for table in snapshot.tables.iter().filter(|t| !explored.contains(&t.name)) {
        if out.len() >= MAX_FOLLOW_UPS - 1 {
            break;
        }
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("What does the {} table contain?", table.name),
                QuestionCategory::Schema,
            ),
        );
    }

    if let Some(ranked) = dictionary
        .top_issues(usize::MAX)
        .into_iter()
        .find(|r| r.issue.kind == IssueKind::NullValues && r.issue.column.is_some())
    {
        if let Some(column) = &ranked.issue.column {
            push_unique(
                &mut out,
                SuggestedQuestion::new(
                    format!(
                        "Why does {}.{} have so many null values?",
                        ranked.table, column
                    ),
                    QuestionCategory::Quality,
                ),
            );
        }
    }

    if let Some(table) = focus.first() {
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("Which columns of {} are most useful for analysis?", table),
                QuestionCategory::Analysis,
            ),
        );
    }

    for table in &snapshot.tables {
        if out.len() >= MIN_FOLLOW_UPS {
            break;
        }
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("What columns does {} have?", table.name),
                QuestionCategory::Schema,
            ),
        );
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("What does the {} table contain?", table.name),
                QuestionCategory::Schema,
            ),
        );
    }

    out.truncate(MAX_FOLLOW_UPS);
    out
}

/// Up to six questions for a dictionary nobody has asked about yet.
pub fn starter_questions(dictionary: &Dictionary) -> Vec<SuggestedQuestion> {
    let snapshot = &dictionary.metadata;
    let mut out = Vec::new();

    if let Some(first) = snapshot.tables.first() {
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("What does the {} table contain?", first.name),
                QuestionCategory::Schema,
            ),
        );
    }

    let relationships = snapshot.relationships();
    if let Some(rel) = relationships.iter().find(|r| !r.dangling) {
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("How are {} and {} related?", rel.from_table, rel.to_table),
                QuestionCategory::Relationships,
            ),
        );
    }

    let worst = dictionary
        .top_issues(1)
        .into_iter()
        .next()
        .and_then(|r| r.issue.column.as_ref().map(|c| (r.table, c.clone())));
    match worst {
        Some((table, column)) => push_unique(
            &mut out,
            SuggestedQuestion::new(
                format!("Why does {}.{} have so many null values?", table, column),
                QuestionCategory::Quality,
            ),
        ),
        None if dictionary.quality_metrics.is_some() => push_unique(
            &mut out,
            SuggestedQuestion::new(
                "What are the data quality issues in this database?",
                QuestionCategory::Quality,
            ),
        ),
        None => {}
    }

    push_unique(
        &mut out,
        SuggestedQuestion::new(
            "Which tables have the most columns?",
            QuestionCategory::Analysis,
        ),
    );
    if !relationships.is_empty() {
        push_unique(
            &mut out,
            SuggestedQuestion::new(
                "Which tables have foreign key relationships?",
                QuestionCategory::Relationships,
            ),
        );
    }
    push_unique(
        &mut out,
        SuggestedQuestion::new(
            "Give me an overview of this database",
            QuestionCategory::General,
        ),
    );
    push_unique(
        &mut out,
        SuggestedQuestion::new("What are the primary key columns?", QuestionCategory::Schema),
    );

    out.truncate(MAX_STARTERS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, DictionaryParts};
    use crate::models::{
        ChatRole, ColumnMeta, ForeignKey, GenerationReport, QualityIssue, SchemaSnapshot,
        Severity, TableMeta, TableQuality,
    };
    use crate::types::{DataType, Dialect};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn table(name: &str, fks: &[(&str, &str)]) -> TableMeta {
        TableMeta {
            name: name.to_string(),
            columns: vec![ColumnMeta {
                name: "id".to_string(),
                data_type: DataType::Integer,
                declared_type: "integer".to_string(),
                nullable: false,
                default: None,
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: fks
                .iter()
                .map(|(c, t)| ForeignKey {
                    column: c.to_string(),
                    referenced_table: t.to_string(),
                    referenced_column: "id".to_string(),
                    dangling: false,
                })
                .collect(),
            indexes: vec![],
            row_count: Some(1),
        }
    }

    fn dict(tables: Vec<TableMeta>, quality: Option<BTreeMap<String, TableQuality>>) -> Dictionary {
        assemble(
            DictionaryParts {
                connection_id: "c".to_string(),
                database_name: "shop".to_string(),
                dialect: Dialect::Sqlite,
                snapshot: SchemaSnapshot::from_tables(tables),
                quality,
                descriptions: None,
                report: GenerationReport::default(),
            },
            "d".to_string(),
            Utc::now(),
        )
    }

    fn shop() -> Dictionary {
        dict(
            vec![
                table("customers", &[]),
                table("orders", &[("customer_id", "customers")]),
                table("order_items", &[("order_id", "orders"), ("product_id", "products")]),
                table("products", &[]),
            ],
            None,
        )
    }

    fn names_real_table(d: &Dictionary, q: &SuggestedQuestion) -> bool {
        !mentioned_tables(&q.question, &d.metadata).is_empty()
    }

    #[test]
    fn follow_ups_point_at_unexplored_neighbors() {
        let d = shop();
        let qs = follow_up_questions(&d, "what is in orders?", &[]);
        assert!((2..=5).contains(&qs.len()));
        assert!(qs
            .iter()
            .any(|q| q.question.contains("orders.customer_id -> customers.id")));
        assert!(qs.iter().all(|q| names_real_table(&d, q)));
        assert!(!qs
            .iter()
            .any(|q| q.question == "What does the orders table contain?"));
    }

    #[test]
    fn follow_ups_skip_tables_already_discussed() {
        let d = shop();
        let history = vec![ChatTurn {
            role: ChatRole::User,
            content: "tell me about customers".to_string(),
            timestamp: None,
        }];
        let qs = follow_up_questions(&d, "and orders?", &history);
        assert!(!qs
            .iter()
            .any(|q| q.question == "What does the customers table contain?"));
    }

    #[test]
    fn follow_ups_never_fall_below_two() {
        let d = dict(vec![table("only", &[])], None);
        let qs = follow_up_questions(&d, "what is in only?", &[]);
        assert!(qs.len() >= 2);
        assert!(qs.iter().all(|q| q.question.contains("only")));
    }

    #[test]
    fn worst_null_column_becomes_a_quality_question() {
        let mut quality = BTreeMap::new();
        quality.insert(
            "orders".to_string(),
            TableQuality {
                overall_quality_score: 70.0,
                completeness: 70.0,
                uniqueness: 100.0,
                null_penalty_score: 50.0,
                total_rows: 2000,
                sampled: false,
                empty: false,
                scored: true,
                analyzed_columns: 2,
                columns: BTreeMap::new(),
                issues: vec![QualityIssue {
                    severity: Severity::High,
                    kind: IssueKind::NullValues,
                    column: Some("discount".to_string()),
                    null_count: Some(1205),
                    message: "discount has 60.3% null values".to_string(),
                }],
                freshness: None,
            },
        );
        let d = dict(
            vec![
                table("customers", &[]),
                table("orders", &[("customer_id", "customers")]),
            ],
            Some(quality),
        );
        let starters = starter_questions(&d);
        assert!(starters.len() <= 6);
        assert!(starters.iter().any(|q| q.category == QuestionCategory::Quality
            && q.question.contains("orders.discount")));
    }

    #[test]
    fn starters_cap_at_six() {
        let qs = starter_questions(&shop());
        assert_eq!(qs.len(), 6);
        assert_eq!(qs[0].question, "What does the customers table contain?");
        assert_eq!(qs[1].question, "How are orders and customers related?");
    }
}
