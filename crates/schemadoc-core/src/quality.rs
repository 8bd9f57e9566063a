//! Quality scoring.
//!
//! Adapters return raw [`ColumnStats`]; everything numeric that ends up in a
//! [`TableQuality`] is computed here so the score is a pure function of the
//! measurements and the configured weights.
//!
//! # Formula
//!
//! ```text
//! null_percentage   = round1(null_count / sampled_rows × 100)
//! completeness      = 100 − mean(null_percentage over measured columns)
//! uniqueness        = 100 × distinct / sampled   (single-column PK)
//!                   = 100                        (composite or missing PK)
//! null_penalty      = 100 × (1 − share of measured columns > 50% null)
//!
//! overall = clamp(w_c × completeness + w_u × uniqueness + w_n × null_penalty, 0, 100)
//! ```
//!
//! Default weights are 0.6 / 0.25 / 0.15. A table with no rows scores 100
//! everywhere and is flagged `empty`. A table with rows where no column could
//! be measured scores 0, is flagged `scored = false` and carries an
//! [`IssueKind::Unmeasured`] issue.
//!
//! Freshness (the latest value of the first temporal column) is reported
//! alongside the scores and never weighted into them.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{
    ColumnMeta, ColumnMetric, ColumnQuality, IssueKind, QualityIssue, Severity, TableMeta,
    TableQuality,
};
use crate::types::DataType;

/// Columns more than this share null count against the null-penalty term.
const NULL_PENALTY_THRESHOLD: f64 = 50.0;
const LOW_SCORE_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_completeness_weight")]
    pub completeness: f64,
    #[serde(default = "default_uniqueness_weight")]
    pub uniqueness: f64,
    #[serde(default = "default_null_penalty_weight")]
    pub null_penalty: f64,
}

fn default_completeness_weight() -> f64 {
    0.6
}
fn default_uniqueness_weight() -> f64 {
    0.25
}
fn default_null_penalty_weight() -> f64 {
    0.15
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: default_completeness_weight(),
            uniqueness: default_uniqueness_weight(),
            null_penalty: default_null_penalty_weight(),
        }
    }
}

impl QualityWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("completeness", self.completeness),
            ("uniqueness", self.uniqueness),
            ("null_penalty", self.null_penalty),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("quality.weights.{} must be in [0.0, 1.0]", name);
            }
        }
        let sum = self.completeness + self.uniqueness + self.null_penalty;
        if (sum - 1.0).abs() > 0.001 {
            bail!("quality.weights must sum to 1.0 (got {:.3})", sum);
        }
        Ok(())
    }
}

/// Tuning for the quality analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    /// Only the first N columns of a table are probed.
    #[serde(default = "default_max_columns")]
    pub max_columns_per_table: usize,
    /// Tables with more rows than this are sampled instead of scanned.
    #[serde(default = "default_sample_threshold")]
    pub sample_threshold_rows: u64,
    /// Target sample size for large tables.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: u64,
    /// Per-query ceiling for sampling queries.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    /// Null percentage above which a column is reported as an issue.
    #[serde(default = "default_null_issue_threshold")]
    pub null_issue_threshold: f64,
    #[serde(default)]
    pub weights: QualityWeights,
}

fn default_max_columns() -> usize {
    50
}
fn default_sample_threshold() -> u64 {
    100_000
}
fn default_sample_rows() -> u64 {
    10_000
}
fn default_query_timeout() -> u64 {
    15
}
fn default_null_issue_threshold() -> f64 {
    40.0
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            max_columns_per_table: default_max_columns(),
            sample_threshold_rows: default_sample_threshold(),
            sample_rows: default_sample_rows(),
            query_timeout_secs: default_query_timeout(),
            null_issue_threshold: default_null_issue_threshold(),
            weights: QualityWeights::default(),
        }
    }
}

impl QualitySettings {
    /// Row limit for sampling, or `None` for a full scan.
    ///
    /// Unknown row counts are treated as large.
    pub fn sample_limit(&self, row_count: Option<u64>) -> Option<u64> {
        match row_count {
            Some(n) if n <= self.sample_threshold_rows => None,
            _ => Some(self.sample_rows),
        }
    }
}

/// Raw aggregate result of one sampling query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnStats {
    pub sampled_rows: u64,
    pub null_count: u64,
    pub distinct_count: Option<u64>,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
}

/// `null_count / sampled × 100`, rounded half-up to one decimal.
///
/// Integer arithmetic keeps `1205 / 2000` at exactly 60.3.
pub fn null_percentage(null_count: u64, sampled: u64) -> f64 {
    if sampled == 0 {
        return 0.0;
    }
    let nulls = null_count.min(sampled) as u128;
    let sampled = sampled as u128;
    let tenths = (nulls * 2000 + sampled) / (2 * sampled);
    tenths as f64 / 10.0
}

pub fn column_quality(stats: &ColumnStats, estimated: bool) -> ColumnQuality {
    ColumnQuality {
        null_count: stats.null_count,
        null_percentage: null_percentage(stats.null_count, stats.sampled_rows),
        distinct_count: stats.distinct_count,
        estimated,
        sampled_rows: stats.sampled_rows,
        min_value: stats.min_value.clone(),
        max_value: stats.max_value.clone(),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 100.0)
}

/// `100 − mean(null_percentage)` over measured columns; 100 when none were measured.
pub fn completeness<'a>(measured: impl IntoIterator<Item = &'a ColumnQuality>) -> f64 {
    let pcts: Vec<f64> = measured.into_iter().map(|q| q.null_percentage).collect();
    if pcts.is_empty() {
        return 100.0;
    }
    let mean = pcts.iter().sum::<f64>() / pcts.len() as f64;
    clamp_score(round2(100.0 - mean))
}

fn pk_uniqueness(table: &TableMeta, columns: &BTreeMap<String, ColumnMetric>) -> f64 {
    let [pk] = table.primary_key.as_slice() else {
        return 100.0;
    };
    let Some(q) = columns.get(pk).and_then(ColumnMetric::measured) else {
        return 100.0;
    };
    match q.distinct_count {
        Some(_) if q.sampled_rows == 0 => 100.0,
        Some(d) if d >= q.sampled_rows => 100.0,
        Some(d) => clamp_score(round2(d as f64 / q.sampled_rows as f64 * 100.0)),
        None => 100.0,
    }
}

/// Roll per-column metrics into a [`TableQuality`].
///
/// `row_count` is the count known before sampling (catalog statistics or
/// `COUNT(*)`); `sampled` says whether the column probes saw a sample.
pub fn score_table(
    table: &TableMeta,
    row_count: Option<u64>,
    sampled: bool,
    columns: BTreeMap<String, ColumnMetric>,
    settings: &QualitySettings,
) -> TableQuality {
    let measured: Vec<(&String, &ColumnQuality)> = columns
        .iter()
        .filter_map(|(name, m)| m.measured().map(|q| (name, q)))
        .collect();

    let observed = measured.iter().map(|(_, q)| q.sampled_rows).max();
    let empty = match observed {
        Some(n) => n == 0,
        None => row_count == Some(0),
    };
    let total_rows = match (row_count, observed) {
        (_, Some(n)) if !sampled => n,
        (Some(n), _) => n,
        (None, Some(n)) => n,
        (None, None) => 0,
    };

    let weights = settings.weights;
    if empty {
        let mut issues = Vec::new();
        if table.primary_key.is_empty() {
            issues.push(no_primary_key_issue(&table.name));
        }
        return TableQuality {
            overall_quality_score: 100.0,
            completeness: 100.0,
            uniqueness: 100.0,
            null_penalty_score: 100.0,
            total_rows: 0,
            sampled,
            empty: true,
            scored: true,
            analyzed_columns: measured.len(),
            columns,
            issues,
            freshness: None,
        };
    }

    if measured.is_empty() {
        let mut issues = vec![QualityIssue {
            severity: Severity::Medium,
            kind: IssueKind::Unmeasured,
            column: None,
            null_count: None,
            message: format!(
                "No columns of {} could be measured; quality is unknown",
                table.name
            ),
        }];
        if table.primary_key.is_empty() {
            issues.push(no_primary_key_issue(&table.name));
        }
        return TableQuality {
            overall_quality_score: 0.0,
            completeness: 0.0,
            uniqueness: 0.0,
            null_penalty_score: 0.0,
            total_rows,
            sampled,
            empty: false,
            scored: false,
            analyzed_columns: 0,
            columns,
            issues,
            freshness: None,
        };
    }

    let completeness = completeness(measured.iter().map(|(_, q)| *q));
    let uniqueness = pk_uniqueness(table, &columns);

    let mostly_null = measured
        .iter()
        .filter(|(_, q)| q.null_percentage > NULL_PENALTY_THRESHOLD)
        .count();
    let null_penalty_score =
        round2(100.0 * (1.0 - mostly_null as f64 / measured.len() as f64));

    let overall = clamp_score(round2(
        weights.completeness * completeness
            + weights.uniqueness * uniqueness
            + weights.null_penalty * null_penalty_score,
    ));

    let mut issues = Vec::new();
    if completeness < LOW_SCORE_THRESHOLD {
        issues.push(QualityIssue {
            severity: Severity::High,
            kind: IssueKind::Completeness,
            column: None,
            null_count: None,
            message: format!("Low completeness score: {}%", completeness),
        });
    }
    if uniqueness < LOW_SCORE_THRESHOLD {
        issues.push(QualityIssue {
            severity: Severity::Medium,
            kind: IssueKind::Duplicates,
            column: table.primary_key.first().cloned(),
            null_count: None,
            message: format!("Low primary key uniqueness: {}%", uniqueness),
        });
    }
    if table.primary_key.is_empty() {
        issues.push(no_primary_key_issue(&table.name));
    }

    let mut null_issues: Vec<QualityIssue> = measured
        .iter()
        .filter(|(_, q)| q.null_percentage > settings.null_issue_threshold)
        .map(|(name, q)| QualityIssue {
            severity: Severity::High,
            kind: IssueKind::NullValues,
            column: Some((*name).clone()),
            null_count: Some(q.null_count),
            message: format!(
                "{} has {}% null values ({} of {} rows)",
                name, q.null_percentage, q.null_count, q.sampled_rows
            ),
        })
        .collect();
    null_issues.sort_by(|a, b| b.null_count.cmp(&a.null_count));
    issues.extend(null_issues);

    TableQuality {
        overall_quality_score: overall,
        completeness,
        uniqueness,
        null_penalty_score,
        total_rows,
        sampled,
        empty: false,
        scored: true,
        analyzed_columns: measured.len(),
        columns,
        issues,
        freshness: None,
    }
}

/// The column whose `MAX()` tells how recently a table was written: the
/// first timestamp or date column, else the first orderable column whose
/// name mentions a date or time.
pub fn freshness_column(table: &TableMeta) -> Option<&ColumnMeta> {
    table
        .columns
        .iter()
        .find(|c| matches!(c.data_type, DataType::Timestamp | DataType::Date))
        .or_else(|| {
            table.columns.iter().find(|c| {
                let name = c.name.to_ascii_lowercase();
                c.data_type.is_orderable() && (name.contains("date") || name.contains("time"))
            })
        })
}

fn no_primary_key_issue(table: &str) -> QualityIssue {
    QualityIssue {
        severity: Severity::Low,
        kind: IssueKind::NoPrimaryKey,
        column: None,
        null_count: None,
        message: format!("{} has no primary key", table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], pk: &[&str]) -> TableMeta {
        TableMeta {
            name: "t".to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnMeta {
                    name: c.to_string(),
                    data_type: DataType::Integer,
                    declared_type: "integer".to_string(),
                    nullable: true,
                    default: None,
                })
                .collect(),
            primary_key: pk.iter().map(|c| c.to_string()).collect(),
            foreign_keys: vec![],
            indexes: vec![],
            row_count: None,
        }
    }

    fn measured(sampled: u64, nulls: u64, distinct: u64) -> ColumnMetric {
        ColumnMetric::Measured(column_quality(
            &ColumnStats {
                sampled_rows: sampled,
                null_count: nulls,
                distinct_count: Some(distinct),
                min_value: None,
                max_value: None,
            },
            false,
        ))
    }

    #[test]
    fn null_percentage_rounds_half_up_to_one_decimal() {
        assert_eq!(null_percentage(1205, 2000), 60.3);
        assert_eq!(null_percentage(1, 3), 33.3);
        assert_eq!(null_percentage(2, 3), 66.7);
        assert_eq!(null_percentage(0, 10), 0.0);
        assert_eq!(null_percentage(10, 10), 100.0);
        assert_eq!(null_percentage(0, 0), 0.0);
    }

    #[test]
    fn no_nulls_means_full_completeness() {
        let t = table(&["id", "email"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), measured(100, 0, 100));
        cols.insert("email".to_string(), measured(100, 0, 90));
        let q = score_table(&t, Some(100), false, cols, &QualitySettings::default());
        assert_eq!(q.completeness, 100.0);
        assert_eq!(q.overall_quality_score, 100.0);
        assert!(!q.empty);
    }

    #[test]
    fn all_null_columns_mean_zero_completeness() {
        let t = table(&["a", "b"], &[]);
        let mut cols = BTreeMap::new();
        cols.insert("a".to_string(), measured(50, 50, 0));
        cols.insert("b".to_string(), measured(50, 50, 0));
        let q = score_table(&t, Some(50), false, cols, &QualitySettings::default());
        assert_eq!(q.completeness, 0.0);
        assert_eq!(q.null_penalty_score, 0.0);
        // only the uniqueness term (no PK → 100) contributes
        assert_eq!(q.overall_quality_score, 25.0);
    }

    #[test]
    fn empty_table_is_complete_but_flagged() {
        let t = table(&["id"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), measured(0, 0, 0));
        let q = score_table(&t, Some(0), false, cols, &QualitySettings::default());
        assert!(q.empty);
        assert_eq!(q.completeness, 100.0);
        assert_eq!(q.total_rows, 0);
    }

    #[test]
    fn table_with_rows_but_no_measured_columns_is_not_clean() {
        let t = table(&["id", "payload"], &["id"]);
        let mut cols = BTreeMap::new();
        for name in ["id", "payload"] {
            cols.insert(
                name.to_string(),
                ColumnMetric::Unknown {
                    reason: "sampling timed out".to_string(),
                },
            );
        }
        let q = score_table(&t, Some(5000), true, cols, &QualitySettings::default());

        assert!(!q.scored);
        assert!(!q.empty);
        assert_eq!(q.total_rows, 5000);
        assert_eq!(q.analyzed_columns, 0);
        assert_eq!(q.overall_quality_score, 0.0);
        assert_eq!(q.completeness, 0.0);
        assert_eq!(q.issues[0].kind, IssueKind::Unmeasured);
        assert_eq!(q.issues[0].severity, Severity::Medium);
    }

    #[test]
    fn empty_table_without_measurements_stays_empty() {
        let t = table(&["id"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert(
            "id".to_string(),
            ColumnMetric::Unknown {
                reason: "query failed".to_string(),
            },
        );
        let q = score_table(&t, Some(0), false, cols, &QualitySettings::default());
        assert!(q.empty);
        assert!(q.scored);
        assert!(q.issues.iter().all(|i| i.kind != IssueKind::Unmeasured));
    }

    #[test]
    fn freshness_prefers_temporal_types_then_names() {
        let mut t = table(&["id", "created_at", "updated"], &["id"]);
        t.columns[2].data_type = DataType::Timestamp;
        assert_eq!(freshness_column(&t).unwrap().name, "updated");

        let t = table(&["id", "created_at"], &["id"]);
        assert_eq!(freshness_column(&t).unwrap().name, "created_at");

        let t = table(&["id", "total"], &["id"]);
        assert!(freshness_column(&t).is_none());
    }

    #[test]
    fn duplicate_primary_key_scales_uniqueness() {
        let t = table(&["id"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), measured(200, 0, 100));
        let q = score_table(&t, Some(200), false, cols, &QualitySettings::default());
        assert_eq!(q.uniqueness, 50.0);
        assert!(q.issues.iter().any(|i| i.kind == IssueKind::Duplicates));
        // 0.6*100 + 0.25*50 + 0.15*100
        assert_eq!(q.overall_quality_score, 87.5);
    }

    #[test]
    fn unknown_columns_do_not_count() {
        let t = table(&["id", "blob"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), measured(10, 0, 10));
        cols.insert(
            "blob".to_string(),
            ColumnMetric::Unknown {
                reason: "sampling timed out".to_string(),
            },
        );
        let q = score_table(&t, Some(10), false, cols, &QualitySettings::default());
        assert_eq!(q.analyzed_columns, 1);
        assert_eq!(q.completeness, 100.0);
    }

    #[test]
    fn null_issues_rank_by_absolute_count() {
        let t = table(&["id", "discount", "coupon", "note"], &["id"]);
        let mut cols = BTreeMap::new();
        cols.insert("id".to_string(), measured(2000, 0, 2000));
        cols.insert("discount".to_string(), measured(2000, 1205, 12));
        cols.insert("coupon".to_string(), measured(2000, 1900, 3));
        cols.insert("note".to_string(), measured(2000, 900, 40));
        let q = score_table(&t, Some(2000), false, cols, &QualitySettings::default());

        let discount = q.columns["discount"].measured().unwrap();
        assert_eq!(discount.null_percentage, 60.3);

        let ranked: Vec<&str> = q
            .top_issues()
            .iter()
            .filter_map(|i| i.column.as_deref())
            .collect();
        assert_eq!(ranked, vec!["coupon", "discount", "note"]);
    }

    #[test]
    fn scores_stay_in_range_with_extreme_weights() {
        let settings = QualitySettings {
            weights: QualityWeights {
                completeness: 1.0,
                uniqueness: 0.0,
                null_penalty: 0.0,
            },
            ..QualitySettings::default()
        };
        let t = table(&["a"], &[]);
        let mut cols = BTreeMap::new();
        cols.insert("a".to_string(), measured(3, 1, 2));
        let q = score_table(&t, Some(3), false, cols, &settings);
        assert!((0.0..=100.0).contains(&q.overall_quality_score));
        assert!((0.0..=100.0).contains(&q.completeness));
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(QualityWeights::default().validate().is_ok());
        let bad = QualityWeights {
            completeness: 0.5,
            uniqueness: 0.5,
            null_penalty: 0.5,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn large_or_unknown_tables_are_sampled() {
        let s = QualitySettings::default();
        assert_eq!(s.sample_limit(Some(10)), None);
        assert_eq!(s.sample_limit(Some(1_000_000)), Some(10_000));
        assert_eq!(s.sample_limit(None), Some(10_000));
    }
}
