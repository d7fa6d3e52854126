//! Structured extraction of company dossiers from raw web search results.
//!
//! Turns unstructured search hits into an [`ExtractedRecord`] using ordered
//! regex patterns and keyword tables, then scores how complete the record is.
//! Extraction is pure and deterministic for a given clock, and never fails:
//! input that cannot be interpreted degrades to an [`Extraction::Degraded`]
//! value carrying the error and the original payload.

mod patterns;
mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use dossier_shared::SearchHit;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Identity of the company a dossier describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Headline business metrics, kept verbatim as matched (e.g. `"3.2 billion"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialHighlights {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit: Option<String>,
}

/// One search result rendered as a news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub summary: String,
    pub url: String,
    pub extracted_at: DateTime<Utc>,
}

/// Provenance of one processed search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    /// Populated share of the checklist fields, in `[0, 1]`.
    pub completeness: f64,
    pub last_updated: DateTime<Utc>,
    pub sources: Vec<Source>,
}

/// The structured dossier produced by one extraction call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub company_info: CompanyInfo,
    pub key_metrics: KeyMetrics,
    pub recent_news: Vec<NewsItem>,
    pub financial_highlights: FinancialHighlights,
    pub summary: String,
    pub data_quality: DataQuality,
}

/// Error-carrying stand-in returned when the raw payload cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedExtraction {
    pub error: String,
    pub raw_data: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of extracting from a raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extraction {
    Record(ExtractedRecord),
    Degraded(DegradedExtraction),
}

impl Extraction {
    pub fn record(&self) -> Option<&ExtractedRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Degraded(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract a record from already-parsed search hits, stamped with the current time.
pub fn extract(hits: &[SearchHit]) -> ExtractedRecord {
    extract_at(hits, Utc::now())
}

/// Extract a record from search hits, stamping every timestamp with `now`.
///
/// Singular fields (name, industry) keep the first non-empty value; metrics
/// and financial highlights are merged with later results overwriting earlier
/// ones. Every hit contributes a source entry, in input order.
#[instrument(skip_all, fields(hits = hits.len()))]
pub fn extract_at(hits: &[SearchHit], now: DateTime<Utc>) -> ExtractedRecord {
    let mut record = ExtractedRecord {
        data_quality: DataQuality {
            last_updated: now,
            ..Default::default()
        },
        ..Default::default()
    };

    for hit in hits {
        record.data_quality.sources.push(Source {
            url: hit.url.clone(),
            title: hit.title.clone(),
            scraped_at: now,
        });

        if record.company_info.name.is_none() {
            record.company_info.name = patterns::company_name(&hit.title, &hit.content);
        }
        if record.company_info.industry.is_none() {
            record.company_info.industry = patterns::industry(&hit.title, &hit.content);
        }

        let metrics = patterns::metrics(&hit.content);
        overwrite(&mut record.key_metrics.revenue, metrics.revenue);
        overwrite(&mut record.key_metrics.employees, metrics.employees);
        overwrite(&mut record.key_metrics.market_cap, metrics.market_cap);

        if !hit.title.is_empty() && !hit.content.is_empty() {
            record.recent_news.push(NewsItem {
                headline: hit.title.trim().to_string(),
                summary: patterns::news_summary(&hit.content),
                url: hit.url.clone(),
                extracted_at: now,
            });
        }

        let financials = patterns::financials(&hit.content);
        overwrite(
            &mut record.financial_highlights.stock_price,
            financials.stock_price,
        );
        overwrite(&mut record.financial_highlights.profit, financials.profit);
    }

    record.summary = summary::generate_summary(&record);
    record.data_quality.completeness = summary::completeness(&record);

    debug!(
        name = ?record.company_info.name,
        industry = ?record.company_info.industry,
        completeness = record.data_quality.completeness,
        "extraction complete"
    );

    record
}

/// Extract from a raw text payload, as handed over by a pipeline stage.
///
/// JSON objects with a `results` array are processed hit by hit, other JSON
/// documents yield an empty record, and non-JSON text is treated as the
/// content of a single untitled hit.
pub fn extract_raw(raw: &str) -> Extraction {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => extract_value(&value),
        Err(_) => Extraction::Record(extract(&[SearchHit {
            title: "Raw Data".into(),
            content: raw.to_string(),
            url: String::new(),
        }])),
    }
}

/// Extract from an already-parsed JSON payload.
pub fn extract_value(value: &serde_json::Value) -> Extraction {
    match parse_hits(value) {
        Ok(hits) => Extraction::Record(extract(&hits)),
        Err(error) => {
            warn!(%error, "extraction degraded");
            Extraction::Degraded(DegradedExtraction {
                error: format!("Failed to format data: {error}"),
                raw_data: value.to_string(),
                timestamp: Utc::now(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn overwrite(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Read the `results` array of a search payload.
fn parse_hits(value: &serde_json::Value) -> Result<Vec<SearchHit>, String> {
    let Some(results) = value.as_object().and_then(|obj| obj.get("results")) else {
        return Ok(Vec::new());
    };

    let items = results
        .as_array()
        .ok_or_else(|| "`results` is not an array".to_string())?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| format!("result {i} is not an object"))?;
            let field = |name: &str| match obj.get(name) {
                None | Some(serde_json::Value::Null) => Ok(String::new()),
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(format!("result {i}: field `{name}` is not a string")),
            };
            Ok(SearchHit {
                title: field("title")?,
                content: field("content")?,
                url: field("url")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, content: &str, url: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            content: content.into(),
            url: url.into(),
        }
    }

    #[test]
    fn single_result_end_to_end() {
        let now = Utc::now();
        let record = extract_at(
            &[hit(
                "Acme Corp reports revenue of $500 million",
                "Acme Corp said quarterly revenue of $500 million beat forecasts.",
                "https://x",
            )],
            now,
        );

        assert_eq!(record.company_info.name.as_deref(), Some("Acme Corp"));
        assert_eq!(record.key_metrics.revenue.as_deref(), Some("500 million"));
        assert_eq!(record.recent_news.len(), 1);
        assert_eq!(
            record.recent_news[0].headline,
            "Acme Corp reports revenue of $500 million"
        );
        assert_eq!(record.data_quality.sources.len(), 1);
        assert_eq!(record.data_quality.sources[0].scraped_at, now);
        assert!(record.summary.contains("reports revenue of 500 million"));
        assert_eq!(record.company_info.industry, None);
        assert!(record.summary.contains("Unknown Industry"));
    }

    #[test]
    fn comma_only_workforce_mention_adds_no_employee_sentence() {
        let record = extract(&[hit(
            "Globex Corp update",
            "The workforce, it said, is stable.",
            "https://g",
        )]);

        assert_eq!(record.key_metrics.employees, None);
        assert!(!record.summary.contains("employs"));
    }

    #[test]
    fn first_name_wins_and_metrics_merge() {
        let record = extract(&[
            hit(
                "Globex Corporation expands",
                "Globex has 4,000 employees and revenue of $2 billion.",
                "https://a",
            ),
            hit(
                "Initech Inc. outlook",
                "Initech posted revenue of $7 million.",
                "https://b",
            ),
        ]);

        assert_eq!(record.company_info.name.as_deref(), Some("Globex Corp"));
        // Later non-empty metric overwrites; missing ones survive.
        assert_eq!(record.key_metrics.revenue.as_deref(), Some("7 million"));
        assert_eq!(record.key_metrics.employees.as_deref(), Some("4000"));
        let urls: Vec<_> = record
            .data_quality
            .sources
            .iter()
            .map(|s| s.url.as_str())
            .collect();
        assert_eq!(urls, ["https://a", "https://b"]);
    }

    #[test]
    fn sources_recorded_even_without_matches() {
        let record = extract(&[hit("", "", "https://empty")]);
        assert_eq!(record.data_quality.sources.len(), 1);
        assert!(record.recent_news.is_empty());
        assert_eq!(
            record.summary,
            "Unknown Company operates in the Unknown Industry sector."
        );
        assert_eq!(record.data_quality.completeness, 1.0 / 8.0);
    }

    #[test]
    fn raw_json_payload_is_parsed() {
        let raw = r#"{"query":"acme","results":[{"title":"Acme Corp. news","content":"Acme Corp stock price hit $12.50","url":"https://n"}]}"#;
        let extraction = extract_raw(raw);
        let record = extraction.record().expect("record");
        assert_eq!(record.company_info.name.as_deref(), Some("Acme Corp"));
        assert_eq!(
            record.financial_highlights.stock_price.as_deref(),
            Some("$12.50")
        );
    }

    #[test]
    fn plain_text_becomes_single_raw_hit() {
        let extraction = extract_raw("Initech Inc. employs 300 engineers");
        let record = extraction.record().expect("record");
        assert_eq!(record.key_metrics.employees.as_deref(), Some("300"));
        assert_eq!(record.data_quality.sources[0].title, "Raw Data");
        assert_eq!(record.data_quality.sources[0].url, "");
    }

    #[test]
    fn json_without_results_yields_empty_record() {
        let extraction = extract_raw(r#"{"answer": 42}"#);
        let record = extraction.record().expect("record");
        assert!(record.data_quality.sources.is_empty());
        assert!(!record.summary.is_empty());
    }

    #[test]
    fn malformed_results_degrade() {
        let raw = r#"{"results": [{"title": 7, "content": "x"}]}"#;
        match extract_raw(raw) {
            Extraction::Degraded(degraded) => {
                assert!(degraded.error.contains("`title` is not a string"));
                assert!(degraded.raw_data.contains("results"));
            }
            Extraction::Record(_) => panic!("expected degraded extraction"),
        }

        assert!(matches!(
            extract_raw(r#"{"results": "nope"}"#),
            Extraction::Degraded(_)
        ));
    }

    #[test]
    fn record_serializes_without_empty_optionals() {
        let record = extract(&[]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["company_info"], serde_json::json!({}));
        assert!(json["data_quality"]["completeness"].is_number());
    }
}
