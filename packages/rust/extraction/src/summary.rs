//! Executive summary synthesis and data-quality scoring.

use crate::ExtractedRecord;

/// Number of checklist fields behind the completeness score.
pub(crate) const CHECKLIST_FIELDS: usize = 8;

/// Build the summary from whichever fields were populated.
pub(crate) fn generate_summary(record: &ExtractedRecord) -> String {
    let name = present(&record.company_info.name).unwrap_or("Unknown Company");
    let industry = present(&record.company_info.industry).unwrap_or("Unknown Industry");

    let mut parts = vec![format!("{name} operates in the {industry} sector.")];

    if let Some(revenue) = present(&record.key_metrics.revenue) {
        parts.push(format!("The company reports revenue of {revenue}."));
    }
    if let Some(employees) = present(&record.key_metrics.employees) {
        parts.push(format!("It employs approximately {employees} people."));
    }

    let news_count = record.recent_news.len();
    if news_count > 0 {
        parts.push(format!(
            "Recent news coverage includes {news_count} relevant articles."
        ));
    }

    parts.join(" ")
}

/// Fraction of the checklist that is populated, in `[0, 1]`.
pub(crate) fn completeness(record: &ExtractedRecord) -> f64 {
    let populated = [
        filled(&record.company_info.name),
        filled(&record.company_info.industry),
        filled(&record.key_metrics.revenue),
        filled(&record.key_metrics.employees),
        filled(&record.financial_highlights.stock_price),
        filled(&record.financial_highlights.profit),
        !record.recent_news.is_empty(),
        !record.summary.is_empty(),
    ]
    .into_iter()
    .filter(|f| *f)
    .count();

    populated as f64 / CHECKLIST_FIELDS as f64
}

fn filled(field: &Option<String>) -> bool {
    present(field).is_some()
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}
