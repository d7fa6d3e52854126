//! Pattern-based field extractors.
//!
//! Each extractor is a pure function over a search result's title and/or
//! content. Pattern lists are tried in priority order and the first match wins.

use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Company name
// ---------------------------------------------------------------------------

static COMPANY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Legal-suffix form: "Acme Corp.", "Globex Corporation"
        r"([A-Z][a-zA-Z\s&]+(?:Inc|Corp|LLC|Ltd|Co|Company|Corporation)\.?)",
        // "Acme Robotics announces ..."
        r"([A-Z][a-zA-Z]+(?:\s[A-Z][a-zA-Z]+)*)\s*(?:stock|shares|announces|reports)",
        // "Acme Robotics (ACME)"
        r"([A-Z][a-zA-Z\s]+)\s*(?:\([\w]+\))",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Corporate suffixes rewritten to their canonical, period-free form.
const SUFFIXES: &[(&str, &str)] = &[
    ("Inc.", "Inc"),
    ("Corp.", "Corp"),
    ("Co.", "Co"),
    ("Ltd.", "Ltd"),
];

/// Find a company name in `title` followed by `content`.
pub(crate) fn company_name(title: &str, content: &str) -> Option<String> {
    let text = format!("{title} {content}");
    COMPANY_PATTERNS
        .iter()
        .find_map(|re| re.captures(&text))
        .map(|caps| clean_company_name(&caps[1]))
}

/// Collapse whitespace runs and canonicalize corporate suffixes.
pub(crate) fn clean_company_name(name: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let mut name = WS_RE.replace_all(name.trim(), " ").into_owned();
    for (raw, canonical) in SUFFIXES {
        name = name.replace(raw, canonical);
    }
    name
}

// ---------------------------------------------------------------------------
// Industry
// ---------------------------------------------------------------------------

/// Industry label, lowercase trigger words, and case-sensitive acronyms,
/// scanned in this order.
const INDUSTRY_KEYWORDS: &[(&str, &[&str], &[&str])] = &[
    (
        "Technology",
        &["tech", "software", "artificial intelligence", "cloud"],
        &["AI", "SaaS"],
    ),
    (
        "Healthcare",
        &["healthcare", "pharmaceutical", "biotech", "medical", "drug"],
        &[],
    ),
    (
        "Finance",
        &["bank", "financial", "fintech", "investment", "insurance"],
        &[],
    ),
    (
        "Energy",
        &["energy", "oil", "gas", "renewable", "solar", "wind"],
        &[],
    ),
    (
        "Retail",
        &["retail", "e-commerce", "shopping", "consumer goods"],
        &[],
    ),
    (
        "Automotive",
        &["automotive", "car", "vehicle", "electric vehicle"],
        &["EV"],
    ),
    (
        "Real Estate",
        &["real estate", "property", "construction"],
        &["REIT"],
    ),
    (
        "Telecommunications",
        &["telecom", "wireless", "network"],
        &["5G"],
    ),
];

/// Whole-word acronym matcher per industry row; `None` when the row has none.
static ACRONYMS: LazyLock<Vec<Option<Regex>>> = LazyLock::new(|| {
    INDUSTRY_KEYWORDS
        .iter()
        .map(|(_, _, acronyms)| {
            (!acronyms.is_empty()).then(|| {
                Regex::new(&format!(r"\b(?:{})\b", acronyms.join("|"))).expect("valid regex")
            })
        })
        .collect()
});

/// First industry with a trigger word (any case) or an acronym (exact case,
/// whole word) in title + content.
pub(crate) fn industry(title: &str, content: &str) -> Option<String> {
    let text = format!("{title} {content}");
    let lower = text.to_lowercase();
    INDUSTRY_KEYWORDS
        .iter()
        .zip(ACRONYMS.iter())
        .find(|((_, words, _), acronyms)| {
            words.iter().any(|w| lower.contains(w))
                || acronyms.as_ref().is_some_and(|re| re.is_match(&text))
        })
        .map(|((label, _, _), _)| (*label).to_string())
}

// ---------------------------------------------------------------------------
// Metrics and financial highlights
// ---------------------------------------------------------------------------

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
}

/// Captured group 1 of the first pattern that matches.
fn first_capture(patterns: &[Regex], content: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(content))
        .map(|caps| caps[1].to_string())
}

static REVENUE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"revenue.*?\$([0-9,.]+ (?:billion|million|B|M))",
        r"\$([0-9,.]+ (?:billion|million|B|M)).*?revenue",
    ])
});

static EMPLOYEES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"([0-9][0-9,]*)\s*employees",
        r"workforce.*?([0-9][0-9,]*)",
        r"employs.*?([0-9][0-9,]*)",
    ])
});

static MARKET_CAP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"market cap.*?\$([0-9,.]+ (?:billion|million|B|M))",
        r"valuation.*?\$([0-9,.]+ (?:billion|million|B|M))",
    ])
});

static STOCK_PRICE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"stock price.*?\$([0-9,.]+)",
        r"trading at.*?\$([0-9,.]+)",
        r"shares.*?\$([0-9,.]+)",
    ])
});

static PROFIT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"profit.*?\$([0-9,.]+ (?:billion|million|B|M))",
        r"earnings.*?\$([0-9,.]+ (?:billion|million|B|M))",
        r"net income.*?\$([0-9,.]+ (?:billion|million|B|M))",
    ])
});

/// Business metrics found in one piece of content.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Metrics {
    pub revenue: Option<String>,
    pub employees: Option<String>,
    pub market_cap: Option<String>,
}

pub(crate) fn metrics(content: &str) -> Metrics {
    Metrics {
        revenue: first_capture(&REVENUE, content),
        employees: first_capture(&EMPLOYEES, content)
            .map(|n| n.replace(',', ""))
            .filter(|n| !n.is_empty()),
        market_cap: first_capture(&MARKET_CAP, content),
    }
}

/// Financial highlights found in one piece of content.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Financials {
    pub stock_price: Option<String>,
    pub profit: Option<String>,
}

pub(crate) fn financials(content: &str) -> Financials {
    Financials {
        stock_price: first_capture(&STOCK_PRICE, content).map(|p| format!("${p}")),
        profit: first_capture(&PROFIT, content),
    }
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// Longest news summary kept before truncation.
pub(crate) const NEWS_SUMMARY_CHARS: usize = 200;

/// Truncate to [`NEWS_SUMMARY_CHARS`] characters, appending `...` when cut.
pub(crate) fn news_summary(content: &str) -> String {
    if content.chars().count() > NEWS_SUMMARY_CHARS {
        let head: String = content.chars().take(NEWS_SUMMARY_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}
