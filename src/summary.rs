// src/summary.rs
// Structured summary type plus the ordered parse-strategy chain applied to
// raw model output: {strict parse, repair-then-parse, sentinel fallback}.
// Each strategy either yields a valid summary or defers to the next.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Required field set of a structured summary. A configuration constant, not
/// core logic; the parse chain and validation are driven by this list.
pub const REQUIRED_FIELDS: [&str; 4] = ["summary", "contributions", "novelty", "audience"];

/// Sentinel value written into every field when content cannot be recovered.
pub const UNKNOWN: &str = "unknown";

/// The structured digest of one paper, one-to-one with a stored paper row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredSummary {
    fields: BTreeMap<String, String>,
}

impl StructuredSummary {
    /// Build from a parsed JSON value. Returns `None` unless the value is an
    /// object carrying every required field with non-empty content; string
    /// values are taken verbatim, other values (e.g. a contributions array)
    /// are rendered to compact JSON.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut fields = BTreeMap::new();
        for &key in REQUIRED_FIELDS.iter() {
            let v = obj.get(key)?;
            let text = match v {
                Value::String(s) => s.trim().to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if text.is_empty() {
                return None;
            }
            fields.insert(key.to_string(), text);
        }
        Some(Self { fields })
    }

    /// The all-`"unknown"` sentinel summary. Guarantees one-summary-per-paper
    /// even when parsing/repair fails.
    pub fn fallback() -> Self {
        let fields = REQUIRED_FIELDS
            .iter()
            .map(|&k| (k.to_string(), UNKNOWN.to_string()))
            .collect();
        Self { fields }
    }

    pub fn is_fallback(&self) -> bool {
        REQUIRED_FIELDS.iter().all(|&k| self.get(k) == UNKNOWN)
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or(UNKNOWN)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a summary persisted by `to_json`. Missing fields read back as
    /// `"unknown"` rather than failing, so old rows stay readable.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, String> = serde_json::from_str(s)?;
        let mut fields = BTreeMap::new();
        for &key in REQUIRED_FIELDS.iter() {
            let v = raw.get(key).cloned().unwrap_or_else(|| UNKNOWN.to_string());
            fields.insert(key.to_string(), v);
        }
        Ok(Self { fields })
    }
}

/// Full parse chain: strict, then repair. `None` means the caller should fall
/// back to `StructuredSummary::fallback()`.
pub fn parse_summary(raw: &str) -> Option<StructuredSummary> {
    strict_parse(raw).or_else(|| repair_parse(raw))
}

/// Strategy 1: the response body is already valid JSON with all fields.
pub fn strict_parse(raw: &str) -> Option<StructuredSummary> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    StructuredSummary::from_value(&value)
}

/// Strategy 2: one repair pass — strip markdown fences, extract the outermost
/// brace-delimited span, drop trailing commas — then re-parse.
pub fn repair_parse(raw: &str) -> Option<StructuredSummary> {
    let text = strip_markdown_fences(raw);

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = strip_trailing_commas(&text[start..=end]);

    let value: Value = serde_json::from_str(&candidate).ok()?;
    StructuredSummary::from_value(&value)
}

fn strip_markdown_fences(raw: &str) -> String {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.first().is_some_and(|l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn strip_trailing_commas(s: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap());
    re.replace_all(s, "$1").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"summary":"一句话总结","contributions":"提出了新方法",
        "novelty":"较高","audience":"NLP研究者"}"#;

    #[test]
    fn strict_parse_accepts_clean_json() {
        let s = strict_parse(VALID).expect("parses");
        assert_eq!(s.get("summary"), "一句话总结");
        assert_eq!(s.get("audience"), "NLP研究者");
        assert!(!s.is_fallback());
    }

    #[test]
    fn strict_parse_rejects_missing_field() {
        let raw = r#"{"summary":"x","contributions":"y","novelty":"z"}"#;
        assert!(strict_parse(raw).is_none());
    }

    #[test]
    fn strict_parse_rejects_empty_field() {
        let raw = r#"{"summary":"","contributions":"y","novelty":"z","audience":"w"}"#;
        assert!(strict_parse(raw).is_none());
    }

    #[test]
    fn non_string_values_are_rendered() {
        let raw = r#"{"summary":"x","contributions":["a","b"],"novelty":"z","audience":"w"}"#;
        let s = strict_parse(raw).expect("parses");
        assert_eq!(s.get("contributions"), r#"["a","b"]"#);
    }

    #[test]
    fn repair_strips_markdown_fences() {
        let raw = format!("```json\n{VALID}\n```");
        assert!(strict_parse(&raw).is_none());
        let s = repair_parse(&raw).expect("repairs");
        assert_eq!(s.get("novelty"), "较高");
    }

    #[test]
    fn repair_extracts_brace_span_from_prose() {
        let raw = format!("Sure, here is the JSON you asked for:\n{VALID}\nHope this helps!");
        let s = parse_summary(&raw).expect("repairs");
        assert_eq!(s.get("contributions"), "提出了新方法");
    }

    #[test]
    fn repair_drops_trailing_commas() {
        let raw = r#"{"summary":"x","contributions":"y","novelty":"z","audience":"w",}"#;
        assert!(strict_parse(raw).is_none());
        assert!(repair_parse(raw).is_some());
    }

    #[test]
    fn garbage_falls_through_to_none() {
        assert!(parse_summary("I could not summarize this paper.").is_none());
        assert!(parse_summary("").is_none());
    }

    #[test]
    fn fallback_is_all_unknown_and_round_trips() {
        let f = StructuredSummary::fallback();
        assert!(f.is_fallback());
        for key in REQUIRED_FIELDS {
            assert_eq!(f.get(key), UNKNOWN);
        }
        let back = StructuredSummary::from_json(&f.to_json()).unwrap();
        assert_eq!(back, f);
    }
}
