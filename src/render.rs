// src/render.rs
// Digest rendering: Markdown for Telegram/email-HTML, plaintext for the
// text/plain email part. Fields holding the "unknown" sentinel are omitted
// so fallback summaries degrade to the raw abstract.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::store::Paper;
use crate::summary::{StructuredSummary, UNKNOWN};

const FIELD_LABELS: [(&str, &str); 4] = [
    ("summary", "摘要"),
    ("contributions", "主要贡献"),
    ("novelty", "新颖性"),
    ("audience", "推荐阅读"),
];

pub fn render_markdown(papers: &[(Paper, Option<StructuredSummary>)], run_date: &str) -> String {
    let mut lines: Vec<String> = vec![
        format!("# arXiv Daily Digest - {run_date}"),
        String::new(),
        format!("**{} papers**", papers.len()),
        String::new(),
        "---".to_string(),
        String::new(),
    ];

    for (i, (paper, summary)) in papers.iter().enumerate() {
        lines.push(format!("## {}. {}", i + 1, paper.title));
        lines.push(String::new());
        lines.push(format!(
            "**arXiv:** [{}]({}) | [PDF]({})",
            paper.arxiv_id, paper.abs_url, paper.pdf_url
        ));
        lines.push(format!("**Authors:** {}", paper.authors));
        lines.push(format!("**Category:** {}", paper.category));
        lines.push(String::new());

        match summary {
            Some(s) if !s.is_fallback() => {
                for (field, label) in FIELD_LABELS {
                    let value = s.get(field);
                    if value != UNKNOWN && !value.is_empty() {
                        lines.push(format!("**{label}:** {value}"));
                        lines.push(String::new());
                    }
                }
            }
            _ => {
                if !paper.abstract_text.is_empty() {
                    lines.push(format!("**Abstract:** {}", truncate(&paper.abstract_text, 500)));
                    lines.push(String::new());
                }
            }
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

pub fn render_plaintext(papers: &[(Paper, Option<StructuredSummary>)], run_date: &str) -> String {
    let mut lines: Vec<String> = vec![
        format!("arXiv Daily Digest - {run_date}"),
        format!("{} papers", papers.len()),
        "=".repeat(60),
        String::new(),
    ];

    for (i, (paper, summary)) in papers.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, paper.title));
        lines.push(format!("   arXiv: {} | {}", paper.arxiv_id, paper.abs_url));
        lines.push(format!("   Authors: {}", paper.authors));

        match summary {
            Some(s) if s.get("summary") != UNKNOWN => {
                lines.push(format!("   摘要: {}", s.get("summary")));
            }
            _ => {
                if !paper.abstract_text.is_empty() {
                    lines.push(format!("   Abstract: {}", truncate(&paper.abstract_text, 300)));
                }
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Minimal markdown-to-HTML for the email body. Not a full parser.
pub fn markdown_to_simple_html(md: &str) -> String {
    static RE_H3: OnceCell<Regex> = OnceCell::new();
    static RE_H2: OnceCell<Regex> = OnceCell::new();
    static RE_H1: OnceCell<Regex> = OnceCell::new();
    static RE_BOLD: OnceCell<Regex> = OnceCell::new();
    static RE_LINK: OnceCell<Regex> = OnceCell::new();
    static RE_LI: OnceCell<Regex> = OnceCell::new();
    static RE_HR: OnceCell<Regex> = OnceCell::new();

    let mut html = html_escape::encode_text(md).to_string();
    html = RE_H3
        .get_or_init(|| Regex::new(r"(?m)^### (.+)$").unwrap())
        .replace_all(&html, "<h3>$1</h3>")
        .to_string();
    html = RE_H2
        .get_or_init(|| Regex::new(r"(?m)^## (.+)$").unwrap())
        .replace_all(&html, "<h2>$1</h2>")
        .to_string();
    html = RE_H1
        .get_or_init(|| Regex::new(r"(?m)^# (.+)$").unwrap())
        .replace_all(&html, "<h1>$1</h1>")
        .to_string();
    html = RE_BOLD
        .get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").unwrap())
        .replace_all(&html, "<b>$1</b>")
        .to_string();
    html = RE_LINK
        .get_or_init(|| Regex::new(r"\[(.+?)\]\((.+?)\)").unwrap())
        .replace_all(&html, r#"<a href="$2">$1</a>"#)
        .to_string();
    html = RE_LI
        .get_or_init(|| Regex::new(r"(?m)^- (.+)$").unwrap())
        .replace_all(&html, "<li>$1</li>")
        .to_string();
    // Whole lines only; "---" inside a title or abstract stays literal.
    html = RE_HR
        .get_or_init(|| Regex::new(r"(?m)^---$").unwrap())
        .replace_all(&html, "<hr>")
        .to_string();
    html = html.replace('\n', "<br>\n");
    format!("<html><body>{html}</body></html>")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::parse_summary;

    fn paper() -> Paper {
        Paper {
            arxiv_id: "2401.00001".to_string(),
            title: "A Paper".to_string(),
            authors: "A. Author".to_string(),
            category: "cs.CL".to_string(),
            published_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: String::new(),
            abs_url: "https://arxiv.org/abs/2401.00001".to_string(),
            pdf_url: "https://arxiv.org/pdf/2401.00001".to_string(),
            abstract_text: "The abstract text.".to_string(),
            fetched_at: String::new(),
        }
    }

    fn summary() -> StructuredSummary {
        parse_summary(
            r#"{"summary":"总结","contributions":"贡献","novelty":"unknown","audience":"读者"}"#,
        )
        .unwrap()
    }

    #[test]
    fn markdown_includes_header_and_sections() {
        let md = render_markdown(&[(paper(), Some(summary()))], "2024-01-05");
        assert!(md.contains("# arXiv Daily Digest - 2024-01-05"));
        assert!(md.contains("## 1. A Paper"));
        assert!(md.contains("**摘要:** 总结"));
        assert!(md.contains("[2401.00001](https://arxiv.org/abs/2401.00001)"));
        // unknown fields are omitted
        assert!(!md.contains("新颖性"));
    }

    #[test]
    fn fallback_summary_renders_abstract_instead() {
        let md = render_markdown(&[(paper(), Some(StructuredSummary::fallback()))], "2024-01-05");
        assert!(md.contains("**Abstract:** The abstract text."));
        assert!(!md.contains("摘要"));
    }

    #[test]
    fn plaintext_lists_papers() {
        let txt = render_plaintext(&[(paper(), None)], "2024-01-05");
        assert!(txt.contains("1. A Paper"));
        assert!(txt.contains("Abstract: The abstract text."));
    }

    #[test]
    fn simple_html_converts_structure() {
        let html = markdown_to_simple_html("# Title\n**bold** [x](http://e)\n---");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<b>bold</b>"));
        assert!(html.contains(r#"<a href="http://e">x</a>"#));
        assert!(html.contains("<hr>"));
    }

    #[test]
    fn dashes_inside_text_are_not_rules() {
        let html = markdown_to_simple_html("## Pre---training at Scale\n---\nbody");
        assert!(html.contains("<h2>Pre---training at Scale</h2>"));
        assert_eq!(html.matches("<hr>").count(), 1);
    }
}
