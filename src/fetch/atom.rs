// src/fetch/atom.rs
// arXiv Atom feed parsing. The feed is plain Atom plus the arxiv namespace
// for the primary category.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::store::{now_iso, Paper};

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "primary_category")]
    primary_category: Option<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
    #[serde(rename = "@title")]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: Option<String>,
}

/// Parse one Atom response page into papers. Entries without an id are
/// dropped.
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>> {
    let feed: Feed = from_str(xml).context("parsing arXiv atom feed")?;
    let fetched_at = now_iso();
    Ok(feed
        .entries
        .into_iter()
        .filter_map(|e| entry_to_paper(e, &fetched_at))
        .collect())
}

fn entry_to_paper(entry: Entry, fetched_at: &str) -> Option<Paper> {
    let raw_id = entry.id?;
    let arxiv_id = normalize_arxiv_id(&raw_id);
    if arxiv_id.is_empty() {
        return None;
    }

    let authors = entry
        .authors
        .into_iter()
        .filter_map(|a| a.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    let mut abs_url = String::new();
    let mut pdf_url = String::new();
    for link in entry.links {
        let href = link.href.unwrap_or_default();
        let is_pdf = link.title.as_deref() == Some("pdf")
            || link.kind.as_deref() == Some("application/pdf");
        if is_pdf {
            pdf_url = href;
        } else if link.rel.as_deref() == Some("alternate") {
            abs_url = href;
        }
    }
    if abs_url.is_empty() {
        abs_url = format!("https://arxiv.org/abs/{arxiv_id}");
    }
    if pdf_url.is_empty() {
        pdf_url = format!("https://arxiv.org/pdf/{arxiv_id}");
    }

    Some(Paper {
        arxiv_id,
        title: clean_whitespace(&entry.title.unwrap_or_default()),
        authors,
        category: entry
            .primary_category
            .and_then(|c| c.term)
            .unwrap_or_default(),
        published_at: entry.published.unwrap_or_default(),
        updated_at: entry.updated.unwrap_or_default(),
        abs_url,
        pdf_url,
        abstract_text: clean_whitespace(&entry.summary.unwrap_or_default()),
        fetched_at: fetched_at.to_string(),
    })
}

/// "http://arxiv.org/abs/2401.00001v2" -> "2401.00001" (version suffix is
/// stripped so re-announced versions dedup against the same row).
pub fn normalize_arxiv_id(raw: &str) -> String {
    let id = match raw.split_once("/abs/") {
        Some((_, tail)) => tail,
        None => raw,
    };
    static RE_VERSION: OnceCell<Regex> = OnceCell::new();
    let re = RE_VERSION.get_or_init(|| Regex::new(r"v\d+$").unwrap());
    re.replace(id.trim(), "").to_string()
}

pub fn clean_whitespace(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re.replace_all(s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_normalization_strips_prefix_and_version() {
        assert_eq!(
            normalize_arxiv_id("http://arxiv.org/abs/2401.00001v2"),
            "2401.00001"
        );
        assert_eq!(normalize_arxiv_id("2401.00001v10"), "2401.00001");
        assert_eq!(normalize_arxiv_id("2401.00001"), "2401.00001");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(
            clean_whitespace("  A\n  Title\twith   breaks "),
            "A Title with breaks"
        );
    }
}
