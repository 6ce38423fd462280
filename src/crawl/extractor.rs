//! HTML extraction
//!
//! Pulls the four things the crawl pipeline needs out of a page: the
//! declared canonical URL, a language hint from markup metadata, the
//! visible text, and outbound links resolved against the page URL.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::parse_crawlable;

/// Elements whose text is never rendered
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Language declared by page metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageHint {
    English,
    NonEnglish,
    /// No language metadata at all
    Unknown,
}

impl LanguageHint {
    /// Classify an `<html lang>` style tag such as `en-US` or `fr`
    fn from_lang_tag(tag: &str) -> Self {
        if tag.trim().to_lowercase().starts_with("en") {
            LanguageHint::English
        } else {
            LanguageHint::NonEnglish
        }
    }

    pub fn is_english(self) -> bool {
        self == LanguageHint::English
    }
}

/// Everything the pipeline needs from one page
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub canonical: Option<Url>,
    pub language: LanguageHint,
    pub text: String,
    /// Normalized, deduplicated http(s) links in document order
    pub links: Vec<Url>,
}

impl ExtractedPage {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// scraper-backed extractor with pre-compiled selectors
pub struct HtmlExtractor {
    html_selector: Option<Selector>,
    canonical_selector: Option<Selector>,
    http_equiv_selector: Option<Selector>,
    anchor_selector: Option<Selector>,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self {
            html_selector: Selector::parse("html").ok(),
            canonical_selector: Selector::parse("link[rel~='canonical'][href]").ok(),
            http_equiv_selector: Selector::parse("meta[http-equiv][content]").ok(),
            anchor_selector: Selector::parse("a[href]").ok(),
        }
    }

    /// Extract everything from `html`, resolving relative URLs against `base`
    pub fn extract(&self, html: &str, base: &Url) -> ExtractedPage {
        let document = Html::parse_document(html);

        ExtractedPage {
            canonical: self.canonical(&document, base),
            language: self.language(&document),
            text: Self::visible_text(&document),
            links: self.links(&document, base),
        }
    }

    /// Language hint and visible text only (no URL context needed)
    pub fn language_and_text(&self, html: &str) -> (LanguageHint, String) {
        let document = Html::parse_document(html);
        (self.language(&document), Self::visible_text(&document))
    }

    fn canonical(&self, document: &Html, base: &Url) -> Option<Url> {
        let selector = self.canonical_selector.as_ref()?;
        let href = document.select(selector).next()?.value().attr("href")?;
        let resolved = base.join(href.trim()).ok()?;
        parse_crawlable(resolved.as_str())
    }

    /// `<html lang>` / `xml:lang` first, then `http-equiv=content-language`
    fn language(&self, document: &Html) -> LanguageHint {
        if let Some(selector) = &self.html_selector {
            if let Some(root) = document.select(selector).next() {
                let element = root.value();
                let lang = element.attr("lang").or_else(|| element.attr("xml:lang"));
                if let Some(lang) = lang.filter(|l| !l.trim().is_empty()) {
                    return LanguageHint::from_lang_tag(lang);
                }
            }
        }

        if let Some(selector) = &self.http_equiv_selector {
            for meta in document.select(selector) {
                let element = meta.value();
                let is_content_language = element
                    .attr("http-equiv")
                    .map(|v| v.trim().eq_ignore_ascii_case("content-language"))
                    .unwrap_or(false);
                if !is_content_language {
                    continue;
                }
                let content = element.attr("content").unwrap_or("").to_lowercase();
                return if content.contains("en") {
                    LanguageHint::English
                } else {
                    LanguageHint::NonEnglish
                };
            }
        }

        LanguageHint::Unknown
    }

    /// Text nodes outside script/style/noscript/template, whitespace-collapsed
    fn visible_text(document: &Html) -> String {
        let mut words: Vec<&str> = Vec::new();

        for node in document.root_element().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ElementRef::wrap(ancestor)
                    .map(|e| HIDDEN_ELEMENTS.contains(&e.value().name()))
                    .unwrap_or(false)
            });
            if !hidden {
                words.extend(text.split_whitespace());
            }
        }

        words.join(" ")
    }

    fn links(&self, document: &Html, base: &Url) -> Vec<Url> {
        let Some(selector) = &self.anchor_selector else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for anchor in document.select(selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = base.join(href.trim()) else {
                continue;
            };
            if let Some(url) = parse_crawlable(resolved.as_str()) {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
        }
        links
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}
