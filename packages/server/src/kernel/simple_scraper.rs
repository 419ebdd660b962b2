//! Simple web scraper - local HTTP + HTML parsing
//!
//! This implementation:
//! - Uses reqwest for HTTP requests
//! - Uses scraper crate for HTML parsing
//! - Uses htmd for HTML to Markdown conversion
//! - Pulls in a couple of likely-relevant sub-pages (hours, eligibility)
//!   and concatenates them under `---` source headers
//!
//! Limitations:
//! - No JavaScript rendering (static HTML sites only)

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{BaseWebScraper, ScrapeFailure, ScrapeResult};

/// Sub-pages worth following when enriching a pantry site. Scored by how many
/// of these appear in the path.
const RELEVANT_PATH_HINTS: &[&str] = &[
    "hour", "food", "pantry", "eligib", "service", "program", "visit", "location", "about",
    "get-help", "gethelp",
];

/// How many sub-pages to append after the landing page.
const MAX_SUBPAGES: usize = 2;

/// Pages shorter than this (in markdown chars) are treated as empty.
const MIN_CONTENT_LEN: usize = 80;

/// Simple web scraper using reqwest + scraper + htmd
pub struct SimpleScraper {
    client: reqwest::Client,
}

impl SimpleScraper {
    pub fn new() -> anyhow::Result<Self> {
        // Use a browser-like User-Agent to avoid bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .expect("static header value"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().expect("static header value"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(25))
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    /// Fetch one page and render it to markdown.
    async fn fetch_markdown(&self, url: &str) -> Result<(String, Option<String>), ScrapeFailure> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeFailure::Timeout
            } else {
                ScrapeFailure::HttpError { status: 0 }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(ScrapeFailure::Blocked);
        }
        if !status.is_success() {
            return Err(ScrapeFailure::HttpError {
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|_| ScrapeFailure::Empty)?;

        let document = Html::parse_document(&html);
        let title = Self::extract_title(&document);
        let main_content = Self::extract_main_content(&document);
        let markdown = Self::html_to_markdown(&main_content);

        Ok((markdown, title))
    }

    /// Extract title from HTML document
    fn extract_title(document: &Html) -> Option<String> {
        let title_selector = Selector::parse("title").ok()?;
        document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Extract main content HTML, stripping nav/header/footer/aside
    fn extract_main_content(document: &Html) -> String {
        let main_selectors = [
            "main",
            "article",
            "[role='main']",
            "#content",
            "#main",
            ".content",
            ".main",
        ];

        for selector_str in main_selectors {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(main) = document.select(&selector).next() {
                    return main.html();
                }
            }
        }

        // Fallback: use body but remove unwanted elements
        if let Ok(body_selector) = Selector::parse("body") {
            if let Some(body) = document.select(&body_selector).next() {
                let html = body.html();
                return Self::remove_boilerplate(&html);
            }
        }

        document.html()
    }

    /// Remove common boilerplate elements from HTML string
    fn remove_boilerplate(html: &str) -> String {
        let document = Html::parse_document(html);
        let unwanted = [
            "nav", "header", "footer", "aside", ".nav", ".navbar", ".footer", ".sidebar",
            ".menu", "#nav", "#header", "#footer", "script", "style", "noscript", "iframe",
        ];

        let mut result = html.to_string();
        for selector_str in unwanted {
            if let Ok(selector) = Selector::parse(selector_str) {
                for element in document.select(&selector) {
                    let element_html = element.html();
                    result = result.replace(&element_html, "");
                }
            }
        }

        result
    }

    /// Convert HTML to Markdown
    fn html_to_markdown(html: &str) -> String {
        htmd::convert(html).unwrap_or_else(|_| {
            // Fallback: strip tags and return plain text
            let document = Html::parse_document(html);
            document.root_element().text().collect::<String>()
        })
    }

    /// Same-domain links worth following, best-scored first.
    fn relevant_links(html: &str, base_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let link_selector = match Selector::parse("a[href]") {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let base_domain = base_url.domain().unwrap_or("");

        let mut scored: Vec<(usize, String)> = document
            .select(&link_selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base_url.join(href).ok())
            .filter(|url| {
                url.domain() == Some(base_domain)
                    && (url.scheme() == "http" || url.scheme() == "https")
                    && url.fragment().is_none()
            })
            .filter_map(|url| {
                let score = Self::score_path(url.path());
                if score == 0 {
                    return None;
                }
                let mut normalized = url.clone();
                normalized.set_query(None);
                Some((score, normalized.to_string()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.dedup_by(|a, b| a.1 == b.1);

        let base = base_url.to_string();
        scored
            .into_iter()
            .map(|(_, url)| url)
            .filter(|url| *url != base)
            .collect()
    }

    fn score_path(path: &str) -> usize {
        let path_lower = path.to_lowercase();
        RELEVANT_PATH_HINTS
            .iter()
            .filter(|hint| path_lower.contains(**hint))
            .count()
    }

    /// Normalize URL by adding https:// if no scheme is present
    fn normalize_url(url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }
}

#[async_trait]
impl BaseWebScraper for SimpleScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeFailure> {
        let url = Self::normalize_url(url);
        debug!(url = %url, "Scraping page");

        // Landing page failures are the scrape's failure; sub-page failures
        // are tolerated.
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeFailure::Timeout
            } else {
                ScrapeFailure::HttpError { status: 0 }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(ScrapeFailure::Blocked);
        }
        if !status.is_success() {
            return Err(ScrapeFailure::HttpError {
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(|_| ScrapeFailure::Empty)?;
        let (title, mut markdown) = {
            let document = Html::parse_document(&html);
            let title = Self::extract_title(&document);
            let main_content = Self::extract_main_content(&document);
            (title, Self::html_to_markdown(&main_content))
        };

        // Append a couple of likely-relevant sub-pages under --- headers;
        // the extractor prompt understands this layout.
        if let Ok(base) = Url::parse(&url) {
            for link in Self::relevant_links(&html, &base)
                .into_iter()
                .take(MAX_SUBPAGES)
            {
                match self.fetch_markdown(&link).await {
                    Ok((sub_md, _)) if sub_md.trim().len() >= MIN_CONTENT_LEN => {
                        markdown.push_str("\n\n---\nSource: ");
                        markdown.push_str(&link);
                        markdown.push_str("\n\n");
                        markdown.push_str(&sub_md);
                    }
                    Ok(_) => debug!(url = %link, "Skipping thin sub-page"),
                    Err(e) => debug!(url = %link, error = %e, "Sub-page fetch failed"),
                }
            }
        }

        if markdown.trim().len() < MIN_CONTENT_LEN {
            return Err(ScrapeFailure::Empty);
        }

        Ok(ScrapeResult {
            url,
            markdown,
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_path() {
        assert!(SimpleScraper::score_path("/hours-and-eligibility") >= 2);
        assert_eq!(SimpleScraper::score_path("/privacy-policy"), 0);
        assert!(SimpleScraper::score_path("/food-pantry") >= 2);
    }

    #[test]
    fn test_extract_title() {
        let html = r#"<html><head><title>Test Pantry</title></head><body></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(
            SimpleScraper::extract_title(&document),
            Some("Test Pantry".to_string())
        );
    }

    #[test]
    fn test_html_to_markdown() {
        let html = "<h1>Hours</h1><p>Tuesdays 9-11am</p>";
        let md = SimpleScraper::html_to_markdown(html);
        assert!(md.contains("Hours"));
        assert!(md.contains("Tuesdays 9-11am"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            SimpleScraper::normalize_url("example.com"),
            "https://example.com"
        );
        assert_eq!(
            SimpleScraper::normalize_url("https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            SimpleScraper::normalize_url("http://example.com"),
            "http://example.com"
        );
    }

    #[test]
    fn test_relevant_links_same_domain_only() {
        let base = Url::parse("https://pantry.example.org/").unwrap();
        let html = r#"
            <a href="/hours">Hours</a>
            <a href="https://facebook.com/pantry">FB</a>
            <a href="/food-pantry/eligibility">Eligibility</a>
            <a href="/privacy">Privacy</a>
        "#;
        let links = SimpleScraper::relevant_links(html, &base);
        assert!(links.iter().all(|l| l.contains("pantry.example.org")));
        assert!(links.iter().any(|l| l.ends_with("/hours")));
        assert!(!links.iter().any(|l| l.contains("privacy")));
    }
}
