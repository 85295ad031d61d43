//! Upstream catalog discovery
//!
//! The FDA publishes quarterly archives behind an HTML index page. Discovery
//! scrapes anchor hrefs for `faers_{ascii,xml}_YYYYqN.zip` tokens
//! (case-insensitive), de-conflicts duplicates by longest match then lexical
//! order, and returns the quarters sorted ascending.

use faers_common::{FaersError, Quarter, Result};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DownloaderSettings;

/// The FDA FAERS quarterly data extract index
pub const FDA_FAERS_INDEX_URL: &str =
    "https://fis.fda.gov/extensions/FPD-QDE-FAERS/FPD-QDE-FAERS.html";

const DOWNLOAD_URL_BASE: &str = "https://fis.fda.gov/content/Exports";

/// Direct download URL for a quarter's ASCII archive
pub fn download_url(quarter: Quarter) -> String {
    format!("{}/faers_ascii_{}.zip", DOWNLOAD_URL_BASE, quarter.to_url_fragment())
}

/// A (quarter, download URL) pair found on the index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredQuarter {
    pub quarter: Quarter,
    pub url: String,
}

/// Scraper over the FDA index page
pub struct FdaIndex {
    client: Client,
    index_url: String,
}

impl FdaIndex {
    pub fn new(settings: &DownloaderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("faers-loader/0.1")
            .build()
            .map_err(|e| FaersError::acquisition(FDA_FAERS_INDEX_URL, e.to_string()))?;
        Ok(Self { client, index_url: FDA_FAERS_INDEX_URL.to_string() })
    }

    /// Override the index URL (used against fixture servers)
    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into();
        self
    }

    /// Enumerate quarters advertised on the index page, sorted ascending
    pub async fn discover(&self) -> Result<Vec<DiscoveredQuarter>> {
        info!(url = %self.index_url, "Discovering FAERS quarters");
        let response = self
            .client
            .get(&self.index_url)
            .send()
            .await
            .map_err(|e| FaersError::acquisition(&self.index_url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(FaersError::acquisition(
                &self.index_url,
                format!("HTTP status {}", response.status()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| FaersError::acquisition(&self.index_url, e.to_string()))?;

        let quarters = parse_index_html(&html);
        info!(count = quarters.len(), "Discovered quarters");
        Ok(quarters)
    }

    /// The newest quarter advertised upstream, if any
    pub async fn find_latest_quarter(&self) -> Result<Option<Quarter>> {
        Ok(self.discover().await?.into_iter().last().map(|d| d.quarter))
    }
}

/// Parse index HTML into (quarter, URL) pairs, ascending by quarter.
///
/// When the same quarter appears behind several links, the longest href wins,
/// ties broken by lexical order, so the result does not depend on page layout.
pub fn parse_index_html(html: &str) -> Vec<DiscoveredQuarter> {
    // Selector::parse only fails on invalid syntax, which "a" is not
    #[allow(clippy::unwrap_used)]
    let link_selector = Selector::parse("a").unwrap();
    #[allow(clippy::unwrap_used)]
    let token = Regex::new(r"(?i)faers_(?:ascii|xml)_(\d{4}q[1-4])\.zip").unwrap();

    let document = Html::parse_document(html);
    let mut best: BTreeMap<Quarter, String> = BTreeMap::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(captures) = token.captures(href) else {
            continue;
        };
        let quarter: Quarter = match captures[1].parse() {
            Ok(q) => q,
            Err(e) => {
                warn!(href, error = %e, "Skipping unparseable quarter link");
                continue;
            },
        };

        let href = href.to_string();
        match best.get(&quarter) {
            None => {
                debug!(quarter = %quarter, href = %href, "Discovered quarter link");
                best.insert(quarter, href);
            },
            Some(existing) => {
                let replace = href.len() > existing.len()
                    || (href.len() == existing.len() && href < *existing);
                if replace {
                    best.insert(quarter, href);
                }
            },
        }
    }

    best.into_iter()
        .map(|(quarter, url)| DiscoveredQuarter { quarter, url })
        .collect()
}
