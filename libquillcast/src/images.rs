//! Image resolution pipeline
//!
//! Articles reference images by keyword; this module turns keywords into
//! reachable image URLs. Providers are tried in order (search, keyed
//! stock, deterministic placeholder) and every candidate except the
//! placeholder is probed for reachability before use. The placeholder is
//! the infallible floor: resolution never fails outright.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ImagesConfig;
use crate::error::{PublishError, Result};

/// Source of candidate image URLs for a keyword.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn candidates(&self, keyword: &str) -> Result<Vec<String>>;
}

/// Reachability check for a candidate URL.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    /// True when the URL answers a HEAD request with success and an image
    /// content type.
    async fn is_reachable_image(&self, url: &str) -> bool;
}

/// Probe over a real HTTP client.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PublishError::Image(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn is_reachable_image(&self, url: &str) -> bool {
        let response = match self.client.head(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(url, error = %e, "image probe failed");
                return false;
            }
        };
        if !response.status().is_success() {
            return false;
        }
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Open image search endpoint: GET {endpoint}?q={keyword}, JSON array of URLs.
pub struct SearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl SearchProvider {
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PublishError::Image(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ImageProvider for SearchProvider {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn candidates(&self, keyword: &str) -> Result<Vec<String>> {
        let urls: Vec<String> = self
            .client
            .get(&self.endpoint)
            .query(&[("q", keyword)])
            .send()
            .await
            .map_err(|e| PublishError::Image(e.to_string()))?
            .error_for_status()
            .map_err(|e| PublishError::Image(e.to_string()))?
            .json()
            .await
            .map_err(|e| PublishError::Image(e.to_string()))?;
        Ok(urls)
    }
}

/// Keyed stock-photo endpoint. Same shape as search, plus an API key header.
pub struct StockProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl StockProvider {
    pub fn new(endpoint: String, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PublishError::Image(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl ImageProvider for StockProvider {
    fn name(&self) -> &'static str {
        "stock"
    }

    async fn candidates(&self, keyword: &str) -> Result<Vec<String>> {
        let urls: Vec<String> = self
            .client
            .get(&self.endpoint)
            .header("Authorization", &self.api_key)
            .query(&[("query", keyword)])
            .send()
            .await
            .map_err(|e| PublishError::Image(e.to_string()))?
            .error_for_status()
            .map_err(|e| PublishError::Image(e.to_string()))?
            .json()
            .await
            .map_err(|e| PublishError::Image(e.to_string()))?;
        Ok(urls)
    }
}

/// Deterministic placeholder derived from the keyword hash. Always
/// resolvable without a network round trip.
pub struct PlaceholderProvider {
    base: String,
}

impl PlaceholderProvider {
    pub fn new(base: String) -> Self {
        Self { base }
    }

    pub fn url_for(&self, keyword: &str) -> String {
        let digest = Sha256::digest(keyword.as_bytes());
        let seed: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        format!("{}/{}/1200/800", self.base.trim_end_matches('/'), seed)
    }
}

#[async_trait]
impl ImageProvider for PlaceholderProvider {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn candidates(&self, keyword: &str) -> Result<Vec<String>> {
        Ok(vec![self.url_for(keyword)])
    }
}

/// Resolves keywords to verified image URLs and repairs article HTML.
pub struct ImagePipeline {
    providers: Vec<Box<dyn ImageProvider>>,
    placeholder: PlaceholderProvider,
    probe: Box<dyn UrlProbe>,
}

impl ImagePipeline {
    pub fn from_config(config: &ImagesConfig) -> Result<Self> {
        let mut providers: Vec<Box<dyn ImageProvider>> = Vec::new();
        if let Some(endpoint) = &config.search_endpoint {
            providers.push(Box::new(SearchProvider::new(
                endpoint.clone(),
                config.probe_timeout_secs,
            )?));
        }
        if let (Some(endpoint), Some(key)) = (&config.stock_endpoint, &config.stock_api_key) {
            providers.push(Box::new(StockProvider::new(
                endpoint.clone(),
                key.clone(),
                config.probe_timeout_secs,
            )?));
        }
        Ok(Self {
            providers,
            placeholder: PlaceholderProvider::new(config.placeholder_base.clone()),
            probe: Box::new(HttpProbe::new(config.probe_timeout_secs)?),
        })
    }

    #[cfg(test)]
    pub fn with_parts(
        providers: Vec<Box<dyn ImageProvider>>,
        placeholder: PlaceholderProvider,
        probe: Box<dyn UrlProbe>,
    ) -> Self {
        Self {
            providers,
            placeholder,
            probe,
        }
    }

    /// Resolve one keyword to a reachable image URL.
    ///
    /// Candidates already in `exclude` are skipped so one article never
    /// repeats an image. The winning URL is added to `exclude`.
    pub async fn resolve(&self, keyword: &str, exclude: &mut HashSet<String>) -> String {
        for provider in &self.providers {
            let candidates = match provider.candidates(keyword).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(provider = provider.name(), keyword, error = %e, "image provider failed");
                    continue;
                }
            };
            for url in candidates {
                if exclude.contains(&url) {
                    continue;
                }
                if self.probe.is_reachable_image(&url).await {
                    debug!(provider = provider.name(), keyword, url, "image resolved");
                    exclude.insert(url.clone());
                    return url;
                }
            }
        }

        // Placeholder floor: deterministic, not probed, never repeated
        // within a run thanks to the exclusion salt.
        let mut salt = 0u32;
        loop {
            let salted = if salt == 0 {
                keyword.to_string()
            } else {
                format!("{}-{}", keyword, salt)
            };
            let url = self.placeholder.url_for(&salted);
            if !exclude.contains(&url) {
                exclude.insert(url.clone());
                return url;
            }
            salt += 1;
        }
    }

    /// Walk `<img>` tags in article HTML, probe each src, and replace
    /// unreachable ones with resolved images keyed by the alt text (or the
    /// article keyword when alt is empty).
    pub async fn validate_and_replace(
        &self,
        html: &str,
        fallback_keyword: &str,
        exclude: &mut HashSet<String>,
    ) -> Result<String> {
        let mut result = String::with_capacity(html.len());
        let mut rest = html;

        while let Some(tag_start) = rest.find("<img") {
            let (before, tag_onward) = rest.split_at(tag_start);
            result.push_str(before);

            let tag_end = match tag_onward.find('>') {
                Some(i) => i,
                None => {
                    result.push_str(tag_onward);
                    return Ok(result);
                }
            };
            let tag = &tag_onward[..=tag_end];

            let src = attr_value(tag, "src");
            let keep = match &src {
                Some(url) => self.probe.is_reachable_image(url).await,
                None => false,
            };

            if keep {
                result.push_str(tag);
            } else {
                let keyword = attr_value(tag, "alt")
                    .filter(|alt| !alt.trim().is_empty())
                    .unwrap_or_else(|| fallback_keyword.to_string());
                let replacement = self.resolve(&keyword, exclude).await;
                warn!(old = src.as_deref().unwrap_or(""), new = %replacement, "replaced unreachable image");
                result.push_str(&rewrite_src(tag, &replacement));
            }

            rest = &tag_onward[tag_end + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

fn attr_value(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{}=\"", attr);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

fn rewrite_src(tag: &str, new_src: &str) -> String {
    match attr_value(tag, "src") {
        Some(old) => tag.replacen(&old, new_src, 1),
        None => {
            // No src attribute at all: inject one after the tag name
            tag.replacen("<img", &format!("<img src=\"{}\"", new_src), 1)
        }
    }
}
