//! Collaborator traits and their configurable mocks
//!
//! Content generation, feed ingestion, draft storage, and topic
//! classification live behind external services. These traits are the
//! seams; the mocks simulate success and failure paths without touching
//! any real backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Article, SourceItem};

/// A draft waiting to be published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub title: String,
    pub html: String,
    pub category: Option<String>,
    pub image_keyword: String,
}

/// Generates article content from source material.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce an article from the selected items, in the given style.
    async fn generate(
        &self,
        items: &[SourceItem],
        style: &str,
        instructions: Option<&str>,
    ) -> Result<Article>;
}

/// Supplies recent source items for spontaneous runs.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_recent(&self, max_age_hours: u32) -> Result<Vec<SourceItem>>;
}

/// Storage for operator-authored drafts.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn fetch(&self, draft_id: &str) -> Result<Option<Draft>>;

    async fn mark_published(&self, draft_id: &str) -> Result<()>;
}

/// Answers free-text classification questions (topic and style picks).
#[async_trait]
pub trait TopicClassifier: Send + Sync {
    /// Given candidate labels and context, return the classifier's answer
    /// as free text. Callers map it back onto the label list themselves.
    async fn classify(&self, labels: &[String], context: &str) -> Result<String>;
}

pub mod http {
    //! HTTP-backed collaborators.
    //!
    //! Each service is a plain JSON endpoint; the payload formats carry no
    //! provider specifics, so any conforming backend can stand behind them.
    //! Transport failures map to network errors and go through the normal
    //! retry path.

    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::config::ServicesConfig;
    use crate::error::PublishError;

    fn client(config: &ServicesConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PublishError::Network(e.to_string()).into())
    }

    fn network(e: reqwest::Error) -> crate::error::QuillcastError {
        PublishError::Network(e.to_string()).into()
    }

    pub struct HttpGenerator {
        client: reqwest::Client,
        url: String,
    }

    impl HttpGenerator {
        pub fn new(config: &ServicesConfig, url: String) -> Result<Self> {
            Ok(Self {
                client: client(config)?,
                url,
            })
        }
    }

    #[async_trait]
    impl ContentGenerator for HttpGenerator {
        async fn generate(
            &self,
            items: &[SourceItem],
            style: &str,
            instructions: Option<&str>,
        ) -> Result<Article> {
            self.client
                .post(&self.url)
                .json(&serde_json::json!({
                    "items": items,
                    "style": style,
                    "instructions": instructions,
                }))
                .send()
                .await
                .map_err(network)?
                .error_for_status()
                .map_err(network)?
                .json()
                .await
                .map_err(network)
        }
    }

    pub struct HttpFeed {
        client: reqwest::Client,
        url: String,
    }

    impl HttpFeed {
        pub fn new(config: &ServicesConfig, url: String) -> Result<Self> {
            Ok(Self {
                client: client(config)?,
                url,
            })
        }
    }

    #[async_trait]
    impl FeedSource for HttpFeed {
        async fn fetch_recent(&self, max_age_hours: u32) -> Result<Vec<SourceItem>> {
            let items: Vec<SourceItem> = self
                .client
                .get(&self.url)
                .query(&[("max_age_hours", max_age_hours)])
                .send()
                .await
                .map_err(network)?
                .error_for_status()
                .map_err(network)?
                .json()
                .await
                .map_err(network)?;

            let cutoff = chrono::Utc::now().timestamp() - (max_age_hours as i64) * 3600;
            Ok(items
                .into_iter()
                .filter(|item| item.published_at >= cutoff)
                .collect())
        }
    }

    pub struct HttpDrafts {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpDrafts {
        pub fn new(config: &ServicesConfig, base_url: String) -> Result<Self> {
            Ok(Self {
                client: client(config)?,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl DraftStore for HttpDrafts {
        async fn fetch(&self, draft_id: &str) -> Result<Option<Draft>> {
            let response = self
                .client
                .get(format!("{}/{}", self.base_url, draft_id))
                .send()
                .await
                .map_err(network)?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let draft = response
                .error_for_status()
                .map_err(network)?
                .json()
                .await
                .map_err(network)?;
            Ok(Some(draft))
        }

        async fn mark_published(&self, draft_id: &str) -> Result<()> {
            self.client
                .post(format!("{}/{}/published", self.base_url, draft_id))
                .send()
                .await
                .map_err(network)?
                .error_for_status()
                .map_err(network)?;
            Ok(())
        }
    }

    pub struct HttpClassifier {
        client: reqwest::Client,
        url: String,
    }

    impl HttpClassifier {
        pub fn new(config: &ServicesConfig, url: String) -> Result<Self> {
            Ok(Self {
                client: client(config)?,
                url,
            })
        }
    }

    #[derive(Deserialize)]
    struct ClassifyResponse {
        answer: String,
    }

    #[async_trait]
    impl TopicClassifier for HttpClassifier {
        async fn classify(&self, labels: &[String], context: &str) -> Result<String> {
            let response: ClassifyResponse = self
                .client
                .post(&self.url)
                .json(&serde_json::json!({
                    "labels": labels,
                    "context": context,
                }))
                .send()
                .await
                .map_err(network)?
                .error_for_status()
                .map_err(network)?
                .json()
                .await
                .map_err(network)?;
            Ok(response.answer)
        }
    }
}

/// Draft store for installs without a drafts service: every lookup misses.
pub struct NoDrafts;

#[async_trait]
impl DraftStore for NoDrafts {
    async fn fetch(&self, _draft_id: &str) -> Result<Option<Draft>> {
        Ok(None)
    }

    async fn mark_published(&self, _draft_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Classifier fallback: answers with the first label, which downstream
/// matching resolves to the first candidate.
pub struct FirstLabelClassifier;

#[async_trait]
impl TopicClassifier for FirstLabelClassifier {
    async fn classify(&self, labels: &[String], _context: &str) -> Result<String> {
        Ok(labels.first().cloned().unwrap_or_default())
    }
}

pub mod mock {
    //! Configurable in-memory collaborators for tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::PublishError;

    pub struct MockGenerator {
        article: Option<Article>,
        failure: Option<String>,
        calls: AtomicUsize,
        styles_seen: Mutex<Vec<String>>,
    }

    impl MockGenerator {
        pub fn returning(article: Article) -> Self {
            Self {
                article: Some(article),
                failure: None,
                calls: AtomicUsize::new(0),
                styles_seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: &str) -> Self {
            Self {
                article: None,
                failure: Some(error.to_string()),
                calls: AtomicUsize::new(0),
                styles_seen: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn styles_seen(&self) -> Vec<String> {
            self.styles_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentGenerator for MockGenerator {
        async fn generate(
            &self,
            _items: &[SourceItem],
            style: &str,
            _instructions: Option<&str>,
        ) -> Result<Article> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.styles_seen.lock().unwrap().push(style.to_string());
            match (&self.article, &self.failure) {
                (_, Some(error)) => Err(PublishError::Network(error.clone()).into()),
                (Some(article), None) => Ok(article.clone()),
                (None, None) => unreachable!(),
            }
        }
    }

    pub struct MockFeed {
        items: Vec<SourceItem>,
        failure: Option<String>,
        calls: AtomicUsize,
    }

    impl MockFeed {
        pub fn returning(items: Vec<SourceItem>) -> Self {
            Self {
                items,
                failure: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(error: &str) -> Self {
            Self {
                items: Vec::new(),
                failure: Some(error.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for MockFeed {
        async fn fetch_recent(&self, max_age_hours: u32) -> Result<Vec<SourceItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.failure {
                return Err(PublishError::Network(error.clone()).into());
            }
            let cutoff = chrono::Utc::now().timestamp() - (max_age_hours as i64) * 3600;
            Ok(self
                .items
                .iter()
                .filter(|item| item.published_at >= cutoff)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MockDrafts {
        drafts: Mutex<Vec<Draft>>,
        published: Mutex<Vec<String>>,
    }

    impl MockDrafts {
        pub fn with(drafts: Vec<Draft>) -> Self {
            Self {
                drafts: Mutex::new(drafts),
                published: Mutex::new(Vec::new()),
            }
        }

        pub fn published_ids(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DraftStore for MockDrafts {
        async fn fetch(&self, draft_id: &str) -> Result<Option<Draft>> {
            Ok(self
                .drafts
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.id == draft_id)
                .cloned())
        }

        async fn mark_published(&self, draft_id: &str) -> Result<()> {
            self.published.lock().unwrap().push(draft_id.to_string());
            Ok(())
        }
    }

    pub struct MockClassifier {
        answer: String,
        calls: AtomicUsize,
    }

    impl MockClassifier {
        pub fn answering(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TopicClassifier for MockClassifier {
        async fn classify(&self, _labels: &[String], _context: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    fn item(title: &str, age_hours: i64) -> SourceItem {
        SourceItem {
            title: title.to_string(),
            link: format!("https://feed.example/{}", title),
            summary: "summary".to_string(),
            published_at: chrono::Utc::now().timestamp() - age_hours * 3600,
        }
    }

    #[tokio::test]
    async fn test_mock_feed_filters_by_age() {
        let feed = MockFeed::returning(vec![item("fresh", 2), item("stale", 100)]);
        let items = feed.fetch_recent(48).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "fresh");
        assert_eq!(feed.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_generator_records_style() {
        let generator = MockGenerator::returning(Article {
            title: "T".to_string(),
            html: "<p>body</p>".to_string(),
            image_keyword: "k".to_string(),
        });
        generator.generate(&[], "casual", None).await.unwrap();
        assert_eq!(generator.styles_seen(), vec!["casual".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_generator_failure() {
        let generator = MockGenerator::failing("api unavailable");
        assert!(generator.generate(&[], "casual", None).await.is_err());
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_drafts_fetch_and_mark() {
        let drafts = MockDrafts::with(vec![Draft {
            id: "d1".to_string(),
            title: "Title".to_string(),
            html: "<p>x</p>".to_string(),
            category: None,
            image_keyword: "kw".to_string(),
        }]);

        assert!(drafts.fetch("d1").await.unwrap().is_some());
        assert!(drafts.fetch("missing").await.unwrap().is_none());

        drafts.mark_published("d1").await.unwrap();
        assert_eq!(drafts.published_ids(), vec!["d1".to_string()]);
    }
}
