//! Driving one article through the platform's web editor
//!
//! The platform has no authoring API. Publishing means navigating the
//! real editor page, setting the title, inserting content, picking a
//! category in the live taxonomy, and pressing the platform's own publish
//! or reserve control. Network-flavored steps run under bounded retry
//! with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::{PlatformConfig, SchedulerConfig};
use crate::error::{is_transient, PublishError, Result};
use crate::insert::InsertionEngine;
use crate::taxonomy::{resolve_category, CategoryAction};
use crate::throttle::{PublishMode, UsageThrottler};
use crate::types::Article;

/// Retry a transient-failure-prone operation with exponential backoff.
/// Non-transient errors surface immediately.
pub async fn with_retry<T, F, Fut>(config: &SchedulerConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_network_attempts.max(1);
    let mut delay = config.backoff_base_secs;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < attempts => {
                warn!(what, attempt, error = %e, "transient failure, backing off");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}

pub struct Publisher {
    driver: Arc<dyn PageDriver>,
    insertion: InsertionEngine,
    throttler: UsageThrottler,
    platform: PlatformConfig,
    scheduler: SchedulerConfig,
}

/// Result of one publish, for logging and counters.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published,
    Reserved(String),
}

impl Publisher {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        insertion: InsertionEngine,
        throttler: UsageThrottler,
        platform: PlatformConfig,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            driver,
            insertion,
            throttler,
            platform,
            scheduler,
        }
    }

    /// Publish one assembled article. The session must already be live.
    pub async fn publish(&self, article: &Article, category: Option<&str>) -> Result<PublishOutcome> {
        with_retry(&self.scheduler, "editor navigation", || {
            self.driver.goto(&self.platform.editor_url)
        })
        .await?;

        self.set_title(&article.title).await?;
        let strategy = self.insertion.insert(self.driver.as_ref(), &article.html).await?;
        debug!(strategy, "editor content in place");

        if let Some(desired) = category {
            self.apply_category(desired).await?;
        }

        let mode = self
            .throttler
            .decide(&self.platform.name, &self.platform.account_id)
            .await?;

        let outcome = match mode {
            PublishMode::Immediate => {
                with_retry(&self.scheduler, "publish click", || self.press_publish())
                    .await?;
                self.throttler
                    .record_publish(&self.platform.name, &self.platform.account_id)
                    .await?;
                info!(platform = %self.platform.name, title = %article.title, "article published");
                PublishOutcome::Published
            }
            PublishMode::Reserved(slot) => {
                let stamp = slot.to_rfc3339_opts(SecondsFormat::Secs, false);
                with_retry(&self.scheduler, "reserve click", || self.press_reserve(&stamp))
                    .await?;
                info!(platform = %self.platform.name, title = %article.title, slot = %stamp, "article reserved");
                PublishOutcome::Reserved(stamp)
            }
        };

        Ok(outcome)
    }

    async fn set_title(&self, title: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const input = document.querySelector('#post-title, input[name="title"], .textarea_tit');
                if (!input) return false;
                input.value = {title};
                input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return true;
            }})()"#,
            title = encode(title)?
        );
        let value = self.driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Browser("title input not found".to_string()).into())
        }
    }

    /// Resolve the desired category against the live list and drive the
    /// category control accordingly.
    async fn apply_category(&self, desired: &str) -> Result<()> {
        let available = self.read_categories().await?;
        let action = resolve_category(
            desired,
            &available,
            self.platform.fallback_category.as_deref(),
        );

        match action {
            CategoryAction::Select(name) => self.select_category(&name).await,
            CategoryAction::CreateThenSelect(name) => {
                info!(category = %name, "category missing, creating");
                self.create_category(&name).await?;
                self.select_category(&name).await
            }
        }
    }

    async fn read_categories(&self) -> Result<Vec<String>> {
        let script = r#"(() =>
            Array.from(document.querySelectorAll('#category-list option, .list_category button'))
                .map(el => el.textContent.trim())
                .filter(t => t.length > 0)
        )()"#;
        let value = self.driver.eval(script).await?;
        let categories: Vec<String> = serde_json::from_value(value).unwrap_or_default();
        Ok(categories)
    }

    async fn select_category(&self, name: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const target = {name};
                const nodes = document.querySelectorAll('#category-list option, .list_category button');
                for (const el of nodes) {{
                    if (el.textContent.trim() === target) {{
                        el.click ? el.click() : (el.selected = true);
                        const list = el.closest('select');
                        if (list) list.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            name = encode(name)?
        );
        let value = self.driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Browser(format!("category {:?} not selectable", name)).into())
        }
    }

    async fn create_category(&self, name: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const add = document.querySelector('.btn_add_category, #category-add');
                const input = document.querySelector('input.category-name, #category-name-input');
                if (!add || !input) return false;
                input.value = {name};
                input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                add.click();
                return true;
            }})()"#,
            name = encode(name)?
        );
        let value = self.driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Browser(format!("could not create category {:?}", name)).into())
        }
    }

    async fn press_publish(&self) -> Result<()> {
        let script = r#"(() => {
            const button = document.querySelector('#publish-btn, .btn_publish');
            if (!button) return false;
            button.click();
            return true;
        })()"#;
        let value = self.driver.eval(script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Network("publish control not found".to_string()).into())
        }
    }

    async fn press_reserve(&self, stamp: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const when = document.querySelector('#reserve-datetime, input[name="reserve_at"]');
                const button = document.querySelector('#reserve-btn, .btn_reserve');
                if (!when || !button) return false;
                when.value = {stamp};
                when.dispatchEvent(new Event('change', {{ bubbles: true }}));
                button.click();
                return true;
            }})()"#,
            stamp = encode(stamp)?
        );
        let value = self.driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Network("reserve control not found".to_string()).into())
        }
    }
}

fn encode(text: &str) -> Result<String> {
    serde_json::to_string(text).map_err(|e| PublishError::Browser(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockPage;
    use crate::config::{InsertionConfig, ThrottleConfig};
    use crate::db::Database;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn article() -> Article {
        let html: String = (0..5)
            .map(|i| format!("<p>paragraph {} with enough words to pass the verification size gate</p>", i))
            .collect();
        Article {
            title: "A Title".to_string(),
            html,
            image_keyword: "coffee".to_string(),
        }
    }

    fn platform() -> PlatformConfig {
        PlatformConfig {
            name: "tistory".to_string(),
            account_id: "writer01".to_string(),
            landing_url: "https://example.blog/".to_string(),
            login_url: "https://example.blog/login".to_string(),
            editor_url: "https://example.blog/manage/newpost".to_string(),
            login_marker: "a.btn_login".to_string(),
            identity_marker: "span.my_profile".to_string(),
            login_timeout_secs: 60,
            fallback_category: Some("General".to_string()),
        }
    }

    fn fast_scheduler() -> SchedulerConfig {
        SchedulerConfig {
            backoff_base_secs: 0,
            ..SchedulerConfig::default()
        }
    }

    async fn publisher(page: &MockPage, daily_cap: u32) -> Publisher {
        let db = Database::in_memory().await.unwrap();
        Publisher::new(
            Arc::new(page.clone()),
            InsertionEngine::new(InsertionConfig::default()),
            UsageThrottler::new(
                db,
                ThrottleConfig {
                    daily_cap,
                    ..ThrottleConfig::default()
                },
            ),
            platform(),
            fast_scheduler(),
        )
    }

    fn wire_editor(page: &MockPage, html: &str) {
        page.on_eval("post-title", serde_json::json!(true));
        page.on_eval("setContent", serde_json::json!(true));
        page.on_eval("getContent", serde_json::json!(html));
        page.on_eval("category-list", serde_json::json!(["Tech", "General"]));
        page.on_eval("publish-btn", serde_json::json!(true));
        page.on_eval("reserve-btn", serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_publish_immediate_under_cap() {
        let page = MockPage::new();
        let article = article();
        wire_editor(&page, &article.html);
        let publisher = publisher(&page, 15).await;

        let outcome = publisher.publish(&article, None).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(
            page.navigations(),
            vec!["https://example.blog/manage/newpost".to_string()]
        );
        assert_eq!(
            publisher
                .throttler
                .current_count("tistory", "writer01")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_publish_over_cap_reserves() {
        let page = MockPage::new();
        let article = article();
        wire_editor(&page, &article.html);
        let publisher = publisher(&page, 0).await;

        match publisher.publish(&article, None).await.unwrap() {
            PublishOutcome::Reserved(stamp) => assert!(!stamp.is_empty()),
            other => panic!("expected reservation, got {:?}", other),
        }
        // Reservations never consume the immediate counter
        assert_eq!(
            publisher
                .throttler
                .current_count("tistory", "writer01")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_publish_applies_matched_category() {
        let page = MockPage::new();
        let article = article();
        // Selection script contains "const target", distinct from the
        // list-reading script
        page.on_eval("const target", serde_json::json!(true));
        wire_editor(&page, &article.html);
        let publisher = publisher(&page, 15).await;

        publisher.publish(&article, Some("Tech")).await.unwrap();
        let selected = page
            .eval_log()
            .iter()
            .any(|s| s.contains("const target") && s.contains("\"Tech\""));
        assert!(selected);
    }

    #[tokio::test]
    async fn test_missing_title_input_fails() {
        let page = MockPage::new();
        // No title rule: eval answers null, set_title errors
        let publisher = publisher(&page, 15).await;
        assert!(publisher.publish(&article(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let config = fast_scheduler();
        let attempts = AtomicU32::new(0);

        let value = with_retry(&config, "op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PublishError::Network("flaky".to_string()).into())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let config = fast_scheduler();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry(&config, "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PublishError::Network("down".to_string()).into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_surfaces_permanent_errors_immediately() {
        let config = fast_scheduler();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry(&config, "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PublishError::Authentication("expired".to_string()).into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
