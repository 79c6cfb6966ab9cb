//! Browser page abstraction
//!
//! The target platforms expose no authoring API, so everything happens
//! through a driven browser page. `PageDriver` is the seam: the real
//! implementation speaks CDP via chromiumoxide, and `MockPage` simulates a
//! page for tests (configurable eval rules, navigation log, clipboard).
//!
//! The page is the single shared mutable resource in the system. The
//! scheduler serializes all access; implementations are not required to
//! tolerate concurrent operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod chromium;
pub mod mock;

pub use mock::MockPage;

/// One browser cookie, in the shape we persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<f64>,
    pub secure: bool,
    pub http_only: bool,
}

/// A live browser page that operations are driven through.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate the page and wait for the load to settle.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String>;

    /// Evaluate a JavaScript expression in the page and return its JSON value.
    async fn eval(&self, script: &str) -> Result<serde_json::Value>;

    /// All cookies visible to the page.
    async fn cookies(&self) -> Result<Vec<CookieRecord>>;

    /// Install cookies before navigation (session restore).
    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()>;

    /// Place HTML on the system clipboard with an explicit rich-text entry.
    async fn write_clipboard_html(&self, html: &str) -> Result<()>;
}

/// Evaluate a selector-presence check. Returns false when eval yields
/// anything other than a boolean true.
pub async fn selector_present(driver: &dyn PageDriver, selector: &str) -> Result<bool> {
    let script = format!(
        "!!document.querySelector({})",
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
    );
    let value = driver.eval(&script).await?;
    Ok(value.as_bool().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_selector_present_true_and_false() {
        let page = MockPage::new();
        page.on_eval("span.my_profile", serde_json::json!(true));

        assert!(selector_present(&page, "span.my_profile").await.unwrap());
        assert!(!selector_present(&page, "a.btn_login").await.unwrap());
    }

    #[test]
    fn test_cookie_record_serialization() {
        let cookie = CookieRecord {
            name: "SESSION".to_string(),
            value: "abc123".to_string(),
            domain: ".example.blog".to_string(),
            path: "/".to_string(),
            expires: Some(1_900_000_000.0),
            secure: true,
            http_only: true,
        };

        let json = serde_json::to_string(&cookie).unwrap();
        let parsed: CookieRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cookie);
    }
}
