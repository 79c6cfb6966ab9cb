//! Chromium-backed page driver
//!
//! Drives one long-lived page over CDP via chromiumoxide. Cookie values
//! cross the boundary as JSON so the wire shape (camelCase CDP fields)
//! stays in one place.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::browser::{CookieRecord, PageDriver};
use crate::config;
use crate::error::{PublishError, Result};

pub struct ChromiumDriver {
    _browser: Browser,
    page: Page,
    _event_loop: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch a browser and open the single page all work goes through.
    pub async fn launch(cfg: &config::BrowserConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(cfg.window_width, cfg.window_height);
        if !cfg.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(PublishError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PublishError::Browser(e.to_string()))?;

        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PublishError::Browser(e.to_string()))?;

        debug!("chromium driver launched");

        Ok(Self {
            _browser: browser,
            page,
            _event_loop: event_loop,
        })
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| PublishError::Network(format!("navigation to {} failed: {}", url, e)))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| PublishError::Browser(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .map_err(|e| PublishError::Browser(format!("eval failed: {}", e)))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| PublishError::Browser(e.to_string()))?;

        let mut records = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let value = serde_json::to_value(&cookie)
                .map_err(|e| PublishError::Browser(e.to_string()))?;
            records.push(CookieRecord {
                name: value["name"].as_str().unwrap_or_default().to_string(),
                value: value["value"].as_str().unwrap_or_default().to_string(),
                domain: value["domain"].as_str().unwrap_or_default().to_string(),
                path: value["path"].as_str().unwrap_or("/").to_string(),
                expires: value["expires"].as_f64(),
                secure: value["secure"].as_bool().unwrap_or(false),
                http_only: value["httpOnly"].as_bool().unwrap_or(false),
            });
        }
        Ok(records)
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let param: CookieParam = serde_json::from_value(serde_json::json!({
                "name": cookie.name,
                "value": cookie.value,
                "domain": cookie.domain,
                "path": cookie.path,
                "expires": cookie.expires,
                "secure": cookie.secure,
                "httpOnly": cookie.http_only,
            }))
            .map_err(|e| PublishError::Browser(e.to_string()))?;
            params.push(param);
        }

        self.page
            .set_cookies(params)
            .await
            .map_err(|e| PublishError::Browser(e.to_string()))?;
        Ok(())
    }

    async fn write_clipboard_html(&self, html: &str) -> Result<()> {
        // Copy through a hidden selection so the clipboard carries a
        // text/html entry, which the editors accept as rich text.
        let script = format!(
            r#"(() => {{
                const holder = document.createElement('div');
                holder.style.position = 'fixed';
                holder.style.left = '-10000px';
                holder.setAttribute('contenteditable', 'true');
                holder.innerHTML = {html};
                document.body.appendChild(holder);
                const range = document.createRange();
                range.selectNodeContents(holder);
                const selection = window.getSelection();
                selection.removeAllRanges();
                selection.addRange(range);
                const copied = document.execCommand('copy');
                selection.removeAllRanges();
                holder.remove();
                return copied;
            }})()"#,
            html = serde_json::to_string(html)
                .map_err(|e| PublishError::Browser(e.to_string()))?
        );

        let value = self.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Browser("clipboard copy was rejected".to_string()).into())
        }
    }
}
