//! Mock page implementation for testing
//!
//! Simulates a driven browser page without a browser: eval rules answer
//! scripts by substring match, navigations and clipboard writes are
//! recorded for verification, and failures can be injected per operation.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::browser::{CookieRecord, PageDriver};
use crate::error::{PublishError, Result};

#[derive(Default)]
struct MockState {
    url: String,
    navigations: Vec<String>,
    eval_log: Vec<String>,
    eval_rules: Vec<(String, serde_json::Value)>,
    cookies: Vec<CookieRecord>,
    clipboard_html: Vec<String>,
    fail_navigation: Option<String>,
    fail_eval_containing: Option<(String, String)>,
}

/// Scripted stand-in for a live page.
#[derive(Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: &str) -> Self {
        let page = Self::new();
        page.state.lock().unwrap().url = url.to_string();
        page
    }

    /// Answer any eval whose script contains `needle` with `value`.
    /// Rules are consulted in insertion order; first match wins.
    pub fn on_eval(&self, needle: &str, value: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .eval_rules
            .push((needle.to_string(), value));
    }

    /// Fail any eval whose script contains `needle`.
    pub fn fail_eval_containing(&self, needle: &str, error: &str) {
        self.state.lock().unwrap().fail_eval_containing =
            Some((needle.to_string(), error.to_string()));
    }

    /// Fail the next navigation with the given error.
    pub fn fail_navigation(&self, error: &str) {
        self.state.lock().unwrap().fail_navigation = Some(error.to_string());
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().unwrap().url = url.to_string();
    }

    pub fn navigation_count(&self) -> usize {
        self.state.lock().unwrap().navigations.len()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn eval_log(&self) -> Vec<String> {
        self.state.lock().unwrap().eval_log.clone()
    }

    pub fn clipboard_writes(&self) -> Vec<String> {
        self.state.lock().unwrap().clipboard_html.clone()
    }

    pub fn install_cookies(&self, cookies: Vec<CookieRecord>) {
        self.state.lock().unwrap().cookies = cookies;
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_navigation.take() {
            return Err(PublishError::Network(error).into());
        }
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        let mut state = self.state.lock().unwrap();
        state.eval_log.push(script.to_string());

        if let Some((needle, error)) = &state.fail_eval_containing {
            if script.contains(needle.as_str()) {
                return Err(PublishError::Browser(error.clone()).into());
            }
        }

        for (needle, value) in &state.eval_rules {
            if script.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }

        Ok(serde_json::Value::Null)
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        self.state.lock().unwrap().cookies = cookies.to_vec();
        Ok(())
    }

    async fn write_clipboard_html(&self, html: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .clipboard_html
            .push(html.to_string());
        Ok(())
    }
}
