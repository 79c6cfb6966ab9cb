//! Content insertion into rich-text editors
//!
//! The editors offer no stable API for setting content, so insertion is a
//! cascade of strategies from least to most invasive. No strategy is
//! trusted: after every attempt the engine reads the editor content back
//! and runs structural verification. First verified attempt wins; full
//! exhaustion is an insertion failure.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::InsertionConfig;
use crate::error::{PublishError, Result};

/// One way of getting HTML into the editor. Attempts are allowed to fail
/// or silently do nothing; the engine verifies outcomes externally.
#[async_trait]
pub trait InsertStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, driver: &dyn PageDriver, html: &str) -> Result<()>;
}

/// Call the editor's own content setter, if the page exposes one.
pub struct ScriptedSetContent;

#[async_trait]
impl InsertStrategy for ScriptedSetContent {
    fn name(&self) -> &'static str {
        "scripted-set-content"
    }

    async fn attempt(&self, driver: &dyn PageDriver, html: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const editor = window.Editor || window.tinymce?.activeEditor;
                if (!editor || typeof editor.setContent !== 'function') return false;
                editor.setContent({html});
                return true;
            }})()"#,
            html = encode(html)?
        );
        let value = driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Insertion("editor exposes no content setter".to_string()).into())
        }
    }
}

/// Flip the editor into its raw/HTML mode, write the markup into the
/// backing textarea, flip back.
pub struct RawModeSwap;

#[async_trait]
impl InsertStrategy for RawModeSwap {
    fn name(&self) -> &'static str {
        "raw-mode-swap"
    }

    async fn attempt(&self, driver: &dyn PageDriver, html: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const toggle = document.querySelector('#editor-mode-html, .btn_html_mode');
                const area = document.querySelector('textarea.raw-editor, #html-editor-textarea');
                if (!toggle || !area) return false;
                toggle.click();
                area.value = {html};
                area.dispatchEvent(new Event('input', {{ bubbles: true }}));
                const back = document.querySelector('#editor-mode-rich, .btn_rich_mode');
                if (back) back.click();
                return true;
            }})()"#,
            html = encode(html)?
        );
        let value = driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Insertion("raw editor mode not reachable".to_string()).into())
        }
    }
}

/// Write straight into the contenteditable surface and fire input events.
pub struct DomReplace;

#[async_trait]
impl InsertStrategy for DomReplace {
    fn name(&self) -> &'static str {
        "dom-replace"
    }

    async fn attempt(&self, driver: &dyn PageDriver, html: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const surface = document.querySelector('[contenteditable="true"]');
                if (!surface) return false;
                surface.innerHTML = {html};
                surface.dispatchEvent(new Event('input', {{ bubbles: true }}));
                surface.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            html = encode(html)?
        );
        let value = driver.eval(&script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Insertion("no contenteditable surface found".to_string()).into())
        }
    }
}

/// Copy the HTML to the clipboard as rich text, then paste into the editor.
/// Pasting is flaky enough to deserve its own retry budget.
pub struct ClipboardPaste {
    pub attempts: u32,
}

#[async_trait]
impl InsertStrategy for ClipboardPaste {
    fn name(&self) -> &'static str {
        "clipboard-paste"
    }

    async fn attempt(&self, driver: &dyn PageDriver, html: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=self.attempts.max(1) {
            match self.paste_once(driver, html).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, error = %e, "clipboard paste attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            PublishError::Insertion("clipboard paste produced nothing".to_string()).into()
        }))
    }
}

impl ClipboardPaste {
    async fn paste_once(&self, driver: &dyn PageDriver, html: &str) -> Result<()> {
        driver.write_clipboard_html(html).await?;
        let script = r#"(() => {
            const surface = document.querySelector('[contenteditable="true"]');
            if (!surface) return false;
            surface.focus();
            document.getSelection().selectAllChildren(surface);
            return document.execCommand('paste');
        })()"#;
        let value = driver.eval(script).await?;
        if value.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PublishError::Insertion("paste command rejected".to_string()).into())
        }
    }
}

/// Runs the strategy cascade with post-attempt verification.
pub struct InsertionEngine {
    strategies: Vec<Box<dyn InsertStrategy>>,
    config: InsertionConfig,
}

impl InsertionEngine {
    pub fn new(config: InsertionConfig) -> Self {
        let strategies: Vec<Box<dyn InsertStrategy>> = vec![
            Box::new(ScriptedSetContent),
            Box::new(RawModeSwap),
            Box::new(DomReplace),
            Box::new(ClipboardPaste {
                attempts: config.paste_attempts,
            }),
        ];
        Self { strategies, config }
    }

    #[cfg(test)]
    pub fn with_strategies(config: InsertionConfig, strategies: Vec<Box<dyn InsertStrategy>>) -> Self {
        Self { strategies, config }
    }

    /// Insert `html` into the editor, verifying each attempt's outcome.
    /// Returns the name of the strategy that produced verified content.
    pub async fn insert(&self, driver: &dyn PageDriver, html: &str) -> Result<&'static str> {
        for strategy in &self.strategies {
            if let Err(e) = strategy.attempt(driver, html).await {
                debug!(strategy = strategy.name(), error = %e, "insertion strategy failed outright");
                continue;
            }

            let extracted = extract_editor_content(driver).await?;
            match verify(&extracted, &self.config) {
                Ok(()) => {
                    info!(strategy = strategy.name(), "content insertion verified");
                    return Ok(strategy.name());
                }
                Err(reason) => {
                    warn!(strategy = strategy.name(), reason, "insertion verification rejected result");
                }
            }
        }

        Err(PublishError::Insertion("all insertion strategies exhausted".to_string()).into())
    }
}

/// Read the editor content back for verification.
pub async fn extract_editor_content(driver: &dyn PageDriver) -> Result<String> {
    let script = r#"(() => {
        const editor = window.Editor || window.tinymce?.activeEditor;
        if (editor && typeof editor.getContent === 'function') return editor.getContent();
        const surface = document.querySelector('[contenteditable="true"]');
        return surface ? surface.innerHTML : '';
    })()"#;
    let value = driver.eval(script).await?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

/// Structural verification of inserted content.
///
/// Size alone is not enough: a paste that lands as one giant escaped text
/// node passes a byte check but is garbage. The content must be large
/// enough AND structured (block elements, or images plus real text), and
/// must not look like unrendered markdown unless the block structure is
/// strong enough to prove the stray characters are incidental.
pub fn verify(content: &str, config: &InsertionConfig) -> std::result::Result<(), &'static str> {
    if content.len() < config.min_content_bytes {
        return Err("content below minimum size");
    }

    let blocks = count_block_elements(content);
    let has_images = content.contains("<img");
    let text_len = visible_text_len(content);

    let structured = blocks >= config.min_block_elements
        || (has_images && text_len >= config.min_text_with_images);
    if !structured {
        return Err("content lacks block structure");
    }

    if looks_like_raw_markdown(content) && blocks < config.strong_structure_blocks {
        return Err("content looks like unrendered markdown");
    }

    Ok(())
}

fn count_block_elements(content: &str) -> usize {
    // Full tag-open matches only; a bare "<p" prefix would also count
    // <pre> and <picture>
    let mut count = content.matches("<p>").count() + content.matches("<p ").count();
    for level in 1..=6 {
        count += content.matches(&format!("<h{}>", level)).count();
        count += content.matches(&format!("<h{} ", level)).count();
    }
    count
}

fn visible_text_len(content: &str) -> usize {
    let mut len = 0;
    let mut in_tag = false;
    for ch in content.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !c.is_whitespace() => len += 1,
            _ => {}
        }
    }
    len
}

fn looks_like_raw_markdown(content: &str) -> bool {
    let mut len = 0;
    let mut text = String::new();
    let mut in_tag = false;
    for ch in content.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => {
                text.push(c);
                len += 1;
                if len > 4096 {
                    break;
                }
            }
            _ => {}
        }
    }

    text.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("# ")
            || line.starts_with("## ")
            || line.starts_with("### ")
            || (line.starts_with('|') && line.trim_end().ends_with('|') && line.matches('|').count() >= 3)
    })
}

fn encode(html: &str) -> Result<String> {
    serde_json::to_string(html).map_err(|e| PublishError::Insertion(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockPage;

    fn big_paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| format!("<p>paragraph number {} with enough words to carry real weight in the size check here plus extra ballast words to clear the minimum byte gate</p>", i))
            .collect()
    }

    #[test]
    fn test_verify_accepts_structured_content() {
        let config = InsertionConfig::default();
        assert!(verify(&big_paragraphs(4), &config).is_ok());
    }

    #[test]
    fn test_verify_rejects_small_content() {
        let config = InsertionConfig::default();
        assert_eq!(
            verify("<p>tiny</p>", &config),
            Err("content below minimum size")
        );
    }

    #[test]
    fn test_verify_rejects_flat_text_blob() {
        let config = InsertionConfig::default();
        let blob = "x".repeat(500);
        assert_eq!(verify(&blob, &config), Err("content lacks block structure"));
    }

    #[test]
    fn test_verify_images_with_text_pass_without_blocks() {
        let config = InsertionConfig::default();
        let content = format!(
            "<div><img src=\"https://img.example/a.jpg\">{}</div>",
            "word ".repeat(80)
        );
        assert!(verify(&content, &config).is_ok());
    }

    #[test]
    fn test_verify_pre_and_picture_do_not_count_as_blocks() {
        let config = InsertionConfig::default();
        let content = format!("<pre>{}</pre><picture></picture>", "code ".repeat(100));
        assert_eq!(verify(&content, &config), Err("content lacks block structure"));
    }

    #[test]
    fn test_verify_rejects_top_level_markdown_heading() {
        let config = InsertionConfig::default();
        let content = format!(
            "{}\n# A Top Level Heading That Never Got Rendered\nmore prose",
            big_paragraphs(3)
        );
        assert_eq!(
            verify(&content, &config),
            Err("content looks like unrendered markdown")
        );
    }

    #[test]
    fn test_verify_rejects_raw_markdown() {
        let config = InsertionConfig::default();
        let content = format!(
            "{}\n## A Heading That Never Got Rendered\nmore prose follows here",
            big_paragraphs(3)
        );
        assert_eq!(
            verify(&content, &config),
            Err("content looks like unrendered markdown")
        );
    }

    #[test]
    fn test_verify_strong_structure_tolerates_markdown_chars() {
        let config = InsertionConfig::default();
        let content = format!("{}\n## stray heading syntax", big_paragraphs(10));
        assert!(verify(&content, &config).is_ok());
    }

    #[test]
    fn test_verify_rejects_markdown_table() {
        let config = InsertionConfig::default();
        let content = format!("{}\n| a | b | c |", big_paragraphs(3));
        assert_eq!(
            verify(&content, &config),
            Err("content looks like unrendered markdown")
        );
    }

    #[tokio::test]
    async fn test_engine_first_verified_strategy_wins() {
        let page = MockPage::new();
        let html = big_paragraphs(5);
        // Scripted setter available; extraction returns the inserted content
        page.on_eval("setContent", serde_json::json!(true));
        page.on_eval("getContent", serde_json::json!(html.clone()));

        let engine = InsertionEngine::new(InsertionConfig::default());
        let winner = engine.insert(&page, &html).await.unwrap();
        assert_eq!(winner, "scripted-set-content");
    }

    #[tokio::test]
    async fn test_engine_falls_through_failed_strategy() {
        let html = big_paragraphs(5);
        let engine = InsertionEngine::with_strategies(
            InsertionConfig::default(),
            vec![Box::new(FailingStrategy), Box::new(NoopStrategy)],
        );

        let page = MockPage::new();
        page.on_eval("getContent", serde_json::json!(html.clone()));
        let winner = engine.insert(&page, &html).await.unwrap();
        assert_eq!(winner, "noop");
    }

    #[tokio::test]
    async fn test_engine_rejects_unverified_success() {
        // Strategy claims success but the editor reads back empty
        let engine = InsertionEngine::with_strategies(
            InsertionConfig::default(),
            vec![Box::new(NoopStrategy)],
        );

        let page = MockPage::new();
        page.on_eval("getContent", serde_json::json!(""));
        let result = engine.insert(&page, &big_paragraphs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dom_replace_success_skips_clipboard() {
        let page = MockPage::new();
        let html = big_paragraphs(5);
        // Scripted setter and raw mode unavailable; the contenteditable
        // surface works. Rule order matters: extraction asks getContent.
        page.on_eval("getContent", serde_json::json!(html.clone()));
        page.on_eval("contenteditable", serde_json::json!(true));

        let engine = InsertionEngine::new(InsertionConfig::default());
        let winner = engine.insert(&page, &html).await.unwrap();
        assert_eq!(winner, "dom-replace");
        assert!(page.clipboard_writes().is_empty());
    }

    #[tokio::test]
    async fn test_engine_exhaustion_is_insertion_error() {
        let page = MockPage::new();
        // Every strategy's probe script answers false: nothing applies
        let engine = InsertionEngine::new(InsertionConfig::default());
        let result = engine.insert(&page, &big_paragraphs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clipboard_paste_retries() {
        let page = MockPage::new();
        // Paste command always rejected
        page.on_eval("execCommand('paste')", serde_json::json!(false));

        let strategy = ClipboardPaste { attempts: 3 };
        let result = strategy.attempt(&page, "<p>content</p>").await;
        assert!(result.is_err());
        // One clipboard write per attempt
        assert_eq!(page.clipboard_writes().len(), 3);
    }

    struct FailingStrategy;

    #[async_trait]
    impl InsertStrategy for FailingStrategy {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn attempt(&self, _driver: &dyn PageDriver, _html: &str) -> Result<()> {
            Err(PublishError::Insertion("nope".to_string()).into())
        }
    }

    struct NoopStrategy;

    #[async_trait]
    impl InsertStrategy for NoopStrategy {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn attempt(&self, _driver: &dyn PageDriver, _html: &str) -> Result<()> {
            Ok(())
        }
    }
}
