//! Browser session management
//!
//! Owns one authenticated session per target platform. Validation is
//! two-tier: a cheap persisted-credential freshness check first, then a
//! landing-page DOM probe as fallback. Either success path re-persists the
//! full snapshot. Results are memoized for a short window so repeated
//! checks inside one run cost nothing.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlx::Row;
use tracing::{debug, info, warn};

use crate::browser::{selector_present, CookieRecord, PageDriver};
use crate::cancel::CancelToken;
use crate::config::PlatformConfig;
use crate::db::Database;
use crate::error::{DbError, PublishError, Result};

/// How long a validation result is trusted without re-checking.
const MEMO_TTL: Duration = Duration::from_secs(30);

/// Persisted credentials older than this always go through the DOM probe.
const FRESH_WINDOW_SECS: i64 = 24 * 3600;

/// Persisted session state, as read back from storage.
///
/// Older installs persisted only a cookie array; current code persists the
/// full snapshot. The read path tries full, then legacy, then gives up —
/// the format column makes this a tagged union rather than field probing.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistedSession {
    Full {
        storage_state: String,
        cookies: Vec<CookieRecord>,
    },
    Legacy {
        cookies: Vec<CookieRecord>,
    },
}

impl PersistedSession {
    pub fn cookies(&self) -> &[CookieRecord] {
        match self {
            PersistedSession::Full { cookies, .. } => cookies,
            PersistedSession::Legacy { cookies } => cookies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session: PersistedSession,
    pub last_validated_at: Option<i64>,
    pub last_login_at: Option<i64>,
}

pub struct SessionManager {
    driver: Arc<dyn PageDriver>,
    db: Database,
    platform: PlatformConfig,
    memo: Mutex<Option<(Instant, bool)>>,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn PageDriver>, db: Database, platform: PlatformConfig) -> Self {
        Self {
            driver,
            db,
            platform,
            memo: Mutex::new(None),
        }
    }

    pub fn platform_name(&self) -> &str {
        &self.platform.name
    }

    /// Check whether the session is live.
    ///
    /// Tier 1 trusts a fresh persisted snapshot (< 24h since login, auth
    /// cookies present) without touching the page. Tier 2 restores cookies,
    /// loads the landing page, and reads DOM markers: the login affordance
    /// must be absent and the identity element present. A failed probe
    /// invalidates the persisted session.
    pub async fn check_logged_in(&self) -> Result<bool> {
        if let Some(memoized) = self.memo_hit() {
            debug!(platform = %self.platform.name, memoized, "session check served from memo");
            return Ok(memoized);
        }

        let record = self.load().await?;

        if let Some(ref record) = record {
            if self.is_fresh(record) {
                debug!(platform = %self.platform.name, "persisted session is fresh, skipping probe");
                self.touch_validated().await?;
                self.memoize(true);
                return Ok(true);
            }
        }

        let live = self.probe_landing_page(record.as_ref()).await?;
        if live {
            self.persist_snapshot().await?;
        } else {
            warn!(platform = %self.platform.name, "session probe failed, invalidating persisted state");
            self.invalidate().await?;
        }
        self.memoize(live);
        Ok(live)
    }

    /// Drive the interactive login flow: wait for the operator, then
    /// persist the resulting session.
    pub async fn login(&self, cancel: &CancelToken) -> Result<()> {
        self.await_login(cancel).await?;
        self.complete_login().await
    }

    /// Navigate to the login page and poll URL/DOM until either the
    /// identity marker appears or the timeout budget runs out. Cancellable
    /// at every poll step; persists nothing.
    pub async fn await_login(&self, cancel: &CancelToken) -> Result<()> {
        cancel.checkpoint()?;

        self.driver.goto(&self.platform.login_url).await?;

        let deadline = Instant::now() + Duration::from_secs(self.platform.login_timeout_secs);
        while Instant::now() < deadline {
            cancel.checkpoint()?;

            if self.looks_logged_in().await? {
                info!(platform = %self.platform.name, "login completed");
                return Ok(());
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        Err(PublishError::Authentication(format!(
            "login to {} did not complete within {}s",
            self.platform.name, self.platform.login_timeout_secs
        ))
        .into())
    }

    /// Persist the full snapshot after a successful interactive login.
    /// Not cancellable: interrupting here would strand a half-recorded
    /// session.
    pub async fn complete_login(&self) -> Result<()> {
        self.persist_snapshot().await?;
        self.mark_logged_in().await?;
        self.memoize(true);
        Ok(())
    }

    /// Forget the persisted session and the memo.
    pub async fn invalidate(&self) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE platform = ?")
            .bind(&self.platform.name)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        *self.memo.lock().unwrap() = None;
        Ok(())
    }

    /// Read the persisted session, trying full then legacy format.
    pub async fn load(&self) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT format, storage_state, cookies, last_validated_at, last_login_at
            FROM sessions WHERE platform = ?
            "#,
        )
        .bind(&self.platform.name)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let format: String = row.get("format");
        let cookies_json: Option<String> = row.get("cookies");
        let cookies: Vec<CookieRecord> = cookies_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        let session = match format.as_str() {
            "full" => {
                let storage_state: Option<String> = row.get("storage_state");
                PersistedSession::Full {
                    storage_state: storage_state.unwrap_or_else(|| "{}".to_string()),
                    cookies,
                }
            }
            "legacy" => PersistedSession::Legacy { cookies },
            other => {
                warn!(platform = %self.platform.name, format = other, "unknown session format, ignoring");
                return Ok(None);
            }
        };

        Ok(Some(SessionRecord {
            session,
            last_validated_at: row.get("last_validated_at"),
            last_login_at: row.get("last_login_at"),
        }))
    }

    /// Seed a legacy cookie-only record (migration path from old installs).
    pub async fn save_legacy_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        let cookies_json =
            serde_json::to_string(cookies).map_err(|e| PublishError::Browser(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (platform, format, storage_state, cookies, last_validated_at, last_login_at)
            VALUES (?, 'legacy', NULL, ?, NULL, NULL)
            ON CONFLICT(platform) DO UPDATE SET
                format = 'legacy', storage_state = NULL, cookies = excluded.cookies
            "#,
        )
        .bind(&self.platform.name)
        .bind(cookies_json)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    fn memo_hit(&self) -> Option<bool> {
        let memo = self.memo.lock().unwrap();
        match *memo {
            Some((at, value)) if at.elapsed() < MEMO_TTL => Some(value),
            _ => None,
        }
    }

    fn memoize(&self, value: bool) {
        *self.memo.lock().unwrap() = Some((Instant::now(), value));
    }

    fn is_fresh(&self, record: &SessionRecord) -> bool {
        let now = chrono::Utc::now().timestamp();
        let age_ok = record
            .last_login_at
            .map(|at| now - at < FRESH_WINDOW_SECS)
            .unwrap_or(false);
        // Auth markers: a full snapshot with at least one unexpired cookie
        let markers_ok = matches!(record.session, PersistedSession::Full { .. })
            && record.session.cookies().iter().any(|c| {
                c.expires
                    .map(|exp| exp > now as f64)
                    .unwrap_or(true) // session cookies carry no expiry
            });
        age_ok && markers_ok
    }

    async fn probe_landing_page(&self, record: Option<&SessionRecord>) -> Result<bool> {
        if let Some(record) = record {
            if !record.session.cookies().is_empty() {
                self.driver.set_cookies(record.session.cookies()).await?;
            }
        }

        self.driver.goto(&self.platform.landing_url).await?;
        self.looks_logged_in().await
    }

    async fn looks_logged_in(&self) -> Result<bool> {
        let login_visible =
            selector_present(self.driver.as_ref(), &self.platform.login_marker).await?;
        if login_visible {
            return Ok(false);
        }
        selector_present(self.driver.as_ref(), &self.platform.identity_marker).await
    }

    /// Capture cookies plus local storage and persist as the full format.
    async fn persist_snapshot(&self) -> Result<()> {
        let cookies = self.driver.cookies().await?;
        let storage = self
            .driver
            .eval("JSON.stringify(Object.assign({}, window.localStorage))")
            .await?;
        let storage_state = storage.as_str().unwrap_or("{}").to_string();

        let cookies_json =
            serde_json::to_string(&cookies).map_err(|e| PublishError::Browser(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO sessions (platform, format, storage_state, cookies, last_validated_at, last_login_at)
            VALUES (?, 'full', ?, ?, ?, COALESCE((SELECT last_login_at FROM sessions WHERE platform = ?), NULL))
            ON CONFLICT(platform) DO UPDATE SET
                format = 'full',
                storage_state = excluded.storage_state,
                cookies = excluded.cookies,
                last_validated_at = excluded.last_validated_at
            "#,
        )
        .bind(&self.platform.name)
        .bind(storage_state)
        .bind(cookies_json)
        .bind(now)
        .bind(&self.platform.name)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn touch_validated(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE sessions SET last_validated_at = ? WHERE platform = ?")
            .bind(now)
            .bind(&self.platform.name)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn mark_logged_in(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE sessions SET last_login_at = ? WHERE platform = ?")
            .bind(now)
            .bind(&self.platform.name)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}
