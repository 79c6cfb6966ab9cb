//! Publish-rate throttling
//!
//! The target platforms publish no rate-limit contract, so the cap here is
//! an empirically safe ceiling, enforced per (platform, account) per local
//! calendar day. Over the cap, publishes degrade to reservations: the
//! platform-side scheduled-publish feature, slotted into a low-traffic
//! morning window on the next day.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Timelike};
use rand::Rng;
use sqlx::Row;
use tracing::{debug, info};

use crate::config::ThrottleConfig;
use crate::db::Database;
use crate::error::{DbError, Result};

/// How a post leaves the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishMode {
    /// Publish now.
    Immediate,
    /// Use the platform's scheduled-publish feature for this timestamp.
    Reserved(DateTime<Local>),
}

pub struct UsageThrottler {
    db: Database,
    config: ThrottleConfig,
}

impl UsageThrottler {
    pub fn new(db: Database, config: ThrottleConfig) -> Self {
        Self { db, config }
    }

    /// Decide how the next post for this account should go out.
    ///
    /// Counters roll over lazily: the first check on a new local day
    /// resets the count before comparing against the cap.
    pub async fn decide(&self, platform: &str, account_id: &str) -> Result<PublishMode> {
        let count = self.current_count(platform, account_id).await?;
        if count < self.config.daily_cap {
            Ok(PublishMode::Immediate)
        } else {
            let slot = self.reservation_slot(Local::now());
            info!(
                platform,
                account_id,
                count,
                cap = self.config.daily_cap,
                slot = %slot,
                "daily cap reached, reserving"
            );
            Ok(PublishMode::Reserved(slot))
        }
    }

    /// Record one immediate publish against today's counter.
    pub async fn record_publish(&self, platform: &str, account_id: &str) -> Result<()> {
        let today = local_date_string();
        sqlx::query(
            r#"
            INSERT INTO usage_counters (platform, account_id, count, last_reset_date)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(platform, account_id) DO UPDATE SET
                count = CASE WHEN last_reset_date = excluded.last_reset_date
                             THEN count + 1 ELSE 1 END,
                last_reset_date = excluded.last_reset_date
            "#,
        )
        .bind(platform)
        .bind(account_id)
        .bind(&today)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Today's immediate-publish count, after lazy rollover.
    pub async fn current_count(&self, platform: &str, account_id: &str) -> Result<u32> {
        let today = local_date_string();
        let row = sqlx::query(
            "SELECT count, last_reset_date FROM usage_counters WHERE platform = ? AND account_id = ?",
        )
        .bind(platform)
        .bind(account_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else { return Ok(0) };

        let last_reset: String = row.get("last_reset_date");
        if last_reset != today {
            debug!(platform, account_id, "usage counter rolled over");
            sqlx::query(
                "UPDATE usage_counters SET count = 0, last_reset_date = ? WHERE platform = ? AND account_id = ?",
            )
            .bind(&today)
            .bind(platform)
            .bind(account_id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
            return Ok(0);
        }

        let count: i64 = row.get("count");
        Ok(count.max(0) as u32)
    }

    /// Pick the reservation timestamp: a random minute inside the
    /// configured morning window on the day after `now`.
    pub fn reservation_slot(&self, now: DateTime<Local>) -> DateTime<Local> {
        let mut rng = rand::thread_rng();
        let start = self.config.reservation_start_hour.min(23);
        let end = self.config.reservation_end_hour.min(23).max(start);
        let hour = rng.gen_range(start..=end);
        let minute = rng.gen_range(0..60u32);

        let tomorrow = now.date_naive() + ChronoDuration::days(1);
        Local
            .from_local_datetime(
                &tomorrow
                    .and_hms_opt(hour, minute, 0)
                    .unwrap_or_else(|| tomorrow.and_hms_opt(9, 0, 0).unwrap()),
            )
            .single()
            .unwrap_or(now + ChronoDuration::days(1))
    }
}

fn local_date_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn throttler(cap: u32) -> UsageThrottler {
        let db = Database::in_memory().await.unwrap();
        let config = ThrottleConfig {
            daily_cap: cap,
            ..ThrottleConfig::default()
        };
        UsageThrottler::new(db, config)
    }

    #[tokio::test]
    async fn test_under_cap_is_immediate() {
        let throttler = throttler(3).await;
        assert_eq!(
            throttler.decide("tistory", "writer01").await.unwrap(),
            PublishMode::Immediate
        );
    }

    #[tokio::test]
    async fn test_cap_reached_degrades_to_reservation() {
        let throttler = throttler(2).await;
        throttler.record_publish("tistory", "writer01").await.unwrap();
        throttler.record_publish("tistory", "writer01").await.unwrap();

        match throttler.decide("tistory", "writer01").await.unwrap() {
            PublishMode::Reserved(slot) => {
                assert!(slot > Local::now());
            }
            PublishMode::Immediate => panic!("expected reservation over the cap"),
        }
    }

    #[tokio::test]
    async fn test_counters_are_per_account() {
        let throttler = throttler(1).await;
        throttler.record_publish("tistory", "writer01").await.unwrap();

        assert_eq!(
            throttler.current_count("tistory", "writer01").await.unwrap(),
            1
        );
        assert_eq!(
            throttler.current_count("tistory", "writer02").await.unwrap(),
            0
        );
        assert_eq!(
            throttler.decide("tistory", "writer02").await.unwrap(),
            PublishMode::Immediate
        );
    }

    #[tokio::test]
    async fn test_stale_counter_rolls_over() {
        let throttler = throttler(1).await;
        // Seed a counter dated yesterday directly
        sqlx::query(
            "INSERT INTO usage_counters (platform, account_id, count, last_reset_date) VALUES (?, ?, 9, ?)",
        )
        .bind("tistory")
        .bind("writer01")
        .bind("2000-01-01")
        .execute(throttler.db.pool())
        .await
        .unwrap();

        assert_eq!(
            throttler.current_count("tistory", "writer01").await.unwrap(),
            0
        );
        assert_eq!(
            throttler.decide("tistory", "writer01").await.unwrap(),
            PublishMode::Immediate
        );
    }

    #[tokio::test]
    async fn test_reservation_slot_in_window_next_day() {
        let throttler = throttler(15).await;

        let now = Local::now();
        for _ in 0..50 {
            let slot = throttler.reservation_slot(now);
            assert_eq!(slot.date_naive(), now.date_naive() + ChronoDuration::days(1));
            assert!(slot.hour() >= 7 && slot.hour() <= 10);
        }
    }
}
