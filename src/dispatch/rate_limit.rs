//! Per-user, per-channel daily send quota.
//!
//! Counters live in the store and are keyed by (user, channel, UTC day).
//! Reserving a slot is one conditional upsert, so overlapping dispatch runs
//! cannot both take the last slot.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::dispatch::model::Channel;
use crate::error::DatabaseError;
use crate::store::Database;

/// Source of the current time, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used for quota keys.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable time for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// What a reserved slot counts toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    /// Every send attempt consumes a slot, whatever the provider replies.
    #[default]
    Attempts,
    /// Only accepted sends consume a slot; failed sends give theirs back.
    Deliveries,
}

impl std::str::FromStr for CountPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attempts" => Ok(Self::Attempts),
            "deliveries" => Ok(Self::Deliveries),
            _ => Err(format!("Unknown count policy: {} (expected attempts|deliveries)", s)),
        }
    }
}

/// A slot taken by `check_and_reserve`, pinned to the day it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: String,
    pub channel: Channel,
    pub day: NaiveDate,
}

/// Quota state of one channel for one user today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelUsage {
    pub channel: Channel,
    pub sent_today: u32,
    pub cap: u32,
    pub remaining: u32,
}

/// Daily cap enforcement over the store's send counters.
pub struct RateLimiter {
    db: Arc<dyn Database>,
    caps: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(db: Arc<dyn Database>, caps: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { db, caps, clock }
    }

    /// Take one slot for (user, channel, today) if under the cap.
    ///
    /// `None` means denied; the counter is left untouched.
    pub async fn check_and_reserve(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<Option<Reservation>, DatabaseError> {
        let cap = self.caps.cap_for(channel);
        let day = self.clock.today();
        if cap == 0 {
            return Ok(None);
        }

        if self.db.reserve_send_slot(user_id, channel, day, cap).await? {
            Ok(Some(Reservation {
                user_id: user_id.to_string(),
                channel,
                day,
            }))
        } else {
            Ok(None)
        }
    }

    /// Give a reserved slot back.
    pub async fn release(&self, reservation: &Reservation) -> Result<(), DatabaseError> {
        self.db
            .release_send_slot(&reservation.user_id, reservation.channel, reservation.day)
            .await
    }

    /// Per-channel usage for today, in `Channel::ALL` order.
    pub async fn usage(&self, user_id: &str) -> Result<Vec<ChannelUsage>, DatabaseError> {
        let day = self.clock.today();
        let mut usage = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let sent_today = self.db.get_send_count(user_id, channel, day).await?;
            let cap = self.caps.cap_for(channel);
            usage.push(ChannelUsage {
                channel,
                sent_today,
                cap,
                remaining: cap.saturating_sub(sent_today),
            });
        }
        Ok(usage)
    }
}
