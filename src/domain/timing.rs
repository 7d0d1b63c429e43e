use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use std::sync::Mutex;

use super::meal::MealType;

// ============================================================================
// Timing Policy - meal cutoffs evaluated in the service timezone
// ============================================================================
//
// Every wall-clock decision goes through a ServiceClock bound to one fixed
// UTC offset. The host's local timezone is never consulted.
//
// ============================================================================

/// Source of "now" for the engine, bound to the service timezone.
pub trait ServiceClock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn offset(&self) -> FixedOffset;

    fn now_local(&self) -> DateTime<FixedOffset> {
        self.now_utc().with_timezone(&self.offset())
    }

    /// Calendar date in the service timezone.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }
}

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl ServiceClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Clock pinned to an instant; used by tests and replay tooling.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock reading `date hour:minute` in the given offset.
    pub fn at_local(date: NaiveDate, hour: u32, minute: u32, offset: FixedOffset) -> Self {
        let local = date
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| naive.and_local_timezone(offset).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self::new(local, offset)
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl ServiceClock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Last hour (exclusive) at which a same-day order may be placed or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoffs {
    pub lunch_hour: u32,
    pub dinner_hour: u32,
}

impl Default for Cutoffs {
    fn default() -> Self {
        Self {
            lunch_hour: 11,
            dinner_hour: 19,
        }
    }
}

impl Cutoffs {
    pub fn hour_for(&self, meal_type: MealType) -> u32 {
        match meal_type {
            MealType::Lunch => self.lunch_hour,
            MealType::Dinner => self.dinner_hour,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimingViolation {
    #[error("scheduled date {0} is in the past")]
    PastDate(NaiveDate),

    #[error("{meal_type} cutoff of {cutoff_hour:02}:00 has passed for today")]
    CutoffPassed { meal_type: MealType, cutoff_hour: u32 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimingPolicy {
    cutoffs: Cutoffs,
}

impl TimingPolicy {
    pub fn new(cutoffs: Cutoffs) -> Self {
        Self { cutoffs }
    }

    /// Placement window check. Future dates always pass.
    pub fn can_place(
        &self,
        meal_type: MealType,
        scheduled_date: NaiveDate,
        now: DateTime<FixedOffset>,
    ) -> Result<(), TimingViolation> {
        self.check_same_day(meal_type, scheduled_date, now)
    }

    /// Cancellation window check; same cutoffs as placement.
    pub fn can_cancel(
        &self,
        meal_type: MealType,
        scheduled_date: NaiveDate,
        now: DateTime<FixedOffset>,
    ) -> Result<(), TimingViolation> {
        self.check_same_day(meal_type, scheduled_date, now)
    }

    fn check_same_day(
        &self,
        meal_type: MealType,
        scheduled_date: NaiveDate,
        now: DateTime<FixedOffset>,
    ) -> Result<(), TimingViolation> {
        let today = now.date_naive();

        if scheduled_date < today {
            return Err(TimingViolation::PastDate(scheduled_date));
        }

        if scheduled_date > today {
            return Ok(());
        }

        let cutoff_hour = self.cutoffs.hour_for(meal_type);
        if now.hour() >= cutoff_hour {
            return Err(TimingViolation::CutoffPassed {
                meal_type,
                cutoff_hour,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
