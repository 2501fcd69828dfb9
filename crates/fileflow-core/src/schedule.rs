use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quarter-hour slots in one week: 7 days * 24 hours * 4 quarters.
pub const SCHEDULE_SLOTS: usize = 672;

const SLOTS_PER_DAY: usize = 96;
const SLOTS_PER_HOUR: usize = 4;

/// Weekly processing calendar encoded as a 672 character string of `'0'`/`'1'`.
///
/// Slot index is `day_of_week * 96 + hour * 4 + quarter_hour`, with Sunday as
/// day zero. A schedule that is empty or malformed permits every slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(Option<String>);

impl Schedule {
    /// A schedule with no restrictions.
    pub fn always() -> Self {
        Self(None)
    }

    pub fn from_bits(bits: impl Into<String>) -> Self {
        Self(Some(bits.into()))
    }

    /// Build a schedule that only permits the given slots.
    pub fn only_slots(slots: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = vec![b'0'; SCHEDULE_SLOTS];
        for slot in slots {
            if slot < SCHEDULE_SLOTS {
                bits[slot] = b'1';
            }
        }
        Self(Some(String::from_utf8_lossy(&bits).into_owned()))
    }

    pub fn never() -> Self {
        Self::only_slots(std::iter::empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// True when the stored string is a usable 672-slot calendar.
    pub fn is_valid(&self) -> bool {
        match &self.0 {
            Some(bits) => {
                bits.len() == SCHEDULE_SLOTS && bits.bytes().all(|b| b == b'0' || b == b'1')
            }
            None => false,
        }
    }

    /// Whether processing is permitted in the slot containing `at` (local time).
    pub fn allows(&self, at: NaiveDateTime) -> bool {
        if !self.is_valid() {
            return true;
        }
        let slot = Self::slot_index(at);
        self.0
            .as_deref()
            .map(|bits| bits.as_bytes()[slot] == b'1')
            .unwrap_or(true)
    }

    /// Slot index for a local timestamp.
    pub fn slot_index(at: NaiveDateTime) -> usize {
        let day = at.weekday().num_days_from_sunday() as usize;
        let hour = at.hour() as usize;
        let quarter = (at.minute() / 15) as usize;
        day * SLOTS_PER_DAY + hour * SLOTS_PER_HOUR + quarter
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(bits) if self.is_valid() => {
                let open = bits.bytes().filter(|b| *b == b'1').count();
                write!(f, "{}/{} slots open", open, SCHEDULE_SLOTS)
            }
            _ => write!(f, "always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn slot_index_uses_sunday_as_day_zero() {
        // 2026-10-18 is a Sunday
        assert_eq!(Schedule::slot_index(at(2026, 10, 18, 0, 0)), 0);
        assert_eq!(Schedule::slot_index(at(2026, 10, 18, 0, 14)), 0);
        assert_eq!(Schedule::slot_index(at(2026, 10, 18, 0, 15)), 1);
        // Monday 10:45
        assert_eq!(Schedule::slot_index(at(2026, 10, 19, 10, 45)), 96 + 40 + 3);
        // Saturday 23:59
        assert_eq!(Schedule::slot_index(at(2026, 10, 24, 23, 59)), SCHEDULE_SLOTS - 1);
    }

    #[test]
    fn only_listed_slots_are_open() {
        let monday_morning = at(2026, 10, 19, 10, 45);
        let schedule = Schedule::only_slots([Schedule::slot_index(monday_morning)]);
        assert!(schedule.is_valid());
        assert!(schedule.allows(monday_morning));
        assert!(!schedule.allows(at(2026, 10, 19, 11, 0)));
    }

    #[test]
    fn invalid_schedules_allow_everything() {
        let now = at(2026, 10, 20, 3, 30);
        assert!(Schedule::always().allows(now));
        assert!(Schedule::from_bits("0101").allows(now));
        assert!(Schedule::from_bits("x".repeat(SCHEDULE_SLOTS)).allows(now));
        assert!(!Schedule::never().allows(now));
    }
}
