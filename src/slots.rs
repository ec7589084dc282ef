use crate::data::Slot;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("end date {end} is before start date {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid slot configuration: {0}")]
    InvalidConfig(String),
}

/// A daily window in which no exam may run, e.g. lunch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BreakWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Rules for laying out the daily candidate grid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SlotConfig {
    pub daily_start_time: NaiveTime,
    pub daily_end_time: NaiveTime,
    pub slot_duration_minutes: u32,
    pub exclude_weekends: bool,
    pub break_windows: Vec<BreakWindow>,
    pub blackout_dates: Vec<NaiveDate>,
    /// Longest date range, in calendar days, a single request may span.
    pub max_range_days: u32,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            daily_end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_duration_minutes: 120,
            exclude_weekends: true,
            break_windows: Vec::new(),
            blackout_dates: Vec::new(),
            max_range_days: 366,
        }
    }
}

impl SlotConfig {
    fn validate(&self) -> Result<(), SlotError> {
        if self.slot_duration_minutes == 0 {
            return Err(SlotError::InvalidConfig(
                "slot duration must be positive".to_string(),
            ));
        }
        if self.daily_start_time >= self.daily_end_time {
            return Err(SlotError::InvalidConfig(format!(
                "daily window {}..{} is empty",
                self.daily_start_time, self.daily_end_time
            )));
        }
        if let Some(w) = self.break_windows.iter().find(|w| w.start >= w.end) {
            return Err(SlotError::InvalidConfig(format!(
                "break window {}..{} is empty",
                w.start, w.end
            )));
        }
        if self.max_range_days == 0 {
            return Err(SlotError::InvalidConfig(
                "max range must allow at least one day".to_string(),
            ));
        }
        Ok(())
    }

    fn is_exam_day(&self, date: NaiveDate) -> bool {
        if self.exclude_weekends && matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self.blackout_dates.contains(&date)
    }

    /// Slots of a single day, in order.
    fn day_slots(&self, date: NaiveDate) -> Vec<Slot> {
        let duration = Duration::minutes(i64::from(self.slot_duration_minutes));
        let mut slots = Vec::new();
        let mut cursor = self.daily_start_time;
        loop {
            // overflowing_add_signed wraps past midnight; a wrap ends the day
            let (end, wrapped) = cursor.overflowing_add_signed(duration);
            if wrapped != 0 || end > self.daily_end_time {
                break;
            }
            let blocking_end = self
                .break_windows
                .iter()
                .filter(|w| cursor < w.end && w.start < end)
                .map(|w| w.end)
                .max();
            match blocking_end {
                Some(resume) => cursor = resume,
                None => {
                    slots.push(Slot::new(date, cursor, end));
                    cursor = end;
                }
            }
        }
        slots
    }
}

/// The candidate grid for an inclusive date range. Iterating it is lazy and
/// may be repeated; every pass yields the same chronological sequence.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    start: NaiveDate,
    end: NaiveDate,
    config: SlotConfig,
}

pub fn generate_slots(
    start: NaiveDate,
    end: NaiveDate,
    config: &SlotConfig,
) -> Result<SlotGrid, SlotError> {
    if end < start {
        return Err(SlotError::InvalidRange { start, end });
    }
    config.validate()?;
    let span = (end - start).num_days() + 1;
    if span > i64::from(config.max_range_days) {
        return Err(SlotError::InvalidConfig(format!(
            "range {start}..{end} spans {span} days, limit is {}",
            config.max_range_days
        )));
    }
    Ok(SlotGrid {
        start,
        end,
        config: config.clone(),
    })
}

impl SlotGrid {
    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .filter(|d| self.config.is_exam_day(*d))
            .flat_map(|d| self.config.day_slots(d))
    }

    /// Groups the grid by date, as the slot preview expects it.
    pub fn by_date(&self) -> BTreeMap<NaiveDate, Vec<Slot>> {
        let mut days: BTreeMap<NaiveDate, Vec<Slot>> = BTreeMap::new();
        for slot in self.iter() {
            days.entry(slot.date).or_default().push(slot);
        }
        days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn rejects_inverted_range() {
        let err = generate_slots(date(10), date(9), &SlotConfig::default()).unwrap_err();
        assert_eq!(
            err,
            SlotError::InvalidRange {
                start: date(10),
                end: date(9)
            }
        );
    }

    #[test]
    fn weekday_grid_skips_weekend() {
        // 2025-01-03 is a Friday, 2025-01-06 a Monday
        let grid = generate_slots(date(3), date(6), &SlotConfig::default()).unwrap();
        let days = grid.by_date();
        assert_eq!(days.keys().copied().collect::<Vec<_>>(), vec![date(3), date(6)]);
        assert_eq!(days[&date(3)].len(), 4);
        assert_eq!(days[&date(3)][0], Slot::new(date(3), time(9, 0), time(11, 0)));
        assert_eq!(days[&date(3)][3], Slot::new(date(3), time(15, 0), time(17, 0)));
    }

    #[test]
    fn break_window_pushes_next_slot() {
        let config = SlotConfig {
            break_windows: vec![BreakWindow {
                start: time(12, 0),
                end: time(13, 0),
            }],
            exclude_weekends: false,
            ..SlotConfig::default()
        };
        let slots: Vec<_> = generate_slots(date(4), date(4), &config)
            .unwrap()
            .iter()
            .collect();
        assert_eq!(
            slots,
            vec![
                Slot::new(date(4), time(9, 0), time(11, 0)),
                Slot::new(date(4), time(13, 0), time(15, 0)),
                Slot::new(date(4), time(15, 0), time(17, 0)),
            ]
        );
    }

    #[test]
    fn blackout_dates_are_skipped() {
        let config = SlotConfig {
            blackout_dates: vec![date(7)],
            ..SlotConfig::default()
        };
        let grid = generate_slots(date(6), date(8), &config).unwrap();
        assert!(grid.iter().all(|s| s.date != date(7)));
        assert_eq!(grid.iter().count(), 8);
    }

    #[test]
    fn iteration_is_repeatable() {
        let grid = generate_slots(date(1), date(31), &SlotConfig::default()).unwrap();
        let first: Vec<_> = grid.iter().collect();
        let second: Vec<_> = grid.iter().collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1] && !w[0].overlaps(&w[1])));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let config = SlotConfig {
            slot_duration_minutes: 0,
            ..SlotConfig::default()
        };
        assert!(matches!(
            generate_slots(date(6), date(6), &config),
            Err(SlotError::InvalidConfig(_))
        ));
    }

    #[test]
    fn overlong_range_is_rejected() {
        let first = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert!(matches!(
            generate_slots(first, last, &SlotConfig::default()),
            Err(SlotError::InvalidConfig(_))
        ));

        let config = SlotConfig {
            max_range_days: 7,
            ..SlotConfig::default()
        };
        assert!(generate_slots(date(6), date(12), &config).is_ok());
        assert!(generate_slots(date(6), date(13), &config).is_err());
    }
}
