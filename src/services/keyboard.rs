//! Inline month picker for `/calendar`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::error::AppError;
use crate::i18n;

pub const CALLBACK_PREFIX: &str = "CALENDAR";

/// Years the picker can show and accept back.
pub const YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    Ignore,
    Day,
    Prev,
    Next,
    Today,
}

impl CalendarAction {
    fn as_str(self) -> &'static str {
        match self {
            CalendarAction::Ignore => "IGNORE",
            CalendarAction::Day => "DAY",
            CalendarAction::Prev => "PREV",
            CalendarAction::Next => "NEXT",
            CalendarAction::Today => "TODAY",
        }
    }
}

impl FromStr for CalendarAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IGNORE" => Ok(CalendarAction::Ignore),
            "DAY" => Ok(CalendarAction::Day),
            "PREV" => Ok(CalendarAction::Prev),
            "NEXT" => Ok(CalendarAction::Next),
            "TODAY" => Ok(CalendarAction::Today),
            other => Err(AppError::BadRequest(format!(
                "unknown calendar action: {}",
                other
            ))),
        }
    }
}

/// Decoded callback data of the form `CALENDAR|ACTION|YEAR|MONTH|DAY`.
/// `day` is 0 for buttons that do not point at a particular day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarCallback {
    pub action: CalendarAction,
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarCallback {
    pub fn new(action: CalendarAction, year: i32, month: u32, day: u32) -> Self {
        Self {
            action,
            year,
            month,
            day,
        }
    }

    pub fn is_calendar_data(data: &str) -> bool {
        data.starts_with(CALLBACK_PREFIX) && data[CALLBACK_PREFIX.len()..].starts_with('|')
    }

    /// The selected day for `DAY` callbacks.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for CalendarCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            CALLBACK_PREFIX,
            self.action.as_str(),
            self.year,
            self.month,
            self.day
        )
    }
}

impl FromStr for CalendarCallback {
    type Err = AppError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let malformed = || AppError::BadRequest(format!("malformed calendar callback: {}", data));

        let parts: Vec<&str> = data.split('|').collect();
        let [prefix, action, year, month, day] = parts.as_slice() else {
            return Err(malformed());
        };
        if *prefix != CALLBACK_PREFIX {
            return Err(malformed());
        }

        let action: CalendarAction = action.parse()?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        let day: u32 = day.parse().map_err(|_| malformed())?;
        if !YEARS.contains(&year) || !(1..=12).contains(&month) || day > 31 {
            return Err(malformed());
        }
        if action == CalendarAction::Day && NaiveDate::from_ymd_opt(year, month, day).is_none() {
            return Err(malformed());
        }

        Ok(Self::new(action, year, month, day))
    }
}

/// Move `months` months from `(year, month)`, rolling the year over.
/// Stays on `(year, month)` when the result would fall outside [`YEARS`].
pub fn shift_month(year: i32, month: u32, months: i32) -> (i32, u32) {
    let index = i64::from(year) * 12 + i64::from(month) - 1 + i64::from(months);
    let target_year = index.div_euclid(12);
    match i32::try_from(target_year) {
        Ok(y) if YEARS.contains(&y) => (y, index.rem_euclid(12) as u32 + 1),
        _ => (year, month),
    }
}

/// Weeks of the month, Monday first; `None` marks days of adjacent months.
pub fn month_grid(year: i32, month: u32) -> Vec<[Option<u32>; 7]> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let days_in_month = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28);

    let mut weeks = Vec::new();
    let mut week = [None; 7];
    let mut column = first.weekday().num_days_from_monday() as usize;
    for day in 1..=days_in_month {
        week[column] = Some(day);
        column += 1;
        if column == 7 {
            weeks.push(week);
            week = [None; 7];
            column = 0;
        }
    }
    if column > 0 {
        weeks.push(week);
    }
    weeks
}

fn button(text: impl Into<String>, callback: CalendarCallback) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text.into(), callback.to_string())
}

/// Inline keyboard for `year`/`month`; `today` is highlighted when visible.
pub fn build_calendar(year: i32, month: u32, today: NaiveDate, lang: &str) -> InlineKeyboardMarkup {
    let ignore = CalendarCallback::new(CalendarAction::Ignore, year, month, 0);
    let lang_opt = Some(lang);

    let month_name = i18n::list_item(lang, "calendar.months", month.saturating_sub(1) as usize);
    let mut rows = vec![vec![button(format!("{} {}", month_name, year), ignore)]];

    rows.push(
        (0..7)
            .map(|i| button(i18n::list_item(lang, "calendar.weekdays", i), ignore))
            .collect(),
    );

    for week in month_grid(year, month) {
        rows.push(
            week.iter()
                .map(|cell| match cell {
                    Some(day) => {
                        let is_today = today.year() == year
                            && today.month() == month
                            && today.day() == *day;
                        let label = if is_today {
                            format!("[{}]", day)
                        } else {
                            day.to_string()
                        };
                        button(
                            label,
                            CalendarCallback::new(CalendarAction::Day, year, month, *day),
                        )
                    }
                    None => button(" ", ignore),
                })
                .collect(),
        );
    }

    rows.push(vec![
        button(
            i18n::tr(lang_opt, "calendar.prev", None),
            CalendarCallback::new(CalendarAction::Prev, year, month, 0),
        ),
        button(
            i18n::tr(lang_opt, "calendar.today", None),
            CalendarCallback::new(CalendarAction::Today, year, month, 0),
        ),
        button(
            i18n::tr(lang_opt, "calendar.next", None),
            CalendarCallback::new(CalendarAction::Next, year, month, 0),
        ),
    ]);

    InlineKeyboardMarkup::new(rows)
}
