//! Month grids for the date picker and per-night room calendars.

use chrono::{Datelike, NaiveDate};

use crate::model::{DAY_MS, Ms, Span, WeekStart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidDate { year: i32, month: u32 },
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::InvalidDate { year, month } => {
                write!(f, "invalid calendar month: {year}-{month:02}")
            }
        }
    }
}

impl std::error::Error for CalendarError {}

/// One month laid out in rows of seven cells. `None` cells pad the first and
/// last week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub week_start: WeekStart,
    pub cells: Vec<[Option<NaiveDate>; 7]>,
}

impl MonthGrid {
    pub fn new(year: i32, month: u32, week_start: WeekStart) -> Result<Self, CalendarError> {
        let first = first_of_month(year, month)?;
        let offset = weekday_offset(first, week_start) as usize;
        let days = days_in_month(year, month)? as usize;

        let mut cells = vec![[None; 7]; (offset + days).div_ceil(7)];
        for (i, date) in first.iter_days().take(days).enumerate() {
            let pos = offset + i;
            cells[pos / 7][pos % 7] = Some(date);
        }
        Ok(Self { year, month, week_start, cells })
    }

    pub fn weeks(&self) -> usize {
        self.cells.len()
    }

    /// Blank cells before day 1.
    pub fn leading_blanks(&self) -> u32 {
        self.cells
            .first()
            .map_or(0, |row| row.iter().take_while(|c| c.is_none()).count() as u32)
    }

    pub fn days_in_month(&self) -> u32 {
        self.cells.iter().flatten().filter(|c| c.is_some()).count() as u32
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.cells.iter().flatten().filter_map(|c| *c)
    }

    /// `(week, column)` of `date`, or `None` when it falls outside this month.
    pub fn position(&self, date: NaiveDate) -> Option<(u32, u32)> {
        if date.year() != self.year || date.month() != self.month {
            return None;
        }
        let pos = self.leading_blanks() + date.day0();
        Some((pos / 7, pos % 7))
    }

    pub fn prev(&self) -> Result<Self, CalendarError> {
        let (year, month) = if self.month == 1 {
            (self.year - 1, 12)
        } else {
            (self.year, self.month - 1)
        };
        Self::new(year, month, self.week_start)
    }

    /// Fails only past the last year chrono can represent.
    pub fn next(&self) -> Result<Self, CalendarError> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        Self::new(year, month, self.week_start)
    }

    /// The whole month as a half-open UTC span.
    pub fn span(&self) -> Span {
        let start = self.dates().next().map_or(0, date_to_ms);
        Span::new(start, start + self.days_in_month() as Ms * DAY_MS)
    }
}

pub fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, CalendarError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(CalendarError::InvalidDate { year, month })
}

pub fn days_in_month(year: i32, month: u32) -> Result<u32, CalendarError> {
    let first = first_of_month(year, month)?;
    let next = if month == 12 {
        first_of_month(year + 1, 1)?
    } else {
        first_of_month(year, month + 1)?
    };
    Ok(next.signed_duration_since(first).num_days() as u32)
}

/// Column of `date` in a week that begins on `week_start`.
pub fn weekday_offset(date: NaiveDate, week_start: WeekStart) -> u32 {
    match week_start {
        WeekStart::Monday => date.weekday().num_days_from_monday(),
        WeekStart::Sunday => date.weekday().num_days_from_sunday(),
    }
}

/// Midnight UTC of `date` in Unix milliseconds.
pub fn date_to_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp_millis())
}

/// The night starting on `date`.
pub fn night_of(date: NaiveDate) -> Span {
    let start = date_to_ms(date);
    Span::new(start, start + DAY_MS)
}
