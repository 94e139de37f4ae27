//! Billing periods.
//!
//! A year is split in two at month index `period_length_months` (0-based): the first
//! period starts on January 1st, the second on the first day of that month. With a
//! length of 6 this gives Jan 1 – Jun 30 and Jul 1 – Dec 31. Lengths that do not divide
//! the year evenly still produce exactly two period starts per year.

use thiserror::Error;
use time::{Date, Duration, Month};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start_day: Date,
    /// Inclusive.
    pub end_day: Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("Period length must be between 1 and 12 months, got {0}")]
    InvalidLength(u8),

    #[error("Period starting {0} runs past the supported date range")]
    OutOfRange(Date),
}

pub fn compute_period(
    reference: Date,
    period_length_months: u8,
    use_next: bool,
) -> Result<BillingPeriod, PeriodError> {
    if !(1..=12).contains(&period_length_months) {
        return Err(PeriodError::InvalidLength(period_length_months));
    }

    let year = reference.year();
    let start_of_year = first_of_month(year, 0).ok_or(PeriodError::OutOfRange(reference))?;
    // None when the length is a full year: there is no second period.
    let second_start = first_of_month(year, period_length_months);

    let start_day = if use_next {
        match second_start {
            Some(second) if reference < second => second,
            _ => first_of_month(year + 1, 0).ok_or(PeriodError::OutOfRange(reference))?,
        }
    } else {
        let month_index = u8::from(reference.month()) - 1;
        match second_start {
            Some(second) if month_index >= period_length_months => second,
            _ => start_of_year,
        }
    };

    let end_day = add_months(start_day, period_length_months)
        .and_then(|d| d.checked_sub(Duration::days(1)))
        .ok_or(PeriodError::OutOfRange(start_day))?;

    Ok(BillingPeriod { start_day, end_day })
}

/// First day of the month with the given 0-based index, `None` past December.
fn first_of_month(year: i32, month_index: u8) -> Option<Date> {
    if month_index > 11 {
        return None;
    }
    let month = Month::try_from(month_index + 1).ok()?;
    Date::from_calendar_date(year, month, 1).ok()
}

/// Only ever called with first-of-month dates, so the day never needs clamping.
fn add_months(first_of_month_date: Date, months: u8) -> Option<Date> {
    let zero_based = u8::from(first_of_month_date.month()) - 1 + months;
    let year = first_of_month_date.year() + i32::from(zero_based / 12);
    first_of_month(year, zero_based % 12)
}
