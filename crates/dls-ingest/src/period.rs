//! Period calculus
//!
//! Converts period labels into integer ordinals and back. Ordinals are the
//! only ordering and equality key used for start/end dates: within one
//! frequency they are strictly monotonic, and ordinal 0 is the period that
//! contains 1970-01-01 (ISO week 1970-W01 for weekly data).
//!
//! Canonical labels:
//!
//! | Frequency | Label |
//! |---|---|
//! | `A` | `2000` |
//! | `S` | `2000S1` |
//! | `Q` | `2000Q3` |
//! | `M` | `2000-03` |
//! | `W` | `2000-W05` |
//! | `D` | `2000-03-15` |

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

const EPOCH_YEAR: i64 = 1970;

/// Labels carry four-digit years
const MAX_YEAR: i64 = 9999;

/// Errors raised by period conversions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("Unsupported time format: {0}")]
    UnsupportedTimeFormat(String),

    #[error("Invalid period '{label}' for frequency {frequency}")]
    InvalidPeriod { label: String, frequency: Frequency },

    #[error("Unknown frequency: {0}")]
    UnknownFrequency(String),

    #[error("Ordinal {ordinal} is out of range for frequency {frequency}")]
    OutOfRange { ordinal: i64, frequency: Frequency },

    #[error("Invalid period pattern: {0}")]
    Pattern(String),
}

/// Canonical series frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "A")]
    Annual,
    #[serde(rename = "S")]
    Semiannual,
    #[serde(rename = "Q")]
    Quarterly,
    #[serde(rename = "M")]
    Monthly,
    #[serde(rename = "W")]
    Weekly,
    #[serde(rename = "D")]
    Daily,
}

impl Frequency {
    pub const ALL: [Frequency; 6] = [
        Frequency::Annual,
        Frequency::Semiannual,
        Frequency::Quarterly,
        Frequency::Monthly,
        Frequency::Weekly,
        Frequency::Daily,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Frequency::Annual => "A",
            Frequency::Semiannual => "S",
            Frequency::Quarterly => "Q",
            Frequency::Monthly => "M",
            Frequency::Weekly => "W",
            Frequency::Daily => "D",
        }
    }

    /// Canonical one-letter codes only; provider codes go through a
    /// [`FrequencyMap`](crate::provider::FrequencyMap) first.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(Frequency::Annual),
            "S" => Some(Frequency::Semiannual),
            "Q" => Some(Frequency::Quarterly),
            "M" => Some(Frequency::Monthly),
            "W" => Some(Frequency::Weekly),
            "D" => Some(Frequency::Daily),
            _ => None,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Frequency {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Frequency::from_code(s).ok_or_else(|| PeriodError::UnknownFrequency(s.to_string()))
    }
}

/// Duration encodings carried by SDMX 2.0 `TIME_FORMAT` hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    P1Y,
    P3M,
    P1M,
    P1D,
}

impl TimeFormat {
    pub fn parse(value: &str) -> Result<Self, PeriodError> {
        match value.trim() {
            "P1Y" => Ok(TimeFormat::P1Y),
            "P3M" => Ok(TimeFormat::P3M),
            "P1M" => Ok(TimeFormat::P1M),
            "P1D" => Ok(TimeFormat::P1D),
            other => Err(PeriodError::UnsupportedTimeFormat(other.to_string())),
        }
    }

    pub fn frequency(self) -> Frequency {
        match self {
            TimeFormat::P1Y => Frequency::Annual,
            TimeFormat::P3M => Frequency::Quarterly,
            TimeFormat::P1M => Frequency::Monthly,
            TimeFormat::P1D => Frequency::Daily,
        }
    }
}

/// Rewrite a label published with a duration hint into a plain label.
///
/// `("1988-Q3", "P3M")` gives `("1988Q3", Q)` and `("20040906", "P1D")`
/// gives `("2004-09-06", D)`. Annual and monthly labels pass through.
pub fn normalize_special_period(
    label: &str,
    time_format: &str,
) -> Result<(String, Frequency), PeriodError> {
    let format = TimeFormat::parse(time_format)?;
    let label = label.trim();

    let normalized = match format {
        TimeFormat::P1Y | TimeFormat::P1M => label.to_string(),
        TimeFormat::P3M => label.replace('-', ""),
        TimeFormat::P1D => {
            if label.len() == 8 && label.bytes().all(|b| b.is_ascii_digit()) {
                format!("{}-{}-{}", &label[..4], &label[4..6], &label[6..])
            } else {
                label.to_string()
            }
        },
    };

    Ok((normalized, format.frequency()))
}

fn invalid(label: &str, frequency: Frequency) -> PeriodError {
    PeriodError::InvalidPeriod {
        label: label.to_string(),
        frequency,
    }
}

/// One anchored pattern per frequency; group 1 is always the year
struct LabelPatterns {
    annual: Regex,
    semiannual: Regex,
    quarterly: Regex,
    monthly: Regex,
    weekly: Regex,
    daily: Regex,
}

impl LabelPatterns {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            annual: Regex::new(r"^(\d{4})$")?,
            semiannual: Regex::new(r"^(\d{4})-?[SHB]?(\d)$")?,
            quarterly: Regex::new(r"^(\d{4})-?Q?(\d)$")?,
            monthly: Regex::new(r"^(\d{4})-?M?(\d{1,2})$")?,
            weekly: Regex::new(r"^(\d{4})-?W(\d{1,2})$")?,
            daily: Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$")?,
        })
    }

    fn for_frequency(&self, frequency: Frequency) -> &Regex {
        match frequency {
            Frequency::Annual => &self.annual,
            Frequency::Semiannual => &self.semiannual,
            Frequency::Quarterly => &self.quarterly,
            Frequency::Monthly => &self.monthly,
            Frequency::Weekly => &self.weekly,
            Frequency::Daily => &self.daily,
        }
    }
}

static LABEL_PATTERNS: LazyLock<Result<LabelPatterns, regex::Error>> = LazyLock::new(LabelPatterns::build);

fn captures(label: &str, frequency: Frequency) -> Result<Captures<'_>, PeriodError> {
    let patterns = LABEL_PATTERNS
        .as_ref()
        .map_err(|e| PeriodError::Pattern(e.to_string()))?;
    patterns
        .for_frequency(frequency)
        .captures(label)
        .ok_or_else(|| invalid(label, frequency))
}

/// Numeric capture group, checked against `range`
fn group(caps: &Captures<'_>, index: usize, range: std::ops::RangeInclusive<i64>) -> Option<i64> {
    caps.get(index)
        .and_then(|m| m.as_str().parse().ok())
        .filter(|n| range.contains(n))
}

fn epoch_monday() -> NaiveDate {
    // Monday of ISO week 1970-W01
    NaiveDate::from_ymd_opt(1969, 12, 29).unwrap_or_default()
}

fn epoch_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Map a period label to its ordinal at the given frequency
pub fn ordinal_from_period(label: &str, frequency: Frequency) -> Result<i64, PeriodError> {
    let label = label.trim();
    let err = || invalid(label, frequency);
    let caps = captures(label, frequency)?;
    let year = group(&caps, 1, 0..=MAX_YEAR).ok_or_else(err)?;

    match frequency {
        Frequency::Annual => Ok(year - EPOCH_YEAR),
        Frequency::Semiannual => {
            let half = group(&caps, 2, 1..=2).ok_or_else(err)?;
            Ok((year - EPOCH_YEAR) * 2 + half - 1)
        },
        Frequency::Quarterly => {
            let quarter = group(&caps, 2, 1..=4).ok_or_else(err)?;
            Ok((year - EPOCH_YEAR) * 4 + quarter - 1)
        },
        Frequency::Monthly => {
            let month = group(&caps, 2, 1..=12).ok_or_else(err)?;
            Ok((year - EPOCH_YEAR) * 12 + month - 1)
        },
        Frequency::Weekly => {
            let week = group(&caps, 2, 1..=53).ok_or_else(err)?;
            let monday = NaiveDate::from_isoywd_opt(year as i32, week as u32, Weekday::Mon).ok_or_else(err)?;
            Ok((monday - epoch_monday()).num_days().div_euclid(7))
        },
        Frequency::Daily => {
            let month = group(&caps, 2, 1..=12).ok_or_else(err)?;
            let day = group(&caps, 3, 1..=31).ok_or_else(err)?;
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).ok_or_else(err)?;
            Ok((date - epoch_day()).num_days())
        },
    }
}

/// Inverse of [`ordinal_from_period`]; always yields the canonical label.
///
/// Ordinals whose year falls outside 0000-9999 are refused, so every label
/// produced here parses back.
pub fn period_from_ordinal(ordinal: i64, frequency: Frequency) -> Result<String, PeriodError> {
    let year = |per_year: i64| {
        let year = EPOCH_YEAR + ordinal.div_euclid(per_year);
        if (0..=MAX_YEAR).contains(&year) {
            Ok(year)
        } else {
            Err(PeriodError::OutOfRange { ordinal, frequency })
        }
    };

    match frequency {
        Frequency::Annual => Ok(format!("{:04}", year(1)?)),
        Frequency::Semiannual => Ok(format!("{:04}S{}", year(2)?, ordinal.rem_euclid(2) + 1)),
        Frequency::Quarterly => Ok(format!("{:04}Q{}", year(4)?, ordinal.rem_euclid(4) + 1)),
        Frequency::Monthly => Ok(format!("{:04}-{:02}", year(12)?, ordinal.rem_euclid(12) + 1)),
        Frequency::Weekly => {
            let monday = shift(epoch_monday(), ordinal.checked_mul(7), ordinal, frequency)?;
            let week = monday.iso_week();
            check_year(i64::from(week.year()), ordinal, frequency)?;
            Ok(format!("{:04}-W{:02}", week.year(), week.week()))
        },
        Frequency::Daily => {
            let date = shift(epoch_day(), Some(ordinal), ordinal, frequency)?;
            check_year(i64::from(date.year()), ordinal, frequency)?;
            Ok(date.format("%Y-%m-%d").to_string())
        },
    }
}

fn check_year(year: i64, ordinal: i64, frequency: Frequency) -> Result<(), PeriodError> {
    if (0..=MAX_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(PeriodError::OutOfRange { ordinal, frequency })
    }
}

fn shift(
    base: NaiveDate,
    days: Option<i64>,
    ordinal: i64,
    frequency: Frequency,
) -> Result<NaiveDate, PeriodError> {
    days.and_then(Duration::try_days)
        .and_then(|d| base.checked_add_signed(d))
        .ok_or(PeriodError::OutOfRange { ordinal, frequency })
}

/// First calendar day of the period with the given ordinal
pub fn period_start_date(ordinal: i64, frequency: Frequency) -> Result<NaiveDate, PeriodError> {
    let out_of_range = || PeriodError::OutOfRange { ordinal, frequency };
    let ymd = |year: i64, month: i64| {
        i32::try_from(year)
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, month as u32, 1))
            .ok_or_else(out_of_range)
    };

    match frequency {
        Frequency::Annual => ymd(EPOCH_YEAR + ordinal, 1),
        Frequency::Semiannual => ymd(
            EPOCH_YEAR + ordinal.div_euclid(2),
            ordinal.rem_euclid(2) * 6 + 1,
        ),
        Frequency::Quarterly => ymd(
            EPOCH_YEAR + ordinal.div_euclid(4),
            ordinal.rem_euclid(4) * 3 + 1,
        ),
        Frequency::Monthly => ymd(EPOCH_YEAR + ordinal.div_euclid(12), ordinal.rem_euclid(12) + 1),
        Frequency::Weekly => shift(epoch_monday(), ordinal.checked_mul(7), ordinal, frequency),
        Frequency::Daily => shift(epoch_day(), Some(ordinal), ordinal, frequency),
    }
}

/// Rewrite any accepted label variant into its canonical form
pub fn canonical_period(label: &str, frequency: Frequency) -> Result<String, PeriodError> {
    period_from_ordinal(ordinal_from_period(label, frequency)?, frequency)
}
