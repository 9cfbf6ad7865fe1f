//! Build dates and disclosure months
//!
//! Firmware build dates come from vendor metadata in three textual shapes.
//! Anything unparsable degrades to [`sentinel`] (1970-01-01 00:00:00) and a
//! warning, never an error.
//!
//! Vulnerability databases speak in whole months (`M/YYYY`). A [`Month`]
//! compares against a build date as its first day at midnight.

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike as _, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Build date used when the real one cannot be recovered.
pub fn sentinel() -> NaiveDateTime {
    NaiveDateTime::from_timestamp_opt(0, 0).expect("the epoch is representable")
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildDateFormat {
    /// `20210714093215`, the `BUILD_DATE` key of Samsung-style `metadata.json`
    Timestamp,
    /// `2021-07-14`, the `date` key of Xiaomi-style `metadata.json`
    IsoDate,
    /// `210714`, the firmware version directory name
    ShortDate,
}

impl BuildDateFormat {
    pub fn parse(&self, s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        match self {
            BuildDateFormat::Timestamp => NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S").ok(),
            BuildDateFormat::IsoDate => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0)),
            BuildDateFormat::ShortDate => {
                // chrono accepts variable-width fields; vendor names are exactly yymmdd
                if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                NaiveDate::parse_from_str(s, "%y%m%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            }
        }
    }

    pub fn parse_or_sentinel(&self, s: &str) -> NaiveDateTime {
        self.parse(s).unwrap_or_else(|| {
            warn!("unparsable build date {:?} ({:?}), using 1970-01-01", s, self);
            sentinel()
        })
    }
}

/// A calendar month, written `M/YYYY`.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Month {
    year: i32,
    month: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid month {0:?}, expected M/YYYY")]
pub struct InvalidMonth(pub String);

impl Month {
    pub fn new(month: u32, year: i32) -> Option<Self> {
        (1..=12).contains(&month).then(|| Month { year, month })
    }

    pub fn of(date: &NaiveDateTime) -> Self {
        Month { year: date.year(), month: date.month() }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Midnight on the first day of the month.
    pub fn first_day(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_else(sentinel)
    }

    fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    /// Whole calendar months from `self` to `later`, negative if `later` is earlier.
    pub fn months_until(&self, later: &Month) -> i64 {
        later.ordinal() - self.ordinal()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

impl fmt::Debug for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Month({})", self)
    }
}

impl FromStr for Month {
    type Err = InvalidMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMonth(s.to_string());
        let (month, year) = s.trim().split_once('/').ok_or_else(invalid)?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        Month::new(month, year).ok_or_else(invalid)
    }
}

impl Serialize for Month {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Signed distance between a build date and a month.
///
/// `negative` is set when the date is less than a minute past the start of
/// the month, which for a neutralizing build means the counter bump shipped
/// before the patch was public.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Latency {
    pub months: i64,
    pub days: i64,
    pub negative: bool,
}

impl Latency {
    pub fn between(month: &Month, date: &NaiveDateTime) -> Self {
        let delta = *date - month.first_day();
        Latency {
            months: month.months_until(&Month::of(date)),
            days: delta.num_days(),
            negative: delta < chrono::Duration::minutes(1),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn build_date_formats() {
        assert_eq!(
            BuildDateFormat::Timestamp.parse("20210714093215"),
            Some(NaiveDate::from_ymd_opt(2021, 7, 14).unwrap().and_hms_opt(9, 32, 15).unwrap()),
        );
        assert_eq!(BuildDateFormat::IsoDate.parse("2021-07-14"), Some(ymd(2021, 7, 14)));
        assert_eq!(BuildDateFormat::ShortDate.parse("210714"), Some(ymd(2021, 7, 14)));
        assert_eq!(BuildDateFormat::ShortDate.parse("V12.5.3"), None);
        assert_eq!(BuildDateFormat::IsoDate.parse_or_sentinel("soon"), sentinel());
        assert_eq!(sentinel(), ymd(1970, 1, 1));
    }

    #[test]
    fn months() {
        let june: Month = "6/2021".parse().unwrap();
        assert_eq!(june, Month::new(6, 2021).unwrap());
        assert_eq!(june.to_string(), "6/2021");
        assert!("13/2021".parse::<Month>().is_err());
        assert!("2021-06".parse::<Month>().is_err());

        let january: Month = "1/2015".parse().unwrap();
        assert_eq!(january.months_until(&june), 77);
        assert_eq!(june.months_until(&january), -77);
        assert!(january < june);
        assert_eq!(june.first_day(), ymd(2021, 6, 1));
    }

    #[test]
    fn latency() {
        let patch: Month = "8/2021".parse().unwrap();
        let latency = Latency::between(&patch, &ymd(2021, 9, 15));
        assert_eq!(latency, Latency { months: 1, days: 45, negative: false });
        assert!(Latency::between(&patch, &ymd(2021, 7, 31)).negative);
        assert!(Latency::between(&patch, &ymd(2021, 8, 1)).negative);
    }

    #[test]
    fn month_serde() {
        let month: Month = serde_json::from_str("\"11/2020\"").unwrap();
        assert_eq!(serde_json::to_string(&month).unwrap(), "\"11/2020\"");
    }
}
