//! Field value types used inside card structures

use std::fmt;
use std::num::NonZeroU8;

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Timelike};

use crate::codec::CodecError;

/// Structure format version. Zero is reserved for blank structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionNumber(NonZeroU8);

impl VersionNumber {
    pub const CURRENT: VersionNumber = VersionNumber(NonZeroU8::MIN);

    pub fn new(value: u8) -> Option<Self> {
        NonZeroU8::new(value).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0.get()
    }

    pub fn is_current(self) -> bool {
        self == Self::CURRENT
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Date stored as a day count since 2010-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateCompact(pub u16);

impl DateCompact {
    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Convert a calendar date; `None` if it falls outside the 16-bit range.
    pub fn from_date(date: NaiveDate) -> Option<Self> {
        let days = date.signed_duration_since(Self::epoch()).num_days();
        u16::try_from(days).ok().map(Self)
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        Self::epoch().checked_add_days(Days::new(u64::from(self.0)))
    }
}

impl fmt::Display for DateCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => write!(f, "day {}", self.0),
        }
    }
}

/// Time of day stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeCompact(pub u16);

impl TimeCompact {
    pub fn from_time(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn to_time(self) -> Option<NaiveTime> {
        let minutes = u32::from(self.0);
        NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
    }
}

impl fmt::Display for TimeCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Contract tariff, mirrored into the event as a per-slot priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PriorityCode {
    /// No usable contract in this slot
    #[default]
    Forbidden,
    SeasonPass,
    MultiTrip,
    StoredValue,
    Expired,
}

impl PriorityCode {
    pub const ALL: [PriorityCode; 5] = [
        PriorityCode::Forbidden,
        PriorityCode::SeasonPass,
        PriorityCode::MultiTrip,
        PriorityCode::StoredValue,
        PriorityCode::Expired,
    ];

    pub fn code(self) -> u8 {
        match self {
            PriorityCode::Forbidden => 0,
            PriorityCode::SeasonPass => 1,
            PriorityCode::MultiTrip => 2,
            PriorityCode::StoredValue => 3,
            PriorityCode::Expired => 31,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            PriorityCode::Forbidden => "Forbidden",
            PriorityCode::SeasonPass => "Season pass",
            PriorityCode::MultiTrip => "Multi-trip ticket",
            PriorityCode::StoredValue => "Stored value",
            PriorityCode::Expired => "Expired",
        }
    }
}

/// 24-bit counter value, as held by a counter file slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CounterValue(u32);

impl CounterValue {
    pub const MAX: u32 = 0x00FF_FFFF;
    pub const ZERO: CounterValue = CounterValue(0);

    pub fn new(value: u32) -> Result<Self, CodecError> {
        if value > Self::MAX {
            return Err(CodecError::ValueOutOfRange {
                field: "counter",
                value: u64::from(value),
            });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn from_be_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub(crate) fn to_be_bytes(self) -> [u8; 3] {
        let [_, a, b, c] = self.0.to_be_bytes();
        [a, b, c]
    }
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First day of the month, `years` later. Used for environment end dates.
pub fn first_of_month_after_years(date: NaiveDate, years: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year() + years, date.month(), 1)
}
