use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Calendar time as the RTC collaborator exposes it.
///
/// `dotw` is days since Sunday (0-6), matching the convention of the
/// on-board RTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub dotw: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

impl DeviceTime {
    /// Expands a Unix timestamp into calendar fields. Returns `None` for
    /// instants chrono cannot represent.
    pub fn from_epoch(epoch: i64) -> Option<Self> {
        let dt: DateTime<Utc> = DateTime::from_timestamp(epoch, 0)?;
        Some(Self {
            year: dt.year(),
            month: dt.month() as u8,
            day: dt.day() as u8,
            dotw: dt.weekday().num_days_from_sunday() as u8,
            hour: dt.hour() as u8,
            min: dt.minute() as u8,
            sec: dt.second() as u8,
        })
    }

    /// Collapses the calendar fields back to a Unix timestamp, treating them
    /// as wall time. `None` when the fields do not form a valid date, which
    /// is how an out-of-range `POST /clock` gets rejected.
    pub fn to_epoch(self) -> Option<i64> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)?;
        let naive = date.and_hms_opt(self.hour as u32, self.min as u32, self.sec as u32)?;
        Some(naive.and_utc().timestamp())
    }

    /// Recomputes the day-of-week from the date fields so callers never have
    /// to supply a consistent `dotw` themselves.
    pub fn with_dotw(mut self) -> Self {
        if let Some(date) = NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32) {
            self.dotw = date.weekday().num_days_from_sunday() as u8;
        }
        self
    }
}

/// Latest temperature/humidity snapshot from the sensor collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandOrigin {
    Local,
    Remote,
}

impl CommandOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Remote => "REMOTE",
        }
    }
}

/// Fire-and-forget command for the irrigation supervisor. Delivered through a
/// single-slot overwrite signal; only the newest command matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrrigatorCommand {
    On {
        duration_secs: u16,
        origin: CommandOrigin,
    },
    Off {
        origin: CommandOrigin,
    },
}
