use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of recurring irrigation triggers the relay controller stores.
pub const SCHEDULE_SLOTS: usize = 4;

/// Longest single irrigation run accepted from any source, in seconds.
pub const MAX_RUN_SECS: u16 = 360;

/// One recurring trigger: start the relay at `hour:minute` for
/// `duration_secs` when `active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub hour: u8,
    pub minute: u8,
    pub duration_secs: u16,
    pub active: bool,
}

impl ScheduleEntry {
    pub fn sanitize(&mut self) {
        if self.hour > 23 {
            self.hour = 0;
        }
        if self.minute > 59 {
            self.minute = 0;
        }
        self.duration_secs = self.duration_secs.min(MAX_RUN_SECS);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule index {0} out of range (0-{max})", max = SCHEDULE_SLOTS - 1)]
    IndexOutOfRange(usize),
}

/// Fixed-size, index-addressed schedule table. The network layer only reads
/// the whole set and writes single entries; it does not own persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTable {
    entries: [ScheduleEntry; SCHEDULE_SLOTS],
}

impl ScheduleTable {
    pub fn get_all(&self) -> [ScheduleEntry; SCHEDULE_SLOTS] {
        self.entries
    }

    pub fn set_entry(&mut self, index: usize, mut entry: ScheduleEntry) -> Result<(), ScheduleError> {
        if index >= SCHEDULE_SLOTS {
            return Err(ScheduleError::IndexOutOfRange(index));
        }
        entry.sanitize();
        self.entries[index] = entry;
        Ok(())
    }
}
