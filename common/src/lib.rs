pub mod config;
pub mod schedule;
pub mod types;

pub use config::DeviceConfig;
pub use schedule::{ScheduleEntry, ScheduleError, ScheduleTable, MAX_RUN_SECS, SCHEDULE_SLOTS};
pub use types::{CommandOrigin, DeviceTime, IrrigatorCommand, SensorReading};
