use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use irrigator_common::{
    DeviceTime, IrrigatorCommand, ScheduleEntry, ScheduleError, ScheduleTable, SensorReading,
    SCHEDULE_SLOTS,
};

use crate::signal::{latest, Latest, LatestListener};

/// Settable wall clock. Starts at a fixed default until `POST /clock` or the
/// NTP client commits real time, mirroring an RTC that begins counting from
/// a baked-in date.
#[derive(Debug)]
pub struct DeviceClock {
    base: Mutex<ClockBase>,
}

#[derive(Debug, Clone, Copy)]
struct ClockBase {
    wall_epoch: i64,
    set_at: Instant,
}

impl DeviceClock {
    fn new() -> Self {
        let default_time = DeviceTime {
            year: 2024,
            month: 1,
            day: 1,
            hour: 12,
            ..DeviceTime::default()
        };
        Self {
            base: Mutex::new(ClockBase {
                // Default construction above is always a valid date.
                wall_epoch: default_time.to_epoch().unwrap_or(0),
                set_at: Instant::now(),
            }),
        }
    }

    pub fn now(&self) -> Option<DeviceTime> {
        let base = *self.base.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = base.wall_epoch + base.set_at.elapsed().as_secs() as i64;
        DeviceTime::from_epoch(epoch).map(DeviceTime::with_dotw)
    }

    /// Commits new wall time. Returns false when the fields do not form a
    /// valid calendar date, leaving the clock untouched.
    pub fn commit(&self, time: DeviceTime) -> bool {
        let Some(epoch) = time.to_epoch() else {
            return false;
        };
        let mut base = self.base.lock().unwrap_or_else(PoisonError::into_inner);
        *base = ClockBase {
            wall_epoch: epoch,
            set_at: Instant::now(),
        };
        true
    }
}

/// Shared handle to every collaborator the network layer touches: clock,
/// sensor snapshot, schedule table, irrigation state and connectivity flags.
#[derive(Debug, Clone)]
pub struct Board {
    clock: Arc<DeviceClock>,
    sensor: Arc<Mutex<SensorReading>>,
    schedule: Arc<Mutex<ScheduleTable>>,
    irrigator_on: Arc<AtomicBool>,
    ntp_synced: Arc<AtomicBool>,
    wifi_connected: Arc<AtomicBool>,
    has_internet: Arc<AtomicBool>,
    ip_address: Arc<Mutex<String>>,
    commands: Latest<IrrigatorCommand>,
}

impl Board {
    pub fn new() -> (Self, LatestListener<IrrigatorCommand>) {
        let (commands, listener) = latest();
        let board = Self {
            clock: Arc::new(DeviceClock::new()),
            sensor: Arc::new(Mutex::new(SensorReading::default())),
            schedule: Arc::new(Mutex::new(ScheduleTable::default())),
            irrigator_on: Arc::new(AtomicBool::new(false)),
            ntp_synced: Arc::new(AtomicBool::new(false)),
            wifi_connected: Arc::new(AtomicBool::new(false)),
            has_internet: Arc::new(AtomicBool::new(false)),
            ip_address: Arc::new(Mutex::new("0.0.0.0".to_string())),
            commands,
        };
        (board, listener)
    }

    pub fn now(&self) -> Option<DeviceTime> {
        self.clock.now()
    }

    pub fn commit_time(&self, time: DeviceTime) -> bool {
        self.clock.commit(time)
    }

    pub fn latest_reading(&self) -> SensorReading {
        *self.sensor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_reading(&self, reading: SensorReading) {
        *self.sensor.lock().unwrap_or_else(PoisonError::into_inner) = reading;
    }

    pub fn schedules(&self) -> [ScheduleEntry; SCHEDULE_SLOTS] {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_all()
    }

    pub fn set_schedule(&self, index: usize, entry: ScheduleEntry) -> Result<(), ScheduleError> {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_entry(index, entry)
    }

    pub fn irrigator_is_on(&self) -> bool {
        self.irrigator_on.load(Ordering::Relaxed)
    }

    pub fn ntp_synchronized(&self) -> bool {
        self.ntp_synced.load(Ordering::Relaxed)
    }

    pub fn set_ntp_synchronized(&self, synced: bool) {
        self.ntp_synced.store(synced, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.wifi_connected.load(Ordering::Relaxed)
    }

    pub fn has_internet(&self) -> bool {
        self.has_internet.load(Ordering::Relaxed)
    }

    pub fn set_connectivity(&self, connected: bool, internet: bool) {
        self.wifi_connected.store(connected, Ordering::Relaxed);
        self.has_internet.store(internet, Ordering::Relaxed);
    }

    pub fn ip_address(&self) -> String {
        self.ip_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_ip_address(&self, ip: String) {
        *self.ip_address.lock().unwrap_or_else(PoisonError::into_inner) = ip;
    }

    /// Fire-and-forget command to the irrigation supervisor. Overwrite
    /// semantics: a rapid on/off pair collapses to the final state.
    pub fn signal_irrigator(&self, command: IrrigatorCommand) {
        self.commands.signal(command);
    }

    fn set_irrigator_on(&self, on: bool) {
        self.irrigator_on.store(on, Ordering::Relaxed);
    }
}

/// Consumes irrigator commands and drives the relay state flag. A timed run
/// turns itself off once the commanded duration elapses; any newer command
/// supersedes the pending shutoff.
pub fn spawn_irrigation_supervisor(board: Board, mut commands: LatestListener<IrrigatorCommand>) {
    tokio::spawn(async move {
        let mut off_at: Option<Instant> = None;
        loop {
            let command = if let Some(deadline) = off_at {
                tokio::select! {
                    command = commands.next() => command,
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        board.set_irrigator_on(false);
                        off_at = None;
                        info!("irrigation run finished");
                        continue;
                    }
                }
            } else {
                commands.next().await
            };

            let Some(command) = command else {
                warn!("irrigator command channel closed, supervisor exiting");
                return;
            };

            match command {
                IrrigatorCommand::On {
                    duration_secs,
                    origin,
                } => {
                    board.set_irrigator_on(true);
                    off_at = Some(Instant::now() + Duration::from_secs(duration_secs as u64));
                    info!(
                        "irrigation turned on for {duration_secs}s ({})",
                        origin.as_str()
                    );
                }
                IrrigatorCommand::Off { origin } => {
                    board.set_irrigator_on(false);
                    off_at = None;
                    info!("irrigation turned off ({})", origin.as_str());
                }
            }
        }
    });
}

/// Feeds the shared sensor snapshot. Hardware integration point: replace the
/// simulated values with the AHT10 driver readings on the target board.
pub fn spawn_sensor_feed(board: Board) {
    tokio::spawn(async move {
        let mut tick: u64 = 0;
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            tick = tick.saturating_add(1);
            board.update_reading(SensorReading {
                temperature: 24.0 + ((tick % 8) as f32 * 0.2),
                humidity: 55.0 + ((tick % 6) as f32 * 0.5),
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use irrigator_common::CommandOrigin;

    #[test]
    fn clock_starts_at_default_and_accepts_commits() {
        let clock = DeviceClock::new();
        let now = clock.now().unwrap();
        assert_eq!(now.year, 2024);
        assert_eq!(now.month, 1);

        let committed = DeviceTime {
            year: 2026,
            month: 8,
            day: 29,
            hour: 10,
            min: 0,
            sec: 0,
            ..DeviceTime::default()
        };
        assert!(clock.commit(committed));
        let now = clock.now().unwrap();
        assert_eq!(now.year, 2026);
        assert_eq!(now.month, 8);
        assert_eq!(now.day, 29);
    }

    #[test]
    fn clock_rejects_invalid_date() {
        let clock = DeviceClock::new();
        let before = clock.now().unwrap();
        let bad = DeviceTime {
            year: 2026,
            month: 2,
            day: 31,
            ..DeviceTime::default()
        };
        assert!(!clock.commit(bad));
        assert_eq!(clock.now().unwrap().year, before.year);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_turns_off_after_duration() {
        let (board, listener) = Board::new();
        spawn_irrigation_supervisor(board.clone(), listener);

        board.signal_irrigator(IrrigatorCommand::On {
            duration_secs: 5,
            origin: CommandOrigin::Remote,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(board.irrigator_is_on());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!board.irrigator_is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_off_command_cancels_run() {
        let (board, listener) = Board::new();
        spawn_irrigation_supervisor(board.clone(), listener);

        board.signal_irrigator(IrrigatorCommand::On {
            duration_secs: 300,
            origin: CommandOrigin::Local,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(board.irrigator_is_on());

        board.signal_irrigator(IrrigatorCommand::Off {
            origin: CommandOrigin::Local,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!board.irrigator_is_on());
    }
}
