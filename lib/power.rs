use embedded_hal::digital::v2::OutputPin;

use crate::config::{EpisodeConfig, FilePolicy};
use crate::error::{Error, Result};
use crate::hw::{AnalogInput, RecordStore, SleepControl, TickSource};
use crate::session::{CaptureReport, CaptureSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    RailOff,
    RailStabilizing,
    Capturing,
    RailOffPendingSleep,
    Sleeping,
}

/// Sensor rail switch and status LED, owned by the controller alone.
pub struct Device<RAIL, LED> {
    rail: RAIL,
    led: LED,
}

impl<RAIL, LED> Device<RAIL, LED>
where
    RAIL: OutputPin,
    LED: OutputPin,
{
    pub fn new(rail: RAIL, led: LED) -> Self {
        Device { rail, led }
    }

    fn rail(&mut self, on: bool) -> core::result::Result<(), RAIL::Error> {
        if on {
            self.rail.set_high()
        } else {
            self.rail.set_low()
        }
    }

    // Indicator only, a stuck LED does not change the episode
    fn led(&mut self, on: bool) {
        let _ = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeReport<E> {
    /// Outcome of power-up and capture. Any error here still led to power-down.
    pub capture: Result<CaptureReport, E>,
    /// `Err(TimerConfig)` means the node never suspended.
    pub sleep: Result<(), E>,
}

/// Sequences one wake episode: rail up, settle, capture, rail down, arm the
/// wake timer and suspend. A new episode starts from a fresh controller.
pub struct PowerCycle<RAIL, LED, T, A, S, W> {
    config: EpisodeConfig,
    device: Device<RAIL, LED>,
    ticks: T,
    input: A,
    store: S,
    sleep: W,
    state: PowerState,
}

impl<RAIL, LED, T, A, S, W> PowerCycle<RAIL, LED, T, A, S, W>
where
    RAIL: OutputPin,
    LED: OutputPin,
    T: TickSource,
    A: AnalogInput,
    S: RecordStore,
    W: SleepControl,
{
    pub fn new(
        config: EpisodeConfig,
        device: Device<RAIL, LED>,
        ticks: T,
        input: A,
        store: S,
        sleep: W,
    ) -> Result<Self, S::Error> {
        config.validate()?;
        Ok(PowerCycle {
            config,
            device,
            ticks,
            input,
            store,
            sleep,
            state: PowerState::RailOff,
        })
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Runs the episode to the suspend call. On hardware `run` does not
    /// return unless the wake timer could not be armed.
    pub fn run(&mut self) -> EpisodeReport<S::Error> {
        let capture = self.power_up().and_then(|()| self.capture());
        match &capture {
            Ok(report) => info!(
                "episode: {=u32} records, {=u64} slots missed",
                report.appended,
                report.missed_ticks
            ),
            Err(error) => error!("episode: aborted, {=str}", error.name()),
        }
        let sleep = self.power_down();
        EpisodeReport { capture, sleep }
    }

    fn transition(&mut self, next: PowerState) {
        debug!("power: {} -> {}", self.state, next);
        self.state = next;
    }

    fn power_up(&mut self) -> Result<(), S::Error> {
        self.device.rail(true).map_err(|_| Error::Rail)?;
        self.transition(PowerState::RailStabilizing);
        // start-up blink doubles as the settle window
        self.device.led(true);
        self.ticks.delay(self.config.rail_settle);
        self.device.led(false);
        self.ticks.delay(self.config.rail_settle);

        info!("storage: mounting");
        self.store.mount()?;
        info!("storage: mounted");
        Ok(())
    }

    fn capture(&mut self) -> Result<CaptureReport, S::Error> {
        self.transition(PowerState::Capturing);
        let session = CaptureSession::new(
            &self.config.capture,
            self.config.rate_policy,
            &mut self.ticks,
            &mut self.input,
        )?;
        if self.config.destination.policy == FilePolicy::Truncate {
            warn!(
                "storage: {=str} is truncated, the previous episode's records are lost",
                self.config.destination.file
            );
        }
        let sink = self.store.open(&self.config.destination)?;
        session.run(sink)
    }

    fn power_down(&mut self) -> Result<(), S::Error> {
        self.transition(PowerState::RailOffPendingSleep);
        if self.device.rail(false).is_err() {
            error!("power: rail did not switch off");
        }
        self.ticks.delay(self.config.power_down_settle);

        if self.sleep.arm(self.config.sleep_duration).is_err() {
            error!("power: wake timer not armed, staying awake");
            return Err(Error::TimerConfig);
        }
        info!(
            "power: wake-up armed in {=u64} ms",
            self.config.sleep_duration.as_millis() as u64
        );

        for _ in 0..self.config.blink_count {
            self.device.led(true);
            self.ticks.delay(self.config.blink_half_period);
            self.device.led(false);
            self.ticks.delay(self.config.blink_half_period);
        }
        info!("power: entering standby");
        self.ticks.delay(self.config.pre_sleep_delay);

        self.transition(PowerState::Sleeping);
        self.sleep.suspend();
        Ok(())
    }
}
