use core::time::Duration;

use crate::config::RatePolicy;
use crate::error::{Error, Result};
use crate::hw::TickSource;

/// Period as the scheduler can actually honour it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub nominal_period: Duration,
    pub effective_period: Duration,
    pub period_ticks: u64,
}

impl Rate {
    pub fn new<E>(period: Duration, resolution: Duration, policy: RatePolicy) -> Result<Self, E> {
        let resolution_ns = resolution.as_nanos().max(1);
        let exact = period.as_nanos() % resolution_ns == 0 && !period.is_zero();
        if !exact && policy == RatePolicy::Reject {
            return Err(Error::RateUnachievable);
        }
        // never zero ticks, a zero wait would spin without yielding
        let period_ticks = ((period.as_nanos() + resolution_ns - 1) / resolution_ns)
            .clamp(1, u64::MAX as u128) as u64;
        let effective_ns = (period_ticks as u128 * resolution_ns).min(u64::MAX as u128);
        let effective_period = Duration::from_nanos(effective_ns as u64);
        let rate = Rate {
            nominal_period: period,
            effective_period,
            period_ticks,
        };
        if rate.is_degraded() {
            warn!(
                "sample period {=u64} ns runs at {=u64} ns, scheduler tick is {=u64} ns",
                period.as_nanos() as u64,
                effective_period.as_nanos() as u64,
                resolution.as_nanos() as u64,
            );
        }
        Ok(rate)
    }

    pub fn is_degraded(&self) -> bool {
        self.effective_period != self.nominal_period
    }
}

/// Widens a wrapping 32-bit tick counter. `last` must have been read less
/// than 2^32 ticks ago, about 6.2 days at 8 kHz.
pub fn extend_ticks(last: u64, raw: u32) -> u64 {
    last + raw.wrapping_sub(last as u32) as u64
}

/// One scheduled instant. `slot` counts from 1 and includes skipped slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub slot: u64,
    pub at: u64,
}

/// Fixed-rate trigger. Deadlines are counted from the start tick, so a late
/// wake-up delays one sample and never the ones after it.
pub struct SampleClock<'a, T> {
    ticks: &'a mut T,
    rate: Rate,
    start: u64,
    slot: u64,
    missed: u64,
}

impl<'a, T> SampleClock<'a, T>
where
    T: TickSource,
{
    /// Starts counting slots from the current tick.
    pub fn start(ticks: &'a mut T, rate: Rate) -> Self {
        let start = ticks.now();
        SampleClock {
            ticks,
            rate,
            start,
            slot: 0,
            missed: 0,
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Slots skipped because the caller fell a whole period or more behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Suspends until the next slot that has not already passed.
    pub fn next_tick(&mut self) -> Tick {
        let period = self.rate.period_ticks;
        self.slot += 1;
        let mut deadline = self.start + self.slot * period;
        let now = self.ticks.now();
        if now >= deadline + period {
            let behind = (now - deadline) / period;
            self.slot += behind;
            self.missed += behind;
            deadline += behind * period;
        }
        self.ticks.wait_until(deadline);
        Tick {
            slot: self.slot,
            at: deadline,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Virtual scheduler. Time moves only in `wait_until`, or when a test advances it.
    pub struct SimTicks {
        pub resolution: Duration,
        pub now: u64,
        pub overshoot: u64,
        pub wakeups: Vec<u64>,
    }

    impl SimTicks {
        pub fn new(resolution: Duration) -> Self {
            SimTicks {
                resolution,
                now: 0,
                overshoot: 0,
                wakeups: Vec::new(),
            }
        }
    }

    impl TickSource for SimTicks {
        fn resolution(&self) -> Duration {
            self.resolution
        }

        fn now(&self) -> u64 {
            self.now
        }

        fn wait_until(&mut self, deadline: u64) {
            if deadline > self.now {
                self.now = deadline + self.overshoot;
            }
            self.wakeups.push(self.now);
        }
    }

    const MS: Duration = Duration::from_millis(1);

    fn every_ms(ticks: &mut SimTicks, ms: u32) -> SampleClock<'_, SimTicks> {
        let rate = Rate::new::<()>(MS * ms, MS, RatePolicy::Clamp).unwrap();
        SampleClock::start(ticks, rate)
    }

    #[test]
    fn exact_period_is_not_degraded() {
        let rate = Rate::new::<()>(MS * 3, MS, RatePolicy::Reject).unwrap();
        assert_eq!(rate.period_ticks, 3);
        assert!(!rate.is_degraded());
    }

    #[test]
    fn sub_tick_period_clamps_to_one_tick() {
        let rate = Rate::new::<()>(Duration::from_micros(125), MS, RatePolicy::Clamp).unwrap();
        assert_eq!(rate.period_ticks, 1);
        assert_eq!(rate.effective_period, MS);
        assert!(rate.is_degraded());
    }

    #[test]
    fn zero_period_clamps_to_one_tick() {
        let rate = Rate::new::<()>(Duration::ZERO, MS, RatePolicy::Clamp).unwrap();
        assert_eq!(rate.period_ticks, 1);
    }

    #[test]
    fn uneven_period_rounds_up() {
        let rate = Rate::new::<()>(Duration::from_micros(1500), MS, RatePolicy::Clamp).unwrap();
        assert_eq!(rate.period_ticks, 2);
        assert_eq!(rate.effective_period, MS * 2);
    }

    #[test]
    fn long_period_on_a_fine_tick_stays_exact() {
        let period = Duration::from_secs(5);
        let rate = Rate::new::<()>(period, Duration::from_nanos(1), RatePolicy::Reject).unwrap();
        assert_eq!(rate.period_ticks, 5_000_000_000);
        assert_eq!(rate.effective_period, period);
        assert!(!rate.is_degraded());
    }

    #[test]
    fn tick_counter_keeps_counting_across_the_wrap() {
        assert_eq!(extend_ticks(0, 7), 7);
        let before_wrap = u32::MAX as u64 - 2;
        assert_eq!(extend_ticks(before_wrap, 1), u32::MAX as u64 + 2);
        let second_lap = (1u64 << 32) * 3 + 10;
        assert_eq!(extend_ticks(second_lap, 25), second_lap + 15);
    }

    #[test]
    fn reject_policy_refuses_sub_tick_period() {
        assert_eq!(
            Rate::new::<()>(Duration::from_micros(125), MS, RatePolicy::Reject),
            Err(Error::RateUnachievable)
        );
    }

    #[test]
    fn ticks_never_come_early() {
        let mut ticks = SimTicks::new(MS);
        ticks.now = 10;
        let mut clock = every_ms(&mut ticks, 4);
        let mut last = 10;
        for n in 1..=50u64 {
            let tick = clock.next_tick();
            assert_eq!(tick.slot, n);
            assert!(tick.at >= 10 + n * 4);
            assert!(tick.at - last >= 4);
            last = tick.at;
        }
        assert_eq!(clock.missed(), 0);
    }

    #[test]
    fn late_wakeups_do_not_accumulate() {
        let mut ticks = SimTicks::new(MS);
        ticks.overshoot = 1;
        let mut clock = every_ms(&mut ticks, 3);
        for _ in 0..1000 {
            clock.next_tick();
        }
        drop(clock);
        let wakeups = &ticks.wakeups;
        for pair in wakeups.windows(2) {
            assert!(pair[1] - pair[0] >= 3);
        }
        // one tick of drift after 1000 periods, not 1000
        assert_eq!(*wakeups.last().unwrap(), 3000 + 1);
    }

    #[test]
    fn stall_skips_passed_slots() {
        let mut ticks = SimTicks::new(MS);
        let mut clock = every_ms(&mut ticks, 2);
        assert_eq!(clock.next_tick().at, 2);
        // a slow write holds the flow for 7 ms
        clock.ticks.now += 7;
        let tick = clock.next_tick();
        assert_eq!(tick.slot, 4);
        assert_eq!(tick.at, 8);
        assert_eq!(clock.missed(), 2);
        let tick = clock.next_tick();
        assert_eq!(tick.slot, 5);
        assert_eq!(tick.at, 10);
    }
}
