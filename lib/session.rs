use crate::clock::{Rate, SampleClock};
use crate::config::{CaptureDescriptor, RatePolicy};
use crate::error::{Error, Result};
use crate::hw::{AnalogInput, RecordSink, TickSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Running { remaining: u32 },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub appended: u32,
    /// Clock slots that passed while the flow was busy. Their samples are lost.
    pub missed_ticks: u64,
    pub rate: Rate,
}

/// Bounded run of tick, read and append, one sample per tick.
///
/// Best-effort fixed-rate capture: a slot missed while a block write stalls
/// is skipped and never replayed, the session still appends its target count.
pub struct CaptureSession<'a, T, A> {
    descriptor: CaptureDescriptor,
    rate: Rate,
    ticks: &'a mut T,
    input: &'a mut A,
    state: SessionState,
}

impl<'a, T, A> CaptureSession<'a, T, A>
where
    T: TickSource,
    A: AnalogInput,
{
    /// Checks the channel and the achievable rate before any record file is opened.
    pub fn new<E>(
        descriptor: &CaptureDescriptor,
        policy: RatePolicy,
        ticks: &'a mut T,
        input: &'a mut A,
    ) -> Result<Self, E> {
        if !input.supports(descriptor.channel) {
            error!("capture: channel {=u8} is not configured", descriptor.channel.0);
            return Err(Error::InvalidChannel(descriptor.channel));
        }
        let rate = Rate::new(descriptor.sample_period, ticks.resolution(), policy)?;
        Ok(CaptureSession {
            descriptor: *descriptor,
            rate,
            ticks,
            input,
            state: SessionState::Idle,
        })
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Captures into `sink` and closes it. A failed append aborts the session
    /// after a best-effort close; a failed close is reported as `FlushFailed`.
    pub fn run<K>(mut self, mut sink: K) -> Result<CaptureReport, K::Error>
    where
        K: RecordSink,
    {
        let target = self.descriptor.target_sample_count;
        let channel = self.descriptor.channel;
        info!(
            "capture: {=u32} samples on channel {=u8} every {=u64} ns",
            target,
            channel.0,
            self.rate.effective_period.as_nanos() as u64,
        );

        let mut clock = SampleClock::start(&mut *self.ticks, self.rate);
        self.state = SessionState::Running { remaining: target };
        while let SessionState::Running { remaining } = self.state {
            if remaining == 0 {
                self.state = SessionState::Completed;
                break;
            }
            clock.next_tick();
            let sample = self.input.read(channel);
            if let Err(source) = sink.append(sample) {
                let appended = target - remaining;
                error!("capture: write failed after {=u32} records", appended);
                if sink.close().is_err() {
                    warn!("capture: closing after a failed write failed too");
                }
                return Err(Error::WriteFailed { appended, source });
            }
            self.state = SessionState::Running {
                remaining: remaining - 1,
            };
        }

        let report = CaptureReport {
            appended: target,
            missed_ticks: clock.missed(),
            rate: self.rate,
        };
        if report.missed_ticks > 0 {
            warn!("capture: {=u64} clock slots missed", report.missed_ticks);
        }
        sink.close().map_err(Error::FlushFailed)?;
        info!("capture: {=u32} records committed", report.appended);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::clock::tests::SimTicks;
    use crate::record::tests::SharedFile;
    use crate::record::LineWriter;
    use crate::ChannelId;

    const CHANNEL: ChannelId = ChannelId(4);

    /// Returns a fixed sequence, remembering when each read happened.
    struct Script<'t> {
        values: std::vec::IntoIter<u16>,
        clock: &'t std::cell::Cell<u64>,
        reads_at: Vec<u64>,
    }

    impl AnalogInput for Script<'_> {
        fn supports(&self, channel: ChannelId) -> bool {
            channel == CHANNEL
        }

        fn read(&mut self, _: ChannelId) -> u16 {
            self.reads_at.push(self.clock.get());
            self.values.next().unwrap_or(0)
        }
    }

    /// Tick source publishing its time so the reader can stamp reads.
    struct Mirrored<'t> {
        inner: SimTicks,
        clock: &'t std::cell::Cell<u64>,
    }

    impl TickSource for Mirrored<'_> {
        fn resolution(&self) -> Duration {
            self.inner.resolution()
        }

        fn now(&self) -> u64 {
            self.inner.now()
        }

        fn wait_until(&mut self, deadline: u64) {
            self.inner.wait_until(deadline);
            self.clock.set(self.inner.now);
        }
    }

    #[derive(Default)]
    struct Collect {
        records: Vec<u16>,
        fail_at: Option<usize>,
        close_calls: usize,
        fail_close: bool,
    }

    impl RecordSink for &mut Collect {
        type Error = &'static str;

        fn append(&mut self, sample: u16) -> core::result::Result<(), Self::Error> {
            if self.fail_at == Some(self.records.len() + 1) {
                return Err("io");
            }
            self.records.push(sample);
            Ok(())
        }

        fn close(self) -> core::result::Result<(), Self::Error> {
            self.close_calls += 1;
            if self.fail_close {
                Err("flush")
            } else {
                Ok(())
            }
        }
    }

    fn descriptor(count: u32) -> CaptureDescriptor {
        CaptureDescriptor {
            target_sample_count: count,
            sample_period: Duration::from_millis(1),
            channel: CHANNEL,
        }
    }

    fn run(
        count: u32,
        values: &[u16],
        sink: &mut Collect,
    ) -> (Result<CaptureReport, &'static str>, Vec<u64>) {
        let clock = std::cell::Cell::new(0);
        let mut ticks = Mirrored {
            inner: SimTicks::new(Duration::from_millis(1)),
            clock: &clock,
        };
        let mut input = Script {
            values: values.to_vec().into_iter(),
            clock: &clock,
            reads_at: Vec::new(),
        };
        let result =
            CaptureSession::new(&descriptor(count), RatePolicy::Reject, &mut ticks, &mut input)
                .and_then(|session| session.run(sink));
        (result, input.reads_at)
    }

    #[test]
    fn appends_exactly_the_target_count_in_order() {
        let values: Vec<u16> = (0..100).map(|n| n * 3).collect();
        for count in [0u32, 1, 7, 100] {
            let mut sink = Collect::default();
            let (report, reads_at) = run(count, &values, &mut sink);
            let report = report.unwrap();
            assert_eq!(report.appended, count);
            assert_eq!(report.missed_ticks, 0);
            assert_eq!(sink.records, values[..count as usize]);
            assert_eq!(sink.close_calls, 1);
            // k-th record comes from the k-th tick
            let expected: Vec<u64> = (1..=count as u64).collect();
            assert_eq!(reads_at, expected);
        }
    }

    #[test]
    fn write_failure_aborts_with_the_accepted_count() {
        let mut sink = Collect {
            fail_at: Some(3),
            ..Collect::default()
        };
        let (report, reads_at) = run(5, &[10, 20, 30, 40, 50], &mut sink);
        assert_eq!(
            report,
            Err(Error::WriteFailed {
                appended: 2,
                source: "io"
            })
        );
        assert_eq!(sink.records, [10, 20]);
        assert_eq!(reads_at.len(), 3);
        // best-effort close still runs
        assert_eq!(sink.close_calls, 1);
    }

    fn run_buffered<const N: usize>(
        values: &[u16],
        file: &SharedFile,
    ) -> Result<CaptureReport, &'static str> {
        let mut ticks = SimTicks::new(Duration::from_millis(1));
        let clock = std::cell::Cell::new(0);
        let mut input = Script {
            values: values.to_vec().into_iter(),
            clock: &clock,
            reads_at: Vec::new(),
        };
        let capture = descriptor(values.len() as u32);
        CaptureSession::new(&capture, RatePolicy::Reject, &mut ticks, &mut input)
            .and_then(|session| session.run(LineWriter::<_, N>::new(file.clone())))
    }

    #[test]
    fn buffered_capture_lands_in_the_file() {
        let file = SharedFile::default();
        let report = run_buffered::<8>(&[10, 20, 30, 40, 50], &file).unwrap();
        assert_eq!(report.appended, 5);
        assert_eq!(file.text(), "10\n20\n30\n40\n50\n");
        assert!(file.0.borrow().committed);
    }

    #[test]
    fn failed_block_is_recovered_by_the_closing_flush() {
        let file = SharedFile::default();
        file.fail_writes(1..2);
        // "1111\n" fits, the second line fills the block and its write fails
        let report = run_buffered::<8>(&[1111, 2222, 3333], &file);
        assert_eq!(
            report,
            Err(Error::WriteFailed {
                appended: 1,
                source: "io"
            })
        );
        assert_eq!(file.text(), "1111\n");
        assert!(file.0.borrow().committed);
    }

    #[test]
    fn dead_medium_loses_the_buffered_records() {
        let file = SharedFile::default();
        file.fail_writes(1..usize::MAX);
        let report = run_buffered::<16>(&[1111, 2222, 3333, 4444], &file);
        // accepted into the block, never written
        assert_eq!(
            report,
            Err(Error::WriteFailed {
                appended: 3,
                source: "io"
            })
        );
        assert_eq!(file.text(), "");
        assert!(file.0.borrow().committed);
    }

    #[test]
    fn close_failure_is_reported_as_flush_failed() {
        let mut sink = Collect {
            fail_close: true,
            ..Collect::default()
        };
        let (report, _) = run(3, &[1, 2, 3], &mut sink);
        assert_eq!(report, Err(Error::FlushFailed("flush")));
        assert_eq!(sink.records, [1, 2, 3]);
    }

    #[test]
    fn unconfigured_channel_fails_at_setup() {
        let mut ticks = SimTicks::new(Duration::from_millis(1));
        let clock = std::cell::Cell::new(0);
        let mut input = Script {
            values: Vec::new().into_iter(),
            clock: &clock,
            reads_at: Vec::new(),
        };
        let descriptor = CaptureDescriptor {
            channel: ChannelId(9),
            ..descriptor(5)
        };
        let result =
            CaptureSession::new::<()>(&descriptor, RatePolicy::Clamp, &mut ticks, &mut input);
        assert!(matches!(result, Err(Error::InvalidChannel(ChannelId(9)))));
    }

    #[test]
    fn rejected_rate_fails_at_setup() {
        let mut ticks = SimTicks::new(Duration::from_millis(1));
        let clock = std::cell::Cell::new(0);
        let mut input = Script {
            values: Vec::new().into_iter(),
            clock: &clock,
            reads_at: Vec::new(),
        };
        let descriptor = CaptureDescriptor {
            sample_period: Duration::from_micros(125),
            ..descriptor(5)
        };
        let result =
            CaptureSession::new::<()>(&descriptor, RatePolicy::Reject, &mut ticks, &mut input);
        assert!(matches!(result, Err(Error::RateUnachievable)));
    }

    #[test]
    fn clamped_rate_still_captures_every_sample() {
        let mut ticks = SimTicks::new(Duration::from_millis(1));
        let clock = std::cell::Cell::new(0);
        let mut input = Script {
            values: vec![5; 8].into_iter(),
            clock: &clock,
            reads_at: Vec::new(),
        };
        let descriptor = CaptureDescriptor {
            sample_period: Duration::from_micros(125),
            ..descriptor(8)
        };
        let session = CaptureSession::new::<&'static str>(
            &descriptor,
            RatePolicy::Clamp,
            &mut ticks,
            &mut input,
        )
        .unwrap();
        assert!(session.rate().is_degraded());
        let mut sink = Collect::default();
        let report = session.run(&mut sink).unwrap();
        assert_eq!(report.appended, 8);
        assert_eq!(report.rate.effective_period, Duration::from_millis(1));
        assert_eq!(ticks.now, 8);
    }
}
