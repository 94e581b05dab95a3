use stm32g0xx_hal::analog::adc::{Adc as HalAdc, AdcExt, Precision, SampleTime};
use stm32g0xx_hal::hal::adc::{Channel as AdcChannel, OneShot};
use stm32g0xx_hal::rcc::Rcc;
use stm32g0xx_hal::stm32g0::stm32g070::ADC;

use crate::hw::AnalogInput;
use crate::{ChannelId, Sample, SAMPLE_MAX};

/// One-shot 12-bit conversions on a single input pin.
pub struct Adc<I> {
    adc: HalAdc,
    input: I,
}

impl<I> Adc<I>
where
    I: AdcChannel<HalAdc, ID = u8>,
    HalAdc: OneShot<HalAdc, u16, I>,
{
    pub fn new(pac_adc: ADC, input: I, rcc: &mut Rcc) -> Self {
        let mut adc = pac_adc.constrain(rcc);
        adc.set_precision(Precision::B_12);
        // 79.5 cycles, settles the sensor output impedance
        adc.set_sample_time(SampleTime::T_80);
        adc.calibrate();
        Adc { adc, input }
    }
}

impl<I> AnalogInput for Adc<I>
where
    I: AdcChannel<HalAdc, ID = u8>,
    HalAdc: OneShot<HalAdc, u16, I>,
{
    fn supports(&self, channel: ChannelId) -> bool {
        channel.0 == I::channel()
    }

    fn read(&mut self, _channel: ChannelId) -> Sample {
        match nb::block!(self.adc.read(&mut self.input)) {
            Ok(sample) => sample.min(SAMPLE_MAX),
            Err(_) => {
                error!("adc: conversion failed");
                0
            }
        }
    }
}
