#![no_main]
#![no_std]

use lib as _;

use lib::config::{EpisodeConfig, SCHEDULER_TICK_HZ, SD_SPI_INIT_HZ};
use lib::hw::{init_card, init_clock, Node, SensorAdc, Standby, TickTimer, Ticks};
use lib::power::Device;
use rtic::app;
use stm32g0xx_hal::timer::delay::DelayExt;
use stm32g0xx_hal::gpio::GpioExt;
use stm32g0xx_hal::spi::{SpiExt, MODE_0};
use stm32g0xx_hal::time::RateExtU32;

#[app(device = stm32g0xx_hal::stm32, peripherals = true)]
const APP: () = {
    struct Resources {
        node: Node,
        tick_timer: TickTimer,
    }

    #[init]
    fn init(cx: init::Context) -> init::LateResources {
        let core: rtic::export::Peripherals = cx.core;
        let device: stm32g0xx_hal::stm32::Peripherals = cx.device;

        // Clock
        let mut rcc = init_clock(device.RCC);
        let delay = core.SYST.delay(&mut rcc);

        // GPIO
        let gpioa = device.GPIOA.split(&mut rcc);
        let gpiob = device.GPIOB.split(&mut rcc);

        // Scheduler tick
        let tick_timer = TickTimer::new(device.TIM7, SCHEDULER_TICK_HZ.Hz(), &mut rcc);

        // Sensor rail and status LED
        let board = Device::new(
            gpioa.pa8.into_push_pull_output(),
            gpioa.pa5.into_push_pull_output(),
        );

        // ADC
        let adc = SensorAdc::new(device.ADC, gpioa.pa4.into_analog(), &mut rcc);

        // SD card, raised to SD_SPI_WORK_HZ once the card answers
        let spi = device.SPI1.spi(
            (gpiob.pb3, gpiob.pb4, gpiob.pb5),
            MODE_0,
            SD_SPI_INIT_HZ.Hz(),
            &mut rcc,
        );
        let store = init_card(spi, gpiob.pb6.into_push_pull_output(), delay);

        // Wake-up
        let standby = Standby::new(device.PWR, device.RTC, core.SCB, &mut rcc);

        let node = Node::new(
            EpisodeConfig::DEFAULT,
            board,
            Ticks::new(SCHEDULER_TICK_HZ),
            adc,
            store,
            standby,
        )
        .unwrap();

        init::LateResources { node, tick_timer }
    }

    #[idle(resources = [node, tick_timer])]
    fn idle(mut cx: idle::Context) -> ! {
        cx.resources.tick_timer.lock(|timer: &mut TickTimer| {
            timer.start();
        });

        let node: &mut Node = cx.resources.node;
        let report = node.run();
        // STANDBY resets the MCU, only an unarmed wake timer gets here
        if let Err(error) = report.sleep {
            defmt::error!("node: {=str}, halted", error.name());
        }
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(binds = TIM7, priority = 1, resources = [tick_timer])]
    fn tim7(cx: tim7::Context) {
        let timer: &mut TickTimer = cx.resources.tick_timer;
        timer.unpend();
    }
};
