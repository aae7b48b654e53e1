#![deny(unsafe_code)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod buses;
mod eth;
mod network;
mod storage;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use defmt::{info, warn};
    use embassy_futures::join::join3;
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::flash::Flash;
    use embassy_stm32::gpio::{Flex, Level, Output, Pull, Speed};
    use embassy_stm32::i2c::{self, I2c};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::rng::Rng;
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use gateway_core::{BootOutcome, ConfigStore, Gateway, NetworkSettings};

    use buses::{BoardBuses, GpioPool};
    use network::ChannelSink;
    use storage::FlashStorage;

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    // RNG interrupt binding for hardware random number generator
    embassy_stm32::bind_interrupts!(struct RngIrqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
        gateway: Gateway<FlashStorage, ChannelSink>,
        buses: BoardBuses,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Sensor gateway starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (RNG clock)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("PLL configured: SYSCLK=84MHz, PLLQ=48MHz for RNG");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        // Persisted configuration; the RNG is only needed for a first boot MAC
        let flash = FlashStorage::new(Flash::new_blocking(p.FLASH));
        let mut rng = Rng::new(p.RNG, RngIrqs);
        let (store, outcome) = ConfigStore::boot(flash, &mut rng);
        match outcome {
            BootOutcome::Loaded => info!("Configuration loaded"),
            BootOutcome::Blank => info!("No stored configuration, using defaults"),
            BootOutcome::VersionMismatch { stored } => {
                warn!("Stored configuration has version {}, using defaults", stored)
            }
            BootOutcome::Corrupt => warn!("Stored configuration corrupt, using defaults"),
        }
        let network = store.config().network;
        let mac = store.config().mac;
        info!(
            "Board {} reporting to {}",
            store.config().board_id,
            network.destination()
        );
        let gateway = Gateway::new(store, ChannelSink::new());

        // Sensor buses: shared I2C for BH1750s, SPI1 for MAX31865s,
        // everything else bit-banged on the GPIO pool
        let mut i2c_config = i2c::Config::default();
        i2c_config.frequency = Hertz(100_000);
        let i2c = I2c::new_blocking(p.I2C1, p.PB6, p.PB7, i2c_config);

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(1_000_000);
        spi_config.mode = spi::MODE_1;
        let rtd_spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);

        let mut gpio = GpioPool::new();
        gpio.add(5, Flex::new(p.PC7));
        gpio.add(9, Flex::new(p.PB8));
        gpio.add(10, Flex::new(p.PB9));
        gpio.add(14, Flex::new(p.PA4));
        gpio.add(18, Flex::new(p.PC4));
        gpio.add(19, Flex::new(p.PC5));
        let buses = BoardBuses::new(gpio, i2c, rtd_spi);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        poll::spawn().ok();
        network_task::spawn(net_periph, network, mac).ok();

        (Shared {}, Local { led, gateway, buses })
    }

    /// Heartbeat task
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        info!("Heartbeat task started");
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Sensor poll loop
    ///
    /// Each tick does at most one bus step per sensor, so the loop period
    /// bounds the latency of the network task.
    #[task(priority = 1, local = [gateway, buses])]
    async fn poll(cx: poll::Context) {
        info!("Poll task started");
        let gateway = cx.local.gateway;
        let buses = cx.local.buses;
        loop {
            let now_ms = Mono::now().duration_since_epoch().to_millis();
            gateway.tick(now_ms, buses);
            Mono::delay(1.millis()).await;
        }
    }

    /// Network task - brings up the W5500 and drains the telemetry channel
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn network_task(
        _cx: network_task::Context,
        periph: NetworkPeripherals,
        settings: NetworkSettings,
        mac: [u8; 6],
    ) -> ! {
        use embassy_net::StackResources;
        use static_cell::StaticCell;

        info!("Network task started");

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let eth_periph = eth::EthPeripherals {
            spi,
            cs: Output::new(periph.cs, Level::High, Speed::VeryHigh),
            reset: Output::new(periph.reset, Level::High, Speed::Low),
            int: ExtiInput::new(periph.int, periph.exti, Pull::Up),
        };

        let (device, w5500_runner) = match eth::init_w5500(eth_periph, mac).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!("W5500 initialization failed: {}, telemetry disabled", e);
                loop {
                    Mono::delay(60.secs()).await;
                }
            }
        };

        static RESOURCES: StaticCell<StackResources<2>> = StaticCell::new();
        let seed = u64::from_le_bytes([mac[0], mac[1], mac[2], mac[3], mac[4], mac[5], 0, 0]);
        let (stack, mut net_runner) = embassy_net::new(
            device,
            network::static_config(&settings),
            RESOURCES.init(StackResources::new()),
            seed,
        );
        info!("Network stack initialized with static IPv4");

        let (never, _, _) = join3(
            w5500_runner.run(),
            net_runner.run(),
            network::forward_datagrams(stack),
        )
        .await;
        never
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
