#![no_std]
#![no_main]

// fmtは他のモジュールからマクロが見えるよう先頭で宣言する
mod fmt;

mod analog;
mod command;
mod commutation;
mod comms;
mod config;
mod eeprom;
mod hall_irq;
mod hardware;
mod power_stage;
mod safety;
mod speed;
mod state;
mod tasks;
mod telemetry;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use core::sync::atomic::Ordering;

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    crc::{Config as CrcConfig, Crc},
    exti::ExtiInput,
    flash::Flash,
    gpio::{Level, Output, OutputType, Pull, Speed},
    timer::{complementary_pwm::ComplementaryPwm, low_level::CountingMode, simple_pwm::PwmPin, Channel},
    usart::{self, Uart},
};
use embassy_time::{Duration, Timer};

use fmt::*;
use hardware::Irqs;
use tasks::{comms_task, control_task, direction_input_task, led_task, sampling_task};
use tasks::sampling::AnalogChannels;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let clock_config = hardware::create_clock_config();
    let p = embassy_stm32::init(clock_config);

    info!("═══════════════════════════════════════════════════════════");
    info!("");
    info!("    ███████╗██╗   ██╗    ██████╗ ██████╗ ██╗██╗   ██╗███████╗");
    info!("    ██╔════╝██║   ██║    ██╔══██╗██╔══██╗██║██║   ██║██╔════╝");
    info!("    █████╗  ██║   ██║    ██║  ██║██████╔╝██║██║   ██║█████╗  ");
    info!("    ██╔══╝  ╚██╗ ██╔╝    ██║  ██║██╔══██╗██║╚██╗ ██╔╝██╔══╝  ");
    info!("    ███████╗ ╚████╔╝     ██████╔╝██║  ██║██║ ╚████╔╝ ███████╗");
    info!("    ╚══════╝  ╚═══╝      ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═══╝  ╚══════╝");
    info!("");
    info!("        EV Drivetrain Controller • STM32G431VB @ 170MHz");
    info!("");
    info!("═══════════════════════════════════════════════════════════");

    // フラッシュとCRC初期化（較正データロード用）
    // CRCはSTM32デフォルト設定: CRC-32、poly=0x04C11DB7
    let mut flash = Flash::new_blocking(p.FLASH);
    let crc_config = CrcConfig::new(
        embassy_stm32::crc::InputReverseConfig::None,
        false, // reverse_out
        embassy_stm32::crc::PolySize::Width32,
        0xFFFFFFFF, // crc_init_value
        0x04C11DB7, // crc_poly (CRC-32)
    )
    .unwrap();
    let mut crc = Crc::new(p.CRC, crc_config);

    // 設定をフラッシュから読み込み（失敗時はデフォルト初期化）
    info!("Loading configuration from flash...");
    let stored_config = eeprom::load_or_initialize_config(&mut flash, &mut crc);

    // グローバル状態に設定を適用
    {
        let mut runtime_config = state::RUNTIME_CONFIG.lock().await;
        *runtime_config = stored_config;
    }
    state::DUTY_RAW.store(stored_config.speed_duty_raw, Ordering::Relaxed);

    info!("Config loaded: version={}", stored_config.version);
    info!(
        "  Battery scale mode={}, thresholds UV={}V OV={}V",
        stored_config.battery_scale_mode, stored_config.undervoltage_v, stored_config.overvoltage_v
    );
    info!(
        "  Speed control: Kp={}, base duty={}",
        stored_config.speed_kp, stored_config.speed_duty_raw
    );

    // LED初期化＆タスク起動
    let led1 = Output::new(p.PC13, Level::High, Speed::Low);
    let led2 = Output::new(p.PC14, Level::High, Speed::Low);
    let led3 = Output::new(p.PC15, Level::High, Speed::Low);
    spawner.spawn(led_task(led1, led2, led3)).unwrap();

    // ハイサイドPWM初期化（TIM1 CH1/CH2/CH3、10kHz）
    // デューティはpower_stageが転流ごとにレジスタへ直接書き込む
    let mut high_side_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(
            p.PE9,
            OutputType::PushPull,
        )),
        None,
        Some(PwmPin::new(
            p.PE11,
            OutputType::PushPull,
        )),
        None,
        Some(PwmPin::new(
            p.PE13,
            OutputType::PushPull,
        )),
        None,
        None,
        None,
        config::pwm::DEFAULT_FREQUENCY,
        CountingMode::EdgeAlignedUp,
    );
    high_side_pwm.set_duty(Channel::Ch1, 0);
    high_side_pwm.set_duty(Channel::Ch2, 0);
    high_side_pwm.set_duty(Channel::Ch3, 0);
    high_side_pwm.enable(Channel::Ch1);
    high_side_pwm.enable(Channel::Ch2);
    high_side_pwm.enable(Channel::Ch3);

    // ローサイド出力ピン初期化（PE8/PE10/PE12、全Low）
    unsafe {
        power_stage::init_low_side();
    }

    // TIM4 Hallセンサーインターフェース初期化＆初期整列
    // 割り込み有効化前に現在のHall状態へ出力カーソルを合わせておく
    // （アーム前なので出力段は遮断のまま）
    unsafe {
        hall_irq::init_hall_interface();
    }
    hall_irq::capture_initial_hall_state();
    commutation::align_output_to_hall();
    info!(
        "Hall interface ready (initial state {})",
        state::HALL_STATE.load(Ordering::Relaxed)
    );

    // ADC初期化（8スロット連続サンプリング用）
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);
    let channels = AnalogChannels {
        battery: p.PC1.degrade_adc(),
        throttle: p.PC0.degrade_adc(),
        current_a: p.PA4.degrade_adc(),
        current_b: p.PA5.degrade_adc(),
        current_c: p.PA6.degrade_adc(),
        temp_a: p.PA7.degrade_adc(),
        temp_b: p.PB2.degrade_adc(),
        temp_c: p.PC2.degrade_adc(),
    };
    spawner
        .spawn(sampling_task(adc2, channels, stored_config))
        .unwrap();
    info!("Analog sampling started (battery PC1, throttle PC0)");

    // UART初期化＆通信タスク起動（19200baud）
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = config::comms::BAUD_RATE;
    let uart = Uart::new(
        p.USART2,
        p.PA3,
        p.PA2,
        Irqs,
        p.DMA1_CH1,
        p.DMA1_CH2,
        uart_config,
    )
    .unwrap();
    spawner.spawn(comms_task(uart)).unwrap();

    // 方向入力ピン初期化＆タスク起動（プルダウン、両エッジ監視）
    let dir0 = ExtiInput::new(p.PB4, p.EXTI4, Pull::Down);
    let dir1 = ExtiInput::new(p.PB5, p.EXTI5, Pull::Down);
    spawner.spawn(direction_input_task(dir0, dir1)).unwrap();

    // 制御ループ起動（アーミング権限はこのタスクだけが持つ）
    let authority = state::ControlAuthority::take().unwrap();
    spawner.spawn(control_task(authority, stored_config)).unwrap();

    info!("Drivetrain control ready");

    // メインループ（将来の拡張用）
    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
