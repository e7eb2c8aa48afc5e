//! アナログサンプリングタスク
//!
//! 8スロットのチャネルパターンを周回し、生コードを較正済み物理量へ
//! 変換してグローバルのセンサースナップショットに公開します。

use embassy_stm32::adc::{Adc, AnyAdcChannel};
use embassy_stm32::peripherals;
use embassy_time::{Duration, Ticker};

use crate::analog::{BatterySense, CurrentSense, ThermistorSense};
use crate::config::StoredConfig;
use crate::fmt::*;
use crate::state::SENSORS;

/// サンプリング対象の8チャネル（物理チャネル → 論理スロット）
pub struct AnalogChannels {
    pub battery: AnyAdcChannel<peripherals::ADC2>,
    pub throttle: AnyAdcChannel<peripherals::ADC2>,
    pub current_a: AnyAdcChannel<peripherals::ADC2>,
    pub current_b: AnyAdcChannel<peripherals::ADC2>,
    pub current_c: AnyAdcChannel<peripherals::ADC2>,
    pub temp_a: AnyAdcChannel<peripherals::ADC2>,
    pub temp_b: AnyAdcChannel<peripherals::ADC2>,
    pub temp_c: AnyAdcChannel<peripherals::ADC2>,
}

/// アナログサンプリングタスク - 全スロットを読み取り、較正値を公開
#[embassy_executor::task]
pub async fn sampling_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut channels: AnalogChannels,
    config: StoredConfig,
) {
    info!("Analog sampling task started (8-slot pattern)");

    let battery = BatterySense::from_config(&config);
    let mut current_a = CurrentSense::from_config(&config);
    let mut current_b = CurrentSense::from_config(&config);
    let mut current_c = CurrentSense::from_config(&config);
    let thermistor = ThermistorSense::from_config(&config);

    // 電流フィルタを初回読み取り値で初期化（α=1e-4の収束待ちを防ぐ）
    current_a.prime(adc.blocking_read(&mut channels.current_a));
    current_b.prime(adc.blocking_read(&mut channels.current_b));
    current_c.prime(adc.blocking_read(&mut channels.current_c));

    let mut ticker = Ticker::every(Duration::from_millis(1));

    // デバッグログ用カウンタ（1秒ごとにログ）
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        // 全スロットを順に読んで較正値へ変換
        let battery_volts = battery.convert(adc.blocking_read(&mut channels.battery));
        let throttle_code = adc.blocking_read(&mut channels.throttle);
        let amps_a = current_a.update(adc.blocking_read(&mut channels.current_a));
        let amps_b = current_b.update(adc.blocking_read(&mut channels.current_b));
        let amps_c = current_c.update(adc.blocking_read(&mut channels.current_c));
        let temp_a = thermistor.convert(adc.blocking_read(&mut channels.temp_a));
        let temp_b = thermistor.convert(adc.blocking_read(&mut channels.temp_b));
        let temp_c = thermistor.convert(adc.blocking_read(&mut channels.temp_c));

        // スナップショットへ公開。無効な温度サンプル（コード0/フルスケール）
        // は破棄し、前回値を保持する
        {
            let mut sensors = SENSORS.lock().await;
            sensors.battery_volts = battery_volts;
            sensors.throttle_code = throttle_code;
            sensors.current_a = amps_a;
            sensors.current_b = amps_b;
            sensors.current_c = amps_c;
            if let Some(reading) = temp_a {
                sensors.temp_a_f = reading.fahrenheit;
            }
            if let Some(reading) = temp_b {
                sensors.temp_b_f = reading.fahrenheit;
            }
            if let Some(reading) = temp_c {
                sensors.temp_c_f = reading.fahrenheit;
            }
        }

        // デバッグログ（1秒ごと = 1000回に1回）
        log_counter += 1;
        if log_counter >= 1000 {
            log_counter = 0;
            debug!(
                "[Analog] V={}V Ia={}A Ib={}A Ic={}A throttle={}",
                battery_volts, amps_a, amps_b, amps_c, throttle_code
            );
        }
    }
}
