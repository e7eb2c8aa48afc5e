//! アナログ較正・換算
//!
//! 12bit ADC生コードを物理量（電圧・電流・温度）へ変換します。
//! 変換パラメータはすべてStoredConfig由来で、基板リビジョンごとの
//! 再導出を不要にしています。

use libm::logf;

use crate::config::storage::BATTERY_SCALE_LINEAR;
use crate::config::StoredConfig;

/// 12bit ADCのフルスケールコード
const ADC_FULL_SCALE: f32 = 4095.0;

/// バッテリー電圧の換算モデル
///
/// 初期リビジョン基板は分圧抵抗（270kΩ:15kΩ）モデル、後期リビジョンは
/// 実測から求めた単一線形係数を使用する。どちらも設定で選択できる。
#[derive(Debug, Clone, Copy)]
pub enum VoltageScale {
    /// `raw * (vref/4095) * ratio`
    Divider { vref: f32, ratio: f32 },
    /// `raw * volts_per_count`
    Linear { volts_per_count: f32 },
}

/// バッテリー電圧チャネルの換算器
pub struct BatterySense {
    scale: VoltageScale,
}

impl BatterySense {
    pub fn new(scale: VoltageScale) -> Self {
        Self { scale }
    }

    pub fn from_config(config: &StoredConfig) -> Self {
        let scale = if config.battery_scale_mode == BATTERY_SCALE_LINEAR {
            VoltageScale::Linear {
                volts_per_count: config.battery_volts_per_count,
            }
        } else {
            VoltageScale::Divider {
                vref: config.battery_vref,
                ratio: config.battery_divider_ratio,
            }
        };
        Self::new(scale)
    }

    /// ADC生コードからバッテリー電圧 [V] を計算
    pub fn convert(&self, raw: u16) -> f32 {
        match self.scale {
            VoltageScale::Divider { vref, ratio } => {
                let processed = (raw as f32) * (vref / ADC_FULL_SCALE);
                processed * ratio
            }
            VoltageScale::Linear { volts_per_count } => (raw as f32) * volts_per_count,
        }
    }
}

/// 相電流チャネルの換算器（チャネルごとに1個、移動平均状態を保持）
pub struct CurrentSense {
    vref: f32,
    gain: f32,
    offset_v: f32,
    sense_v_per_a: f32,
    negative_correction: f32,
    filter_alpha: f32,
    avg_code: f32,
}

impl CurrentSense {
    pub fn from_config(config: &StoredConfig) -> Self {
        Self {
            vref: config.current_vref,
            gain: config.current_gain,
            offset_v: config.current_offset_v,
            sense_v_per_a: config.current_sense_v_per_a,
            negative_correction: config.current_negative_correction,
            filter_alpha: config.current_filter_alpha,
            avg_code: 0.0,
        }
    }

    /// フィルタを初期コードで初期化（起動直後の長い収束待ちを防ぐ）
    pub fn prime(&mut self, raw: u16) {
        self.avg_code = raw as f32;
    }

    /// 新しいサンプルを取り込み、較正済み電流 [A] を返す
    ///
    /// αが非常に小さい（観測値1e-4）ため応答より長期安定性を優先した
    /// 強いローパスになっている。
    pub fn update(&mut self, raw: u16) -> f32 {
        self.avg_code =
            (raw as f32) * self.filter_alpha + self.avg_code * (1.0 - self.filter_alpha);

        let volts = (self.avg_code / ADC_FULL_SCALE) * self.vref;
        let mut amps = (volts * self.gain - self.offset_v) / self.sense_v_per_a;

        // センサーのゼロ点以下は既知の非線形があるため追加補正をかける
        if amps < 0.0 {
            amps *= self.negative_correction;
        }
        amps
    }
}

/// 温度換算結果
#[derive(Debug, Clone, Copy)]
pub struct TempReading {
    pub kelvin: f32,
    pub celsius: f32,
    pub fahrenheit: f32,
}

/// サーミスタチャネルの換算器（B定数近似）
pub struct ThermistorSense {
    r_ref: f32,
    beta: f32,
    t0_k: f32,
    r0: f32,
}

impl ThermistorSense {
    pub fn from_config(config: &StoredConfig) -> Self {
        Self {
            r_ref: config.thermistor_r_ref,
            beta: config.thermistor_beta,
            t0_k: config.thermistor_t0_k,
            r0: config.thermistor_r0,
        }
    }

    /// ADC生コードから温度を計算
    ///
    /// 抵抗換算 `R = r_ref*((4095/raw) - 1)` はコード0でゼロ除算、
    /// フルスケールでR=0（ln発散）になるため、その範囲のサンプルは
    /// 破棄してNoneを返す（前回値を保持するステイル値セマンティクス）。
    pub fn convert(&self, raw: u16) -> Option<TempReading> {
        if raw == 0 || raw as f32 >= ADC_FULL_SCALE {
            return None;
        }

        let resistance = self.r_ref * ((ADC_FULL_SCALE / raw as f32) - 1.0);

        // B定数近似: 1/T = 1/T0 + ln(R/R0)/B
        let inv_t = (1.0 / self.t0_k) + logf(resistance / self.r0) / self.beta;
        let kelvin = 1.0 / inv_t;
        let celsius = kelvin - 273.15;
        let fahrenheit = celsius * 1.8 + 32.0;

        Some(TempReading {
            kelvin,
            celsius,
            fahrenheit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::storage::BATTERY_SCALE_DIVIDER;

    fn config() -> StoredConfig {
        StoredConfig::default()
    }

    #[test]
    fn test_battery_divider_model() {
        let sense = BatterySense::from_config(&config());
        // 270:15分圧、Vref=3.3333V: コード3276 ≒ 48.0V
        let volts = sense.convert(3276);
        assert!((volts - 48.0).abs() < 0.05, "got {}", volts);
        assert_eq!(sense.convert(0), 0.0);
    }

    #[test]
    fn test_battery_linear_model() {
        let mut cfg = config();
        cfg.battery_scale_mode = BATTERY_SCALE_LINEAR;
        cfg.battery_volts_per_count = 0.0146;
        let sense = BatterySense::from_config(&cfg);
        let volts = sense.convert(1000);
        assert!((volts - 14.6).abs() < 0.001, "got {}", volts);
    }

    #[test]
    fn test_battery_models_agree_at_default_scale() {
        // デフォルトの線形係数は分圧モデルと等価に初期化される
        let divider = BatterySense::from_config(&config());
        let mut cfg = config();
        cfg.battery_scale_mode = BATTERY_SCALE_LINEAR;
        let linear = BatterySense::from_config(&cfg);
        for raw in [100u16, 2048, 4095] {
            let d = divider.convert(raw);
            let l = linear.convert(raw);
            assert!((d - l).abs() < 0.01, "raw={}: {} vs {}", raw, d, l);
        }
    }

    #[test]
    fn test_current_zero_point() {
        let mut sense = CurrentSense::from_config(&config());
        // ゼロ電流点: v*1.0615 = 2.5 → コード ≒ 1929
        sense.prime(1929);
        let amps = sense.update(1929);
        assert!(amps.abs() < 0.05, "got {}", amps);
    }

    #[test]
    fn test_current_negative_correction() {
        let mut sense = CurrentSense::from_config(&config());
        sense.prime(1000);
        let amps = sense.update(1000);
        // 補正前 -24.08A、×0.90 ≒ -21.67A
        assert!((amps + 21.67).abs() < 0.05, "got {}", amps);
    }

    #[test]
    fn test_current_filter_is_heavily_damped() {
        let mut sense = CurrentSense::from_config(&config());
        sense.prime(1929); // ゼロ電流点
        // 1サンプルの大入力ではほとんど動かない（α=1e-4）
        let amps = sense.update(4095);
        assert!(amps.abs() < 0.1, "got {}", amps);
    }

    #[test]
    fn test_thermistor_room_temperature() {
        let sense = ThermistorSense::from_config(&config());
        // コード368でR ≒ 100kΩ = R0 → 約25°C / 77°F
        let reading = sense.convert(368).unwrap();
        assert!((reading.celsius - 25.0).abs() < 0.5, "got {}", reading.celsius);
        assert!((reading.fahrenheit - 77.0).abs() < 1.0, "got {}", reading.fahrenheit);
        assert!((reading.kelvin - 298.15).abs() < 0.5);
    }

    #[test]
    fn test_thermistor_monotonic() {
        // コードが大きい（抵抗が小さい）ほど高温
        let sense = ThermistorSense::from_config(&config());
        let cold = sense.convert(200).unwrap();
        let warm = sense.convert(1000).unwrap();
        assert!(warm.celsius > cold.celsius);
    }

    #[test]
    fn test_thermistor_rejects_degenerate_codes() {
        let sense = ThermistorSense::from_config(&config());
        assert!(sense.convert(0).is_none());
        assert!(sense.convert(4095).is_none());
        assert!(sense.convert(1).is_some());
        assert!(sense.convert(4094).is_some());
    }

    #[test]
    fn test_default_mode_is_divider() {
        assert_eq!(config().battery_scale_mode, BATTERY_SCALE_DIVIDER);
    }
}
