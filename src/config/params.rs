//! モーター制御と安全監視の設定パラメータ

/// ホイールハブ直径 [inch]（タイヤ込み）
pub const HUB_DIAMETER_IN: f32 = 19.0;

/// BLDCモーターの極数
pub const MOTOR_POLES: f32 = 46.0;

/// BLDCモーターの相数
pub const MOTOR_PHASES: f32 = 3.0;

/// 換算係数: インチ → マイル
pub const IN_PER_MILE: f32 = 63360.0;

/// ハブ外周 [mile]
pub const HUB_CIRCUMFERENCE_MI: f32 =
    core::f32::consts::PI * (HUB_DIAMETER_IN / IN_PER_MILE);

/// 1転流あたりの走行距離 [mile]
pub const DIST_PER_COMMUTATION_MI: f32 = HUB_CIRCUMFERENCE_MI / (MOTOR_POLES * MOTOR_PHASES);

/// 換算係数: 転流回数/秒 → mph
pub const MPH_PER_COMMUTATION_PER_SEC: f32 = DIST_PER_COMMUTATION_MI * 3600.0;

/// 制御ループ周期 [ms]（100Hz）
pub const CONTROL_PERIOD_MS: u64 = 10;

/// 制御ループ周期 [s]
pub const CONTROL_PERIOD_S: f32 = (CONTROL_PERIOD_MS as f32) / 1000.0;

/// スロットル／デューティの最大コード（12bit ADCに一致）
pub const DUTY_MAX: u16 = 4095;

/// 速度制御パラメータ
pub mod speed_control {
    /// 速度制御の下限目標 [mph]
    pub const MIN_TARGET_MPH: f32 = 10.0;

    /// 速度制御の上限目標 [mph]
    pub const MAX_TARGET_MPH: f32 = 55.0;

    /// 比例ゲイン（デフォルト値、100.0で10〜55mphのスロットル全域をカバー）
    pub const DEFAULT_KP: f32 = 100.0;

    /// 基準デューティ（デフォルト値、2047 = 50%）
    pub const DEFAULT_DUTY_RAW: u16 = 2047;

    /// カウントベース速度推定に必要な最小転流回数／周期
    pub const MIN_COMMUTATIONS_PER_PERIOD: u32 = 4;
}

/// 安全しきい値（デフォルト値、超過で安全シャットダウンが発生する）
pub mod safety {
    /// バッテリー低電圧しきい値 [V]
    pub const DEFAULT_UNDERVOLTAGE_V: f32 = 38.0;

    /// バッテリー過電圧しきい値 [V]
    pub const DEFAULT_OVERVOLTAGE_V: f32 = 60.0;

    /// 相あたり過電流しきい値 [A]
    pub const DEFAULT_PHASE_OVERCURRENT_A: f32 = 35.0;

    /// 合計過電流しきい値 [A]（相あたりの2倍）
    pub const DEFAULT_TOTAL_OVERCURRENT_A: f32 = DEFAULT_PHASE_OVERCURRENT_A * 2.0;

    /// 過熱しきい値 [°F]
    pub const DEFAULT_OVERTEMP_F: f32 = 212.0;

    /// 転流シーケンス異常の許容回数
    pub const DEFAULT_SKIPPED_COMMUTATION_LIMIT: u32 = 200;
}

/// アナログ較正パラメータ（デフォルト値）
pub mod analog {
    /// バッテリー電圧チャネルのADC基準電圧 [V]
    pub const BATTERY_VREF: f32 = 3.3333;

    /// バッテリー分圧比（270kΩ : 15kΩ）
    pub const BATTERY_DIVIDER_RATIO: f32 = 270.0 / 15.0;

    /// 電流センサーのフルスケール電圧 [V]
    pub const CURRENT_VREF: f32 = 5.0;

    /// 電流センサーのゲイン補正
    pub const CURRENT_GAIN: f32 = 1.0615;

    /// 電流センサーのゼロ点オフセット [V]
    pub const CURRENT_OFFSET_V: f32 = 2.5;

    /// シャント抵抗相当の感度 [V/A]
    pub const CURRENT_SENSE_V_PER_A: f32 = 0.05;

    /// 負電流側の非線形補正係数
    pub const CURRENT_NEGATIVE_CORRECTION: f32 = 0.90;

    /// 電流チャネルの指数移動平均係数
    pub const CURRENT_FILTER_ALPHA: f32 = 0.0001;

    /// サーミスタ直列抵抗 [Ω]
    pub const THERMISTOR_R_REF: f32 = 9892.0;

    /// サーミスタB定数
    pub const THERMISTOR_BETA: f32 = 3950.0;

    /// サーミスタ基準温度 [K]（25°C）
    pub const THERMISTOR_T0_K: f32 = 298.15;

    /// 基準温度でのサーミスタ抵抗 [Ω]
    pub const THERMISTOR_R0: f32 = 100_000.0;
}

/// PWM設定
pub mod pwm {
    use embassy_stm32::time::Hertz;

    /// 高圧側PWM周波数（10kHz）（デフォルト値）
    pub const DEFAULT_FREQUENCY: Hertz = Hertz(10_000);
}

/// 通信設定
pub mod comms {
    /// UARTボーレート（対向コントローラーリンク）
    pub const BAUD_RATE: u32 = 19200;
}
