//! グローバル共有状態管理
//!
//! タスク間で共有される状態をMutexで保護し、Hall割り込みと共有する
//! 状態はアトミック変数で保持します。アーミング状態とエラーコードの
//! 書き込みは`ControlAuthority`を保持する制御ループのみが行えます。

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;

use crate::config::{speed_control, StoredConfig};
use crate::safety::SafetyCode;

/// 較正済みセンサー値のスナップショット
///
/// サンプリングタスクのみが書き込む。フィールドは互いに独立して
/// 更新されるため、フィールド間の同時性は保証されない。
#[derive(Debug, Clone, Copy)]
pub struct SensorSnapshot {
    /// バッテリー電圧 [V]
    pub battery_volts: f32,
    /// A相電流 [A]
    pub current_a: f32,
    /// B相電流 [A]
    pub current_b: f32,
    /// C相電流 [A]
    pub current_c: f32,
    /// A相温度 [°F]
    pub temp_a_f: f32,
    /// B相温度 [°F]
    pub temp_b_f: f32,
    /// C相温度 [°F]
    pub temp_c_f: f32,
    /// スロットル入力の生コード（テレメトリ用）
    pub throttle_code: u16,
}

impl SensorSnapshot {
    pub const fn new() -> Self {
        Self {
            battery_volts: 0.0,
            current_a: 0.0,
            current_b: 0.0,
            current_c: 0.0,
            temp_a_f: 0.0,
            temp_b_f: 0.0,
            temp_c_f: 0.0,
            throttle_code: 0,
        }
    }
}

/// 走行積算量（制御ループのみが書き込む）
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    /// 現在の対地速度 [mph]
    pub speed_mph: f32,
    /// 瞬時電力 [W]
    pub inst_power_w: f32,
    /// 累積エネルギー [J]
    pub total_energy_j: f32,
    /// アーム状態での走行時間 [ms]
    pub runtime_ms: u32,
}

impl RunStats {
    pub const fn new() -> Self {
        Self {
            speed_mph: 0.0,
            inst_power_w: 0.0,
            total_energy_j: 0.0,
            runtime_ms: 0,
        }
    }
}

/// センサースナップショット（サンプリングタスクが更新）
pub static SENSORS: Mutex<ThreadModeRawMutex, SensorSnapshot> =
    Mutex::new(SensorSnapshot::new());

/// 走行積算量（制御ループが更新、テレメトリが参照）
pub static RUN_STATS: Mutex<ThreadModeRawMutex, RunStats> = Mutex::new(RunStats::new());

/// ランタイム設定（フラッシュから読み込まれた設定）
pub static RUNTIME_CONFIG: Mutex<ThreadModeRawMutex, StoredConfig> =
    Mutex::new(StoredConfig::default());

// ---------------------------------------------------------------------------
// Hall割り込みと共有するアトミック状態
// ---------------------------------------------------------------------------

/// 最新のHallセンサー状態（3bit、割り込みで更新）
pub static HALL_STATE: AtomicU8 = AtomicU8::new(0);

/// 方向指令（2bitコード、00/11=ニュートラル、01=前進、10=後進）
pub static DIRECTION: AtomicU8 = AtomicU8::new(0);

/// アーム状態（書き込みはControlAuthority経由のみ）
static ARMED: AtomicBool = AtomicBool::new(false);

/// 安全エラーコード（0=正常、書き込みはControlAuthority経由のみ）
static SAFETY_CODE: AtomicU8 = AtomicU8::new(0);

/// スロットル指令（0-4095、通信セッターが更新）
pub static THROTTLE: AtomicU16 = AtomicU16::new(0);

/// 速度制御有効フラグ
pub static SPEED_CONTROL_ENABLED: AtomicBool = AtomicBool::new(false);

/// 速度制御の目標値 [mph]（f32ビットパターン）
static SPEED_TARGET_MPH_BITS: AtomicU32 = AtomicU32::new(0);

/// 速度制御の基準デューティ（0-4095）
pub static DUTY_RAW: AtomicU16 = AtomicU16::new(speed_control::DEFAULT_DUTY_RAW);

/// 比例補正適用後の最終デューティ（0-4095、制御ループが更新）
pub static DUTY_FINAL: AtomicU16 = AtomicU16::new(0);

/// 現在のHall入力テーブルインデックス（0-5）
pub static INPUT_INDEX: AtomicU8 = AtomicU8::new(0);

/// 現在の出力テーブルインデックス（0-6、6=ニュートラル）
pub static OUTPUT_INDEX: AtomicU8 = AtomicU8::new(0);

/// 次に観測されるはずのHall状態
pub static EXPECTED_HALL: AtomicU8 = AtomicU8::new(0);

/// 今周期の転流回数（割り込みが加算、制御ループが破壊的に回収）
pub static COMMUTATION_COUNT: AtomicU32 = AtomicU32::new(0);

/// 転流シーケンス異常の累積回数
pub static SKIPPED_COMMUTATIONS: AtomicU32 = AtomicU32::new(0);

/// 直近3回の転流タイムスタンプ [µs]（新しい順）
///
/// 割り込みがシフト挿入し、制御ループが低速時の速度推定に使用する。
/// 割り込みはいつでも制御ループを横取りできるため、クリティカル
/// セクションで保護する。
pub static COMMUTATION_TIMESTAMPS: BlockingMutex<CriticalSectionRawMutex, RefCell<[u64; 3]>> =
    BlockingMutex::new(RefCell::new([0; 3]));

/// 転流タイムスタンプを記録（割り込みコンテキストから呼ばれる）
#[inline(always)]
pub fn record_commutation_timestamp(now_us: u64) {
    COMMUTATION_TIMESTAMPS.lock(|cell| {
        let mut ring = cell.borrow_mut();
        ring[2] = ring[1];
        ring[1] = ring[0];
        ring[0] = now_us;
    });
}

/// タイムスタンプリングへの排他アクセス（制御ループ用）
pub fn with_commutation_timestamps<R>(f: impl FnOnce(&mut [u64; 3]) -> R) -> R {
    COMMUTATION_TIMESTAMPS.lock(|cell| f(&mut cell.borrow_mut()))
}

// ---------------------------------------------------------------------------
// 読み取りヘルパー
// ---------------------------------------------------------------------------

/// アーム状態を取得
#[inline(always)]
pub fn is_armed() -> bool {
    ARMED.load(Ordering::Relaxed)
}

/// 現在の安全エラーコードを取得（None=正常）
#[inline(always)]
pub fn safety_code() -> Option<SafetyCode> {
    SafetyCode::from_raw(SAFETY_CODE.load(Ordering::Relaxed))
}

/// 安全エラーコードの生値を取得（0=正常）
#[inline(always)]
pub fn safety_code_raw() -> u8 {
    SAFETY_CODE.load(Ordering::Relaxed)
}

/// 速度制御の目標値を取得 [mph]
#[inline(always)]
pub fn speed_target_mph() -> f32 {
    f32::from_bits(SPEED_TARGET_MPH_BITS.load(Ordering::Relaxed))
}

/// 速度制御の目標値を設定 [mph]（通信セッター専用）
#[inline(always)]
pub(crate) fn set_speed_target_mph(target: f32) {
    SPEED_TARGET_MPH_BITS.store(target.to_bits(), Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// 制御ループ専用の書き込み権限
// ---------------------------------------------------------------------------

static AUTHORITY_TAKEN: AtomicBool = AtomicBool::new(false);

/// アーム状態と安全エラーコードの唯一の書き込みハンドル
///
/// 起動時に一度だけ取得でき、制御ループタスクに移動される。
/// 他のコンポーネントは読み取り専用ヘルパーのみ使用できる。
pub struct ControlAuthority {
    _private: (),
}

impl ControlAuthority {
    /// 権限ハンドルを取得（2回目以降はNone）
    pub fn take() -> Option<Self> {
        if AUTHORITY_TAKEN.swap(true, Ordering::Relaxed) {
            None
        } else {
            Some(Self { _private: () })
        }
    }

    /// モーターをアームする
    pub fn arm(&mut self) {
        ARMED.store(true, Ordering::Relaxed);
    }

    /// モーターをディスアームする
    pub fn disarm(&mut self) {
        ARMED.store(false, Ordering::Relaxed);
    }

    /// 安全エラーコードを設定する
    pub fn set_fault(&mut self, code: SafetyCode) {
        SAFETY_CODE.store(code as u8, Ordering::Relaxed);
    }

    /// 安全エラーコードをクリアする（起動評価パスのみが到達する）
    pub fn clear_fault(&mut self) {
        SAFETY_CODE.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ring_shifts_newest_first() {
        record_commutation_timestamp(100);
        record_commutation_timestamp(200);
        record_commutation_timestamp(300);
        with_commutation_timestamps(|ring| {
            assert_eq!(*ring, [300, 200, 100]);
        });
    }
}
