//! 制御ループタスク
//!
//! 100Hz周期で安全インターロック評価・アーミング管理・走行量積算・
//! 速度推定・速度制御補正を実行します。アーム状態とエラーコードの
//! 唯一の書き込み元であり、割り込み経路以外で`align_output_to_hall()`
//! を呼ぶのもこのタスクだけです。

use core::sync::atomic::Ordering;

use embassy_time::{Duration, Ticker};

use crate::commutation::{self, Direction};
use crate::config::params::{CONTROL_PERIOD_MS, CONTROL_PERIOD_S};
use crate::config::StoredConfig;
use crate::fmt::*;
use crate::power_stage;
use crate::safety::{self, SafetyCode, SafetyInputs, SafetyLimits};
use crate::speed;
use crate::state::{
    self, ControlAuthority, SensorSnapshot, COMMUTATION_COUNT, DIRECTION, DUTY_FINAL, DUTY_RAW,
    HALL_STATE, RUN_STATS, SENSORS, SKIPPED_COMMUTATIONS, SPEED_CONTROL_ENABLED, THROTTLE,
};

/// 制御ループタスク（10ms周期）
#[embassy_executor::task]
pub async fn control_task(mut authority: ControlAuthority, config: StoredConfig) {
    info!("Control loop task started ({}ms period)", CONTROL_PERIOD_MS);

    let limits = SafetyLimits::from_config(&config);
    let speed_kp = config.speed_kp;

    let mut ticker = Ticker::every(Duration::from_millis(CONTROL_PERIOD_MS));

    // エラーログを遷移時のみ出すための前回コード
    let mut last_fault: u8 = 0;

    loop {
        ticker.next().await;

        // 今周期の評価入力を収集
        let sensors = *SENSORS.lock().await;
        let inputs = SafetyInputs {
            throttle: THROTTLE.load(Ordering::Relaxed),
            hall_state: HALL_STATE.load(Ordering::Relaxed),
            battery_volts: sensors.battery_volts,
            currents: [sensors.current_a, sensors.current_b, sensors.current_c],
            temps_f: [sensors.temp_a_f, sensors.temp_b_f, sensors.temp_c_f],
            skipped_commutations: SKIPPED_COMMUTATIONS.load(Ordering::Relaxed),
        };
        let direction = Direction::from_code(DIRECTION.load(Ordering::Relaxed));

        if !state::is_armed() {
            // ---- 起動（ディスアーム）評価 ----
            match safety::startup_fault(&inputs, &limits) {
                Some(code) => {
                    authority.set_fault(code);
                    log_fault_transition(&mut last_fault, code, &inputs);
                }
                None => {
                    // チェック全通過: エラーをクリアし、方向指令が有効なら
                    // アームして出力をHall状態へ整列する
                    authority.clear_fault();
                    last_fault = 0;

                    if direction.is_drive() {
                        authority.arm();
                        commutation::align_output_to_hall();
                        info!("*****MOTOR ARMED*****");
                    } else {
                        power_stage::force_neutral();
                    }
                }
            }
        } else {
            // ---- 運転（アーム済み）評価 ----
            if let Some(code) = safety::operational_fault(&inputs, &limits) {
                authority.set_fault(code);
                let newly_faulted = log_fault_transition(&mut last_fault, code, &inputs);
                if newly_faulted {
                    info!("*****MOTOR DISARMED (SAFETY)*****");
                }
            }

            if state::safety_code_raw() != 0 {
                // ラッチ済みエラー: 条件が消えても運転評価中は解除しない
                // （解除は起動評価パスのみ）。毎周期ニュートラルを強制する。
                power_stage::force_neutral();
            } else if !direction.is_drive() {
                // 通常のディスエンゲージ: 遮断してから再アームに備えて整列
                power_stage::force_neutral();
                authority.disarm();
                commutation::align_output_to_hall();
                info!("*****MOTOR DISARMED (NORMAL)*****");
            } else {
                // アーム済み・エラーなし・方向有効: 周期更新
                periodic_update(&sensors, speed_kp).await;
            }
        }
    }
}

/// アーム済み・エラーなしの周期更新
///
/// 走行時間・瞬時電力・累積エネルギーの積算、転流カウンタの破壊的
/// 回収による速度推定、有効時の比例速度制御補正を行う。
async fn periodic_update(sensors: &SensorSnapshot, speed_kp: f32) {
    let inst_power_w =
        0.5 * (sensors.current_a + sensors.current_b + sensors.current_c) * sensors.battery_volts;

    // 転流カウンタは回収と同時にゼロへ戻す（毎周期リセット）
    let commutations = COMMUTATION_COUNT.swap(0, Ordering::Relaxed);
    let speed_mph = state::with_commutation_timestamps(|ring| {
        speed::estimate_speed_mph(commutations, ring, CONTROL_PERIOD_S)
    });

    {
        let mut stats = RUN_STATS.lock().await;
        stats.runtime_ms += CONTROL_PERIOD_MS as u32;
        stats.inst_power_w = inst_power_w;
        stats.total_energy_j += inst_power_w * CONTROL_PERIOD_S;
        stats.speed_mph = speed_mph;
    }

    if SPEED_CONTROL_ENABLED.load(Ordering::Relaxed) {
        let duty = speed::corrected_duty(
            DUTY_RAW.load(Ordering::Relaxed),
            state::speed_target_mph(),
            speed_mph,
            speed_kp,
        );
        DUTY_FINAL.store(duty, Ordering::Relaxed);
    }
}

/// エラーコードの遷移時のみ詳細ログを出す。新規エラーならtrueを返す。
fn log_fault_transition(last_fault: &mut u8, code: SafetyCode, inputs: &SafetyInputs) -> bool {
    let raw = code as u8;
    if *last_fault == raw {
        return false;
    }
    *last_fault = raw;

    match code {
        SafetyCode::NonzeroStartThrottle => {
            error!("ERROR: NONZERO STARTING THROTTLE ({})", inputs.throttle);
        }
        SafetyCode::HallWire => {
            error!(
                "ERROR: HALL WIRING ISSUE (digital '000' or '111') ({})",
                inputs.hall_state
            );
        }
        SafetyCode::HallChange => {
            error!(
                "ERROR: TOO MANY HALL SEQUENCE FAILURES ({}). CHECK WIRING AND RESTART",
                inputs.skipped_commutations
            );
        }
        SafetyCode::SensingTimeout => {
            error!("ERROR: SENSING TIMEOUT");
        }
        SafetyCode::BatUndervolt => {
            error!("ERROR: BATTERY UNDERVOLTAGE ({}V)", inputs.battery_volts);
        }
        SafetyCode::BatOvervolt => {
            error!("ERROR: BATTERY OVERVOLTAGE ({}V)", inputs.battery_volts);
        }
        SafetyCode::BatCurrent => {
            error!(
                "ERROR: BATTERY OVERCURRENT ({}A total). PHASE CURRENTS: {}A {}A {}A",
                inputs.currents[0] + inputs.currents[1] + inputs.currents[2],
                inputs.currents[0],
                inputs.currents[1],
                inputs.currents[2]
            );
        }
        SafetyCode::PhaseCurrent => {
            error!(
                "ERROR: PHASE OVERCURRENT ({}A {}A {}A)",
                inputs.currents[0], inputs.currents[1], inputs.currents[2]
            );
        }
        SafetyCode::Overheat => {
            error!(
                "ERROR: MOSFET OVERHEAT ({}F {}F {}F)",
                inputs.temps_f[0], inputs.temps_f[1], inputs.temps_f[2]
            );
        }
    }
    true
}
