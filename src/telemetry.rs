// Read-only telemetry surface for the logging/display/comm collaborators.
// Semantic getters over the shared state; nothing here can mutate the core.

use core::sync::atomic::Ordering;

use embassy_time::Instant;

use crate::state::{self, RUN_STATS, SENSORS, THROTTLE};

/// One view of the drivetrain for an external consumer. Fields update
/// asynchronously in the core, so there is no cross-field consistency
/// guarantee beyond each field being its most recent value.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryReport {
    pub speed_mph: f32,
    pub inst_power_w: f32,
    pub total_energy_j: f32,
    pub avg_power_w: f32,
    pub battery_volts: f32,
    pub total_current_a: f32,
    pub current_a: f32,
    pub current_b: f32,
    pub current_c: f32,
    pub temp_a_f: f32,
    pub temp_b_f: f32,
    pub temp_c_f: f32,
    pub throttle: u16,
    pub speed_target_mph: f32,
    pub armed: bool,
    pub fault_code: u8,
    pub timestamp_us: u64,
}

/// Gather the full telemetry report.
pub async fn sample() -> TelemetryReport {
    let sensors = *SENSORS.lock().await;
    let stats = *RUN_STATS.lock().await;

    let runtime_s = (stats.runtime_ms as f32) / 1000.0;
    let avg_power_w = if stats.runtime_ms > 0 {
        stats.total_energy_j / runtime_s
    } else {
        0.0
    };

    TelemetryReport {
        speed_mph: stats.speed_mph,
        inst_power_w: stats.inst_power_w,
        total_energy_j: stats.total_energy_j,
        avg_power_w,
        battery_volts: sensors.battery_volts,
        total_current_a: sensors.current_a + sensors.current_b + sensors.current_c,
        current_a: sensors.current_a,
        current_b: sensors.current_b,
        current_c: sensors.current_c,
        temp_a_f: sensors.temp_a_f,
        temp_b_f: sensors.temp_b_f,
        temp_c_f: sensors.temp_c_f,
        throttle: THROTTLE.load(Ordering::Relaxed),
        speed_target_mph: state::speed_target_mph(),
        armed: state::is_armed(),
        fault_code: state::safety_code_raw(),
        timestamp_us: timestamp_us(),
    }
}

/// Monotonic microsecond timestamp.
#[inline(always)]
pub fn timestamp_us() -> u64 {
    Instant::now().as_micros()
}
