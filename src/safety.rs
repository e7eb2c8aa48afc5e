// Safety interlock evaluation for the drivetrain controller
// Two evaluation modes (disarmed startup checks / armed operational checks),
// both strict first-match priority. The control loop task is the only caller.

use crate::config::StoredConfig;

/// Reasons for a safety shutdown. The numeric value is the code reported
/// on the telemetry surface (0 means no fault).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCode {
    /// Invalid hall code observed (digital 000 or 111)
    HallWire = 1,
    /// Too many expected/actual hall mismatches
    HallChange = 2,
    /// Reserved: analog front end stopped delivering samples
    SensingTimeout = 3,
    /// Battery below the undervoltage threshold
    BatUndervolt = 4,
    /// Battery above the overvoltage threshold
    BatOvervolt = 5,
    /// A single phase current above the per-phase threshold
    PhaseCurrent = 6,
    /// Sum of phase currents above the total threshold
    BatCurrent = 7,
    /// A phase temperature above the overtemperature threshold
    Overheat = 8,
    /// Throttle was nonzero while waiting to arm
    NonzeroStartThrottle = 9,
}

impl SafetyCode {
    /// Decode a raw code byte (0 or unknown values map to None).
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::HallWire),
            2 => Some(Self::HallChange),
            3 => Some(Self::SensingTimeout),
            4 => Some(Self::BatUndervolt),
            5 => Some(Self::BatOvervolt),
            6 => Some(Self::PhaseCurrent),
            7 => Some(Self::BatCurrent),
            8 => Some(Self::Overheat),
            9 => Some(Self::NonzeroStartThrottle),
            _ => None,
        }
    }
}

/// Thresholds used by both evaluation modes, loaded from the stored config.
#[derive(Debug, Clone, Copy)]
pub struct SafetyLimits {
    pub undervoltage_v: f32,
    pub overvoltage_v: f32,
    pub phase_overcurrent_a: f32,
    pub total_overcurrent_a: f32,
    pub overtemp_f: f32,
    pub skipped_commutation_limit: u32,
}

impl SafetyLimits {
    pub fn from_config(config: &StoredConfig) -> Self {
        Self {
            undervoltage_v: config.undervoltage_v,
            overvoltage_v: config.overvoltage_v,
            phase_overcurrent_a: config.phase_overcurrent_a,
            total_overcurrent_a: config.total_overcurrent_a,
            overtemp_f: config.overtemp_f,
            skipped_commutation_limit: config.skipped_commutation_limit,
        }
    }
}

/// One control period's view of everything the interlocks look at.
#[derive(Debug, Clone, Copy)]
pub struct SafetyInputs {
    /// Commanded throttle code (0-4095)
    pub throttle: u16,
    /// Latest 3-bit hall code
    pub hall_state: u8,
    /// Battery voltage [V]
    pub battery_volts: f32,
    /// Phase currents A/B/C [A]
    pub currents: [f32; 3],
    /// Phase temperatures A/B/C [°F]
    pub temps_f: [f32; 3],
    /// Accumulated expected/actual hall mismatches
    pub skipped_commutations: u32,
}

/// Hall codes 0 and 7 cannot occur with three working 120-degree sensors.
#[inline(always)]
pub fn hall_state_is_invalid(hall_state: u8) -> bool {
    hall_state == 0 || hall_state == 7
}

/// Startup (disarmed) interlock evaluation, first match wins.
pub fn startup_fault(inputs: &SafetyInputs, limits: &SafetyLimits) -> Option<SafetyCode> {
    if inputs.throttle != 0 {
        Some(SafetyCode::NonzeroStartThrottle)
    } else if hall_state_is_invalid(inputs.hall_state) {
        Some(SafetyCode::HallWire)
    } else if inputs.battery_volts < limits.undervoltage_v {
        Some(SafetyCode::BatUndervolt)
    } else if inputs.battery_volts > limits.overvoltage_v {
        Some(SafetyCode::BatOvervolt)
    } else {
        None
    }
}

/// Operational (armed) interlock evaluation, first match wins.
pub fn operational_fault(inputs: &SafetyInputs, limits: &SafetyLimits) -> Option<SafetyCode> {
    let [cur_a, cur_b, cur_c] = inputs.currents;
    let [temp_a, temp_b, temp_c] = inputs.temps_f;

    if hall_state_is_invalid(inputs.hall_state) {
        Some(SafetyCode::HallWire)
    } else if inputs.skipped_commutations > limits.skipped_commutation_limit {
        Some(SafetyCode::HallChange)
    } else if inputs.battery_volts < limits.undervoltage_v {
        Some(SafetyCode::BatUndervolt)
    } else if inputs.battery_volts > limits.overvoltage_v {
        Some(SafetyCode::BatOvervolt)
    } else if (cur_a + cur_b + cur_c) > limits.total_overcurrent_a {
        Some(SafetyCode::BatCurrent)
    } else if cur_a > limits.phase_overcurrent_a
        || cur_b > limits.phase_overcurrent_a
        || cur_c > limits.phase_overcurrent_a
    {
        Some(SafetyCode::PhaseCurrent)
    } else if temp_a > limits.overtemp_f || temp_b > limits.overtemp_f || temp_c > limits.overtemp_f
    {
        Some(SafetyCode::Overheat)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SafetyLimits {
        SafetyLimits {
            undervoltage_v: 38.0,
            overvoltage_v: 60.0,
            phase_overcurrent_a: 35.0,
            total_overcurrent_a: 70.0,
            overtemp_f: 212.0,
            skipped_commutation_limit: 200,
        }
    }

    fn healthy_inputs() -> SafetyInputs {
        SafetyInputs {
            throttle: 0,
            hall_state: 3,
            battery_volts: 48.0,
            currents: [0.0, 0.0, 0.0],
            temps_f: [70.0, 70.0, 70.0],
            skipped_commutations: 0,
        }
    }

    #[test]
    fn test_healthy_system_has_no_fault() {
        let inputs = healthy_inputs();
        assert_eq!(startup_fault(&inputs, &limits()), None);
        assert_eq!(operational_fault(&inputs, &limits()), None);
    }

    #[test]
    fn test_startup_rejects_nonzero_throttle_first() {
        let mut inputs = healthy_inputs();
        inputs.throttle = 100;
        inputs.hall_state = 0; // also a hall fault, but throttle has priority
        assert_eq!(
            startup_fault(&inputs, &limits()),
            Some(SafetyCode::NonzeroStartThrottle)
        );
    }

    #[test]
    fn test_invalid_hall_codes() {
        for hall in [0u8, 7u8] {
            let mut inputs = healthy_inputs();
            inputs.hall_state = hall;
            assert_eq!(startup_fault(&inputs, &limits()), Some(SafetyCode::HallWire));
            assert_eq!(
                operational_fault(&inputs, &limits()),
                Some(SafetyCode::HallWire)
            );
        }
        for hall in 1u8..=6 {
            assert!(!hall_state_is_invalid(hall));
        }
    }

    #[test]
    fn test_undervolt_beats_phase_overcurrent() {
        // Voltage checks run before current checks
        let mut inputs = healthy_inputs();
        inputs.battery_volts = 30.0;
        inputs.currents = [40.0, 0.0, 0.0];
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::BatUndervolt)
        );
    }

    #[test]
    fn test_total_overcurrent_beats_phase_overcurrent() {
        let mut inputs = healthy_inputs();
        inputs.currents = [36.0, 20.0, 20.0]; // phase A over AND total over
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::BatCurrent)
        );
    }

    #[test]
    fn test_single_phase_overcurrent() {
        let mut inputs = healthy_inputs();
        inputs.currents = [0.0, 36.0, 0.0];
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::PhaseCurrent)
        );
    }

    #[test]
    fn test_skipped_commutation_threshold_is_exclusive() {
        let mut inputs = healthy_inputs();
        inputs.skipped_commutations = 200;
        assert_eq!(operational_fault(&inputs, &limits()), None);
        inputs.skipped_commutations = 201;
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::HallChange)
        );
    }

    #[test]
    fn test_overheat_any_phase() {
        let mut inputs = healthy_inputs();
        inputs.temps_f = [70.0, 70.0, 213.0];
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::Overheat)
        );
    }

    #[test]
    fn test_overvoltage() {
        let mut inputs = healthy_inputs();
        inputs.battery_volts = 61.0;
        assert_eq!(
            startup_fault(&inputs, &limits()),
            Some(SafetyCode::BatOvervolt)
        );
        assert_eq!(
            operational_fault(&inputs, &limits()),
            Some(SafetyCode::BatOvervolt)
        );
    }

    #[test]
    fn test_code_values_roundtrip() {
        for raw in 1u8..=9 {
            let code = SafetyCode::from_raw(raw).unwrap();
            assert_eq!(code as u8, raw);
        }
        assert_eq!(SafetyCode::from_raw(0), None);
        assert_eq!(SafetyCode::from_raw(10), None);
    }
}
