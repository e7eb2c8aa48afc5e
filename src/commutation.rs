// Six-step hall commutation: the output/hall tables and the cursor logic
// that keeps them aligned with the rotor. Called from the hall-edge
// interrupt on every transition and from the control loop on (re-)arming.

use core::sync::atomic::Ordering;

use crate::power_stage;
use crate::state::{DIRECTION, EXPECTED_HALL, HALL_STATE, INPUT_INDEX, OUTPUT_INDEX};

/// Drive direction decoded from the 2-bit command code.
/// Both 00 and 11 mean neutral, mirroring the two-wire direction input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Neutral,
    Forward,
    Reverse,
}

impl Direction {
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0b01 => Self::Forward,
            0b10 => Self::Reverse,
            _ => Self::Neutral,
        }
    }

    pub fn is_drive(self) -> bool {
        !matches!(self, Self::Neutral)
    }
}

/// One power-stage step: plain levels for the three low-side legs,
/// PWM gates for the three high-side legs. A leg pair is never driven
/// with both entries set in any table row below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegPattern {
    pub a_low: bool,
    pub a_high: bool,
    pub b_low: bool,
    pub b_high: bool,
    pub c_low: bool,
    pub c_high: bool,
}

impl LegPattern {
    pub const OFF: Self = Self {
        a_low: false,
        a_high: false,
        b_low: false,
        b_high: false,
        c_low: false,
        c_high: false,
    };
}

/// Commutation step. The six drive steps share indices with
/// `HALL_INPUT_TABLE`; `Neutral` is the all-off terminal entry, reachable
/// only through the explicit safety/disarm paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Drive(u8),
    Neutral,
}

impl Step {
    /// Build a drive step from a table index (callers keep the index in 0-5).
    pub fn from_drive_index(index: u8) -> Self {
        debug_assert!(index < 6);
        if index < 6 {
            Self::Drive(index)
        } else {
            Self::Neutral
        }
    }

    /// Pattern to put on the power stage for this step.
    pub fn pattern(self) -> &'static LegPattern {
        match self {
            Self::Drive(i) => &OUTPUT_TABLE[(i % 6) as usize],
            Self::Neutral => &OUTPUT_TABLE[6],
        }
    }
}

/// Power-stage drive patterns. Entry order matches `HALL_INPUT_TABLE`:
/// once entry i has been applied and the motor settles, the hall sensors
/// read `HALL_INPUT_TABLE[i]`. Entry 6 is the all-off safety pattern.
pub const OUTPUT_TABLE: [LegPattern; 7] = [
    // AH + BL, settles into hall 1
    LegPattern { a_low: false, a_high: true, b_low: true, b_high: false, c_low: false, c_high: false },
    // CH + BL, settles into hall 3
    LegPattern { a_low: false, a_high: false, b_low: true, b_high: false, c_low: false, c_high: true },
    // CH + AL, settles into hall 2
    LegPattern { a_low: true, a_high: false, b_low: false, b_high: false, c_low: false, c_high: true },
    // BH + AL, settles into hall 6
    LegPattern { a_low: true, a_high: false, b_low: false, b_high: true, c_low: false, c_high: false },
    // BH + CL, settles into hall 4
    LegPattern { a_low: false, a_high: false, b_low: false, b_high: true, c_low: true, c_high: false },
    // AH + CL, settles into hall 5
    LegPattern { a_low: false, a_high: true, b_low: false, b_high: false, c_low: true, c_high: false },
    // Safety entry, everything off
    LegPattern::OFF,
];

/// Hall code expected after `OUTPUT_TABLE[i]` has settled (zero-torque
/// position). Moving the motor means driving the entry one ahead of or
/// behind the current hall position.
pub const HALL_INPUT_TABLE: [u8; 6] = [1, 3, 2, 6, 4, 5];

/// Find the table index whose settled hall code matches `hall_state`.
/// Codes 0 and 7 (wiring faults) have no entry.
pub fn hall_input_index(hall_state: u8) -> Option<u8> {
    HALL_INPUT_TABLE
        .iter()
        .position(|&h| h == hall_state)
        .map(|i| i as u8)
}

/// Commutation cursor: where the rotor is, what we drive, what we expect
/// to see next. Recomputed on every hall transition and direction change,
/// never persisted across reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub input_index: u8,
    pub output_index: u8,
    pub expected_hall: u8,
}

/// Compute the cursor for the observed hall state and direction.
/// Returns None for invalid hall codes: an invalid state is the safety
/// machine's problem, not something to silently correct here.
/// With a neutral direction the output step is left where it was.
pub fn aligned_cursor(hall_state: u8, direction: Direction, current_output: u8) -> Option<Cursor> {
    let input_index = hall_input_index(hall_state)?;

    let output_index = match direction {
        Direction::Forward => (input_index + 1) % 6,
        Direction::Reverse => (input_index + 5) % 6,
        Direction::Neutral => current_output % 6,
    };

    Some(Cursor {
        input_index,
        output_index,
        expected_hall: HALL_INPUT_TABLE[output_index as usize],
    })
}

/// Re-align the shared cursor to the most recent hall state and apply the
/// resulting step to the power stage. No-op when the hall code is invalid.
///
/// Callable from the hall-edge interrupt and from the control loop; only
/// table lookups, atomics, and register writes.
pub fn align_output_to_hall() {
    let hall_state = HALL_STATE.load(Ordering::Relaxed);
    let direction = Direction::from_code(DIRECTION.load(Ordering::Relaxed));
    let current_output = OUTPUT_INDEX.load(Ordering::Relaxed);

    if let Some(cursor) = aligned_cursor(hall_state, direction, current_output) {
        INPUT_INDEX.store(cursor.input_index, Ordering::Relaxed);
        OUTPUT_INDEX.store(cursor.output_index, Ordering::Relaxed);
        EXPECTED_HALL.store(cursor.expected_hall, Ordering::Relaxed);

        power_stage::apply_step(Step::from_drive_index(cursor.output_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_share_indices() {
        // Every drive entry has a distinct, valid settled hall code
        for (i, &hall) in HALL_INPUT_TABLE.iter().enumerate() {
            assert!((1..=6).contains(&hall));
            assert_eq!(hall_input_index(hall), Some(i as u8));
        }
    }

    #[test]
    fn test_no_pattern_shorts_a_leg_pair() {
        for pattern in OUTPUT_TABLE.iter() {
            assert!(!(pattern.a_low && pattern.a_high));
            assert!(!(pattern.b_low && pattern.b_high));
            assert!(!(pattern.c_low && pattern.c_high));
        }
    }

    #[test]
    fn test_drive_patterns_energize_one_pair() {
        // Each drive step turns on exactly one high leg and one low leg
        for pattern in OUTPUT_TABLE[..6].iter() {
            let highs = pattern.a_high as u8 + pattern.b_high as u8 + pattern.c_high as u8;
            let lows = pattern.a_low as u8 + pattern.b_low as u8 + pattern.c_low as u8;
            assert_eq!(highs, 1);
            assert_eq!(lows, 1);
        }
        assert_eq!(OUTPUT_TABLE[6], LegPattern::OFF);
    }

    #[test]
    fn test_align_forward_advances_one_step() {
        for (i, &hall) in HALL_INPUT_TABLE.iter().enumerate() {
            let cursor = aligned_cursor(hall, Direction::Forward, 0).unwrap();
            assert_eq!(cursor.input_index, i as u8);
            assert_eq!(cursor.output_index, ((i + 1) % 6) as u8);
            assert_eq!(
                cursor.expected_hall,
                HALL_INPUT_TABLE[(i + 1) % 6]
            );
        }
    }

    #[test]
    fn test_align_reverse_retreats_one_step() {
        for (i, &hall) in HALL_INPUT_TABLE.iter().enumerate() {
            let cursor = aligned_cursor(hall, Direction::Reverse, 0).unwrap();
            assert_eq!(cursor.output_index, ((i + 5) % 6) as u8);
            assert_eq!(
                cursor.expected_hall,
                HALL_INPUT_TABLE[(i + 5) % 6]
            );
        }
    }

    #[test]
    fn test_align_wraparound() {
        // hall 5 sits at index 5: forward wraps 5 -> 0
        let forward = aligned_cursor(5, Direction::Forward, 0).unwrap();
        assert_eq!(forward.output_index, 0);
        // hall 1 sits at index 0: reverse wraps 0 -> 5
        let reverse = aligned_cursor(1, Direction::Reverse, 0).unwrap();
        assert_eq!(reverse.output_index, 5);
    }

    #[test]
    fn test_invalid_hall_is_a_noop() {
        assert_eq!(aligned_cursor(0, Direction::Forward, 2), None);
        assert_eq!(aligned_cursor(7, Direction::Reverse, 2), None);
    }

    #[test]
    fn test_align_is_idempotent() {
        let first = aligned_cursor(3, Direction::Forward, 0).unwrap();
        let second = aligned_cursor(3, Direction::Forward, first.output_index).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_neutral_direction_keeps_output_step() {
        let cursor = aligned_cursor(3, Direction::Neutral, 4).unwrap();
        assert_eq!(cursor.input_index, 1);
        assert_eq!(cursor.output_index, 4);
        assert_eq!(cursor.expected_hall, HALL_INPUT_TABLE[4]);
    }

    #[test]
    fn test_boot_arming_alignment() {
        // 48V battery, zero throttle, hall 3, direction forward: the
        // startup checks pass and the first aligned step is the entry
        // after hall 3's table position
        use crate::safety::{self, SafetyInputs, SafetyLimits};

        let limits = SafetyLimits {
            undervoltage_v: 38.0,
            overvoltage_v: 60.0,
            phase_overcurrent_a: 35.0,
            total_overcurrent_a: 70.0,
            overtemp_f: 212.0,
            skipped_commutation_limit: 200,
        };
        let inputs = SafetyInputs {
            throttle: 0,
            hall_state: 3,
            battery_volts: 48.0,
            currents: [0.0; 3],
            temps_f: [70.0; 3],
            skipped_commutations: 0,
        };
        assert_eq!(safety::startup_fault(&inputs, &limits), None);

        let cursor = aligned_cursor(3, Direction::Forward, 0).unwrap();
        assert_eq!(cursor.input_index, 1); // hall 3 sits at table index 1
        assert_eq!(cursor.output_index, 2);
        assert_eq!(cursor.expected_hall, 2);
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::from_code(0b00), Direction::Neutral);
        assert_eq!(Direction::from_code(0b01), Direction::Forward);
        assert_eq!(Direction::from_code(0b10), Direction::Reverse);
        assert_eq!(Direction::from_code(0b11), Direction::Neutral);
        assert!(!Direction::Neutral.is_drive());
        assert!(Direction::Forward.is_drive());
        assert!(Direction::Reverse.is_drive());
    }
}
