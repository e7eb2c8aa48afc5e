// Write surface exposed to the command-protocol task. Every setter returns
// a distinct rejection code and never mutates protected state on rejection.
// Arming state and the fault code are read-only here; they belong to the
// control loop.

use core::sync::atomic::Ordering;

use crate::config::params::{speed_control, DUTY_MAX};
use crate::safety::SafetyCode;
use crate::state::{self, DIRECTION, SPEED_CONTROL_ENABLED, THROTTLE};

/// Why a setter refused to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// A safety shutdown is active
    SafetyShutdown,
    /// The motor is not armed
    NotArmed,
    /// The requested value is outside the accepted range
    OutOfRange,
}

/// Set the commanded throttle (0-4095 raw code).
///
/// Rejected during a safety shutdown, with one exception: the
/// `NonzeroStartThrottle` code exists precisely so the operator can bring
/// the throttle back to zero, so it never blocks this setter.
pub fn set_throttle(raw: u16) -> Result<(), SetError> {
    match state::safety_code() {
        None | Some(SafetyCode::NonzeroStartThrottle) => {}
        Some(_) => return Err(SetError::SafetyShutdown),
    }
    if raw > DUTY_MAX {
        return Err(SetError::OutOfRange);
    }

    THROTTLE.store(raw, Ordering::Relaxed);
    Ok(())
}

/// Set a speed-control target [mph] and enable the controller.
pub fn set_speed_control(target_mph: f32) -> Result<(), SetError> {
    if state::safety_code_raw() != 0 {
        return Err(SetError::SafetyShutdown);
    }
    if !state::is_armed() {
        return Err(SetError::NotArmed);
    }
    if !(speed_control::MIN_TARGET_MPH..=speed_control::MAX_TARGET_MPH).contains(&target_mph) {
        return Err(SetError::OutOfRange);
    }

    state::set_speed_target_mph(target_mph);
    SPEED_CONTROL_ENABLED.store(true, Ordering::Relaxed);
    Ok(())
}

/// Drop back to direct throttle control.
pub fn disable_speed_control() {
    SPEED_CONTROL_ENABLED.store(false, Ordering::Relaxed);
}

/// Set the 2-bit direction command (00/11 neutral, 01 forward, 10 reverse).
///
/// Accepted under all circumstances; the arming sequence is responsible for
/// refusing to energize in any unsafe situation that results.
pub fn set_direction(code: u8) {
    DIRECTION.store(code & 0b11, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlAuthority;

    // The setters share process-wide state with the arming authority, so
    // the whole contract is exercised in one sequential test.
    #[test]
    fn test_setter_contract() {
        let mut authority = ControlAuthority::take().unwrap();

        // Fresh boot: no fault, not armed
        assert_eq!(set_throttle(4096), Err(SetError::OutOfRange));
        assert_eq!(set_throttle(100), Ok(()));
        assert_eq!(THROTTLE.load(Ordering::Relaxed), 100);
        assert_eq!(set_speed_control(30.0), Err(SetError::NotArmed));
        assert!(!SPEED_CONTROL_ENABLED.load(Ordering::Relaxed));

        // Active fault blocks the throttle and leaves it unchanged
        authority.set_fault(SafetyCode::HallWire);
        assert_eq!(set_throttle(200), Err(SetError::SafetyShutdown));
        assert_eq!(THROTTLE.load(Ordering::Relaxed), 100);
        assert_eq!(set_speed_control(30.0), Err(SetError::SafetyShutdown));

        // NonzeroStartThrottle is the one code that must stay settable,
        // otherwise the operator could never bring the throttle to zero
        authority.set_fault(SafetyCode::NonzeroStartThrottle);
        assert_eq!(set_throttle(0), Ok(()));
        assert_eq!(THROTTLE.load(Ordering::Relaxed), 0);

        // Armed and fault-free: speed control accepts in-range targets only
        authority.clear_fault();
        authority.arm();
        assert_eq!(set_throttle(100), Ok(()));
        assert_eq!(set_speed_control(9.9), Err(SetError::OutOfRange));
        assert_eq!(set_speed_control(55.1), Err(SetError::OutOfRange));
        assert!(!SPEED_CONTROL_ENABLED.load(Ordering::Relaxed));
        assert_eq!(set_speed_control(30.0), Ok(()));
        assert!(SPEED_CONTROL_ENABLED.load(Ordering::Relaxed));
        assert_eq!(crate::state::speed_target_mph(), 30.0);

        disable_speed_control();
        assert!(!SPEED_CONTROL_ENABLED.load(Ordering::Relaxed));

        // The authority handle is a singleton
        assert!(ControlAuthority::take().is_none());

        authority.disarm();
        assert_eq!(set_throttle(0), Ok(()));
    }

    #[test]
    fn test_direction_code_is_masked() {
        set_direction(0b1110);
        assert_eq!(DIRECTION.load(Ordering::Relaxed), 0b10);
        set_direction(0b01);
        assert_eq!(DIRECTION.load(Ordering::Relaxed), 0b01);
        set_direction(0b00);
    }
}
