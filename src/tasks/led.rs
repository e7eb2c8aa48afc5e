//! ステータスLEDタスク
//!
//! LED1=ハートビート、LED2=アーム状態、LED3=エラー表示（アクティブLow）

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::state;

#[embassy_executor::task]
pub async fn led_task(
    mut led_heartbeat: Output<'static>,
    mut led_armed: Output<'static>,
    mut led_fault: Output<'static>,
) {
    loop {
        led_heartbeat.toggle();

        if state::is_armed() {
            led_armed.set_low();
        } else {
            led_armed.set_high();
        }

        if state::safety_code_raw() != 0 {
            led_fault.set_low();
        } else {
            led_fault.set_high();
        }

        Timer::after(Duration::from_millis(250)).await;
    }
}
