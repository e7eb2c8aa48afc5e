//! 方向入力タスク
//!
//! 2本の方向指令入力ピンを監視し、エッジごとに2bitコードを
//! 方向セッターへ反映します（00/11=ニュートラル、01=前進、10=後進）。

use embassy_futures::select::select;
use embassy_stm32::exti::ExtiInput;

use crate::command;
use crate::fmt::*;

/// 方向入力タスク - DIR0/DIR1ピンのエッジ監視
#[embassy_executor::task]
pub async fn direction_input_task(mut dir0: ExtiInput<'static>, mut dir1: ExtiInput<'static>) {
    // 起動時の入力状態をそのまま反映
    let mut code = ((dir0.is_high() as u8) << 1) | (dir1.is_high() as u8);
    command::set_direction(code);
    info!("Direction input task started (initial code {:02b})", code);

    loop {
        select(dir0.wait_for_any_edge(), dir1.wait_for_any_edge()).await;

        let new_code = ((dir0.is_high() as u8) << 1) | (dir1.is_high() as u8);
        if new_code != code {
            code = new_code;
            command::set_direction(code);
            info!("Direction input changed: {:02b}", code);
        }
    }
}
