//! ゲートドライバ出力段
//!
//! 3本のローサイドレッグ（PE8/PE10/PE12、デジタル出力）と3本の
//! ハイサイドレッグ（PE9/PE11/PE13 = TIM1 CH1/CH2/CH3、PWM）を駆動します。
//! TIM1の初期化はmain.rsでembassyのPWMドライバが行い、ここでは
//! 割り込みからも呼べるようにPACレジスタへ直接書き込みます。
//!
//! `apply_step()`が出力段の唯一の安全ゲートです。アーム状態かつ
//! エラーコード0のときだけ通電し、それ以外は渡されたパターンに
//! かかわらず全レッグを遮断します。

use core::sync::atomic::Ordering;

use embassy_stm32::pac;

use crate::commutation::{LegPattern, Step};
use crate::state::{self, DUTY_FINAL, SPEED_CONTROL_ENABLED, THROTTLE};

/// ローサイドレッグのピン番号（GPIOE）
const PIN_A_LOW: usize = 8;
const PIN_B_LOW: usize = 10;
const PIN_C_LOW: usize = 12;

/// ローサイド出力ピンの初期化（PE8/PE10/PE12を出力・Lowに設定）
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_low_side() {
    let rcc = pac::RCC;
    let gpioe = pac::GPIOE;

    rcc.ahb2enr().modify(|w| w.set_gpioeen(true));

    for pin in [PIN_A_LOW, PIN_B_LOW, PIN_C_LOW] {
        gpioe.bsrr().write(|w| w.set_br(pin, true));
        gpioe
            .moder()
            .modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::OUTPUT));
        gpioe
            .ospeedr()
            .modify(|w| w.set_ospeedr(pin, pac::gpio::vals::Ospeedr::VERY_HIGH_SPEED));
    }
}

/// 指定ステップを出力段へ適用する
///
/// アーム済みかつエラーコード0のときのみ通電。デューティは速度制御
/// 有効時は最終デューティ、無効時はスロットル指令を使用する。
/// 割り込みコンテキストから呼ばれるため、テーブル参照とレジスタ
/// 書き込み以外の処理は行わない。
#[inline(always)]
pub fn apply_step(step: Step) {
    if state::is_armed() && state::safety_code_raw() == 0 {
        let duty = if SPEED_CONTROL_ENABLED.load(Ordering::Relaxed) {
            DUTY_FINAL.load(Ordering::Relaxed)
        } else {
            THROTTLE.load(Ordering::Relaxed)
        };
        apply_pattern(step.pattern(), duty);
    } else {
        apply_pattern(&LegPattern::OFF, 0);
    }
}

/// 全レッグ遮断（安全経路・ディスアーム経路から明示的に呼ばれる）
pub fn force_neutral() {
    apply_pattern(&LegPattern::OFF, 0);
}

/// パターンをレジスタへ書き込む（12bitデューティ → TIM1 ARRスケール）
fn apply_pattern(pattern: &LegPattern, duty: u16) {
    let tim1 = pac::TIM1;
    let gpioe = pac::GPIOE;

    // 12bitデューティコードをタイマー分解能に換算
    let arr = tim1.arr().read().arr() as u32;
    let compare = (((duty as u32) * (arr + 1)) >> 12) as u16;

    // ハイサイド: 対応ビットが立っているチャネルのみPWM、他は0
    tim1.ccr(0)
        .modify(|w| w.set_ccr(if pattern.a_high { compare } else { 0 }));
    tim1.ccr(1)
        .modify(|w| w.set_ccr(if pattern.b_high { compare } else { 0 }));
    tim1.ccr(2)
        .modify(|w| w.set_ccr(if pattern.c_high { compare } else { 0 }));

    // ローサイド: デジタルレベルをBSRRで一括設定
    gpioe.bsrr().write(|w| {
        w.set_bs(PIN_A_LOW, pattern.a_low);
        w.set_br(PIN_A_LOW, !pattern.a_low);
        w.set_bs(PIN_B_LOW, pattern.b_low);
        w.set_br(PIN_B_LOW, !pattern.b_low);
        w.set_bs(PIN_C_LOW, pattern.c_low);
        w.set_br(PIN_C_LOW, !pattern.c_low);
    });
}
