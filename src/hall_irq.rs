//! TIM4ベースのHallセンサー転流割り込み
//!
//! STM32のハードウェアHall Sensor Interface Mode（XORモード）を使用して、
//! 3つのHallセンサー入力のいずれかのエッジでCC1キャプチャ割り込みを
//! 発生させ、転流処理（カウンタ更新・期待値照合・再整列・出力適用）を
//! 割り込みコンテキストで完結させます。
//!
//! ## ハードウェア構成
//! - TIM4_CH1 (PB6): Hall HA
//! - TIM4_CH2 (PB7): Hall HB
//! - TIM4_CH3 (PB8): Hall HC
//!
//! ## 動作原理（参照: HAL_TIMEx_HallSensor_Init）
//! 1. 3つのHall入力がXORされてTI1に接続される（CR2.TI1S=1）
//! 2. TI1のエッジ検出がトリガーとして選択される（SMCR.TS=TI1F_ED）
//! 3. いずれかのHallセンサーのエッジでTIM4_CCR1へキャプチャが発生し、
//!    CC1割り込みで転流処理を実行する

use core::sync::atomic::Ordering;

use embassy_stm32::pac;
use embassy_time::Instant;

use crate::commutation;
use crate::state::{self, COMMUTATION_COUNT, EXPECTED_HALL, HALL_STATE, SKIPPED_COMMUTATIONS};

/// TIM4 Hall Sensor Interface の初期化
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_hall_interface() {
    let rcc = pac::RCC;
    let tim4 = pac::TIM4;
    let gpiob = pac::GPIOB;

    // 1. クロック有効化
    rcc.ahb2enr().modify(|w| w.set_gpioben(true)); // GPIOB
    rcc.apb1enr1().modify(|w| w.set_tim4en(true)); // TIM4

    // 2. GPIO設定（PB6/PB7/PB8をAlternate Function AF2に設定）
    // ハードウェアに外部プルアップ抵抗があるため内部プルアップは不要

    // PB6: TIM4_CH1 (Hall HA)
    gpiob
        .moder()
        .modify(|w| w.set_moder(6, pac::gpio::vals::Moder::ALTERNATE));
    gpiob.afr(0).modify(|w| w.set_afr(6, 2)); // AF2 (AFR[0] = AFRL)
    gpiob
        .pupdr()
        .modify(|w| w.set_pupdr(6, pac::gpio::vals::Pupdr::FLOATING));

    // PB7: TIM4_CH2 (Hall HB)
    gpiob
        .moder()
        .modify(|w| w.set_moder(7, pac::gpio::vals::Moder::ALTERNATE));
    gpiob.afr(0).modify(|w| w.set_afr(7, 2)); // AF2 (AFR[0] = AFRL)
    gpiob
        .pupdr()
        .modify(|w| w.set_pupdr(7, pac::gpio::vals::Pupdr::FLOATING));

    // PB8: TIM4_CH3 (Hall HC)
    gpiob
        .moder()
        .modify(|w| w.set_moder(8, pac::gpio::vals::Moder::ALTERNATE));
    gpiob.afr(1).modify(|w| w.set_afr(0, 2)); // AF2 (AFR[1] = AFRH、PB8はAFRH[0])
    gpiob
        .pupdr()
        .modify(|w| w.set_pupdr(8, pac::gpio::vals::Pupdr::FLOATING));

    // 3. TIM4設定
    tim4.cr1().modify(|w| w.set_cen(false));
    tim4.psc().write_value(0);
    tim4.arr().write_value(pac::timer::regs::ArrCore(0xFFFF));

    // 4. Hall Sensor Interface Mode設定
    // CR2.TI1S = 1: CH1/CH2/CH3をXOR -> TI1 (Hall Sensor Mode)
    tim4.cr2().modify(|w| {
        w.set_ti1s(pac::timer::vals::Ti1s::XOR);
    });

    // SMCR設定: TI1のエッジ検出をトリガーに、トリガーでカウンタリセット
    tim4.smcr().modify(|w| {
        w.set_ts(pac::timer::vals::Ts::TI1F_ED);
        w.set_sms(pac::timer::vals::Sms::RESET_MODE);
    });

    // 5. Input Capture設定（IC1をTRC=TI1にマップ、8サイクルフィルタ）
    tim4.ccmr_input(0).modify(|w| {
        w.set_ccs(0, pac::timer::vals::CcmrInputCcs::TRC);
        w.set_icf(0, pac::timer::vals::FilterValue::FCK_INT_N8);
    });

    // 6. CCER: CC1E=1（キャプチャ有効）
    // TI1F_EDトリガーにより両エッジが検出される
    tim4.ccer().modify(|w| {
        w.set_cce(0, true);
        w.set_ccp(0, false);
    });

    // 7. CC1割り込みのみ有効化（転流はすべてキャプチャ駆動）
    tim4.dier().modify(|w| {
        w.set_ccie(0, true);
    });

    // 8. 割り込み有効化（NVIC、embassyタスクより高優先度）
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM4);
        let mut cp = cortex_m::Peripherals::steal();
        cp.NVIC.set_priority(pac::Interrupt::TIM4, 0x20);
    }

    // 9. カウンタをリセットしてタイマー開始
    tim4.cnt().write_value(pac::timer::regs::CntCore(0));
    tim4.sr().write(|w| w.0 = 0);
    tim4.cr1().modify(|w| w.set_cen(true));
}

/// Hallセンサー入力ピンを直接読み取り、3bitコードを返す
/// （HC上位ビット、HA下位ビット）
#[inline(always)]
pub fn read_hall_inputs() -> u8 {
    let idr = pac::GPIOB.idr().read();
    let ha = idr.idr(6) as u8; // PB6
    let hb = idr.idr(7) as u8; // PB7
    let hc = idr.idr(8) as u8; // PB8
    (hc << 2) | (hb << 1) | ha
}

/// 起動時の初期Hall状態取り込み（割り込み有効化前にmainから呼ぶ）
pub fn capture_initial_hall_state() {
    HALL_STATE.store(read_hall_inputs(), Ordering::Relaxed);
}

/// TIM4割り込みハンドラー（Hallエッジ = 転流イベント）
///
/// # Safety
/// 割り込みコンテキストで実行されるため、処理は最小限にする
/// （カウンタ更新・テーブル参照・レジスタ書き込みのみ）
#[inline(always)]
pub unsafe fn tim4_irq_handler() {
    let tim4 = pac::TIM4;

    let sr = tim4.sr().read();
    if sr.ccif(0) {
        tim4.sr().modify(|w| w.set_ccif(0, false)); // フラグクリア

        // 1. 転流カウンタ更新（速度推定用）
        COMMUTATION_COUNT.fetch_add(1, Ordering::Relaxed);

        // 2. 直近3回の転流時刻を記録
        state::record_commutation_timestamp(Instant::now().as_micros());

        // 3. Hall状態再読み取り
        let hall_state = read_hall_inputs();
        HALL_STATE.store(hall_state, Ordering::Relaxed);

        // 4. 期待値と不一致なら転流スキップとして計上
        if hall_state != EXPECTED_HALL.load(Ordering::Relaxed) {
            SKIPPED_COMMUTATIONS.fetch_add(1, Ordering::Relaxed);
        }

        // 5. 出力をHall入力に再整列（出力段への適用も行う）
        commutation::align_output_to_hall();
    }
}

/// TIM4割り込みのRust側エントリーポイント
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM4() {
    tim4_irq_handler();
}
