//! ハードウェア初期化モジュール
//!
//! クロック設定と割り込みバインドを集約します。

use embassy_stm32::{bind_interrupts, peripherals, usart, Config};

// UART（対向コントローラーリンク）の割り込みをバインド
bind_interrupts!(pub struct Irqs {
    USART2 => usart::InterruptHandler<peripherals::USART2>;
});

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R; // システムクロックをPLLに設定

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}
