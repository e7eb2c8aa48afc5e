//! UART通信タスク
//!
//! 対向コントローラー／PCリンクからの16bitコマンドフレームを受信し、
//! CRC-4検証のうえコア状態のセッター契約へディスパッチします。
//! 要求系コマンドにはCRC付きフレームで応答します。

use embassy_stm32::mode::Async;
use embassy_stm32::usart::Uart;

use crate::command::{self, SetError};
use crate::comms::{command_ids, throttle_from_payload, target_mph_from_payload, Frame};
use crate::fmt::*;
use crate::telemetry;

/// UART通信タスク - コマンド受信とテレメトリ応答
#[embassy_executor::task]
pub async fn comms_task(mut uart: Uart<'static, Async>) {
    info!("Command link task started");

    // 速度系セッターのロックフラグ（LOCK_SPEEDコマンドで制御）
    let mut speed_locked = false;

    let mut buf = [0u8; 2];

    loop {
        if uart.read(&mut buf).await.is_err() {
            error!("UART read error");
            continue;
        }

        let frame = match Frame::decode_be_bytes(buf) {
            Ok(frame) => frame,
            Err(_) => {
                warn!("Dropped frame with bad CRC: {:02X}{:02X}", buf[0], buf[1]);
                continue;
            }
        };

        if let Some(reply) = handle_frame(frame, &mut speed_locked).await {
            let bytes = reply.to_be_bytes();
            if uart.write(&bytes).await.is_err() {
                error!("Reply transmission failed");
            }
        }
    }
}

/// 受信フレームを処理し、必要なら応答フレームを返す
async fn handle_frame(frame: Frame, speed_locked: &mut bool) -> Option<Frame> {
    match frame.id {
        command_ids::SET_THROTTLE => {
            if !*speed_locked {
                match command::set_throttle(throttle_from_payload(frame.payload)) {
                    Ok(()) => info!("Throttle set to {}", throttle_from_payload(frame.payload)),
                    Err(e) => log_rejection("throttle", e),
                }
            }
            None
        }
        command_ids::SET_SPEED_MPH => {
            if !*speed_locked {
                let target = target_mph_from_payload(frame.payload);
                match command::set_speed_control(target) {
                    Ok(()) => info!("Speed control target set to {}mph", target),
                    Err(e) => log_rejection("speed control", e),
                }
            }
            None
        }
        command_ids::LOCK_SPEED => {
            *speed_locked = frame.payload > 0;
            info!("Speed interface locked: {}", *speed_locked);
            None
        }
        command_ids::SET_DIRECTION => {
            if frame.payload < 4 {
                command::set_direction(frame.payload);
                info!("Direction command set to {:02b}", frame.payload & 0b11);
            }
            None
        }
        command_ids::REQ_TEMP => {
            let report = telemetry::sample().await;
            let temp_f = match frame.payload & 0x03 {
                0 => report.temp_a_f,
                1 => report.temp_b_f,
                _ => report.temp_c_f,
            };
            Some(Frame::new(command_ids::REQ_TEMP, temp_f as u8))
        }
        command_ids::REQ_SPEED => {
            let report = telemetry::sample().await;
            Some(Frame::new(command_ids::REQ_SPEED, report.speed_mph as u8))
        }
        command_ids::REQ_CURRENT => {
            let report = telemetry::sample().await;
            Some(Frame::new(
                command_ids::REQ_CURRENT,
                report.total_current_a as u8,
            ))
        }
        command_ids::REQ_BAT_VOLTS => {
            let report = telemetry::sample().await;
            Some(Frame::new(
                command_ids::REQ_BAT_VOLTS,
                report.battery_volts as u8,
            ))
        }
        _ => None,
    }
}

/// セッター拒否を理由別にログへ残す（拒否は非致命、状態は変更されない）
fn log_rejection(what: &str, error: SetError) {
    match error {
        SetError::SafetyShutdown => warn!("Rejected {} command: safety shutdown active", what),
        SetError::NotArmed => warn!("Rejected {} command: motor not armed", what),
        SetError::OutOfRange => warn!("Rejected {} command: value out of range", what),
    }
}
