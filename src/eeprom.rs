//! フラッシュメモリベースのEEPROM実装
//!
//! STM32G431VBの最終フラッシュページ（ページ63）を較正データの保存に使用

use embassy_stm32::{
    crc::Crc,
    flash::{Blocking, Flash},
};

use crate::config::storage::StoredConfig;
use crate::fmt::*;

/// STM32G431VBのフラッシュページサイズ（2KB）
pub const FLASH_PAGE_SIZE: usize = 2048;

/// 最終ページの開始アドレス（128KB - 2KB = 0x0801F800）
pub const LAST_PAGE_START: u32 = 0x0801F800;

/// EEPROM操作のエラー型
#[derive(Debug, Clone, Copy)]
pub enum EepromError {
    /// フラッシュ書き込みエラー
    FlashWriteError,

    /// フラッシュ消去エラー
    FlashEraseError,

    /// CRC検証エラー
    CrcMismatch,

    /// マジックナンバーまたはバージョン不一致
    InvalidHeader,

    /// データサイズエラー
    InvalidSize,
}

/// フラッシュメモリから設定を読み込む
pub fn read_config(crc: &mut Crc) -> Result<StoredConfig, EepromError> {
    info!("Reading config from flash at 0x{:08X}", LAST_PAGE_START);

    let mut buffer = [0u8; core::mem::size_of::<StoredConfig>()];

    let src_addr = LAST_PAGE_START as usize;
    for (i, byte) in buffer.iter_mut().enumerate() {
        let addr = (src_addr + i) as *const u8;
        *byte = unsafe { core::ptr::read_volatile(addr) };
    }

    let config =
        unsafe { StoredConfig::from_bytes(&buffer) }.ok_or(EepromError::InvalidSize)?;

    if !config.validate_header() {
        error!(
            "Config header invalid: magic=0x{:08X}, version={}",
            config.magic, config.version
        );
        return Err(EepromError::InvalidHeader);
    }

    if !config.verify_crc(crc) {
        error!("Config CRC mismatch: stored=0x{:08X}", config.crc32);
        return Err(EepromError::CrcMismatch);
    }

    info!("Config loaded: version={}", config.version);
    Ok(config)
}

/// フラッシュメモリに設定を書き込む
pub fn write_config(
    flash: &mut Flash<'_, Blocking>,
    crc: &mut Crc,
    config: &mut StoredConfig,
) -> Result<(), EepromError> {
    info!("Writing config to flash at 0x{:08X}", LAST_PAGE_START);

    config.crc32 = config.calculate_crc(crc);

    flash
        .blocking_erase(LAST_PAGE_START, LAST_PAGE_START + FLASH_PAGE_SIZE as u32)
        .map_err(|_| {
            error!("Flash erase failed");
            EepromError::FlashEraseError
        })?;

    let data = config.as_bytes_mut();
    flash.blocking_write(LAST_PAGE_START, data).map_err(|_| {
        error!("Flash write failed");
        EepromError::FlashWriteError
    })?;

    info!("Config saved (CRC32=0x{:08X})", config.crc32);
    Ok(())
}

/// 設定を読み込み、失敗時はデフォルト設定で初期化
pub fn load_or_initialize_config(
    flash: &mut Flash<'_, Blocking>,
    crc: &mut Crc,
) -> StoredConfig {
    match read_config(crc) {
        Ok(config) => config,
        Err(_) => {
            warn!("No valid config in flash, initializing defaults");
            let mut config = StoredConfig::default();
            if write_config(flash, crc, &mut config).is_err() {
                error!("Failed to persist default config, continuing with in-memory defaults");
            }
            config
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_addresses() {
        // 128KB = 0x20000、最終ページ = 0x08000000 + 0x20000 - 0x800
        assert_eq!(LAST_PAGE_START, 0x0801F800);
    }

    #[test]
    fn test_page_holds_config() {
        assert!(core::mem::size_of::<StoredConfig>() <= FLASH_PAGE_SIZE);
    }
}
