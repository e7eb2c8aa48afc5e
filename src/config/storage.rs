//! 設定パラメータの永続化構造体
//!
//! 較正値と安全しきい値をフラッシュメモリに保存するための構造体

use super::params;

/// 設定データのマジックナンバー（"DRV1"のASCII）
pub const CONFIG_MAGIC: u32 = 0x31565244;

/// 現在の設定バージョン
pub const CONFIG_VERSION: u16 = 1;

/// バッテリー電圧換算モード: 分圧抵抗モデル
pub const BATTERY_SCALE_DIVIDER: u8 = 0;

/// バッテリー電圧換算モード: 単一線形係数モデル（後期リビジョン基板）
pub const BATTERY_SCALE_LINEAR: u8 = 1;

/// 永続化される設定構造体
///
/// サイズ制約：2KB（フラッシュページサイズ）以内
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StoredConfig {
    /// マジックナンバー（データ識別用）
    pub magic: u32,

    /// 設定バージョン番号
    pub version: u16,

    /// バッテリー電圧換算モード（DIVIDER / LINEAR）
    pub battery_scale_mode: u8,

    /// パディング（アライメント調整）
    _padding: u8,

    // === バッテリー電圧較正 ===
    /// ADC基準電圧 [V]（分圧モデル用）
    pub battery_vref: f32,

    /// 分圧比（分圧モデル用）
    pub battery_divider_ratio: f32,

    /// 1カウントあたりの電圧 [V/count]（線形モデル用）
    pub battery_volts_per_count: f32,

    // === 相電流較正 ===
    /// 電流チャネルのフルスケール電圧 [V]
    pub current_vref: f32,

    /// ゲイン補正
    pub current_gain: f32,

    /// ゼロ点オフセット [V]
    pub current_offset_v: f32,

    /// 感度 [V/A]
    pub current_sense_v_per_a: f32,

    /// 負電流側の補正係数
    pub current_negative_correction: f32,

    /// 指数移動平均係数
    pub current_filter_alpha: f32,

    // === サーミスタ較正 ===
    /// 直列抵抗 [Ω]
    pub thermistor_r_ref: f32,

    /// B定数
    pub thermistor_beta: f32,

    /// 基準温度 [K]
    pub thermistor_t0_k: f32,

    /// 基準温度での抵抗 [Ω]
    pub thermistor_r0: f32,

    // === 安全しきい値 ===
    /// 低電圧しきい値 [V]
    pub undervoltage_v: f32,

    /// 過電圧しきい値 [V]
    pub overvoltage_v: f32,

    /// 相あたり過電流しきい値 [A]
    pub phase_overcurrent_a: f32,

    /// 合計過電流しきい値 [A]
    pub total_overcurrent_a: f32,

    /// 過熱しきい値 [°F]
    pub overtemp_f: f32,

    /// 転流シーケンス異常の許容回数
    pub skipped_commutation_limit: u32,

    // === 速度制御 ===
    /// 比例ゲイン
    pub speed_kp: f32,

    /// 基準デューティ（0-4095）
    pub speed_duty_raw: u16,

    /// パディング
    _padding2: u16,

    /// CRC32チェックサム（最後に配置）
    pub crc32: u32,
}

impl StoredConfig {
    /// デフォルト設定を生成（params.rsの値を使用）
    pub const fn default() -> Self {
        Self {
            magic: CONFIG_MAGIC,
            version: CONFIG_VERSION,
            battery_scale_mode: BATTERY_SCALE_DIVIDER,
            _padding: 0,
            battery_vref: params::analog::BATTERY_VREF,
            battery_divider_ratio: params::analog::BATTERY_DIVIDER_RATIO,
            // 線形モデル換算係数（分圧モデルと等価な値を初期値に）
            battery_volts_per_count: params::analog::BATTERY_VREF
                * params::analog::BATTERY_DIVIDER_RATIO
                / 4095.0,
            current_vref: params::analog::CURRENT_VREF,
            current_gain: params::analog::CURRENT_GAIN,
            current_offset_v: params::analog::CURRENT_OFFSET_V,
            current_sense_v_per_a: params::analog::CURRENT_SENSE_V_PER_A,
            current_negative_correction: params::analog::CURRENT_NEGATIVE_CORRECTION,
            current_filter_alpha: params::analog::CURRENT_FILTER_ALPHA,
            thermistor_r_ref: params::analog::THERMISTOR_R_REF,
            thermistor_beta: params::analog::THERMISTOR_BETA,
            thermistor_t0_k: params::analog::THERMISTOR_T0_K,
            thermistor_r0: params::analog::THERMISTOR_R0,
            undervoltage_v: params::safety::DEFAULT_UNDERVOLTAGE_V,
            overvoltage_v: params::safety::DEFAULT_OVERVOLTAGE_V,
            phase_overcurrent_a: params::safety::DEFAULT_PHASE_OVERCURRENT_A,
            total_overcurrent_a: params::safety::DEFAULT_TOTAL_OVERCURRENT_A,
            overtemp_f: params::safety::DEFAULT_OVERTEMP_F,
            skipped_commutation_limit: params::safety::DEFAULT_SKIPPED_COMMUTATION_LIMIT,
            speed_kp: params::speed_control::DEFAULT_KP,
            speed_duty_raw: params::speed_control::DEFAULT_DUTY_RAW,
            _padding2: 0,
            crc32: 0, // CRC計算前は0
        }
    }

    /// バイト配列として参照を取得（CRC計算用）
    ///
    /// CRC32フィールドを除くすべてのバイトを返す
    pub fn as_bytes_for_crc(&self) -> &[u8] {
        let ptr = self as *const Self as *const u8;
        let total_size = core::mem::size_of::<Self>();
        let crc_size = core::mem::size_of::<u32>();
        unsafe { core::slice::from_raw_parts(ptr, total_size - crc_size) }
    }

    /// バイト配列として可変参照を取得（シリアライズ用）
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let ptr = self as *mut Self as *mut u8;
        let size = core::mem::size_of::<Self>();
        unsafe { core::slice::from_raw_parts_mut(ptr, size) }
    }

    /// バイト配列から構造体を復元
    ///
    /// # Safety
    /// バイト配列が正しい構造体レイアウトであることを確認する必要がある
    pub unsafe fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < core::mem::size_of::<Self>() {
            return None;
        }

        let ptr = bytes.as_ptr() as *const Self;
        Some(*ptr)
    }

    /// マジックナンバーとバージョンを検証
    pub fn validate_header(&self) -> bool {
        self.magic == CONFIG_MAGIC && self.version == CONFIG_VERSION
    }

    /// CRC32チェックサムを計算
    ///
    /// # Arguments
    /// * `crc` - embassy-stm32のCRCペリフェラル
    pub fn calculate_crc(&self, crc: &mut embassy_stm32::crc::Crc) -> u32 {
        let data = self.as_bytes_for_crc();

        // 4バイト境界に合わせてデータを準備
        let mut aligned_data = [0u32; 64];
        let word_count = (data.len() + 3) / 4;

        for i in 0..word_count {
            let offset = i * 4;
            if offset + 4 <= data.len() {
                aligned_data[i] = u32::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
            } else {
                // 最後の不完全なワード
                let mut bytes = [0u8; 4];
                for j in 0..(data.len() - offset) {
                    bytes[j] = data[offset + j];
                }
                aligned_data[i] = u32::from_le_bytes(bytes);
            }
        }

        crc.reset();
        crc.feed_words(&aligned_data[..word_count])
    }

    /// CRC32チェックサムを検証
    pub fn verify_crc(&self, crc: &mut embassy_stm32::crc::Crc) -> bool {
        let calculated = self.calculate_crc(crc);
        calculated == self.crc32
    }
}

// コンパイル時サイズチェック（2KB以内であることを確認）
const _: () = {
    const SIZE: usize = core::mem::size_of::<StoredConfig>();
    const MAX_SIZE: usize = 2048; // 2KB
    assert!(SIZE <= MAX_SIZE, "StoredConfig size exceeds flash page size");
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoredConfig::default();
        assert_eq!(config.magic, CONFIG_MAGIC);
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.battery_scale_mode, BATTERY_SCALE_DIVIDER);
        assert_eq!(config.speed_kp, 100.0);
        assert_eq!(config.speed_duty_raw, 2047);
    }

    #[test]
    fn test_default_thresholds_match_observed_hardware() {
        let config = StoredConfig::default();
        assert_eq!(config.undervoltage_v, 38.0);
        assert_eq!(config.overvoltage_v, 60.0);
        assert_eq!(config.phase_overcurrent_a, 35.0);
        assert_eq!(config.total_overcurrent_a, 70.0);
        assert_eq!(config.overtemp_f, 212.0);
        assert_eq!(config.skipped_commutation_limit, 200);
    }

    #[test]
    fn test_size_constraint() {
        let size = core::mem::size_of::<StoredConfig>();
        assert!(size <= 2048, "Config size {} exceeds 2KB", size);
    }
}
