//! Modem preset table: the named LoRa configurations and the derived timing
//! quantities (symbol time, preamble time) that feed into airtime
//! calculations (`crate::message`).

use serde::Deserialize;

/// Named LoRa modem presets, as accepted in the `lora_mode` node JSON field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LoRaMode {
    LongFast,
    LongSlow,
    VeryLongSlow,
    MediumSlow,
    MediumFast,
    ShortSlow,
    ShortFast,
    LongModerate,
    ShortTurbo,
}

impl LoRaMode {
    /// Parse a mode name the way the node JSON loader does: an unrecognized
    /// name is a configuration error, unlike an unrecognized `Role` (which
    /// defaults silently).
    pub fn parse(name: &str) -> Result<Self, crate::error::SimError> {
        match name {
            "LongFast" => Ok(LoRaMode::LongFast),
            "LongSlow" => Ok(LoRaMode::LongSlow),
            "VeryLongSlow" => Ok(LoRaMode::VeryLongSlow),
            "MediumSlow" => Ok(LoRaMode::MediumSlow),
            "MediumFast" => Ok(LoRaMode::MediumFast),
            "ShortSlow" => Ok(LoRaMode::ShortSlow),
            "ShortFast" => Ok(LoRaMode::ShortFast),
            "LongModerate" => Ok(LoRaMode::LongModerate),
            "ShortTurbo" => Ok(LoRaMode::ShortTurbo),
            other => Err(crate::error::SimError::config(format!("unknown lora_mode: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoRaMode::LongFast => "LongFast",
            LoRaMode::LongSlow => "LongSlow",
            LoRaMode::VeryLongSlow => "VeryLongSlow",
            LoRaMode::MediumSlow => "MediumSlow",
            LoRaMode::MediumFast => "MediumFast",
            LoRaMode::ShortSlow => "ShortSlow",
            LoRaMode::ShortFast => "ShortFast",
            LoRaMode::LongModerate => "LongModerate",
            LoRaMode::ShortTurbo => "ShortTurbo",
        }
    }

    /// The fixed (SF, CR, BW) tuple for this preset.
    pub fn preset(&self) -> ModemPreset {
        let (spreading_factor, coding_rate, bandwidth) = match self {
            LoRaMode::LongFast => (11, 5, 250_000),
            LoRaMode::LongSlow => (12, 8, 125_000),
            LoRaMode::VeryLongSlow => (12, 8, 62_500),
            LoRaMode::MediumSlow => (10, 5, 250_000),
            LoRaMode::MediumFast => (9, 5, 250_000),
            LoRaMode::ShortSlow => (8, 5, 250_000),
            LoRaMode::ShortFast => (7, 5, 250_000),
            LoRaMode::LongModerate => (11, 8, 125_000),
            LoRaMode::ShortTurbo => (7, 5, 500_000),
        };
        ModemPreset {
            spreading_factor,
            coding_rate,
            bandwidth,
        }
    }
}

/// The LoRa parameter tuple that fixes on-air timing: spreading factor,
/// coding rate denominator, and bandwidth in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModemPreset {
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub bandwidth: u32,
}

impl ModemPreset {
    /// symbol_time_us = 10^6 * 2^SF / BW
    pub fn symbol_time_us(&self) -> f64 {
        1_000_000.0 * 2f64.powi(self.spreading_factor as i32) / self.bandwidth as f64
    }

    /// Low data rate optimization kicks in once a symbol takes longer than
    /// 16ms to transmit (per the LoRa spec and Meshtastic's own firmware).
    pub fn low_data_rate_optimization(&self) -> bool {
        self.symbol_time_us() > 16_000.0
    }

    /// preamble_time_us = 20.25 symbols (16 + 4.25 standard LoRa preamble).
    pub fn preamble_time_us(&self) -> f64 {
        20.25 * self.symbol_time_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_table_matches_named_tuples() {
        assert_eq!(LoRaMode::LongFast.preset(), ModemPreset { spreading_factor: 11, coding_rate: 5, bandwidth: 250_000 });
        assert_eq!(LoRaMode::ShortTurbo.preset(), ModemPreset { spreading_factor: 7, coding_rate: 5, bandwidth: 500_000 });
    }

    #[test]
    fn parse_rejects_unknown_mode() {
        assert!(LoRaMode::parse("Bogus").is_err());
        assert!(LoRaMode::parse("LongFast").is_ok());
    }

    #[test]
    fn low_data_rate_optimization_threshold() {
        // SF12 @ 125000 Hz: symbol_time = 1e6 * 4096 / 125000 = 32768us > 16000
        let p = LoRaMode::LongSlow.preset();
        assert!(p.low_data_rate_optimization());
        // SF7 @ 250000 Hz: symbol_time = 1e6*128/250000 = 512us
        let p2 = LoRaMode::ShortFast.preset();
        assert!(!p2.low_data_rate_optimization());
    }
}
