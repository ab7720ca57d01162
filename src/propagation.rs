//! Propagation model: distance + path-loss over a node pair, pure and
//! cacheable since node positions are static for the run (§4.2).

use crate::error::SimError;
use std::collections::HashMap;

/// 3-D world position in meters. `z` doubles as antenna height for the
/// Okumura-Hata variants, which are sensitive to transmitter/receiver height.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The propagation model selected for a run. Chosen once at startup and
/// immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationModel {
    Fspl,
    OkumuraHataOpen,
    OkumuraHataSuburban,
    OkumuraHataLargeCity,
}

impl PropagationModel {
    pub fn parse(name: &str) -> Result<Self, SimError> {
        match name {
            "FSPL" => Ok(PropagationModel::Fspl),
            "OpenTerrain" => Ok(PropagationModel::OkumuraHataOpen),
            "Suburban" => Ok(PropagationModel::OkumuraHataSuburban),
            "City" => Ok(PropagationModel::OkumuraHataLargeCity),
            other => Err(SimError::config(format!("unknown propagation model: {other}"))),
        }
    }
}

pub fn distance_m(a: Position, b: Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// FSPL loss in dB for a given distance and frequency.
fn fspl_loss_db(distance_m: f64, frequency_hz: f64) -> f64 {
    let d_km = (distance_m / 1000.0).max(1e-6);
    let f_ghz = frequency_hz / 1e9;
    32.44 + 20.0 * d_km.log10() + 20.0 * f_ghz.log10()
}

/// One-directional Okumura-Hata large-city correction factor a(h_m).
/// Undefined between 200 and 400 MHz.
fn large_city_correction(f_mhz: f64, h_m: f64) -> Result<f64, SimError> {
    if f_mhz > 200.0 && f_mhz < 400.0 {
        return Err(SimError::config(format!(
            "Okumura-Hata large-city model undefined for frequency {f_mhz} MHz (200-400 MHz band)"
        )));
    }
    if f_mhz >= 400.0 {
        Ok(3.2 * (11.75 * h_m).log10().powi(2) - 4.97)
    } else {
        Ok(8.29 * (1.54 * h_m).log10().powi(2) - 1.1)
    }
}

/// Medium/small-city correction factor, used for the open and suburban
/// variants (per the standard Hata model).
fn medium_city_correction(f_mhz: f64, h_m: f64) -> f64 {
    (1.1 * f_mhz.log10() - 0.7) * h_m - (1.56 * f_mhz.log10() - 0.8)
}

/// One-directional Okumura-Hata loss, from a transmitter at height `h_b`
/// (base station) to a receiver at height `h_m` (mobile).
fn okumura_hata_one_way(variant: PropagationModel, distance_m: f64, frequency_hz: f64, h_b: f64, h_m: f64) -> Result<f64, SimError> {
    let f_mhz = frequency_hz / 1e6;
    let d_km = (distance_m / 1000.0).max(1e-6);
    let h_b = h_b.max(1.0);
    let h_m = h_m.max(1.0);

    let a_hm = match variant {
        PropagationModel::OkumuraHataLargeCity => large_city_correction(f_mhz, h_m)?,
        _ => medium_city_correction(f_mhz, h_m),
    };

    let l_urban = 69.55 + 26.16 * f_mhz.log10() - 13.82 * h_b.log10() - a_hm + (44.9 - 6.55 * h_b.log10()) * d_km.log10();

    let loss = match variant {
        PropagationModel::OkumuraHataLargeCity => l_urban,
        PropagationModel::OkumuraHataSuburban => l_urban - 2.0 * (f_mhz / 28.0).log10().powi(2) - 5.4,
        PropagationModel::OkumuraHataOpen => l_urban - 4.78 * f_mhz.log10().powi(2) + 18.33 * f_mhz.log10() - 40.94,
        PropagationModel::Fspl => unreachable!("fspl handled separately"),
    };
    Ok(loss)
}

/// Compute path loss in dB between a transmitter at `tx` and receiver at
/// `rx`. Okumura-Hata variants are asymmetric in antenna height, so both
/// directions are computed and averaged per §4.2.
pub fn path_loss_db(model: PropagationModel, tx: Position, rx: Position, frequency_hz: f64) -> Result<f64, SimError> {
    let d = distance_m(tx, rx);
    if d == 0.0 {
        return Ok(0.0);
    }
    match model {
        PropagationModel::Fspl => Ok(fspl_loss_db(d, frequency_hz)),
        other => {
            let forward = okumura_hata_one_way(other, d, frequency_hz, tx.z, rx.z)?;
            let reverse = okumura_hata_one_way(other, d, frequency_hz, rx.z, tx.z)?;
            Ok((forward + reverse) / 2.0)
        }
    }
}

pub fn rssi_dbm(tx_power_dbm: f64, loss_db: f64) -> f64 {
    tx_power_dbm - loss_db
}

pub fn snr_db(rssi_dbm: f64, noise_level_dbm: f64) -> f64 {
    rssi_dbm - noise_level_dbm
}

/// Default minimum SNR at which a signal is considered detectable.
pub const DEFAULT_MINIMAL_SNR_DB: f64 = -20.0;

/// Caches path loss by (tx_id, rx_id) since positions never change during a
/// run (§1 Non-goals: no mobility).
#[derive(Debug, Default)]
pub struct PropagationCache {
    model: Option<PropagationModel>,
    cache: HashMap<(u32, u32), f64>,
}

impl PropagationCache {
    pub fn new(model: PropagationModel) -> Self {
        PropagationCache {
            model: Some(model),
            cache: HashMap::new(),
        }
    }

    pub fn loss_db(&mut self, tx_id: u32, rx_id: u32, tx: Position, rx: Position, frequency_hz: f64) -> Result<f64, SimError> {
        if let Some(cached) = self.cache.get(&(tx_id, rx_id)) {
            return Ok(*cached);
        }
        let model = self.model.expect("PropagationCache model must be set before use");
        let loss = path_loss_db(model, tx, rx, frequency_hz)?;
        self.cache.insert((tx_id, rx_id), loss);
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fspl_is_symmetric() {
        let a = Position { x: 0.0, y: 0.0, z: 10.0 };
        let b = Position { x: 100.0, y: 0.0, z: 10.0 };
        let forward = path_loss_db(PropagationModel::Fspl, a, b, 915_000_000.0).unwrap();
        let backward = path_loss_db(PropagationModel::Fspl, b, a, 915_000_000.0).unwrap();
        assert!((forward - backward).abs() < 1e-9);
    }

    #[test]
    fn large_city_rejects_200_to_400_mhz() {
        let a = Position { x: 0.0, y: 0.0, z: 10.0 };
        let b = Position { x: 500.0, y: 0.0, z: 1.5 };
        let err = path_loss_db(PropagationModel::OkumuraHataLargeCity, a, b, 300_000_000.0);
        assert!(err.is_err());
        assert!(path_loss_db(PropagationModel::OkumuraHataLargeCity, a, b, 900_000_000.0).is_ok());
        assert!(path_loss_db(PropagationModel::OkumuraHataLargeCity, a, b, 150_000_000.0).is_ok());
    }

    #[test]
    fn propagation_cache_reuses_computed_loss() {
        let mut cache = PropagationCache::new(PropagationModel::Fspl);
        let a = Position { x: 0.0, y: 0.0, z: 10.0 };
        let b = Position { x: 200.0, y: 0.0, z: 10.0 };
        let first = cache.loss_db(1, 2, a, b, 915_000_000.0).unwrap();
        let second = cache.loss_db(1, 2, a, b, 915_000_000.0).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.cache.len(), 1);
    }

    #[test]
    fn detectability_threshold() {
        let rssi = rssi_dbm(14.0, 140.0);
        let snr = snr_db(rssi, -100.0);
        assert!(snr < DEFAULT_MINIMAL_SNR_DB || snr >= DEFAULT_MINIMAL_SNR_DB);
    }
}
