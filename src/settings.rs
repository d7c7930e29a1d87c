//! Decodes the 213-byte settings blob into time-base and per-channel volt/div state.

use crate::error::{OscilokError, Result};

pub const SETTINGS_LEN: usize = 213;

const CH1_VOLTDIV_OFFSET: usize = 1;
const CH1_PROBE_OFFSET: usize = 5;
const CH2_VOLTDIV_OFFSET: usize = 11;
const CH2_PROBE_OFFSET: usize = 15;
const SECDIV_OFFSET: usize = 156;

/// Probe attenuation family, selects which volt/div table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFamily {
    X1,
    X10,
    X100,
}

impl ProbeFamily {
    fn from_byte(b: u8) -> Self {
        match b {
            1 => ProbeFamily::X10,
            2 => ProbeFamily::X100,
            _ => ProbeFamily::X1,
        }
    }

    fn max_index(self) -> u8 {
        match self {
            ProbeFamily::X1 | ProbeFamily::X10 => 10,
            ProbeFamily::X100 => 8,
        }
    }
}

/// Every named voltage step, 2 mV through 100 V, in device-firmware order.
/// Each probe family's volt/div index selects a contiguous window of this
/// table: 1x covers 2 mV..5 V, 10x covers 20 mV..50 V, 100x covers 200 mV..100 V.
const VOLT_MULTIPLY: [f64; 15] = [
    0.000114, 0.000286, 0.000572, 0.001144, 0.002288, 0.00444, 0.00926, 0.02389, 0.04581,
    0.08918, 0.25833, 0.43306, 0.87619, 2.33333, 4.66666,
];

fn multiplier_for_index(family: ProbeFamily, index: u8) -> f64 {
    if index > family.max_index() {
        // Firmware reports index 11 for "invalid"; treat as zero scale.
        return 0.0;
    }
    let window_start = match family {
        ProbeFamily::X1 => 0,
        ProbeFamily::X10 => 3,
        ProbeFamily::X100 => 6,
    };
    VOLT_MULTIPLY[window_start + index as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SecDiv {
    Ns2,
    Ns4,
    Ns8,
    Ns20,
    Ns40,
    Ns80,
    Ns200,
    Ns400,
    Ns800,
    Us2,
    Us4,
    Us8,
    Us20,
    Us40,
    Us80,
    Us200,
    Us400,
    Us800,
    Ms2,
    Ms4,
    Ms8,
    Ms20,
    Ms40,
    Ms80,
    Ms200,
    Ms400,
}

const SEC_DIV_TABLE: [SecDiv; 26] = [
    SecDiv::Ns2,
    SecDiv::Ns4,
    SecDiv::Ns8,
    SecDiv::Ns20,
    SecDiv::Ns40,
    SecDiv::Ns80,
    SecDiv::Ns200,
    SecDiv::Ns400,
    SecDiv::Ns800,
    SecDiv::Us2,
    SecDiv::Us4,
    SecDiv::Us8,
    SecDiv::Us20,
    SecDiv::Us40,
    SecDiv::Us80,
    SecDiv::Us200,
    SecDiv::Us400,
    SecDiv::Us800,
    SecDiv::Ms2,
    SecDiv::Ms4,
    SecDiv::Ms8,
    SecDiv::Ms20,
    SecDiv::Ms40,
    SecDiv::Ms80,
    SecDiv::Ms200,
    SecDiv::Ms400,
];

#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub volt_div_index: u8,
    pub probe: ProbeFamily,
    pub multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ch1: ChannelSettings,
    pub ch2: ChannelSettings,
    pub sec_div: Option<SecDiv>,
    pub raw: Vec<u8>,
}

impl Settings {
    /// Decode the 213-byte settings blob. Rejects any other length.
    pub fn decode(raw: &[u8]) -> Result<Settings> {
        if raw.len() != SETTINGS_LEN {
            return Err(OscilokError::Oscilloscope(format!(
                "settings blob length {} != {}",
                raw.len(),
                SETTINGS_LEN
            )));
        }

        let ch1_probe = ProbeFamily::from_byte(raw[CH1_PROBE_OFFSET]);
        let ch2_probe = ProbeFamily::from_byte(raw[CH2_PROBE_OFFSET]);

        let ch1 = ChannelSettings {
            volt_div_index: raw[CH1_VOLTDIV_OFFSET],
            probe: ch1_probe,
            multiplier: multiplier_for_index(ch1_probe, raw[CH1_VOLTDIV_OFFSET]),
        };
        let ch2 = ChannelSettings {
            volt_div_index: raw[CH2_VOLTDIV_OFFSET],
            probe: ch2_probe,
            multiplier: multiplier_for_index(ch2_probe, raw[CH2_VOLTDIV_OFFSET]),
        };

        let sec_div = SEC_DIV_TABLE.get(raw[SECDIV_OFFSET] as usize).copied();

        Ok(Settings {
            ch1,
            ch2,
            sec_div,
            raw: raw.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with(ch1_vdiv: u8, ch1_probe: u8, ch2_vdiv: u8, ch2_probe: u8, secdiv: u8) -> Vec<u8> {
        let mut raw = vec![0u8; SETTINGS_LEN];
        raw[CH1_VOLTDIV_OFFSET] = ch1_vdiv;
        raw[CH1_PROBE_OFFSET] = ch1_probe;
        raw[CH2_VOLTDIV_OFFSET] = ch2_vdiv;
        raw[CH2_PROBE_OFFSET] = ch2_probe;
        raw[SECDIV_OFFSET] = secdiv;
        raw
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Settings::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn decodes_1x_1v_multiplier() {
        let raw = blob_with(8, 0, 0, 0, 0);
        let settings = Settings::decode(&raw).unwrap();
        assert_eq!(settings.ch1.probe, ProbeFamily::X1);
        assert!((settings.ch1.multiplier - 0.04581).abs() < 1e-9);
    }

    #[test]
    fn index_11_is_invalid_zero_scale() {
        let raw = blob_with(11, 0, 0, 0, 0);
        let settings = Settings::decode(&raw).unwrap();
        assert_eq!(settings.ch1.multiplier, 0.0);
    }

    #[test]
    fn selects_probe_family_by_byte() {
        let raw = blob_with(0, 1, 0, 2, 0);
        let settings = Settings::decode(&raw).unwrap();
        assert_eq!(settings.ch1.probe, ProbeFamily::X10);
        assert_eq!(settings.ch2.probe, ProbeFamily::X100);
    }

    #[test]
    fn decodes_sec_div_table_entry() {
        let raw = blob_with(0, 0, 0, 0, 9);
        let settings = Settings::decode(&raw).unwrap();
        assert_eq!(settings.sec_div, Some(SecDiv::Us2));
    }
}
