//! Analog value normalization
//!
//! Firmware revisions disagree on what an `an{n}` tag carries: raw ADC
//! counts, millivolts, or volts. `AnalogScaling` turns whatever the
//! controller reports into volts.

use std::str::FromStr;

/// How raw analog readings are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalogMode {
    /// Detect counts / millivolts / volts from the magnitude
    #[default]
    Auto,
    /// Values are ADC counts, convert with `vref / resolution`
    Volts,
    /// Pass values through unchanged
    Raw,
}

impl FromStr for AnalogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "volts" => Ok(Self::Volts),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown analog mode '{other}' (expected auto|volts|raw)")),
        }
    }
}

/// Analog scaling parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogScaling {
    pub mode: AnalogMode,
    /// ADC reference voltage
    pub vref: f64,
    /// Full-scale ADC count (1023 for 10-bit, 4095 for 12-bit)
    pub resolution: u32,
}

impl Default for AnalogScaling {
    fn default() -> Self {
        Self {
            mode: AnalogMode::Auto,
            vref: 3.3,
            resolution: 1023,
        }
    }
}

impl AnalogScaling {
    /// Normalize a raw reading to volts (or pass through in raw mode)
    #[must_use]
    pub fn normalize(&self, raw: f64) -> f64 {
        let res = f64::from(self.resolution);
        match self.mode {
            AnalogMode::Raw => raw,
            AnalogMode::Volts => round3(raw * self.vref / res),
            AnalogMode::Auto => {
                if (0.0..=res).contains(&raw) {
                    round3(raw * self.vref / res)
                } else if (0.0..=self.vref * 1000.0 + 50.0).contains(&raw) {
                    round3(raw / 1000.0)
                } else {
                    round3(raw)
                }
            }
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_counts() {
        let s = AnalogScaling::default();
        assert_eq!(s.normalize(1023.0), 3.3);
        assert_eq!(s.normalize(0.0), 0.0);
        assert_eq!(s.normalize(512.0), 1.652);
    }

    #[test]
    fn test_auto_millivolts() {
        let s = AnalogScaling::default();
        assert_eq!(s.normalize(2500.0), 2.5);
    }

    #[test]
    fn test_auto_already_volts() {
        let s = AnalogScaling::default();
        assert_eq!(s.normalize(-1.25), -1.25);
        assert_eq!(s.normalize(12000.4567), 12000.457);
    }

    #[test]
    fn test_raw_passthrough() {
        let s = AnalogScaling {
            mode: AnalogMode::Raw,
            ..Default::default()
        };
        assert_eq!(s.normalize(777.7777), 777.7777);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("VOLTS".parse::<AnalogMode>().unwrap(), AnalogMode::Volts);
        assert!("kelvin".parse::<AnalogMode>().is_err());
    }
}
