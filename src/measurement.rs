//! Typed measurement results.
//!
//! Every fetch produces a fresh [`Measurement`] owned by the caller; nothing is cached
//! on the session.

use crate::array::calculate_resolution;
use std::fmt;

/// Physical quantity carried by a fetched sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Wavelength axis (nm)
    Wavelength,
    /// Frequency axis (THz)
    Frequency,
    /// Time axis (ns)
    Time,
    /// Insertion loss (dB)
    InsertionLoss,
    /// Group delay (ps)
    GroupDelay,
    /// Linear phase deviation (rad)
    LinearPhaseDeviation,
    /// Time-domain amplitude (dB)
    TimeDomainAmplitude,
    /// Time-domain wavelength (nm)
    TimeDomainWavelength,
}

impl Quantity {
    /// Unit the instrument reports this quantity in.
    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Wavelength | Quantity::TimeDomainWavelength => "nm",
            Quantity::Frequency => "THz",
            Quantity::Time => "ns",
            Quantity::InsertionLoss | Quantity::TimeDomainAmplitude => "dB",
            Quantity::GroupDelay => "ps",
            Quantity::LinearPhaseDeviation => "rad",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Wavelength => "wavelength",
            Quantity::Frequency => "frequency",
            Quantity::Time => "time",
            Quantity::InsertionLoss => "insertion loss",
            Quantity::GroupDelay => "group delay",
            Quantity::LinearPhaseDeviation => "linear phase deviation",
            Quantity::TimeDomainAmplitude => "time-domain amplitude",
            Quantity::TimeDomainWavelength => "time-domain wavelength",
        };
        write!(f, "{name} ({})", self.unit())
    }
}

/// X axes available through `FETC:XAXI?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Selector 0
    Wavelength,
    /// Selector 2
    Frequency,
    /// Selector 3
    Time,
}

impl Axis {
    /// All axes, in fetch order.
    pub const ALL: [Axis; 3] = [Axis::Wavelength, Axis::Frequency, Axis::Time];

    /// Selector argument for `FETC:XAXI?`.
    pub fn selector(&self) -> u8 {
        match self {
            Axis::Wavelength => 0,
            Axis::Frequency => 2,
            Axis::Time => 3,
        }
    }

    /// Quantity of the fetched values.
    pub fn quantity(&self) -> Quantity {
        match self {
            Axis::Wavelength => Quantity::Wavelength,
            Axis::Frequency => Quantity::Frequency,
            Axis::Time => Quantity::Time,
        }
    }
}

/// Measurement channels available through `FETC:MEAS?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Selector 0
    InsertionLoss,
    /// Selector 1
    GroupDelay,
    /// Selector 5
    LinearPhaseDeviation,
    /// Selector 9
    TimeDomainAmplitude,
    /// Selector 10
    TimeDomainWavelength,
}

impl Channel {
    /// Selector argument for `FETC:MEAS?`.
    pub fn selector(&self) -> u8 {
        match self {
            Channel::InsertionLoss => 0,
            Channel::GroupDelay => 1,
            Channel::LinearPhaseDeviation => 5,
            Channel::TimeDomainAmplitude => 9,
            Channel::TimeDomainWavelength => 10,
        }
    }

    /// Quantity of the fetched values.
    pub fn quantity(&self) -> Quantity {
        match self {
            Channel::InsertionLoss => Quantity::InsertionLoss,
            Channel::GroupDelay => Quantity::GroupDelay,
            Channel::LinearPhaseDeviation => Quantity::LinearPhaseDeviation,
            Channel::TimeDomainAmplitude => Quantity::TimeDomainAmplitude,
            Channel::TimeDomainWavelength => Quantity::TimeDomainWavelength,
        }
    }
}

/// Point-indexed samples of one quantity, in instrument order.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// What the values are
    pub quantity: Quantity,
    /// Samples
    pub values: Vec<f64>,
}

impl Measurement {
    /// Tag `values` with `quantity`.
    pub fn new(quantity: Quantity, values: Vec<f64>) -> Self {
        Self { quantity, values }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the channel reported no data.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First and last sample.
    pub fn span(&self) -> Option<(f64, f64)> {
        Some((*self.values.first()?, *self.values.last()?))
    }

    /// Mean spacing between adjacent samples.
    pub fn resolution(&self) -> f64 {
        calculate_resolution(&self.values)
    }
}

/// Echoed averaging settings.
///
/// The instrument sometimes stays silent on a read-back, so the raw echoes are kept and
/// the parsed values are `None` when an echo is empty or not a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AveragingStatus {
    /// Whether averaging is on
    pub enabled: Option<bool>,
    /// Number of scans averaged
    pub count: Option<u32>,
    /// Raw `CONF:AVGE?` response
    pub enabled_echo: String,
    /// Raw `CONF:AVGS?` response
    pub count_echo: String,
}

impl AveragingStatus {
    /// Parse the two read-backs, keeping whatever does not parse as raw text only.
    pub fn from_echoes(enabled_echo: impl Into<String>, count_echo: impl Into<String>) -> Self {
        let enabled_echo = enabled_echo.into();
        let count_echo = count_echo.into();
        Self {
            enabled: parse_count(&enabled_echo).map(|flag| flag != 0),
            count: parse_count(&count_echo),
            enabled_echo,
            count_echo,
        }
    }
}

impl fmt::Display for AveragingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.enabled, self.count) {
            (Some(enabled), Some(count)) => {
                write!(f, "{count} ({})", if enabled { "on" } else { "off" })
            }
            _ => write!(
                f,
                "enabled '{}', count '{}'",
                self.enabled_echo.escape_debug(),
                self.count_echo.escape_debug()
            ),
        }
    }
}

/// Non-negative integer, tolerating a float rendering such as `4.000`.
pub(crate) fn parse_count(response: &str) -> Option<u32> {
    let text = response.trim();
    if let Ok(count) = text.parse::<u32>() {
        return Some(count);
    }
    match text.parse::<f64>() {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) => {
            Some(value as u32)
        }
        _ => None,
    }
}

/// Point spacing of each axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resolutions {
    /// Wavelength spacing (nm)
    pub wavelength_nm: f64,
    /// Frequency spacing (THz)
    pub frequency_thz: f64,
    /// Time spacing (ns)
    pub time_ns: f64,
}

/// Everything produced by one configured scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FullMeasurement {
    /// DUT length (m)
    pub dut_length_m: f64,
    /// Sample resolution (nm)
    pub sample_resolution_nm: f64,
    /// Applied centre wavelength (nm)
    pub center_wavelength_nm: f64,
    /// Applied wavelength range (nm)
    pub wavelength_range_nm: f64,
    /// Applied averaging
    pub averaging: AveragingStatus,
    /// Wavelength axis
    pub wavelength: Measurement,
    /// Frequency axis
    pub frequency: Measurement,
    /// Time axis
    pub time: Measurement,
    /// Insertion loss
    pub insertion_loss: Measurement,
    /// Group delay
    pub group_delay: Measurement,
    /// Time-domain amplitude
    pub time_domain_amplitude: Measurement,
    /// Time-domain wavelength
    pub time_domain_wavelength: Measurement,
    /// Linear phase deviation
    pub linear_phase_deviation: Measurement,
    /// Per-axis point spacing
    pub resolutions: Resolutions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_instrument_table() {
        let axes: Vec<u8> = Axis::ALL.iter().map(Axis::selector).collect();
        assert_eq!(axes, vec![0, 2, 3]);
        assert_eq!(Channel::LinearPhaseDeviation.selector(), 5);
        assert_eq!(Channel::TimeDomainWavelength.selector(), 10);
    }

    #[test]
    fn quantity_display_includes_unit() {
        assert_eq!(Quantity::GroupDelay.to_string(), "group delay (ps)");
        assert_eq!(Axis::Frequency.quantity().unit(), "THz");
    }

    #[test]
    fn averaging_echoes_parse_when_numeric() {
        let status = AveragingStatus::from_echoes("1", "4.000");
        assert_eq!(status.enabled, Some(true));
        assert_eq!(status.count, Some(4));
        assert_eq!(status.to_string(), "4 (on)");
    }

    #[test]
    fn averaging_echoes_keep_unparsable_text() {
        let status = AveragingStatus::from_echoes("", "n/a");
        assert_eq!(status.enabled, None);
        assert_eq!(status.count, None);
        assert_eq!(status.count_echo, "n/a");
        assert_eq!(status.to_string(), "enabled '', count 'n/a'");
    }

    #[test]
    fn counts_reject_negative_and_fractional() {
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("2.5"), None);
        assert_eq!(parse_count(" 16 "), Some(16));
    }

    #[test]
    fn span_of_empty_measurement_is_none() {
        let m = Measurement::new(Quantity::InsertionLoss, vec![]);
        assert!(m.is_empty());
        assert_eq!(m.span(), None);
        assert_eq!(m.resolution(), 0.0);
    }
}
