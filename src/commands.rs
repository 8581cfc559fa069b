//! OVA command set.

/// Device identification
pub const IDN: &str = "*IDN?";
/// DUT length in metres
pub const DUT_LENGTH: &str = "CONF:DUTL?";
/// Centre wavelength read-back in nm
pub const CENTER_WAVELENGTH: &str = "CONF:CWL?";
/// Wavelength range read-back in nm
pub const WAVELENGTH_RANGE: &str = "CONF:RANG?";
/// Averaging enabled read-back
pub const AVERAGING_ENABLED: &str = "CONF:AVGE?";
/// Averaging count read-back
pub const AVERAGING_COUNT: &str = "CONF:AVGS?";
/// Sample resolution in nm (read-only)
pub const SAMPLE_RESOLUTION: &str = "CONF:SRES?";
/// Trigger a scan
pub const SCAN: &str = "SCAN";
/// Error description register
pub const ERROR_DESCRIPTION: &str = "SYST:ERRD?";
/// Error code register, `0` when idle
pub const ERROR_CODE: &str = "SYST:ERR?";
/// Number of points in the last scan
pub const FETCH_SIZE: &str = "FETC:FSIZ?";

/// `CONF:CWL {nm}`
pub fn set_center_wavelength(nm: f64) -> String {
    format!("CONF:CWL {}", number(nm))
}

/// `CONF:RANG {nm}`
pub fn set_wavelength_range(nm: f64) -> String {
    format!("CONF:RANG {}", number(nm))
}

/// `CONF:AVGE 1` or `CONF:AVGE 0`
pub fn set_averaging_enabled(enabled: bool) -> String {
    format!("CONF:AVGE {}", u8::from(enabled))
}

/// `CONF:AVGS {count}`
pub fn set_averaging_count(count: u32) -> String {
    format!("CONF:AVGS {count}")
}

/// `FETC:XAXI? {selector}`
pub fn fetch_axis(selector: u8) -> String {
    format!("FETC:XAXI? {selector}")
}

/// `FETC:MEAS? {selector}`
pub fn fetch_measurement(selector: u8) -> String {
    format!("FETC:MEAS? {selector}")
}

/// Decimal form that always carries a fractional part (`1550` → `1550.0`).
fn number(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_keep_decimal_point() {
        assert_eq!(set_center_wavelength(1550.0), "CONF:CWL 1550.0");
        assert_eq!(set_wavelength_range(4.25), "CONF:RANG 4.25");
    }

    #[test]
    fn averaging_commands() {
        assert_eq!(set_averaging_enabled(true), "CONF:AVGE 1");
        assert_eq!(set_averaging_count(16), "CONF:AVGS 16");
    }

    #[test]
    fn fetch_commands_take_selector() {
        assert_eq!(fetch_axis(2), "FETC:XAXI? 2");
        assert_eq!(fetch_measurement(10), "FETC:MEAS? 10");
    }
}
