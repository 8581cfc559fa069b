//! Numeric array responses.
//!
//! The OVA returns axis and channel data as decimal fields separated by carriage
//! returns (`\r`), not the commas usual for SCPI, usually with a trailing `\r`.

use crate::error::{OvaError, OvaResult};

/// Field separator used by the instrument in array responses.
pub const FIELD_DELIMITER: char = '\r';

/// Decode a `\r`-delimited array response.
///
/// Blank input is an empty array. Blank fields (such as the one after a trailing
/// delimiter) are skipped. A field that is not a number fails the whole decode, and
/// the error carries the full raw response.
///
/// ```
/// use luna_ova::array::decode_array;
///
/// let values = decode_array("1550.1\r1550.2\r1550.3\r").unwrap();
/// assert_eq!(values, vec![1550.1, 1550.2, 1550.3]);
/// ```
pub fn decode_array(response: &str) -> OvaResult<Vec<f64>> {
    if response.trim().is_empty() {
        return Ok(Vec::new());
    }

    response
        .split(FIELD_DELIMITER)
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .parse::<f64>()
                .map_err(|_| OvaError::parse(format!("array field '{field}'"), response))
        })
        .collect()
}

/// Encode values the way the instrument does: each followed by `\r`.
///
/// Values are written in shortest round-trip form, so `decode_array(&encode_array(xs))`
/// returns `xs` exactly.
pub fn encode_array(values: &[f64]) -> String {
    let mut out = String::with_capacity(values.len() * 12);
    for value in values {
        out.push_str(&value.to_string());
        out.push(FIELD_DELIMITER);
    }
    out
}

/// Mean absolute spacing between adjacent points of an axis.
///
/// For a uniform grid this is the step size. Axes with fewer than two points have a
/// resolution of `0.0`.
pub fn calculate_resolution(axis: &[f64]) -> f64 {
    if axis.len() < 2 {
        return 0.0;
    }
    let total: f64 = axis.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();
    total / (axis.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_carriage_return_fields_in_order() {
        let values = decode_array("1550.1\r1550.2\r1550.3\r").unwrap();
        assert_eq!(values, vec![1550.1, 1550.2, 1550.3]);
    }

    #[test]
    fn blank_input_is_empty() {
        assert!(decode_array("").unwrap().is_empty());
        assert!(decode_array("  \r\n ").unwrap().is_empty());
    }

    #[test]
    fn blank_fields_are_skipped() {
        let values = decode_array("\r-3.5\r\r 2e-3 \r").unwrap();
        assert_eq!(values, vec![-3.5, 0.002]);
    }

    #[test]
    fn commas_are_not_delimiters() {
        let err = decode_array("1.0,2.0").unwrap_err();
        assert!(matches!(err, OvaError::Parse { .. }));
    }

    #[test]
    fn bad_field_reports_raw_response() {
        let raw = "1.0\rERR\r3.0\r";
        match decode_array(raw) {
            Err(OvaError::Parse { expected, response }) => {
                assert_eq!(response, raw);
                assert!(expected.contains("ERR"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn encoded_arrays_decode_to_the_same_values() {
        let samples: [&[f64]; 4] = [
            &[],
            &[1550.0],
            &[-3.25, 0.1, 1e-9, 299_792.458],
            &[f64::MAX, f64::MIN_POSITIVE, -0.0],
        ];
        for xs in samples {
            let encoded = encode_array(xs);
            assert_eq!(encoded.matches(FIELD_DELIMITER).count(), xs.len());
            assert_eq!(decode_array(&encoded).unwrap(), xs);
        }
    }

    #[test]
    fn resolution_of_uniform_axis_is_step() {
        let axis = [1549.0, 1549.5, 1550.0, 1550.5];
        assert!((calculate_resolution(&axis) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn resolution_uses_absolute_spacing() {
        // Frequency axes descend as wavelength ascends
        let axis = [193.5, 193.4, 193.3];
        assert!((calculate_resolution(&axis) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn resolution_of_short_axis_is_zero() {
        assert_eq!(calculate_resolution(&[]), 0.0);
        assert_eq!(calculate_resolution(&[1550.0]), 0.0);
    }
}
