//! Generators for converter-style wind documents.
//!
//! The layout mirrors what `grib2json --names --data --compact` produces for a
//! U/V 10 m wind file: a JSON array of two records, each with a `header`
//! object and a flat `data` array in row-major order.

use serde_json::{json, Value};

/// Wind component values with long fractional parts.
///
/// Values follow a smooth sine pattern so that rounding changes nearly every
/// element.
pub fn wind_component(nx: usize, ny: usize, phase: f64) -> Vec<f64> {
    let mut data = Vec::with_capacity(nx * ny);
    for row in 0..ny {
        for col in 0..nx {
            let x = col as f64 / nx.max(1) as f64;
            let y = row as f64 / ny.max(1) as f64;
            data.push(12.345_678_9 * (std::f64::consts::TAU * (x + y) + phase).sin());
        }
    }
    data
}

fn record(parameter_number: u32, name: &str, nx: usize, ny: usize, ref_time: &str, phase: f64) -> Value {
    json!({
        "header": {
            "discipline": 0,
            "parameterCategory": 2,
            "parameterNumber": parameter_number,
            "parameterNumberName": name,
            "parameterUnit": "m.s-1",
            "refTime": ref_time,
            "forecastTime": 0,
            "surface1Type": 103,
            "surface1Value": 10.0,
            "nx": nx,
            "ny": ny,
            "lo1": 0.0,
            "la1": 90.0,
            "lo2": 359.0,
            "la2": -90.0,
            "dx": 1.0,
            "dy": 1.0
        },
        "data": wind_component(nx, ny, phase)
    })
}

/// A two-record U/V document as produced by the converter.
pub fn converter_document(nx: usize, ny: usize, ref_time: &str) -> Value {
    Value::Array(vec![
        record(2, "U-component_of_wind", nx, ny, ref_time, 0.0),
        record(3, "V-component_of_wind", nx, ny, ref_time, 1.3),
    ])
}

/// Serialized converter document.
pub fn converter_document_bytes(nx: usize, ny: usize, ref_time: &str) -> Vec<u8> {
    serde_json::to_vec(&converter_document(nx, ny, ref_time))
        .expect("Failed to serialize converter document")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_component_len() {
        assert_eq!(wind_component(4, 3, 0.0).len(), 12);
    }

    #[test]
    fn test_converter_document_shape() {
        let doc = converter_document(3, 2, "2024-01-01T00:00:00.000Z");
        let records = doc.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["header"]["parameterNumber"], 2);
        assert_eq!(records[1]["header"]["parameterNumber"], 3);
        assert_eq!(records[0]["data"].as_array().unwrap().len(), 6);
    }
}
