//! Canonical measurement units and conversions.
//!
//! Every unit carries a physical dimension and an affine transform to that
//! dimension's base unit, so any two units of the same dimension convert
//! through `base = value * scale + offset`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Physical dimension of a unit. Conversions are only defined between
/// units of the same dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Temperature,
    Ratio,
    Pressure,
    Precipitation,
    Speed,
    Irradiance,
    Angle,
}

/// Measurement units reported by stations or configured as canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Percent,
    Pascal,
    Hectopascal,
    Kilopascal,
    InchesMercury,
    Millimeter,
    Centimeter,
    Inch,
    MeterPerSecond,
    KilometerPerHour,
    MilePerHour,
    Knot,
    WattPerSquareMeter,
    Degree,
}

impl Unit {
    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => Dimension::Temperature,
            Unit::Percent => Dimension::Ratio,
            Unit::Pascal | Unit::Hectopascal | Unit::Kilopascal | Unit::InchesMercury => {
                Dimension::Pressure
            }
            Unit::Millimeter | Unit::Centimeter | Unit::Inch => Dimension::Precipitation,
            Unit::MeterPerSecond | Unit::KilometerPerHour | Unit::MilePerHour | Unit::Knot => {
                Dimension::Speed
            }
            Unit::WattPerSquareMeter => Dimension::Irradiance,
            Unit::Degree => Dimension::Angle,
        }
    }

    /// Affine transform to the dimension's base unit: `base = v * scale + offset`.
    ///
    /// Base units: kelvin, percent, pascal, millimeter, m/s, W/m2, degree.
    fn to_base(&self) -> (f64, f64) {
        match self {
            Unit::Celsius => (1.0, 273.15),
            Unit::Fahrenheit => (5.0 / 9.0, 459.67 * 5.0 / 9.0),
            Unit::Kelvin => (1.0, 0.0),
            Unit::Percent => (1.0, 0.0),
            Unit::Pascal => (1.0, 0.0),
            Unit::Hectopascal => (100.0, 0.0),
            Unit::Kilopascal => (1000.0, 0.0),
            Unit::InchesMercury => (3386.389, 0.0),
            Unit::Millimeter => (1.0, 0.0),
            Unit::Centimeter => (10.0, 0.0),
            Unit::Inch => (25.4, 0.0),
            Unit::MeterPerSecond => (1.0, 0.0),
            Unit::KilometerPerHour => (1.0 / 3.6, 0.0),
            Unit::MilePerHour => (0.44704, 0.0),
            Unit::Knot => (0.514444, 0.0),
            Unit::WattPerSquareMeter => (1.0, 0.0),
            Unit::Degree => (1.0, 0.0),
        }
    }

    /// Convert a value between two units of the same dimension.
    pub fn convert(value: f64, from: Unit, to: Unit) -> SyncResult<f64> {
        if from == to {
            return Ok(value);
        }

        if from.dimension() != to.dimension() {
            return Err(SyncError::UnconvertibleUnit {
                value,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let (fs, fo) = from.to_base();
        let (ts, to_off) = to.to_base();
        Ok((value * fs + fo - to_off) / ts)
    }

    /// Canonical label, also used for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Celsius => "celsius",
            Unit::Fahrenheit => "fahrenheit",
            Unit::Kelvin => "kelvin",
            Unit::Percent => "percent",
            Unit::Pascal => "pascal",
            Unit::Hectopascal => "hectopascal",
            Unit::Kilopascal => "kilopascal",
            Unit::InchesMercury => "inhg",
            Unit::Millimeter => "millimeter",
            Unit::Centimeter => "centimeter",
            Unit::Inch => "inch",
            Unit::MeterPerSecond => "m/s",
            Unit::KilometerPerHour => "km/h",
            Unit::MilePerHour => "mph",
            Unit::Knot => "knot",
            Unit::WattPerSquareMeter => "w/m2",
            Unit::Degree => "degree",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = SyncError;

    /// Accepts the spellings operators actually put in mapping configs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let unit = match normalized.as_str() {
            "celsius" | "deg_c" | "degc" | "°c" | "c" => Unit::Celsius,
            "fahrenheit" | "deg_f" | "degf" | "°f" | "f" => Unit::Fahrenheit,
            "kelvin" | "k" => Unit::Kelvin,
            "percent" | "%" | "pct" => Unit::Percent,
            "pascal" | "pa" => Unit::Pascal,
            "hectopascal" | "hpa" | "mbar" | "mb" => Unit::Hectopascal,
            "kilopascal" | "kpa" => Unit::Kilopascal,
            "inhg" | "in_hg" => Unit::InchesMercury,
            "millimeter" | "mm" => Unit::Millimeter,
            "centimeter" | "cm" => Unit::Centimeter,
            "inch" | "in" => Unit::Inch,
            "m/s" | "mps" | "meter_per_second" => Unit::MeterPerSecond,
            "km/h" | "kmh" | "kph" => Unit::KilometerPerHour,
            "mph" | "mi/h" => Unit::MilePerHour,
            "knot" | "knots" | "kt" => Unit::Knot,
            "w/m2" | "wm2" | "w/m^2" => Unit::WattPerSquareMeter,
            "degree" | "deg" | "°" => Unit::Degree,
            _ => return Err(SyncError::UnknownUnit(s.to_string())),
        };
        Ok(unit)
    }
}

impl TryFrom<String> for Unit {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conversion() {
        assert_eq!(Unit::convert(21.5, Unit::Celsius, Unit::Celsius).unwrap(), 21.5);
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        let v = Unit::convert(12.5, Unit::Fahrenheit, Unit::Celsius).unwrap();
        assert!((v - (-10.833333)).abs() < 1e-5);
    }

    #[test]
    fn test_celsius_to_kelvin() {
        let v = Unit::convert(0.0, Unit::Celsius, Unit::Kelvin).unwrap();
        assert!((v - 273.15).abs() < 1e-9);
    }

    #[test]
    fn test_pressure_conversion() {
        let v = Unit::convert(1013.25, Unit::Hectopascal, Unit::Kilopascal).unwrap();
        assert!((v - 101.325).abs() < 1e-9);
    }

    #[test]
    fn test_speed_conversion() {
        let v = Unit::convert(36.0, Unit::KilometerPerHour, Unit::MeterPerSecond).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = Unit::convert(5.0, Unit::Celsius, Unit::Percent).unwrap_err();
        assert!(matches!(err, SyncError::UnconvertibleUnit { .. }));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("deg_C".parse::<Unit>().unwrap(), Unit::Celsius);
        assert_eq!("%".parse::<Unit>().unwrap(), Unit::Percent);
        assert_eq!("hPa".parse::<Unit>().unwrap(), Unit::Hectopascal);
        assert_eq!("m/s".parse::<Unit>().unwrap(), Unit::MeterPerSecond);
        assert!("furlongs".parse::<Unit>().is_err());
    }
}
