// rf-core/src/units.rs

use uom::si::f64::{
    TemperatureInterval as UomTemperatureInterval,
    ThermodynamicTemperature as UomThermodynamicTemperature,
};

// Engine-internal arithmetic runs on plain f64 degrees; these types only
// appear at the unit boundary.
pub type TempInterval = UomTemperatureInterval;
pub type Temperature = UomThermodynamicTemperature;

#[inline]
pub fn celsius(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::degree_celsius;
    Temperature::new::<degree_celsius>(v)
}

#[inline]
pub fn fahrenheit(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::degree_fahrenheit;
    Temperature::new::<degree_fahrenheit>(v)
}

/// Unit a roast is displayed and configured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
        }
    }

    /// Interpret `v` as an absolute temperature in this unit.
    pub fn temperature(self, v: f64) -> Temperature {
        match self {
            Self::Celsius => celsius(v),
            Self::Fahrenheit => fahrenheit(v),
        }
    }

    /// Express an absolute temperature in this unit.
    pub fn value_of(self, t: Temperature) -> f64 {
        use uom::si::thermodynamic_temperature::{degree_celsius, degree_fahrenheit};
        match self {
            Self::Celsius => t.get::<degree_celsius>(),
            Self::Fahrenheit => t.get::<degree_fahrenheit>(),
        }
    }

    /// Express a temperature difference (or a per-minute rate) in this unit.
    pub fn interval_value_of(self, dt: TempInterval) -> f64 {
        use uom::si::temperature_interval::{degree_celsius, degree_fahrenheit};
        match self {
            Self::Celsius => dt.get::<degree_celsius>(),
            Self::Fahrenheit => dt.get::<degree_fahrenheit>(),
        }
    }

    /// Convert an absolute temperature from `from` into this unit.
    pub fn convert_from(self, from: TemperatureUnit, v: f64) -> f64 {
        if self == from {
            return v;
        }
        self.value_of(from.temperature(v))
    }

    /// Convert a rate of rise (degrees per minute) from `from` into this unit.
    pub fn convert_rate_from(self, from: TemperatureUnit, rate: f64) -> f64 {
        use uom::si::temperature_interval::{degree_celsius, degree_fahrenheit};
        if self == from {
            return rate;
        }
        let interval = match from {
            Self::Celsius => TempInterval::new::<degree_celsius>(rate),
            Self::Fahrenheit => TempInterval::new::<degree_fahrenheit>(rate),
        };
        self.interval_value_of(interval)
    }
}
