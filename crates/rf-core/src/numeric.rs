/// Floating point type used throughout the engine
pub type Real = f64;

/// Sentinel the device layer uses for "no valid reading".
pub const INVALID_TEMPERATURE: Real = -1.0;

/// True when `v` is a usable temperature: finite and not the device sentinel.
#[inline]
pub fn is_valid_temperature(v: Real) -> bool {
    v.is_finite() && v != INVALID_TEMPERATURE
}
