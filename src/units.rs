//! Temperature unit conversions and the venue's resolution rounding.
//!
//! All conversions are pure functions. The venue settles brackets against
//! whole-°F readings, so fractional observations round with the ">= 0.5
//! rounds up" convention.

#[inline]
pub fn kelvin_to_celsius(temp_k: f64) -> f64 {
    temp_k - 273.15
}

#[inline]
pub fn celsius_to_kelvin(temp_c: f64) -> f64 {
    temp_c + 273.15
}

#[inline]
pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    temp_c * 9.0 / 5.0 + 32.0
}

#[inline]
pub fn fahrenheit_to_celsius(temp_f: f64) -> f64 {
    (temp_f - 32.0) * 5.0 / 9.0
}

#[inline]
pub fn kelvin_to_fahrenheit(temp_k: f64) -> f64 {
    celsius_to_fahrenheit(kelvin_to_celsius(temp_k))
}

#[inline]
pub fn fahrenheit_to_kelvin(temp_f: f64) -> f64 {
    celsius_to_kelvin(fahrenheit_to_celsius(temp_f))
}

/// Round a fractional °F to the whole °F the venue resolves against:
/// fractions below 0.5 round down, 0.5 and above round up.
#[inline]
pub fn resolve_to_whole_f(temp_f: f64) -> i32 {
    (temp_f + 0.5).floor() as i32
}
