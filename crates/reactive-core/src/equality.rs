//! The signal equality policy: identity / `NaN`-equals-`NaN`, never a deep
//! structural comparison of nested data.
//!
//! Plain `PartialEq` already gives identity-like behavior for most payload
//! types (numbers, strings, enums, small structs deriving `PartialEq`). The
//! one place it disagrees with the policy is IEEE-754 floats, where
//! `f32::NAN == f32::NAN` is `false`. [`signal_eq`] special-cases the bit
//! pattern so two `NaN` floats compare equal, matching the host language's
//! `Object.is`-style identity check this framework is specified against.

/// Compare two values under the signal equality policy.
///
/// Generic payloads fall back to `PartialEq`. Callers storing raw floats as
/// a signal's `T` get `NaN`-equals-`NaN` via the specializations below
/// rather than through this generic path, since Rust has no stable trait
/// specialization; a payload type embedding a float field and wanting the
/// same treatment should implement its own `PartialEq` accordingly.
pub fn signal_eq<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Bit-aware equality for `f64`, treating `NaN` as equal to `NaN`.
pub fn f64_eq(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || a == b
}

/// Bit-aware equality for `f32`, treating `NaN` as equal to `NaN`.
pub fn f32_eq(a: f32, b: f32) -> bool {
    a.to_bits() == b.to_bits() || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_values_are_equal() {
        assert!(signal_eq(&5, &5));
        assert!(signal_eq(&"a".to_string(), &"a".to_string()));
    }

    #[test]
    fn different_values_are_not_equal() {
        assert!(!signal_eq(&5, &6));
    }

    #[test]
    fn nan_equals_nan_for_floats() {
        assert!(f64_eq(f64::NAN, f64::NAN));
        assert!(f32_eq(f32::NAN, f32::NAN));
    }

    #[test]
    fn plain_partial_eq_treats_nan_as_unequal() {
        // Documents why f64_eq/f32_eq exist: raw PartialEq on NaN disagrees
        // with the signal equality policy.
        assert!(!signal_eq(&f64::NAN, &f64::NAN));
    }
}
