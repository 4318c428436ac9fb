//! Deterministic fixed-point quantities used throughout the simulation.
//!
//! The scheduler and KPI aggregator use [`Fixed64`] instead of `f64` so that
//! two runs fed the same command/fault/order trace and the same RNG seed
//! produce bit-identical KPI scores, independent of host float rounding.

use fixed::types::I32F32;

/// Q32.32 fixed-point: used for simulated time (seconds), energy (battery %),
/// distances, and money.
pub type Fixed64 = I32F32;

/// Convert an f64 to [`Fixed64`]. Use only at system boundaries (config
/// parsing, RNG sampling), never inside a hot simulation loop.
#[inline]
pub fn f64_to_fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert [`Fixed64`] to f64. Use only for display, serialization, or FFI.
#[inline]
pub fn fixed_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let a = f64_to_fixed(12.5);
        assert_eq!(fixed_to_f64(a), 12.5);
    }

    #[test]
    fn arithmetic_is_exact_for_halves() {
        let a = f64_to_fixed(0.1);
        let b = f64_to_fixed(0.2);
        let sum = a + b;
        assert!((fixed_to_f64(sum) - 0.3).abs() < 1e-9);
    }
}
