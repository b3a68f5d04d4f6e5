//! ---
//! bc_section: "01-core-functionality"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Shared primitives and utilities for the core runtime."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use chrono::Utc;

/// Wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Round `value` to `places` decimal digits.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
