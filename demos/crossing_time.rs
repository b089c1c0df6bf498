//! Event location on a harmonic oscillator.
//!
//! Counts x-axis crossings of x'' = -ω²x, y'' = -ω²y and compares each
//! refined crossing time with the exact kπ/ω, for a few tolerances.
//!
//! Run with:
//!   cargo run --example crossing_time

use ode_explorer::{Axis, DetectorSettings, EventDetector, EventKind, EventTargets, ForceModel};

fn main() {
    let omega = 2.0;
    let y0 = [0.0, 0.0, 0.3, 1.0];

    println!("Crossing times, ω = {omega}");
    println!();

    for tolerance in [1e-6, 1e-8, 1e-10, 1e-12] {
        let settings = DetectorSettings {
            tolerance,
            ..Default::default()
        };
        let detector = EventDetector::new(ForceModel::harmonic(omega), Axis::Y, Axis::X, settings);

        println!("  tol = {tolerance:.0e}");
        for k in 1..=3u32 {
            let event = detector
                .find_event(&y0, 0.0, EventKind::A, EventTargets::new(k, 0))
                .unwrap();
            let exact = k as f64 * std::f64::consts::PI / omega;
            println!(
                "    crossing {k}: t = {:.12}  error = {:.2e}  |g| = {:.1e}  steps = {}  bisections = {}",
                event.t,
                (event.t - exact).abs(),
                event.g_value.abs(),
                event.steps,
                event.refinements
            );
        }
    }
}
