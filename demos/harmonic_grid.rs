//! Small event-norm sweep printed as a table.
//!
//! Sweeps a 6 × 6 grid of initial velocities for a mass between two springs
//! and prints the log-scaled intensity of each pixel, fastest row on top.
//!
//! Run with:
//!   cargo run --example harmonic_grid

use ode_explorer::{log_normalize, ExplorerConfig, GridSweep};

fn main() {
    let config = ExplorerConfig::from_toml_str(
        r#"
        mode = "combined"

        [events]
        a = 2
        b = 1

        [grid]
        width = 6
        height = 6
        velocity_origin = [-1.5, 0.25]
        velocity_step = 0.5

        [model]
        law = "springs"
        "#,
    )
    .unwrap();

    let field = GridSweep::from_config(&config, 0).unwrap().run().unwrap();
    let heatmap = log_normalize(&field, config.tolerance);

    println!(
        "Springs, combined mode: {} x {} pixels, {} failed",
        field.width, field.height, field.failures
    );
    if let Some(max) = field.max_finite() {
        println!("  largest norm: {max:.6}");
    }
    println!();
    for row in heatmap.rows() {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:>4}")).collect();
        println!("  {}", cells.join(""));
    }
}
