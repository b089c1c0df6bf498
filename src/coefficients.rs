//! Dormand–Prince 5(4) Coefficients
//!
//! Coefficients for the 7-stage embedded RK5(4) pair from:
//! Dormand, J.R. & Prince, P.J. (1980). "A family of embedded Runge-Kutta
//! formulae". Journal of Computational and Applied Mathematics 6(1), 19-26.
//!
//! The 5th-order solution advances the state, the embedded 4th-order
//! solution provides the local error estimate for step-size control.

/// Number of stages in the Dormand–Prince method
pub const STAGES: usize = 7;

/// Order of the solution used to advance the state
pub const ORDER: u8 = 5;

/// Order of the embedded method (used for error estimation)
pub const EMBEDDED_ORDER: u8 = 4;

/// Node coefficients (c_i): stage i is evaluated at t_n + c[i]*h
pub const C: [f64; STAGES] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

/// Runge-Kutta matrix (a_ij), lower triangular, stored as A[i][j] for j < i
///
/// Row 6 equals the 5th-order weights (first-same-as-last property).
pub const A: [[f64; 6]; STAGES] = [
    [0.0; 6],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];

/// Weights for the 5th-order solution (b_i)
pub const B: [f64; STAGES] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];

/// Weights for the embedded 4th-order solution (b_hat_i)
pub const B_HAT: [f64; STAGES] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

/// Error weights: B[i] - B_HAT[i]
///
/// err ≈ h * sum_i B_ERR[i] * k_i
pub const B_ERR: [f64; STAGES] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-14;

    #[test]
    fn test_row_sum_condition() {
        for i in 0..STAGES {
            let row_sum: f64 = A[i].iter().sum();
            assert!(
                (row_sum - C[i]).abs() < TOL,
                "Row {} sum = {}, expected c[{}] = {}",
                i,
                row_sum,
                i,
                C[i]
            );
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let b_sum: f64 = B.iter().sum();
        let b_hat_sum: f64 = B_HAT.iter().sum();
        assert!((b_sum - 1.0).abs() < TOL, "5th order weights sum to {}", b_sum);
        assert!(
            (b_hat_sum - 1.0).abs() < TOL,
            "4th order weights sum to {}",
            b_hat_sum
        );
    }

    #[test]
    fn test_error_weights_match_difference() {
        for i in 0..STAGES {
            assert!(
                (B_ERR[i] - (B[i] - B_HAT[i])).abs() < TOL,
                "B_ERR[{}] = {} does not equal B - B_HAT",
                i,
                B_ERR[i]
            );
        }
        let err_sum: f64 = B_ERR.iter().sum();
        assert!(err_sum.abs() < TOL);
    }

    #[test]
    fn test_first_same_as_last() {
        for j in 0..6 {
            assert_eq!(A[6][j], B[j]);
        }
    }
}
