//! Adams–Bashforth and Adams–Moulton coefficient tables.
//!
//! Tables are indexed by method order. For Adams–Bashforth of order `p`
//! the coefficients weight `N_n, N_{n-1}, .., N_{n-p+1}`, so order `p`
//! consumes `p - 1` history entries. For Adams–Moulton of order `p` they
//! weight `N_{n+1}, N_n, N_{n-1}, .., N_{n-p+2}`, so order `p >= 2`
//! consumes `p - 2` history entries.

/// Highest supported method order.
pub const MAX_ORDER: usize = 5;

const AB1: [f64; 1] = [1.0];
const AB2: [f64; 2] = [3.0 / 2.0, -1.0 / 2.0];
const AB3: [f64; 3] = [23.0 / 12.0, -16.0 / 12.0, 5.0 / 12.0];
const AB4: [f64; 4] = [55.0 / 24.0, -59.0 / 24.0, 37.0 / 24.0, -9.0 / 24.0];
const AB5: [f64; 5] = [
    1901.0 / 720.0,
    -2774.0 / 720.0,
    2616.0 / 720.0,
    -1274.0 / 720.0,
    251.0 / 720.0,
];

const AM1: [f64; 1] = [1.0];
const AM2: [f64; 2] = [1.0 / 2.0, 1.0 / 2.0];
const AM3: [f64; 3] = [5.0 / 12.0, 8.0 / 12.0, -1.0 / 12.0];
const AM4: [f64; 4] = [9.0 / 24.0, 19.0 / 24.0, -5.0 / 24.0, 1.0 / 24.0];
const AM5: [f64; 5] = [
    251.0 / 720.0,
    646.0 / 720.0,
    -264.0 / 720.0,
    106.0 / 720.0,
    -19.0 / 720.0,
];

/// Adams–Bashforth coefficients of the given order.
///
/// Orders outside `1..=MAX_ORDER` are clamped into range.
pub fn adams_bashforth(order: usize) -> &'static [f64] {
    match order.clamp(1, MAX_ORDER) {
        1 => &AB1,
        2 => &AB2,
        3 => &AB3,
        4 => &AB4,
        _ => &AB5,
    }
}

/// Adams–Moulton coefficients of the given order.
///
/// Order 1 is backward Euler, order 2 the trapezoidal rule. Orders outside
/// `1..=MAX_ORDER` are clamped into range.
pub fn adams_moulton(order: usize) -> &'static [f64] {
    match order.clamp(1, MAX_ORDER) {
        1 => &AM1,
        2 => &AM2,
        3 => &AM3,
        4 => &AM4,
        _ => &AM5,
    }
}
