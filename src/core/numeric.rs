//! Floating-point helpers shared by the engine and the projector.
//!
//! All comparisons against "full payment" go through [`is_short`] so the
//! default threshold is applied identically everywhere.

/// Default tolerance for default detection and obligation consistency.
pub const DEFAULT_EPSILON: f64 = 1e-4;

/// Payment ratio for a node with the given resources and nominal obligation.
///
/// A node without obligations always pays in full, whatever its resources.
///
/// # Examples
///
/// ```
/// use cascade_clearing::core::numeric::clamped_ratio;
///
/// assert_eq!(clamped_ratio(40.0, 100.0), 0.4);
/// assert_eq!(clamped_ratio(250.0, 100.0), 1.0);
/// assert_eq!(clamped_ratio(-10.0, 100.0), 0.0);
/// assert_eq!(clamped_ratio(-10.0, 0.0), 1.0);
/// ```
pub fn clamped_ratio(resources: f64, obligation: f64) -> f64 {
    if obligation <= 0.0 {
        return 1.0;
    }
    (resources / obligation).clamp(0.0, 1.0)
}

/// True when `ratio` falls short of full payment by more than `epsilon`.
pub fn is_short(ratio: f64, epsilon: f64) -> bool {
    ratio < 1.0 - epsilon
}

/// Relative comparison with an absolute floor of 1.0.
///
/// Small magnitudes are compared absolutely, large ones relatively, so the
/// same tolerance works for a household's rent and a bank's interbank book.
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

/// Neumaier-compensated running sum.
///
/// The result depends on the order values are added in. Callers that need
/// reproducible totals must feed values in a fixed order; the incoming-edge
/// index guarantees ascending debtor order for inflows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

impl Extend<f64> for CompensatedSum {
    fn extend<T: IntoIterator<Item = f64>>(&mut self, iter: T) {
        for value in iter {
            self.add(value);
        }
    }
}

impl FromIterator<f64> for CompensatedSum {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        let mut sum = Self::new();
        sum.extend(iter);
        sum
    }
}

/// Compensated sum of `values` in iteration order.
pub fn ordered_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().collect::<CompensatedSum>().value()
}
