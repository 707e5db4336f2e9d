//! 1D Distribution.

use crate::pbrt::*;

/// A discrete distribution over the entries of a non-negative weight row,
/// sampled by inverting its CDF.
#[derive(Clone)]
pub struct Distribution1D {
    /// Piecewise-constant function.
    pub func: Vec<Float>,

    /// CDF for `func`.
    pub cdf: Vec<Float>,

    /// Sum of `func`.
    pub func_int: Float,
}

impl Distribution1D {
    /// Returns a new `Distribution1D` for given weights. A row of zero weights
    /// is treated as uniform.
    ///
    /// - `f` - The weights.
    pub fn new(f: &[Float]) -> Self {
        let n = f.len();

        let mut cdf: Vec<Float> = Vec::with_capacity(n + 1);
        cdf.push(0.0);
        for i in 1..n + 1 {
            cdf.push(cdf[i - 1] + f[i - 1]);
        }

        // Transform running sum into CDF.
        let func_int = cdf[n];
        if func_int == 0.0 {
            for (i, v) in cdf.iter_mut().enumerate().skip(1).take(n) {
                *v = i as Float / n as Float;
            }
        } else {
            for v in cdf.iter_mut().skip(1).take(n) {
                *v /= func_int;
            }
        }

        Self {
            func: f.to_vec(),
            cdf,
            func_int,
        }
    }

    /// Returns the number of entries.
    pub fn count(&self) -> usize {
        self.func.len()
    }

    /// Return a sample from the discrete distribution given a random sample
    /// as `(index, probability, remapped sample)`.
    ///
    /// - `u` - The random sample.
    pub fn sample_discrete(&self, u: Float) -> (usize, Float, Float) {
        // Find surrounding CDF segments and `offset`.
        let offset = find_interval(self.cdf.len(), |index| self.cdf[index] <= u);
        let width = self.cdf[offset + 1] - self.cdf[offset];
        let u_remapped = if width > 0.0 {
            clamp((u - self.cdf[offset]) / width, 0.0, 1.0)
        } else {
            0.0
        };
        (offset, self.discrete_pdf(offset), u_remapped)
    }

    /// Return the probability of sampling a given entry.
    ///
    /// * `index` - Entry index.
    pub fn discrete_pdf(&self, index: usize) -> Float {
        debug_assert!(index < self.count());
        if self.func_int > 0.0 {
            self.func[index] / self.func_int
        } else {
            1.0 / self.count() as Float
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::*;

    #[test]
    fn sample_discrete_selects_entry_by_cdf() {
        let d = Distribution1D::new(&[1.0, 0.0, 3.0]);
        assert_eq!(d.sample_discrete(0.1).0, 0);
        assert_eq!(d.sample_discrete(0.3).0, 2);
        assert!(approx_eq!(f32, d.discrete_pdf(2), 0.75, epsilon = 1e-6));
        assert_eq!(d.discrete_pdf(1), 0.0);
    }

    #[test]
    fn zero_weights_are_uniform() {
        let d = Distribution1D::new(&[0.0; 4]);
        assert_eq!(d.sample_discrete(0.6).0, 2);
        assert!(approx_eq!(f32, d.discrete_pdf(3), 0.25, epsilon = 1e-6));
    }

    #[test]
    fn remapped_sample_stays_in_unit_interval() {
        let d = Distribution1D::new(&[2.0, 2.0]);
        let (i, _, u) = d.sample_discrete(0.75);
        assert_eq!(i, 1);
        assert!(approx_eq!(f32, u, 0.5, epsilon = 1e-5));
    }
}
