//! Gauss–Legendre quadrature for the daily killing integral.
//!
//! The per-day survival factor needs `∫ f(t) dt` over sub-intervals of one
//! day, where `f` is the Hill-shaped killing rate evaluated on a smooth
//! concentration trajectory. A 4-point rule per interval is sufficient for
//! these integrands; an adaptive wrapper halves intervals until two
//! refinement levels agree, and reports divergence instead of looping
//! forever so the caller can fall back to a closed-form approximation.

/// Abscissae of the 4-point Gauss–Legendre rule on `[-1, 1]`.
const GL4_X: [f64; 4] = [
    -0.861_136_311_594_052_6,
    -0.339_981_043_584_856_26,
    0.339_981_043_584_856_26,
    0.861_136_311_594_052_6,
];

/// Weights of the 4-point Gauss–Legendre rule on `[-1, 1]`.
const GL4_W: [f64; 4] = [
    0.347_854_845_137_453_85,
    0.652_145_154_862_546_2,
    0.652_145_154_862_546_2,
    0.347_854_845_137_453_85,
];

/// 4-point Gauss–Legendre estimate of `∫_a^b f`.
pub fn gauss_legendre_4<F: FnMut(f64) -> f64>(mut f: F, a: f64, b: f64) -> f64 {
    let half = 0.5 * (b - a);
    let mid = 0.5 * (a + b);
    let mut sum = 0.0;
    for (x, w) in GL4_X.iter().zip(GL4_W.iter()) {
        sum += w * f(mid + half * x);
    }
    half * sum
}

/// Outcome of an adaptive integration attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quadrature {
    Converged(f64),
    /// The refinement limit was hit; the best estimate is carried so the
    /// caller can decide between it and a model-specific fallback.
    Diverged(f64),
}

/// Adaptive 4-point Gauss–Legendre integration of `f` over `[a, b]`.
///
/// Intervals are split until the whole-interval estimate agrees with the sum
/// over halves to `rel_tol`, or `max_depth` splits have been used.
pub fn adaptive_gl4<F: FnMut(f64) -> f64 + Copy>(
    f: F,
    a: f64,
    b: f64,
    rel_tol: f64,
    max_depth: u32,
) -> Quadrature {
    let whole = gauss_legendre_4(f, a, b);
    refine(f, a, b, whole, rel_tol, max_depth)
}

fn refine<F: FnMut(f64) -> f64 + Copy>(
    f: F,
    a: f64,
    b: f64,
    whole: f64,
    rel_tol: f64,
    depth: u32,
) -> Quadrature {
    let mid = 0.5 * (a + b);
    let left = gauss_legendre_4(f, a, mid);
    let right = gauss_legendre_4(f, mid, b);
    let split = left + right;
    let scale = split.abs().max(1e-300);
    if (split - whole).abs() <= rel_tol * scale {
        return Quadrature::Converged(split);
    }
    if depth == 0 {
        return Quadrature::Diverged(split);
    }
    let l = refine(f, a, mid, left, rel_tol, depth - 1);
    let r = refine(f, mid, b, right, rel_tol, depth - 1);
    match (l, r) {
        (Quadrature::Converged(x), Quadrature::Converged(y)) => Quadrature::Converged(x + y),
        (l, r) => Quadrature::Diverged(l.value() + r.value()),
    }
}

impl Quadrature {
    pub fn value(self) -> f64 {
        match self {
            Quadrature::Converged(x) | Quadrature::Diverged(x) => x,
        }
    }

    pub fn converged(self) -> bool {
        matches!(self, Quadrature::Converged(_))
    }
}
