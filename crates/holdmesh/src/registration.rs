//! Scan registration.
//!
//! Aligns a source point cloud onto a target cloud with a similarity
//! transform `x' = s * (R x + t)` (unit quaternion rotation, translation,
//! isotropic scale). The objective is a sampled, bidirectional Chamfer
//! distance plus a coplanarity penalty between the dominant planes of the
//! two scans:
//!
//! ```text
//! loss = (1 - w) * chamfer + w * (1 - |n_target . R n_source|)
//! ```
//!
//! Rotation, translation and scale are updated by separate Adam optimizers
//! from analytic gradients. After every step the quaternion is renormalized
//! and the scale is clamped to a floor. The best loss seen so far is tracked
//! and its transform, not the last iterate, is returned.
//!
//! # Example
//!
//! ```
//! use holdmesh::PointCloud;
//! use holdmesh::registration::{RegistrationParams, RegistrationStatus, register};
//! use nalgebra::Point3;
//!
//! let points: Vec<_> = (0..100)
//!     .map(|i| Point3::new((i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 0.0))
//!     .collect();
//! let cloud = PointCloud::new(points);
//!
//! let params = RegistrationParams::default().with_num_samples(2000);
//! let result = register(&cloud, &cloud, &params)?;
//! assert_eq!(result.status, RegistrationStatus::Converged);
//! # Ok::<(), holdmesh::HoldError>(())
//! ```

use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Matrix4, Point3, Quaternion, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HoldError, HoldResult};
use crate::io::{load_point_cloud, save_point_cloud};
use crate::layout::moved_path;
use crate::plane::principal_normal;
use crate::pointcloud::PointCloud;
use crate::spatial::SpatialIndex;
use crate::tracing_ext::OperationTimer;

/// Coplanarity weights tried by [`tune_coplanarity_weight`] by default.
pub const DEFAULT_SWEEP_WEIGHTS: [f64; 9] = [0.0, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 0.9, 1.0];

/// Added to the quaternion norm before dividing, as the optimizer may
/// briefly move the raw quaternion towards zero.
const QUATERNION_EPS: f64 = 1e-8;

/// A similarity transform `p' = scale * (rotation * p + translation)`.
///
/// The translation is applied before scaling, so it is expressed in the
/// source's unscaled units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Build from raw `[w, x, y, z]` quaternion components.
    pub fn from_parts(quaternion: [f64; 4], translation: Vector3<f64>, scale: f64) -> Self {
        let [w, x, y, z] = quaternion;
        Self {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
            translation,
            scale,
        }
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from((self.rotation * p.coords + self.translation) * self.scale)
    }

    /// Rotate a direction. Scale and translation do not apply.
    pub fn transform_normal(&self, n: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * n
    }

    /// Apply to every point (and normal) of a cloud. Colours are kept.
    pub fn transform_cloud(&self, cloud: &PointCloud) -> PointCloud {
        let mut moved = cloud.clone();
        moved.points = cloud.points.par_iter().map(|p| self.transform_point(p)).collect();
        if let Some(normals) = moved.normals.as_mut() {
            for n in normals.iter_mut() {
                *n = self.transform_normal(n);
            }
        }
        moved
    }

    /// Quaternion as `[w, x, y, z]`.
    pub fn quaternion(&self) -> [f64; 4] {
        let q = self.rotation.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    /// `(roll, pitch, yaw)` in radians.
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        self.rotation.euler_angles()
    }

    /// Homogeneous matrix with `scale * R` in the upper block and
    /// `scale * translation` in the last column.
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let rotation = self.rotation.to_rotation_matrix();
        let mut result = Matrix4::identity();
        for i in 0..3 {
            for j in 0..3 {
                result[(i, j)] = rotation[(i, j)] * self.scale;
            }
            result[(i, 3)] = self.translation[i] * self.scale;
        }
        result
    }
}

/// Parameters for [`register`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Iteration cap.
    pub max_iterations: usize,

    /// Consecutive non-improving iterations before stopping.
    pub patience: usize,

    /// A loss counts as an improvement only when it beats the best loss by
    /// more than this.
    pub min_improvement: f64,

    /// Stop as converged once the best loss drops to this value.
    pub convergence_tolerance: f64,

    /// Weight `w` of the coplanarity term, in `[0, 1]`.
    pub coplanarity_weight: f64,

    pub lr_rotation: f64,
    pub lr_translation: f64,
    pub lr_scale: f64,

    /// Points drawn (with replacement) from each cloud per direction and
    /// iteration.
    pub num_samples: usize,

    /// Lower bound on the scale after every step.
    pub min_scale: f64,

    /// Seed for the sampling RNG.
    pub seed: u64,

    /// Keep one [`IterationRecord`] per iteration.
    pub record_history: bool,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            patience: 500,
            min_improvement: 1e-4,
            convergence_tolerance: 1e-10,
            coplanarity_weight: 0.1,
            lr_rotation: 0.1,
            lr_translation: 0.001,
            lr_scale: 0.1,
            num_samples: 5000,
            min_scale: 0.1,
            seed: 42,
            record_history: false,
        }
    }
}

impl RegistrationParams {
    /// Shorter runs with smaller steps, used for each trial of a weight sweep.
    pub fn for_sweep() -> Self {
        Self {
            max_iterations: 1000,
            patience: 50,
            lr_rotation: 0.01,
            lr_translation: 0.0001,
            lr_scale: 0.01,
            ..Default::default()
        }
    }

    pub fn with_coplanarity_weight(mut self, weight: f64) -> Self {
        self.coplanarity_weight = weight;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn with_learning_rates(mut self, rotation: f64, translation: f64, scale: f64) -> Self {
        self.lr_rotation = rotation;
        self.lr_translation = translation;
        self.lr_scale = scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.record_history = true;
        self
    }

    pub fn validate(&self) -> HoldResult<()> {
        if self.max_iterations == 0 {
            return Err(HoldError::invalid_parameter("max_iterations", "must be at least 1"));
        }
        if self.patience == 0 {
            return Err(HoldError::invalid_parameter("patience", "must be at least 1"));
        }
        if self.num_samples == 0 {
            return Err(HoldError::invalid_parameter("num_samples", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.coplanarity_weight) {
            return Err(HoldError::invalid_parameter(
                "coplanarity_weight",
                format!("{} is outside [0, 1]", self.coplanarity_weight),
            ));
        }
        for (name, lr) in [
            ("lr_rotation", self.lr_rotation),
            ("lr_translation", self.lr_translation),
            ("lr_scale", self.lr_scale),
        ] {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(HoldError::invalid_parameter(name, format!("{lr} must be positive")));
            }
        }
        if self.min_scale.is_nan() || self.min_scale <= 0.0 {
            return Err(HoldError::invalid_parameter("min_scale", "must be positive"));
        }
        if self.min_improvement < 0.0 {
            return Err(HoldError::invalid_parameter("min_improvement", "must not be negative"));
        }
        Ok(())
    }
}

/// How a registration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Best loss reached the convergence tolerance.
    Converged,
    /// No improvement for `patience` iterations.
    PatienceExhausted,
    /// Still improving when the iteration cap was hit.
    IterationCapReached,
    /// Loss became non-finite.
    Diverged,
}

impl RegistrationStatus {
    /// Whether the returned transform can be used without retrying.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Converged | Self::PatienceExhausted)
    }
}

/// One optimizer iteration, kept when `record_history` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub loss: f64,
    pub chamfer: f64,
    pub coplanarity: f64,
    /// Best loss after this iteration.
    pub best_loss: f64,
    /// Parameters after the update and projection.
    pub transform: SimilarityTransform,
    /// Optimizer quaternion `[w, x, y, z]` after projection, before any
    /// renormalisation by [`SimilarityTransform`].
    pub raw_quaternion: [f64; 4],
}

/// Result of [`register`].
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Transform of the best iterate.
    pub transform: SimilarityTransform,
    pub loss: f64,
    pub chamfer: f64,
    pub coplanarity: f64,
    pub coplanarity_weight: f64,
    pub iterations: usize,
    pub status: RegistrationStatus,
    pub history: Vec<IterationRecord>,
}

impl RegistrationResult {
    pub fn summary(&self) -> RegistrationSummary {
        let (roll, pitch, yaw) = self.transform.euler_angles();
        RegistrationSummary {
            status: self.status,
            loss: self.loss,
            chamfer: self.chamfer,
            coplanarity: self.coplanarity,
            coplanarity_weight: self.coplanarity_weight,
            iterations: self.iterations,
            quaternion: self.transform.quaternion(),
            translation: self.transform.translation.into(),
            scale: self.transform.scale,
            euler_angles: [roll, pitch, yaw],
        }
    }
}

/// Serializable view of a [`RegistrationResult`].
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    pub status: RegistrationStatus,
    pub loss: f64,
    pub chamfer: f64,
    pub coplanarity: f64,
    pub coplanarity_weight: f64,
    pub iterations: usize,
    /// `[w, x, y, z]`.
    pub quaternion: [f64; 4],
    pub translation: [f64; 3],
    pub scale: f64,
    /// `[roll, pitch, yaw]` in radians.
    pub euler_angles: [f64; 3],
}

// ============================================================================
// Optimizer
// ============================================================================

/// Adam over a fixed-size parameter block.
#[derive(Debug, Clone)]
struct Adam<const N: usize> {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: [f64; N],
    v: [f64; N],
    t: i32,
}

impl<const N: usize> Adam<N> {
    fn new(lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: [0.0; N],
            v: [0.0; N],
            t: 0,
        }
    }

    fn step(&mut self, params: &mut [f64; N], grad: &[f64; N]) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..N {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grad[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grad[i] * grad[i];
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

// ============================================================================
// Objective
// ============================================================================

/// Optimizer parameters: raw quaternion, translation, scale.
#[derive(Debug, Clone, Copy)]
struct State {
    q: [f64; 4],
    t: [f64; 3],
    s: [f64; 1],
}

impl State {
    fn identity() -> Self {
        Self {
            q: [1.0, 0.0, 0.0, 0.0],
            t: [0.0; 3],
            s: [1.0],
        }
    }

    fn transform(&self) -> SimilarityTransform {
        SimilarityTransform::from_parts(self.q, Vector3::from(self.t), self.s[0])
    }

    fn project(&mut self, min_scale: f64) {
        let norm = self.q.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            for c in &mut self.q {
                *c /= norm;
            }
        } else {
            self.q = [1.0, 0.0, 0.0, 0.0];
        }
        self.s[0] = self.s[0].max(min_scale);
    }
}

#[derive(Debug, Clone, Copy)]
struct Evaluation {
    loss: f64,
    chamfer: f64,
    coplanarity: f64,
    grad_q: [f64; 4],
    grad_t: [f64; 3],
    grad_s: [f64; 1],
}

/// Rotation matrix of `q / (|q| + eps)` and its partial derivatives with
/// respect to the normalized components `(w, x, y, z)`.
fn rotation_and_derivatives(q_hat: &[f64; 4]) -> (Matrix3<f64>, [Matrix3<f64>; 4]) {
    let [w, x, y, z] = *q_hat;
    #[rustfmt::skip]
    let rotation = Matrix3::new(
        1.0 - 2.0 * y * y - 2.0 * z * z, 2.0 * x * y - 2.0 * z * w,       2.0 * x * z + 2.0 * y * w,
        2.0 * x * y + 2.0 * z * w,       1.0 - 2.0 * x * x - 2.0 * z * z, 2.0 * y * z - 2.0 * x * w,
        2.0 * x * z - 2.0 * y * w,       2.0 * y * z + 2.0 * x * w,       1.0 - 2.0 * x * x - 2.0 * y * y,
    );
    #[rustfmt::skip]
    let derivatives = [
        Matrix3::new(
            0.0,       -2.0 * z,  2.0 * y,
            2.0 * z,    0.0,     -2.0 * x,
            -2.0 * y,   2.0 * x,  0.0,
        ),
        Matrix3::new(
            0.0,      2.0 * y,  2.0 * z,
            2.0 * y, -4.0 * x, -2.0 * w,
            2.0 * z,  2.0 * w, -4.0 * x,
        ),
        Matrix3::new(
            -4.0 * y, 2.0 * x, 2.0 * w,
            2.0 * x,  0.0,     2.0 * z,
            -2.0 * w, 2.0 * z, -4.0 * y,
        ),
        Matrix3::new(
            -4.0 * z, -2.0 * w, 2.0 * x,
            2.0 * w,  -4.0 * z, 2.0 * y,
            2.0 * x,   2.0 * y, 0.0,
        ),
    ];
    (rotation, derivatives)
}

fn sample_indices(rng: &mut StdRng, len: usize, count: usize) -> Vec<usize> {
    (0..count).map(|_| rng.gen_range(0..len)).collect()
}

fn unique(indices: &[usize]) -> Vec<usize> {
    let mut unique = indices.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

struct Objective<'a> {
    source: &'a [Point3<f64>],
    target: &'a [Point3<f64>],
    source_normal: Vector3<f64>,
    target_normal: Vector3<f64>,
    weight: f64,
    num_samples: usize,
}

impl Objective<'_> {
    fn evaluate(&self, state: &State, rng: &mut StdRng) -> Evaluation {
        let norm = state.q.iter().map(|c| c * c).sum::<f64>().sqrt();
        let denom = norm + QUATERNION_EPS;
        let q_hat = state.q.map(|c| c / denom);
        let (rotation, derivatives) = rotation_and_derivatives(&q_hat);
        let t = Vector3::from(state.t);
        let s = state.s[0];
        let place = |p: &Point3<f64>| rotation * p.coords + t;

        let k = self.num_samples;
        let forward_src = sample_indices(rng, self.source.len(), k);
        let forward_tgt = sample_indices(rng, self.target.len(), k);
        let backward_tgt = sample_indices(rng, self.target.len(), k);
        let backward_src = sample_indices(rng, self.source.len(), k);

        // Sampled source -> nearest sampled target
        let target_index = SpatialIndex::build_subset(self.target, &unique(&forward_tgt));
        let forward: Vec<(usize, Vector3<f64>, f64)> = forward_src
            .par_iter()
            .map(|&i| {
                let x = place(&self.source[i]) * s;
                let nearest = target_index.nearest(&Point3::from(x));
                let y = nearest.map_or(x, |n| self.target[n.index].coords);
                (i, x - y, (x - y).norm_squared())
            })
            .collect();

        // Sampled target -> nearest sampled (moved) source
        let source_ids = unique(&backward_src);
        let moved: Vec<Point3<f64>> = source_ids
            .iter()
            .map(|&i| Point3::from(place(&self.source[i]) * s))
            .collect();
        let source_index = SpatialIndex::build(&moved);
        let backward: Vec<(usize, Vector3<f64>, f64)> = backward_tgt
            .par_iter()
            .filter_map(|&j| {
                let y = self.target[j];
                let nearest = source_index.nearest(&y)?;
                let x = moved[nearest.index].coords;
                Some((source_ids[nearest.index], x - y.coords, nearest.distance_sq))
            })
            .collect();

        let forward_mean = forward.iter().map(|f| f.2).sum::<f64>() / k as f64;
        let backward_mean = backward.iter().map(|b| b.2).sum::<f64>() / k as f64;
        let chamfer = forward_mean + backward_mean;

        let rotated_normal = rotation * self.source_normal;
        let alignment = self.target_normal.dot(&rotated_normal);
        let coplanarity = 1.0 - alignment.abs();
        let loss = (1.0 - self.weight) * chamfer + self.weight * coplanarity;

        // d(loss)/dx for every sampled pair is 2 (x - y) scaled by the mean.
        let coefficient = 2.0 * (1.0 - self.weight) / k as f64;
        let mut sum_g = Vector3::zeros();
        let mut grad_s = 0.0;
        let mut grad_rotation = Matrix3::zeros();
        for &(i, diff, _) in forward.iter().chain(backward.iter()) {
            let g = diff * coefficient;
            let p = self.source[i].coords;
            sum_g += g;
            grad_s += g.dot(&place(&self.source[i]));
            grad_rotation += g * p.transpose();
        }
        grad_rotation *= s;
        grad_rotation -= self.target_normal * self.source_normal.transpose()
            * (self.weight * alignment.signum());

        let grad_q_hat: [f64; 4] =
            std::array::from_fn(|c| grad_rotation.component_mul(&derivatives[c]).sum());

        // Chain through q_hat = q / (|q| + eps).
        let grad_q: [f64; 4] = std::array::from_fn(|i| {
            (0..4)
                .map(|j| {
                    let delta = if i == j { 1.0 / denom } else { 0.0 };
                    let outer = if norm > 0.0 {
                        state.q[i] * state.q[j] / (norm * denom * denom)
                    } else {
                        0.0
                    };
                    (delta - outer) * grad_q_hat[j]
                })
                .sum()
        });

        let grad_t = sum_g * s;
        Evaluation {
            loss,
            chamfer,
            coplanarity,
            grad_q,
            grad_t: grad_t.into(),
            grad_s: [grad_s],
        }
    }
}

fn dominant_normal(points: &[Point3<f64>], role: &'static str) -> HoldResult<Vector3<f64>> {
    if points.len() < 3 {
        return Err(HoldError::geometry(
            "registration",
            format!("{role} cloud needs at least 3 points for a plane fit, got {}", points.len()),
        ));
    }
    let (_, normal) = principal_normal(points);
    normal
        .try_normalize(f64::EPSILON)
        .ok_or_else(|| HoldError::geometry("registration", format!("{role} plane fit is degenerate")))
}

// ============================================================================
// Public API
// ============================================================================

/// Align `source` onto `target`.
///
/// Returns the best transform seen. A run that diverges or hits the
/// iteration cap while still improving is not an error; check
/// [`RegistrationStatus::is_success`] on the result.
pub fn register(
    source: &PointCloud,
    target: &PointCloud,
    params: &RegistrationParams,
) -> HoldResult<RegistrationResult> {
    params.validate()?;
    if source.is_empty() {
        return Err(HoldError::empty_cloud("registration source is empty"));
    }
    if target.is_empty() {
        return Err(HoldError::empty_cloud("registration target is empty"));
    }
    let _timer = OperationTimer::new("register");

    // Rotating the source plane fit by R equals fitting the rotated source.
    let objective = Objective {
        source: &source.points,
        target: &target.points,
        source_normal: dominant_normal(&source.points, "source")?,
        target_normal: dominant_normal(&target.points, "target")?,
        weight: params.coplanarity_weight,
        num_samples: params.num_samples,
    };

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut state = State::identity();
    let mut rotation_opt = Adam::<4>::new(params.lr_rotation);
    let mut translation_opt = Adam::<3>::new(params.lr_translation);
    let mut scale_opt = Adam::<1>::new(params.lr_scale);

    let mut best_loss = f64::INFINITY;
    let mut best_state = state;
    let mut best_terms = (f64::NAN, f64::NAN);
    let mut stale = 0;
    let mut iterations = 0;
    let mut status = None;
    let mut history = Vec::new();

    for iteration in 0..params.max_iterations {
        if stale >= params.patience {
            status = Some(RegistrationStatus::PatienceExhausted);
            break;
        }

        let eval = objective.evaluate(&state, &mut rng);
        iterations = iteration + 1;
        if !eval.loss.is_finite() {
            warn!(iteration, "Registration loss is not finite");
            status = Some(RegistrationStatus::Diverged);
            break;
        }

        let evaluated = state;
        rotation_opt.step(&mut state.q, &eval.grad_q);
        translation_opt.step(&mut state.t, &eval.grad_t);
        scale_opt.step(&mut state.s, &eval.grad_s);
        state.project(params.min_scale);

        if eval.loss < best_loss - params.min_improvement {
            best_loss = eval.loss;
            best_state = evaluated;
            best_terms = (eval.chamfer, eval.coplanarity);
            stale = 0;
        } else {
            stale += 1;
        }

        if iteration % 100 == 0 {
            debug!(
                iteration,
                loss = eval.loss,
                chamfer = eval.chamfer,
                coplanarity = eval.coplanarity,
                best_loss,
                "Registration step"
            );
        }
        if params.record_history {
            history.push(IterationRecord {
                iteration,
                loss: eval.loss,
                chamfer: eval.chamfer,
                coplanarity: eval.coplanarity,
                best_loss,
                transform: state.transform(),
                raw_quaternion: state.q,
            });
        }

        if best_loss <= params.convergence_tolerance {
            status = Some(RegistrationStatus::Converged);
            break;
        }
    }

    let status = status.unwrap_or(if stale >= params.patience {
        RegistrationStatus::PatienceExhausted
    } else {
        RegistrationStatus::IterationCapReached
    });

    let result = RegistrationResult {
        transform: best_state.transform(),
        loss: best_loss,
        chamfer: best_terms.0,
        coplanarity: best_terms.1,
        coplanarity_weight: params.coplanarity_weight,
        iterations,
        status,
        history,
    };

    if status.is_success() {
        info!(
            status = ?status,
            loss = result.loss,
            iterations,
            scale = result.transform.scale,
            "Registration finished"
        );
    } else {
        warn!(status = ?status, loss = result.loss, iterations, "Registration did not converge");
    }
    Ok(result)
}

/// Outcome of a coplanarity-weight sweep.
#[derive(Debug, Clone)]
pub struct WeightSweep {
    /// Lowest-loss trial.
    pub best: RegistrationResult,
    /// `(weight, loss, status)` per trial, in sweep order.
    pub trials: Vec<(f64, f64, RegistrationStatus)>,
}

/// Run [`register`] once per coplanarity weight and keep the lowest loss.
///
/// `params` supplies everything but the weight; [`RegistrationParams::for_sweep`]
/// is the usual choice.
pub fn tune_coplanarity_weight(
    source: &PointCloud,
    target: &PointCloud,
    weights: &[f64],
    params: &RegistrationParams,
) -> HoldResult<WeightSweep> {
    if weights.is_empty() {
        return Err(HoldError::invalid_parameter("weights", "sweep needs at least one weight"));
    }

    let mut best: Option<RegistrationResult> = None;
    let mut trials = Vec::with_capacity(weights.len());
    for &weight in weights {
        let trial_params = params.clone().with_coplanarity_weight(weight);
        let result = register(source, target, &trial_params)?;
        debug!(weight, loss = result.loss, status = ?result.status, "Sweep trial");
        trials.push((weight, result.loss, result.status));

        if best.as_ref().is_none_or(|b| result.loss < b.loss) {
            best = Some(result);
        }
    }

    let best = best.ok_or_else(|| HoldError::invalid_parameter("weights", "no trial ran"))?;
    info!(
        weight = best.coplanarity_weight,
        loss = best.loss,
        trials = trials.len(),
        "Best coplanarity weight"
    );
    Ok(WeightSweep { best, trials })
}

/// A registered scan written next to its source.
#[derive(Debug, Clone)]
pub struct RegisteredScan {
    pub output: PathBuf,
    pub result: RegistrationResult,
}

/// Register the scan at `source_path` onto `target_path` and write the
/// aligned source to `<stem>_moved.<ext>`.
///
/// With `sweep_weights`, runs [`tune_coplanarity_weight`] instead of a
/// single registration.
pub fn register_files(
    source_path: &Path,
    target_path: &Path,
    params: &RegistrationParams,
    sweep_weights: Option<&[f64]>,
) -> HoldResult<RegisteredScan> {
    let source = load_point_cloud(source_path)?;
    let target = load_point_cloud(target_path)?;

    let result = match sweep_weights {
        Some(weights) => tune_coplanarity_weight(&source, &target, weights, params)?.best,
        None => register(&source, &target, params)?,
    };

    let aligned = result.transform.transform_cloud(&source);
    let output = moved_path(source_path);
    save_point_cloud(&aligned, &output)?;
    info!(path = %output.display(), "Wrote aligned scan");

    Ok(RegisteredScan { output, result })
}
