//! Constant-velocity Kalman filter over (cx, cy, aspect, height) box state.

use nalgebra::{SMatrix, SVector};

pub type StateMean = SVector<f64, 8>;
pub type StateCovariance = SMatrix<f64, 8, 8>;
pub type Measurement = SVector<f64, 4>;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: SMatrix<f64, 8, 8>,
    update_mat: SMatrix<f64, 4, 8>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = SMatrix::<f64, 8, 8>::identity();
        for i in 0..4 {
            motion_mat[(i, 4 + i)] = 1.0;
        }

        let mut update_mat = SMatrix::<f64, 4, 8>::zeros();
        for i in 0..4 {
            update_mat[(i, i)] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Create a track state from an unassociated measurement
    pub fn initiate(&self, measurement: Measurement) -> (StateMean, StateCovariance) {
        let mut mean = StateMean::zeros();
        mean.fixed_rows_mut::<4>(0).copy_from(&measurement);

        let h = measurement[3];
        let pos = self.std_weight_position * h;
        let vel = self.std_weight_velocity * h;
        let std = [
            2.0 * pos,
            2.0 * pos,
            1e-2,
            2.0 * pos,
            10.0 * vel,
            10.0 * vel,
            1e-5,
            10.0 * vel,
        ];

        (mean, diagonal(&std))
    }

    pub fn predict(&self, mean: &StateMean, covariance: &StateCovariance) -> (StateMean, StateCovariance) {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let vel = self.std_weight_velocity * h;
        let motion_cov = diagonal(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        let mean = self.motion_mat * mean;
        let covariance = self.motion_mat * covariance * self.motion_mat.transpose() + motion_cov;
        (mean, covariance)
    }

    fn project(&self, mean: &StateMean, covariance: &StateCovariance) -> (Measurement, SMatrix<f64, 4, 4>) {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let std = [pos, pos, 1e-1, pos];
        let mut innovation_cov = SMatrix::<f64, 4, 4>::zeros();
        for (i, s) in std.iter().enumerate() {
            innovation_cov[(i, i)] = s * s;
        }

        let projected_mean = self.update_mat * mean;
        let projected_cov = self.update_mat * covariance * self.update_mat.transpose() + innovation_cov;
        (projected_mean, projected_cov)
    }

    /// Correct the state with an associated measurement
    ///
    /// A degenerate innovation covariance leaves the state untouched.
    pub fn update(
        &self,
        mean: &StateMean,
        covariance: &StateCovariance,
        measurement: Measurement,
    ) -> (StateMean, StateCovariance) {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let Some(cov_inv) = projected_cov.try_inverse() else {
            return (*mean, *covariance);
        };

        let kalman_gain = covariance * self.update_mat.transpose() * cov_inv;
        let innovation = measurement - projected_mean;

        let mean = mean + kalman_gain * innovation;
        let covariance = covariance - kalman_gain * projected_cov * kalman_gain.transpose();
        (mean, covariance)
    }
}

fn diagonal(std: &[f64; 8]) -> StateCovariance {
    let mut cov = StateCovariance::zeros();
    for (i, s) in std.iter().enumerate() {
        cov[(i, i)] = s * s;
    }
    cov
}
