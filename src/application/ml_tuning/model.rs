//! Regressor wrapper over smartcore with a fixed 70/15/15 split.

use crate::domain::evaluation::{ModelScores, RegressorKind};
use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::LinearRegression;

const TRAIN_FRACTION: f64 = 0.70;
const VALIDATION_FRACTION: f64 = 0.15;

enum Fitted {
    Forest(RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>),
    Linear(LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>),
}

/// A trained regressor plus the split bookkeeping needed for importance
/// and sensitivity reporting.
pub struct TunedModel {
    fitted: Fitted,
    pub scores: ModelScores,
    pub feature_names: Vec<String>,
    validation_x: Vec<Vec<f64>>,
    validation_y: Vec<f64>,
}

impl TunedModel {
    /// Fit on a seeded shuffle of the samples: 70% train, 15% validation,
    /// 15% test. `production_ready` is left false here; the harness sets
    /// it after the out-of-sample check.
    pub fn fit(
        kind: RegressorKind,
        features: &[Vec<f64>],
        targets: &[f64],
        feature_names: Vec<String>,
        seed: u64,
    ) -> Result<Self> {
        if features.len() != targets.len() {
            bail!("feature/target length mismatch");
        }
        if features.len() < 20 {
            bail!("need at least 20 samples to fit, got {}", features.len());
        }

        let mut order: Vec<usize> = (0..features.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let train_end = (features.len() as f64 * TRAIN_FRACTION) as usize;
        let val_end = train_end
            + (features.len() as f64 * VALIDATION_FRACTION).max(1.0) as usize;

        let take = |indices: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            (
                indices.iter().map(|&i| features[i].clone()).collect(),
                indices.iter().map(|&i| targets[i]).collect(),
            )
        };
        let (train_x, train_y) = take(&order[..train_end]);
        let (val_x, val_y) = take(&order[train_end..val_end.min(order.len())]);
        let (test_x, test_y) = take(&order[val_end.min(order.len())..]);

        let train_matrix =
            DenseMatrix::from_2d_vec(&train_x).context("bad training matrix")?;

        let fitted = match kind {
            RegressorKind::RandomForest => {
                let params = RandomForestRegressorParameters::default()
                    .with_n_trees(64)
                    .with_seed(seed);
                Fitted::Forest(
                    RandomForestRegressor::fit(&train_matrix, &train_y, params)
                        .context("random forest fit failed")?,
                )
            }
            RegressorKind::Linear => Fitted::Linear(
                LinearRegression::fit(&train_matrix, &train_y, Default::default())
                    .context("linear fit failed")?,
            ),
        };

        let mut model = Self {
            fitted,
            scores: ModelScores {
                train_r2: 0.0,
                val_r2: 0.0,
                test_r2: 0.0,
                overfitting_gap: 0.0,
                production_ready: false,
            },
            feature_names,
            validation_x: val_x.clone(),
            validation_y: val_y.clone(),
        };

        model.scores.train_r2 = model.r2(&train_x, &train_y)?;
        model.scores.val_r2 = model.r2(&val_x, &val_y)?;
        model.scores.test_r2 = model.r2(&test_x, &test_y)?;
        model.scores.overfitting_gap = model.scores.train_r2 - model.scores.val_r2;

        Ok(model)
    }

    pub fn predict_one(&self, features: &[f64]) -> Result<f64> {
        let matrix = DenseMatrix::from_2d_vec(&vec![features.to_vec()])
            .context("bad feature row")?;
        let predictions = match &self.fitted {
            Fitted::Forest(m) => m.predict(&matrix).context("forest predict failed")?,
            Fitted::Linear(m) => m.predict(&matrix).context("linear predict failed")?,
        };
        predictions
            .first()
            .copied()
            .context("empty prediction batch")
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let matrix = DenseMatrix::from_2d_vec(&rows.to_vec()).context("bad feature matrix")?;
        match &self.fitted {
            Fitted::Forest(m) => m.predict(&matrix).context("forest predict failed"),
            Fitted::Linear(m) => m.predict(&matrix).context("linear predict failed"),
        }
    }

    fn r2(&self, x: &[Vec<f64>], y: &[f64]) -> Result<f64> {
        if y.len() < 2 {
            return Ok(0.0);
        }
        let predictions = self.predict_batch(x)?;
        Ok(r_squared(y, &predictions))
    }

    /// Permutation importance on the validation split: shuffle one column,
    /// measure the R² drop, repeat per feature. Deterministic via seed.
    pub fn permutation_importance(&self, seed: u64) -> Result<Vec<(String, f64)>> {
        if self.validation_x.len() < 2 {
            return Ok(self
                .feature_names
                .iter()
                .map(|n| (n.clone(), 0.0))
                .collect());
        }

        let baseline = r_squared(
            &self.validation_y,
            &self.predict_batch(&self.validation_x)?,
        );

        let mut importances = Vec::with_capacity(self.feature_names.len());
        for (column, name) in self.feature_names.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(column as u64));
            let mut shuffled: Vec<usize> = (0..self.validation_x.len()).collect();
            shuffled.shuffle(&mut rng);

            let permuted: Vec<Vec<f64>> = self
                .validation_x
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let mut row = row.clone();
                    row[column] = self.validation_x[shuffled[i]][column];
                    row
                })
                .collect();

            let degraded = r_squared(&self.validation_y, &self.predict_batch(&permuted)?);
            importances.push((name.clone(), (baseline - degraded).max(0.0)));
        }

        // Highest impact first
        importances.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(importances)
    }
}

/// Coefficient of determination.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.len() < 2 {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_total: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_total == 0.0 {
        return 0.0;
    }
    let ss_residual: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    1.0 - ss_residual / ss_total
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = 2·x0 − 3·x1 + noise-free: any regressor should fit well.
    fn linear_dataset(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let x0 = (i % 17) as f64;
                let x1 = (i % 7) as f64;
                vec![x0, x1]
            })
            .collect();
        let targets = features.iter().map(|f| 2.0 * f[0] - 3.0 * f[1]).collect();
        (features, targets)
    }

    #[test]
    fn test_r_squared_perfect_and_mean() {
        let actual = vec![1.0, 2.0, 3.0, 4.0];
        assert!((r_squared(&actual, &actual) - 1.0).abs() < 1e-12);
        let mean_pred = vec![2.5; 4];
        assert!(r_squared(&actual, &mean_pred).abs() < 1e-12);
    }

    #[test]
    fn test_linear_model_fits_linear_data() {
        let (x, y) = linear_dataset(60);
        let model = TunedModel::fit(
            RegressorKind::Linear,
            &x,
            &y,
            vec!["x0".to_string(), "x1".to_string()],
            13,
        )
        .unwrap();

        assert!(model.scores.train_r2 > 0.99);
        assert!(model.scores.val_r2 > 0.95);
        let p = model.predict_one(&[10.0, 2.0]).unwrap();
        assert!((p - 14.0).abs() < 1.0);
    }

    #[test]
    fn test_forest_fit_and_importance() {
        let (x, y) = linear_dataset(120);
        let model = TunedModel::fit(
            RegressorKind::RandomForest,
            &x,
            &y,
            vec!["x0".to_string(), "x1".to_string()],
            13,
        )
        .unwrap();

        assert!(model.scores.train_r2 > 0.8);
        let importance = model.permutation_importance(5).unwrap();
        assert_eq!(importance.len(), 2);
        assert!(importance.iter().all(|(_, v)| *v >= 0.0));
    }

    #[test]
    fn test_too_few_samples_rejected() {
        let (x, y) = linear_dataset(10);
        assert!(TunedModel::fit(
            RegressorKind::Linear,
            &x,
            &y,
            vec!["x0".to_string(), "x1".to_string()],
            1,
        )
        .is_err());
    }
}
