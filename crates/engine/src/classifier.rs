//! Direction classifier
//!
//! A narrow `Classifier` contract (train on labelled feature vectors, predict a
//! label with a confidence), a logistic-regression implementation trained by
//! gradient descent, and the glue that turns a prediction plus indicator
//! trends into a combined signal.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Candle, Signal};

/// Number of features produced by `sample_features`
pub const FEATURE_COUNT: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Model has not been trained yet")]
    NotTrained,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Got {samples} samples but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },

    #[error("No usable training samples")]
    EmptyDataset,

    #[error("Training data contains a single class")]
    SingleClass,
}

/// Outcome of a prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Prediction {
    Predicted { label: Signal, confidence: f64 },
    Unavailable { reason: String },
}

impl Prediction {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Prediction::Unavailable {
            reason: reason.into(),
        }
    }

    /// The predicted label, or neutral when unavailable or below `threshold`
    pub fn signal_at(&self, threshold: f64) -> Signal {
        match self {
            Prediction::Predicted { label, confidence } if *confidence >= threshold => *label,
            _ => Signal::Neutral,
        }
    }
}

pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f64]) -> Prediction;
    fn train(&mut self, samples: &[Vec<f64>], labels: &[Signal]) -> Result<(), ClassifierError>;
    fn is_trained(&self) -> bool;
}

// ============================================================================
// Logistic regression
// ============================================================================

#[derive(Debug, Clone)]
struct FittedModel {
    weights: Array1<f64>,
    bias: f64,
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl FittedModel {
    fn probability_long(&self, features: &[f64]) -> f64 {
        let x = ArrayView1::from(features);
        let scaled = (&x - &self.means) / &self.scales;
        sigmoid(scaled.dot(&self.weights) + self.bias)
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Binary cross-entropy
fn log_loss(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    -y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / y_true.len() as f64
}

/// Column means and population standard deviations; flat columns scale by 1
fn fit_scaler(x: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let means = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let scales = x
        .std_axis(Axis(0), 0.0)
        .mapv(|sd| if sd > 1e-12 { sd } else { 1.0 });
    (means, scales)
}

/// Binary long/short logistic regression on z-scored features
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    learning_rate: f64,
    max_iter: usize,
    tolerance: f64,
    model: Option<FittedModel>,
}

impl Default for LogisticClassifier {
    fn default() -> Self {
        Self::new(0.1, 1000, 1e-7)
    }
}

impl LogisticClassifier {
    pub fn new(learning_rate: f64, max_iter: usize, tolerance: f64) -> Self {
        Self {
            learning_rate,
            max_iter,
            tolerance,
            model: None,
        }
    }

    /// Gradient descent on standardized rows; returns weights and bias
    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> (Array1<f64>, f64) {
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        let mut previous_loss = f64::MAX;

        for iter in 0..self.max_iter {
            let predictions = (x.dot(&weights) + bias).mapv(sigmoid);
            let loss = log_loss(y, &predictions);

            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n;
            weights = &weights - &(dw * self.learning_rate);
            bias -= self.learning_rate * errors.sum() / n;

            if (previous_loss - loss).abs() < self.tolerance {
                debug!(iterations = iter + 1, loss, "Classifier converged");
                break;
            }
            previous_loss = loss;
        }
        (weights, bias)
    }
}

impl Classifier for LogisticClassifier {
    fn predict(&self, features: &[f64]) -> Prediction {
        let Some(model) = &self.model else {
            return Prediction::unavailable(ClassifierError::NotTrained.to_string());
        };
        if features.len() != model.weights.len() {
            return Prediction::unavailable(
                ClassifierError::DimensionMismatch {
                    expected: model.weights.len(),
                    got: features.len(),
                }
                .to_string(),
            );
        }
        if features.iter().any(|x| !x.is_finite()) {
            return Prediction::unavailable("non-finite feature value");
        }

        let p = model.probability_long(features);
        let (label, confidence) = if p >= 0.5 {
            (Signal::Long, p)
        } else {
            (Signal::Short, 1.0 - p)
        };
        Prediction::Predicted { label, confidence }
    }

    /// Fit on long/short samples; neutral labels are ignored
    fn train(&mut self, samples: &[Vec<f64>], labels: &[Signal]) -> Result<(), ClassifierError> {
        if samples.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }

        let rows: Vec<(&Vec<f64>, f64)> = samples
            .iter()
            .zip(labels)
            .filter_map(|(s, label)| match label {
                Signal::Long => Some((s, 1.0)),
                Signal::Short => Some((s, 0.0)),
                Signal::Neutral => None,
            })
            .collect();

        let dims = rows.first().map(|(s, _)| s.len()).ok_or(ClassifierError::EmptyDataset)?;
        if dims == 0 {
            return Err(ClassifierError::EmptyDataset);
        }
        if let Some((s, _)) = rows.iter().find(|(s, _)| s.len() != dims) {
            return Err(ClassifierError::DimensionMismatch {
                expected: dims,
                got: s.len(),
            });
        }
        let positives = rows.iter().filter(|(_, y)| *y > 0.5).count();
        if positives == 0 || positives == rows.len() {
            return Err(ClassifierError::SingleClass);
        }

        let flat: Vec<f64> = rows.iter().flat_map(|(s, _)| s.iter().copied()).collect();
        let got = flat.len();
        let x = Array2::from_shape_vec((rows.len(), dims), flat).map_err(|_| {
            ClassifierError::DimensionMismatch {
                expected: rows.len() * dims,
                got,
            }
        })?;
        let y: Array1<f64> = rows.iter().map(|(_, y)| *y).collect();

        let (means, scales) = fit_scaler(&x);
        let scaled = (&x - &means) / &scales;
        let (weights, bias) = self.fit(&scaled, &y);

        info!(samples = rows.len(), features = dims, "Classifier trained");
        self.model = Some(FittedModel {
            weights,
            bias,
            means,
            scales,
        });
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}

// ============================================================================
// Features and samples
// ============================================================================

/// `[rsi, volume, macd - signal, obv]` for a bar, if its indicators are warm
pub fn sample_features(candle: &Candle) -> Option<Vec<f64>> {
    let ind = &candle.indicators;
    Some(vec![
        ind.rsi?,
        candle.volume,
        ind.macd_line? - ind.signal_line?,
        ind.obv?,
    ])
}

/// Label for the latest bar: long if it closed above the previous close
pub fn label_for(current: &Candle, previous: &Candle) -> Signal {
    if current.close > previous.close {
        Signal::Long
    } else {
        Signal::Short
    }
}

/// A labelled training sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub timestamp: i64,
    pub features: Vec<f64>,
    pub label: Signal,
}

/// Sample for the newest bar of an enriched series
pub fn latest_sample(candles: &[Candle]) -> Option<TrainingSample> {
    let [.., previous, current] = candles else {
        return None;
    };
    Some(TrainingSample {
        timestamp: current.timestamp,
        features: sample_features(current)?,
        label: label_for(current, previous),
    })
}

/// Undersample every label to the size of the smallest class, then shuffle
pub fn balance_samples(samples: Vec<TrainingSample>, rng: &mut impl Rng) -> Vec<TrainingSample> {
    let (mut longs, mut shorts): (Vec<_>, Vec<_>) = samples
        .into_iter()
        .filter(|s| !s.label.is_neutral())
        .partition(|s| s.label == Signal::Long);

    let keep = longs.len().min(shorts.len());
    longs.shuffle(rng);
    shorts.shuffle(rng);
    longs.truncate(keep);
    shorts.truncate(keep);

    let mut balanced = longs;
    balanced.extend(shorts);
    balanced.shuffle(rng);
    balanced
}

// ============================================================================
// Combined signal
// ============================================================================

/// Wraps a classifier with the confidence threshold used to trust it
pub struct MlAdvisor<C: Classifier> {
    classifier: C,
    confidence_threshold: f64,
}

impl<C: Classifier> MlAdvisor<C> {
    pub fn new(classifier: C, confidence_threshold: f64) -> Self {
        Self {
            classifier,
            confidence_threshold,
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Train from stored samples after class balancing
    pub fn train(
        &mut self,
        samples: Vec<TrainingSample>,
        rng: &mut impl Rng,
    ) -> Result<usize, ClassifierError> {
        let balanced = balance_samples(samples, rng);
        let (features, labels): (Vec<Vec<f64>>, Vec<Signal>) =
            balanced.into_iter().map(|s| (s.features, s.label)).unzip();
        self.classifier.train(&features, &labels)?;
        Ok(labels.len())
    }

    /// Raw prediction for the newest bar
    pub fn predict(&self, candle: &Candle) -> Prediction {
        if !self.classifier.is_trained() {
            return Prediction::unavailable(ClassifierError::NotTrained.to_string());
        }
        match sample_features(candle) {
            Some(features) => self.classifier.predict(&features),
            None => Prediction::unavailable("indicators not warm"),
        }
    }

    /// Prediction gated by the trend filters of the last two bars
    pub fn combined_signal(&self, candles: &[Candle]) -> (Prediction, Signal) {
        let [.., previous, current] = candles else {
            return (Prediction::unavailable("need two candles"), Signal::Neutral);
        };
        let prediction = self.predict(current);
        let sma_trend_up = matches!(
            (current.indicators.sma50, current.indicators.sma200),
            (Some(fast), Some(slow)) if fast > slow
        );
        let rsi_rising = matches!(
            (current.indicators.rsi, previous.indicators.rsi),
            (Some(now), Some(before)) if now > before
        );
        let signal = combine_signal(&prediction, self.confidence_threshold, sma_trend_up, rsi_rising);
        (prediction, signal)
    }
}

/// Long needs a confident long prediction and either trend up; short needs a
/// confident short prediction and either trend down
pub fn combine_signal(
    prediction: &Prediction,
    threshold: f64,
    sma_trend_up: bool,
    rsi_rising: bool,
) -> Signal {
    match prediction.signal_at(threshold) {
        Signal::Long if sma_trend_up || rsi_rising => Signal::Long,
        Signal::Short if !sma_trend_up || !rsi_rising => Signal::Short,
        _ => Signal::Neutral,
    }
}
