//! Output-layer error terms.
//!
//! Every function returns `g = -dE/dnet`, so weights move by `+rate · g · a_prev`.

use crate::config::Loss;
use crate::error::{NNError, Result};

/// Softmax unit with target indicator `t` and predicted probability `y`.
///
/// dy/dnet = (1-y)·y, except for cross-entropy where it cancels.
pub fn classification_error(loss: Loss, t: f32, y: f32) -> Result<f32> {
    let g = match loss {
        Loss::CrossEntropy => t - y,
        // -dL/dy = 2t-1
        Loss::Absolute => (2.0 * t - 1.0) * (1.0 - y) * y,
        Loss::MeanSquare => (t - y) * (1.0 - y) * y,
        Loss::Huber => {
            let dl = if t == 0.0 {
                // L = 2y^2 below 0.5, 2y - 0.5 above
                if y < 0.5 {
                    -4.0 * y
                } else {
                    -2.0
                }
            } else if y > 0.5 {
                4.0 * (1.0 - y)
            } else {
                2.0
            };
            dl * (1.0 - y) * y
        }
    };
    Ok(g)
}

/// Linear unit: dy/dnet = 1, so g is just -dE/dy.
pub fn regression_error(loss: Loss, t: f32, y: f32) -> Result<f32> {
    match loss {
        Loss::CrossEntropy => Err(NNError::NotImplemented(
            "loss CrossEntropy for regression".to_string(),
        )),
        loss => Ok(reconstruction(loss, t, y)),
    }
}

/// Reconstruction error of an autoencoder output unit against its input.
pub fn autoencoder_error(loss: Loss, t: f32, y: f32) -> Result<f32> {
    match loss {
        Loss::CrossEntropy => Err(NNError::NotImplemented(
            "loss CrossEntropy for autoencoder".to_string(),
        )),
        loss => Ok(reconstruction(loss, t, y)),
    }
}

fn reconstruction(loss: Loss, t: f32, y: f32) -> f32 {
    match loss {
        Loss::Absolute => {
            if y > t {
                -1.0
            } else {
                1.0
            }
        }
        // L = (y-t)^2 for |y-t| < 1, 2|y-t| - 1 otherwise
        Loss::Huber => {
            if (y - t).abs() < 1.0 {
                t - y
            } else if y >= t + 1.0 {
                -2.0
            } else {
                2.0
            }
        }
        Loss::MeanSquare | Loss::CrossEntropy => t - y,
    }
}

/// Loss value of a single prediction, used for reporting only.
pub fn loss_value(loss: Loss, t: f32, y: f32) -> f32 {
    let d = (y - t).abs();
    match loss {
        Loss::MeanSquare => d * d,
        Loss::Absolute => d,
        Loss::Huber => {
            if d < 1.0 {
                d * d
            } else {
                2.0 * d - 1.0
            }
        }
        Loss::CrossEntropy => {
            if t > 0.0 {
                -t * y.max(1e-15).ln()
            } else {
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huber_regression_regimes() {
        assert_eq!(regression_error(Loss::Huber, 0.0, 2.0).unwrap(), -2.0);
        assert_eq!(regression_error(Loss::Huber, 0.0, 0.5).unwrap(), -0.5);
        assert_eq!(regression_error(Loss::Huber, 0.0, -3.0).unwrap(), 2.0);
        assert_eq!(regression_error(Loss::Huber, 1.0, 2.0).unwrap(), -2.0);
    }

    #[test]
    fn test_regression_table() {
        assert_eq!(regression_error(Loss::MeanSquare, 1.0, 0.25).unwrap(), 0.75);
        assert_eq!(regression_error(Loss::Absolute, 1.0, 3.0).unwrap(), -1.0);
        assert_eq!(regression_error(Loss::Absolute, 1.0, 1.0).unwrap(), 1.0);
        assert!(matches!(
            regression_error(Loss::CrossEntropy, 1.0, 0.0),
            Err(NNError::NotImplemented(_))
        ));
        assert!(autoencoder_error(Loss::CrossEntropy, 1.0, 0.0).is_err());
        assert_eq!(autoencoder_error(Loss::MeanSquare, 0.0, 0.5).unwrap(), -0.5);
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classification_error(Loss::CrossEntropy, 1.0, 0.75).unwrap(), 0.25);
        assert_eq!(classification_error(Loss::CrossEntropy, 0.0, 0.25).unwrap(), -0.25);
        // (t-y)(1-y)y
        assert_eq!(classification_error(Loss::MeanSquare, 1.0, 0.5).unwrap(), 0.125);
        // (2t-1)(1-y)y
        assert_eq!(classification_error(Loss::Absolute, 0.0, 0.5).unwrap(), -0.25);
        // t=0, y<0.5: -4y (1-y)y
        assert_eq!(classification_error(Loss::Huber, 0.0, 0.25).unwrap(), -1.0 * 0.75 * 0.25);
        // t=1, y<=0.5: 2 (1-y)y
        assert_eq!(classification_error(Loss::Huber, 1.0, 0.5).unwrap(), 0.5);
    }

    #[test]
    fn test_signs_point_towards_target() {
        for loss in [Loss::MeanSquare, Loss::Absolute, Loss::CrossEntropy, Loss::Huber] {
            assert!(classification_error(loss, 1.0, 0.3).unwrap() > 0.0);
            assert!(classification_error(loss, 0.0, 0.3).unwrap() < 0.0);
        }
    }

    #[test]
    fn test_loss_values() {
        assert_eq!(loss_value(Loss::MeanSquare, 1.0, 3.0), 4.0);
        assert_eq!(loss_value(Loss::Huber, 1.0, 3.0), 3.0);
        assert_eq!(loss_value(Loss::Absolute, 1.0, 3.0), 2.0);
        assert_eq!(loss_value(Loss::CrossEntropy, 0.0, 0.3), 0.0);
    }
}
