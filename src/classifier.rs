use ndarray::{ArrayViewD, Ix1, Ix2};

use crate::error::{ClassifyError, ConfigError};
use crate::filters::{EstimatorConfig, LinearAccelKf};
use crate::sensors::VectorSource;
use crate::types::{AccelVec, ActivityLevel, Classification, Sample};

/// How gravity is removed before the magnitude is measured.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorMode {
    /// Samples are already gravity-free (on-sensor fusion output)
    RawFusion,
    /// Gravity is separated by the linear-acceleration Kalman filter
    AccelOnly(EstimatorConfig),
    /// Gravity is approximated by the window's mean vector. Cheap, stateless,
    /// and blind to any sustained acceleration.
    WindowMean,
}

impl SensorMode {
    /// Vector of a rich record that suits this mode
    pub fn vector_source(&self) -> VectorSource {
        match self {
            SensorMode::RawFusion => VectorSource::LinAccel,
            SensorMode::AccelOnly(_) | SensorMode::WindowMean => VectorSource::Accel,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorMode::RawFusion => "raw-fusion",
            SensorMode::AccelOnly(_) => "accel-only",
            SensorMode::WindowMean => "window-mean",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierConfig {
    pub mode: SensorMode,
    /// Below this mean magnitude the wearer is resting [m/s²]
    pub rest_threshold: f64,
    /// At or above this mean magnitude the wearer is highly active [m/s²]
    pub active_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: SensorMode::AccelOnly(EstimatorConfig::default()),
            rest_threshold: 1.0,
            active_threshold: 3.0,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("rest", self.rest_threshold), ("active", self.active_threshold)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold(format!(
                    "{} threshold must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.rest_threshold >= self.active_threshold {
            return Err(ConfigError::ThresholdOrder {
                rest: self.rest_threshold,
                active: self.active_threshold,
            });
        }
        if let SensorMode::AccelOnly(estimator) = &self.mode {
            estimator.validate()?;
        }
        Ok(())
    }
}

/// Window classifier. In accel-only mode it owns one estimator that is
/// created from the first window and kept until reset.
pub struct ActivityClassifier {
    config: ClassifierConfig,
    estimator: Option<LinearAccelKf>,
}

impl ActivityClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            estimator: None,
        })
    }

    pub fn mode(&self) -> &SensorMode {
        &self.config.mode
    }

    pub fn reset_estimator(&mut self) {
        if self.estimator.take().is_some() {
            log::info!("Activity estimator reset");
        }
    }

    pub fn estimator(&self) -> Option<&LinearAccelKf> {
        self.estimator.as_ref()
    }

    pub fn label_for(&self, mean_acc: f64) -> ActivityLevel {
        if mean_acc < self.config.rest_threshold {
            ActivityLevel::Resting
        } else if mean_acc < self.config.active_threshold {
            ActivityLevel::Active
        } else {
            ActivityLevel::HighlyActive
        }
    }

    pub fn classify(&mut self, window: &[Sample]) -> Result<Classification, ClassifyError> {
        if window.is_empty() {
            return Err(ClassifyError::EmptyWindow);
        }
        let vectors: Vec<AccelVec> = window.iter().map(Sample::to_vector).collect();

        let mean_acc = match &self.config.mode {
            SensorMode::RawFusion => mean_norm(&vectors),
            SensorMode::WindowMean => {
                let mean = vectors.iter().sum::<AccelVec>() / vectors.len() as f64;
                let dynamic: Vec<AccelVec> = vectors.iter().map(|v| v - mean).collect();
                mean_norm(&dynamic)
            }
            SensorMode::AccelOnly(estimator_config) => {
                let mut kf = match self.estimator.take() {
                    Some(kf) => kf,
                    None => {
                        // First window is assumed roughly stationary on average
                        let mut kf = LinearAccelKf::new(estimator_config.clone())?;
                        kf.initialize_gravity(&vectors)?;
                        log::info!(
                            "Activity estimator initialized from {} samples",
                            vectors.len()
                        );
                        kf
                    }
                };

                let mut dynamic = Vec::with_capacity(vectors.len());
                for z in &vectors {
                    let (_, linear) = kf.update(z)?;
                    dynamic.push(linear);
                }
                self.estimator = Some(kf);
                mean_norm(&dynamic)
            }
        };

        Ok(Classification {
            activity: self.label_for(mean_acc),
            mean_acc,
        })
    }

    /// Shape-checked entry point: a single 3-vector or an (N, 3) array.
    pub fn classify_array(&mut self, data: ArrayViewD<'_, f64>) -> Result<Classification, ClassifyError> {
        let shape = data.shape().to_vec();
        let invalid = || {
            ClassifyError::InvalidShape(format!(
                "expected a 3-vector or an (N, 3) array, got {:?}",
                shape
            ))
        };

        let window: Vec<Sample> = match data.ndim() {
            1 => {
                let v = data.into_dimensionality::<Ix1>().map_err(|_| invalid())?;
                if v.len() != 3 {
                    return Err(invalid());
                }
                vec![Sample::new(v[0], v[1], v[2])]
            }
            2 => {
                let m = data.into_dimensionality::<Ix2>().map_err(|_| invalid())?;
                if m.ncols() != 3 {
                    return Err(invalid());
                }
                m.outer_iter()
                    .map(|row| Sample::new(row[0], row[1], row[2]))
                    .collect()
            }
            _ => return Err(invalid()),
        };

        self.classify(&window)
    }
}

fn mean_norm(vectors: &[AccelVec]) -> f64 {
    let total: f64 = vectors.iter().map(|v| v.norm()).sum();
    total / vectors.len() as f64
}
