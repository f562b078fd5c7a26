pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One accelerometer reading in m/s². Arrival order is the only timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    x: f64,
    y: f64,
    z: f64,
}

impl Sample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn to_vector(&self) -> AccelVec {
        AccelVec::new(self.x, self.y, self.z)
    }
}

impl From<[f64; 3]> for Sample {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<AccelVec> for Sample {
    fn from(v: AccelVec) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Discrete activity label, ordered from least to most active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivityLevel {
    #[serde(rename = "resting")]
    Resting,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "highly active")]
    HighlyActive,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Resting => "resting",
            ActivityLevel::Active => "active",
            ActivityLevel::HighlyActive => "highly active",
        }
    }
}

impl Display for ActivityLevel {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one classification cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub activity: ActivityLevel,
    /// Mean dynamic acceleration magnitude over the window [m/s²]
    pub mean_acc: f64,
}
