use std::path::PathBuf;
use thiserror::Error;

/// Transformer configuration: extractor tuning, vocabulary size and k-means settings.
pub mod config;
pub use config::{Config, ExtractorParams, KMeansParams};

/// The keypoint descriptor extractor seam.
pub mod extract;
pub use extract::Extractor;

/// Flat visual vocabulary learned with k-means, which provides
/// the quantization step of the bag-of-features pipeline.
pub mod vocab;
pub use vocab::Vocabulary;

/// The bag-of-features transformer (fit / transform / fit_transform).
pub mod transformer;
pub use transformer::BagOfFeatures;

/// Utilities for extracting SIFT descriptors using opencv.
#[cfg(feature = "opencv")]
pub mod opencv_utils;
#[cfg(feature = "opencv")]
pub use opencv_utils::*;

/// Length of a SIFT descriptor.
pub const DESC_LEN: usize = 128;

/// Supported descriptor type is a 128-dimensional float vector, as produced by SIFT.
pub type Desc = [f32; DESC_LEN];

/// Bag-of-features representation of an image.
///
/// Index: word id in the vocabulary.
///
/// Value: number of the image's descriptors assigned to that word.
pub type Histogram = Vec<u32>;

/// Row-stacked histograms, one row per input image, in input order.
pub type FeatureMatrix = Vec<Histogram>;

/// Provides helpers for comparing and normalizing histograms.
pub trait HistogramTrait {
    /// Total number of descriptors counted in the histogram.
    fn total(&self) -> u64;
    /// L1 normalized copy. An empty histogram stays all zeros.
    fn l1_normalized(&self) -> Vec<f32>;
    /// Similarity of the normalized histograms, `1 - 0.5 * |a - b|_1`.
    fn l1(&self, other: &Self) -> f32;
}

impl HistogramTrait for Histogram {
    fn total(&self) -> u64 {
        self.iter().map(|&c| c as u64).sum()
    }

    fn l1_normalized(&self) -> Vec<f32> {
        let sum = self.total();
        if sum == 0 {
            return vec![0.; self.len()];
        }
        let inv_sum = 1. / sum as f32;
        self.iter().map(|&c| c as f32 * inv_sum).collect()
    }

    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .l1_normalized()
                .iter()
                .zip(other.l1_normalized())
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }
}

pub type BofResult<T> = std::result::Result<T, BofErr>;

#[derive(Error, Debug)]
pub enum BofErr {
    #[error("Insufficient data: {descriptors} descriptors cannot form {k} clusters")]
    InsufficientData { descriptors: usize, k: usize },
    #[error("Transformer is not fitted")]
    NotFitted,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Descriptor extraction failed")]
    Extractor(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Vocabulary Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Error")]
    OpenCvInternal(#[from] opencv::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Descriptor decode error")]
    OpenCvDecode,
    #[error("Could not load image {0:?}")]
    ImageLoad(PathBuf),
}
