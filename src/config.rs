use serde::{Deserialize, Serialize};

use crate::{BofErr, BofResult};

/// Tuning parameters handed to the descriptor extractor.
///
/// Defaults match the usual SIFT settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExtractorParams {
    /// Maximum number of keypoints kept per image. 0 means unbounded.
    pub max_features: u32,
    /// Number of layers in each octave of the scale pyramid.
    pub octave_layers: u32,
    /// Keypoints in low-contrast regions below this threshold are rejected.
    pub contrast_threshold: f64,
    /// Keypoints with an edge response above this threshold are rejected.
    pub edge_threshold: f64,
    /// Sigma of the Gaussian applied to the input image at octave 0.
    pub sigma: f64,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            max_features: 0,
            octave_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.,
            sigma: 1.6,
        }
    }
}

/// Settings of the k-means run that learns the vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KMeansParams {
    pub max_iter: usize,
    /// Converged once the summed squared centroid shift of an iteration falls
    /// below `tol` times the mean per-dimension variance of the pool.
    pub tol: f32,
    /// Number of k-means++ restarts. The run with the lowest inertia is kept.
    pub n_init: usize,
    /// Fixed seed for reproducible vocabularies. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            seed: None,
        }
    }
}

/// Complete configuration of a [`BagOfFeatures`](crate::BagOfFeatures) transformer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub extractor: ExtractorParams,
    /// Number of visual words, i.e. the histogram length.
    pub vocabulary_size: usize,
    pub kmeans: KMeansParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extractor: ExtractorParams::default(),
            vocabulary_size: 5,
            kmeans: KMeansParams::default(),
        }
    }
}

impl Config {
    pub fn with_vocabulary_size(mut self, k: usize) -> Self {
        self.vocabulary_size = k;
        self
    }

    pub fn with_max_features(mut self, n: u32) -> Self {
        self.extractor.max_features = n;
        self
    }

    pub fn with_octave_layers(mut self, n: u32) -> Self {
        self.extractor.octave_layers = n;
        self
    }

    pub fn with_contrast_threshold(mut self, t: f64) -> Self {
        self.extractor.contrast_threshold = t;
        self
    }

    pub fn with_edge_threshold(mut self, t: f64) -> Self {
        self.extractor.edge_threshold = t;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.extractor.sigma = sigma;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.kmeans.seed = Some(seed);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.kmeans.max_iter = max_iter;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.kmeans.n_init = n_init;
        self
    }

    /// Reject settings no extractor or k-means run can work with.
    pub fn validate(&self) -> BofResult<()> {
        if self.vocabulary_size == 0 {
            return Err(BofErr::InvalidConfig(
                "vocabulary_size must be at least 1".into(),
            ));
        }
        if i32::try_from(self.extractor.max_features).is_err() {
            return Err(BofErr::InvalidConfig(format!(
                "max_features must fit in an i32, got {}",
                self.extractor.max_features
            )));
        }
        if self.extractor.octave_layers == 0 || i32::try_from(self.extractor.octave_layers).is_err()
        {
            return Err(BofErr::InvalidConfig(
                "octave_layers must be between 1 and i32::MAX".into(),
            ));
        }
        if !(self.extractor.sigma > 0.) {
            return Err(BofErr::InvalidConfig(format!(
                "sigma must be positive, got {}",
                self.extractor.sigma
            )));
        }
        if self.kmeans.max_iter == 0 {
            return Err(BofErr::InvalidConfig("max_iter must be at least 1".into()));
        }
        if self.kmeans.n_init == 0 {
            return Err(BofErr::InvalidConfig("n_init must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.vocabulary_size, 5);
        assert_eq!(c.extractor.max_features, 0);
        assert_eq!(c.extractor.octave_layers, 3);
        assert_eq!(c.extractor.contrast_threshold, 0.04);
        assert_eq!(c.extractor.edge_threshold, 10.);
        assert_eq!(c.extractor.sigma, 1.6);
        assert!(c.kmeans.seed.is_none());
        assert_eq!(c.kmeans.n_init, 10);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let c = Config::default()
            .with_vocabulary_size(12)
            .with_max_features(500)
            .with_sigma(2.)
            .with_seed(7);
        assert_eq!(c.vocabulary_size, 12);
        assert_eq!(c.extractor.max_features, 500);
        assert_eq!(c.extractor.sigma, 2.);
        assert_eq!(c.kmeans.seed, Some(7));
    }

    #[test]
    fn rejects_bad_values() {
        for c in [
            Config::default().with_vocabulary_size(0),
            Config::default().with_octave_layers(0),
            Config::default().with_sigma(0.),
            Config::default().with_sigma(f64::NAN),
            Config::default().with_max_iter(0),
            Config::default().with_n_init(0),
            Config::default().with_max_features(u32::MAX),
            Config::default().with_max_features(i32::MAX as u32 + 1),
            Config::default().with_octave_layers(u32::MAX),
        ] {
            assert!(matches!(c.validate(), Err(BofErr::InvalidConfig(_))));
        }
    }

    #[test]
    fn accepts_largest_max_features() {
        let c = Config::default().with_max_features(i32::MAX as u32);
        assert!(c.validate().is_ok());
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn serde_round_trip() {
        let c = Config::default().with_vocabulary_size(9).with_seed(3);
        let bytes = bincode::serialize(&c).unwrap();
        let back: Config = bincode::deserialize(&bytes).unwrap();
        assert_eq!(c, back);
    }
}
