use log::info;
use std::borrow::Borrow;

use crate::extract::{extract_all, pool};
use crate::*;

/// Fitted state: the extractor created at fit time and the vocabulary learned with it.
struct Fitted<E> {
    extractor: E,
    vocab: Vocabulary,
}

/// Bag-of-features transformer.
///
/// Learns a visual vocabulary from the descriptors of a batch of images and
/// maps every image to a fixed-size histogram of word counts:
///
/// ```text
/// images -> Extractor -> descriptor pool -> Vocabulary (k-means) -> histograms
/// ```
///
/// A transformer starts unfitted. `fit` or `fit_transform` move it to the
/// fitted state, re-fitting replaces the extractor and vocabulary, and
/// `transform` is only valid once fitted.
pub struct BagOfFeatures<E: Extractor> {
    config: Config,
    fitted: Option<Fitted<E>>,
}

impl<E: Extractor> BagOfFeatures<E> {
    /// Create an unfitted transformer. Fails if the configuration is invalid.
    pub fn new(config: Config) -> BofResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fitted: None,
        })
    }

    /// Default configuration with a vocabulary of `k` words.
    pub fn with_vocabulary_size(k: usize) -> BofResult<Self> {
        Self::new(Config::default().with_vocabulary_size(k))
    }

    /// Learn the vocabulary from the descriptors of `images`.
    ///
    /// Any previous fit is discarded on success and kept on failure.
    pub fn fit<I: Borrow<E::Image>>(&mut self, images: &[I]) -> BofResult<()> {
        let extractor = E::create(&self.config.extractor)?;
        let descriptors = extract_all(&extractor, images)?;
        self.learn(extractor, &descriptors)
    }

    /// Map every image to its histogram over the fitted vocabulary, in input order.
    ///
    /// Descriptors are computed with the extractor instance created by the last fit.
    pub fn transform<I: Borrow<E::Image>>(&self, images: &[I]) -> BofResult<FeatureMatrix> {
        let fitted = self.fitted.as_ref().ok_or(BofErr::NotFitted)?;
        let descriptors = extract_all(&fitted.extractor, images)?;
        Ok(Self::histograms(&fitted.vocab, &descriptors))
    }

    /// Fit on `images` and return their histograms. Each image is run
    /// through the extractor once, where `fit` + `transform` would do it twice.
    pub fn fit_transform<I: Borrow<E::Image>>(
        &mut self,
        images: &[I],
    ) -> BofResult<FeatureMatrix> {
        let extractor = E::create(&self.config.extractor)?;
        let descriptors = extract_all(&extractor, images)?;
        self.learn(extractor, &descriptors)?;
        let fitted = self.fitted.as_ref().ok_or(BofErr::NotFitted)?;
        Ok(Self::histograms(&fitted.vocab, &descriptors))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.fitted.as_ref().map(|f| &f.vocab)
    }

    pub fn extractor(&self) -> Option<&E> {
        self.fitted.as_ref().map(|f| &f.extractor)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vocabulary_size(&self) -> usize {
        self.config.vocabulary_size
    }

    fn learn(&mut self, extractor: E, descriptors: &[Vec<Desc>]) -> BofResult<()> {
        let features = pool(descriptors);
        info!(
            "Fitting vocabulary: {} images, {} descriptors, k = {}",
            descriptors.len(),
            features.len(),
            self.config.vocabulary_size
        );
        let vocab = Vocabulary::create(
            &features,
            self.config.vocabulary_size,
            &self.config.kmeans,
        )?;
        info!("Fitted {:?}", vocab);
        self.fitted = Some(Fitted { extractor, vocab });
        Ok(())
    }

    fn histograms(vocab: &Vocabulary, descriptors: &[Vec<Desc>]) -> FeatureMatrix {
        descriptors.iter().map(|d| vocab.transform(d)).collect()
    }
}
