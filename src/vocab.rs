#[cfg(feature = "bincode")]
use bincode;
use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::*;

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Flat feature vocabulary built from a pool of image keypoint descriptors. Can be:
/// 1. Created with k-means from a descriptor pool.
/// 2. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
/// 3. Used to transform a new set of descriptors into a histogram over its words.
pub struct Vocabulary {
    /// Row-major `k x DESC_LEN` centroid matrix.
    centroids: Vec<f32>,
    cluster_size: Vec<usize>,
    /// Sum of squared distances of the training features to their word.
    inertia: f64,
    k: usize,
}

/// Vocabulary API
impl Vocabulary {
    /// Build a vocabulary of `k` words from a pool of descriptors.
    ///
    /// Fails with [`BofErr::InsufficientData`] when the pool holds fewer than `k` descriptors.
    pub fn create(features: &[Desc], k: usize, params: &KMeansParams) -> BofResult<Self> {
        if k == 0 {
            return Err(BofErr::InvalidConfig(
                "vocabulary_size must be at least 1".into(),
            ));
        }
        if features.is_empty() || features.len() < k {
            return Err(BofErr::InsufficientData {
                descriptors: features.len(),
                k,
            });
        }
        if params.max_iter == 0 || params.n_init == 0 {
            return Err(BofErr::InvalidConfig(
                "max_iter and n_init must be at least 1".into(),
            ));
        }
        // shift threshold relative to the spread of the pool
        let tol = params.tol as f64 * mean_variance(features);
        info!(
            "KMeans with {} features, k = {}, n_init = {}, tol = {:e}, seed = {:?}",
            features.len(),
            k,
            params.n_init,
            tol,
            params.seed
        );

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut best: Option<Self> = None;
        for run in 0..params.n_init {
            let mut v = Self {
                centroids: Self::initialize_clusters(features, k, &mut rng),
                cluster_size: vec![0; k],
                inertia: 0.,
                k,
            };
            v.cluster(features, params.max_iter, tol);
            debug!("KMeans run {}: inertia {}", run, v.inertia);
            if best.as_ref().map_or(true, |b| v.inertia < b.inertia) {
                best = Some(v);
            }
        }
        best.ok_or_else(|| BofErr::InvalidConfig("n_init must be at least 1".into()))
    }

    /// Index of the word nearest to `feature` (squared Euclidean, ties go to the lower index).
    pub fn quantize(&self, feature: &Desc) -> usize {
        let mut best: (usize, f32) = (0, f32::INFINITY);
        for (j, c) in self.centroids().enumerate() {
            let d = sq_dist(feature, c);
            if d < best.1 {
                best = (j, d);
            }
        }
        best.0
    }

    /// Transform a set of descriptors into its count histogram with respect to the
    /// Vocabulary. Words matched by no descriptor count 0, so the result always has
    /// `len()` entries.
    pub fn transform(&self, features: &[Desc]) -> Histogram {
        let mut hist: Histogram = vec![0; self.k];
        for feature in features {
            hist[self.quantize(feature)] += 1;
        }
        hist
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.k
    }

    pub fn is_empty(&self) -> bool {
        self.k == 0
    }

    pub fn centroid(&self, word: usize) -> Option<&[f32]> {
        self.centroids.chunks_exact(DESC_LEN).nth(word)
    }

    pub fn centroids(&self) -> impl Iterator<Item = &[f32]> {
        self.centroids.chunks_exact(DESC_LEN)
    }

    /// Sum of squared distances of the training descriptors to their word.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Number of training descriptors assigned to each word.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_size
    }

    /// Load a vocabulary from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BofResult<Self> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        let voc: Self = bincode::deserialize(&buffer)?;
        if voc.k == 0
            || voc.centroids.len() != voc.k * DESC_LEN
            || voc.cluster_size.len() != voc.k
        {
            return Err(BofErr::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "vocabulary shape mismatch",
            )));
        }
        Ok(voc)
    }

    /// Save vocabulary to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BofResult<()> {
        let serialized = bincode::serialize(&self)?;
        let mut file = std::fs::File::create(file)?;
        std::io::Write::write_all(&mut file, &serialized)?;
        Ok(())
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

impl Vocabulary {
    /// Lloyd iterations, starting from the seeded centroids.
    fn cluster(&mut self, features: &[Desc], max_iter: usize, tol: f64) {
        let mut labels = vec![0usize; features.len()];
        let mut converged = false;

        for iter in 0..max_iter {
            for (i, f) in features.iter().enumerate() {
                labels[i] = self.quantize(f);
            }

            // update clusters
            let mut sums = vec![0f64; self.k * DESC_LEN];
            let mut counts = vec![0usize; self.k];
            for (f, &l) in features.iter().zip(&labels) {
                counts[l] += 1;
                for (s, &x) in sums[l * DESC_LEN..(l + 1) * DESC_LEN].iter_mut().zip(f) {
                    *s += x as f64;
                }
            }

            let mut shift: f64 = 0.;
            for (j, &n) in counts.iter().enumerate() {
                // an emptied cluster keeps its centroid
                if n == 0 {
                    continue;
                }
                let inv = 1. / n as f64;
                let mut moved: f64 = 0.;
                let row = &mut self.centroids[j * DESC_LEN..(j + 1) * DESC_LEN];
                for (c, &s) in row.iter_mut().zip(&sums[j * DESC_LEN..(j + 1) * DESC_LEN]) {
                    let new = (s * inv) as f32;
                    moved += ((new - *c) as f64).powi(2);
                    *c = new;
                }
                shift += moved;
            }
            debug!("KMeans iteration {}: total centroid shift {}", iter, shift);

            if shift <= tol {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!("KMeans did not converge within {} iterations", max_iter);
        }

        let mut inertia = 0f64;
        self.cluster_size = vec![0; self.k];
        for f in features {
            let j = self.quantize(f);
            self.cluster_size[j] += 1;
            inertia += sq_dist(f, &self.centroids[j * DESC_LEN..(j + 1) * DESC_LEN]) as f64;
        }
        self.inertia = inertia;
    }

    /// Initialize clusters for kmeans with k-means++ seeding.
    fn initialize_clusters<R: Rng>(features: &[Desc], k: usize, rng: &mut R) -> Vec<f32> {
        let mut clusters: Vec<f32> = Vec::with_capacity(k * DESC_LEN);
        let first = &features[rng.gen_range(0..features.len())];
        clusters.extend_from_slice(first);
        let mut dist: Vec<f32> = features.iter().map(|f| sq_dist(f, first)).collect();

        for _ in 1..k {
            let total: f64 = dist.iter().map(|&d| d as f64).sum();
            let next = if total > 0. {
                // sample proportional to squared distance from the chosen centroids
                let mut target = rng.gen::<f64>() * total;
                let mut pick = None;
                for (i, &d) in dist.iter().enumerate() {
                    target -= d as f64;
                    if target < 0. && d > 0. {
                        pick = Some(i);
                        break;
                    }
                }
                pick.or_else(|| dist.iter().rposition(|&d| d > 0.))
                    .unwrap_or(0)
            } else {
                // every feature coincides with a chosen centroid
                rng.gen_range(0..features.len())
            };

            let chosen = &features[next];
            clusters.extend_from_slice(chosen);
            for (d, f) in dist.iter_mut().zip(features) {
                *d = d.min(sq_dist(f, chosen));
            }
        }
        clusters
    }
}

/// Mean over dimensions of the per-dimension variance of `features`.
fn mean_variance(features: &[Desc]) -> f64 {
    let n = features.len() as f64;
    let mut mean = [0f64; DESC_LEN];
    for f in features {
        for (m, &x) in mean.iter_mut().zip(f) {
            *m += x as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }
    let mut var = 0f64;
    for f in features {
        for (m, &x) in mean.iter().zip(f) {
            var += (x as f64 - m).powi(2);
        }
    }
    var / (n * DESC_LEN as f64)
}

#[inline]
/// Squared Euclidean distance between two descriptors.
fn sq_dist(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).fold(0., |a, (b, c)| a + (b - c) * (b - c))
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sum = self.cluster_size.iter().sum::<usize>();
        f.debug_struct("Vocabulary")
            .field("Words", &self.k)
            .field("Descriptor Length", &DESC_LEN)
            .field("Total Training Features", &sum)
            .field(
                "Min Word Cluster Size",
                &self.cluster_size.iter().min().copied().unwrap_or(0),
            )
            .field(
                "Max Word Cluster Size",
                &self.cluster_size.iter().max().copied().unwrap_or(0),
            )
            .field("Mean Word Cluster Size", &(sum / self.k.max(1)))
            .field("Inertia", &self.inertia)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(i: usize) -> Desc {
        let mut d = [0.; DESC_LEN];
        d[i] = 1.;
        d
    }

    fn seeded(seed: u64) -> KMeansParams {
        KMeansParams {
            seed: Some(seed),
            ..KMeansParams::default()
        }
    }

    /// Two tight blobs around 0 and 10 in the first dimension.
    fn blobs() -> Vec<Desc> {
        let mut features = Vec::new();
        for i in 0..20 {
            let mut d = [0.; DESC_LEN];
            d[0] = if i % 2 == 0 { 0. } else { 10. } + (i as f32) * 0.01;
            features.push(d);
        }
        features
    }

    #[test]
    fn recovers_distinct_vectors() {
        let features = vec![unit(0), unit(0), unit(1), unit(2)];
        let voc = Vocabulary::create(&features, 3, &seeded(1)).unwrap();
        assert_eq!(voc.len(), 3);

        let words: Vec<usize> = (0..3).map(|i| voc.quantize(&unit(i))).collect();
        let mut sorted = words.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
        for (i, &w) in words.iter().enumerate() {
            assert_eq!(voc.centroid(w).unwrap(), &unit(i)[..]);
        }
        let mut sizes = voc.cluster_sizes().to_vec();
        sizes.sort();
        assert_eq!(sizes, vec![1, 1, 2]);
    }

    #[test]
    fn separates_blobs() {
        let voc = Vocabulary::create(&blobs(), 2, &seeded(42)).unwrap();
        let mut low = [0.; DESC_LEN];
        let mut high = [0.; DESC_LEN];
        high[0] = 10.;
        low[0] = 0.05;
        assert_ne!(voc.quantize(&low), voc.quantize(&high));
        assert_eq!(voc.cluster_sizes().iter().sum::<usize>(), 20);
    }

    /// Partition of `features` as word labels renumbered by first appearance.
    fn partition(voc: &Vocabulary, features: &[Desc]) -> Vec<usize> {
        let mut seen: Vec<usize> = Vec::new();
        features
            .iter()
            .map(|f| {
                let w = voc.quantize(f);
                match seen.iter().position(|&s| s == w) {
                    Some(p) => p,
                    None => {
                        seen.push(w);
                        seen.len() - 1
                    }
                }
            })
            .collect()
    }

    #[test]
    fn partition_does_not_depend_on_scale() {
        // uneven spacing along one dimension, no equidistant points
        let xs: Vec<f32> = (0..16).map(|i| (i * i) as f32 * 0.37 + i as f32).collect();
        let at_scale = |s: f32| -> Vec<Desc> {
            xs.iter()
                .map(|&x| {
                    let mut d = [0.; DESC_LEN];
                    d[0] = x * s;
                    d
                })
                .collect()
        };
        let big = at_scale(1.);
        let small = at_scale(1e-3);

        for seed in 0..20 {
            let p = KMeansParams {
                n_init: 1,
                ..seeded(seed)
            };
            let a = Vocabulary::create(&big, 3, &p).unwrap();
            let b = Vocabulary::create(&small, 3, &p).unwrap();
            assert_eq!(partition(&a, &big), partition(&b, &small), "seed {}", seed);
        }
    }

    #[test]
    fn restarts_keep_lowest_inertia() {
        let features = blobs();
        for seed in 0..10 {
            let single = Vocabulary::create(
                &features,
                4,
                &KMeansParams {
                    n_init: 1,
                    ..seeded(seed)
                },
            )
            .unwrap();
            let multi = Vocabulary::create(
                &features,
                4,
                &KMeansParams {
                    n_init: 8,
                    ..seeded(seed)
                },
            )
            .unwrap();
            // the first restart draws the same centroids as the single run
            assert!(multi.inertia() <= single.inertia());
        }
    }

    #[test]
    fn rejects_zero_restarts() {
        let p = KMeansParams {
            n_init: 0,
            ..KMeansParams::default()
        };
        assert!(matches!(
            Vocabulary::create(&blobs(), 2, &p),
            Err(BofErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn same_seed_same_vocabulary() {
        let a = Vocabulary::create(&blobs(), 4, &seeded(9)).unwrap();
        let b = Vocabulary::create(&blobs(), 4, &seeded(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn histogram_has_explicit_zeros() {
        let features = vec![unit(0), unit(1), unit(2), unit(3)];
        let voc = Vocabulary::create(&features, 4, &seeded(3)).unwrap();
        let hist = voc.transform(&[unit(1), unit(1)]);
        assert_eq!(hist.len(), 4);
        assert_eq!(hist.iter().filter(|&&c| c == 0).count(), 3);
        assert_eq!(hist[voc.quantize(&unit(1))], 2);
        assert_eq!(voc.transform(&[]), vec![0; 4]);
    }

    #[test]
    fn insufficient_data() {
        let p = KMeansParams::default();
        assert!(matches!(
            Vocabulary::create(&[], 2, &p),
            Err(BofErr::InsufficientData { descriptors: 0, k: 2 })
        ));
        assert!(matches!(
            Vocabulary::create(&[unit(0), unit(1)], 3, &p),
            Err(BofErr::InsufficientData { descriptors: 2, k: 3 })
        ));
    }

    #[test]
    fn duplicates_still_give_k_words() {
        let features = vec![unit(5); 6];
        let voc = Vocabulary::create(&features, 3, &seeded(0)).unwrap();
        assert_eq!(voc.len(), 3);
        assert_eq!(voc.transform(&features).iter().sum::<u32>(), 6);
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn save_and_load() {
        let dir = tempdir::TempDir::new("abof_vocab").unwrap();
        let path = dir.path().join("test.voc");
        let voc = Vocabulary::create(&blobs(), 3, &seeded(5)).unwrap();
        voc.save(&path).unwrap();
        let loaded = Vocabulary::load(&path).unwrap();
        assert_eq!(voc, loaded);
    }
}
