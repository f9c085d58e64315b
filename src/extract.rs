use log::debug;
use std::path::{Path, PathBuf};

use crate::{BofResult, Desc, ExtractorParams};

/// A keypoint descriptor extractor.
///
/// Implementations wrap a vision library. The transformer creates one
/// extractor per fit and reuses that same instance for every later
/// `transform`, so descriptors are always computed with the settings the
/// vocabulary was learned with.
pub trait Extractor: Sized {
    type Image: ?Sized;

    /// Build an extractor from tuning parameters.
    fn create(params: &ExtractorParams) -> BofResult<Self>;

    /// Compute the descriptors of one image. Images without detectable
    /// keypoints return an empty vector.
    fn extract(&self, image: &Self::Image) -> BofResult<Vec<Desc>>;
}

/// Extract descriptors from every image, in order. Fails on the first failing image.
pub fn extract_all<E, I>(extractor: &E, images: &[I]) -> BofResult<Vec<Vec<Desc>>>
where
    E: Extractor,
    I: std::borrow::Borrow<E::Image>,
{
    images
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let desc = extractor.extract(img.borrow())?;
            debug!("image {}: {} descriptors", i, desc.len());
            Ok(desc)
        })
        .collect()
}

/// Concatenate per-image descriptors into a single pool.
pub fn pool(per_image: &[Vec<Desc>]) -> Vec<Desc> {
    let mut features: Vec<Desc> = Vec::with_capacity(per_image.iter().map(Vec::len).sum());
    for desc in per_image {
        features.extend_from_slice(desc);
    }
    features
}

/// Extensions of the formats `imread` decodes.
const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "dib", "jpeg", "jpg", "jpe", "jp2", "png", "webp", "avif", "pbm", "pgm", "ppm",
    "pxm", "pnm", "pfm", "sr", "ras", "tiff", "tif", "exr", "hdr", "pic",
];

/// Whether `path` carries an image file extension (case insensitive).
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
}

/// Image files directly inside `dir`, sorted by path. Subdirectories and
/// files without an image extension are skipped.
pub fn image_paths_in_dir<P: AsRef<Path>>(dir: P) -> BofResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in dir.as_ref().read_dir()? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if is_image_path(&path) {
            paths.push(path);
        } else {
            debug!("Skipping non-image file {:?}", path);
        }
    }
    paths.sort();
    Ok(paths)
}
