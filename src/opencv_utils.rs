use crate::{
    extract::image_paths_in_dir, BofErr, BofResult, Desc, Extractor, ExtractorParams, DESC_LEN,
};
use log::debug;
use opencv::{
    self,
    core::{KeyPoint, Mat, Ptr, Vector, CV_32F},
    features2d::SIFT,
    prelude::*,
};
use std::{cell::RefCell, convert::TryFrom, path::Path};

/// OpenCV SIFT extractor. Works on `Mat` images, grayscale or color.
pub struct Sift {
    // detect_and_compute needs `&mut`, extraction is logically read-only
    sift: RefCell<Ptr<SIFT>>,
    params: ExtractorParams,
}

impl Sift {
    pub fn params(&self) -> &ExtractorParams {
        &self.params
    }
}

impl Extractor for Sift {
    type Image = Mat;

    fn create(params: &ExtractorParams) -> BofResult<Self> {
        let max_features = i32::try_from(params.max_features).map_err(|_| {
            BofErr::InvalidConfig(format!(
                "max_features must fit in an i32, got {}",
                params.max_features
            ))
        })?;
        let octave_layers = i32::try_from(params.octave_layers).map_err(|_| {
            BofErr::InvalidConfig(format!(
                "octave_layers must fit in an i32, got {}",
                params.octave_layers
            ))
        })?;
        let sift = SIFT::create(
            max_features,
            octave_layers,
            params.contrast_threshold,
            params.edge_threshold,
            params.sigma,
            false,
        )?;
        Ok(Self {
            sift: RefCell::new(sift),
            params: params.clone(),
        })
    }

    fn extract(&self, cv_img: &Mat) -> BofResult<Vec<Desc>> {
        // Detect keypoints and compute descriptors
        let mut kps = Vector::<KeyPoint>::new();
        let mut desc = Mat::default();
        let mask = Mat::default();
        self.sift
            .borrow_mut()
            .detect_and_compute(cv_img, &mask, &mut kps, &mut desc, false)?;

        if kps.is_empty() || desc.rows() == 0 {
            return Ok(Vec::new());
        }
        if desc.typ() != CV_32F || desc.cols() != DESC_LEN as i32 {
            return Err(BofErr::OpenCvDecode);
        }

        // Copy data from the descriptor Mat into descriptor buffers
        (0..desc.rows())
            .map(|i| {
                let row = desc.at_row::<f32>(i).map_err(|_| BofErr::OpenCvDecode)?;
                let mut d: Desc = [0.; DESC_LEN];
                d.copy_from_slice(row);
                Ok(d)
            })
            .collect()
    }
}

/// Use opencv to load an image in grayscale.
pub fn load_img<P: AsRef<Path>>(path: P) -> BofResult<Mat> {
    let path = path.as_ref();
    let name = path
        .to_str()
        .ok_or_else(|| BofErr::ImageLoad(path.to_path_buf()))?;
    let img = opencv::imgcodecs::imread(name, opencv::imgcodecs::IMREAD_GRAYSCALE)?;
    if img.empty() {
        return Err(BofErr::ImageLoad(path.to_path_buf()));
    }
    Ok(img)
}

/// Load all images in a directory, ordered by path. Files without an image
/// extension (`.DS_Store`, READMEs, ...) are skipped.
pub fn load_imgs_from_dir<P: AsRef<Path>>(path: P) -> BofResult<Vec<Mat>> {
    image_paths_in_dir(path)?
        .iter()
        .map(|p| {
            debug!("Loading image {:?}", p);
            load_img(p)
        })
        .collect()
}
