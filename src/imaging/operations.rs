//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take a
//! [`ResampleConfig`], decide which stages run, and call the backend. Every
//! decision is made from image attributes, so the whole policy can be tested
//! against the recording mock backend.

use super::backend::{BackendError, ImageBackend, ImageHandle};
use super::calculations::{
    RESAMPLE_BAND_ROWS, ResizeConstraint, ShrinkPlan, affine_demand_lines, cache_params,
    calculate_shrink, centre_crop, select_kernel, should_sharpen,
};
use super::orientation::Angle;
use super::params::{AffineParams, Coding, ColourProfile, ConvolutionMask, Interpretation, Kernel};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Where a thumbnail run was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    LoadMask,
    NameOutput,
    Probe,
    ReadHeader,
    Decode,
    Unpack,
    LinearImport,
    ColourConvert,
    Shrink,
    Cache,
    Resample,
    ColourExport,
    Sharpen,
    Crop,
    Rotate,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::LoadMask => "load mask",
            Self::NameOutput => "name output",
            Self::Probe => "probe",
            Self::ReadHeader => "read header",
            Self::Decode => "decode",
            Self::Unpack => "unpack",
            Self::LinearImport => "linear import",
            Self::ColourConvert => "colour convert",
            Self::Shrink => "shrink",
            Self::Cache => "cache",
            Self::Resample => "resample",
            Self::ColourExport => "colour export",
            Self::Sharpen => "sharpen",
            Self::Crop => "crop",
            Self::Rotate => "rotate",
            Self::Write => "write",
        })
    }
}

/// A backend failure tagged with the stage that raised it.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct OperationError {
    pub stage: Stage,
    #[source]
    pub source: BackendError,
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, OperationError>;

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> AtStage<T> for std::result::Result<T, BackendError> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|source| OperationError { stage, source })
    }
}

/// Everything the resample pipeline needs to know about one request.
#[derive(Debug, Clone)]
pub struct ResampleConfig {
    pub target: (u32, u32),
    pub constraint: ResizeConstraint,
    pub crop: bool,
    /// Rotation that will be applied after resampling; quarter turns swap
    /// the axes used for planning.
    pub angle: Angle,
    pub linear: bool,
    pub kernel: Kernel,
    pub sharpen: Option<ConvolutionMask>,
    pub import_profile: Option<ColourProfile>,
    pub export_profile: Option<ColourProfile>,
    pub delete_profile: bool,
}

impl ResampleConfig {
    /// Shrink plan for an image of `dims`, before any rotation.
    pub fn plan(&self, dims: (u32, u32)) -> ShrinkPlan {
        calculate_shrink(self.angle.oriented(dims), self.target, self.constraint, self.crop)
    }

    /// Crop box in pre-rotation space.
    pub fn crop_box(&self) -> (u32, u32) {
        self.angle.oriented(self.target)
    }
}

/// Output of [`ResamplePipeline::run`].
pub struct Resampled<I> {
    pub image: I,
    pub plan: ShrinkPlan,
}

/// Colour import, integer shrink, cached residual resample, colour export,
/// sharpen and profile removal, in that order.
pub struct ResamplePipeline<'a, B: ImageBackend> {
    backend: &'a B,
    config: &'a ResampleConfig,
}

impl<'a, B: ImageBackend> ResamplePipeline<'a, B> {
    pub fn new(backend: &'a B, config: &'a ResampleConfig) -> Self {
        Self { backend, config }
    }

    pub fn run(&self, image: B::Image) -> Result<Resampled<B::Image>> {
        let config = self.config;
        let mut image = image;

        if image.info().coding == Coding::Rad {
            info!("unpacking Rad to float");
            image = self.backend.unpack(image).at(Stage::Unpack)?;
        }

        // Read once: import keeps the profile attached, so this also answers
        // whether the export stage has a source profile.
        let embedded = image.info().has_profile();

        if config.linear
            && image.info().coding == Coding::None
            && image.info().format.is_quantized()
            && (embedded || config.import_profile.is_some())
        {
            match &config.import_profile {
                Some(profile) if !embedded => {
                    info!("importing with profile {profile}")
                }
                _ => info!("importing with embedded profile"),
            }
            image = self
                .backend
                .icc_import(image, config.import_profile.as_ref())
                .at(Stage::LinearImport)?;
        }

        let space = if config.linear {
            Interpretation::Xyz
        } else {
            Interpretation::Srgb
        };
        info!("converting to processing space {space}");
        image = self
            .backend
            .colour_convert(image, space)
            .at(Stage::ColourConvert)?;

        let source = image.info().dimensions();
        let plan = config.plan(source);
        info!("integer shrink by {}", plan.integer_shrink);
        if plan.integer_shrink > 1 {
            image = self
                .backend
                .shrink_block(image, plan.integer_shrink)
                .at(Stage::Shrink)?;
        }

        if plan.needs_resample(source) {
            let kernel = select_kernel(&plan, config.kernel);
            let scale = plan.residual_scale;
            let demand = affine_demand_lines(RESAMPLE_BAND_ROWS, scale, kernel);
            image = self
                .backend
                .tile_cache(image, cache_params(demand))
                .at(Stage::Cache)?;

            let (width, height) = plan.output_dimensions(source);
            let params = AffineParams {
                scale,
                kernel,
                width,
                height,
                band_rows: RESAMPLE_BAND_ROWS,
            };
            image = self
                .backend
                .affine_resample(image, &params)
                .at(Stage::Resample)?;
            info!("residual scale by {scale}");
            info!("{kernel} interpolation");
        }

        image = self.export_colour(image, embedded)?;

        if should_sharpen(&plan, config.sharpen.is_some())
            && let Some(mask) = &config.sharpen
        {
            info!("sharpening thumbnail");
            image = self.backend.convolve(image, mask).at(Stage::Sharpen)?;
        }

        if config.delete_profile && image.info().has_profile() {
            info!("deleting profile from output image");
            image.info_mut().icc_profile = None;
        }

        Ok(Resampled { image, plan })
    }

    /// Linear mode always leaves XYZ; device mode only transforms when there
    /// is both a target and a source profile.
    fn export_colour(&self, image: B::Image, embedded: bool) -> Result<B::Image> {
        let config = self.config;

        if config.linear {
            if config.export_profile.is_some() || embedded {
                info!("exporting to device space with a profile");
                self.backend
                    .icc_export(image, config.export_profile.as_ref())
                    .at(Stage::ColourExport)
            } else {
                info!("converting to sRGB");
                self.backend
                    .colour_convert(image, Interpretation::Srgb)
                    .at(Stage::ColourExport)
            }
        } else if let Some(export) = &config.export_profile
            && (embedded || config.import_profile.is_some())
        {
            info!("exporting with profile {export}");
            self.backend
                .icc_transform(image, export, config.import_profile.as_ref())
                .at(Stage::ColourExport)
        } else {
            Ok(image)
        }
    }
}

/// Centre-crop to the target box, taking the pending rotation into account.
pub fn crop<B: ImageBackend>(
    backend: &B,
    image: B::Image,
    config: &ResampleConfig,
) -> Result<B::Image> {
    let crop_box = config.crop_box();
    let area = centre_crop(image.info().dimensions(), crop_box).ok_or_else(|| OperationError {
        stage: Stage::Crop,
        source: BackendError::ProcessingFailed(format!(
            "{}x{} image is smaller than the {}x{} crop",
            image.info().width,
            image.info().height,
            crop_box.0,
            crop_box.1
        )),
    })?;
    backend.extract_area(image, area).at(Stage::Crop)
}

/// Apply the orientation rotation and drop the orientation tag so viewers
/// do not rotate the result a second time.
pub fn rotate<B: ImageBackend>(
    backend: &B,
    image: B::Image,
    angle: Angle,
) -> Result<B::Image> {
    let mut image = if angle == Angle::D0 {
        image
    } else {
        let rotated = backend.rotate(image, angle).at(Stage::Rotate)?;
        info!("rotated image by {angle}");
        rotated
    };
    image.info_mut().orientation = None;
    Ok(image)
}
