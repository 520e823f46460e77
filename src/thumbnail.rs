//! Thumbnail generation: one source file in, one thumbnail out.
//!
//! [`ThumbnailGenerator`] composes the pieces in this order:
//!
//! ```text
//! name output → validate → load mask → probe → read header
//!   → orientation + shrink plan → decode (with shrink-on-load hint)
//!   → resample pipeline → crop → rotate → write
//! ```
//!
//! Everything up to the decode is cheap and fails fast: a bad size, a
//! missing sharpen matrix or an undecodable file is reported before any
//! pixel work. Each run gets its own pipeline and strip cache; nothing is
//! shared between concurrent runs except the (stateless) backend.
//!
//! Any failure aborts the run. Dropping the image chain releases the strip
//! cache and decoder, and the backend only creates the destination once the
//! encoded bytes are complete, so a failed run leaves no output behind.

use crate::imaging::backend::BackendError;
use crate::imaging::calculations::decode_hint;
use crate::imaging::operations::{self, OperationError, ResamplePipeline, Stage};
use crate::imaging::params::DecodeOptions;
use crate::imaging::{Angle, ImageBackend, ImageHandle, RustBackend};
use crate::naming::OutputNamer;
use crate::request::ThumbnailRequest;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, info_span};

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No decoder recognises the source.
    UnsupportedFormat,
    /// The source is corrupt or truncated.
    DecodeFailure,
    /// A colour profile is missing, invalid or cannot be applied.
    ColourTransformFailure,
    /// The request itself cannot be satisfied.
    InvalidRequest,
    /// The destination could not be encoded or written.
    WriteFailure,
    /// The custom sharpen matrix is missing or malformed.
    SharpenMaskLoadFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnsupportedFormat => "unsupported format",
            Self::DecodeFailure => "decode failure",
            Self::ColourTransformFailure => "colour transform failure",
            Self::InvalidRequest => "invalid request",
            Self::WriteFailure => "write failure",
            Self::SharpenMaskLoadFailure => "sharpen mask load failure",
        })
    }
}

/// A failed thumbnail run: the kind of failure, the stage that raised it
/// and the source being processed.
#[derive(Error, Debug)]
#[error("{}: {stage} failed ({kind}): {source}", path.display())]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub path: PathBuf,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// Kind of a backend failure raised at `stage`.
fn classify(stage: Stage, err: &BackendError) -> ErrorKind {
    match (stage, err) {
        (_, BackendError::Colour(_)) => ErrorKind::ColourTransformFailure,
        (Stage::Probe, _) => ErrorKind::UnsupportedFormat,
        (Stage::Write, _) => ErrorKind::WriteFailure,
        (Stage::Crop, _) => ErrorKind::InvalidRequest,
        (Stage::LinearImport | Stage::ColourExport, _) => ErrorKind::ColourTransformFailure,
        (_, BackendError::UnsupportedFormat(_)) => ErrorKind::UnsupportedFormat,
        _ => ErrorKind::DecodeFailure,
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub loader: &'static str,
    pub source_dimensions: (u32, u32),
    pub output_dimensions: (u32, u32),
    /// Shrink done by the decoder itself.
    pub decode_shrink: u32,
    pub integer_shrink: u32,
    pub residual_scale: f64,
    /// Clockwise degrees applied from the orientation tag.
    pub rotation: u32,
}

/// Runs thumbnail requests against an [`ImageBackend`].
pub struct ThumbnailGenerator<B: ImageBackend> {
    backend: B,
}

impl Default for ThumbnailGenerator<RustBackend> {
    fn default() -> Self {
        Self::new(RustBackend::new())
    }
}

impl<B: ImageBackend> ThumbnailGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Thumbnail `source`, naming the destination from `request.output`.
    pub fn generate(
        &self,
        source: &Path,
        request: &ThumbnailRequest,
    ) -> Result<ThumbnailOutcome, PipelineError> {
        let span = info_span!("thumbnail", context = %request.context, source = %source.display());
        let _enter = span.enter();

        let destination = OutputNamer::new(&request.output)
            .and_then(|namer| namer.destination(source))
            .map_err(|e| failure(ErrorKind::InvalidRequest, Stage::NameOutput, source, e))?;
        self.run(source, request, &destination)
    }

    /// Thumbnail `source` to exactly `destination`.
    pub fn generate_to(
        &self,
        source: &Path,
        request: &ThumbnailRequest,
        destination: &Path,
    ) -> Result<ThumbnailOutcome, PipelineError> {
        let span = info_span!("thumbnail", context = %request.context, source = %source.display());
        let _enter = span.enter();
        self.run(source, request, destination)
    }

    /// Thumbnail every source in parallel. One failure does not stop the
    /// others; results come back in input order.
    pub fn generate_batch(
        &self,
        sources: &[PathBuf],
        request: &ThumbnailRequest,
    ) -> Vec<Result<ThumbnailOutcome, PipelineError>> {
        sources
            .par_iter()
            .map(|source| self.generate(source, request))
            .collect()
    }

    fn run(
        &self,
        source: &Path,
        request: &ThumbnailRequest,
        destination: &Path,
    ) -> Result<ThumbnailOutcome, PipelineError> {
        let backend = &self.backend;
        let at = |stage: Stage| move |e: BackendError| backend_failure(stage, source, e);

        request
            .validate()
            .map_err(|e| failure(ErrorKind::InvalidRequest, Stage::Validate, source, e))?;
        let mask = request.sharpen.load().map_err(|e| {
            failure(ErrorKind::SharpenMaskLoadFailure, Stage::LoadMask, source, e)
        })?;

        let codec = backend.probe_loader(source).map_err(at(Stage::Probe))?;
        info!("selected loader is {}", codec.loader_name());
        let header = backend
            .read_header(source, codec)
            .map_err(at(Stage::ReadHeader))?;
        info!("input size is {} x {}", header.width, header.height);

        let angle = if request.auto_rotate {
            Angle::from_orientation(header.orientation)
        } else {
            Angle::D0
        };
        if request.crop_unreachable(angle.oriented(header.dimensions())) {
            return Err(failure(
                ErrorKind::InvalidRequest,
                Stage::Validate,
                source,
                format!(
                    "{}x{} source is smaller than the {}x{} crop and will not be enlarged",
                    header.width, header.height, request.width, request.height
                ),
            ));
        }

        let config = request.resample_config(angle, mask);
        let plan = config.plan(header.dimensions());
        let decode_shrink = if codec.supports_shrink_on_load() {
            decode_hint(&plan, request.linear)
        } else {
            1
        };
        info!("pre-shrink factor = {decode_shrink}");

        let options = DecodeOptions {
            sequential: true,
            shrink: decode_shrink,
        };
        let image = backend
            .decode(source, codec, options)
            .map_err(at(Stage::Decode))?;

        let resampled = ResamplePipeline::new(backend, &config)
            .run(image)
            .map_err(|e| operation_failure(source, e))?;
        let mut image = resampled.image;

        if request.crop {
            image = operations::crop(backend, image, &config)
                .map_err(|e| operation_failure(source, e))?;
        }
        if request.auto_rotate {
            image = operations::rotate(backend, image, angle)
                .map_err(|e| operation_failure(source, e))?;
        }

        let output_dimensions = image.info().dimensions();
        backend
            .write_to_file(image, destination)
            .map_err(at(Stage::Write))?;
        info!("thumbnail written to {}", destination.display());

        Ok(ThumbnailOutcome {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            loader: codec.loader_name(),
            source_dimensions: header.dimensions(),
            output_dimensions,
            decode_shrink,
            integer_shrink: resampled.plan.integer_shrink,
            residual_scale: resampled.plan.residual_scale,
            rotation: angle.degrees(),
        })
    }
}

fn failure(
    kind: ErrorKind,
    stage: Stage,
    path: &Path,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> PipelineError {
    PipelineError {
        kind,
        stage,
        path: path.to_path_buf(),
        source: source.into(),
    }
}

fn backend_failure(stage: Stage, path: &Path, err: BackendError) -> PipelineError {
    failure(classify(stage, &err), stage, path, err)
}

fn operation_failure(path: &Path, err: OperationError) -> PipelineError {
    backend_failure(err.stage, path, err.source)
}
