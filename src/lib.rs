//! # Cuticle
//!
//! A thumbnail generator that keeps peak memory bounded however large the
//! source is. Thumbnails are produced with shrink-on-load, block-average
//! integer shrinking, an interpolated residual resize, optional linear-light
//! processing with ICC colour management, sharpening, centre cropping and
//! EXIF auto-rotation.
//!
//! # Architecture: Plan, Pipeline, Write
//!
//! ```text
//! 1. Plan      header → ShrinkPlan        (integer shrink + residual scale)
//! 2. Pipeline  decode → lazy stage chain   (import → shrink → resample → export → sharpen)
//! 3. Write     crop → rotate → encode      (pixels are pulled only here)
//! ```
//!
//! The plan is pure arithmetic over dimensions, so every sizing rule is unit
//! tested without images. The pipeline is a chain of single-owner image
//! handles over the [`imaging::ImageBackend`] trait, so the stage-selection
//! policy is tested against a recording mock. Pixels only flow when the
//! final write pulls them.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`request`] | [`ThumbnailRequest`], size strings, sharpen masks |
//! | [`naming`] | Destination paths from an output template |
//! | [`thumbnail`] | [`ThumbnailGenerator`] orchestration and the [`PipelineError`] taxonomy |
//! | [`imaging`] | Shrink planning, strip cache, resample pipeline, pure-Rust backend |
//! | [`config`] | `cuticle.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Integer Shrink, Then a Small Residual
//!
//! Block averaging by a whole factor is cheap and alias-resistant; the
//! interpolated resize that follows only has to cover the remaining
//! fraction. For JPEG the first power of two of the shrink happens inside
//! the decoder (DCT scaling), so a 24-megapixel source never exists at full
//! size in memory.
//!
//! ## One Decode Cursor
//!
//! The residual resize runs on many threads, each reading a different band
//! of rows, while decoders can only go forward. The [`imaging::TileCache`]
//! serialises decoding behind a single monotonic cursor that any thread may
//! advance, so no thread ever waits on a decode that is itself waiting for
//! another thread.
//!
//! ## Immutable Requests
//!
//! A [`ThumbnailRequest`] is built once and passed by reference. Nothing is
//! global, so concurrent thumbnails share nothing but the stateless backend.

pub mod config;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod request;
pub mod thumbnail;

pub use request::{CropStyle, SharpenMask, SizeSpec, ThumbnailRequest};
pub use thumbnail::{ErrorKind, PipelineError, ThumbnailGenerator, ThumbnailOutcome};

use imaging::ResizeConstraint;
use std::path::Path;

/// Thumbnail `source` with the production backend.
pub fn generate_thumbnail(
    source: &Path,
    request: &ThumbnailRequest,
) -> Result<ThumbnailOutcome, PipelineError> {
    ThumbnailGenerator::default().generate(source, request)
}

/// Fit `source` into `width`×`height` and write it to exactly `output`.
///
/// Auto-rotates and sharpens mildly, enlarging small sources. With
/// [`CropStyle::AspectFit`] the whole image fits inside the box, so one axis
/// may come out smaller; [`CropStyle::AspectFill`] covers the box and
/// centre-crops to the exact size.
pub fn transform(
    source: &Path,
    width: u32,
    height: u32,
    style: CropStyle,
    output: &Path,
) -> Result<ThumbnailOutcome, PipelineError> {
    let request = ThumbnailRequest {
        width,
        height,
        constraint: ResizeConstraint::FillArea,
        crop: style == CropStyle::AspectFill,
        auto_rotate: true,
        sharpen: SharpenMask::Mild,
        output: output.display().to_string(),
        ..ThumbnailRequest::default()
    };
    ThumbnailGenerator::default().generate_to(source, &request, output)
}
