//! Per-call thumbnail request.
//!
//! A [`ThumbnailRequest`] is an immutable value built once (from the config
//! file, CLI flags or [`transform`](crate::transform)) and passed by reference
//! through every stage. Nothing in the pipeline reads global options.
//!
//! ## Size strings
//!
//! `WIDTH[xHEIGHT][FLAG]`, parsed by [`SizeSpec`]:
//!
//! | Input | Box | Constraint |
//! |---|---|---|
//! | `128` | 128×128 | only shrink larger |
//! | `200x100` | 200×100 | only shrink larger |
//! | `800^` | 800×800 | fill area |
//! | `800x600>` | 800×600 | only shrink larger (any flag but `^`) |

use crate::imaging::calculations::ResizeConstraint;
use crate::imaging::operations::ResampleConfig;
use crate::imaging::{Angle, ColourProfile, ConvolutionMask, Kernel, MaskError, UnknownKernel};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("bad size '{0}' (expected WIDTH[xHEIGHT][^])")]
    InvalidSize(String),
    #[error("thumbnail width and height must be positive, got {0}x{1}")]
    ZeroDimension(u32, u32),
    #[error(transparent)]
    UnknownKernel(#[from] UnknownKernel),
    #[error("output template is empty")]
    EmptyOutput,
}

/// Parsed `WIDTH[xHEIGHT][^]` size string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub width: u32,
    pub height: u32,
    pub constraint: ResizeConstraint,
}

fn parse_dimension(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for SizeSpec {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidSize(s.to_string());

        // One trailing non-digit is a flag; only `^` means anything.
        let (body, flag) = match s.char_indices().last() {
            Some((at, c)) if !c.is_ascii_digit() => (&s[..at], Some(c)),
            _ => (s, None),
        };
        let (width, height) = match body.split_once('x') {
            Some((w, h)) => (
                parse_dimension(w).ok_or_else(invalid)?,
                parse_dimension(h).ok_or_else(invalid)?,
            ),
            None => {
                let w = parse_dimension(body).ok_or_else(invalid)?;
                (w, w)
            }
        };
        if width == 0 || height == 0 {
            return Err(RequestError::ZeroDimension(width, height));
        }

        let constraint = if flag == Some('^') {
            ResizeConstraint::FillArea
        } else {
            ResizeConstraint::OnlyShrinkLarger
        };
        Ok(Self {
            width,
            height,
            constraint,
        })
    }
}

/// Sharpening applied after a genuine shrink.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SharpenMask {
    None,
    #[default]
    Mild,
    /// Matrix file, see [`ConvolutionMask::parse`].
    File(PathBuf),
}

impl SharpenMask {
    /// Resolve to a concrete mask. Custom files are read here, before any
    /// image work starts.
    pub fn load(&self) -> Result<Option<ConvolutionMask>, MaskError> {
        match self {
            Self::None => Ok(None),
            Self::Mild => Ok(Some(ConvolutionMask::mild())),
            Self::File(path) => ConvolutionMask::load(path).map(Some),
        }
    }
}

impl FromStr for SharpenMask {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => Self::None,
            "mild" => Self::Mild,
            path => Self::File(PathBuf::from(path)),
        })
    }
}

impl fmt::Display for SharpenMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Mild => f.write_str("mild"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// How [`transform`](crate::transform) fits the source into its box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropStyle {
    /// Scale the whole image to fit inside the box; one axis may come out
    /// smaller.
    #[default]
    AspectFit,
    /// Fill the box and centre-crop to exactly its size.
    AspectFill,
}

/// Everything one thumbnail run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRequest {
    pub width: u32,
    pub height: u32,
    pub constraint: ResizeConstraint,
    pub crop: bool,
    /// Rotate upright from the EXIF orientation, then drop the tag.
    pub auto_rotate: bool,
    /// Resample in linear light (XYZ) rather than gamma-encoded sRGB.
    pub linear: bool,
    pub sharpen: SharpenMask,
    pub kernel: Kernel,
    /// Profile for sources without an embedded one.
    pub import_profile: Option<ColourProfile>,
    pub export_profile: Option<ColourProfile>,
    pub delete_profile: bool,
    /// Destination template, see [`OutputNamer`](crate::naming::OutputNamer).
    pub output: String,
    /// Tag attached to every log event of the run.
    pub context: String,
}

pub const DEFAULT_CONTEXT: &str = "cuticle";

impl Default for ThumbnailRequest {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            constraint: ResizeConstraint::OnlyShrinkLarger,
            crop: false,
            auto_rotate: false,
            linear: false,
            sharpen: SharpenMask::Mild,
            kernel: Kernel::Bilinear,
            import_profile: None,
            export_profile: None,
            delete_profile: false,
            output: "tn_%s.jpg".to_string(),
            context: DEFAULT_CONTEXT.to_string(),
        }
    }
}

impl ThumbnailRequest {
    /// Take box and constraint from a parsed size string.
    pub fn with_size(mut self, size: SizeSpec) -> Self {
        self.width = size.width;
        self.height = size.height;
        self.constraint = size.constraint;
        self
    }

    pub fn target(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.width == 0 || self.height == 0 {
            return Err(RequestError::ZeroDimension(self.width, self.height));
        }
        if self.output.is_empty() {
            return Err(RequestError::EmptyOutput);
        }
        Ok(())
    }

    /// Whether the crop box can never be reached: with only-shrink-larger a
    /// source that already fits is left at its size, so if it is smaller than
    /// the box on either axis there is nothing to crop from.
    pub fn crop_unreachable(&self, oriented: (u32, u32)) -> bool {
        let (width, height) = oriented;
        self.crop
            && self.constraint == ResizeConstraint::OnlyShrinkLarger
            && width <= self.width
            && height <= self.height
            && (width < self.width || height < self.height)
    }

    pub fn resample_config(&self, angle: Angle, sharpen: Option<ConvolutionMask>) -> ResampleConfig {
        ResampleConfig {
            target: self.target(),
            constraint: self.constraint,
            crop: self.crop,
            angle,
            linear: self.linear,
            kernel: self.kernel,
            sharpen,
            import_profile: self.import_profile.clone(),
            export_profile: self.export_profile.clone(),
            delete_profile: self.delete_profile,
        }
    }
}
