//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the pipeline orchestration in
//! [`operations`](super::operations) (which decides which stages run) and the
//! [`backend`](super::backend) (which does the actual pixel work). Keeping them
//! plain values lets a mock backend record exactly what it was asked to do.
//!
//! ## Types
//!
//! - [`Interpretation`], [`Coding`], [`BandFormat`]: how the samples of an image are to be read.
//! - [`CodecKind`]: which decoder the backend selected for a file.
//! - [`Kernel`]: interpolation kernel for the residual affine resample.
//! - [`ConvolutionMask`]: sharpening matrix (`mild` or loaded from a matrix file).
//! - [`ColourProfile`]: builtin sRGB or an ICC file on disk.
//! - [`DecodeOptions`], [`CacheParams`], [`AffineParams`], [`Area`]: per-operation arguments.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Colour space the sample values are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    /// Gamma-encoded sRGB (or grey with the sRGB transfer curve).
    Srgb,
    /// Linear-light scene-referred RGB, as produced by Radiance decoders.
    Scrgb,
    /// CIE XYZ (D65), linear light.
    Xyz,
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Srgb => "srgb",
            Self::Scrgb => "scrgb",
            Self::Xyz => "xyz",
        })
    }
}

/// Pixel coding. Packed codings must be unpacked before any arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    None,
    /// Radiance shared-exponent coding.
    Rad,
}

/// Storage format of a single band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFormat {
    U8,
    U16,
    F32,
}

impl BandFormat {
    /// Native value of full intensity.
    pub fn max_value(self) -> f32 {
        match self {
            Self::U8 => 255.0,
            Self::U16 => 65535.0,
            Self::F32 => 1.0,
        }
    }

    /// Whether samples are integer-quantized device values.
    pub fn is_quantized(self) -> bool {
        matches!(self, Self::U8 | Self::U16)
    }
}

/// Decoder selected for a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Jpeg,
    Png,
    Tiff,
    WebP,
    Hdr,
}

impl CodecKind {
    /// Whether the decoder can block-shrink during decode (1/2, 1/4, 1/8).
    pub fn supports_shrink_on_load(self) -> bool {
        matches!(self, Self::Jpeg)
    }

    pub fn loader_name(self) -> &'static str {
        match self {
            Self::Jpeg => "jpegload",
            Self::Png => "pngload",
            Self::Tiff => "tiffload",
            Self::WebP => "webpload",
            Self::Hdr => "radload",
        }
    }
}

/// Interpolation kernel for the residual resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kernel {
    Nearest,
    #[default]
    Bilinear,
    /// Catmull-Rom cubic.
    Bicubic,
    Lanczos3,
}

impl Kernel {
    /// Half-width of the kernel window in source pixels.
    pub fn radius(self) -> u32 {
        match self {
            Self::Nearest | Self::Bilinear => 1,
            Self::Bicubic => 2,
            Self::Lanczos3 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Lanczos3 => "lanczos3",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown interpolator '{0}' (expected nearest, bilinear, bicubic or lanczos3)")]
pub struct UnknownKernel(pub String);

impl FromStr for Kernel {
    type Err = UnknownKernel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "bicubic" => Ok(Self::Bicubic),
            "lanczos3" => Ok(Self::Lanczos3),
            _ => Err(UnknownKernel(s.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed matrix: {0}")]
    Malformed(String),
}

/// Convolution matrix used for sharpening.
///
/// Output sample = `sum(coefficient * input) / scale + offset`, with `offset`
/// expressed in 8-bit units like the matrix files it is loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionMask {
    pub width: u32,
    pub height: u32,
    pub coefficients: Vec<f64>,
    pub scale: f64,
    pub offset: f64,
}

impl ConvolutionMask {
    /// Gentle 3x3 sharpen suitable for block-shrunk thumbnails.
    #[rustfmt::skip]
    pub fn mild() -> Self {
        Self {
            width: 3,
            height: 3,
            coefficients: vec![
                -1.0, -1.0, -1.0,
                -1.0, 32.0, -1.0,
                -1.0, -1.0, -1.0,
            ],
            scale: 24.0,
            offset: 0.0,
        }
    }

    /// Load a matrix file: a `WIDTH HEIGHT [SCALE [OFFSET]]` header line
    /// followed by `HEIGHT` rows of `WIDTH` numbers. `#` starts a comment.
    pub fn load(path: &Path) -> Result<Self, MaskError> {
        let text = std::fs::read_to_string(path).map_err(|source| MaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, MaskError> {
        let mut lines = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty());

        let header = lines
            .next()
            .ok_or_else(|| MaskError::Malformed("empty matrix file".into()))?;
        let header = parse_numbers(header)?;
        if !(2..=4).contains(&header.len()) {
            return Err(MaskError::Malformed(format!(
                "header needs 2 to 4 fields, found {}",
                header.len()
            )));
        }
        let width = positive_dimension(header[0], "width")?;
        let height = positive_dimension(header[1], "height")?;
        let scale = header.get(2).copied().unwrap_or(1.0);
        let offset = header.get(3).copied().unwrap_or(0.0);
        if scale == 0.0 {
            return Err(MaskError::Malformed("scale must be non-zero".into()));
        }

        let mut coefficients = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            let line = lines.next().ok_or_else(|| {
                MaskError::Malformed(format!("expected {height} rows, found {row}"))
            })?;
            let values = parse_numbers(line)?;
            if values.len() != width as usize {
                return Err(MaskError::Malformed(format!(
                    "row {row} has {} values, expected {width}",
                    values.len()
                )));
            }
            coefficients.extend(values);
        }
        if lines.next().is_some() {
            return Err(MaskError::Malformed("trailing data after matrix".into()));
        }

        Ok(Self {
            width,
            height,
            coefficients,
            scale,
            offset,
        })
    }
}

fn parse_numbers(line: &str) -> Result<Vec<f64>, MaskError> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| MaskError::Malformed(format!("not a number: '{token}'")))
        })
        .collect()
}

fn positive_dimension(value: f64, name: &str) -> Result<u32, MaskError> {
    if value >= 1.0 && value.fract() == 0.0 && value <= 64.0 {
        Ok(value as u32)
    } else {
        Err(MaskError::Malformed(format!(
            "{name} must be an integer in 1..=64, found {value}"
        )))
    }
}

/// A colour profile reference: the builtin sRGB space or an ICC file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourProfile {
    Srgb,
    File(PathBuf),
}

impl FromStr for ColourProfile {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("srgb") {
            Ok(Self::Srgb)
        } else {
            Ok(Self::File(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ColourProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Srgb => f.write_str("srgb"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Options for opening a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Pixels will be requested strictly top to bottom.
    pub sequential: bool,
    /// Block shrink applied by the decoder itself (1, 2, 4 or 8).
    pub shrink: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sequential: true,
            shrink: 1,
        }
    }
}

/// Geometry of the strip cache placed in front of the residual resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheParams {
    /// Rows per strip; each strip spans the full image width.
    pub strip_height: u32,
    /// Maximum number of strips retained at once.
    pub max_tiles: u32,
}

/// Parameters for the residual affine resample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// Uniform scale applied to both axes (`> 1.0` zooms).
    pub scale: f64,
    pub kernel: Kernel,
    /// Output window size.
    pub width: u32,
    pub height: u32,
    /// Output rows evaluated together; all workers in a band share one
    /// strip range of the input.
    pub band_rows: u32,
}

/// A rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}
