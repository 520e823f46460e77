//! Pure Rust image processing backend built on the `image` ecosystem.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Probe | `image::guess_format` on the leading bytes |
//! | Header | `image::ImageDecoder` (dimensions, colour type, ICC) + `kamadak-exif` (orientation) |
//! | Decode (JPEG shrink-on-load) | `jpeg-decoder` DCT scaling (1/2, 1/4, 1/8) |
//! | Decode (everything else) | `image` crate decoders |
//! | Colour convert | sRGB / linear / XYZ arithmetic in [`colour`](super::colour) |
//! | ICC import / export / transform | `moxcms` |
//! | Shrink, resample, convolve, crop | strip stages in [`raster`](super::raster) |
//! | Rotate | `image::imageops::rotate90/180/270` on the materialised image (the only non-streaming stage) |
//! | Encode | `image` encoders + `img-parts` ICC embedding, written via `tempfile` |
//!
//! The `image` decoders produce a whole frame at once; from there on every
//! stage is a lazy strip stream pulled by [`write_to_file`](RustBackend::write_to_file).

use super::backend::{BackendError, ImageBackend, ImageHandle, ImageInfo};
use super::calculations::{affine_demand_lines, cache_params};
use super::colour::{self, IccTransform, LoadedProfile};
use super::orientation::Angle;
use super::params::{
    AffineParams, Area, BandFormat, CacheParams, CodecKind, Coding, ColourProfile,
    ConvolutionMask, DecodeOptions, Interpretation,
};
use super::raster::{
    AffineSource, CacheReader, ConvolveSource, CropSource, Geometry, MapSource, RasterSource,
    Rechunk, Samples, ShrinkSource, StripCache, StripStream, materialise,
};
use super::tile_cache::TileCache;
use image::{
    ColorType, DynamicImage, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Luma, LumaA,
    Pixel, Rgb, Rgba, imageops,
};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

enum Pixels {
    Stream(StripStream),
    Cached {
        cache: Arc<StripCache>,
        strip_height: u32,
    },
}

/// A lazily evaluated image.
pub struct RustImage {
    info: ImageInfo,
    pixels: Pixels,
}

impl ImageHandle for RustImage {
    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ImageInfo {
        &mut self.info
    }
}

impl RustImage {
    fn geometry(&self) -> Geometry {
        Geometry {
            width: self.info.width,
            height: self.info.height,
            bands: self.info.bands,
        }
    }

    fn into_stream(self) -> (ImageInfo, StripStream) {
        let stream: StripStream = match self.pixels {
            Pixels::Stream(stream) => stream,
            Pixels::Cached { cache, .. } => Box::new(CacheReader::new(cache)),
        };
        (self.info, stream)
    }

    fn with_stream(info: ImageInfo, stream: StripStream) -> Self {
        Self {
            info,
            pixels: Pixels::Stream(stream),
        }
    }

    fn map(
        self,
        map: impl FnMut(&mut Vec<f32>) -> Result<(), BackendError> + Send + 'static,
    ) -> Self {
        let (info, stream) = self.into_stream();
        Self::with_stream(info, Box::new(MapSource::new(stream, Box::new(map))))
    }
}

fn decode_error(path: &Path, err: impl std::fmt::Display) -> BackendError {
    BackendError::Decode(format!("{}: {err}", path.display()))
}

fn codec_for(format: ImageFormat) -> Option<CodecKind> {
    match format {
        ImageFormat::Jpeg => Some(CodecKind::Jpeg),
        ImageFormat::Png => Some(CodecKind::Png),
        ImageFormat::Tiff => Some(CodecKind::Tiff),
        ImageFormat::WebP => Some(CodecKind::WebP),
        ImageFormat::Hdr => Some(CodecKind::Hdr),
        _ => None,
    }
}

/// EXIF Orientation, or `None` when the file has no readable EXIF block.
fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(|v| v as u16)
}

fn describe(color: ColorType) -> (u32, BandFormat) {
    let format = match color {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => BandFormat::U8,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            BandFormat::U16
        }
        _ => BandFormat::F32,
    };
    (color.channel_count() as u32, format)
}

fn source_info(
    codec: CodecKind,
    (width, height): (u32, u32),
    (bands, format): (u32, BandFormat),
    icc: Option<Vec<u8>>,
    orientation: Option<u16>,
) -> ImageInfo {
    let radiance = codec == CodecKind::Hdr;
    ImageInfo {
        width,
        height,
        bands,
        format,
        coding: if radiance { Coding::Rad } else { Coding::None },
        interpretation: if radiance {
            Interpretation::Scrgb
        } else {
            Interpretation::Srgb
        },
        orientation,
        icc_profile: icc.map(Arc::from),
    }
}

/// Split a decoded image into native samples.
fn into_samples(image: DynamicImage) -> (Samples, u32, BandFormat) {
    match image {
        DynamicImage::ImageLuma8(b) => (Samples::U8(b.into_raw()), 1, BandFormat::U8),
        DynamicImage::ImageLumaA8(b) => (Samples::U8(b.into_raw()), 2, BandFormat::U8),
        DynamicImage::ImageRgb8(b) => (Samples::U8(b.into_raw()), 3, BandFormat::U8),
        DynamicImage::ImageRgba8(b) => (Samples::U8(b.into_raw()), 4, BandFormat::U8),
        DynamicImage::ImageLuma16(b) => (Samples::U16(b.into_raw()), 1, BandFormat::U16),
        DynamicImage::ImageLumaA16(b) => (Samples::U16(b.into_raw()), 2, BandFormat::U16),
        DynamicImage::ImageRgb16(b) => (Samples::U16(b.into_raw()), 3, BandFormat::U16),
        DynamicImage::ImageRgba16(b) => (Samples::U16(b.into_raw()), 4, BandFormat::U16),
        DynamicImage::ImageRgba32F(b) => (Samples::F32(b.into_raw()), 4, BandFormat::F32),
        other => (Samples::F32(other.into_rgb32f().into_raw()), 3, BandFormat::F32),
    }
}

/// DCT-domain scaled JPEG decode. `Ok(None)` for pixel formats the scaled
/// decoder cannot hand back as RGB or grey.
fn decode_jpeg_scaled(
    path: &Path,
    shrink: u32,
) -> Result<Option<(Samples, Geometry, Option<Vec<u8>>)>, BackendError> {
    let file = File::open(path)?;
    let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(file));
    decoder.read_info().map_err(|e| decode_error(path, e))?;
    let info = decoder
        .info()
        .ok_or_else(|| decode_error(path, "missing JPEG header"))?;
    let bands = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => 3,
        jpeg_decoder::PixelFormat::L8 => 1,
        _ => return Ok(None),
    };

    let requested_w = (info.width as u32).div_ceil(shrink) as u16;
    let requested_h = (info.height as u32).div_ceil(shrink) as u16;
    decoder
        .scale(requested_w, requested_h)
        .map_err(|e| decode_error(path, e))?;
    let pixels = decoder.decode().map_err(|e| decode_error(path, e))?;
    let info = decoder
        .info()
        .ok_or_else(|| decode_error(path, "missing JPEG output size"))?;

    let geometry = Geometry {
        width: info.width as u32,
        height: info.height as u32,
        bands,
    };
    Ok(Some((Samples::U8(pixels), geometry, decoder.icc_profile())))
}

fn open_decoder(path: &Path) -> Result<impl ImageDecoder, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .map_err(|e| decode_error(path, e))
}

// ============================================================================
// Encoding
// ============================================================================

fn output_format(path: &Path) -> Result<ImageFormat, BackendError> {
    match ImageFormat::from_path(path) {
        Ok(f @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Tiff)) => {
            Ok(f)
        }
        _ => Err(BackendError::UnsupportedFormat(format!(
            "cannot write {}",
            path.display()
        ))),
    }
}

fn buffer_error() -> BackendError {
    BackendError::ProcessingFailed("pixel buffer does not match image size".into())
}

/// Quantise float samples for the encoder.
fn quantise(data: &[f32], g: Geometry, deep: bool) -> Result<DynamicImage, BackendError> {
    let (w, h) = (g.width, g.height);
    if deep {
        let px: Vec<u16> = data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16)
            .collect();
        return match g.bands {
            1 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageLuma16),
            2 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageLumaA16),
            3 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageRgb16),
            _ => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageRgba16),
        }
        .ok_or_else(buffer_error);
    }
    let px: Vec<u8> = data
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    match g.bands {
        1 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageRgb8),
        _ => ImageBuffer::from_raw(w, h, px).map(DynamicImage::ImageRgba8),
    }
    .ok_or_else(buffer_error)
}

/// Narrow to what each encoder accepts: JPEG has no alpha, WebP is RGB(A).
fn encodable(image: DynamicImage, format: ImageFormat) -> DynamicImage {
    let alpha = image.color().has_alpha();
    let grey = image.color().channel_count() <= 2;
    match format {
        ImageFormat::Jpeg if grey => DynamicImage::ImageLuma8(image.to_luma8()),
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::WebP if alpha => DynamicImage::ImageRgba8(image.to_rgba8()),
        ImageFormat::WebP => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    }
}

/// Attach an ICC profile to encoded bytes.
fn embed_icc(encoded: Vec<u8>, format: ImageFormat, icc: &[u8]) -> Result<Vec<u8>, BackendError> {
    use img_parts::{Bytes, ImageICC};

    let profile = Some(Bytes::copy_from_slice(icc));
    let embed_error = |e: img_parts::Error| {
        BackendError::ProcessingFailed(format!("cannot embed ICC profile: {e}"))
    };
    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let mut jpeg = img_parts::jpeg::Jpeg::from_bytes(encoded.into()).map_err(embed_error)?;
            jpeg.set_icc_profile(profile);
            jpeg.encoder().write_to(&mut out)?;
        }
        ImageFormat::Png => {
            let mut png = img_parts::png::Png::from_bytes(encoded.into()).map_err(embed_error)?;
            png.set_icc_profile(profile);
            png.encoder().write_to(&mut out)?;
        }
        ImageFormat::WebP => {
            let mut webp = img_parts::webp::WebP::from_bytes(encoded.into()).map_err(embed_error)?;
            webp.set_icc_profile(profile);
            webp.encoder().write_to(&mut out)?;
        }
        _ => {
            debug!("ICC embedding not supported for {format:?}, writing untagged");
            return Ok(encoded);
        }
    }
    Ok(out)
}

/// Write through a temporary file beside the destination so a failure never
/// leaves a partial output behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Quarter turns clockwise through `image::imageops`.
fn rotate_pixels(
    data: Vec<f32>,
    geometry: Geometry,
    angle: Angle,
) -> Result<(Vec<f32>, Geometry), BackendError> {
    match geometry.bands {
        1 => rotate_buffer::<Luma<f32>>(data, geometry, angle),
        2 => rotate_buffer::<LumaA<f32>>(data, geometry, angle),
        3 => rotate_buffer::<Rgb<f32>>(data, geometry, angle),
        4 => rotate_buffer::<Rgba<f32>>(data, geometry, angle),
        n => Err(BackendError::ProcessingFailed(format!(
            "cannot rotate an image with {n} bands"
        ))),
    }
}

fn rotate_buffer<P>(
    data: Vec<f32>,
    geometry: Geometry,
    angle: Angle,
) -> Result<(Vec<f32>, Geometry), BackendError>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    let buffer = ImageBuffer::<P, Vec<f32>>::from_raw(geometry.width, geometry.height, data)
        .ok_or_else(|| BackendError::ProcessingFailed("rotate buffer size mismatch".into()))?;
    let rotated = match angle {
        Angle::D0 => buffer,
        Angle::D90 => imageops::rotate90(&buffer),
        Angle::D180 => imageops::rotate180(&buffer),
        Angle::D270 => imageops::rotate270(&buffer),
    };
    let out = Geometry {
        width: rotated.width(),
        height: rotated.height(),
        bands: geometry.bands,
    };
    Ok((rotated.into_raw(), out))
}

impl ImageBackend for RustBackend {
    type Image = RustImage;

    fn probe_loader(&self, path: &Path) -> Result<CodecKind, BackendError> {
        let mut head = Vec::with_capacity(64);
        File::open(path)?.take(64).read_to_end(&mut head)?;
        image::guess_format(&head)
            .ok()
            .and_then(codec_for)
            .ok_or_else(|| {
                BackendError::UnsupportedFormat(format!("no decoder for {}", path.display()))
            })
    }

    fn read_header(&self, path: &Path, codec: CodecKind) -> Result<ImageInfo, BackendError> {
        let mut decoder = open_decoder(path)?;
        let icc = decoder.icc_profile().map_err(|e| decode_error(path, e))?;
        Ok(source_info(
            codec,
            decoder.dimensions(),
            describe(decoder.color_type()),
            icc,
            read_orientation(path),
        ))
    }

    fn decode(
        &self,
        path: &Path,
        codec: CodecKind,
        options: DecodeOptions,
    ) -> Result<RustImage, BackendError> {
        debug!(
            "decoding {} (shrink {}, sequential {})",
            path.display(),
            options.shrink,
            options.sequential
        );
        let orientation = read_orientation(path);

        if codec.supports_shrink_on_load() && options.shrink > 1 {
            match decode_jpeg_scaled(path, options.shrink)? {
                Some((samples, geometry, icc)) => {
                    let info = source_info(
                        codec,
                        (geometry.width, geometry.height),
                        (geometry.bands, BandFormat::U8),
                        icc,
                        orientation,
                    );
                    let source = RasterSource::new(samples, geometry)?;
                    return Ok(RustImage::with_stream(info, Box::new(source)));
                }
                None => debug!("scaled decode unavailable, decoding at full size"),
            }
        }

        let mut decoder = open_decoder(path)?;
        let icc = decoder.icc_profile().ok().flatten();
        let image = DynamicImage::from_decoder(decoder).map_err(|e| decode_error(path, e))?;
        let (width, height) = (image.width(), image.height());
        let (samples, bands, format) = into_samples(image);
        let info = source_info(codec, (width, height), (bands, format), icc, orientation);
        let geometry = Geometry {
            width,
            height,
            bands,
        };
        let source = RasterSource::new(samples, geometry)?;
        Ok(RustImage::with_stream(info, Box::new(source)))
    }

    fn unpack(&self, mut image: RustImage) -> Result<RustImage, BackendError> {
        // The Radiance decoder already expands shared-exponent pixels to
        // float; only the bookkeeping changes here.
        image.info.coding = Coding::None;
        image.info.format = BandFormat::F32;
        Ok(image)
    }

    fn colour_convert(
        &self,
        image: RustImage,
        space: Interpretation,
    ) -> Result<RustImage, BackendError> {
        let from = image.info.interpretation;
        if from == space {
            return Ok(image);
        }
        let bands = image.info.bands;
        let mut image = image.map(move |data| {
            colour::convert(data, bands, from, space);
            Ok(())
        });
        image.info.interpretation = space;
        Ok(image)
    }

    fn shrink_block(&self, image: RustImage, shrink: u32) -> Result<RustImage, BackendError> {
        if shrink <= 1 {
            return Ok(image);
        }
        let geometry = image.geometry();
        let (mut info, stream) = image.into_stream();
        let source = ShrinkSource::new(stream, geometry, shrink);
        let out = source.geometry();
        info.width = out.width;
        info.height = out.height;
        Ok(RustImage::with_stream(info, Box::new(source)))
    }

    fn tile_cache(&self, image: RustImage, params: CacheParams) -> Result<RustImage, BackendError> {
        let geometry = image.geometry();
        let (info, stream) = image.into_stream();
        let chunks: StripStream = Box::new(Rechunk::new(stream, geometry, params.strip_height));
        Ok(RustImage {
            info,
            pixels: Pixels::Cached {
                cache: Arc::new(TileCache::new(chunks, params.max_tiles)),
                strip_height: params.strip_height.max(1),
            },
        })
    }

    fn affine_resample(
        &self,
        image: RustImage,
        params: &AffineParams,
    ) -> Result<RustImage, BackendError> {
        if params.width == 0 || params.height == 0 || params.scale <= 0.0 {
            return Err(BackendError::ProcessingFailed(format!(
                "invalid resample to {}x{} at scale {}",
                params.width, params.height, params.scale
            )));
        }
        // Resampling always reads through a cache; supply one if the caller
        // did not.
        let mut image = image;
        if matches!(image.pixels, Pixels::Stream(_)) {
            let demand = affine_demand_lines(params.band_rows, params.scale, params.kernel);
            image = self.tile_cache(image, cache_params(demand))?;
        }
        let input = image.geometry();
        let Pixels::Cached {
            cache,
            strip_height,
        } = image.pixels
        else {
            return Err(BackendError::ProcessingFailed("resample input is not cached".into()));
        };

        let mut info = image.info;
        info.width = params.width;
        info.height = params.height;
        let source = AffineSource::new(cache, strip_height, input, params)?;
        Ok(RustImage::with_stream(info, Box::new(source)))
    }

    fn icc_import(
        &self,
        image: RustImage,
        fallback: Option<&ColourProfile>,
    ) -> Result<RustImage, BackendError> {
        let source = match (&image.info.icc_profile, fallback) {
            (Some(bytes), _) => LoadedProfile::from_bytes(bytes.clone())?,
            (None, Some(profile)) => LoadedProfile::load(profile)?,
            (None, None) => LoadedProfile::load(&ColourProfile::Srgb)?,
        };
        let srgb = LoadedProfile::load(&ColourProfile::Srgb)?;
        let bands = image.info.bands;
        let to_srgb = IccTransform::between(&source, &srgb, bands)?;

        let mut image = image.map(move |data| {
            if let Some(transform) = &to_srgb {
                transform.apply(data)?;
            }
            colour::convert(data, bands, Interpretation::Srgb, Interpretation::Xyz);
            Ok(())
        });
        image.info.interpretation = Interpretation::Xyz;
        image.info.format = BandFormat::F32;
        Ok(image)
    }

    fn icc_export(
        &self,
        image: RustImage,
        profile: Option<&ColourProfile>,
    ) -> Result<RustImage, BackendError> {
        let target = match (profile, &image.info.icc_profile) {
            (Some(profile), _) => LoadedProfile::load(profile)?,
            (None, Some(bytes)) => LoadedProfile::from_bytes(bytes.clone())?,
            (None, None) => LoadedProfile::load(&ColourProfile::Srgb)?,
        };
        let srgb = LoadedProfile::load(&ColourProfile::Srgb)?;
        let bands = image.info.bands;
        let from = image.info.interpretation;
        let from_srgb = IccTransform::between(&srgb, &target, bands)?;
        let attached = target.bytes.clone();

        let mut image = image.map(move |data| {
            colour::convert(data, bands, from, Interpretation::Srgb);
            if let Some(transform) = &from_srgb {
                transform.apply(data)?;
            }
            Ok(())
        });
        image.info.interpretation = Interpretation::Srgb;
        image.info.format = BandFormat::U8;
        image.info.icc_profile = attached;
        Ok(image)
    }

    fn icc_transform(
        &self,
        image: RustImage,
        export: &ColourProfile,
        import: Option<&ColourProfile>,
    ) -> Result<RustImage, BackendError> {
        let source = match (&image.info.icc_profile, import) {
            (Some(bytes), _) => LoadedProfile::from_bytes(bytes.clone())?,
            (None, Some(profile)) => LoadedProfile::load(profile)?,
            (None, None) => {
                return Err(BackendError::Colour("no source profile to transform from".into()));
            }
        };
        let target = LoadedProfile::load(export)?;
        let transform = IccTransform::between(&source, &target, image.info.bands)?;
        let attached = target.bytes.clone();

        let mut image = match transform {
            Some(transform) => image.map(move |data| transform.apply(data)),
            None => image,
        };
        image.info.icc_profile = attached;
        Ok(image)
    }

    fn convolve(
        &self,
        image: RustImage,
        mask: &ConvolutionMask,
    ) -> Result<RustImage, BackendError> {
        let geometry = image.geometry();
        let (info, stream) = image.into_stream();
        let source = ConvolveSource::new(
            stream,
            geometry,
            colour::colour_bands(geometry.bands),
            mask.clone(),
        );
        Ok(RustImage::with_stream(info, Box::new(source)))
    }

    fn extract_area(&self, image: RustImage, area: Area) -> Result<RustImage, BackendError> {
        let geometry = image.geometry();
        if area.width == 0
            || area.height == 0
            || area.left + area.width > geometry.width
            || area.top + area.height > geometry.height
        {
            return Err(BackendError::ProcessingFailed(format!(
                "area {}x{}+{}+{} is outside the {}x{} image",
                area.width, area.height, area.left, area.top, geometry.width, geometry.height
            )));
        }
        let (mut info, stream) = image.into_stream();
        info.width = area.width;
        info.height = area.height;
        Ok(RustImage::with_stream(
            info,
            Box::new(CropSource::new(stream, geometry, area)),
        ))
    }

    fn rotate(&self, image: RustImage, angle: Angle) -> Result<RustImage, BackendError> {
        if angle == Angle::D0 {
            return Ok(image);
        }
        let geometry = image.geometry();
        let (mut info, stream) = image.into_stream();
        let data = materialise(stream, geometry)?;
        let (rotated, out) = rotate_pixels(data, geometry, angle)?;
        info.width = out.width;
        info.height = out.height;
        let source = RasterSource::new(Samples::F32(rotated), out)?;
        Ok(RustImage::with_stream(info, Box::new(source)))
    }

    fn write_to_file(&self, image: RustImage, path: &Path) -> Result<(), BackendError> {
        let format = output_format(path)?;
        let geometry = image.geometry();
        let (info, stream) = image.into_stream();
        let data = materialise(stream, geometry)?;

        let deep = info.format != BandFormat::U8
            && matches!(format, ImageFormat::Png | ImageFormat::Tiff);
        let pixels = encodable(quantise(&data, geometry, deep)?, format);

        let mut encoded = Vec::new();
        pixels
            .write_to(&mut Cursor::new(&mut encoded), format)
            .map_err(|e| BackendError::ProcessingFailed(format!("encode failed: {e}")))?;
        if let Some(icc) = &info.icc_profile {
            encoded = embed_icc(encoded, format, icc)?;
        }
        write_atomic(path, &encoded)
    }
}
