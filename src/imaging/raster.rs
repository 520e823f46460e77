//! Lazy strip streams: the pixel side of [`RustBackend`](super::RustBackend).
//!
//! An image's pixels are a [`StripStream`], a chain of stages each pulling
//! full-width strips of normalised `f32` samples from the stage before it.
//! Nothing is computed until the writer pulls the last stage, and each stage
//! buffers only the rows its own operation needs.
//!
//! The residual resample is the one parallel stage. It reads through a
//! shared [`TileCache`], and its column workers may all end up decoding
//! upstream strips. Upstream stages therefore never use rayon themselves: a
//! thread advancing the cache must not be able to steal a task that waits on
//! that same cache.

use super::backend::BackendError;
use super::calculations::affine_reach;
use super::params::{AffineParams, Area, ConvolutionMask, Kernel};
use super::tile_cache::{SequentialSource, TileCache, TileCacheError};
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use rayon::prelude::*;
use std::sync::Arc;

/// Rows per strip for stages that choose their own strip height.
pub const STRIP_ROWS: u32 = 16;

/// Output columns computed by one resample worker.
const COLUMN_TILE: u32 = 128;

/// A run of full-width rows starting at `top`.
#[derive(Debug, Clone, PartialEq)]
pub struct Strip {
    pub top: u32,
    pub rows: u32,
    pub data: Vec<f32>,
}

pub type StripStream = Box<dyn SequentialSource<Strip = Strip, Error = BackendError>>;

/// Size and band count of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
}

impl Geometry {
    pub fn row_len(&self) -> usize {
        self.width as usize * self.bands as usize
    }
}

impl From<TileCacheError<BackendError>> for BackendError {
    fn from(err: TileCacheError<BackendError>) -> Self {
        match err {
            TileCacheError::Source(inner) => inner,
            other => BackendError::ProcessingFailed(other.to_string()),
        }
    }
}

// ============================================================================
// Decoded raster
// ============================================================================

/// Decoded samples in their native storage.
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    fn normalised(&self, start: usize, end: usize) -> Vec<f32> {
        match self {
            Self::U8(v) => v[start..end].iter().map(|&s| s as f32 / 255.0).collect(),
            Self::U16(v) => v[start..end].iter().map(|&s| s as f32 / 65535.0).collect(),
            Self::F32(v) => v[start..end].to_vec(),
        }
    }
}

/// Emits a decoded raster as strips, converting to float as it goes.
pub struct RasterSource {
    samples: Samples,
    geometry: Geometry,
    next_row: u32,
}

impl RasterSource {
    pub fn new(samples: Samples, geometry: Geometry) -> Result<Self, BackendError> {
        let expected = geometry.row_len() * geometry.height as usize;
        if samples.len() != expected {
            return Err(BackendError::Decode(format!(
                "raster holds {} samples, expected {expected}",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            geometry,
            next_row: 0,
        })
    }
}

impl SequentialSource for RasterSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        if self.next_row >= self.geometry.height {
            return Ok(None);
        }
        let top = self.next_row;
        let rows = STRIP_ROWS.min(self.geometry.height - top);
        let row_len = self.geometry.row_len();
        let data = self
            .samples
            .normalised(top as usize * row_len, (top + rows) as usize * row_len);
        self.next_row += rows;
        Ok(Some(Strip { top, rows, data }))
    }
}

// ============================================================================
// Per-pixel map
// ============================================================================

pub type StripMap = Box<dyn FnMut(&mut Vec<f32>) -> Result<(), BackendError> + Send>;

/// Applies a sample transform to every strip.
pub struct MapSource {
    input: StripStream,
    map: StripMap,
}

impl MapSource {
    pub fn new(input: StripStream, map: StripMap) -> Self {
        Self { input, map }
    }
}

impl SequentialSource for MapSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        let Some(mut strip) = self.input.next_strip()? else {
            return Ok(None);
        };
        (self.map)(&mut strip.data)?;
        Ok(Some(strip))
    }
}

// ============================================================================
// Row buffer shared by the windowed stages
// ============================================================================

/// Holds the rows `[first, end)` of an input stream.
struct RowBuffer {
    input: StripStream,
    row_len: usize,
    first: u32,
    data: Vec<f32>,
}

impl RowBuffer {
    fn new(input: StripStream, geometry: Geometry) -> Self {
        Self {
            input,
            row_len: geometry.row_len(),
            first: 0,
            data: Vec::new(),
        }
    }

    fn end(&self) -> u32 {
        self.first + (self.data.len() / self.row_len) as u32
    }

    /// Pull strips until row `end - 1` is buffered.
    fn fill_to(&mut self, end: u32) -> Result<(), BackendError> {
        while self.end() < end {
            let Some(strip) = self.input.next_strip()? else {
                return Err(BackendError::Decode(format!(
                    "image ended at row {}, expected at least {end}",
                    self.end()
                )));
            };
            // Rows already discarded are dropped on arrival.
            let skip = self.first.saturating_sub(strip.top).min(strip.rows) as usize;
            self.data.extend_from_slice(&strip.data[skip * self.row_len..]);
        }
        Ok(())
    }

    fn row(&self, y: u32) -> &[f32] {
        let start = (y - self.first) as usize * self.row_len;
        &self.data[start..start + self.row_len]
    }

    fn rows(&self, y0: u32, y1: u32) -> &[f32] {
        let start = (y0 - self.first) as usize * self.row_len;
        let end = (y1 - self.first) as usize * self.row_len;
        &self.data[start..end]
    }

    /// Forget rows before `y`, including rows not pulled yet.
    fn discard_before(&mut self, y: u32) {
        if y <= self.first {
            return;
        }
        let buffered = (self.data.len() / self.row_len) as u32;
        let n = (y - self.first).min(buffered) as usize;
        self.data.drain(..n * self.row_len);
        self.first = y;
    }
}

// ============================================================================
// Block shrink
// ============================================================================

/// Integer block-average shrink. Trailing rows and columns that do not fill a
/// whole block are dropped.
pub struct ShrinkSource {
    input: RowBuffer,
    factor: u32,
    input_geometry: Geometry,
    output: Geometry,
    next_row: u32,
}

impl ShrinkSource {
    pub fn new(input: StripStream, geometry: Geometry, factor: u32) -> Self {
        let output = Geometry {
            width: (geometry.width / factor).max(1),
            height: (geometry.height / factor).max(1),
            bands: geometry.bands,
        };
        Self {
            input: RowBuffer::new(input, geometry),
            factor,
            input_geometry: geometry,
            output,
            next_row: 0,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.output
    }
}

impl SequentialSource for ShrinkSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        if self.next_row >= self.output.height {
            return Ok(None);
        }
        let top = self.next_row;
        let rows = STRIP_ROWS.min(self.output.height - top);
        let bands = self.output.bands as usize;
        // A factor larger than the image collapses that axis to one pixel.
        let block_w = self.factor.min(self.input_geometry.width);
        let block_h = self.factor.min(self.input_geometry.height);

        self.input.fill_to((top + rows) * block_h)?;

        let mut data = Vec::with_capacity(rows as usize * self.output.row_len());
        let mut acc = vec![0.0f32; self.output.row_len()];
        let norm = 1.0 / (block_w * block_h) as f32;
        for r in 0..rows {
            acc.iter_mut().for_each(|a| *a = 0.0);
            let y0 = (top + r) * block_h;
            for y in y0..y0 + block_h {
                let row = self.input.row(y);
                for x in 0..(self.output.width * block_w) as usize {
                    let ox = x / block_w as usize;
                    for b in 0..bands {
                        acc[ox * bands + b] += row[x * bands + b];
                    }
                }
            }
            data.extend(acc.iter().map(|a| a * norm));
        }

        self.input.discard_before((top + rows) * block_h);
        self.next_row += rows;
        Ok(Some(Strip { top, rows, data }))
    }
}

// ============================================================================
// Re-chunk to a fixed strip height
// ============================================================================

/// Regroups rows into strips of exactly `strip_height` (the last may be
/// shorter), as the tile cache indexes strips by `row / strip_height`.
pub struct Rechunk {
    input: RowBuffer,
    geometry: Geometry,
    strip_height: u32,
    next_row: u32,
}

impl Rechunk {
    pub fn new(input: StripStream, geometry: Geometry, strip_height: u32) -> Self {
        Self {
            input: RowBuffer::new(input, geometry),
            geometry,
            strip_height: strip_height.max(1),
            next_row: 0,
        }
    }
}

impl SequentialSource for Rechunk {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        if self.next_row >= self.geometry.height {
            return Ok(None);
        }
        let top = self.next_row;
        let end = (top + self.strip_height).min(self.geometry.height);
        self.input.fill_to(end)?;
        let data = self.input.rows(top, end).to_vec();
        self.input.discard_before(end);
        self.next_row = end;
        Ok(Some(Strip {
            top,
            rows: end - top,
            data,
        }))
    }
}

// ============================================================================
// Cache readers
// ============================================================================

pub type StripCache = TileCache<StripStream>;

/// Sequential reader over a cache, for stages other than the resample that
/// follow one.
pub struct CacheReader {
    cache: Arc<StripCache>,
    next: u32,
}

impl CacheReader {
    pub fn new(cache: Arc<StripCache>) -> Self {
        Self { cache, next: 0 }
    }
}

impl SequentialSource for CacheReader {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        match self.cache.fetch_strip(self.next) {
            Ok(strip) => {
                self.next += 1;
                Ok(Some(Strip::clone(&strip)))
            }
            Err(TileCacheError::OutOfRange { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Residual resample evaluated one band of output rows at a time. Column
/// tiles run in parallel, each reading its input window through the shared
/// cache and handing it to `fast_image_resize` with a crop box in source
/// coordinates.
pub struct AffineSource {
    cache: Arc<StripCache>,
    strip_height: u32,
    input: Geometry,
    output: Geometry,
    scale: f64,
    reach: u32,
    band_rows: u32,
    pixel_type: PixelType,
    alg: ResizeAlg,
    next_row: u32,
}

impl AffineSource {
    pub fn new(
        cache: Arc<StripCache>,
        strip_height: u32,
        input: Geometry,
        params: &AffineParams,
    ) -> Result<Self, BackendError> {
        let pixel_type = match input.bands {
            1 => PixelType::F32,
            2 => PixelType::F32x2,
            3 => PixelType::F32x3,
            4 => PixelType::F32x4,
            n => {
                return Err(BackendError::ProcessingFailed(format!(
                    "cannot resample an image with {n} bands"
                )));
            }
        };
        Ok(Self {
            cache,
            strip_height,
            input,
            output: Geometry {
                width: params.width,
                height: params.height,
                bands: input.bands,
            },
            scale: params.scale,
            reach: affine_reach(params.scale, params.kernel),
            band_rows: params.band_rows.max(1),
            pixel_type,
            alg: resize_alg(params.kernel),
            next_row: 0,
        })
    }

    /// Input span `[start, end)` behind output span `[from, to)` along an
    /// axis of `len` input pixels, widened by the kernel's reach.
    fn input_span(&self, from: u32, to: u32, len: u32) -> (u32, u32) {
        let start = ((from as f64 / self.scale).floor() as i64 - self.reach as i64).max(0) as u32;
        let end = ((to as f64 / self.scale).ceil() as u32 + self.reach).min(len);
        (start.min(end.saturating_sub(1)), end)
    }

    /// Crop offset and length, relative to a span starting at `start`, of
    /// the source region that maps onto output span `[from, to)`.
    fn crop_axis(&self, from: u32, to: u32, (start, end): (u32, u32)) -> (f64, f64) {
        let offset = (from as f64 / self.scale - start as f64).max(0.0);
        let length = ((to - from) as f64 / self.scale).min((end - start) as f64 - offset);
        (offset, length)
    }

    fn band(&self, top: u32, rows: u32) -> Result<Vec<f32>, BackendError> {
        let span_y = self.input_span(top, top + rows, self.input.height);
        let first_strip = span_y.0 / self.strip_height;
        let last_strip = (span_y.1 - 1) / self.strip_height;
        let (crop_top, crop_height) = self.crop_axis(top, top + rows, span_y);

        let bands = self.input.bands as usize;
        let in_row_len = self.input.row_len();
        let tiles = self.output.width.div_ceil(COLUMN_TILE);

        let computed: Vec<Vec<f32>> = (0..tiles)
            .into_par_iter()
            .map(|tile| -> Result<Vec<f32>, BackendError> {
                let strips = (first_strip..=last_strip)
                    .map(|index| self.cache.fetch_strip(index))
                    .collect::<Result<Vec<_>, _>>()?;

                let x0 = tile * COLUMN_TILE;
                let x1 = (x0 + COLUMN_TILE).min(self.output.width);
                let span_x = self.input_span(x0, x1, self.input.width);
                let (crop_left, crop_width) = self.crop_axis(x0, x1, span_x);

                let mut src = Image::new(span_x.1 - span_x.0, span_y.1 - span_y.0, self.pixel_type);
                let (col0, col1) = (span_x.0 as usize * bands, span_x.1 as usize * bands);
                let window = (span_y.0..span_y.1).flat_map(|y| {
                    let strip = &strips[(y / self.strip_height - first_strip) as usize];
                    let start = (y - strip.top) as usize * in_row_len;
                    &strip.data[start + col0..start + col1]
                });
                for (bytes, sample) in src.buffer_mut().chunks_exact_mut(4).zip(window) {
                    bytes.copy_from_slice(&sample.to_ne_bytes());
                }

                let mut dst = Image::new(x1 - x0, rows, self.pixel_type);
                let options = ResizeOptions::new()
                    .resize_alg(self.alg)
                    .use_alpha(false)
                    .crop(crop_left, crop_top, crop_width, crop_height);
                Resizer::new()
                    .resize(&src, &mut dst, &options)
                    .map_err(|e| BackendError::ProcessingFailed(format!("resample failed: {e}")))?;

                Ok(dst
                    .buffer()
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                    .collect())
            })
            .collect::<Result<_, _>>()?;

        // Interleave the column tiles back into full rows.
        let mut data = Vec::with_capacity(rows as usize * self.output.row_len());
        for r in 0..rows as usize {
            for (tile, values) in computed.iter().enumerate() {
                let x0 = tile as u32 * COLUMN_TILE;
                let width = ((x0 + COLUMN_TILE).min(self.output.width) - x0) as usize * bands;
                data.extend_from_slice(&values[r * width..(r + 1) * width]);
            }
        }
        Ok(data)
    }
}

fn resize_alg(kernel: Kernel) -> ResizeAlg {
    match kernel {
        Kernel::Nearest => ResizeAlg::Nearest,
        Kernel::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
        Kernel::Bicubic => ResizeAlg::Convolution(FilterType::CatmullRom),
        Kernel::Lanczos3 => ResizeAlg::Convolution(FilterType::Lanczos3),
    }
}

impl SequentialSource for AffineSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        if self.next_row >= self.output.height {
            return Ok(None);
        }
        let top = self.next_row;
        let rows = self.band_rows.min(self.output.height - top);
        let data = self.band(top, rows).inspect_err(|_| self.cache.abort())?;
        self.next_row += rows;
        Ok(Some(Strip { top, rows, data }))
    }
}

// ============================================================================
// Convolution
// ============================================================================

/// Applies a convolution mask to the colour bands, clamping at the edges.
/// Alpha is passed through.
pub struct ConvolveSource {
    input: RowBuffer,
    geometry: Geometry,
    colour_bands: usize,
    mask: ConvolutionMask,
    next_row: u32,
}

impl ConvolveSource {
    pub fn new(
        input: StripStream,
        geometry: Geometry,
        colour_bands: u32,
        mask: ConvolutionMask,
    ) -> Self {
        Self {
            input: RowBuffer::new(input, geometry),
            geometry,
            colour_bands: colour_bands as usize,
            mask,
            next_row: 0,
        }
    }
}

impl SequentialSource for ConvolveSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        let height = self.geometry.height;
        if self.next_row >= height {
            return Ok(None);
        }
        let top = self.next_row;
        let rows = STRIP_ROWS.min(height - top);
        let (mw, mh) = (self.mask.width as i64, self.mask.height as i64);
        let (cx, cy) = (mw / 2, mh / 2);
        let last_y = height as i64 - 1;
        let last_x = self.geometry.width as i64 - 1;

        let below = (mh - cy - 1) as u32;
        self.input.fill_to((top + rows + below).min(height))?;

        let bands = self.geometry.bands as usize;
        let scale = self.mask.scale as f32;
        let offset = (self.mask.offset / 255.0) as f32;
        let mut data = Vec::with_capacity(rows as usize * self.geometry.row_len());

        for y in top..top + rows {
            let centre = self.input.row(y);
            for x in 0..self.geometry.width as i64 {
                for b in 0..bands {
                    if b >= self.colour_bands {
                        data.push(centre[x as usize * bands + b]);
                        continue;
                    }
                    let mut sum = 0.0f32;
                    for my in 0..mh {
                        let sy = (y as i64 + my - cy).clamp(0, last_y) as u32;
                        let row = self.input.row(sy);
                        for mx in 0..mw {
                            let sx = (x + mx - cx).clamp(0, last_x) as usize;
                            let c = self.mask.coefficients[(my * mw + mx) as usize] as f32;
                            sum += c * row[sx * bands + b];
                        }
                    }
                    data.push(sum / scale + offset);
                }
            }
        }

        self.next_row += rows;
        self.input
            .discard_before(self.next_row.saturating_sub(cy as u32));
        Ok(Some(Strip { top, rows, data }))
    }
}

// ============================================================================
// Extract area
// ============================================================================

pub struct CropSource {
    input: RowBuffer,
    input_bands: usize,
    area: Area,
    next_row: u32,
}

impl CropSource {
    pub fn new(input: StripStream, geometry: Geometry, area: Area) -> Self {
        let mut buffer = RowBuffer::new(input, geometry);
        buffer.discard_before(area.top);
        Self {
            input: buffer,
            input_bands: geometry.bands as usize,
            area,
            next_row: 0,
        }
    }
}

impl SequentialSource for CropSource {
    type Strip = Strip;
    type Error = BackendError;

    fn next_strip(&mut self) -> Result<Option<Strip>, BackendError> {
        if self.next_row >= self.area.height {
            return Ok(None);
        }
        let top = self.next_row;
        let rows = STRIP_ROWS.min(self.area.height - top);
        let y0 = self.area.top + top;
        self.input.fill_to(y0 + rows)?;

        let bands = self.input_bands;
        let start = self.area.left as usize * bands;
        let end = start + self.area.width as usize * bands;
        let mut data = Vec::with_capacity(rows as usize * (end - start));
        for y in y0..y0 + rows {
            data.extend_from_slice(&self.input.row(y)[start..end]);
        }

        self.input.discard_before(y0 + rows);
        self.next_row += rows;
        Ok(Some(Strip { top, rows, data }))
    }
}

/// Pull a whole stream into one buffer.
pub fn materialise(mut stream: StripStream, geometry: Geometry) -> Result<Vec<f32>, BackendError> {
    let expected = geometry.row_len() * geometry.height as usize;
    let mut data = Vec::with_capacity(expected);
    while let Some(strip) = stream.next_strip()? {
        data.extend_from_slice(&strip.data);
    }
    if data.len() != expected {
        return Err(BackendError::ProcessingFailed(format!(
            "stream produced {} samples, expected {expected}",
            data.len()
        )));
    }
    Ok(data)
}
