//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the narrow boundary between thumbnail policy
//! and pixel work. Each operation consumes an image handle and returns a new
//! one, so a pipeline is a single-owner chain of handles: no stage can keep a
//! reference to an image another stage has moved on from.
//!
//! Handles are lazy in the production backend: building the chain is cheap
//! and pixels are only computed when a later stage (ultimately
//! [`write_to_file`](ImageBackend::write_to_file)) pulls them.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the
//! recording `MockBackend` in this module.

use super::orientation::Angle;
use super::params::{
    AffineParams, Area, BandFormat, CacheParams, CodecKind, Coding, ColourProfile,
    ConvolutionMask, DecodeOptions, Interpretation,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Colour transform failed: {0}")]
    Colour(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Attributes of an image, known without computing any pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
    pub format: BandFormat,
    pub coding: Coding,
    pub interpretation: Interpretation,
    /// EXIF Orientation tag, if the source carries one.
    pub orientation: Option<u16>,
    /// Raw ICC profile attached to the image.
    pub icc_profile: Option<Arc<[u8]>>,
}

impl ImageInfo {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_profile(&self) -> bool {
        self.icc_profile.is_some()
    }
}

/// A (possibly lazy) image owned by one pipeline stage at a time.
pub trait ImageHandle: Send {
    fn info(&self) -> &ImageInfo;

    /// Metadata edits (dropping the profile or the orientation tag) that do
    /// not touch pixels.
    fn info_mut(&mut self) -> &mut ImageInfo;
}

/// Trait for image processing backends.
///
/// Every transform takes its input by value and fails with a
/// [`BackendError`] on malformed input.
pub trait ImageBackend: Sync {
    type Image: ImageHandle;

    /// Pick a decoder for `path` from its contents.
    fn probe_loader(&self, path: &Path) -> Result<CodecKind, BackendError>;

    /// Dimensions, orientation and embedded profile, without decoding pixels.
    fn read_header(&self, path: &Path, codec: CodecKind) -> Result<ImageInfo, BackendError>;

    fn decode(
        &self,
        path: &Path,
        codec: CodecKind,
        options: DecodeOptions,
    ) -> Result<Self::Image, BackendError>;

    /// Expand a packed coding (Radiance) to float samples.
    fn unpack(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    fn colour_convert(
        &self,
        image: Self::Image,
        space: Interpretation,
    ) -> Result<Self::Image, BackendError>;

    /// Block-average shrink by an integer factor on both axes.
    fn shrink_block(&self, image: Self::Image, shrink: u32) -> Result<Self::Image, BackendError>;

    /// Put a [`TileCache`](super::tile_cache::TileCache) in front of the image.
    fn tile_cache(
        &self,
        image: Self::Image,
        params: CacheParams,
    ) -> Result<Self::Image, BackendError>;

    fn affine_resample(
        &self,
        image: Self::Image,
        params: &AffineParams,
    ) -> Result<Self::Image, BackendError>;

    /// Device space to linear XYZ, using the embedded profile if there is
    /// one, else `fallback`.
    fn icc_import(
        &self,
        image: Self::Image,
        fallback: Option<&ColourProfile>,
    ) -> Result<Self::Image, BackendError>;

    /// Linear XYZ to device space. `None` exports back to the embedded profile.
    fn icc_export(
        &self,
        image: Self::Image,
        profile: Option<&ColourProfile>,
    ) -> Result<Self::Image, BackendError>;

    /// Device to device: embedded profile (else `import`) to `export`.
    fn icc_transform(
        &self,
        image: Self::Image,
        export: &ColourProfile,
        import: Option<&ColourProfile>,
    ) -> Result<Self::Image, BackendError>;

    fn convolve(
        &self,
        image: Self::Image,
        mask: &ConvolutionMask,
    ) -> Result<Self::Image, BackendError>;

    fn extract_area(&self, image: Self::Image, area: Area) -> Result<Self::Image, BackendError>;

    fn rotate(&self, image: Self::Image, angle: Angle) -> Result<Self::Image, BackendError>;

    /// Evaluate the image and write it; format follows the extension.
    fn write_to_file(&self, image: Self::Image, path: &Path) -> Result<(), BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations without executing them.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    ///
    /// Each operation updates the handle's [`ImageInfo`] the way the real
    /// operation would, so pipeline decisions made from image attributes can
    /// be tested.
    pub struct MockBackend {
        pub codec: CodecKind,
        pub source: ImageInfo,
        pub operations: Mutex<Vec<RecordedOp>>,
        /// Name of an operation (as in [`RecordedOp::name`]) that should fail.
        pub fail_on: Option<&'static str>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct MockImage {
        pub info: ImageInfo,
    }

    impl ImageHandle for MockImage {
        fn info(&self) -> &ImageInfo {
            &self.info
        }

        fn info_mut(&mut self) -> &mut ImageInfo {
            &mut self.info
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        ProbeLoader(String),
        ReadHeader(String),
        Decode { path: String, shrink: u32, sequential: bool },
        Unpack,
        ColourConvert(Interpretation),
        ShrinkBlock(u32),
        TileCache(CacheParams),
        Affine(AffineParams),
        IccImport(Option<ColourProfile>),
        IccExport(Option<ColourProfile>),
        IccTransform {
            export: ColourProfile,
            import: Option<ColourProfile>,
        },
        Convolve,
        ExtractArea(Area),
        Rotate(Angle),
        Write {
            path: String,
            orientation: Option<u16>,
        },
    }

    impl RecordedOp {
        pub fn name(&self) -> &'static str {
            match self {
                Self::ProbeLoader(_) => "probe_loader",
                Self::ReadHeader(_) => "read_header",
                Self::Decode { .. } => "decode",
                Self::Unpack => "unpack",
                Self::ColourConvert(_) => "colour_convert",
                Self::ShrinkBlock(_) => "shrink_block",
                Self::TileCache(_) => "tile_cache",
                Self::Affine(_) => "affine_resample",
                Self::IccImport(_) => "icc_import",
                Self::IccExport(_) => "icc_export",
                Self::IccTransform { .. } => "icc_transform",
                Self::Convolve => "convolve",
                Self::ExtractArea(_) => "extract_area",
                Self::Rotate(_) => "rotate",
                Self::Write { .. } => "write_to_file",
            }
        }
    }

    /// An 8-bit sRGB image with no profile or orientation.
    pub fn srgb_info(width: u32, height: u32) -> ImageInfo {
        ImageInfo {
            width,
            height,
            bands: 3,
            format: BandFormat::U8,
            coding: Coding::None,
            interpretation: Interpretation::Srgb,
            orientation: None,
            icc_profile: None,
        }
    }

    impl MockBackend {
        pub fn new(width: u32, height: u32) -> Self {
            Self::with_info(CodecKind::Jpeg, srgb_info(width, height))
        }

        pub fn with_info(codec: CodecKind, source: ImageInfo) -> Self {
            Self {
                codec,
                source,
                operations: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        pub fn failing_on(mut self, operation: &'static str) -> Self {
            self.fail_on = Some(operation);
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn operation_names(&self) -> Vec<&'static str> {
            self.get_operations().iter().map(RecordedOp::name).collect()
        }

        fn record(&self, op: RecordedOp) -> Result<(), BackendError> {
            let name = op.name();
            self.operations.lock().unwrap().push(op);
            if self.fail_on == Some(name) {
                return Err(match name {
                    "probe_loader" => BackendError::UnsupportedFormat("mock".into()),
                    "decode" | "read_header" => BackendError::Decode("mock".into()),
                    "icc_import" | "icc_export" | "icc_transform" => {
                        BackendError::Colour("mock".into())
                    }
                    _ => BackendError::ProcessingFailed(format!("mock {name} failure")),
                });
            }
            Ok(())
        }

        fn path(path: &Path) -> String {
            path.to_string_lossy().to_string()
        }
    }

    impl ImageBackend for MockBackend {
        type Image = MockImage;

        fn probe_loader(&self, path: &Path) -> Result<CodecKind, BackendError> {
            self.record(RecordedOp::ProbeLoader(Self::path(path)))?;
            Ok(self.codec)
        }

        fn read_header(&self, path: &Path, _codec: CodecKind) -> Result<ImageInfo, BackendError> {
            self.record(RecordedOp::ReadHeader(Self::path(path)))?;
            Ok(self.source.clone())
        }

        fn decode(
            &self,
            path: &Path,
            codec: CodecKind,
            options: DecodeOptions,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Decode {
                path: Self::path(path),
                shrink: options.shrink,
                sequential: options.sequential,
            })?;
            let mut info = self.source.clone();
            if codec.supports_shrink_on_load() && options.shrink > 1 {
                info.width = info.width.div_ceil(options.shrink);
                info.height = info.height.div_ceil(options.shrink);
            }
            Ok(MockImage { info })
        }

        fn unpack(&self, mut image: MockImage) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Unpack)?;
            image.info.coding = Coding::None;
            image.info.format = BandFormat::F32;
            Ok(image)
        }

        fn colour_convert(
            &self,
            mut image: MockImage,
            space: Interpretation,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::ColourConvert(space))?;
            image.info.interpretation = space;
            Ok(image)
        }

        fn shrink_block(&self, mut image: MockImage, shrink: u32) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::ShrinkBlock(shrink))?;
            image.info.width = (image.info.width / shrink).max(1);
            image.info.height = (image.info.height / shrink).max(1);
            Ok(image)
        }

        fn tile_cache(&self, image: MockImage, params: CacheParams) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::TileCache(params))?;
            Ok(image)
        }

        fn affine_resample(
            &self,
            mut image: MockImage,
            params: &AffineParams,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Affine(*params))?;
            image.info.width = params.width;
            image.info.height = params.height;
            Ok(image)
        }

        fn icc_import(
            &self,
            mut image: MockImage,
            fallback: Option<&ColourProfile>,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::IccImport(fallback.cloned()))?;
            image.info.interpretation = Interpretation::Xyz;
            image.info.format = BandFormat::F32;
            Ok(image)
        }

        fn icc_export(
            &self,
            mut image: MockImage,
            profile: Option<&ColourProfile>,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::IccExport(profile.cloned()))?;
            image.info.interpretation = Interpretation::Srgb;
            image.info.format = BandFormat::U8;
            if profile.is_some() {
                image.info.icc_profile = Some(Arc::from(&b"export"[..]));
            }
            Ok(image)
        }

        fn icc_transform(
            &self,
            mut image: MockImage,
            export: &ColourProfile,
            import: Option<&ColourProfile>,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::IccTransform {
                export: export.clone(),
                import: import.cloned(),
            })?;
            image.info.icc_profile = Some(Arc::from(&b"export"[..]));
            Ok(image)
        }

        fn convolve(&self, image: MockImage, _mask: &ConvolutionMask) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Convolve)?;
            Ok(image)
        }

        fn extract_area(&self, mut image: MockImage, area: Area) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::ExtractArea(area))?;
            if area.left + area.width > image.info.width || area.top + area.height > image.info.height
            {
                return Err(BackendError::ProcessingFailed("area outside image".into()));
            }
            image.info.width = area.width;
            image.info.height = area.height;
            Ok(image)
        }

        fn rotate(&self, mut image: MockImage, angle: Angle) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Rotate(angle))?;
            let (width, height) = angle.oriented(image.info.dimensions());
            image.info.width = width;
            image.info.height = height;
            Ok(image)
        }

        fn write_to_file(&self, image: MockImage, path: &Path) -> Result<(), BackendError> {
            self.record(RecordedOp::Write {
                path: Self::path(path),
                orientation: image.info.orientation,
            })
        }
    }

    #[test]
    fn mock_records_operations_in_order() {
        let backend = MockBackend::new(800, 600);
        let path = Path::new("/test/image.jpg");

        let codec = backend.probe_loader(path).unwrap();
        let image = backend.decode(path, codec, DecodeOptions::default()).unwrap();
        let image = backend.shrink_block(image, 2).unwrap();
        assert_eq!(image.info().dimensions(), (400, 300));

        assert_eq!(
            backend.operation_names(),
            vec!["probe_loader", "decode", "shrink_block"]
        );
    }

    #[test]
    fn mock_decode_applies_shrink_on_load_for_jpeg_only() {
        let jpeg = MockBackend::new(801, 601);
        let options = DecodeOptions {
            sequential: true,
            shrink: 2,
        };
        let image = jpeg.decode(Path::new("a.jpg"), CodecKind::Jpeg, options).unwrap();
        assert_eq!(image.info().dimensions(), (401, 301));

        let png = MockBackend::with_info(CodecKind::Png, srgb_info(801, 601));
        let image = png.decode(Path::new("a.png"), CodecKind::Png, options).unwrap();
        assert_eq!(image.info().dimensions(), (801, 601));
    }

    #[test]
    fn mock_failure_injection() {
        let backend = MockBackend::new(800, 600).failing_on("decode");
        let result = backend.decode(Path::new("a.jpg"), CodecKind::Jpeg, DecodeOptions::default());
        assert!(matches!(result, Err(BackendError::Decode(_))));
        // The failing call is still recorded.
        assert_eq!(backend.operation_names(), vec!["decode"]);
    }
}
