//! Image processing: shrink planning, the resample pipeline and the backend
//! that executes it.
//!
//! | Concern | Where |
//! |---|---|
//! | **Shrink plan** | [`calculations`]: integer shrink, residual scale, decode hint, cache sizing |
//! | **Orientation** | [`orientation`]: EXIF code → [`Angle`] |
//! | **Strip cache** | [`tile_cache`]: bounded FIFO window with a single decode cursor |
//! | **Pipeline** | [`operations`]: unpack → import → convert → shrink → cache + resample → export → sharpen |
//! | **Pixels** | [`RustBackend`]: `image` decoders/encoders, `moxcms`, strip streams |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
pub mod calculations;
mod colour;
pub mod operations;
pub mod orientation;
pub mod params;
mod raster;
pub mod rust_backend;
pub mod tile_cache;

pub use backend::{BackendError, ImageBackend, ImageHandle, ImageInfo};
pub use calculations::{ResizeConstraint, ShrinkPlan, calculate_shrink, decode_hint};
pub use operations::{OperationError, ResampleConfig, ResamplePipeline, Stage};
pub use orientation::Angle;
pub use params::{CodecKind, ColourProfile, ConvolutionMask, Kernel, MaskError, UnknownKernel};
pub use rust_backend::RustBackend;
pub use tile_cache::{SequentialSource, TileCache, TileCacheError};
