//! Pure calculation functions for the thumbnail geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! We shrink in two stages: first a block-average shrink, which can only
//! shrink by integer factors, then a residual affine resample with an
//! interpolation kernel to reach the exact size. [`calculate_shrink`] splits
//! the overall factor between the two.

use super::params::{Area, CacheParams, Kernel};

/// Output rows evaluated together by the residual resample.
pub const RESAMPLE_BAND_ROWS: u32 = 16;

/// Rows per strip in the cache in front of the residual resample.
pub const CACHE_STRIP_HEIGHT: u32 = 10;

/// How the target box constrains the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeConstraint {
    /// Never enlarge: a source that already fits the box is left at its size.
    #[default]
    OnlyShrinkLarger,
    /// Always scale to the box, enlarging small sources.
    FillArea,
}

/// How a source is reduced to the target size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShrinkPlan {
    /// Overall source/target ratio along the chosen axis.
    pub factor: f64,
    /// Block-average shrink, always ≥ 1.
    pub integer_shrink: u32,
    /// Scale left for the affine resample after the integer shrink.
    pub residual_scale: f64,
    pub is_upscale: bool,
}

impl ShrinkPlan {
    /// No shrink and no resample: the output is the source.
    pub fn is_identity(&self) -> bool {
        self.integer_shrink == 1 && self.residual_scale == 1.0
    }

    /// Size after the block shrink.
    pub fn shrunk_dimensions(&self, (width, height): (u32, u32)) -> (u32, u32) {
        if self.is_upscale {
            return (width, height);
        }
        (
            (width / self.integer_shrink).max(1),
            (height / self.integer_shrink).max(1),
        )
    }

    /// Size after the residual resample.
    pub fn output_dimensions(&self, (width, height): (u32, u32)) -> (u32, u32) {
        let scaled = |dim: u32| ((dim as f64 / self.factor).round() as u32).max(1);
        (scaled(width), scaled(height))
    }

    /// Whether the residual resample changes anything.
    pub fn needs_resample(&self, source: (u32, u32)) -> bool {
        (self.residual_scale - 1.0).abs() > f64::EPSILON
            || self.output_dimensions(source) != self.shrunk_dimensions(source)
    }
}

/// Compute the shrink plan for a source of `source` dimensions (already
/// swapped if a quarter-turn rotation will be applied) into `target`.
///
/// When cropping, the smaller axis ratio is used so the result overfills the
/// box and can be trimmed; otherwise the larger one, so neither axis
/// overflows.
///
/// # Examples
/// ```
/// # use cuticle::imaging::calculations::{calculate_shrink, ResizeConstraint};
/// let plan = calculate_shrink((4000, 3000), (800, 800), ResizeConstraint::OnlyShrinkLarger, false);
/// assert_eq!(plan.integer_shrink, 5);
/// assert_eq!(plan.output_dimensions((4000, 3000)), (800, 600));
/// ```
pub fn calculate_shrink(
    source: (u32, u32),
    target: (u32, u32),
    constraint: ResizeConstraint,
    crop: bool,
) -> ShrinkPlan {
    let (width, height) = source;
    let (mut target_w, mut target_h) = target;

    if constraint == ResizeConstraint::OnlyShrinkLarger && width <= target_w && height <= target_h
    {
        target_w = width;
        target_h = height;
    }

    let horizontal = width as f64 / target_w as f64;
    let vertical = height as f64 / target_h as f64;
    let factor = if crop {
        horizontal.min(vertical)
    } else {
        horizontal.max(vertical)
    };

    if factor < 1.0 {
        return ShrinkPlan {
            factor,
            integer_shrink: 1,
            residual_scale: 1.0 / factor,
            is_upscale: true,
        };
    }

    let shrink = (factor.floor() as u32).max(1);

    // Size after the int shrink differs from width/factor by truncation, and
    // differently on each axis, so take the residual from the real sizes.
    let iwidth = (width / shrink).max(1);
    let iheight = (height / shrink).max(1);
    let hresidual = (width as f64 / factor) / iwidth as f64;
    let vresidual = (height as f64 / factor) / iheight as f64;

    ShrinkPlan {
        factor,
        integer_shrink: shrink,
        residual_scale: hresidual.max(vresidual),
        is_upscale: false,
    }
}

/// Best shrink-on-load factor for decoders that support it.
///
/// Linear processing disables it: the decoder shrinks in gamma-encoded luma,
/// not linear light.
pub fn decode_hint(plan: &ShrinkPlan, linear: bool) -> u32 {
    if linear {
        return 1;
    }
    match plan.integer_shrink {
        s if s >= 8 => 8,
        s if s >= 4 => 4,
        s if s >= 2 => 2,
        _ => 1,
    }
}

/// Kernel for the residual resample. Enlarging forces nearest-neighbour;
/// smooth kernels make small images look fuzzy.
pub fn select_kernel(plan: &ShrinkPlan, configured: Kernel) -> Kernel {
    if plan.residual_scale > 1.0 {
        Kernel::Nearest
    } else {
        configured
    }
}

/// Sharpening only follows a genuine shrink; a sharpened nearest-neighbour
/// enlargement just shows off its blocks.
pub fn should_sharpen(plan: &ShrinkPlan, has_mask: bool) -> bool {
    has_mask && !plan.is_upscale
}

/// Input pixels the resample may read either side of an output span. A
/// shrinking kernel is stretched by `1 / scale`; one more pixel covers the
/// rounding of the span's ends.
pub fn affine_reach(scale: f64, kernel: Kernel) -> u32 {
    (kernel.radius() as f64 / scale.min(1.0)).ceil() as u32 + 1
}

/// Input rows one band of the residual resample reads.
pub fn affine_demand_lines(band_rows: u32, scale: f64, kernel: Kernel) -> u32 {
    (band_rows as f64 / scale).ceil() as u32 + 2 * affine_reach(scale, kernel)
}

/// Strip cache geometry able to serve `demand_lines` rows without evicting
/// any of them: twice the strips those rows can straddle.
pub fn cache_params(demand_lines: u32) -> CacheParams {
    CacheParams {
        strip_height: CACHE_STRIP_HEIGHT,
        max_tiles: (2 * demand_lines.div_ceil(CACHE_STRIP_HEIGHT)).max(2),
    }
}

/// Centre crop of `target` out of `dims`, or `None` if it does not fit.
pub fn centre_crop(dims: (u32, u32), target: (u32, u32)) -> Option<Area> {
    let (width, height) = dims;
    let (target_w, target_h) = target;
    if width < target_w || height < target_h {
        return None;
    }
    Some(Area {
        left: (width - target_w) / 2,
        top: (height - target_h) / 2,
        width: target_w,
        height: target_h,
    })
}
