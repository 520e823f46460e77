//! Colour-space arithmetic on normalised float samples.
//!
//! Samples arrive interleaved, `bands` per pixel. Images with 3 or 4 bands
//! are RGB(A); 1 or 2 bands are grey (with alpha). Alpha is never touched.
//!
//! | Interpretation | RGB images | Grey images |
//! |---|---|---|
//! | `Srgb` | sRGB-encoded, 0..1 | sRGB-encoded luma |
//! | `Scrgb` | linear sRGB primaries | linear luma |
//! | `Xyz` | CIE XYZ, D65, Y = 1 at white | linear luma |
//!
//! ICC work is delegated to `moxcms`; profile transforms run in the
//! sRGB-encoded domain and are chained with the arithmetic here to reach
//! XYZ.

use super::backend::BackendError;
use super::params::{ColourProfile, Interpretation};
use moxcms::{ColorProfile, Layout, TransformExecutor, TransformOptions};
use std::sync::Arc;

/// Linear sRGB to XYZ (D65).
const RGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412_456_4, 0.357_576_1, 0.180_437_5],
    [0.212_672_9, 0.715_152_2, 0.072_175_0],
    [0.019_333_9, 0.119_192_0, 0.950_304_1],
];

const XYZ_TO_RGB: [[f32; 3]; 3] = [
    [3.240_454_2, -1.537_138_5, -0.498_531_4],
    [-0.969_266_0, 1.876_010_8, 0.041_556_0],
    [0.055_643_4, -0.204_025_9, 1.057_225_2],
];

pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.040_45 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn mul(m: &[[f32; 3]; 3], p: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2],
        m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2],
        m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2],
    ]
}

/// Number of colour (non-alpha) bands.
pub fn colour_bands(bands: u32) -> u32 {
    match bands {
        1 | 2 => 1,
        _ => 3,
    }
}

#[derive(Clone, Copy)]
enum Space {
    Encoded,
    Linear,
    Xyz,
}

fn space(interpretation: Interpretation) -> Space {
    match interpretation {
        Interpretation::Srgb => Space::Encoded,
        Interpretation::Scrgb => Space::Linear,
        Interpretation::Xyz => Space::Xyz,
    }
}

/// Convert interleaved samples in place between interpretations.
pub fn convert(data: &mut [f32], bands: u32, from: Interpretation, to: Interpretation) {
    let from = space(from);
    let to = space(to);
    let bands = bands as usize;

    if colour_bands(bands as u32) == 1 {
        // Grey has no primaries: XYZ and linear are the same luma.
        for pixel in data.chunks_exact_mut(bands) {
            pixel[0] = match (from, to) {
                (Space::Encoded, Space::Linear | Space::Xyz) => srgb_to_linear(pixel[0]),
                (Space::Linear | Space::Xyz, Space::Encoded) => linear_to_srgb(pixel[0]),
                _ => pixel[0],
            };
        }
        return;
    }

    for pixel in data.chunks_exact_mut(bands) {
        let mut p = [pixel[0], pixel[1], pixel[2]];
        // Up to linear RGB...
        match from {
            Space::Encoded => p = p.map(srgb_to_linear),
            Space::Linear => {}
            Space::Xyz => p = mul(&XYZ_TO_RGB, p),
        }
        // ...and out again.
        match to {
            Space::Encoded => p = p.map(linear_to_srgb),
            Space::Linear => {}
            Space::Xyz => p = mul(&RGB_TO_XYZ, p),
        }
        pixel[..3].copy_from_slice(&p);
    }
}

/// A parsed profile plus the bytes to attach to an image that ends up in it.
/// The builtin sRGB space attaches nothing.
pub struct LoadedProfile {
    pub profile: ColorProfile,
    pub bytes: Option<Arc<[u8]>>,
}

impl LoadedProfile {
    pub fn from_bytes(bytes: Arc<[u8]>) -> Result<Self, BackendError> {
        let profile = ColorProfile::new_from_slice(&bytes)
            .map_err(|e| BackendError::Colour(format!("invalid ICC profile: {e:?}")))?;
        Ok(Self {
            profile,
            bytes: Some(bytes),
        })
    }

    pub fn load(profile: &ColourProfile) -> Result<Self, BackendError> {
        match profile {
            ColourProfile::Srgb => Ok(Self {
                profile: ColorProfile::new_srgb(),
                bytes: None,
            }),
            ColourProfile::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    BackendError::Colour(format!("cannot read profile {}: {e}", path.display()))
                })?;
                Self::from_bytes(Arc::from(bytes))
            }
        }
    }

    pub fn is_builtin_srgb(&self) -> bool {
        self.bytes.is_none()
    }
}

/// Device-to-device transform over interleaved float RGB(A) samples.
pub struct IccTransform {
    executor: Arc<dyn TransformExecutor<f32> + Send + Sync>,
}

impl IccTransform {
    /// `None` when both ends are the builtin sRGB space. Grey images are
    /// left to the sRGB curve.
    pub fn between(
        source: &LoadedProfile,
        target: &LoadedProfile,
        bands: u32,
    ) -> Result<Option<Self>, BackendError> {
        if source.is_builtin_srgb() && target.is_builtin_srgb() {
            return Ok(None);
        }
        let layout = match bands {
            3 => Layout::Rgb,
            4 => Layout::Rgba,
            _ => return Ok(None),
        };
        let executor = source
            .profile
            .create_transform_f32(layout, &target.profile, layout, TransformOptions::default())
            .map_err(|e| BackendError::Colour(format!("cannot build ICC transform: {e:?}")))?;
        Ok(Some(Self { executor: Arc::from(executor) }))
    }

    pub fn apply(&self, data: &mut Vec<f32>) -> Result<(), BackendError> {
        let mut out = vec![0.0; data.len()];
        self.executor
            .transform(data, &mut out)
            .map_err(|e| BackendError::Colour(format!("ICC transform failed: {e:?}")))?;
        *data = out;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn srgb_curve_endpoints() {
        assert_eq!(srgb_to_linear(0.0), 0.0);
        assert!(close(srgb_to_linear(1.0), 1.0));
        assert!(close(linear_to_srgb(1.0), 1.0));
        // Mid grey: sRGB 0.5 is about 21.4% linear light.
        assert!(close(srgb_to_linear(0.5), 0.214_04));
    }

    #[test]
    fn srgb_curve_inverts() {
        for i in 0..=20 {
            let v = i as f32 / 20.0;
            assert!(close(linear_to_srgb(srgb_to_linear(v)), v), "{v}");
        }
    }

    #[test]
    fn white_maps_to_d65() {
        let mut px = vec![1.0, 1.0, 1.0];
        convert(&mut px, 3, Interpretation::Srgb, Interpretation::Xyz);
        assert!(close(px[0], 0.950_47));
        assert!(close(px[1], 1.0));
        assert!(close(px[2], 1.088_83));
    }

    #[test]
    fn xyz_round_trip_keeps_alpha() {
        let original = vec![0.2, 0.5, 0.9, 0.3];
        let mut px = original.clone();
        convert(&mut px, 4, Interpretation::Srgb, Interpretation::Xyz);
        assert_eq!(px[3], 0.3);
        convert(&mut px, 4, Interpretation::Xyz, Interpretation::Srgb);
        for (a, b) in px.iter().zip(&original) {
            assert!(close(*a, *b));
        }
    }

    #[test]
    fn grey_xyz_is_linear_luma() {
        let mut px = vec![0.5, 1.0];
        convert(&mut px, 2, Interpretation::Srgb, Interpretation::Xyz);
        assert!(close(px[0], 0.214_04));
        assert_eq!(px[1], 1.0);
    }

    #[test]
    fn scrgb_to_srgb_encodes() {
        let mut px = vec![0.214_04, 0.214_04, 0.214_04];
        convert(&mut px, 3, Interpretation::Scrgb, Interpretation::Srgb);
        assert!(close(px[0], 0.5));
    }

    #[test]
    fn builtin_to_builtin_needs_no_transform() {
        let srgb = LoadedProfile::load(&ColourProfile::Srgb).unwrap();
        assert!(IccTransform::between(&srgb, &srgb, 3).unwrap().is_none());
    }

    #[test]
    fn missing_profile_file_is_colour_error() {
        let err = LoadedProfile::load(&ColourProfile::File("/nonexistent/p.icc".into()))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Colour(_)));
    }

    #[test]
    fn garbage_profile_is_colour_error() {
        let err = LoadedProfile::from_bytes(Arc::from(&b"not a profile"[..]))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Colour(_)));
    }
}
