//! EXIF orientation → rotation angle.
//!
//! Only the pure rotations are honoured:
//!
//! | Orientation | Angle |
//! |---|---|
//! | `3` | 180° |
//! | `6` | 90° clockwise |
//! | `8` | 270° clockwise |
//! | anything else, or absent | 0° |
//!
//! The mirrored codes (2, 4, 5, 7) combine a rotation with a flip. They map
//! to 0° on purpose; the intended handling of those codes was never settled,
//! so they are left untouched rather than half-corrected.

use std::fmt;

/// Clockwise rotation in multiples of 90°.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Angle {
    #[default]
    D0,
    D90,
    D180,
    D270,
}

impl Angle {
    /// Map an EXIF Orientation value to the rotation that displays it upright.
    pub fn from_orientation(orientation: Option<u16>) -> Self {
        match orientation {
            Some(6) => Self::D90,
            Some(8) => Self::D270,
            Some(3) => Self::D180,
            _ => Self::D0,
        }
    }

    /// Whether applying this rotation exchanges width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::D90 | Self::D270)
    }

    /// Dimensions as they will be after rotation.
    pub fn oriented(self, (width, height): (u32, u32)) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::D0 => 0,
            Self::D90 => 90,
            Self::D180 => 180,
            Self::D270 => 270,
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
