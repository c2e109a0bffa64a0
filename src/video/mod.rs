//! Decoded video frames and the stereoscopic view model.
//!
//! A [`VideoFrame`] carries the raw picture(s) exactly as the decoder produced
//! them together with a stereo layout. Per-eye geometry is derived once via
//! [`VideoFrame::set_view_dimensions`], and per-eye pixel data is extracted on
//! demand with [`VideoFrame::copy_plane`].

pub mod plane;
pub mod stereo;

use serde::Serialize;

pub use plane::PlaneGeometry;
pub use stereo::{
    StereoLayout, parse_stereo_layout, stereo_layout_from_string, stereo_layout_to_string,
};

/// Presentation time sentinel for "unknown / not set".
pub const UNSET_TIME: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Packed 8-bit BGRA, one plane.
    #[default]
    Bgra32,
    Yuv444p,
    /// Chroma planes have half width.
    Yuv422p,
    /// Chroma planes have half width and half height.
    Yuv420p,
}

impl PixelLayout {
    pub fn plane_count(self) -> usize {
        match self {
            PixelLayout::Bgra32 => 1,
            PixelLayout::Yuv444p | PixelLayout::Yuv422p | PixelLayout::Yuv420p => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelLayout::Bgra32 => "bgra32",
            PixelLayout::Yuv444p => "yuv444p",
            PixelLayout::Yuv422p => "yuv422p",
            PixelLayout::Yuv420p => "yuv420p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    #[default]
    Srgb,
    Yuv601,
    Yuv709,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueRange {
    /// 0-255 ("jpeg" range).
    #[default]
    Full,
    /// 16-235 luma, 16-240 chroma.
    Mpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaLocation {
    #[default]
    Center,
    Left,
    TopLeft,
}

/// One decoded video frame.
///
/// Buffer index 0 always holds the raw picture; index 1 is only populated
/// for [`StereoLayout::Separate`], where it holds the second stream's picture.
#[derive(Debug, Clone, Serialize)]
pub struct VideoFrame {
    pub raw_width: i32,
    pub raw_height: i32,
    pub raw_aspect_ratio: f32,
    /// Per-view width; valid after `set_view_dimensions`.
    pub width: i32,
    /// Per-view height; valid after `set_view_dimensions`.
    pub height: i32,
    /// Per-view display aspect ratio; valid after `set_view_dimensions`.
    pub aspect_ratio: f32,
    pub layout: PixelLayout,
    pub color_space: ColorSpace,
    pub value_range: ValueRange,
    pub chroma_location: ChromaLocation,
    pub stereo_layout: StereoLayout,
    pub stereo_layout_swap: bool,
    /// Microseconds; [`UNSET_TIME`] when unknown.
    pub presentation_time: i64,
    #[serde(skip)]
    pub data: [[Vec<u8>; 3]; 2],
    #[serde(skip)]
    pub line_size: [[usize; 3]; 2],
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self {
            raw_width: -1,
            raw_height: -1,
            raw_aspect_ratio: 0.0,
            width: -1,
            height: -1,
            aspect_ratio: 0.0,
            layout: PixelLayout::Bgra32,
            color_space: ColorSpace::Srgb,
            value_range: ValueRange::Full,
            chroma_location: ChromaLocation::Center,
            stereo_layout: StereoLayout::Mono,
            stereo_layout_swap: false,
            presentation_time: UNSET_TIME,
            data: Default::default(),
            line_size: [[0; 3]; 2],
        }
    }
}

impl VideoFrame {
    /// True once the raw dimensions are known.
    pub fn is_valid(&self) -> bool {
        self.raw_width > 0 && self.raw_height > 0
    }

    /// Derives the per-view geometry from the raw geometry and stereo layout.
    pub fn set_view_dimensions(&mut self) {
        self.width = self.raw_width;
        self.height = self.raw_height;
        self.aspect_ratio = self.raw_aspect_ratio;
        match self.stereo_layout {
            StereoLayout::Mono | StereoLayout::Separate => {}
            StereoLayout::LeftRight => {
                self.width /= 2;
                self.aspect_ratio /= 2.0;
            }
            StereoLayout::LeftRightHalf => {
                self.width /= 2;
            }
            StereoLayout::TopBottom => {
                self.height /= 2;
                self.aspect_ratio *= 2.0;
            }
            StereoLayout::TopBottomHalf => {
                self.height /= 2;
            }
            StereoLayout::EvenOddRows => {
                // Row-interleaved footage in the wild is authored for the
                // unadjusted aspect ratio.
                self.height /= 2;
            }
        }
    }

    /// A copy of this frame's metadata with all pixel buffers dropped.
    pub fn metadata_only(&self) -> VideoFrame {
        VideoFrame {
            data: Default::default(),
            line_size: [[0; 3]; 2],
            ..self.clone()
        }
    }

    /// Stable identifier of the frame format, e.g.
    /// `1920x1080-1.78:1-yuv420p-709-mpeg-l`.
    pub fn format_name(&self) -> String {
        let mut name = format!(
            "{}x{}-{}:1-{}",
            self.raw_width,
            self.raw_height,
            format_significant(self.raw_aspect_ratio as f64, 3),
            self.layout.name()
        );
        name.push_str(match self.color_space {
            ColorSpace::Srgb => "-srgb",
            ColorSpace::Yuv601 => "-601",
            ColorSpace::Yuv709 => "-709",
        });
        if self.layout != PixelLayout::Bgra32 {
            name.push_str(match self.value_range {
                ValueRange::Full => "-jpeg",
                ValueRange::Mpeg => "-mpeg",
            });
        }
        if matches!(self.layout, PixelLayout::Yuv422p | PixelLayout::Yuv420p) {
            name.push_str(match self.chroma_location {
                ChromaLocation::Center => "-c",
                ChromaLocation::Left => "-l",
                ChromaLocation::TopLeft => "-tl",
            });
        }
        name
    }

    /// Short human readable description.
    pub fn format_info(&self) -> String {
        format!(
            "{}x{}, {}:1",
            self.raw_width,
            self.raw_height,
            format_significant(self.aspect_ratio as f64, 3)
        )
    }
}

/// Formats `value` with at most `digits` significant digits and no trailing
/// zeros, the way `%g` does for values in a human range.
pub(crate) fn format_significant(value: f64, digits: i32) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    let decimals = (digits - 1 - exponent).max(0) as usize;
    let rendered = format!("{value:.decimals$}");
    if rendered.contains('.') {
        rendered
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        rendered
    }
}
