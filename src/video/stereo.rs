use serde::Serialize;

/// Physical arrangement of the left and right views inside the decoded
/// picture(s). Whether the halves are swapped is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StereoLayout {
    /// One view only; both eyes see the same picture.
    #[default]
    Mono,
    /// Left and right come from two distinct streams.
    Separate,
    /// Left on top, right at the bottom, each with full resolution.
    TopBottom,
    /// Left on top, right at the bottom, each squeezed to half height.
    TopBottomHalf,
    /// Left on the left, right on the right, each with full resolution.
    LeftRight,
    /// Left on the left, right on the right, each squeezed to half width.
    LeftRightHalf,
    /// Left view in even rows, right view in odd rows.
    EvenOddRows,
}

impl StereoLayout {
    pub const ALL: [StereoLayout; 7] = [
        StereoLayout::Mono,
        StereoLayout::Separate,
        StereoLayout::TopBottom,
        StereoLayout::TopBottomHalf,
        StereoLayout::LeftRight,
        StereoLayout::LeftRightHalf,
        StereoLayout::EvenOddRows,
    ];

    /// True for layouts that carry both views in one raw picture.
    pub fn is_packed(self) -> bool {
        !matches!(self, StereoLayout::Mono | StereoLayout::Separate)
    }
}

/// Canonical token for a layout and its swap flag.
///
/// `Mono` has no swapped form and always maps to `"mono"`.
pub fn stereo_layout_to_string(layout: StereoLayout, swap: bool) -> &'static str {
    match (layout, swap) {
        (StereoLayout::Mono, _) => "mono",
        (StereoLayout::Separate, false) => "separate-left-right",
        (StereoLayout::Separate, true) => "separate-right-left",
        (StereoLayout::TopBottom, false) => "top-bottom",
        (StereoLayout::TopBottom, true) => "bottom-top",
        (StereoLayout::TopBottomHalf, false) => "top-bottom-half",
        (StereoLayout::TopBottomHalf, true) => "bottom-top-half",
        (StereoLayout::LeftRight, false) => "left-right",
        (StereoLayout::LeftRight, true) => "right-left",
        (StereoLayout::LeftRightHalf, false) => "left-right-half",
        (StereoLayout::LeftRightHalf, true) => "right-left-half",
        (StereoLayout::EvenOddRows, false) => "even-odd-rows",
        (StereoLayout::EvenOddRows, true) => "odd-even-rows",
    }
}

/// Parses a canonical token. Unknown tokens yield `(Mono, false)` so that
/// settings written by a newer version still load.
pub fn stereo_layout_from_string(s: &str) -> (StereoLayout, bool) {
    match s {
        "mono" => (StereoLayout::Mono, false),
        "separate-left-right" => (StereoLayout::Separate, false),
        "separate-right-left" => (StereoLayout::Separate, true),
        "top-bottom" => (StereoLayout::TopBottom, false),
        "bottom-top" => (StereoLayout::TopBottom, true),
        "top-bottom-half" => (StereoLayout::TopBottomHalf, false),
        "bottom-top-half" => (StereoLayout::TopBottomHalf, true),
        "left-right" => (StereoLayout::LeftRight, false),
        "right-left" => (StereoLayout::LeftRight, true),
        "left-right-half" => (StereoLayout::LeftRightHalf, false),
        "right-left-half" => (StereoLayout::LeftRightHalf, true),
        "even-odd-rows" => (StereoLayout::EvenOddRows, false),
        "odd-even-rows" => (StereoLayout::EvenOddRows, true),
        _ => (StereoLayout::Mono, false),
    }
}

/// Like [`stereo_layout_from_string`] but reports whether the token was known.
pub fn parse_stereo_layout(s: &str) -> Option<(StereoLayout, bool)> {
    let parsed = stereo_layout_from_string(s);
    if parsed == (StereoLayout::Mono, false) && s != "mono" {
        None
    } else {
        Some(parsed)
    }
}
