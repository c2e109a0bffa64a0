//! Display parameters persisted between sessions.
//!
//! Values are validated by clamping: anything missing, non-finite or out of
//! range is replaced by its default in [`Parameters::set_defaults`], and an
//! unknown stereo mode loads as `mono-left`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Output stereo mode of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoMode {
    #[default]
    Stereo,
    MonoLeft,
    MonoRight,
    TopBottom,
    TopBottomHalf,
    LeftRight,
    LeftRightHalf,
    EvenOddRows,
    EvenOddColumns,
    Checkerboard,
    RedCyanMonochrome,
    RedCyanHalfColor,
    RedCyanFullColor,
    RedCyanDubois,
    GreenMagentaMonochrome,
    GreenMagentaHalfColor,
    GreenMagentaFullColor,
    GreenMagentaDubois,
    AmberBlueMonochrome,
    AmberBlueHalfColor,
    AmberBlueFullColor,
    AmberBlueDubois,
    RedGreenMonochrome,
    RedBlueMonochrome,
}

impl StereoMode {
    pub const ALL: [StereoMode; 24] = [
        StereoMode::Stereo,
        StereoMode::MonoLeft,
        StereoMode::MonoRight,
        StereoMode::TopBottom,
        StereoMode::TopBottomHalf,
        StereoMode::LeftRight,
        StereoMode::LeftRightHalf,
        StereoMode::EvenOddRows,
        StereoMode::EvenOddColumns,
        StereoMode::Checkerboard,
        StereoMode::RedCyanMonochrome,
        StereoMode::RedCyanHalfColor,
        StereoMode::RedCyanFullColor,
        StereoMode::RedCyanDubois,
        StereoMode::GreenMagentaMonochrome,
        StereoMode::GreenMagentaHalfColor,
        StereoMode::GreenMagentaFullColor,
        StereoMode::GreenMagentaDubois,
        StereoMode::AmberBlueMonochrome,
        StereoMode::AmberBlueHalfColor,
        StereoMode::AmberBlueFullColor,
        StereoMode::AmberBlueDubois,
        StereoMode::RedGreenMonochrome,
        StereoMode::RedBlueMonochrome,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StereoMode::Stereo => "stereo",
            StereoMode::MonoLeft => "mono-left",
            StereoMode::MonoRight => "mono-right",
            StereoMode::TopBottom => "top-bottom",
            StereoMode::TopBottomHalf => "top-bottom-half",
            StereoMode::LeftRight => "left-right",
            StereoMode::LeftRightHalf => "left-right-half",
            StereoMode::EvenOddRows => "even-odd-rows",
            StereoMode::EvenOddColumns => "even-odd-columns",
            StereoMode::Checkerboard => "checkerboard",
            StereoMode::RedCyanMonochrome => "red-cyan-monochrome",
            StereoMode::RedCyanHalfColor => "red-cyan-half-color",
            StereoMode::RedCyanFullColor => "red-cyan-full-color",
            StereoMode::RedCyanDubois => "red-cyan-dubois",
            StereoMode::GreenMagentaMonochrome => "green-magenta-monochrome",
            StereoMode::GreenMagentaHalfColor => "green-magenta-half-color",
            StereoMode::GreenMagentaFullColor => "green-magenta-full-color",
            StereoMode::GreenMagentaDubois => "green-magenta-dubois",
            StereoMode::AmberBlueMonochrome => "amber-blue-monochrome",
            StereoMode::AmberBlueHalfColor => "amber-blue-half-color",
            StereoMode::AmberBlueFullColor => "amber-blue-full-color",
            StereoMode::AmberBlueDubois => "amber-blue-dubois",
            StereoMode::RedGreenMonochrome => "red-green-monochrome",
            StereoMode::RedBlueMonochrome => "red-blue-monochrome",
        }
    }
}

/// `left-right` or `left-right-swap`.
pub fn stereo_mode_to_string(mode: StereoMode, swap: bool) -> String {
    if swap {
        format!("{}-swap", mode.name())
    } else {
        mode.name().to_string()
    }
}

/// Inverse of [`stereo_mode_to_string`]; unknown modes yield `mono-left`
/// while a `-swap` suffix is still honoured.
pub fn stereo_mode_from_string(s: &str) -> (StereoMode, bool) {
    let (name, swap) = match s.strip_suffix("-swap") {
        Some(name) => (name, true),
        None => (s, false),
    };
    let mode = StereoMode::ALL
        .into_iter()
        .find(|mode| mode.name() == name)
        .unwrap_or(StereoMode::MonoLeft);
    (mode, swap)
}

/// Renderer settings. Floats are NaN and `subtitles_color` is -1 while unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub stereo_mode: StereoMode,
    pub stereo_mode_swap: bool,
    pub parallax: f32,
    pub crosstalk_r: f32,
    pub crosstalk_g: f32,
    pub crosstalk_b: f32,
    pub ghostbust: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub hue: f32,
    pub saturation: f32,
    pub subtitles_color: i64,
    pub subtitles_encoding: String,
    pub subtitles_font: String,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            stereo_mode: StereoMode::Stereo,
            stereo_mode_swap: false,
            parallax: f32::NAN,
            crosstalk_r: f32::NAN,
            crosstalk_g: f32::NAN,
            crosstalk_b: f32::NAN,
            ghostbust: f32::NAN,
            contrast: f32::NAN,
            brightness: f32::NAN,
            hue: f32::NAN,
            saturation: f32::NAN,
            subtitles_color: -1,
            subtitles_encoding: String::new(),
            subtitles_font: String::new(),
        }
    }
}

fn clamp_to_default(value: &mut f32, min: f32, max: f32) {
    if !value.is_finite() || *value < min || *value > max {
        *value = 0.0;
    }
}

impl Parameters {
    /// Replaces every unset or out-of-range value with its default.
    pub fn set_defaults(&mut self) {
        clamp_to_default(&mut self.parallax, -1.0, 1.0);
        clamp_to_default(&mut self.crosstalk_r, 0.0, 1.0);
        clamp_to_default(&mut self.crosstalk_g, 0.0, 1.0);
        clamp_to_default(&mut self.crosstalk_b, 0.0, 1.0);
        clamp_to_default(&mut self.ghostbust, 0.0, 1.0);
        clamp_to_default(&mut self.contrast, -1.0, 1.0);
        clamp_to_default(&mut self.brightness, -1.0, 1.0);
        clamp_to_default(&mut self.hue, -1.0, 1.0);
        clamp_to_default(&mut self.saturation, -1.0, 1.0);
        if !(0..=0x00FF_FFFF).contains(&self.subtitles_color) {
            self.subtitles_color = 0x00FF_FFFF;
        }
        if self.subtitles_encoding.is_empty() {
            self.subtitles_encoding = "UTF-8".to_string();
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ParametersFile =
            serde_yaml::from_str(content).context("Failed to parse parameters YAML")?;
        Ok(file.into())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&ParametersFile::from(self)).context("Failed to render parameters")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid parameters file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = self.to_yaml()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write parameters file: {}", path.display()))
    }
}

/// On-disk form. The stereo mode and its swap flag share one token so an
/// unknown mode degrades to the fallback instead of failing the whole file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ParametersFile {
    stereo_mode: String,
    parallax: f32,
    crosstalk_r: f32,
    crosstalk_g: f32,
    crosstalk_b: f32,
    ghostbust: f32,
    contrast: f32,
    brightness: f32,
    hue: f32,
    saturation: f32,
    subtitles_color: i64,
    subtitles_encoding: String,
    subtitles_font: String,
}

impl Default for ParametersFile {
    fn default() -> Self {
        (&Parameters::default()).into()
    }
}

impl From<&Parameters> for ParametersFile {
    fn from(p: &Parameters) -> Self {
        Self {
            stereo_mode: stereo_mode_to_string(p.stereo_mode, p.stereo_mode_swap),
            parallax: p.parallax,
            crosstalk_r: p.crosstalk_r,
            crosstalk_g: p.crosstalk_g,
            crosstalk_b: p.crosstalk_b,
            ghostbust: p.ghostbust,
            contrast: p.contrast,
            brightness: p.brightness,
            hue: p.hue,
            saturation: p.saturation,
            subtitles_color: p.subtitles_color,
            subtitles_encoding: p.subtitles_encoding.clone(),
            subtitles_font: p.subtitles_font.clone(),
        }
    }
}

impl From<ParametersFile> for Parameters {
    fn from(f: ParametersFile) -> Self {
        let (stereo_mode, stereo_mode_swap) = stereo_mode_from_string(&f.stereo_mode);
        Self {
            stereo_mode,
            stereo_mode_swap,
            parallax: f.parallax,
            crosstalk_r: f.crosstalk_r,
            crosstalk_g: f.crosstalk_g,
            crosstalk_b: f.crosstalk_b,
            ghostbust: f.ghostbust,
            contrast: f.contrast,
            brightness: f.brightness,
            hue: f.hue,
            saturation: f.saturation,
            subtitles_color: f.subtitles_color,
            subtitles_encoding: f.subtitles_encoding,
            subtitles_font: f.subtitles_font,
        }
    }
}
