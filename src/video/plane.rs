//! Extraction of a single view's plane from a (possibly packed) stereo frame.

use serde::Serialize;

use crate::error::{MediaError, MediaResult};
use crate::video::{PixelLayout, StereoLayout, VideoFrame};

/// Destination layout of one view's plane as written by `copy_plane`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaneGeometry {
    /// Meaningful bytes per row.
    pub row_width: usize,
    /// Bytes per row in the destination, `row_width` rounded up to 4.
    pub row_size: usize,
    pub lines: usize,
}

impl PlaneGeometry {
    pub fn size(&self) -> usize {
        self.row_size * self.lines
    }
}

fn next_multiple_of_4(x: usize) -> usize {
    x.div_ceil(4) * 4
}

impl VideoFrame {
    /// Per-view geometry of `plane`. Requires `set_view_dimensions` to have run.
    pub fn plane_geometry(&self, plane: usize) -> MediaResult<PlaneGeometry> {
        if plane >= self.layout.plane_count() {
            return Err(MediaError::usage(format!(
                "plane {plane} does not exist in {} frames",
                self.layout.name()
            )));
        }
        if self.width <= 0 || self.height <= 0 {
            return Err(MediaError::usage(
                "view dimensions are not set on this frame",
            ));
        }
        let width = self.width as usize;
        let height = self.height as usize;
        let (row_width, lines) = match (self.layout, plane) {
            (PixelLayout::Bgra32, _) => (width * 4, height),
            (PixelLayout::Yuv444p, _) | (_, 0) => (width, height),
            (PixelLayout::Yuv422p, _) => (width / 2, height),
            (PixelLayout::Yuv420p, _) => (width / 2, height / 2),
        };
        Ok(PlaneGeometry {
            row_width,
            row_size: next_multiple_of_4(row_width),
            lines,
        })
    }

    /// Number of bytes `copy_plane` writes for `plane`.
    pub fn plane_size(&self, plane: usize) -> MediaResult<usize> {
        self.plane_geometry(plane).map(|geometry| geometry.size())
    }

    /// Copies plane `plane` of view `view` (0 = left, 1 = right) into `dst`.
    ///
    /// Rows are written `row_size` bytes apart; each row is cropped to the
    /// view's `row_width`, which drops source padding as well as the other
    /// view's half for side-by-side packings.
    pub fn copy_plane(&self, view: usize, plane: usize, dst: &mut [u8]) -> MediaResult<()> {
        if view > 1 {
            return Err(MediaError::usage(format!("view {view} does not exist")));
        }
        let geometry = self.plane_geometry(plane)?;
        if dst.len() < geometry.size() {
            return Err(MediaError::usage(format!(
                "destination holds {} bytes, plane {plane} needs {}",
                dst.len(),
                geometry.size()
            )));
        }

        let view = if self.stereo_layout_swap { 1 - view } else { view };
        let line_size = self.line_size[0][plane];
        let (src, src_row_size, src_offset): (&[u8], usize, usize) = match self.stereo_layout {
            StereoLayout::Mono => (&self.data[0][plane], line_size, 0),
            StereoLayout::Separate => (&self.data[view][plane], self.line_size[view][plane], 0),
            StereoLayout::TopBottom | StereoLayout::TopBottomHalf => (
                &self.data[0][plane],
                line_size,
                view * geometry.lines * line_size,
            ),
            StereoLayout::LeftRight | StereoLayout::LeftRightHalf => {
                (&self.data[0][plane], line_size, view * geometry.row_width)
            }
            StereoLayout::EvenOddRows => (&self.data[0][plane], 2 * line_size, view * line_size),
        };

        let PlaneGeometry {
            row_width,
            row_size,
            lines,
        } = geometry;
        if lines == 0 || row_width == 0 {
            return Ok(());
        }
        let needed = src_offset + (lines - 1) * src_row_size + row_width;
        if src.len() < needed {
            return Err(MediaError::usage(format!(
                "source plane {plane} holds {} bytes, view {view} needs {needed}",
                src.len()
            )));
        }

        let block = lines * row_size;
        if src_row_size == row_size && src_offset + block <= src.len() {
            dst[..block].copy_from_slice(&src[src_offset..src_offset + block]);
            return Ok(());
        }
        for (y, dst_row) in dst.chunks_mut(row_size).take(lines).enumerate() {
            let start = src_offset + y * src_row_size;
            dst_row[..row_width].copy_from_slice(&src[start..start + row_width]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single-plane 8-bit frame where every byte encodes its position.
    fn gray_frame(width: usize, height: usize, stride: usize, layout: StereoLayout) -> VideoFrame {
        let mut data = vec![0u8; stride * height];
        for y in 0..height {
            for x in 0..width {
                data[y * stride + x] = ((y * 31 + x * 7) % 251) as u8;
            }
        }
        let mut frame = VideoFrame {
            raw_width: width as i32,
            raw_height: height as i32,
            raw_aspect_ratio: width as f32 / height as f32,
            layout: PixelLayout::Yuv444p,
            stereo_layout: layout,
            ..VideoFrame::default()
        };
        for plane in 0..3 {
            frame.data[0][plane] = data.clone();
            frame.line_size[0][plane] = stride;
        }
        frame.set_view_dimensions();
        frame
    }

    fn copy(frame: &VideoFrame, view: usize, plane: usize) -> Vec<u8> {
        let mut out = vec![0u8; frame.plane_size(plane).unwrap()];
        frame.copy_plane(view, plane, &mut out).unwrap();
        out
    }

    #[test]
    fn left_right_views_partition_each_row() {
        let (width, height, stride) = (16, 4, 20);
        let frame = gray_frame(width, height, stride, StereoLayout::LeftRight);
        let left = copy(&frame, 0, 0);
        let right = copy(&frame, 1, 0);
        let geometry = frame.plane_geometry(0).unwrap();
        assert_eq!(geometry.row_width, 8);
        for y in 0..height {
            let src_row = &frame.data[0][0][y * stride..y * stride + width];
            let l = &left[y * geometry.row_size..y * geometry.row_size + 8];
            let r = &right[y * geometry.row_size..y * geometry.row_size + 8];
            assert_eq!([l, r].concat(), src_row);
        }
    }

    #[test]
    fn swap_is_equivalent_to_requesting_the_other_view() {
        for layout in StereoLayout::ALL {
            let mut frame = gray_frame(8, 8, 12, layout);
            if layout == StereoLayout::Separate {
                frame.data[1] = frame.data[0].clone();
                frame.data[1][0].iter_mut().for_each(|b| *b = b.wrapping_add(100));
                frame.line_size[1] = frame.line_size[0];
            }
            let plain = [copy(&frame, 0, 0), copy(&frame, 1, 0)];
            frame.stereo_layout_swap = true;
            assert_eq!(copy(&frame, 0, 0), plain[1], "{layout:?}");
            assert_eq!(copy(&frame, 1, 0), plain[0], "{layout:?}");
        }
    }

    #[test]
    fn top_bottom_selects_halves() {
        let frame = gray_frame(4, 8, 4, StereoLayout::TopBottom);
        let src = &frame.data[0][0];
        assert_eq!(copy(&frame, 0, 0), src[..16]);
        assert_eq!(copy(&frame, 1, 0), src[16..]);
    }

    #[test]
    fn even_odd_rows_deinterleave() {
        let frame = gray_frame(4, 6, 4, StereoLayout::EvenOddRows);
        let src = &frame.data[0][0];
        let left = copy(&frame, 0, 0);
        let right = copy(&frame, 1, 0);
        for y in 0..3 {
            assert_eq!(left[y * 4..y * 4 + 4], src[2 * y * 4..2 * y * 4 + 4]);
            assert_eq!(right[y * 4..y * 4 + 4], src[(2 * y + 1) * 4..(2 * y + 1) * 4 + 4]);
        }
    }

    #[test]
    fn chroma_planes_are_subsampled() {
        let mut frame = gray_frame(16, 8, 16, StereoLayout::Mono);
        frame.layout = PixelLayout::Yuv420p;
        let chroma = frame.plane_geometry(1).unwrap();
        assert_eq!((chroma.row_width, chroma.row_size, chroma.lines), (8, 8, 4));
        frame.layout = PixelLayout::Yuv422p;
        let chroma = frame.plane_geometry(2).unwrap();
        assert_eq!((chroma.row_width, chroma.lines), (8, 8));
    }

    #[test]
    fn destination_rows_are_padded_to_four_bytes() {
        let frame = gray_frame(6, 2, 6, StereoLayout::Mono);
        let geometry = frame.plane_geometry(0).unwrap();
        assert_eq!((geometry.row_width, geometry.row_size), (6, 8));
        let out = copy(&frame, 0, 0);
        assert_eq!(out.len(), 16);
        assert_eq!(out[8..14], frame.data[0][0][6..12]);
    }

    #[test]
    fn bgra_rows_use_four_bytes_per_pixel() {
        let mut frame = gray_frame(4, 2, 16, StereoLayout::Mono);
        frame.layout = PixelLayout::Bgra32;
        frame.data[0][0] = (0..32).collect();
        let out = copy(&frame, 0, 0);
        assert_eq!(out, (0..32).collect::<Vec<u8>>());
        assert!(frame.plane_geometry(1).unwrap_err().is_usage());
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let frame = gray_frame(8, 8, 8, StereoLayout::Mono);
        let mut small = vec![0u8; 10];
        assert!(frame.copy_plane(0, 0, &mut small).unwrap_err().is_usage());
        let mut out = vec![0u8; 64];
        assert!(frame.copy_plane(2, 0, &mut out).unwrap_err().is_usage());

        let unset = VideoFrame::default();
        assert!(unset.plane_geometry(0).unwrap_err().is_usage());
    }
}
