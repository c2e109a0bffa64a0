use stereo_decode::video::{
    PixelLayout, StereoLayout, VideoFrame, stereo_layout_from_string, stereo_layout_to_string,
};

/// Single-plane gray frame whose bytes encode their source position.
fn packed_frame(width: usize, height: usize, layout: StereoLayout, swap: bool) -> VideoFrame {
    // 4:4:4 with only the luma plane exercised.
    let stride = width + 3;
    let data: Vec<u8> = (0..stride * height).map(|i| (i % 253) as u8).collect();
    let mut frame = VideoFrame {
        raw_width: width as i32,
        raw_height: height as i32,
        raw_aspect_ratio: 1.5,
        layout: PixelLayout::Yuv444p,
        stereo_layout: layout,
        stereo_layout_swap: swap,
        ..VideoFrame::default()
    };
    frame.data[0] = [data.clone(), data.clone(), data];
    frame.line_size[0] = [stride; 3];
    frame.set_view_dimensions();
    frame
}

fn view(frame: &VideoFrame, index: usize) -> Vec<u8> {
    let mut out = vec![0u8; frame.plane_size(0).unwrap()];
    frame.copy_plane(index, 0, &mut out).unwrap();
    out
}

#[test]
fn every_canonical_token_round_trips() {
    let mut seen = Vec::new();
    for layout in StereoLayout::ALL {
        for swap in [false, true] {
            let token = stereo_layout_to_string(layout, swap);
            let parsed = stereo_layout_from_string(token);
            if layout == StereoLayout::Mono {
                assert_eq!(parsed, (StereoLayout::Mono, false));
            } else {
                assert_eq!(parsed, (layout, swap), "{token}");
            }
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
    }
    assert_eq!(seen.len(), 13);
}

#[test]
fn unknown_tokens_fall_back_to_mono() {
    for token in ["", "LEFT-RIGHT", "side-by-side", "anaglyph"] {
        assert_eq!(stereo_layout_from_string(token), (StereoLayout::Mono, false));
    }
}

#[test]
fn view_dimensions_for_a_full_hd_frame() {
    let cases = [
        (StereoLayout::LeftRight, 960, 1080, 16.0f32 / 9.0 / 2.0),
        (StereoLayout::TopBottomHalf, 1920, 540, 16.0 / 9.0),
        (StereoLayout::EvenOddRows, 1920, 540, 16.0 / 9.0),
    ];
    for (layout, width, height, aspect) in cases {
        let mut frame = VideoFrame {
            raw_width: 1920,
            raw_height: 1080,
            raw_aspect_ratio: 16.0 / 9.0,
            stereo_layout: layout,
            ..VideoFrame::default()
        };
        frame.set_view_dimensions();
        assert_eq!((frame.width, frame.height), (width, height));
        assert!((frame.aspect_ratio - aspect).abs() < 1e-5);
    }
}

#[test]
fn packed_views_come_from_disjoint_regions() {
    for layout in [
        StereoLayout::LeftRight,
        StereoLayout::LeftRightHalf,
        StereoLayout::TopBottom,
        StereoLayout::TopBottomHalf,
        StereoLayout::EvenOddRows,
    ] {
        let frame = packed_frame(10, 6, layout, false);
        let geometry = frame.plane_geometry(0).unwrap();
        let (left, right) = (view(&frame, 0), view(&frame, 1));
        for y in 0..geometry.lines {
            let row = y * geometry.row_size;
            let l = &left[row..row + geometry.row_width];
            let r = &right[row..row + geometry.row_width];
            assert_ne!(l, r, "{layout:?} row {y}");
            assert!(
                l.iter().all(|b| !r.contains(b)),
                "{layout:?} row {y} shares bytes between views"
            );
        }
    }
}

#[test]
fn swapped_views_mirror_unswapped_ones() {
    for layout in StereoLayout::ALL
        .into_iter()
        .filter(|layout| layout.is_packed())
    {
        let plain = packed_frame(12, 8, layout, false);
        let swapped = packed_frame(12, 8, layout, true);
        assert_eq!(view(&swapped, 0), view(&plain, 1), "{layout:?}");
        assert_eq!(view(&swapped, 1), view(&plain, 0), "{layout:?}");
    }
}

#[test]
fn mono_views_are_identical() {
    let frame = packed_frame(9, 3, StereoLayout::Mono, false);
    let geometry = frame.plane_geometry(0).unwrap();
    assert_eq!(geometry.row_width, 9);
    assert_eq!(geometry.row_size, 12);
    assert_eq!(view(&frame, 0), view(&frame, 1));
}

#[test]
fn copy_plane_rejects_bad_arguments() {
    let frame = packed_frame(8, 4, StereoLayout::LeftRight, false);
    let mut small = vec![0u8; 3];
    assert!(frame.copy_plane(0, 0, &mut small).unwrap_err().is_usage());
    let mut out = vec![0u8; 64];
    assert!(frame.copy_plane(2, 0, &mut out).unwrap_err().is_usage());
    assert!(frame.copy_plane(0, 3, &mut out).unwrap_err().is_usage());
}

/// An 8x8 planar frame whose chroma plane 1 holds `row * 16 + col`, stored
/// with a padded stride of 5 bytes per chroma row.
fn subsampled_frame(layout: PixelLayout, stereo_layout: StereoLayout) -> VideoFrame {
    let chroma_rows = if layout == PixelLayout::Yuv420p { 4 } else { 8 };
    let chroma: Vec<u8> = (0..chroma_rows)
        .flat_map(|row| (0..5).map(move |col| if col < 4 { row * 16 + col } else { 0xEE }))
        .collect();
    let mut frame = VideoFrame {
        raw_width: 8,
        raw_height: 8,
        raw_aspect_ratio: 1.0,
        layout,
        stereo_layout,
        ..VideoFrame::default()
    };
    frame.data[0] = [vec![0; 64], chroma.clone(), chroma];
    frame.line_size[0] = [8, 5, 5];
    frame.set_view_dimensions();
    frame
}

fn chroma_view(frame: &VideoFrame, index: usize) -> Vec<u8> {
    let mut out = vec![0u8; frame.plane_size(1).unwrap()];
    frame.copy_plane(index, 1, &mut out).unwrap();
    out
}

fn chroma_row(row: u8) -> Vec<u8> {
    (0..4).map(|col| row * 16 + col).collect()
}

#[test]
fn top_bottom_420_chroma_starts_at_half_the_chroma_lines() {
    let frame = subsampled_frame(PixelLayout::Yuv420p, StereoLayout::TopBottom);
    assert_eq!(frame.plane_size(1).unwrap(), 8);
    assert_eq!(chroma_view(&frame, 0), [chroma_row(0), chroma_row(1)].concat());
    assert_eq!(chroma_view(&frame, 1), [chroma_row(2), chroma_row(3)].concat());
}

#[test]
fn even_odd_rows_420_chroma_interleaves_chroma_rows() {
    let frame = subsampled_frame(PixelLayout::Yuv420p, StereoLayout::EvenOddRows);
    assert_eq!((frame.width, frame.height), (8, 4));
    assert_eq!(chroma_view(&frame, 0), [chroma_row(0), chroma_row(2)].concat());
    assert_eq!(chroma_view(&frame, 1), [chroma_row(1), chroma_row(3)].concat());
}

#[test]
fn left_right_420_chroma_splits_each_chroma_row() {
    let frame = subsampled_frame(PixelLayout::Yuv420p, StereoLayout::LeftRight);
    let geometry = frame.plane_geometry(1).unwrap();
    assert_eq!((geometry.row_width, geometry.row_size, geometry.lines), (2, 4, 4));

    let left = chroma_view(&frame, 0);
    let right = chroma_view(&frame, 1);
    for row in 0..4u8 {
        let at = row as usize * 4;
        assert_eq!(&left[at..at + 2], &[row * 16, row * 16 + 1]);
        assert_eq!(&right[at..at + 2], &[row * 16 + 2, row * 16 + 3]);
    }
}

#[test]
fn top_bottom_422_chroma_keeps_full_height_rows() {
    let frame = subsampled_frame(PixelLayout::Yuv422p, StereoLayout::TopBottom);
    let geometry = frame.plane_geometry(1).unwrap();
    assert_eq!((geometry.row_width, geometry.lines), (4, 4));
    let expected = |rows: std::ops::Range<u8>| rows.map(chroma_row).collect::<Vec<_>>().concat();
    assert_eq!(chroma_view(&frame, 0), expected(0..4));
    assert_eq!(chroma_view(&frame, 1), expected(4..8));
}
