use std::sync::mpsc;
use std::time::Duration;

use stereo_decode::blob::{AudioBlob, SampleFormat, SubtitleBox};
use stereo_decode::decoder::BackendRegistry;
use stereo_decode::decoder::memory::{MemoryBackend, MemoryFrame, MemorySource, MemoryStream};
use stereo_decode::observability::MetricsCollector;
use stereo_decode::video::{PixelLayout, StereoLayout, UNSET_TIME, VideoFrame};
use stereo_decode::{Input, InputMode, MediaError, MediaObject, StreamSelector};

const FRAME_US: i64 = 40_000;

/// A BGRA frame whose every byte is `fill`.
fn bgra_frame(width: i32, height: i32, pts: i64, fill: u8) -> VideoFrame {
    let stride = width as usize * 4;
    VideoFrame {
        raw_width: width,
        raw_height: height,
        raw_aspect_ratio: width as f32 / height as f32,
        layout: PixelLayout::Bgra32,
        presentation_time: pts,
        data: [
            [vec![fill; stride * height as usize], Vec::new(), Vec::new()],
            Default::default(),
        ],
        line_size: [[stride, 0, 0], [0; 3]],
        ..VideoFrame::default()
    }
}

fn video_stream(count: usize, keyframe_interval: usize, fill: u8) -> MemoryStream {
    MemoryStream::Video {
        template: bgra_frame(4, 4, UNSET_TIME, 0),
        frame_rate: (25, 1),
        frames: (0..count)
            .map(|i| MemoryFrame {
                frame: bgra_frame(4, 4, i as i64 * FRAME_US, fill),
                keyframe: i % keyframe_interval == 0,
            })
            .collect(),
        fail_at: None,
    }
}

/// One second of 16 bit stereo audio at 1 kHz.
fn audio_stream() -> MemoryStream {
    MemoryStream::Audio {
        template: AudioBlob {
            channels: 2,
            rate: 1_000,
            sample_format: SampleFormat::S16,
            ..AudioBlob::default()
        },
        data: vec![0; 4_000],
    }
}

struct Fixture {
    backend: MemoryBackend,
    registry: BackendRegistry,
}

impl Fixture {
    fn new() -> Self {
        let backend = MemoryBackend::new();
        let mut registry = BackendRegistry::new();
        registry.register(backend.clone());
        Self { backend, registry }
    }

    fn open(&self, name: &str, source: MemorySource) -> MediaObject {
        let url = self.backend.insert(name, source);
        MediaObject::open_with(&self.registry, &url)
            .unwrap()
            .with_metrics(MetricsCollector::new())
    }
}

fn source(streams: Vec<MemoryStream>) -> MemorySource {
    MemorySource {
        streams,
        ..MemorySource::default()
    }
}

#[test]
fn seek_lands_on_preceding_keyframe() {
    let fixture = Fixture::new();
    let mut media = fixture.open("seek", source(vec![video_stream(20, 3, 0)]));
    media.video_stream_set_active(0, true).unwrap();
    for _ in 0..4 {
        media.start_video_frame_read(0).unwrap();
        media.finish_video_frame_read(0).unwrap();
    }

    let target = 10 * FRAME_US + 5;
    media.start_video_frame_read(0).unwrap();
    media.seek(target).unwrap();
    let frame = media.finish_video_frame_read(0).unwrap().unwrap();
    // Keyframes sit at multiples of 3, so frame 9 is the closest one before.
    assert_eq!(frame.presentation_time, 9 * FRAME_US);
    assert!(frame.presentation_time <= target);

    media.start_video_frame_read(0).unwrap();
    let next = media.finish_video_frame_read(0).unwrap().unwrap();
    assert_eq!(next.presentation_time, 10 * FRAME_US);
    assert_eq!(media.tell(), 10 * FRAME_US);
}

#[test]
fn deactivating_with_outstanding_read_then_closing_does_not_hang() {
    let fixture = Fixture::new();
    let mut slow = source(vec![video_stream(5, 1, 0), audio_stream()]);
    slow.decode_delay = Some(Duration::from_millis(50));
    let mut media = fixture.open("slow", slow);

    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        media.video_stream_set_active(0, true).unwrap();
        media.audio_stream_set_active(0, true).unwrap();
        media.start_video_frame_read(0).unwrap();
        media.start_audio_blob_read(0, 400).unwrap();
        media.video_stream_set_active(0, false).unwrap();
        assert!(media.start_video_frame_read(0).unwrap_err().is_usage());
        media.close();
        media.close();
        done_tx.send(()).unwrap();
    });
    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("deactivate and close must not deadlock");
}

#[test]
fn reads_are_rejected_on_inactive_or_absent_streams() {
    let fixture = Fixture::new();
    let mut media = fixture.open("audio-only", source(vec![audio_stream()]));
    assert_eq!(media.video_streams(), 0);
    assert!(media.video_stream_set_active(0, true).unwrap_err().is_usage());
    assert!(media.start_audio_blob_read(0, 100).unwrap_err().is_usage());

    media.audio_stream_set_active(0, true).unwrap();
    media.start_audio_blob_read(0, 100).unwrap();
    assert!(media.start_audio_blob_read(0, 100).unwrap_err().is_usage());
    let blob = media.finish_audio_blob_read(0).unwrap().unwrap();
    assert_eq!(blob.data.len(), 100);
    assert_eq!(blob.presentation_time, 0);
}

#[test]
fn audio_only_input_has_no_video() {
    let fixture = Fixture::new();
    let media = fixture.open("music", source(vec![audio_stream()]));
    let mut input = Input::open(
        vec![media],
        None,
        None,
        Some(StreamSelector::new(0, 0)),
        InputMode::Automatic,
        false,
    )
    .unwrap();
    assert!(input.has_audio());
    assert!(!input.has_video());
    assert_eq!(input.audio_rate(), 1_000);
    assert_eq!(input.duration(), 1_000_000);
    assert!(input.start_video_frame_read().unwrap_err().is_usage());

    input.start_audio_blob_read(1_000).unwrap();
    let blob = input.finish_audio_blob_read().unwrap().unwrap();
    assert_eq!(blob.sample_frames(), 250);
}

#[test]
fn video_only_input_reports_no_audio() {
    let fixture = Fixture::new();
    let media = fixture.open("silent", source(vec![video_stream(3, 1, 7)]));
    let mut input = Input::open(
        vec![media],
        Some(StreamSelector::new(0, 0)),
        None,
        None,
        InputMode::Mono,
        false,
    )
    .unwrap();
    assert!(!input.has_audio());
    assert!(input.audio_rate() <= 0);
    assert!(input.start_audio_blob_read(64).unwrap_err().is_usage());
}

#[test]
fn decode_errors_surface_from_finish() {
    let fixture = Fixture::new();
    let mut stream = video_stream(5, 1, 0);
    if let MemoryStream::Video { fail_at, .. } = &mut stream {
        *fail_at = Some(2);
    }
    let mut media = fixture.open("broken", source(vec![stream]));
    media.video_stream_set_active(0, true).unwrap();
    for _ in 0..2 {
        media.start_video_frame_read(0).unwrap();
        assert!(media.finish_video_frame_read(0).unwrap().is_some());
    }
    media.start_video_frame_read(0).unwrap();
    let err = media.finish_video_frame_read(0).unwrap_err();
    assert!(matches!(err, MediaError::Decode { .. }), "{err}");
}

#[test]
fn end_of_stream_is_not_an_error() {
    let fixture = Fixture::new();
    let mut media = fixture.open("short", source(vec![video_stream(1, 1, 0)]));
    media.video_stream_set_active(0, true).unwrap();
    media.start_video_frame_read(0).unwrap();
    assert!(media.finish_video_frame_read(0).unwrap().is_some());
    for _ in 0..2 {
        media.start_video_frame_read(0).unwrap();
        assert!(media.finish_video_frame_read(0).unwrap().is_none());
    }
}

#[test]
fn separate_mode_pairs_two_streams() {
    let fixture = Fixture::new();
    let left = fixture.open("left", source(vec![video_stream(3, 1, 0x11)]));
    let right = fixture.open("right", source(vec![video_stream(2, 1, 0x22)]));
    let mut input = Input::open(
        vec![left, right],
        Some(StreamSelector::new(0, 0)),
        Some(StreamSelector::new(1, 0)),
        None,
        InputMode::Automatic,
        true,
    )
    .unwrap();
    assert_eq!(input.mode(), InputMode::Separate);
    assert_eq!((input.video_width(), input.video_height()), (4, 4));
    // The shorter stream bounds the duration.
    assert_eq!(input.duration(), 2 * FRAME_US);

    input.start_video_frame_read().unwrap();
    let frame = input.finish_video_frame_read().unwrap().unwrap();
    assert_eq!(frame.stereo_layout, StereoLayout::Separate);
    assert!(frame.stereo_layout_swap);
    let mut view = vec![0u8; frame.plane_size(0).unwrap()];
    frame.copy_plane(0, 0, &mut view).unwrap();
    assert!(view.iter().all(|&b| b == 0x22), "swapped left view reads the right stream");
    frame.copy_plane(1, 0, &mut view).unwrap();
    assert!(view.iter().all(|&b| b == 0x11));
}

#[test]
fn separate_mode_needs_two_streams() {
    let fixture = Fixture::new();
    let media = fixture.open("single", source(vec![video_stream(2, 1, 0)]));
    let err = Input::open(
        vec![media],
        Some(StreamSelector::new(0, 0)),
        None,
        None,
        InputMode::Separate,
        false,
    )
    .err()
    .unwrap();
    assert!(err.is_usage());
}

#[test]
fn automatic_mode_reads_stereo_metadata() {
    let fixture = Fixture::new();
    let media = fixture.open(
        "tagged",
        MemorySource {
            tags: vec![("StereoMode".into(), "bottom-top".into())],
            streams: vec![video_stream(2, 1, 0)],
            decode_delay: None,
        },
    );
    let mut input = Input::open(
        vec![media],
        Some(StreamSelector::new(0, 0)),
        None,
        None,
        InputMode::Automatic,
        false,
    )
    .unwrap();
    assert_eq!(input.mode(), InputMode::TopBottom);
    assert!(input.stereo_layout_swap());
    assert_eq!((input.video_width(), input.video_height()), (4, 2));
    assert!((input.video_aspect_ratio() - 2.0).abs() < 1e-6);

    input.start_video_frame_read().unwrap();
    let frame = input.finish_video_frame_read().unwrap().unwrap();
    assert_eq!(frame.height, 2);
    assert_eq!(frame.stereo_layout, StereoLayout::TopBottom);
}

#[test]
fn single_stream_never_resolves_to_separate() {
    let fixture = Fixture::new();
    let mut stream = video_stream(2, 1, 7);
    if let MemoryStream::Video { template, .. } = &mut stream {
        template.stereo_layout = StereoLayout::Separate;
    }
    let media = fixture.open(
        "separate-tagged",
        MemorySource {
            tags: vec![("StereoMode".into(), "separate-right-left".into())],
            streams: vec![stream],
            decode_delay: None,
        },
    );
    let mut input = Input::open(
        vec![media],
        Some(StreamSelector::new(0, 0)),
        None,
        None,
        InputMode::Automatic,
        false,
    )
    .unwrap();
    assert_eq!(input.mode(), InputMode::Mono);
    assert_eq!(input.stereo_layout(), StereoLayout::Mono);
    assert!(!input.stereo_layout_swap());

    input.start_video_frame_read().unwrap();
    let frame = input.finish_video_frame_read().unwrap().unwrap();
    let mut left = vec![0u8; frame.plane_size(0).unwrap()];
    let mut right = vec![0u8; left.len()];
    frame.copy_plane(0, 0, &mut left).unwrap();
    frame.copy_plane(1, 0, &mut right).unwrap();
    assert_eq!(left, right);
    assert!(left.iter().all(|&b| b == 7));
}

#[test]
fn subtitles_follow_seeks() {
    let fixture = Fixture::new();
    let cue = |start: i64, text: &str| SubtitleBox {
        text: text.to_string(),
        presentation_start_time: start,
        presentation_stop_time: start + 500_000,
        ..SubtitleBox::default()
    };
    let mut media = fixture.open(
        "subs",
        source(vec![MemoryStream::Subtitles {
            template: SubtitleBox::default(),
            cues: vec![cue(0, "one"), cue(1_000_000, "two"), cue(2_000_000, "three")],
        }]),
    );
    media.subtitles_stream_set_active(0, true).unwrap();
    media.seek(1_200_000).unwrap();
    media.start_subtitle_list_read(0).unwrap();
    let list = media.finish_subtitle_list_read(0).unwrap().unwrap();
    assert_eq!(list.boxes[0].text, "two");
}

#[test]
fn workers_record_metrics() {
    let fixture = Fixture::new();
    let metrics = MetricsCollector::new();
    let url = fixture.backend.insert("metered", source(vec![video_stream(2, 1, 0)]));
    let mut media = MediaObject::open_with(&fixture.registry, &url)
        .unwrap()
        .with_metrics(metrics.clone());
    media.video_stream_set_active(0, true).unwrap();
    for _ in 0..3 {
        media.start_video_frame_read(0).unwrap();
        media.finish_video_frame_read(0).unwrap();
    }
    media.seek(0).unwrap();
    media.close();

    let snapshot = metrics.snapshot();
    let stream = &snapshot.streams[&format!("{url}#video0")];
    assert_eq!(stream.calls, 3);
    assert_eq!(stream.units, 2);
    assert_eq!(stream.end_of_stream, 1);
    assert_eq!(stream.bytes, 2 * 64);
    assert_eq!(snapshot.seeks, 1);
}
