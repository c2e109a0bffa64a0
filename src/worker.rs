//! One decode thread per active stream.
//!
//! A [`StreamWorker`] owns its decoder exclusively. Requests travel over a
//! single-slot channel and results come back over another, so at most one
//! unit is ever in flight per stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::blob::{AudioBlob, SubtitleList};
use crate::decoder::{Decoder, StreamKind};
use crate::error::{MediaError, MediaResult};
use crate::observability::MetricsCollector;
use crate::video::VideoFrame;

/// A decoded unit of any stream kind.
#[derive(Debug, Clone)]
pub enum Unit {
    Video(VideoFrame),
    Audio(AudioBlob),
    Subtitles(SubtitleList),
}

impl Unit {
    pub fn presentation_time(&self) -> i64 {
        match self {
            Unit::Video(frame) => frame.presentation_time,
            Unit::Audio(blob) => blob.presentation_time,
            Unit::Subtitles(list) => list.presentation_start_time(),
        }
    }

    /// Payload bytes carried by the unit.
    pub fn payload_bytes(&self) -> usize {
        match self {
            Unit::Video(frame) => frame.data.iter().flatten().map(Vec::len).sum(),
            Unit::Audio(blob) => blob.data.len(),
            Unit::Subtitles(list) => list.boxes.iter().map(|b| b.text.len()).sum(),
        }
    }
}

enum Request {
    Read { size: usize },
    Seek(i64),
}

enum Reply {
    Unit(MediaResult<Option<Unit>>),
    Seeked(MediaResult<()>),
}

pub struct StreamWorker {
    label: String,
    requests: Option<SyncSender<Request>>,
    replies: Receiver<Reply>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    /// Size of the read dispatched but not yet collected.
    pending: Option<usize>,
}

impl StreamWorker {
    /// Spawns the thread that will decode stream `stream` of kind `kind`.
    pub fn spawn(
        label: String,
        decoder: Box<dyn Decoder>,
        kind: StreamKind,
        stream: usize,
        metrics: MetricsCollector,
    ) -> MediaResult<Self> {
        let (request_tx, request_rx) = sync_channel::<Request>(1);
        let (reply_tx, reply_rx) = sync_channel::<Reply>(1);
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_cancel = cancel.clone();
        let thread_label = label.clone();
        let handle = std::thread::Builder::new()
            .name(format!("decode-{}", kind.name()))
            .spawn(move || {
                run(
                    thread_label,
                    decoder,
                    kind,
                    stream,
                    metrics,
                    request_rx,
                    reply_tx,
                    thread_cancel,
                )
            })
            .map_err(|err| MediaError::WorkerGone(format!("{label}: {err}")))?;
        debug!(stream = label.as_str(), "Decode worker started");

        Ok(Self {
            label,
            requests: Some(request_tx),
            replies: reply_rx,
            handle: Some(handle),
            cancel,
            pending: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Asks the worker to decode the next unit. Returns immediately.
    pub fn dispatch(&mut self, size: usize) -> MediaResult<()> {
        if self.pending.is_some() {
            return Err(MediaError::usage(format!(
                "{}: read started before the previous one was finished",
                self.label
            )));
        }
        self.send(Request::Read { size })?;
        self.pending = Some(size);
        Ok(())
    }

    /// Blocks until the dispatched unit is ready.
    pub fn collect(&mut self) -> MediaResult<Option<Unit>> {
        if self.pending.take().is_none() {
            return Err(MediaError::usage(format!(
                "{}: read finished without being started",
                self.label
            )));
        }
        match self.replies.recv() {
            Ok(Reply::Unit(result)) => result,
            Ok(Reply::Seeked(_)) | Err(_) => Err(self.gone()),
        }
    }

    /// Repositions the decoder. A read that was outstanding is discarded
    /// and reissued so that the next [`collect`](Self::collect) reflects
    /// the new position.
    pub fn seek(&mut self, pos: i64) -> MediaResult<()> {
        let reissue = self.pending.take();
        if reissue.is_some() {
            // The unit decoded before the seek is stale.
            let _ = self.replies.recv();
        }
        self.send(Request::Seek(pos))?;
        let seeked = match self.replies.recv() {
            Ok(Reply::Seeked(result)) => result,
            Ok(Reply::Unit(_)) | Err(_) => Err(self.gone()),
        };
        seeked?;
        if let Some(size) = reissue {
            self.dispatch(size)?;
        }
        Ok(())
    }

    /// Cancels outstanding work and joins the thread. Safe to call twice.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);
        self.requests = None;
        if self.pending.take().is_some() {
            let _ = self.replies.recv();
        }
        if handle.join().is_err() {
            warn!(stream = self.label.as_str(), "Decode worker panicked");
        }
        debug!(stream = self.label.as_str(), "Decode worker stopped");
    }

    fn send(&self, request: Request) -> MediaResult<()> {
        self.requests
            .as_ref()
            .ok_or_else(|| self.gone())?
            .send(request)
            .map_err(|_| self.gone())
    }

    fn gone(&self) -> MediaError {
        MediaError::WorkerGone(self.label.clone())
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    label: String,
    mut decoder: Box<dyn Decoder>,
    kind: StreamKind,
    stream: usize,
    metrics: MetricsCollector,
    requests: Receiver<Request>,
    replies: SyncSender<Reply>,
    cancel: Arc<AtomicBool>,
) {
    while let Ok(request) = requests.recv() {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let reply = match request {
            Request::Read { size } => Reply::Unit(decode_one(
                &label,
                decoder.as_mut(),
                kind,
                stream,
                size,
                &metrics,
            )),
            Request::Seek(pos) => {
                metrics.record_seek();
                debug!(stream = label.as_str(), pos, "Seeking");
                Reply::Seeked(decoder.seek(pos))
            }
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    decoder.close();
}

fn decode_one(
    label: &str,
    decoder: &mut dyn Decoder,
    kind: StreamKind,
    stream: usize,
    size: usize,
    metrics: &MetricsCollector,
) -> MediaResult<Option<Unit>> {
    let mut timer = metrics.start_decode(label);
    let unit = match kind {
        StreamKind::Video => decoder.read_video_frame(stream)?.map(Unit::Video),
        StreamKind::Audio => decoder.read_audio_blob(stream, size)?.map(Unit::Audio),
        StreamKind::Subtitles => decoder.read_subtitle_list(stream)?.map(Unit::Subtitles),
    };
    match &unit {
        Some(unit) => timer.delivered(unit.payload_bytes()),
        None => timer.end_of_stream(),
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::StreamInfo;

    /// Counts up from zero; each "frame" is its index.
    struct Counter {
        streams: Vec<StreamInfo>,
        next: i64,
        limit: i64,
    }

    impl Decoder for Counter {
        fn url(&self) -> &str {
            "counter"
        }

        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_video_frame(&mut self, _stream: usize) -> MediaResult<Option<VideoFrame>> {
            if self.next >= self.limit {
                return Ok(None);
            }
            let frame = VideoFrame {
                presentation_time: self.next,
                ..VideoFrame::default()
            };
            self.next += 1;
            Ok(Some(frame))
        }

        fn seek(&mut self, pos: i64) -> MediaResult<()> {
            self.next = pos;
            Ok(())
        }
    }

    fn worker(limit: i64) -> StreamWorker {
        let decoder = Counter {
            streams: Vec::new(),
            next: 0,
            limit,
        };
        StreamWorker::spawn(
            "counter#video0".to_string(),
            Box::new(decoder),
            StreamKind::Video,
            0,
            MetricsCollector::new(),
        )
        .unwrap()
    }

    fn pts(unit: Option<Unit>) -> Option<i64> {
        unit.map(|u| u.presentation_time())
    }

    #[test]
    fn delivers_in_order_then_end_of_stream() {
        let mut worker = worker(2);
        for expected in [Some(0), Some(1), None, None] {
            worker.dispatch(0).unwrap();
            assert_eq!(pts(worker.collect().unwrap()), expected);
        }
    }

    #[test]
    fn double_dispatch_and_stray_collect_are_usage_errors() {
        let mut worker = worker(5);
        assert!(worker.collect().unwrap_err().is_usage());
        worker.dispatch(0).unwrap();
        assert!(worker.dispatch(0).unwrap_err().is_usage());
        assert_eq!(pts(worker.collect().unwrap()), Some(0));
    }

    #[test]
    fn seek_replaces_outstanding_read() {
        let mut worker = worker(10);
        worker.dispatch(0).unwrap();
        worker.seek(7).unwrap();
        assert!(worker.is_pending());
        assert_eq!(pts(worker.collect().unwrap()), Some(7));
    }

    #[test]
    fn shutdown_with_outstanding_read_is_idempotent() {
        let mut worker = worker(10);
        worker.dispatch(0).unwrap();
        worker.shutdown();
        worker.shutdown();
        assert!(matches!(worker.dispatch(0), Err(MediaError::WorkerGone(_))));
    }
}
