use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use crate::codec;
use crate::detect::{DetectionSet, DetectorBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::preview::Previewer;
use crate::transport::RecordSink;

use super::{
    Acquire, CancelToken, PipelineFault, PipelineMode, PipelineReport, PipelineSettings,
    PipelineState, PipelineStats,
};

const STAGE_POLL: Duration = Duration::from_millis(50);

type StagedCycle = Result<(Frame, DetectionSet), PipelineFault>;

/// Drives one run from `Starting` to `Stopped` or `Faulted`.
pub struct Pipeline {
    settings: PipelineSettings,
    cancel: CancelToken,
    state: PipelineState,
    stats: PipelineStats,
    reached_running: bool,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, cancel: CancelToken) -> Self {
        Self {
            settings,
            cancel,
            state: PipelineState::Starting,
            stats: PipelineStats::default(),
            reached_running: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run until cancelled or faulted. The previewer counts as acquired before the
    /// other resources and is released last.
    pub fn run(
        mut self,
        acquire: &mut dyn Acquire,
        mut previewer: Box<dyn Previewer>,
    ) -> PipelineReport {
        log::info!("pipeline: {} ({} mode)", self.state, self.settings.mode);

        let mut source = match acquire.frame_source() {
            Ok(source) => source,
            Err(err) => return self.abort_start(PipelineFault::Device(err), None, previewer),
        };
        let mut detector = match acquire.detector() {
            Ok(detector) => detector,
            Err(err) => {
                return self.abort_start(PipelineFault::Detector(err), Some(source), previewer)
            }
        };
        if let Err(err) = detector.warm_up() {
            return self.abort_start(PipelineFault::Detector(err), Some(source), previewer);
        }
        let mut sink = match acquire.sink() {
            Ok(sink) => sink,
            Err(err) => return self.abort_start(PipelineFault::Connect(err), Some(source), previewer),
        };

        self.reached_running = true;
        self.transition(PipelineState::Running);

        let outcome = match self.settings.mode {
            PipelineMode::Sequential => {
                self.run_sequential(&mut *source, &mut *detector, &mut *sink, &mut *previewer)
            }
            PipelineMode::Staged => {
                self.run_staged(&mut *source, &mut *detector, &mut *sink, &mut *previewer)
            }
        };

        let fault = match outcome {
            Ok(()) => None,
            Err(PipelineFault::Send(err)) if self.cancel.is_forced() => {
                log::warn!("pipeline: in-flight send interrupted by forced stop: {}", err);
                None
            }
            Err(fault) => Some(fault),
        };
        match &fault {
            None => self.transition(PipelineState::Stopping),
            Some(fault) => {
                log::error!("pipeline: {}", fault);
                self.transition(PipelineState::Faulted);
            }
        }

        drop(detector);
        release(Some(sink), Some(source), previewer);
        if self.state == PipelineState::Stopping {
            self.transition(PipelineState::Stopped);
        }
        self.report(fault)
    }

    fn abort_start(
        mut self,
        fault: PipelineFault,
        source: Option<Box<dyn FrameSource>>,
        previewer: Box<dyn Previewer>,
    ) -> PipelineReport {
        log::error!("pipeline: startup failed: {}", fault);
        self.transition(PipelineState::Faulted);
        release(None, source, previewer);
        self.report(Some(fault))
    }

    fn report(self, fault: Option<PipelineFault>) -> PipelineReport {
        log::info!(
            "pipeline: {} after {} cycles ({} skipped, {} records sent)",
            self.state,
            self.stats.cycles_completed,
            self.stats.cycles_skipped,
            self.stats.records_sent
        );
        PipelineReport {
            final_state: self.state,
            fault,
            stats: self.stats,
            reached_running: self.reached_running,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        log::info!("pipeline: {} -> {}", self.state, next);
        self.state = next;
    }

    fn run_sequential(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        sink: &mut dyn RecordSink,
        previewer: &mut dyn Previewer,
    ) -> Result<(), PipelineFault> {
        let mut failures = CaptureFailures::new(self.settings.max_consecutive_capture_failures);
        let mut health = HealthLog::new(self.settings.health_interval());
        let retry = self.settings.capture_retry();

        while !self.cancel.is_cancelled() {
            match capture(source, &mut failures, retry)? {
                Some(frame) => {
                    let detections = detector.infer(&frame).map_err(PipelineFault::Inference)?;
                    self.deliver(sink, previewer, &frame, &detections)?;
                }
                None => self.stats.cycles_skipped += 1,
            }
            if health.due() {
                log::info!("{}", source_health(source));
                log::info!("{}", pipeline_health(&self.stats));
            }
        }
        Ok(())
    }

    fn run_staged(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        sink: &mut dyn RecordSink,
        previewer: &mut dyn Previewer,
    ) -> Result<(), PipelineFault> {
        let halt = AtomicBool::new(false);
        let skipped = AtomicU64::new(0);
        let cancel = self.cancel.clone();
        let settings = self.settings.clone();

        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<StagedCycle>(1);
            let worker = scope.spawn({
                let (halt, skipped, cancel, settings) = (&halt, &skipped, &cancel, &settings);
                move || capture_worker(source, detector, tx, cancel, halt, skipped, settings)
            });

            let outcome = self.drain_staged(&rx, sink, previewer, &skipped);

            halt.store(true, Ordering::SeqCst);
            // Unblocks a worker waiting on a full channel.
            drop(rx);
            let joined = worker.join();
            self.stats.cycles_skipped += skipped.load(Ordering::SeqCst);
            match (outcome, joined) {
                (Ok(()), Err(_)) => Err(PipelineFault::WorkerLost),
                (outcome, _) => outcome,
            }
        })
    }

    fn drain_staged(
        &mut self,
        rx: &Receiver<StagedCycle>,
        sink: &mut dyn RecordSink,
        previewer: &mut dyn Previewer,
        skipped: &AtomicU64,
    ) -> Result<(), PipelineFault> {
        let mut health = HealthLog::new(self.settings.health_interval());
        loop {
            // A cycle prefetched after cancellation is dropped unsent.
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match rx.recv_timeout(STAGE_POLL) {
                Ok(Ok((frame, detections))) => self.deliver(sink, previewer, &frame, &detections)?,
                Ok(Err(fault)) => return Err(fault),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return if self.cancel.is_cancelled() {
                        Ok(())
                    } else {
                        Err(PipelineFault::WorkerLost)
                    };
                }
            }
            if health.due() {
                let mut stats = self.stats;
                stats.cycles_skipped += skipped.load(Ordering::Relaxed);
                log::info!("{}", pipeline_health(&stats));
            }
        }
    }

    /// Encode the whole set first so an encode failure never leaves a partial block
    /// on the wire.
    fn deliver(
        &mut self,
        sink: &mut dyn RecordSink,
        previewer: &mut dyn Previewer,
        frame: &Frame,
        detections: &DetectionSet,
    ) -> Result<(), PipelineFault> {
        let lines = codec::encode_set(detections)?;
        for line in &lines {
            sink.send(line)?;
            self.stats.records_sent += 1;
        }
        if let Err(err) = previewer.render(frame, detections) {
            self.stats.preview_failures += 1;
            log::warn!("preview: {} render failed: {:#}", previewer.name(), err);
        }
        self.stats.cycles_completed += 1;
        log::debug!(
            "pipeline: frame {} -> {} records",
            frame.sequence,
            lines.len()
        );
        Ok(())
    }
}

fn capture_worker(
    source: &mut dyn FrameSource,
    detector: &mut dyn DetectorBackend,
    tx: SyncSender<StagedCycle>,
    cancel: &CancelToken,
    halt: &AtomicBool,
    skipped: &AtomicU64,
    settings: &PipelineSettings,
) {
    let mut failures = CaptureFailures::new(settings.max_consecutive_capture_failures);
    let retry = settings.capture_retry();
    // Capture counters are reported from here since this thread owns the source.
    let mut health = HealthLog::new(settings.health_interval());
    while !cancel.is_cancelled() && !halt.load(Ordering::SeqCst) {
        if health.due() {
            log::info!("{}", source_health(source));
        }
        let cycle = match capture(source, &mut failures, retry) {
            Ok(Some(frame)) => detector
                .infer(&frame)
                .map(|detections| (frame, detections))
                .map_err(PipelineFault::Inference),
            Ok(None) => {
                skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(fault) => Err(fault),
        };
        let fatal = cycle.is_err();
        if tx.send(cycle).is_err() || fatal {
            break;
        }
    }
}

struct CaptureFailures {
    consecutive: u32,
    ceiling: Option<u32>,
}

impl CaptureFailures {
    fn new(ceiling: Option<u32>) -> Self {
        Self {
            consecutive: 0,
            ceiling,
        }
    }
}

/// Read one frame. A failed read is a skipped cycle unless the ceiling is reached.
fn capture(
    source: &mut dyn FrameSource,
    failures: &mut CaptureFailures,
    retry: Duration,
) -> Result<Option<Frame>, PipelineFault> {
    match source.next_frame() {
        Ok(frame) => {
            failures.consecutive = 0;
            Ok(Some(frame))
        }
        Err(err) => {
            failures.consecutive = failures.consecutive.saturating_add(1);
            log::debug!("pipeline: cycle skipped: {}", err);
            if let Some(ceiling) = failures.ceiling {
                if failures.consecutive >= ceiling {
                    return Err(PipelineFault::CaptureStalled(failures.consecutive));
                }
            }
            if !retry.is_zero() {
                thread::sleep(retry);
            }
            Ok(None)
        }
    }
}

struct HealthLog {
    interval: Option<Duration>,
    last: Instant,
}

impl HealthLog {
    fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    fn due(&mut self) -> bool {
        match self.interval {
            Some(interval) if self.last.elapsed() >= interval => {
                self.last = Instant::now();
                true
            }
            _ => false,
        }
    }
}

fn source_health(source: &dyn FrameSource) -> String {
    let capture = source.stats();
    format!(
        "health: source={} healthy={} captured={} missed={}",
        source.describe(),
        source.is_healthy(),
        capture.frames_captured,
        capture.frames_missed
    )
}

fn pipeline_health(stats: &PipelineStats) -> String {
    format!(
        "health: frames={} records={} skipped={} preview_failures={}",
        stats.cycles_completed, stats.records_sent, stats.cycles_skipped, stats.preview_failures
    )
}

/// Release in reverse acquisition order. Every release is attempted.
fn release(
    sink: Option<Box<dyn RecordSink>>,
    source: Option<Box<dyn FrameSource>>,
    mut previewer: Box<dyn Previewer>,
) {
    if let Some(mut sink) = sink {
        if let Err(err) = sink.close() {
            log::warn!("teardown: closing connection failed: {}", err);
        }
    }
    if let Some(mut source) = source {
        let description = source.describe();
        if let Err(err) = source.close() {
            log::warn!("teardown: closing {} failed: {}", description, err);
        }
    }
    if let Err(err) = previewer.close() {
        log::warn!("teardown: closing preview {} failed: {:#}", previewer.name(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, InferenceError};
    use crate::ingest::{CaptureError, DeviceError};
    use crate::transport::{ConnectError, ConnectionState, SendError};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Closes(Arc<AtomicUsize>);

    impl Closes {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct FakeSource {
        script: VecDeque<Result<u64, ()>>,
        closes: Closes,
    }

    impl FrameSource for FakeSource {
        fn open(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            match self.script.pop_front() {
                Some(Ok(seq)) => Ok(Frame::from_rgb(vec![0u8; 2 * 2 * 3], 2, 2, seq).unwrap()),
                Some(Err(())) => Err(CaptureError::Read("scripted failure".into())),
                None => Err(CaptureError::NotReady),
            }
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.closes.bump();
            Ok(())
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    /// Emits `per_frame` detections tagged with the frame sequence.
    struct FakeDetector {
        per_frame: u32,
        fail: bool,
    }

    impl DetectorBackend for FakeDetector {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn infer(&mut self, frame: &Frame) -> Result<DetectionSet, InferenceError> {
            if self.fail {
                return Err(InferenceError::Run("scripted failure".into()));
            }
            (0..self.per_frame)
                .map(|i| {
                    let id = frame.sequence as u32 * 10 + i;
                    Detection::new([0.0, 0.0, 1.0, 1.0], 0.5, id, format!("c{}", id))
                        .map_err(InferenceError::from)
                })
                .collect()
        }
    }

    #[derive(Clone, Default)]
    struct FakeSink {
        lines: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_on_send: bool,
        closes: Closes,
    }

    impl RecordSink for FakeSink {
        fn send(&mut self, line: &[u8]) -> Result<(), SendError> {
            if self.fail_on_send {
                return Err(SendError::Write {
                    written: 0,
                    len: line.len(),
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"),
                });
            }
            self.lines.lock().unwrap().push(line.to_vec());
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closes.bump();
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    /// Cancels the run after `stop_after` renders.
    struct FakePreviewer {
        cancel: CancelToken,
        stop_after: usize,
        rendered: usize,
        fail_render: bool,
        closes: Closes,
    }

    impl Previewer for FakePreviewer {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn render(&mut self, _frame: &Frame, _detections: &DetectionSet) -> anyhow::Result<()> {
            self.rendered += 1;
            if self.rendered >= self.stop_after {
                self.cancel.cancel();
            }
            if self.fail_render {
                anyhow::bail!("window gone");
            }
            Ok(())
        }

        fn close(&mut self) -> anyhow::Result<()> {
            self.closes.bump();
            Ok(())
        }
    }

    struct Harness {
        script: Vec<Result<u64, ()>>,
        per_frame: u32,
        detector_fails: bool,
        connect_fails: bool,
        sink: FakeSink,
        source_closes: Closes,
        sinks_handed_out: usize,
    }

    impl Harness {
        fn new(script: Vec<Result<u64, ()>>, per_frame: u32) -> Self {
            Self {
                script,
                per_frame,
                detector_fails: false,
                connect_fails: false,
                sink: FakeSink::default(),
                source_closes: Closes::default(),
                sinks_handed_out: 0,
            }
        }

        fn sent(&self) -> Vec<Detection> {
            self.sink
                .lines
                .lock()
                .unwrap()
                .iter()
                .map(|line| codec::decode(line).unwrap())
                .collect()
        }
    }

    impl Acquire for Harness {
        fn frame_source(&mut self) -> Result<Box<dyn FrameSource>, DeviceError> {
            Ok(Box::new(FakeSource {
                script: self.script.drain(..).collect(),
                closes: self.source_closes.clone(),
            }))
        }

        fn detector(&mut self) -> Result<Box<dyn DetectorBackend>, InferenceError> {
            Ok(Box::new(FakeDetector {
                per_frame: self.per_frame,
                fail: self.detector_fails,
            }))
        }

        fn sink(&mut self) -> Result<Box<dyn RecordSink>, ConnectError> {
            if self.connect_fails {
                return Err(ConnectError::Connect {
                    endpoint: "127.0.0.1:9".into(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            self.sinks_handed_out += 1;
            Ok(Box::new(self.sink.clone()))
        }
    }

    fn previewer(cancel: &CancelToken, stop_after: usize) -> (Box<FakePreviewer>, Closes) {
        let closes = Closes::default();
        let previewer = FakePreviewer {
            cancel: cancel.clone(),
            stop_after,
            rendered: 0,
            fail_render: false,
            closes: closes.clone(),
        };
        (Box::new(previewer), closes)
    }

    fn settings(mode: PipelineMode) -> PipelineSettings {
        PipelineSettings {
            mode,
            capture_retry_ms: 1,
            health_log_secs: 0,
            ..PipelineSettings::default()
        }
    }

    fn run(harness: &mut Harness, mode: PipelineMode, stop_after: usize) -> (PipelineReport, Closes) {
        let cancel = CancelToken::new();
        let (previewer, preview_closes) = previewer(&cancel, stop_after);
        let report = Pipeline::new(settings(mode), cancel).run(harness, previewer);
        (report, preview_closes)
    }

    fn class_ids(detections: &[Detection]) -> Vec<u32> {
        detections.iter().map(|d| d.class_id()).collect()
    }

    #[test]
    fn sends_each_set_in_order_then_stops() {
        let mut harness = Harness::new(vec![Ok(0), Ok(1)], 3);
        let (report, preview_closes) = run(&mut harness, PipelineMode::Sequential, 2);

        assert!(report.is_success());
        assert!(report.reached_running);
        assert_eq!(report.final_state, PipelineState::Stopped);
        assert_eq!(class_ids(&harness.sent()), vec![0, 1, 2, 10, 11, 12]);
        assert_eq!(report.stats.records_sent, 6);
        assert_eq!(report.stats.cycles_completed, 2);
        assert_eq!(harness.sink.closes.count(), 1);
        assert_eq!(harness.source_closes.count(), 1);
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn empty_sets_send_nothing_but_complete_cycles() {
        let mut harness = Harness::new(vec![Ok(0), Ok(1), Ok(2)], 0);
        let (report, _) = run(&mut harness, PipelineMode::Sequential, 3);

        assert!(report.is_success());
        assert!(harness.sent().is_empty());
        assert_eq!(report.stats.cycles_completed, 3);
        assert_eq!(report.stats.records_sent, 0);
    }

    #[test]
    fn transient_capture_failure_skips_only_that_cycle() {
        let mut harness = Harness::new(vec![Ok(0), Err(()), Ok(1)], 1);
        let (report, _) = run(&mut harness, PipelineMode::Sequential, 2);

        assert!(report.is_success());
        assert_eq!(class_ids(&harness.sent()), vec![0, 10]);
        assert_eq!(report.stats.cycles_skipped, 1);
        assert_eq!(report.stats.cycles_completed, 2);
    }

    #[test]
    fn send_failure_faults_and_releases_everything_once() {
        let mut harness = Harness::new(vec![Ok(0), Ok(1)], 2);
        harness.sink.fail_on_send = true;
        let (report, preview_closes) = run(&mut harness, PipelineMode::Sequential, 10);

        assert!(!report.is_success());
        assert_eq!(report.final_state, PipelineState::Faulted);
        assert!(matches!(report.fault, Some(PipelineFault::Send(_))));
        assert_eq!(harness.sink.closes.count(), 1);
        assert_eq!(harness.source_closes.count(), 1);
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn inference_failure_faults() {
        let mut harness = Harness::new(vec![Ok(0)], 1);
        harness.detector_fails = true;
        let (report, _) = run(&mut harness, PipelineMode::Sequential, 10);

        assert_eq!(report.final_state, PipelineState::Faulted);
        assert!(matches!(report.fault, Some(PipelineFault::Inference(_))));
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn connect_failure_never_reaches_running() {
        let mut harness = Harness::new(vec![Ok(0)], 1);
        harness.connect_fails = true;
        let (report, preview_closes) = run(&mut harness, PipelineMode::Sequential, 10);

        assert!(!report.reached_running);
        assert_eq!(report.final_state, PipelineState::Faulted);
        assert!(matches!(report.fault, Some(PipelineFault::Connect(_))));
        assert_eq!(harness.sinks_handed_out, 0);
        assert_eq!(harness.source_closes.count(), 1);
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn capture_ceiling_converts_failures_into_fault() {
        let mut harness = Harness::new(vec![Err(()), Err(()), Err(())], 1);
        let cancel = CancelToken::new();
        let (previewer, _) = previewer(&cancel, 10);
        let settings = PipelineSettings {
            max_consecutive_capture_failures: Some(3),
            ..settings(PipelineMode::Sequential)
        };
        let report = Pipeline::new(settings, cancel).run(&mut harness, previewer);

        assert!(matches!(report.fault, Some(PipelineFault::CaptureStalled(3))));
        assert_eq!(report.stats.cycles_skipped, 2);
        assert_eq!(harness.source_closes.count(), 1);
    }

    #[test]
    fn preview_failures_are_counted_not_escalated() {
        let mut harness = Harness::new(vec![Ok(0), Ok(1)], 1);
        let cancel = CancelToken::new();
        let (mut previewer, _) = previewer(&cancel, 2);
        previewer.fail_render = true;
        let report = Pipeline::new(settings(PipelineMode::Sequential), cancel)
            .run(&mut harness, previewer);

        assert!(report.is_success());
        assert_eq!(report.stats.preview_failures, 2);
        assert_eq!(class_ids(&harness.sent()), vec![0, 10]);
    }

    #[test]
    fn cancelled_before_first_cycle_stops_cleanly() {
        let mut harness = Harness::new(vec![Ok(0)], 1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let (previewer, preview_closes) = previewer(&cancel, 10);
        let report = Pipeline::new(settings(PipelineMode::Sequential), cancel)
            .run(&mut harness, previewer);

        assert!(report.is_success());
        assert!(report.reached_running);
        assert!(harness.sent().is_empty());
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn staged_mode_preserves_set_order() {
        let mut harness = Harness::new(vec![Ok(0), Err(()), Ok(1), Ok(2)], 3);
        let (report, preview_closes) = run(&mut harness, PipelineMode::Staged, 3);

        assert!(report.is_success());
        assert_eq!(
            class_ids(&harness.sent()),
            vec![0, 1, 2, 10, 11, 12, 20, 21, 22]
        );
        assert_eq!(report.stats.cycles_completed, 3);
        assert_eq!(harness.sink.closes.count(), 1);
        assert_eq!(harness.source_closes.count(), 1);
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn staged_send_failure_faults_and_joins_worker() {
        let mut harness = Harness::new(vec![Ok(0), Ok(1), Ok(2)], 1);
        harness.sink.fail_on_send = true;
        let (report, preview_closes) = run(&mut harness, PipelineMode::Staged, 10);

        assert_eq!(report.final_state, PipelineState::Faulted);
        assert!(matches!(report.fault, Some(PipelineFault::Send(_))));
        assert_eq!(harness.sink.closes.count(), 1);
        assert_eq!(harness.source_closes.count(), 1);
        assert_eq!(preview_closes.count(), 1);
    }

    #[test]
    fn staged_inference_failure_is_reported_by_send_stage() {
        let mut harness = Harness::new(vec![Ok(0)], 1);
        harness.detector_fails = true;
        let (report, _) = run(&mut harness, PipelineMode::Staged, 10);

        assert!(matches!(report.fault, Some(PipelineFault::Inference(_))));
    }

    #[test]
    fn health_lines_carry_capture_and_pipeline_counters() {
        let mut source = crate::ingest::CaptureSource::new(crate::ingest::CaptureConfig {
            device: "stub://health?drop_every=2".to_string(),
            width: 4,
            height: 4,
            target_fps: 0,
        })
        .unwrap();
        source.open().unwrap();
        for _ in 0..4 {
            let _ = source.next_frame();
        }

        let line = source_health(&source);
        assert!(line.contains("source=stub://health?drop_every=2 (4x4, synthetic)"));
        assert!(line.contains("healthy=true"));
        assert!(line.contains("captured=2"));
        assert!(line.contains("missed=2"));

        let stats = PipelineStats {
            cycles_completed: 5,
            records_sent: 12,
            cycles_skipped: 2,
            preview_failures: 1,
        };
        assert_eq!(
            pipeline_health(&stats),
            "health: frames=5 records=12 skipped=2 preview_failures=1"
        );
    }

    #[test]
    fn sources_without_counters_report_defaults() {
        let source = FakeSource {
            script: VecDeque::new(),
            closes: Closes::default(),
        };
        assert_eq!(
            source_health(&source),
            "health: source=fake healthy=true captured=0 missed=0"
        );
    }
}
