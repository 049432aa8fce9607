//! Clip pipeline: analyze, snap, spawn, deliver.
//!
//! One [`ClipService::start`] call owns a job from registration until the
//! response body is handed to the server. Every path out of it, including
//! the body being dropped early, leaves the job in a terminal status.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, Instrument};

use vodclip_media::{
    build_clip_command, select_delivery_mode, ClipProcess, MediaError, OutcomeWatch,
    OutputStream, OutputTarget, PlaylistAnalyzer, ProcessEvent, ProcessOptions, ProcessOutcome,
    ScratchFile, ScratchStream,
};
use vodclip_models::{
    ClipJob, ClipPlan, ClipRequest, ClipStatus, CodecProfile, DeliveryMode, JobId,
    RequestedWindow, SnappedWindow,
};
use vodclip_progress::ProgressBus;

use crate::config::ClipConfig;
use crate::error::{ApiError, ApiResult};
use crate::logging::JobLogger;
use crate::metrics;

/// A validated clip request with its delivery preferences.
#[derive(Debug, Clone)]
pub struct ClipParams {
    pub request: ClipRequest,
    pub job_id: Option<JobId>,
    pub mode: Option<DeliveryMode>,
    pub profile: Option<CodecProfile>,
    pub user_agent: Option<String>,
}

/// Everything the handler needs to answer the caller.
pub struct ClipDelivery {
    pub job_id: JobId,
    pub asset_id: String,
    pub requested: RequestedWindow,
    pub snapped: SnappedWindow,
    pub mode: DeliveryMode,
    /// Media playlist the tool reads
    pub source_url: String,
    /// Tool arguments, for debugging
    pub args: Vec<String>,
    /// Exact size, known only for buffered delivery
    pub content_length: Option<u64>,
    pub body: Body,
}

/// Runs clip jobs against the origin.
#[derive(Clone)]
pub struct ClipService {
    config: Arc<ClipConfig>,
    ffmpeg: Arc<PathBuf>,
    analyzer: PlaylistAnalyzer,
    bus: ProgressBus,
}

impl ClipService {
    pub fn new(
        config: ClipConfig,
        ffmpeg: PathBuf,
        analyzer: PlaylistAnalyzer,
        bus: ProgressBus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ffmpeg: Arc::new(ffmpeg),
            analyzer,
            bus,
        }
    }

    /// Run a clip request up to the point where bytes can flow.
    ///
    /// Errors returned here happen before any header is sent.
    pub async fn start(&self, params: ClipParams) -> ApiResult<ClipDelivery> {
        let ClipParams {
            request,
            job_id,
            mode,
            profile,
            user_agent,
        } = params;

        request.check(self.config.max_clip_seconds)?;

        let mode = select_delivery_mode(mode, self.config.force_buffered, user_agent.as_deref());
        let profile = profile.unwrap_or(self.config.default_profile);
        let plan = ClipPlan {
            delivery_mode: mode,
            codec_profile: profile,
            transcode: self.config.transcode.clone(),
            network: self.config.network.clone(),
        };

        let job_id = job_id.unwrap_or_default();
        let requested = RequestedWindow::from(&request);
        self.bus.register(ClipJob::new(
            job_id.clone(),
            &request.asset_id,
            requested,
            mode,
            profile,
        ))?;

        let logger = JobLogger::new(&job_id, &request.asset_id, mode);
        logger.log_start(&format!(
            "requested [{}, {}) profile={}",
            request.start, request.end, profile
        ));
        metrics::record_job_started(mode.as_str(), profile.as_str());
        metrics::set_active_jobs(self.bus.active_count());

        // From here on, dropping the guard cancels the job.
        let mut guard = DeliveryGuard::new(self.bus.clone(), job_id.clone(), mode);

        let fetch_started = Instant::now();
        let analyzed = match self.analyzer.fetch_and_parse(&request.asset_id).await {
            Ok(analyzed) => analyzed,
            Err(e) => return Err(reject(&mut guard, &logger, e)),
        };
        metrics::record_playlist_fetch_duration(fetch_started.elapsed().as_secs_f64());

        let snapped = match analyzed.snap(request.start, request.end) {
            Ok(window) => window,
            Err(e) => return Err(reject(&mut guard, &logger, e)),
        };
        let _ = self.bus.update(&job_id, |job| job.set_snapped(snapped));
        logger.log_progress(&format!(
            "snapped to [{}, {}) from {} segments",
            snapped.start,
            snapped.end,
            analyzed.playlist.len()
        ));

        let source_url = analyzed.source_url.to_string();
        let scratch = match mode {
            DeliveryMode::Buffered => Some(ScratchFile::new(&self.config.scratch_dir, &job_id)),
            DeliveryMode::Streamed => None,
        };
        let target = match &scratch {
            Some(file) => OutputTarget::File(file.path().to_path_buf()),
            None => OutputTarget::Pipe,
        };

        let command = build_clip_command(&source_url, &snapped, &plan, target);
        let args = command.build_args();
        let options = ProcessOptions::new(self.ffmpeg.as_path())
            .with_watchdog(plan.watchdog_applies().then_some(self.config.watchdog))
            .with_expects_stdout(scratch.is_none());

        let mut process = match ClipProcess::spawn(&command, options) {
            Ok(process) => process,
            Err(e) => return Err(reject(&mut guard, &logger, e)),
        };
        let _ = self.bus.transition(&job_id, ClipStatus::Running);
        logger.log_progress(&format!("FFmpeg started (pid {:?})", process.pid()));

        let outcome = process.outcome();
        let output = if scratch.is_none() {
            process.take_output()
        } else {
            None
        };

        let span = logger.create_span();
        tokio::spawn(
            drive_events(process, self.bus.clone(), job_id.clone(), profile, logger.clone())
                .instrument(span),
        );

        let (body, content_length) = match (scratch, output) {
            (Some(scratch), _) => {
                let (stream, size) =
                    self.await_buffered(scratch, outcome, &job_id, mode, &mut guard).await?;
                (buffered_body(stream, guard), Some(size))
            }
            (None, Some(mut output)) => {
                let Some(first) = output.next_chunk().await else {
                    let err = first_byte_failure(outcome).await;
                    guard.fail(err.to_string());
                    return Err(err);
                };
                (streamed_body(first, output, outcome, guard), None)
            }
            (None, None) => {
                let err = ApiError::internal("FFmpeg output already taken");
                guard.fail(err.to_string());
                return Err(err);
            }
        };

        Ok(ClipDelivery {
            job_id,
            asset_id: request.asset_id,
            requested,
            snapped,
            mode,
            source_url,
            args,
            content_length,
            body,
        })
    }

    /// Wait for the buffered artifact and open it for reading.
    async fn await_buffered(
        &self,
        scratch: ScratchFile,
        outcome: OutcomeWatch,
        job_id: &JobId,
        mode: DeliveryMode,
        guard: &mut DeliveryGuard,
    ) -> ApiResult<(ScratchStream, u64)> {
        let (ready_tx, ready_rx) = oneshot::channel();

        // Runs to completion even if the caller goes away meanwhile.
        tokio::spawn(finalize_buffered(
            scratch,
            outcome,
            self.bus.clone(),
            job_id.clone(),
            mode,
            ready_tx,
        ));

        let result = match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(ApiError::internal("Buffered delivery ended unexpectedly")),
        };
        let (scratch, size) = match result {
            Ok(ready) => ready,
            Err(e) => {
                guard.fail(e.to_string());
                return Err(e);
            }
        };

        match scratch.into_stream().await {
            Ok(stream) => Ok((stream, size)),
            Err(e) => {
                let err = ApiError::from(e);
                guard.fail(err.to_string());
                Err(err)
            }
        }
    }
}

fn reject(guard: &mut DeliveryGuard, logger: &JobLogger, e: MediaError) -> ApiError {
    if e.is_upstream() {
        metrics::record_upstream_error();
    }
    logger.log_error(&e.to_string());
    let err = ApiError::from(e);
    guard.fail(err.to_string());
    err
}

/// Error for a streamed job whose tool ended before the first byte.
async fn first_byte_failure(mut outcome: OutcomeWatch) -> ApiError {
    match outcome.wait().await.into_result() {
        Err(e) => ApiError::from(e),
        Ok(_) => ApiError::tool(""),
    }
}

/// Keeps a job's terminal status in step with its delivery.
///
/// Dropped while armed means the caller went away: the job is canceled.
struct DeliveryGuard {
    bus: ProgressBus,
    job_id: JobId,
    mode: DeliveryMode,
    armed: bool,
}

impl DeliveryGuard {
    fn new(bus: ProgressBus, job_id: JobId, mode: DeliveryMode) -> Self {
        Self {
            bus,
            job_id,
            mode,
            armed: true,
        }
    }

    fn record_sent(&self, n: usize) {
        let _ = self.bus.update(&self.job_id, |job| job.add_bytes_sent(n as u64));
        metrics::record_bytes_sent(self.mode.as_str(), n as u64);
    }

    fn finish(&mut self) {
        self.armed = false;
        finish_job(&self.bus, &self.job_id, self.mode);
    }

    fn fail(&mut self, message: String) {
        self.armed = false;
        fail_job(&self.bus, &self.job_id, self.mode, message);
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.armed {
            cancel_job(&self.bus, &self.job_id, self.mode);
        }
    }
}

// The first terminal transition wins; metrics count only the winner.

fn finish_job(bus: &ProgressBus, job_id: &JobId, mode: DeliveryMode) {
    let result = bus.update(job_id, |job| {
        job.complete_progress();
        job.transition(ClipStatus::Done)
    });
    if matches!(result, Ok(Ok(()))) {
        metrics::record_job_finished(mode.as_str(), ClipStatus::Done.as_str());
    }
    metrics::set_active_jobs(bus.active_count());
}

fn fail_job(bus: &ProgressBus, job_id: &JobId, mode: DeliveryMode, message: String) {
    if bus.fail(job_id, message).is_ok() {
        metrics::record_job_finished(mode.as_str(), ClipStatus::Error.as_str());
    }
    metrics::set_active_jobs(bus.active_count());
}

fn cancel_job(bus: &ProgressBus, job_id: &JobId, mode: DeliveryMode) {
    if bus.cancel(job_id).is_ok() {
        metrics::record_job_finished(mode.as_str(), ClipStatus::Canceled.as_str());
    }
    metrics::set_active_jobs(bus.active_count());
}

/// Apply tool events to the job until the process is gone.
async fn drive_events(
    mut process: ClipProcess,
    bus: ProgressBus,
    job_id: JobId,
    profile: CodecProfile,
    logger: JobLogger,
) {
    let started = Instant::now();
    let mode = logger.mode();

    while let Some(event) = process.next_event().await {
        match event {
            ProcessEvent::Progress(progress) => {
                debug!(
                    job_id = %job_id,
                    processed_ms = progress.processed_ms(),
                    speed = progress.speed,
                    "FFmpeg progress"
                );
                let _ = bus.update(&job_id, |job| {
                    if progress.is_complete {
                        job.complete_progress();
                    } else {
                        job.record_progress(progress.processed_ms());
                    }
                });
            }
            ProcessEvent::FirstOutput => logger.log_progress("first output byte"),
            ProcessEvent::Finished(outcome) => {
                metrics::record_ffmpeg_duration(
                    profile.as_str(),
                    outcome_label(&outcome),
                    started.elapsed().as_secs_f64(),
                );

                match outcome {
                    ProcessOutcome::Completed { bytes_out } => {
                        logger.log_completion(&format!(
                            "FFmpeg exited cleanly ({} bytes on stdout)",
                            bytes_out
                        ));
                    }
                    ProcessOutcome::Cancelled => {
                        logger.log_warning("FFmpeg cancelled");
                        cancel_job(&bus, &job_id, mode);
                    }
                    failed => {
                        if matches!(failed, ProcessOutcome::Stalled { .. }) {
                            metrics::record_watchdog_trip();
                        }
                        let message = match failed.into_result() {
                            Err(e) => ApiError::from(e).to_string(),
                            Ok(_) => continue,
                        };
                        logger.log_error(&message);
                        fail_job(&bus, &job_id, mode, message);
                    }
                }
            }
        }
    }
}

fn outcome_label(outcome: &ProcessOutcome) -> &'static str {
    match outcome {
        ProcessOutcome::Completed { .. } => "completed",
        ProcessOutcome::Failed(_) => "failed",
        ProcessOutcome::Stalled { .. } => "stalled",
        ProcessOutcome::Cancelled => "cancelled",
    }
}

type Ready = ApiResult<(ScratchFile, u64)>;

/// Wait for the buffered tool run and hand the artifact to the caller.
///
/// If the caller is gone the artifact is removed and the job canceled.
async fn finalize_buffered(
    scratch: ScratchFile,
    mut outcome: OutcomeWatch,
    bus: ProgressBus,
    job_id: JobId,
    mode: DeliveryMode,
    ready: oneshot::Sender<Ready>,
) {
    let result: Ready = match outcome.wait().await.into_result() {
        Ok(_) => {
            let size = scratch.size().await;
            match size {
                Ok(size) if size > 0 => {
                    let _ = bus.update(&job_id, |job| {
                        job.complete_progress();
                        job.set_total_bytes(size);
                    });
                    let _ = bus.transition(&job_id, ClipStatus::Ready);
                    Ok((scratch, size))
                }
                Ok(_) => {
                    drop(scratch);
                    Err(ApiError::tool("FFmpeg produced an empty file"))
                }
                Err(e) => {
                    drop(scratch);
                    Err(e.into())
                }
            }
        }
        Err(e) => {
            drop(scratch);
            Err(e.into())
        }
    };

    if let Err(unsent) = ready.send(result) {
        drop(unsent);
        cancel_job(&bus, &job_id, mode);
    }
}

struct StreamedState {
    pending: Option<Bytes>,
    output: OutputStream,
    outcome: OutcomeWatch,
    guard: DeliveryGuard,
}

/// Body that forwards tool output as it arrives.
///
/// Once output ends the tool's outcome decides whether the body ends
/// cleanly or with an error that aborts the connection.
fn streamed_body(
    first: Bytes,
    output: OutputStream,
    outcome: OutcomeWatch,
    guard: DeliveryGuard,
) -> Body {
    let state = StreamedState {
        pending: Some(first),
        output,
        outcome,
        guard,
    };

    let body = stream::unfold(Some(state), |state| async move {
        let mut state = state?;

        let chunk = match state.pending.take() {
            Some(chunk) => Some(chunk),
            None => state.output.next_chunk().await,
        };
        if let Some(chunk) = chunk {
            state.guard.record_sent(chunk.len());
            return Some((Ok(chunk), Some(state)));
        }

        match state.outcome.wait().await.into_result() {
            Ok(_) => {
                state.guard.finish();
                None
            }
            Err(e) => {
                let message = ApiError::from(e).to_string();
                state.guard.fail(message.clone());
                Some((Err(io::Error::other(message)), None))
            }
        }
    });

    Body::from_stream(body)
}

/// Body that sends a finished scratch file, removing it afterwards.
fn buffered_body(file: ScratchStream, guard: DeliveryGuard) -> Body {
    let body = stream::unfold(Some((file, guard)), |state| async move {
        let (mut file, mut guard) = state?;

        match file.next().await {
            Some(Ok(chunk)) => {
                guard.record_sent(chunk.len());
                Some((Ok(chunk), Some((file, guard))))
            }
            Some(Err(e)) => {
                guard.fail(format!("Failed to read clip: {}", e));
                Some((Err(e), None))
            }
            None => {
                guard.finish();
                None
            }
        }
    });

    Body::from_stream(body)
}
