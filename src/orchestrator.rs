//! Session orchestration: supervision, routing, lifecycle.
//!
//! The orchestrator composes the whole core. It runs two supervised loops --
//! the device read loop and the correction read loop -- and one routing
//! path that carries correction bytes into the device write path. Decoded
//! navigation frames flow through the solution pipeline (fusion merge, fix
//! classification) into the publish sink and an in-process `watch` fanout.
//!
//! Supervision policy: a failed sub-loop takes the session to `Recovering`
//! and retries under exponential backoff; the healthy sub-loop keeps
//! running. Corrections are optional -- GPS-only operation without a caster
//! is a valid running state. No failure terminates the session; only an
//! explicit [`GnssSession::stop`] does, and it waits for both loops to
//! acknowledge cancellation before reporting `Stopped`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::device::DeviceSession;
use crate::error::GnssError;
use crate::fusion::FusionAggregator;
use crate::geo;
use crate::ntrip::CorrectionClient;
use crate::publish::{PublishSink, SolutionUpdate, StatusUpdate};
use crate::settings::Settings;
use crate::stream::PaceExt;
use crate::types::fix::FixStateTracker;
use crate::types::frame::{RawFrame, UbxRecord};
use crate::types::solution::{CarrierSolution, GgaFix, NavigationSolution, fix_code};

/// Budget for one publish-sink call; a slower sink loses that update.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum spacing between correction-statistics publishes.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive-solution jump that triggers a plausibility warning.
const POSITION_JUMP_WARN_M: f64 = 500.0;

/// Session-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Recovering,
    Stopped,
}

/// Handle to a started session.
///
/// Dropping the handle cancels the loops; [`GnssSession::stop`] additionally
/// waits for them to finish so no task keeps touching a closed handle.
pub struct GnssSession {
    state_rx: watch::Receiver<OrchestratorState>,
    solutions_rx: watch::Receiver<Option<SolutionUpdate>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl GnssSession {
    /// Start the orchestrator with the given settings and publish sink.
    ///
    /// Returns immediately; connection attempts happen in the background
    /// and surface through the sink's status updates. Startup failures are
    /// retried under backoff, never returned here -- a missing device may
    /// be plugged in later.
    pub fn start(settings: Settings, sink: Arc<dyn PublishSink>) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(OrchestratorState::Idle);
        let (solutions_tx, solutions_rx) = watch::channel(None);
        // The device supervisor publishes the write-path sender for its
        // current session here; the correction loop picks it up per chunk.
        let (slot_tx, slot_rx) = watch::channel::<Option<mpsc::Sender<Vec<u8>>>>(None);

        let state_tx = Arc::new(state_tx);

        let device_task = tokio::spawn(device_supervisor(
            settings.clone(),
            Arc::clone(&sink),
            Arc::clone(&state_tx),
            solutions_tx,
            slot_tx,
            cancel.clone(),
        ));
        let correction_task = tokio::spawn(correction_supervisor(
            settings,
            sink,
            state_tx,
            slot_rx,
            cancel.clone(),
        ));

        info!("orchestrator started");
        Self { state_rx, solutions_rx, cancel, tasks: vec![device_task, correction_task] }
    }

    /// Current session state.
    pub fn state(&self) -> OrchestratorState {
        *self.state_rx.borrow()
    }

    /// Latest published solution, if any.
    pub fn latest_solution(&self) -> Option<SolutionUpdate> {
        self.solutions_rx.borrow().clone()
    }

    /// Subscribe to solutions at the receiver's native rate.
    pub fn solutions(&self) -> impl Stream<Item = SolutionUpdate> + Send + Unpin + 'static {
        WatchStream::new(self.solutions_rx.clone())
            .filter_map(|opt| async move { opt })
            .boxed()
    }

    /// Subscribe to solutions bounded to `max_hz`, latest-wins.
    pub fn solutions_paced(
        &self,
        max_hz: u32,
    ) -> impl Stream<Item = SolutionUpdate> + Send + Unpin + 'static {
        let period = Duration::from_secs_f64(1.0 / f64::from(max_hz.max(1)));
        self.solutions().pace(period)
    }

    /// Stop the session and wait for both sub-loops to acknowledge.
    pub async fn stop(mut self) {
        info!("stopping session");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("orchestrator task failed during shutdown: {e}");
            }
        }
        info!("session stopped");
    }
}

impl Drop for GnssSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Device-side supervision: open, configure, stream, recover.
async fn device_supervisor(
    settings: Settings,
    sink: Arc<dyn PublishSink>,
    state_tx: Arc<watch::Sender<OrchestratorState>>,
    solutions_tx: watch::Sender<Option<SolutionUpdate>>,
    slot_tx: watch::Sender<Option<mpsc::Sender<Vec<u8>>>>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::default();
    let mut pipeline = SolutionPipeline::new(&settings);

    while !cancel.is_cancelled() {
        let _ = state_tx.send(OrchestratorState::Starting);

        let device_settings = settings.device.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let mut session = DeviceSession::open(&device_settings)?;
            session.configure(&device_settings)?;
            Ok::<_, GnssError>(session)
        })
        .await;

        let session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                report_failure(&e, "device");
                publish_with_timeout(
                    sink.publish_device_status(StatusUpdate::down(e.to_string())),
                    "device status",
                )
                .await;
                if !recover_delay(&state_tx, &mut backoff, &cancel).await {
                    break;
                }
                continue;
            }
            Err(join_err) => {
                error!("device setup task failed: {join_err}");
                if !recover_delay(&state_tx, &mut backoff, &cancel).await {
                    break;
                }
                continue;
            }
        };

        publish_with_timeout(sink.publish_device_status(StatusUpdate::up()), "device status")
            .await;
        let _ = state_tx.send(OrchestratorState::Running);
        let streaming_started = Instant::now();

        let (frames_tx, mut frames_rx) = mpsc::channel::<RawFrame>(64);
        let (corrections_tx, corrections_rx) = mpsc::channel::<Vec<u8>>(32);
        let _ = slot_tx.send(Some(corrections_tx));

        let run_cancel = cancel.child_token();
        let loop_cancel = run_cancel.clone();
        let run_handle = tokio::task::spawn_blocking(move || {
            session.run(frames_tx, corrections_rx, loop_cancel)
        });

        // Route decoded frames until the device loop ends or we shut down.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_frame = frames_rx.recv() => {
                    let Some(frame) = maybe_frame else { break };
                    if let Some(update) = pipeline.handle_frame(frame) {
                        let _ = solutions_tx.send(Some(update.clone()));
                        publish_with_timeout(sink.publish_solution(update), "solution").await;
                    }
                }
            }
        }

        run_cancel.cancel();
        let _ = slot_tx.send(None);
        let run_result = run_handle.await;

        backoff.record_streaming(streaming_started.elapsed());

        if cancel.is_cancelled() {
            break;
        }

        let failure = match run_result {
            Ok(Ok(())) => GnssError::device_lost("device loop ended unexpectedly"),
            Ok(Err(e)) => e,
            Err(join_err) => GnssError::device_lost(format!("device task failed: {join_err}")),
        };
        report_failure(&failure, "device");
        publish_with_timeout(
            sink.publish_device_status(StatusUpdate::down(failure.to_string())),
            "device status",
        )
        .await;

        if !recover_delay(&state_tx, &mut backoff, &cancel).await {
            break;
        }
    }

    let _ = state_tx.send(OrchestratorState::Stopped);
    debug!("device supervisor ended");
}

/// Caster-side supervision: connect, stream, forward, recover.
async fn correction_supervisor(
    settings: Settings,
    sink: Arc<dyn PublishSink>,
    state_tx: Arc<watch::Sender<OrchestratorState>>,
    slot_rx: watch::Receiver<Option<mpsc::Sender<Vec<u8>>>>,
    cancel: CancellationToken,
) {
    if !settings.correction.enabled {
        info!("corrections disabled, running GPS-only");
        return;
    }
    if settings.correction.host.is_empty() || settings.correction.mountpoint.is_empty() {
        warn!("corrections enabled but caster host or mountpoint missing");
        publish_with_timeout(
            sink.publish_correction_status(StatusUpdate::down("caster configuration incomplete")),
            "correction status",
        )
        .await;
        return;
    }

    let mut client = CorrectionClient::new(settings.correction.clone());
    let mut backoff = Backoff::default();

    while !cancel.is_cancelled() {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.connect() => result,
        };

        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                report_failure(&e, "correction");
                publish_with_timeout(
                    sink.publish_correction_status(StatusUpdate::down(e.to_string())),
                    "correction status",
                )
                .await;
                if !correction_recover_delay(&state_tx, &mut backoff, &cancel).await {
                    break;
                }
                continue;
            }
        };

        publish_with_timeout(sink.publish_correction_status(StatusUpdate::up()), "correction status")
            .await;
        let streaming_started = Instant::now();
        let mut last_stats: Option<Instant> = None;

        let failure = loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break None,
                chunk = stream.next_chunk() => chunk,
            };

            match chunk {
                Ok(chunk) => {
                    debug!(
                        bytes = chunk.data.len(),
                        types = ?chunk.message_types,
                        sequence = chunk.sequence,
                        "correction chunk"
                    );
                    // Bytes go to whichever device session is current, in
                    // caster order. No session (device reconnecting) or a
                    // full queue drops the chunk; corrections age out in
                    // seconds anyway.
                    let tx = slot_rx.borrow().clone();
                    match tx {
                        Some(tx) => {
                            if tx.try_send(chunk.data).is_err() {
                                debug!("device write path unavailable, dropping correction chunk");
                            }
                        }
                        None => debug!("no device session, dropping correction chunk"),
                    }

                    if last_stats.is_none_or(|at| at.elapsed() >= STATS_INTERVAL) {
                        last_stats = Some(Instant::now());
                        publish_with_timeout(
                            sink.publish_correction_stats(stream.stats().clone()),
                            "correction stats",
                        )
                        .await;
                    }
                }
                Err(e) => break Some(e),
            }
        };

        client.mark_disconnected();
        backoff.record_streaming(streaming_started.elapsed());
        publish_with_timeout(
            sink.publish_correction_stats(stream.stats().clone()),
            "correction stats",
        )
        .await;

        let Some(failure) = failure else { break }; // cancelled
        report_failure(&failure, "correction");
        publish_with_timeout(
            sink.publish_correction_status(StatusUpdate::down(failure.to_string())),
            "correction status",
        )
        .await;

        if !correction_recover_delay(&state_tx, &mut backoff, &cancel).await {
            break;
        }
    }

    debug!("correction supervisor ended");
}

/// Enter `Recovering`, wait out the backoff, re-enter via `Starting`.
/// Returns `false` when cancelled during the wait.
async fn recover_delay(
    state_tx: &watch::Sender<OrchestratorState>,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> bool {
    let _ = state_tx.send(OrchestratorState::Recovering);
    let delay = backoff.next_delay();
    info!(delay_s = delay.as_secs(), attempt = backoff.consecutive_failures(), "retrying after backoff");
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Correction-path variant: only degrades the session state when the device
/// side was actually running, since GPS-only operation is valid.
async fn correction_recover_delay(
    state_tx: &watch::Sender<OrchestratorState>,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> bool {
    if *state_tx.borrow() == OrchestratorState::Running {
        let _ = state_tx.send(OrchestratorState::Recovering);
    }
    let delay = backoff.next_delay();
    info!(delay_s = delay.as_secs(), attempt = backoff.consecutive_failures(), "caster retry after backoff");
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn report_failure(error: &GnssError, what: &str) {
    if error.is_transient() {
        warn!("{what} connection lost: {error}");
    } else {
        error!("{what} connection failed, operator attention likely needed: {error}");
    }
}

async fn publish_with_timeout(publish: impl Future<Output = ()>, what: &str) {
    if tokio::time::timeout(PUBLISH_TIMEOUT, publish).await.is_err() {
        warn!(what, "publish sink overran its budget, update dropped for this cycle");
    }
}

/// Per-frame routing and enrichment, independent of any I/O.
struct SolutionPipeline {
    tracker: FixStateTracker,
    fusion: FusionAggregator,
    last_itow: Option<u32>,
    last_position: Option<(f64, f64)>,
    last_pvt_at: Option<Instant>,
    /// PVT silence after which NMEA GGA sentences stand in for solutions.
    gga_fallback_after: Duration,
}

impl SolutionPipeline {
    fn new(settings: &Settings) -> Self {
        Self {
            tracker: FixStateTracker::default(),
            fusion: FusionAggregator::new(
                settings.device.dead_reckoning,
                settings.update_period(),
            ),
            last_itow: None,
            last_position: None,
            last_pvt_at: None,
            gga_fallback_after: settings.update_period() * 2,
        }
    }

    fn handle_frame(&mut self, frame: RawFrame) -> Option<SolutionUpdate> {
        match frame {
            RawFrame::Ubx(ubx) => match ubx.record() {
                UbxRecord::NavPvt(solution) => {
                    Some(self.handle_solution(solution, Instant::now()))
                }
                UbxRecord::EsfIns(sample) => {
                    self.fusion.push(sample);
                    None
                }
                _ => None,
            },
            RawFrame::Nmea(sentence) => {
                let gga = GgaFix::from_sentence(&sentence)?;
                self.handle_gga(gga, Instant::now())
            }
            RawFrame::Malformed(_) => None,
        }
    }

    fn handle_solution(&mut self, solution: NavigationSolution, now: Instant) -> SolutionUpdate {
        let out_of_order = self.last_itow.is_some_and(|prev| solution.itow_ms < prev);
        if out_of_order {
            warn!(
                itow = solution.itow_ms,
                prev = self.last_itow,
                "receiver time tag ran backwards; passing through flagged"
            );
        }
        self.last_itow = Some(solution.itow_ms);
        self.last_pvt_at = Some(now);

        let solution = self.fusion.merge(solution);
        let fix = self.tracker.update(&solution);

        if fix.state.has_position() {
            if let Some((lat, lon)) = self.last_position {
                let jump = geo::distance_m(lat, lon, solution.lat_deg, solution.lon_deg);
                if jump > POSITION_JUMP_WARN_M {
                    warn!(
                        jump_m = jump,
                        bearing = geo::bearing_deg(lat, lon, solution.lat_deg, solution.lon_deg),
                        "implausible position jump between consecutive solutions"
                    );
                }
            }
            self.last_position = Some((solution.lat_deg, solution.lon_deg));
        }

        SolutionUpdate { solution, fix, out_of_order }
    }

    /// GGA fallback: only when UBX navigation output has gone quiet, so a
    /// receiver that emits both never publishes each position twice.
    fn handle_gga(&mut self, gga: GgaFix, now: Instant) -> Option<SolutionUpdate> {
        if self.last_pvt_at.is_some_and(|at| now.duration_since(at) < self.gga_fallback_after) {
            return None;
        }

        let solution = solution_from_gga(&gga);
        let fix = self.tracker.update(&solution);
        debug!(fix = %fix.state, "published GGA fallback solution");
        Some(SolutionUpdate { solution, fix, out_of_order: false })
    }
}

/// Synthesize a solution record from a GGA position echo.
fn solution_from_gga(gga: &GgaFix) -> NavigationSolution {
    let (fix_type, carrier, diff_applied) = match gga.quality {
        0 => (fix_code::NO_FIX, CarrierSolution::None, false),
        2 => (fix_code::FIX_3D, CarrierSolution::None, true),
        4 => (fix_code::FIX_3D, CarrierSolution::Fixed, false),
        5 => (fix_code::FIX_3D, CarrierSolution::Float, false),
        6 => (fix_code::DEAD_RECKONING_ONLY, CarrierSolution::None, false),
        _ => (fix_code::FIX_3D, CarrierSolution::None, false),
    };

    // GGA carries no accuracy estimate; scale HDOP by a nominal 5 m range
    // error for a coarse stand-in.
    let h_acc_m = gga.hdop * 5.0;

    NavigationSolution {
        itow_ms: 0,
        timestamp: None,
        lat_deg: gga.lat_deg,
        lon_deg: gga.lon_deg,
        height_m: gga.altitude_msl_m,
        height_msl_m: gga.altitude_msl_m,
        h_acc_m,
        v_acc_m: h_acc_m * 1.5,
        ground_speed_mps: 0.0,
        heading_deg: 0.0,
        satellites: gga.satellites,
        fix_type,
        carrier,
        diff_applied,
        gnss_fix_ok: gga.quality != 0,
        fusion: None,
    }
}
