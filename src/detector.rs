//! Attention detection loop.
//!
//! The detector owns one camera and one pose model per run. Everything runs
//! on the current thread's [`tokio::task::LocalSet`]: the frame loop and the
//! Ctrl+C hook are local tasks, only model loading is moved to the blocking
//! pool. The active flag is a watch channel so that [`AttentionDetector::stop`]
//! also wakes a loop sleeping between frames.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use attentrs_vision::{
    AttentionClassifier, AttentionThresholds, CameraIntrinsics, FramePipeline, PnpSolver,
    PoseEstimator, SolverSettings, Verdict, VideoSource,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::report::{AttentionReport, ReportPolicy, ReportSink};
use crate::session::AuthContext;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// Delay between the end of one frame and the start of the next.
    pub interval: Duration,
    pub thresholds: AttentionThresholds,
    pub solver: SolverSettings,
    pub report_policy: ReportPolicy,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            thresholds: AttentionThresholds::default(),
            solver: SolverSettings::default(),
            report_policy: ReportPolicy::default(),
        }
    }
}

pub struct AttentionDetector<R> {
    settings: DetectorSettings,
    sink: Rc<R>,
    active: Rc<watch::Sender<bool>>,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl<R> AttentionDetector<R> {
    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Stop detection. Safe to call at any time and any number of times.
    pub fn stop(&self) {
        deactivate(&self.active);
    }

    /// Resolves once the loop task has released its camera and model.
    pub async fn wait(&self) {
        let task = self.task.borrow_mut().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("detection loop aborted: {}", e);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.is_active()
            || self
                .task
                .borrow()
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }
}

impl<R: ReportSink + 'static> AttentionDetector<R> {
    pub fn new(settings: DetectorSettings, sink: R) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            settings,
            sink: Rc::new(sink),
            active: Rc::new(active),
            task: RefCell::new(None),
        }
    }

    /// Acquire the camera and the model, then start the frame loop.
    ///
    /// Must be called from within a [`tokio::task::LocalSet`]. Returns once
    /// detection is running; initialization failures are logged and
    /// returned, in which case nothing keeps running.
    pub async fn start<V, E, L>(&self, source: V, loader: L, auth: AuthContext) -> Result<()>
    where
        V: VideoSource + 'static,
        E: PoseEstimator + Send + 'static,
        L: FnOnce() -> Result<E> + Send + 'static,
    {
        if self.is_running() {
            anyhow::bail!("attention detection is already running");
        }
        self.active.send_replace(true);

        let pipeline = match self.prepare(&source, loader).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.active.send_replace(false);
                log::error!("failed to start attention detection: {:#}", e);
                return Err(e);
            }
        };

        if !self.is_active() {
            log::info!("attention detection stopped during initialization");
            return Ok(());
        }

        tokio::task::spawn_local(interrupt_hook(Rc::clone(&self.active)));

        log::info!(
            "attention detection started for class {} every {:?}",
            auth.class_id,
            self.settings.interval
        );
        let frame_loop = FrameLoop {
            source,
            pipeline,
            sink: Rc::clone(&self.sink),
            auth,
            policy: self.settings.report_policy,
            interval: self.settings.interval,
            active: self.active.subscribe(),
        };
        *self.task.borrow_mut() = Some(tokio::task::spawn_local(frame_loop.run()));
        Ok(())
    }

    async fn prepare<V, E, L>(&self, source: &V, loader: L) -> Result<FramePipeline<E>>
    where
        V: VideoSource,
        E: PoseEstimator + Send + 'static,
        L: FnOnce() -> Result<E> + Send + 'static,
    {
        let (width, height) = source.dimensions();
        let intrinsics = CameraIntrinsics::from_frame_size(width, height)?;

        let estimator = tokio::task::spawn_blocking(loader)
            .await
            .context("model loader panicked")?
            .context("loading pose model")?;

        Ok(FramePipeline::new(
            estimator,
            PnpSolver::new(self.settings.solver),
            AttentionClassifier::new(self.settings.thresholds),
            intrinsics,
        ))
    }
}

impl<R> Drop for AttentionDetector<R> {
    fn drop(&mut self) {
        deactivate(&self.active);
    }
}

fn deactivate(active: &watch::Sender<bool>) {
    if active.send_replace(false) {
        log::info!("stopping attention detection");
    }
}

/// Turns Ctrl+C into a regular stop; exits on its own once detection stops.
async fn interrupt_hook(active: Rc<watch::Sender<bool>>) {
    let mut state = active.subscribe();
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                log::info!("interrupt received");
                deactivate(&active);
            }
            Err(e) => log::warn!("cannot listen for Ctrl+C: {}", e),
        },
        _ = state.wait_for(|active| !*active) => {}
    }
}

/// Sole owner of the per-run resources; dropping it releases them.
struct FrameLoop<V, E, R> {
    source: V,
    pipeline: FramePipeline<E>,
    sink: Rc<R>,
    auth: AuthContext,
    policy: ReportPolicy,
    interval: Duration,
    active: watch::Receiver<bool>,
}

impl<V: VideoSource, E: PoseEstimator, R: ReportSink> FrameLoop<V, E, R> {
    async fn run(mut self) {
        while self.still_active() {
            match self.next_verdict() {
                Ok(verdict) => self.publish(&verdict).await,
                Err(e) => log::warn!("skipping frame: {:#}", e),
            }

            if !self.still_active() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.active.wait_for(|active| !*active) => {}
            }
        }
        log::info!("attention detection stopped, releasing camera and model");
    }

    fn still_active(&self) -> bool {
        *self.active.borrow()
    }

    fn next_verdict(&mut self) -> Result<Verdict> {
        let frame = self.source.frame().context("capturing frame")?;
        self.pipeline.process(&frame)
    }

    async fn publish(&self, verdict: &Verdict) {
        match &verdict.rotation {
            Some(rotation) => {
                let [x, y, z] = rotation.degrees();
                log::debug!(
                    "{:?}: attentive={} rotation=({:.1}, {:.1}, {:.1})",
                    verdict.reason,
                    verdict.attentive,
                    x,
                    y,
                    z
                );
            }
            None => log::debug!("{:?}: attentive={}", verdict.reason, verdict.attentive),
        }

        if !self.policy.should_report(verdict) {
            return;
        }
        let report = AttentionReport {
            class_id: self.auth.class_id.clone(),
            attention: verdict.attentive,
        };
        if let Err(e) = self.sink.report(&self.auth, &report).await {
            log::warn!("dropping attention report: {}", e);
        }
    }
}
