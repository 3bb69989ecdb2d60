use std::{path::PathBuf, time::Duration};

use glam::*;

use crate::{
    AggregateConfig, Band, BandConfig, BandSpace, BinaryMask, CalibrationConfig,
    CalibrationOutcome, CameraTrait, DecisionKernel, DepthCalibrator, DepthImage,
    DepthRangeBuffer, EditableSplatSource, Error, GateConfig, GateFlags, GateInputs, ImageScale,
    MaskImage, ProbeClip, ProbeConfig, SelectionBitset, SetOp, SharedSelection, SplatSource,
    collect_band_samples, collect_depth_samples, compute_band, derive_clip,
    inference::{InferenceBackend, InferenceOutput, InferencePrompt},
    prune_selection, prune_selection_world,
};

/// The stage of the current selection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No run in flight.
    #[default]
    Idle,

    /// Waiting for the mask and depth of a run.
    AwaitingInference { run: u64 },

    /// Aggregating, calibrating and deciding.
    CalibratingAndGating { run: u64 },

    /// Merging the decision into the selection.
    Applying { run: u64 },

    /// Pruning the selection with the probe clip.
    ProbeClipping { run: u64 },
}

impl SessionState {
    /// Get the run id of the stage, [`None`] when idle.
    pub fn run(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::AwaitingInference { run }
            | Self::CalibratingAndGating { run }
            | Self::Applying { run }
            | Self::ProbeClipping { run } => Some(*run),
        }
    }
}

/// The configuration of a selection session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// The decision kernel configuration.
    pub gate: GateConfig,
    /// The depth calibration configuration.
    pub calibration: CalibrationConfig,
    /// The band statistics configuration.
    pub band: BandConfig,
    /// The depth aggregation configuration.
    pub aggregate: AggregateConfig,
    /// The probe clip half thickness in world units.
    pub probe_tolerance_meters: f32,
    /// How long to wait for the inference output.
    pub inference_timeout: Duration,
    /// Whether a new run supersedes a pending one instead of being refused.
    pub supersede: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            calibration: CalibrationConfig::default(),
            band: BandConfig::default(),
            aggregate: AggregateConfig::default(),
            probe_tolerance_meters: 0.05,
            inference_timeout: Duration::from_secs(30),
            supersede: true,
        }
    }
}

impl SessionConfig {
    /// Set the gate configuration.
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Set the calibration configuration.
    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    /// Set the band configuration.
    pub fn with_band(mut self, band: BandConfig) -> Self {
        self.band = band;
        self
    }

    /// Set the aggregation configuration.
    pub fn with_aggregate(mut self, aggregate: AggregateConfig) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Set the inference timeout.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    /// Set whether a new run supersedes a pending one.
    pub fn with_supersede(mut self, supersede: bool) -> Self {
        self.supersede = supersede;
        self
    }
}

/// A user triggered selection request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionRequest {
    /// The image the mask is inferred from.
    pub image: PathBuf,
    /// The prompt points, normalized with the origin at the top left.
    pub prompt_points: Vec<Vec2>,
    /// The band focus points in screen pixels.
    pub focus_points: Vec<Vec2>,
    /// How the decision is merged into the selection.
    pub op: SetOp,
    /// Whether a depth estimate is requested.
    pub want_depth: bool,
    /// The probe focus in screen pixels.
    pub probe: Option<Vec2>,
}

impl SelectionRequest {
    /// Create a new request.
    pub fn new(image: impl Into<PathBuf>, prompt_points: Vec<Vec2>) -> Self {
        Self {
            image: image.into(),
            prompt_points,
            ..Default::default()
        }
    }

    /// Set the focus points.
    pub fn with_focus_points(mut self, focus_points: Vec<Vec2>) -> Self {
        self.focus_points = focus_points;
        self
    }

    /// Set the set operation.
    pub fn with_op(mut self, op: SetOp) -> Self {
        self.op = op;
        self
    }

    /// Set whether a depth estimate is requested.
    pub fn with_depth(mut self, want_depth: bool) -> Self {
        self.want_depth = want_depth;
        self
    }

    /// Set the probe focus.
    pub fn with_probe(mut self, focus: Vec2) -> Self {
        self.probe = Some(focus);
        self
    }

    /// Get the inference prompt.
    pub fn prompt(&self) -> InferencePrompt {
        InferencePrompt::new(&self.image, self.prompt_points.clone()).with_depth(self.want_depth)
    }
}

/// A handle to a started run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket(u64);

impl RunTicket {
    /// Get the run id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// The run id.
    pub run: u64,
    /// The selection count before the run.
    pub selected_before: usize,
    /// The selection count after the run.
    pub selected_after: usize,
    /// The number of splats the decision accepted.
    pub decided: usize,
    /// The calibration step of the run.
    pub calibration: CalibrationOutcome,
    /// The band used by the band gate.
    pub band: Option<Band>,
    /// The clip applied by the probe clip gate.
    pub gated_clip: Option<ProbeClip>,
    /// The clip derived by the probe of this run.
    pub probe_clip: Option<ProbeClip>,
    /// The number of splats deselected by the probe.
    pub pruned: usize,
    /// The enabled gates that had no data and passed everything.
    pub degraded: GateFlags,
}

/// A selection session over one splat set.
///
/// Holds the selection and the state persisted across runs.
#[derive(Debug)]
pub struct SelectionSession {
    config: SessionConfig,
    calibrator: DepthCalibrator,
    selection: SharedSelection,
    state: SessionState,
    next_run: u64,
    pending_clip: Option<ProbeClip>,
    last_depth: Option<DepthImage>,
}

impl SelectionSession {
    /// Create a new session with an empty selection of `splat_count` splats.
    pub fn new(config: SessionConfig, splat_count: usize) -> Self {
        log::debug!("Creating selection session for {splat_count} splats");

        Self {
            calibrator: DepthCalibrator::new(config.calibration.clone()),
            config,
            selection: SharedSelection::new(SelectionBitset::new(splat_count)),
            state: SessionState::Idle,
            next_run: 1,
            pending_clip: None,
            last_depth: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the configuration mutably.
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Get the calibrator.
    pub fn calibrator(&self) -> &DepthCalibrator {
        &self.calibrator
    }

    /// Get the calibrator mutably.
    pub fn calibrator_mut(&mut self) -> &mut DepthCalibrator {
        &mut self.calibrator
    }

    /// Get the shared selection.
    pub fn selection(&self) -> &SharedSelection {
        &self.selection
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the clip waiting for the next run.
    pub fn pending_clip(&self) -> Option<&ProbeClip> {
        self.pending_clip.as_ref()
    }

    /// Start a run.
    ///
    /// A pending run is superseded, or refused with [`Error::RunInFlight`] if superseding is
    /// disabled.
    pub fn begin_run(&mut self) -> Result<RunTicket, Error> {
        if let Some(pending) = self.state.run() {
            if !self.config.supersede {
                return Err(Error::RunInFlight(pending));
            }
            log::debug!("Superseding selection run {pending}");
        }

        let run = self.next_run;
        self.next_run += 1;
        self.state = SessionState::AwaitingInference { run };

        log::debug!("Beginning selection run {run}");

        Ok(RunTicket(run))
    }

    /// Complete a run with its inference result.
    ///
    /// A failed inference or a mask without any pixel above the threshold aborts the run without
    /// touching the selection. A stale ticket is discarded with [`Error::RunSuperseded`].
    pub fn complete_run(
        &mut self,
        ticket: RunTicket,
        output: Result<InferenceOutput, Error>,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
        request: &SelectionRequest,
    ) -> Result<RunReport, Error> {
        if self.state != (SessionState::AwaitingInference { run: ticket.id() }) {
            log::debug!("Discarding stale selection run {}", ticket.id());
            return Err(Error::RunSuperseded(ticket.id()));
        }

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Selection run {} aborted: {e}", ticket.id());
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        self.execute(ticket.id(), output, source, camera, request)
    }

    /// Run a whole selection against an inference backend.
    ///
    /// Blocks on the inference for at most the configured timeout.
    pub fn run(
        &mut self,
        backend: &impl InferenceBackend,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
        request: &SelectionRequest,
    ) -> Result<RunReport, Error> {
        let ticket = self.begin_run()?;
        let output = backend
            .submit(&request.prompt())
            .and_then(|pending| pending.wait(self.config.inference_timeout));
        self.complete_run(ticket, output, source, camera, request)
    }

    /// Run a selection with images that are already available.
    pub fn apply_images(
        &mut self,
        mask: MaskImage,
        depth: Option<DepthImage>,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
        request: &SelectionRequest,
    ) -> Result<RunReport, Error> {
        let ticket = self.begin_run()?;
        self.complete_run(ticket, Ok(InferenceOutput { mask, depth }), source, camera, request)
    }

    /// Probe the depth of the last run at a focus point and prune the selection.
    ///
    /// The clip is also kept for the probe clip gate of the next run.
    pub fn probe(
        &mut self,
        focus: Vec2,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
    ) -> Option<(ProbeClip, usize)> {
        let depth = self.last_depth.as_ref()?;
        let config = ProbeConfig::new(focus).with_tolerance_meters(self.config.probe_tolerance_meters);
        let clip = derive_clip(
            depth,
            self.calibrator.current(),
            camera,
            source.viewport_size(),
            &config,
        )?;

        let pruned = self.prune(&clip, source, camera);
        self.pending_clip = Some(clip);

        Some((clip, pruned))
    }

    /// Prune the selection with a clip, returns the number deselected.
    pub fn prune(
        &self,
        clip: &ProbeClip,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
    ) -> usize {
        let pruned = self.selection.update(|selection| match source.positions() {
            Some(positions) => prune_selection_world(
                selection,
                positions,
                camera,
                source.viewport_size(),
                clip,
            ),
            None => prune_selection(selection, source.projected_splats(), clip),
        });

        log::debug!("Probe clip deselected {pruned} splats");

        pruned
    }

    /// Remove the selected splats from the source and clear the selection.
    ///
    /// Returns the number of splats removed.
    pub fn delete_selected(&mut self, source: &mut impl EditableSplatSource) -> usize {
        let selection = self.selection.snapshot();
        let removed = source.remove_selected(&selection);
        let count = source.splat_count();
        self.selection.update(|selection| *selection = SelectionBitset::new(count));

        log::info!("Deleted {removed} selected splats, {count} left");

        removed
    }

    /// Deselect every splat.
    pub fn clear_all(&self) {
        self.selection.update(SelectionBitset::clear_all);
    }

    /// Select every one of the current `splat_count` splats.
    pub fn select_all(&self, splat_count: usize) {
        self.selection.update(|selection| {
            selection.resize(splat_count);
            selection.select_all();
        });
    }

    /// Invert the selection over the current `splat_count` splats.
    pub fn invert(&self, splat_count: usize) {
        self.selection.update(|selection| {
            selection.resize(splat_count);
            selection.invert();
        });
    }

    /// Count the selected splats.
    pub fn count_selected(&self) -> usize {
        self.selection.count_selected()
    }

    fn execute(
        &mut self,
        run: u64,
        output: InferenceOutput,
        source: &impl SplatSource,
        camera: &impl CameraTrait,
        request: &SelectionRequest,
    ) -> Result<RunReport, Error> {
        self.state = SessionState::CalibratingAndGating { run };

        let gate = self.config.gate;
        let mask = BinaryMask::from_threshold(&output.mask, gate.mask_threshold)
            .morph(gate.selection_size);
        if mask.is_empty() {
            log::warn!("Selection run {run} aborted: mask has no pixel above the threshold");
            self.state = SessionState::Idle;
            return Err(Error::EmptyMask(run));
        }

        let gated_clip = self.pending_clip.take();
        let splats = source.projected_splats();
        let viewport = source.viewport_size();
        let depth = output.depth.as_ref().map(DepthImage::normalized);

        let range = DepthRangeBuffer::aggregate(&mask, splats, viewport, &self.config.aggregate);
        let range = (!range.is_empty()).then_some(range);

        let samples = match (&range, &depth) {
            (Some(range), Some(depth)) => collect_depth_samples(range, depth),
            _ => Vec::new(),
        };
        let calibration = self.calibrator.calibrate(&samples);

        let band = match (gate.flags.contains(GateFlags::BAND), &range) {
            (true, Some(range)) => {
                let focus_scale = ImageScale::new(viewport, mask.size());
                let focus = request
                    .focus_points
                    .iter()
                    .map(|&p| focus_scale.to_image(p))
                    .collect::<Vec<_>>();
                let space = self.config.band.space;
                let samples = collect_band_samples(
                    range,
                    depth.as_ref(),
                    space,
                    &focus,
                    self.config.band.focus_radius,
                );
                match (space, &depth) {
                    (BandSpace::External, None) => None,
                    _ => Some(compute_band(samples, &self.config.band)),
                }
            }
            _ => None,
        };

        let fitted = self.calibrator.current();
        let inputs = GateInputs {
            range: range.as_ref(),
            depth: depth.as_ref(),
            calibration: fitted.is_fitted().then_some(fitted),
            band: band.map(|band| (band, self.config.band.space)),
            clip: gated_clip,
        };

        let degraded = [
            (GateFlags::FRONT, inputs.calibration.is_some() && inputs.depth.is_some()),
            (GateFlags::BAND, inputs.band.is_some()),
            (GateFlags::OCCLUSION, inputs.range.is_some()),
            (GateFlags::PROBE_CLIP, inputs.clip.is_some()),
        ]
        .into_iter()
        .filter(|(flag, available)| gate.flags.contains(*flag) && !available)
        .fold(GateFlags::empty(), |degraded, (flag, _)| degraded | flag);

        if !degraded.is_empty() {
            log::warn!("Selection run {run} has no data for gates {degraded:?}");
        }

        let decision = DecisionKernel::new(gate, &mask, inputs, viewport).decide_all(splats);
        let decided = decision.count_selected();

        self.state = SessionState::Applying { run };

        let selected_before = self.selection.count_selected();
        self.selection
            .update(|selection| selection.apply(&decision, request.op));

        let probe_clip = request.probe.and_then(|focus| {
            self.state = SessionState::ProbeClipping { run };
            let config =
                ProbeConfig::new(focus).with_tolerance_meters(self.config.probe_tolerance_meters);
            depth.as_ref().and_then(|depth| {
                derive_clip(depth, self.calibrator.current(), camera, viewport, &config)
            })
        });

        let pruned = probe_clip.map_or(0, |clip| self.prune(&clip, source, camera));
        self.pending_clip = probe_clip;
        self.last_depth = depth;

        let selected_after = self.selection.count_selected();
        self.state = SessionState::Idle;

        log::info!(
            "Selection run {run} decided {decided} splats, selection {selected_before} -> \
            {selected_after}"
        );

        Ok(RunReport {
            run,
            selected_before,
            selected_after,
            decided,
            calibration,
            band,
            gated_clip,
            probe_clip,
            pruned,
            degraded,
        })
    }
}
