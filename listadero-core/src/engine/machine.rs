use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::listing::{
    AttemptOutcome, AttemptRecord, AttemptTrail, FieldRegistry, InteractionPlan, ListingError,
    ListingKind, ListingRequest, Step, StepAction,
};

use super::driver::{ElementHandle, PageDriver, PagePoint};
use super::error::{EngineError, EngineResult};
use super::human::InputSynthesizer;
use super::locator::DomLocator;
use super::recovery::{classify, RecoveryAction, RecoveryController};
use super::telemetry::{FillTelemetry, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Idle,
    NavigatingToForm,
    FillingField(usize),
    UploadingImages,
    ReviewingDraft,
    Submitting,
    Done,
    Failed,
}

impl FillState {
    pub fn label(&self) -> &'static str {
        match self {
            FillState::Idle => "idle",
            FillState::NavigatingToForm => "navigating_to_form",
            FillState::FillingField(_) => "filling_field",
            FillState::UploadingImages => "uploading_images",
            FillState::ReviewingDraft => "reviewing_draft",
            FillState::Submitting => "submitting",
            FillState::Done => "done",
            FillState::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, FillState::Done | FillState::Failed)
    }
}

/// Structured result of one submission. Always produced, whatever happened
/// on the page; callers inspect `success` and the trail instead of catching
/// panics.
#[derive(Debug)]
pub struct SubmissionReport {
    pub submission_id: String,
    pub success: bool,
    pub final_state: FillState,
    pub states_visited: Vec<FillState>,
    pub trail: Vec<AttemptRecord>,
    pub skipped_fields: Vec<String>,
    pub last_screenshot: Option<PathBuf>,
}

enum StepResolution {
    Completed,
    Exhausted,
    Aborted,
}

struct RunContext {
    trail: AttemptTrail,
    states: Vec<FillState>,
    skipped: Vec<String>,
    last_screenshot: Option<PathBuf>,
}

/// Sequences one listing submission: navigate, fill each field with
/// synthesized human input, verify by readback, upload images, pause at the
/// review boundary and stage the draft. Every failure goes through the
/// recovery controller before the machine continues or gives up.
pub struct FormFillingStateMachine {
    config: EngineConfig,
    locator: DomLocator,
    synthesizer: InputSynthesizer,
    recovery: RecoveryController,
    telemetry: Option<Arc<FillTelemetry>>,
    last_pointer: PagePoint,
}

impl FormFillingStateMachine {
    pub fn new(config: EngineConfig) -> Self {
        let locator = DomLocator::new(&config.locator);
        let synthesizer = InputSynthesizer::new(config.behavior.clone());
        let recovery = RecoveryController::new(config.recovery.clone());
        Self {
            config,
            locator,
            synthesizer,
            recovery,
            telemetry: None,
            last_pointer: PagePoint::new(0.0, 0.0),
        }
    }

    /// Deterministic input synthesis for reproducible runs.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Self {
        let mut machine = Self::new(config);
        machine.synthesizer = InputSynthesizer::seeded(machine.config.behavior.clone(), seed);
        machine
    }

    pub fn with_telemetry(mut self, telemetry: Arc<FillTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Derive the immutable plan for a request, validating it against the
    /// closed registry of its kind.
    pub fn plan(&self, request: &ListingRequest) -> Result<InteractionPlan, ListingError> {
        let registry = FieldRegistry::for_kind(request.kind);
        let form_url = match request.kind {
            ListingKind::Item => self.config.marketplace.item_form_url.clone(),
            ListingKind::Property => self.config.marketplace.property_form_url.clone(),
        };
        InteractionPlan::build(request, &registry, &self.config.limits, form_url)
    }

    pub async fn run(
        &mut self,
        driver: &mut dyn PageDriver,
        plan: &InteractionPlan,
    ) -> SubmissionReport {
        let submission_id = format!("sub-{}", Uuid::new_v4().simple());
        let started = std::time::Instant::now();
        let deadline =
            Instant::now() + Duration::from_secs(self.config.limits.submission_deadline_seconds);
        let mut ctx = RunContext {
            trail: AttemptTrail::new(),
            states: vec![FillState::Idle],
            skipped: Vec::new(),
            last_screenshot: None,
        };
        info!(
            submission = %submission_id,
            kind = %plan.kind,
            steps = plan.steps.len(),
            images = plan.images.len(),
            dropped_images = plan.dropped_images,
            "starting listing submission"
        );

        self.enter(&mut ctx, FillState::NavigatingToForm);
        if !self
            .navigate_with_recovery(driver, plan, deadline, &submission_id, &mut ctx)
            .await
        {
            return self.finalize(ctx, submission_id, plan, FillState::Failed, started);
        }

        for (index, step) in plan.steps.iter().enumerate() {
            self.enter(&mut ctx, Self::state_for(index, step));
            let resolution = self
                .drive_step(driver, plan, index, step, deadline, &submission_id, &mut ctx)
                .await;
            match resolution {
                StepResolution::Completed => {}
                StepResolution::Exhausted => {
                    if step.target.required {
                        warn!(field = %step.target.key, "required field exhausted its budgets");
                        return self.finalize(ctx, submission_id, plan, FillState::Failed, started);
                    }
                    debug!(field = %step.target.key, "optional field skipped");
                    ctx.skipped.push(step.target.key.clone());
                }
                StepResolution::Aborted => {
                    return self.finalize(ctx, submission_id, plan, FillState::Failed, started);
                }
            }
        }

        self.enter(&mut ctx, FillState::Done);
        self.finalize(ctx, submission_id, plan, FillState::Done, started)
    }

    fn state_for(index: usize, step: &Step) -> FillState {
        match step.action {
            StepAction::Type | StepAction::Select => FillState::FillingField(index),
            StepAction::Upload => FillState::UploadingImages,
            StepAction::Wait => FillState::ReviewingDraft,
            StepAction::Click => FillState::Submitting,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_step(
        &mut self,
        driver: &mut dyn PageDriver,
        plan: &InteractionPlan,
        index: usize,
        step: &Step,
        deadline: Instant,
        submission_id: &str,
        ctx: &mut RunContext,
    ) -> StepResolution {
        let mut budget = self.recovery.budget();
        loop {
            match self.apply_step(driver, plan, step, deadline).await {
                Ok(()) => {
                    self.record(
                        ctx,
                        submission_id,
                        AttemptRecord::new(index, &step.target.key, AttemptOutcome::Success),
                    );
                    return StepResolution::Completed;
                }
                Err(err) => {
                    let err = adjust_for_deadline(err, deadline);
                    let class = classify(&err);
                    let screenshot = self.capture_failure(driver).await;
                    warn!(
                        field = %step.target.key,
                        class = ?class,
                        error = %err,
                        "step failed"
                    );
                    self.record(
                        ctx,
                        submission_id,
                        AttemptRecord::new(index, &step.target.key, class.as_outcome())
                            .with_note(err.to_string())
                            .with_screenshot(screenshot),
                    );
                    match self.recovery.decide(&mut budget, class) {
                        RecoveryAction::Backoff(delay) => {
                            if Instant::now() + delay >= deadline {
                                self.record(
                                    ctx,
                                    submission_id,
                                    AttemptRecord::new(
                                        index,
                                        &step.target.key,
                                        AttemptOutcome::Fatal,
                                    )
                                    .with_note("submission deadline exhausted during backoff"),
                                );
                                return StepResolution::Aborted;
                            }
                            sleep(delay).await;
                        }
                        RecoveryAction::Reanchor => {
                            if let Err(reanchor_err) =
                                self.reanchor(driver, plan, &ctx.trail, deadline).await
                            {
                                warn!(error = %reanchor_err, "reanchor escalation failed");
                                if matches!(classify(&reanchor_err), super::recovery::FailureClass::Fatal)
                                {
                                    self.record(
                                        ctx,
                                        submission_id,
                                        AttemptRecord::new(
                                            index,
                                            &step.target.key,
                                            AttemptOutcome::Fatal,
                                        )
                                        .with_note(reanchor_err.to_string()),
                                    );
                                    return StepResolution::Aborted;
                                }
                                return StepResolution::Exhausted;
                            }
                        }
                        RecoveryAction::GiveUpField => return StepResolution::Exhausted,
                        RecoveryAction::Abort => return StepResolution::Aborted,
                    }
                }
            }
        }
    }

    async fn apply_step(
        &mut self,
        driver: &mut dyn PageDriver,
        plan: &InteractionPlan,
        step: &Step,
        deadline: Instant,
    ) -> EngineResult<()> {
        match step.action {
            StepAction::Type | StepAction::Select => {
                self.fill_value(driver, step, deadline).await
            }
            StepAction::Upload => {
                let handle = self.acquire(driver, step, deadline).await?;
                bounded(
                    deadline,
                    "image upload",
                    driver.upload_files(&handle, &plan.images),
                )
                .await
            }
            StepAction::Wait => {
                // The review panel must be present; then hold at the safety
                // boundary long enough for an operator-visible pause.
                self.acquire(driver, step, deadline).await?;
                let pause = self.synthesizer.idle();
                self.pause_input(deadline, pause).await
            }
            StepAction::Click => {
                let handle = self.acquire(driver, step, deadline).await?;
                self.approach_and_click(driver, &handle, deadline).await
            }
        }
    }

    /// Resolve, approach, apply and verify one value-carrying field. Also
    /// used to replay already-successful fields after a reanchor reload.
    async fn fill_value(
        &mut self,
        driver: &mut dyn PageDriver,
        step: &Step,
        deadline: Instant,
    ) -> EngineResult<()> {
        let handle = self.acquire(driver, step, deadline).await?;
        self.approach_and_click(driver, &handle, deadline).await?;
        let value = step.value.clone().unwrap_or_default();
        match step.action {
            StepAction::Select => {
                bounded(
                    deadline,
                    "option select",
                    driver.select_option(&handle, &value),
                )
                .await?;
            }
            _ => {
                bounded(deadline, "field clear", driver.clear_value(&handle)).await?;
                let keys = self.synthesizer.keystrokes(&value);
                for event in keys {
                    self.pause_input(deadline, event.delay).await?;
                    bounded(deadline, "keystroke", driver.press_key(&handle, &event.key)).await?;
                }
            }
        }
        self.verify_readback(driver, step, &handle, deadline).await
    }

    async fn acquire(
        &mut self,
        driver: &mut dyn PageDriver,
        step: &Step,
        deadline: Instant,
    ) -> EngineResult<ElementHandle> {
        bounded(
            deadline,
            "field resolution",
            self.locator.resolve(driver, &step.target),
        )
        .await
    }

    async fn approach_and_click(
        &mut self,
        driver: &mut dyn PageDriver,
        handle: &ElementHandle,
        deadline: Instant,
    ) -> EngineResult<()> {
        let rect = bounded(deadline, "bounding box", driver.bounding_box(handle)).await?;
        let target = rect.center();
        let path = self.synthesizer.pointer_path(self.last_pointer, target);
        for timed in path.points {
            self.pause_input(deadline, timed.delay).await?;
            bounded(deadline, "pointer move", driver.move_pointer(timed.point)).await?;
        }
        self.last_pointer = target;
        let hesitation = self.synthesizer.hesitation();
        self.pause_input(deadline, hesitation).await?;
        bounded(deadline, "click", driver.click(handle)).await
    }

    async fn verify_readback(
        &mut self,
        driver: &mut dyn PageDriver,
        step: &Step,
        handle: &ElementHandle,
        deadline: Instant,
    ) -> EngineResult<()> {
        let intended = step.value.clone().unwrap_or_default();
        let found = bounded(deadline, "readback", driver.read_value(handle)).await?;
        let format = step.target.format;
        if format.normalize(&found) == format.normalize(&intended) {
            Ok(())
        } else {
            Err(EngineError::ValidationMismatch {
                field: step.target.key.clone(),
                expected: format.normalize(&intended),
                found: format.normalize(&found),
            })
        }
    }

    /// Structural escalation: reload from the known-good anchor, re-enter
    /// the form and replay the steps the trail already proved successful,
    /// restoring the machine's position in the plan.
    async fn reanchor(
        &mut self,
        driver: &mut dyn PageDriver,
        plan: &InteractionPlan,
        trail: &AttemptTrail,
        deadline: Instant,
    ) -> EngineResult<()> {
        let anchor = self.config.marketplace.anchor_url.clone();
        info!(anchor = %anchor, "reanchoring after structural failure");
        bounded(deadline, "anchor navigation", driver.navigate(&anchor)).await?;
        self.check_location(driver).await?;
        bounded(deadline, "form navigation", driver.navigate(&plan.form_url)).await?;
        self.check_location(driver).await?;

        let succeeded = trail.succeeded_steps();
        for (index, step) in plan.steps.iter().enumerate() {
            if !succeeded.contains(&index) {
                continue;
            }
            if matches!(step.action, StepAction::Type | StepAction::Select) {
                self.fill_value(driver, step, deadline).await?;
            }
        }
        Ok(())
    }

    async fn navigate_with_recovery(
        &mut self,
        driver: &mut dyn PageDriver,
        plan: &InteractionPlan,
        deadline: Instant,
        submission_id: &str,
        ctx: &mut RunContext,
    ) -> bool {
        let mut budget = self.recovery.budget();
        loop {
            let result = async {
                bounded(deadline, "form navigation", driver.navigate(&plan.form_url)).await?;
                self.check_location(driver).await
            }
            .await;
            match result {
                Ok(()) => return true,
                Err(err) => {
                    let err = adjust_for_deadline(err, deadline);
                    let class = classify(&err);
                    let screenshot = self.capture_failure(driver).await;
                    warn!(class = ?class, error = %err, "form navigation failed");
                    self.record(
                        ctx,
                        submission_id,
                        AttemptRecord::new(0, "form", class.as_outcome())
                            .with_note(err.to_string())
                            .with_screenshot(screenshot),
                    );
                    match self.recovery.decide(&mut budget, class) {
                        RecoveryAction::Backoff(delay) => {
                            if Instant::now() + delay >= deadline {
                                return false;
                            }
                            sleep(delay).await;
                        }
                        // a form that cannot be navigated to has no optional
                        // fallback; everything else ends the plan
                        RecoveryAction::Reanchor
                        | RecoveryAction::GiveUpField
                        | RecoveryAction::Abort => return false,
                    }
                }
            }
        }
    }

    /// Inspect the landed URL for login redirects and rate-limit walls.
    async fn check_location(&self, driver: &mut dyn PageDriver) -> EngineResult<()> {
        let raw = driver.current_url().await?;
        let parsed = url::Url::parse(&raw)
            .map_err(|err| EngineError::Fatal(format!("unparseable page url {raw}: {err}")))?;
        let location = format!(
            "{}{}",
            parsed.host_str().unwrap_or_default(),
            parsed.path()
        )
        .to_lowercase();
        let markers = &self.config.marketplace;
        if markers
            .login_markers
            .iter()
            .any(|marker| location.contains(&marker.to_lowercase()))
        {
            return Err(EngineError::AuthenticationLost);
        }
        if markers
            .rate_limit_markers
            .iter()
            .any(|marker| location.contains(&marker.to_lowercase()))
        {
            return Err(EngineError::RateLimited);
        }
        Ok(())
    }

    async fn capture_failure(&self, driver: &mut dyn PageDriver) -> Option<PathBuf> {
        let bytes = match driver.screenshot().await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(err) => {
                warn!(error = %err, "failed to capture diagnostic screenshot");
                return None;
            }
        };
        let dir = Path::new(&self.config.observability.screenshot_dir);
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(error = %err, "failed to create screenshot directory");
            return None;
        }
        let path = dir.join(format!("fail-{}.png", Uuid::new_v4().simple()));
        match std::fs::write(&path, &bytes) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(error = %err, "failed to write diagnostic screenshot");
                None
            }
        }
    }

    async fn pause_input(&self, deadline: Instant, delay: Duration) -> EngineResult<()> {
        if Instant::now() + delay >= deadline {
            return Err(EngineError::Fatal(
                "submission deadline exhausted during input pacing".to_string(),
            ));
        }
        sleep(delay).await;
        Ok(())
    }

    fn enter(&self, ctx: &mut RunContext, state: FillState) {
        debug!(state = state.label(), "state transition");
        ctx.states.push(state);
    }

    fn record(&self, ctx: &mut RunContext, submission_id: &str, record: AttemptRecord) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record_attempt(submission_id, &record) {
                warn!(error = %err, "failed to persist attempt record");
            }
        }
        if record.screenshot.is_some() {
            ctx.last_screenshot = record.screenshot.clone();
        }
        ctx.trail.record(record);
    }

    fn finalize(
        &self,
        ctx: RunContext,
        submission_id: String,
        plan: &InteractionPlan,
        final_state: FillState,
        started: std::time::Instant,
    ) -> SubmissionReport {
        let mut ctx = ctx;
        if final_state == FillState::Failed && ctx.states.last() != Some(&FillState::Failed) {
            ctx.states.push(FillState::Failed);
        }
        let success = final_state == FillState::Done;
        if let Some(telemetry) = &self.telemetry {
            let run = RunSummary {
                timestamp: Utc::now(),
                submission_id: submission_id.clone(),
                kind: plan.kind,
                success,
                duration_ms: started.elapsed().as_millis() as i64,
                steps_total: plan.steps.len(),
                fields_skipped: ctx.skipped.len(),
                last_screenshot: ctx.last_screenshot.clone(),
            };
            if let Err(err) = telemetry.record_run(&run) {
                warn!(error = %err, "failed to persist run summary");
            }
        }
        info!(
            submission = %submission_id,
            success,
            state = final_state.label(),
            attempts = ctx.trail.len(),
            skipped = ctx.skipped.len(),
            "submission finished"
        );
        SubmissionReport {
            submission_id,
            success,
            final_state,
            states_visited: ctx.states,
            trail: ctx.trail.into_entries(),
            skipped_fields: ctx.skipped,
            last_screenshot: ctx.last_screenshot,
        }
    }
}

async fn bounded<T>(
    deadline: Instant,
    what: &str,
    fut: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(format!(
            "submission deadline during {what}"
        ))),
    }
}

fn adjust_for_deadline(err: EngineError, deadline: Instant) -> EngineError {
    if Instant::now() >= deadline {
        EngineError::Fatal(format!("submission deadline exhausted: {err}"))
    } else {
        err
    }
}
