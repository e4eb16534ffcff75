//! Coordinator: the tick loop over all agent state machines
//!
//! The Coordinator owns every agent machine, the checkpoint store and the
//! metrics aggregator. Callers talk to a running loop via `CoordinatorHandle`
//! (clone-friendly). Each iteration of `run()`:
//!   - steps every initialized agent concurrently under a deadline
//!   - logs outcomes in agent order, checkpoints when due
//!   - runs the health check and recovers on `Degraded`
//!   - waits out the tick interval with `tokio::select!`, serving control
//!     commands and watching for shutdown

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::agents::{AgentStateMachine, InitRequirement};
use crate::config::{AgentParams, AppConfig};
use crate::coordination::{Clock, GracefulShutdown, ShutdownPhase, ShutdownSignal, SystemClock};
use crate::domain::MetricsSnapshot;
use crate::error::{ErrorKind, PhaseGateError, Result};
use crate::persistence::{CheckpointManager, CheckpointReason, Checkpointable, SavedCheckpoint};
use crate::services::{ExportFormat, MetricsAggregator, MetricsExporter, Observer, ObserverEvent};
use crate::supervisor::{
    FailureDetector, HealthProbe, RecoveryHandler, RecoveryStatus, RecoverySystem,
    StabilizeOutcome,
};
use crate::validation::StabilityValidator;

use super::command::CoordinatorControlCommand;
use super::config::CoordinatorConfig;
use super::state::{AgentSnapshot, AgentStatus, CoordinatorState, SystemState};

/// Clonable handle for on-demand operations against a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    control_tx: mpsc::Sender<CoordinatorControlCommand>,
    system_state: Arc<RwLock<SystemState>>,
    shutdown: Arc<GracefulShutdown>,
}

impl CoordinatorHandle {
    /// Write a checkpoint now; served between ticks
    pub async fn checkpoint_now(&self) -> Result<SavedCheckpoint> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(CoordinatorControlCommand::CheckpointNow(reply))
            .await
            .map_err(|_| PhaseGateError::Cancelled)?;
        rx.await.map_err(|_| PhaseGateError::Cancelled)?
    }

    /// Export all logged training events; served between ticks
    pub async fn export(&self, format: ExportFormat) -> Result<Vec<PathBuf>> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(CoordinatorControlCommand::Export { format, reply })
            .await
            .map_err(|_| PhaseGateError::Cancelled)?;
        rx.await.map_err(|_| PhaseGateError::Cancelled)?
    }

    /// Ask the loop to stop after the in-flight tick
    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown(ShutdownSignal::Requested);
    }

    /// Read the current system state (non-blocking snapshot)
    pub async fn state(&self) -> SystemState {
        self.system_state.read().await.clone()
    }
}

/// What a finished `run()` reports back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks: u64,
    pub checkpoints_saved: u64,
    /// Files written by the shutdown export, if any
    pub exported: Vec<PathBuf>,
    pub final_state: SystemState,
}

struct AgentSlot {
    machine: AgentStateMachine,
    status: AgentStatus,
    baseline: Option<MetricsSnapshot>,
    /// Passed initialization; only these are stepped
    initialized: bool,
}

impl AgentSlot {
    fn new(machine: AgentStateMachine) -> Self {
        Self {
            machine,
            status: AgentStatus::Initializing,
            baseline: None,
            initialized: false,
        }
    }

    fn snapshot(&self) -> AgentSnapshot {
        let training = self.machine.get_training_status();
        AgentSnapshot {
            name: self.machine.name().to_string(),
            kind: self.machine.kind(),
            status: self.status.clone(),
            focus: training.focus,
            state: self.machine.state().clone(),
            metrics: self.machine.last_metrics().cloned(),
            baseline_coherence: self.baseline.as_ref().and_then(|b| b.coherence()),
        }
    }
}

impl Checkpointable for SystemState {
    fn component_name(&self) -> &str {
        "system"
    }

    fn to_checkpoint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Owns the agents and runs the main tick loop
pub struct Coordinator {
    config: CoordinatorConfig,
    params: Arc<AgentParams>,
    validator: Arc<StabilityValidator>,
    agents: Vec<AgentSlot>,
    checkpoints: Arc<Mutex<CheckpointManager>>,
    aggregator: Arc<Mutex<MetricsAggregator>>,
    detector: FailureDetector,
    recovery: Arc<RecoverySystem>,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<GracefulShutdown>,
    state: CoordinatorState,
    system_state: Arc<RwLock<SystemState>>,
    export_format: ExportFormat,
    export_on_shutdown: bool,
    tick_count: u64,
    persistence_failures: u32,

    // Channels
    control_tx: mpsc::Sender<CoordinatorControlCommand>,
    control_rx: mpsc::Receiver<CoordinatorControlCommand>,
}

impl Coordinator {
    pub fn new(config: &AppConfig, observer: Arc<dyn Observer>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(32);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let exporter = MetricsExporter::from_config(&config.export);
        let aggregator = MetricsAggregator::new(exporter, Arc::clone(&observer));

        Self {
            config: config.coordinator.clone(),
            params: Arc::new(config.agent_params.clone()),
            validator: Arc::new(StabilityValidator::new(config.criteria.clone())),
            agents: Vec::new(),
            checkpoints: Arc::new(Mutex::new(CheckpointManager::new(config.checkpoint.clone()))),
            aggregator: Arc::new(Mutex::new(aggregator)),
            detector: FailureDetector::with_defaults(),
            recovery: Arc::new(RecoverySystem::with_defaults()),
            observer,
            system_state: Arc::new(RwLock::new(SystemState::new(clock.now()))),
            clock,
            shutdown: Arc::new(GracefulShutdown::new()),
            state: CoordinatorState::Idle,
            export_format: config.export.format,
            export_on_shutdown: config.export.on_shutdown,
            tick_count: 0,
            persistence_failures: 0,
            control_tx,
            control_rx,
        }
    }

    /// Replace the time source (tests use `ManualClock`)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.detector = FailureDetector::new(probe);
        self
    }

    pub fn with_recovery_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = Arc::new(RecoverySystem::new(handler));
        self
    }

    /// Format of the export written on shutdown
    pub fn with_export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = format;
        self
    }

    /// Create a clonable handle for on-demand operations
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            control_tx: self.control_tx.clone(),
            system_state: self.system_state.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Shutdown controller, for wiring OS signal handlers
    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        self.shutdown.clone()
    }

    /// Parameters handed to every producer
    pub fn params(&self) -> Arc<AgentParams> {
        self.params.clone()
    }

    /// Validator built from the configured criteria table
    pub fn validator(&self) -> Arc<StabilityValidator> {
        self.validator.clone()
    }

    pub fn aggregator(&self) -> Arc<Mutex<MetricsAggregator>> {
        self.aggregator.clone()
    }

    pub fn checkpoints(&self) -> Arc<Mutex<CheckpointManager>> {
        self.checkpoints.clone()
    }

    pub fn recovery(&self) -> Arc<RecoverySystem> {
        self.recovery.clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn agent_status(&self, name: &str) -> Option<&AgentStatus> {
        self.agents
            .iter()
            .find(|slot| slot.machine.name() == name)
            .map(|slot| &slot.status)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentStateMachine> {
        self.agents
            .iter()
            .find(|slot| slot.machine.name() == name)
            .map(|slot| &slot.machine)
    }

    /// Register an agent; initialization order is registration order
    pub fn register_agent(&mut self, machine: AgentStateMachine) -> Result<()> {
        if self.state != CoordinatorState::Idle {
            return Err(PhaseGateError::Configuration(format!(
                "cannot register agent {} while coordinator is {}",
                machine.name(),
                self.state
            )));
        }
        if self.agents.iter().any(|slot| slot.machine.name() == machine.name()) {
            return Err(PhaseGateError::Configuration(format!(
                "agent {} registered twice",
                machine.name()
            )));
        }

        info!(agent = %machine.name(), kind = %machine.kind(), "Agent registered");
        self.agents.push(AgentSlot::new(machine));
        Ok(())
    }

    /// Register the built-in agents named in `coordinator.agents`
    pub fn register_configured_agents(&mut self) -> Result<()> {
        for kind in self.config.agent_kinds()? {
            let machine =
                AgentStateMachine::for_kind(kind, self.params.clone(), self.validator.clone());
            self.register_agent(machine)?;
        }
        Ok(())
    }

    /// Initialize agents one at a time, in registration order.
    ///
    /// An agent whose prerequisite is unmet or whose baseline fails is marked
    /// errored and excluded from ticking; the others continue.
    pub async fn initialize(&mut self) -> Result<()> {
        self.transition_to(CoordinatorState::Initializing).await?;

        if self.agents.is_empty() {
            self.transition_to(CoordinatorState::Stopped).await?;
            return Err(PhaseGateError::Configuration(
                "no agents registered".to_string(),
            ));
        }

        let mut baselines: HashMap<String, f64> = HashMap::new();
        for index in 0..self.agents.len() {
            let name = self.agents[index].machine.name().to_string();
            match self.initialize_agent(index, &baselines).await {
                Ok(coherence) => {
                    if let Some(coherence) = coherence {
                        baselines.insert(name.clone(), coherence);
                    }

                    let now = self.clock.now();
                    let state = json!({
                        "agent": name,
                        "status": "initialized",
                        "baseline": self.agents[index].baseline,
                    });
                    let saved = self
                        .checkpoints
                        .lock()
                        .await
                        .save(CheckpointReason::Initialization, &name, state, now)
                        .await;
                    match saved {
                        Ok(saved) => {
                            self.persistence_succeeded();
                            self.observer.notify(&ObserverEvent::Checkpoint {
                                reason: CheckpointReason::Initialization,
                                path: saved.path,
                                at: saved.created_at,
                            });
                        }
                        Err(e) => self.persistence_failed("initialization checkpoint", e)?,
                    }
                    info!(agent = %name, "Agent initialized");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    error!(agent = %name, error = %message, "Agent initialization failed");
                    self.observer.notify(&ObserverEvent::AgentError {
                        agent: name,
                        error: message.clone(),
                    });
                    self.agents[index].status = AgentStatus::Error { message };
                }
            }
        }

        let now = self.clock.now();
        self.publish_state(now).await;

        let active = self.agents.iter().filter(|slot| slot.initialized).count();
        if active == 0 {
            self.transition_to(CoordinatorState::Stopped).await?;
            return Err(PhaseGateError::Unrecoverable(
                "no agent completed initialization".to_string(),
            ));
        }

        info!(
            active,
            failed = self.agents.len() - active,
            "Agent initialization complete"
        );
        self.transition_to(CoordinatorState::Running).await
    }

    /// Check the prerequisite, then take the baseline sample.
    /// Returns the baseline coherence, if the producer reports one.
    async fn initialize_agent(
        &mut self,
        index: usize,
        baselines: &HashMap<String, f64>,
    ) -> Result<Option<f64>> {
        let step_timeout = self.config.step_timeout();
        let timeout_ms = self.config.step_timeout_ms;
        let slot = &mut self.agents[index];
        let name = slot.machine.name().to_string();
        slot.status = AgentStatus::Initializing;

        if let InitRequirement::MinBaselineCoherence { agent, min } = &slot.machine.profile().init
        {
            match baselines.get(agent) {
                Some(coherence) if *coherence >= *min => {}
                Some(coherence) => {
                    return Err(PhaseGateError::Initialization {
                        agent: name,
                        reason: format!(
                            "{agent} baseline coherence {coherence:.3} below required {min}"
                        ),
                    });
                }
                None => {
                    return Err(PhaseGateError::Initialization {
                        agent: name,
                        reason: format!("required agent {agent} has no baseline coherence"),
                    });
                }
            }
        }

        let sampled = tokio::time::timeout(step_timeout, slot.machine.baseline()).await;
        let baseline = match sampled {
            Ok(Ok(baseline)) => baseline,
            Ok(Err(e)) => {
                return Err(PhaseGateError::Initialization {
                    agent: name,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PhaseGateError::Initialization {
                    agent: name,
                    reason: format!("baseline exceeded deadline of {timeout_ms}ms"),
                })
            }
        };

        debug!(agent = %name, baseline = %baseline, "Baseline sampled");
        let coherence = baseline.coherence();
        slot.baseline = Some(baseline);
        slot.status = AgentStatus::Active;
        slot.initialized = true;
        Ok(coherence)
    }

    /// One iteration of the main loop, without the wait
    pub async fn tick(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(PhaseGateError::InvalidStateTransition {
                from: self.state.to_string(),
                to: CoordinatorState::Running.to_string(),
            });
        }

        self.tick_count += 1;
        let step_timeout = self.config.step_timeout();
        let timeout_ms = self.config.step_timeout_ms;

        let steps = self
            .agents
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.initialized)
            .map(|(index, slot)| async move {
                let stepped = tokio::time::timeout(step_timeout, slot.machine.step()).await;
                let result = match stepped {
                    Ok(result) => result,
                    Err(_) => Err(PhaseGateError::StepTimeout {
                        agent: slot.machine.name().to_string(),
                        timeout_ms,
                    }),
                };
                (index, result)
            });
        let results = join_all(steps).await;

        let now = self.clock.now();
        for (index, result) in results {
            match result {
                Ok(outcome) => {
                    self.detector.report_step_success(&outcome.agent);
                    self.aggregator
                        .lock()
                        .await
                        .log_tick(&outcome, &self.params, now)?;

                    let slot = &mut self.agents[index];
                    slot.status = AgentStatus::training(&slot.machine.get_training_status());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let slot = &mut self.agents[index];
                    let message = e.to_string();
                    self.detector
                        .report_step_failure(slot.machine.name(), &message, now);
                    self.observer.notify(&ObserverEvent::AgentError {
                        agent: slot.machine.name().to_string(),
                        error: message.clone(),
                    });
                    slot.status = AgentStatus::Error { message };
                }
            }
        }

        let due = self.checkpoints.lock().await.is_due(now);
        if due {
            self.publish_state(now).await;
            match self.write_checkpoint(CheckpointReason::Periodic, now).await {
                Ok(_) => self.persistence_succeeded(),
                Err(e) => self.persistence_failed("periodic checkpoint", e)?,
            }
        }

        let health = self.detector.check_system_health();
        if health.is_healthy() {
            if self.state == CoordinatorState::Degraded {
                self.transition_to(CoordinatorState::Running).await?;
            }
        } else {
            if self.state == CoordinatorState::Running {
                self.transition_to(CoordinatorState::Degraded).await?;
            }
            self.stabilize("health check degraded").await?;
        }

        self.publish_state(now).await;

        let every = self.config.status_log_every_ticks;
        if every > 0 && self.tick_count % every == 0 {
            let summary = self.system_state.read().await.summary();
            info!(tick = self.tick_count, "\n{}", summary);
        }

        Ok(())
    }

    /// Run until shutdown is requested, `max_ticks` is reached, or a fatal
    /// error occurs. The final checkpoint and export run in every case.
    pub async fn run(mut self, max_ticks: Option<u64>) -> Result<RunSummary> {
        if self.state == CoordinatorState::Idle {
            if let Err(e) = self.initialize().await {
                error!(error = %e, "Coordinator initialization failed");
                let _ = self.transition_to(CoordinatorState::Stopped).await;
                return Err(e);
            }
        }
        if !self.state.is_active() {
            return Err(PhaseGateError::InvalidStateTransition {
                from: self.state.to_string(),
                to: CoordinatorState::Running.to_string(),
            });
        }

        info!(
            agents = self.agents.len(),
            tick_interval_ms = self.config.tick_interval_ms,
            max_ticks = ?max_ticks,
            "Coordinator starting main loop"
        );

        let outcome = self.run_loop(max_ticks).await;
        if let Err(e) = &outcome {
            error!(error = %e, tick = self.tick_count, "Coordinator loop failed");
        }

        let summary = self.stop().await;
        outcome.map(|()| summary)
    }

    async fn run_loop(&mut self, max_ticks: Option<u64>) -> Result<()> {
        let interval = chrono::Duration::milliseconds(self.config.tick_interval_ms as i64);

        loop {
            if self.shutdown.is_shutdown_requested() {
                info!(tick = self.tick_count, "Shutdown requested, leaving main loop");
                return Ok(());
            }
            if let Some(limit) = max_ticks {
                if self.tick_count >= limit {
                    self.shutdown.request_shutdown(ShutdownSignal::TickLimit);
                    return Ok(());
                }
            }

            let started = self.clock.now();
            self.tick().await?;
            self.wait_until(started + interval).await?;
        }
    }

    /// Sleep until `deadline`, serving control commands in the meantime
    async fn wait_until(&mut self, deadline: DateTime<Utc>) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let clock = self.clock.clone();

        loop {
            if self.shutdown.is_shutdown_requested() {
                return Ok(());
            }
            let remaining = match (deadline - clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return Ok(()),
            };

            tokio::select! {
                _ = clock.sleep(remaining) => return Ok(()),

                Some(command) = self.control_rx.recv() => {
                    self.handle_control(command).await?;
                }

                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    async fn handle_control(&mut self, command: CoordinatorControlCommand) -> Result<()> {
        let now = self.clock.now();
        match command {
            CoordinatorControlCommand::CheckpointNow(reply) => {
                self.publish_state(now).await;
                match self.write_checkpoint(CheckpointReason::OnDemand, now).await {
                    Ok(saved) => {
                        self.persistence_succeeded();
                        let _ = reply.send(Ok(saved));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(PhaseGateError::persistence(&e)));
                        self.persistence_failed("on-demand checkpoint", e)?;
                    }
                }
            }
            CoordinatorControlCommand::Export { format, reply } => {
                let exported = self.aggregator.lock().await.export(format, now).await;
                match exported {
                    Ok(files) => {
                        self.persistence_succeeded();
                        let _ = reply.send(Ok(files));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(PhaseGateError::persistence(&e)));
                        self.persistence_failed("export", e)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Final checkpoint, optional export, then `Stopped`
    async fn stop(&mut self) -> RunSummary {
        // Serve commands queued before the loop exited
        while let Ok(command) = self.control_rx.try_recv() {
            if let Err(e) = self.handle_control(command).await {
                warn!(error = %e, "Control command failed during shutdown");
            }
        }

        let now = self.clock.now();

        self.shutdown.set_phase(ShutdownPhase::Checkpointing);
        self.publish_state(now).await;
        if let Err(e) = self.write_checkpoint(CheckpointReason::Shutdown, now).await {
            warn!(error = %e, "Final checkpoint failed");
        }

        let mut exported = Vec::new();
        if self.export_on_shutdown {
            self.shutdown.set_phase(ShutdownPhase::Exporting);
            let exported_now = self
                .aggregator
                .lock()
                .await
                .export(self.export_format, now)
                .await;
            match exported_now {
                Ok(files) => exported = files,
                Err(e) => warn!(error = %e, format = %self.export_format, "Final export failed"),
            }
        }

        if let Err(e) = self.transition_to(CoordinatorState::Stopped).await {
            warn!(error = %e, "Could not mark coordinator stopped");
        }
        self.shutdown.set_phase(ShutdownPhase::Complete);

        let checkpoints_saved = self.checkpoints.lock().await.saved_count();
        let activity = self.aggregator.lock().await.summary();
        info!(
            ticks = self.tick_count,
            checkpoints_saved,
            activity = %activity,
            "Coordinator stopped"
        );

        RunSummary {
            ticks: self.tick_count,
            checkpoints_saved,
            exported,
            final_state: self.system_state.read().await.clone(),
        }
    }

    async fn stabilize(&mut self, reason: &str) -> Result<()> {
        self.observer.notify(&ObserverEvent::Recovery {
            status: RecoveryStatus::Stabilizing,
            outcome: None,
        });

        let deadline = self.config.step_timeout();
        let outcome = match tokio::time::timeout(deadline, self.recovery.stabilize(reason)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    reason,
                    timeout_ms = self.config.step_timeout_ms,
                    "Recovery timed out"
                );
                StabilizeOutcome::Failed {
                    error: format!(
                        "recovery exceeded deadline of {}ms",
                        self.config.step_timeout_ms
                    ),
                }
            }
        };
        self.observer.notify(&ObserverEvent::Recovery {
            status: self.recovery.get_status(),
            outcome: Some(outcome.clone()),
        });

        if outcome.is_completed() && self.state == CoordinatorState::Degraded {
            self.transition_to(CoordinatorState::Running).await?;
        }
        Ok(())
    }

    async fn write_checkpoint(
        &self,
        reason: CheckpointReason,
        now: DateTime<Utc>,
    ) -> Result<SavedCheckpoint> {
        let snapshot = self.system_state.read().await.clone();
        let saved = self
            .checkpoints
            .lock()
            .await
            .checkpoint(reason, &snapshot, now)
            .await?;

        self.system_state.write().await.last_checkpoint = Some(saved.created_at);
        self.observer.notify(&ObserverEvent::Checkpoint {
            reason,
            path: saved.path.clone(),
            at: saved.created_at,
        });
        Ok(saved)
    }

    fn persistence_succeeded(&mut self) {
        self.persistence_failures = 0;
    }

    /// Count a failed write; the limit turns it into `Unrecoverable`
    fn persistence_failed(&mut self, operation: &str, error: PhaseGateError) -> Result<()> {
        if error.kind() != ErrorKind::Persistence {
            return Err(error);
        }

        self.persistence_failures += 1;
        self.observer.notify(&ObserverEvent::PersistenceError {
            operation: operation.to_string(),
            error: error.to_string(),
            consecutive_failures: self.persistence_failures,
        });

        let limit = self.config.max_consecutive_persistence_failures;
        if self.persistence_failures >= limit {
            return Err(PhaseGateError::Unrecoverable(format!(
                "{limit} consecutive persistence failures, last during {operation}: {error}"
            )));
        }
        Ok(())
    }

    async fn transition_to(&mut self, target: CoordinatorState) -> Result<()> {
        if self.state == target {
            return Ok(());
        }
        if !self.state.can_transition_to(target) {
            return Err(PhaseGateError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }

        let from = self.state;
        self.state = target;
        self.observer
            .notify(&ObserverEvent::StateChanged { from, to: target });
        self.system_state.write().await.coordinator_state = target;
        Ok(())
    }

    /// Refresh the shared read model
    async fn publish_state(&self, now: DateTime<Utc>) {
        let agents = self
            .agents
            .iter()
            .map(|slot| (slot.machine.name().to_string(), slot.snapshot()))
            .collect();
        let last_checkpoint = self.checkpoints.lock().await.last_checkpoint_time();
        let events_logged = self
            .aggregator
            .lock()
            .await
            .exporter()
            .counts()
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect();

        let mut state = self.system_state.write().await;
        state.coordinator_state = self.state;
        state.health = self.detector.get_health_status();
        state.recovery = self.recovery.get_status();
        state.tick = self.tick_count;
        state.agents = agents;
        state.last_checkpoint = last_checkpoint;
        state.consecutive_persistence_failures = self.persistence_failures;
        state.recoveries_dropped = self.recovery.dropped_count();
        state.events_logged = events_logged;
        state.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentKind, AgentProfile, FnProducer, StepRequest};
    use crate::coordination::ManualClock;
    use crate::services::TracingObserver;
    use crate::supervisor::watchdog::MockHealthProbe;
    use crate::supervisor::HealthStatus;
    use chrono::TimeZone;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.checkpoint.dir = root.join("checkpoints").display().to_string();
        config.export.dir = root.join("exports").display().to_string();
        config.export.on_shutdown = false;
        config
    }

    fn test_coordinator(config: &AppConfig) -> Coordinator {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Coordinator::new(config, Arc::new(TracingObserver))
            .with_clock(Arc::new(ManualClock::new(start)))
    }

    fn constant_agent(coordinator: &Coordinator, name: &str, value: f64) -> AgentStateMachine {
        AgentStateMachine::new(
            name,
            AgentProfile::threshold_gated(AgentKind::Energy, "Energy distribution"),
            Arc::new(FnProducer::new(move |_: &StepRequest<'_>| {
                Ok(MetricsSnapshot::uniform(value))
            })),
            coordinator.params(),
            coordinator.validator(),
        )
    }

    #[tokio::test]
    async fn test_tick_before_initialize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = test_coordinator(&test_config(dir.path()));
        let err = coordinator.tick().await.unwrap_err();
        assert!(matches!(err, PhaseGateError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = test_coordinator(&test_config(dir.path()));
        let first = constant_agent(&coordinator, "energy", 0.9);
        let second = constant_agent(&coordinator, "energy", 0.9);
        coordinator.register_agent(first).unwrap();
        assert!(coordinator.register_agent(second).is_err());
    }

    #[tokio::test]
    async fn test_degraded_probe_recovers_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = MockHealthProbe::new();
        probe.expect_probe().return_const(HealthStatus::Degraded);

        let mut coordinator =
            test_coordinator(&test_config(dir.path())).with_health_probe(Arc::new(probe));
        let agent = constant_agent(&coordinator, "energy", 0.9);
        coordinator.register_agent(agent).unwrap();
        coordinator.initialize().await.unwrap();

        coordinator.tick().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        assert_eq!(coordinator.recovery().completed_count(), 1);
    }

    struct HangingRecovery;

    #[async_trait::async_trait]
    impl RecoveryHandler for HangingRecovery {
        async fn recover(&self, _reason: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_recovery_times_out_and_stays_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = MockHealthProbe::new();
        probe.expect_probe().return_const(HealthStatus::Degraded);

        let mut config = test_config(dir.path());
        config.coordinator.step_timeout_ms = 20;

        let mut coordinator = test_coordinator(&config)
            .with_health_probe(Arc::new(probe))
            .with_recovery_handler(Arc::new(HangingRecovery));
        let agent = constant_agent(&coordinator, "energy", 0.9);
        coordinator.register_agent(agent).unwrap();
        coordinator.initialize().await.unwrap();

        coordinator.tick().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Degraded);
        assert_eq!(coordinator.recovery().get_status(), RecoveryStatus::Ready);
        assert_eq!(coordinator.recovery().completed_count(), 0);
    }

    #[tokio::test]
    async fn test_no_agents_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = test_coordinator(&test_config(dir.path()));
        let err = coordinator.initialize().await.unwrap_err();
        assert!(matches!(err, PhaseGateError::Configuration(_)));
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }

    #[tokio::test]
    async fn test_persistence_failures_become_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the checkpoint directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let mut config = test_config(dir.path());
        config.checkpoint.dir = blocked.display().to_string();
        config.checkpoint.interval_secs = 1;
        config.coordinator.max_consecutive_persistence_failures = 2;
        config.coordinator.agents = vec!["energy".to_string()];

        let mut coordinator = test_coordinator(&config);
        let agent = constant_agent(&coordinator, "energy", 0.9);
        coordinator.register_agent(agent).unwrap();

        // The initialization checkpoint is the first failure
        coordinator.initialize().await.unwrap();
        let err = coordinator.tick().await.unwrap_err();
        assert!(matches!(err, PhaseGateError::Unrecoverable(_)));
    }
}
