//! Runs phases in declared order and folds their outcomes into one report.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use events::{EventBus, RunEvent};
use stackcheck_core::{PhaseResult, PhaseStatus, RunReport};
use supervisor::{ProcessSupervisor, DEFAULT_GRACE_PERIOD, DEFAULT_KILL_TIMEOUT};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Phase, PhaseScope};
use crate::deadline::{race, ExpiryGuard, TimedOut};
use crate::error::PhaseError;
use crate::error::{OrchestratorError, Result};
use crate::progress::{ProgressMode, ProgressReporter, DEFAULT_TICK};
use crate::state_machine::PhaseState;

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// How long a phase's processes get to exit after the stop signal
    pub grace_period: Duration,
    /// Bound on the wait after a forced kill
    pub kill_timeout: Duration,
    pub progress: ProgressMode,
    pub tick: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            progress: ProgressMode::Terminal,
            tick: DEFAULT_TICK,
        }
    }
}

/// Error message of a phase stopped by [`PhaseSequencer::with_cancellation`].
pub const INTERRUPTED: &str = "interrupted";

enum Outcome {
    Finished(std::result::Result<String, PhaseError>),
    TimedOut(TimedOut),
    Interrupted,
}

/// Executes a run: every phase once, in order, continuing past failures.
pub struct PhaseSequencer {
    config: SequencerConfig,
    events: Option<EventBus>,
    cancel: CancellationToken,
}

impl PhaseSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop the run when `cancel` fires. The running phase is torn down and
    /// recorded as failed; every later phase is skipped.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reject phase lists that cannot be run.
    pub fn validate(phases: &[Phase]) -> Result<()> {
        if phases.is_empty() {
            return Err(OrchestratorError::config("no phases to run"));
        }

        let mut seen = HashSet::new();
        for phase in phases {
            for dependency in phase.dependencies() {
                if dependency == phase.name() {
                    return Err(OrchestratorError::config(format!(
                        "phase '{}' depends on itself",
                        phase.name()
                    )));
                }
                if !seen.contains(dependency.as_str()) {
                    let reason = if phases.iter().any(|p| p.name() == dependency) {
                        "is declared after it"
                    } else {
                        "does not exist"
                    };
                    return Err(OrchestratorError::config(format!(
                        "phase '{}' depends on '{}', which {}",
                        phase.name(),
                        dependency,
                        reason
                    )));
                }
            }
            if !seen.insert(phase.name()) {
                return Err(OrchestratorError::config(format!(
                    "duplicate phase name '{}'",
                    phase.name()
                )));
            }
        }
        Ok(())
    }

    /// Run `phases` and return the aggregate report.
    ///
    /// Only misconfiguration is an error; every phase failure is captured
    /// in the report.
    pub async fn run(&self, phases: Vec<Phase>) -> Result<RunReport> {
        Self::validate(&phases)?;

        let names: Vec<String> = phases.iter().map(|p| p.name().to_string()).collect();
        info!(phases = ?names, "Starting run");
        self.emit(RunEvent::RunStarted { phases: names });

        let mut reporter = ProgressReporter::with_tick(self.config.progress, self.config.tick);
        let mut results = Vec::with_capacity(phases.len());
        let mut finished: HashMap<String, PhaseStatus> = HashMap::new();
        let mut gates: Vec<String> = Vec::new();

        for phase in &phases {
            let mut state = PhaseState::new(phase.name());

            let blocked = if self.cancel.is_cancelled() {
                Some("run interrupted".to_string())
            } else {
                blocking_dependency(phase, &gates, &finished)
            };

            let result = match blocked {
                Some(reason) => {
                    state.transition(PhaseStatus::Skipped)?;
                    info!(phase = %phase.name(), reason = %reason, "Skipping phase");
                    self.emit(RunEvent::PhaseSkipped {
                        phase: phase.name().to_string(),
                        reason: reason.clone(),
                    });
                    PhaseResult::skipped(phase.name(), reason)
                }
                None => {
                    state.transition(PhaseStatus::Running)?;
                    let result = self.run_phase(phase, &mut reporter).await;
                    state.transition(result.status())?;
                    result
                }
            };

            finished.insert(phase.name().to_string(), state.status());
            if phase.is_gate() {
                gates.push(phase.name().to_string());
            }
            results.push(result);
        }

        let report = RunReport::new(results);
        info!(
            success = report.is_success(),
            passed = report.passed(),
            total = report.results().len(),
            duration_ms = report.total_duration().as_millis() as u64,
            "Run finished"
        );
        self.emit(RunEvent::RunFinished {
            success: report.is_success(),
            total_duration_ms: report.total_duration().as_millis() as u64,
        });
        Ok(report)
    }

    async fn run_phase(&self, phase: &Phase, reporter: &mut ProgressReporter) -> PhaseResult {
        let name = phase.name();
        let deadline = phase.timeout();
        info!(phase = %name, timeout_ms = deadline.as_millis() as u64, "Starting phase");
        self.emit(RunEvent::PhaseStarted {
            phase: name.to_string(),
            timeout_ms: deadline.as_millis() as u64,
        });

        let supervisor = ProcessSupervisor::new().with_kill_timeout(self.config.kill_timeout);
        let expiry = ExpiryGuard::new();
        let scope = PhaseScope::new(name, supervisor.clone(), expiry.clone());

        reporter.start(phase.label());
        let started = Instant::now();

        let raced = race(phase.body().run(&scope), deadline, || {
            warn!(
                phase = %name,
                timeout_ms = deadline.as_millis() as u64,
                "Phase deadline elapsed"
            );
            expiry.fire();
        });
        let outcome = tokio::select! {
            raced = raced => match raced {
                Ok(finished) => Outcome::Finished(finished),
                Err(timed_out) => Outcome::TimedOut(timed_out),
            },
            _ = self.cancel.cancelled() => {
                warn!(phase = %name, "Run interrupted, stopping phase");
                expiry.fire();
                Outcome::Interrupted
            }
        };
        let duration = started.elapsed();

        let partial_output = match outcome {
            Outcome::Finished(_) => String::new(),
            _ => collect_partial_output(&supervisor),
        };
        self.teardown(name, &supervisor).await;

        let result = match outcome {
            Outcome::Finished(Ok(output)) => PhaseResult::succeeded(name, output, duration),
            Outcome::Finished(Err(e)) => {
                PhaseResult::failed(name, e.output(), e.to_string(), duration)
            }
            Outcome::TimedOut(timed_out) => {
                PhaseResult::timed_out(name, partial_output, timed_out.deadline, duration)
            }
            Outcome::Interrupted => {
                PhaseResult::failed(name, partial_output, INTERRUPTED, duration)
            }
        };

        reporter
            .stop(format!(
                "{} {} in {:.2}s",
                name,
                result.status(),
                duration.as_secs_f64()
            ))
            .await;

        match result.error_message() {
            Some(message) => warn!(
                phase = %name,
                status = %result.status(),
                error = %message,
                "Phase did not succeed"
            ),
            None => info!(
                phase = %name,
                duration_ms = duration.as_millis() as u64,
                "Phase succeeded"
            ),
        }
        self.emit(RunEvent::PhaseFinished {
            phase: name.to_string(),
            status: result.status(),
            duration_ms: duration.as_millis() as u64,
        });
        result
    }

    /// Reclaim every process the phase left behind before the next phase
    /// starts.
    async fn teardown(&self, phase: &str, supervisor: &ProcessSupervisor) {
        let running = supervisor.running();
        if running.is_empty() {
            return;
        }

        debug!(phase, count = running.len(), "Tearing down phase processes");
        for result in supervisor.terminate_all(self.config.grace_period).await {
            if let Err(e) = result {
                warn!(phase, error = %e, "Phase process could not be reclaimed");
            }
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Default for PhaseSequencer {
    fn default() -> Self {
        Self::new(SequencerConfig::default())
    }
}

/// First unmet dependency of `phase`, explicit or through an earlier gate.
fn blocking_dependency(
    phase: &Phase,
    gates: &[String],
    finished: &HashMap<String, PhaseStatus>,
) -> Option<String> {
    let explicit = phase.dependencies().iter().map(|d| (d, "dependency"));
    let gated = gates.iter().map(|g| (g, "gate"));

    explicit.chain(gated).find_map(|(name, kind)| {
        let status = finished.get(name).copied().unwrap_or(PhaseStatus::Pending);
        (status != PhaseStatus::Succeeded).then(|| format!("{} '{}' {}", kind, name, status))
    })
}

fn collect_partial_output(supervisor: &ProcessSupervisor) -> String {
    supervisor
        .running()
        .iter()
        .map(|handle| {
            let stderr = handle.stderr_snapshot();
            if stderr.is_empty() {
                handle.stdout_snapshot()
            } else {
                format!("{}{}", handle.stdout_snapshot(), stderr)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhaseError;
    use crate::phases::FnPhase;
    use std::sync::{Arc, Mutex};

    fn sequencer() -> PhaseSequencer {
        PhaseSequencer::new(SequencerConfig {
            progress: ProgressMode::Hidden,
            ..SequencerConfig::default()
        })
    }

    fn sleeping(name: &str, millis: u64, timeout: Duration) -> Phase {
        Phase::new(
            name,
            timeout,
            FnPhase::new(move |_| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(format!("slept {}ms", millis))
            }),
        )
    }

    fn failing(name: &str) -> Phase {
        Phase::new(
            name,
            Duration::from_secs(10),
            FnPhase::new(|_| async { Err(PhaseError::failed("compilation failed")) }),
        )
    }

    fn recording(name: &str, log: Arc<Mutex<Vec<String>>>) -> Phase {
        let label = name.to_string();
        Phase::new(
            name,
            Duration::from_secs(10),
            FnPhase::new(move |_| {
                let log = Arc::clone(&log);
                let label = label.clone();
                async move {
                    log.lock().unwrap().push(label);
                    Ok(String::new())
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_phases_succeed_and_durations_sum() {
        let report = sequencer()
            .run(vec![
                sleeping("a", 100, Duration::from_secs(1)),
                sleeping("b", 200, Duration::from_secs(1)),
                sleeping("c", 300, Duration::from_secs(1)),
            ])
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        let total = report.total_duration();
        assert!(total >= Duration::from_millis(600), "total was {:?}", total);
        assert!(total < Duration::from_millis(620), "total was {:?}", total);
        assert_eq!(report.get("b").unwrap().output(), "slept 200ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dependency_skips_dependent() {
        let report = sequencer()
            .run(vec![
                failing("build"),
                sleeping("test", 10, Duration::from_secs(1)).depends_on("build"),
            ])
            .await
            .unwrap();

        let build = report.get("build").unwrap();
        assert_eq!(build.status(), PhaseStatus::Failed);
        assert_eq!(build.error_message(), Some("compilation failed"));

        let test = report.get("test").unwrap();
        assert_eq!(test.status(), PhaseStatus::Skipped);
        assert_eq!(test.error_message(), Some("dependency 'build' failed"));

        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_at_deadline() {
        let report = sequencer()
            .run(vec![sleeping("slow", 6000, Duration::from_millis(5000))])
            .await
            .unwrap();

        let slow = report.get("slow").unwrap();
        assert!(slow.is_timed_out());
        assert!(!slow.is_success());
        assert_eq!(slow.error_message(), Some("timed out after 5000ms"));
        assert!(slow.duration() >= Duration::from_millis(5000));
        assert!(slow.duration() < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continues_past_failures_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = sequencer()
            .run(vec![
                recording("first", Arc::clone(&log)),
                failing("second"),
                recording("third", Arc::clone(&log)),
            ])
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "third"]);
        let names: Vec<&str> = report.results().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(report.passed(), 2);
        assert!(!report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_gate_skips_everything_after_it() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = sequencer()
            .run(vec![
                failing("prerequisites").gate(),
                recording("unit", Arc::clone(&log)),
                recording("integration", Arc::clone(&log)),
            ])
            .await
            .unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(report.count(PhaseStatus::Skipped), 2);
        assert_eq!(
            report.get("integration").unwrap().error_message(),
            Some("gate 'prerequisites' failed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_dependency_propagates() {
        let report = sequencer()
            .run(vec![
                failing("build"),
                sleeping("test", 10, Duration::from_secs(1)).depends_on("build"),
                sleeping("deploy", 10, Duration::from_secs(1)).depends_on("test"),
            ])
            .await
            .unwrap();

        assert_eq!(
            report.get("deploy").unwrap().error_message(),
            Some("dependency 'test' skipped")
        );
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let seq = sequencer();

        let err = seq.run(vec![]).await.unwrap_err();
        assert!(err.is_config());

        let err = seq
            .run(vec![failing("unit"), failing("unit")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate phase name 'unit'"));

        let err = seq
            .run(vec![failing("test").depends_on("build"), failing("build")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("which is declared after it"));

        let err = seq
            .run(vec![failing("test").depends_on("missing")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("which does not exist"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_lifecycle_events() {
        let events = EventBus::new();
        let mut rx = events.subscribe();

        sequencer()
            .with_events(events.clone())
            .run(vec![failing("build"), failing("test").depends_on("build")])
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            kinds.push(match envelope.event {
                RunEvent::RunStarted { .. } => "run.started",
                RunEvent::PhaseStarted { .. } => "phase.started",
                RunEvent::PhaseFinished { .. } => "phase.finished",
                RunEvent::PhaseSkipped { .. } => "phase.skipped",
                RunEvent::RunFinished { .. } => "run.finished",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "run.started",
                "phase.started",
                "phase.finished",
                "phase.skipped",
                "run.finished"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_phase_processes_are_reclaimed() {
        use supervisor::{CommandSpec, ProcessHandle};

        let spawned: Arc<Mutex<Option<ProcessHandle>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&spawned);
        let phase = Phase::new(
            "hang",
            Duration::from_millis(300),
            FnPhase::new(move |scope: PhaseScope| {
                let slot = Arc::clone(&slot);
                async move {
                    let handle = scope.spawn(
                        &CommandSpec::new("sh").args(["-c", "echo started; exec sleep 30"]),
                    )?;
                    *slot.lock().unwrap() = Some(handle.clone());
                    handle.wait().await;
                    Ok(String::new())
                }
            }),
        );
        let next = Phase::new(
            "after",
            Duration::from_secs(5),
            FnPhase::new(|_| async { Ok("ran".to_string()) }),
        );

        let started = std::time::Instant::now();
        let report = sequencer().run(vec![phase, next]).await.unwrap();

        let hang = report.get("hang").unwrap();
        assert!(hang.is_timed_out());
        assert_eq!(report.get("after").unwrap().status(), PhaseStatus::Succeeded);

        let handle = spawned.lock().unwrap().clone().unwrap();
        assert!(!handle.is_running());
        assert_eq!(handle.signals_sent(), (1, 0));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_phase_and_skips_the_rest() {
        use supervisor::{CommandSpec, ProcessHandle};

        let spawned: Arc<Mutex<Option<ProcessHandle>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&spawned);
        let phase = Phase::new(
            "unit",
            Duration::from_secs(60),
            FnPhase::new(move |scope: PhaseScope| {
                let slot = Arc::clone(&slot);
                async move {
                    let handle = scope.spawn(&CommandSpec::new("sleep").arg("4242"))?;
                    *slot.lock().unwrap() = Some(handle.clone());
                    handle.wait().await;
                    Ok(String::new())
                }
            }),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = sequencer()
            .with_cancellation(cancel)
            .run(vec![phase, sleeping("integration", 10, Duration::from_secs(1))])
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        let unit = report.get("unit").unwrap();
        assert_eq!(unit.status(), PhaseStatus::Failed);
        assert_eq!(unit.error_message(), Some(INTERRUPTED));
        assert_eq!(
            report.get("integration").unwrap().error_message(),
            Some("run interrupted")
        );
        assert_eq!(report.exit_code(), 1);

        let handle = spawned.lock().unwrap().clone().unwrap();
        assert!(!handle.is_running());
        assert_eq!(handle.signals_sent(), (1, 0));
    }
}
