//! Translate a run mode into the ordered phases to execute.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use events::EventBus;
use orchestrator::{CommandPhase, HealthPhase, Phase, PrerequisitePhase, ServerPhase};
use probe::{AvailabilityProbe, ServerManager};
use supervisor::ProcessSupervisor;

use crate::config::StackcheckConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unit,
    Integration,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub filter: Option<String>,
    pub parallel: Option<usize>,
    pub advanced: bool,
}

impl PlanOptions {
    /// Defaults to the host's available parallelism.
    pub fn unit_threads(&self) -> usize {
        self.parallel.unwrap_or_else(host_parallelism)
    }

    /// Defaults to 1, or 2 with `--advanced`.
    pub fn integration_threads(&self) -> usize {
        self.parallel
            .unwrap_or(if self.advanced { 2 } else { 1 })
    }
}

pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub struct RunPlan {
    pub phases: Vec<Phase>,
    /// Present when the plan talks to the server; owns any server it starts
    pub server: Option<Arc<ServerManager>>,
}

pub fn build(
    mode: Mode,
    config: &StackcheckConfig,
    working_dir: &Path,
    options: &PlanOptions,
    events: &EventBus,
) -> Result<RunPlan> {
    // In `all` mode prerequisites and unit tests gate everything after them.
    let gated = mode == Mode::All;
    let mut phases = vec![prerequisites(config, gated)];
    let mut server = None;

    if matches!(mode, Mode::Unit | Mode::All) {
        phases.push(unit(config, working_dir, options, gated));
    }

    if matches!(mode, Mode::Integration | Mode::All) {
        let manager = Arc::new(
            ServerManager::new(config.server.clone(), ProcessSupervisor::new())?
                .with_events(events.clone()),
        );

        let mut probe =
            AvailabilityProbe::with_timeout(&config.server.url, config.server.probe_timeout)?;
        if let Some(service) = &config.server.expected_service {
            probe = probe.expect_service(service);
        }

        phases.push(
            Phase::new(
                "server",
                config.run.server_timeout,
                ServerPhase::new(Arc::clone(&manager)),
            )
            .depends_on("prerequisites"),
        );
        phases.push(
            Phase::new("health", config.run.health_timeout, HealthPhase::new(probe))
                .depends_on("server"),
        );
        phases.push(
            Phase::new(
                "integration",
                config.integration.timeout,
                CommandPhase::new(config.integration.command(
                    working_dir,
                    options.filter.as_deref(),
                    options.integration_threads(),
                )),
            )
            .depends_on("health"),
        );
        server = Some(manager);
    }

    Ok(RunPlan { phases, server })
}

fn prerequisites(config: &StackcheckConfig, gated: bool) -> Phase {
    let phase = Phase::new(
        "prerequisites",
        config.prerequisites.timeout,
        PrerequisitePhase::new(config.prerequisites.tools.iter().cloned()),
    );
    if gated {
        phase.gate()
    } else {
        phase
    }
}

fn unit(
    config: &StackcheckConfig,
    working_dir: &Path,
    options: &PlanOptions,
    gated: bool,
) -> Phase {
    let phase = Phase::new(
        "unit",
        config.unit.timeout,
        CommandPhase::new(config.unit.command(
            working_dir,
            options.filter.as_deref(),
            options.unit_threads(),
        )),
    )
    .depends_on("prerequisites");
    if gated {
        phase.gate()
    } else {
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &RunPlan) -> Vec<&str> {
        plan.phases.iter().map(|p| p.name()).collect()
    }

    fn plan(mode: Mode, options: PlanOptions) -> RunPlan {
        build(
            mode,
            &StackcheckConfig::default(),
            Path::new("backend"),
            &options,
            &EventBus::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_unit_plan() {
        let plan = plan(Mode::Unit, PlanOptions::default());
        assert_eq!(names(&plan), vec!["prerequisites", "unit"]);
        assert!(plan.server.is_none());
        assert!(plan.phases.iter().all(|p| !p.is_gate()));
    }

    #[test]
    fn test_integration_plan() {
        let plan = plan(Mode::Integration, PlanOptions::default());
        assert_eq!(
            names(&plan),
            vec!["prerequisites", "server", "health", "integration"]
        );
        assert!(plan.server.is_some());
        assert_eq!(plan.phases[3].dependencies(), ["health".to_string()]);
    }

    #[test]
    fn test_all_plan_gates_prerequisites_and_unit() {
        let plan = plan(Mode::All, PlanOptions::default());
        assert_eq!(
            names(&plan),
            vec!["prerequisites", "unit", "server", "health", "integration"]
        );
        let gates: Vec<&str> = plan
            .phases
            .iter()
            .filter(|p| p.is_gate())
            .map(|p| p.name())
            .collect();
        assert_eq!(gates, vec!["prerequisites", "unit"]);
    }

    #[test]
    fn test_thread_counts() {
        let defaults = PlanOptions::default();
        assert_eq!(defaults.integration_threads(), 1);
        assert_eq!(defaults.unit_threads(), host_parallelism());

        let advanced = PlanOptions {
            advanced: true,
            ..PlanOptions::default()
        };
        assert_eq!(advanced.integration_threads(), 2);

        let explicit = PlanOptions {
            parallel: Some(3),
            advanced: true,
            ..PlanOptions::default()
        };
        assert_eq!(explicit.integration_threads(), 3);
        assert_eq!(explicit.unit_threads(), 3);
    }

    #[test]
    fn test_filter_is_passed_to_commands() {
        let plan = plan(
            Mode::All,
            PlanOptions {
                filter: Some("pagination".to_string()),
                ..PlanOptions::default()
            },
        );
        let labels: Vec<String> = plan.phases.iter().map(|p| p.label()).collect();
        assert!(labels.contains(&"unit: cargo test --lib pagination".to_string()));
        assert!(labels.contains(&"integration: cargo test --test * pagination".to_string()));
    }
}
