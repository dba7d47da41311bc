//! Per-workflow supervision and the operations exposed to API callers.
//!
//! Each accepted query gets one tokio task that owns its agent process from
//! spawn to reap. The task waits on a single `select!` over cancellation, the
//! handshake and execution timers, the next chunk of output and process exit;
//! whichever resolves first decides what happens next. API calls only touch
//! the [`WorkflowRegistry`], never the process.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use super::classifier::{MarkerSet, OutputClassifier, Verdict};
use super::driver::{DriverState, Injection, PromptScript, ProtocolDriver};
use super::launcher::{self, AgentInput, AgentLauncher, AgentOutput, AgentProcess};
use super::registry::{CancelOutcome, WorkflowRegistry, WorkflowTicket};
use crate::config::OasisConfig;
use crate::error::OasisError;
use crate::state_machine::{Event, FailureReason, WorkflowRecord};

/// Everything the supervising tasks need besides the launcher.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub default_model: String,
    pub model_aliases: HashMap<String, String>,
    pub handshake_timeout: Duration,
    pub execution_timeout: Duration,
    pub kill_grace: Duration,
    pub script: PromptScript,
    pub markers: MarkerSet,
    pub max_query_chars: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &OasisConfig) -> Self {
        let agent = &config.agent;
        Self {
            default_model: agent.default_model.clone(),
            model_aliases: agent.model_aliases.clone(),
            handshake_timeout: config.limits.handshake_timeout(),
            execution_timeout: config.limits.execution_timeout(),
            kill_grace: config.limits.kill_grace(),
            script: PromptScript {
                query_marker: agent.query_prompt.clone(),
                continue_marker: agent.continue_prompt.clone(),
                continue_answer: agent.continue_answer.clone(),
            },
            markers: MarkerSet {
                completion: agent.completion_markers.clone(),
                error: agent.error_markers.clone(),
                tail_bytes: agent.output_tail_bytes,
            },
            max_query_chars: config.limits.max_query_chars,
        }
    }
}

/// Entry point for creating, inspecting and cancelling workflows.
#[derive(Clone)]
pub struct Supervisor {
    registry: WorkflowRegistry,
    launcher: Arc<AgentLauncher>,
    settings: Arc<SupervisorSettings>,
}

impl Supervisor {
    pub fn new(launcher: AgentLauncher, settings: SupervisorSettings) -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            launcher: Arc::new(launcher),
            settings: Arc::new(settings),
        }
    }

    pub fn from_config(config: &OasisConfig) -> Self {
        Self::new(
            AgentLauncher::from_config(&config.agent),
            SupervisorSettings::from_config(config),
        )
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Backend name for a requested model: the default when none is given,
    /// then a single lookup in the alias table.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        let name = requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.settings.default_model);
        self.settings
            .model_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn validate_query(&self, query: &str) -> Result<(), OasisError> {
        if query.trim().is_empty() {
            return Err(OasisError::InvalidRequest("Query cannot be empty".into()));
        }
        let max = self.settings.max_query_chars;
        if query.chars().count() > max {
            return Err(OasisError::InvalidRequest(format!(
                "Query is too long (max {max} characters)"
            )));
        }
        Ok(())
    }

    /// Accept a query and start supervising it in the background.
    ///
    /// Returns the freshly created `pending` record. Must be called inside a tokio runtime.
    pub fn submit(&self, query: &str, model: Option<&str>) -> Result<WorkflowRecord, OasisError> {
        self.validate_query(query)?;
        let model = self.resolve_model(model);
        let (record, ticket) = self.registry.create(query.to_string(), model.clone());
        info!(workflow_id = %record.id, model = %record.model, "workflow accepted");

        let span = info_span!("workflow", workflow_id = %record.id);
        let run = WorkflowRun {
            registry: self.registry.clone(),
            settings: Arc::clone(&self.settings),
            ticket,
        };
        tokio::spawn(
            run.execute(Arc::clone(&self.launcher), query.to_string(), model)
                .instrument(span),
        );
        Ok(record)
    }

    pub fn status(&self, id: &str) -> Result<WorkflowRecord, OasisError> {
        self.registry.get(id)
    }

    pub fn active(&self) -> Vec<WorkflowRecord> {
        self.registry.list_active()
    }

    /// Cancel a workflow and wait, up to the kill grace period, for its process to be reaped.
    ///
    /// Cancelling a finished workflow succeeds and leaves it unchanged.
    pub async fn cancel(&self, id: &str) -> Result<WorkflowRecord, OasisError> {
        match self.registry.cancel(id)? {
            CancelOutcome::Cancelled { mut reaped } => {
                let grace = self.settings.kill_grace;
                let reaped_in_time = matches!(
                    tokio::time::timeout(grace, reaped.wait_for(|done| *done)).await,
                    Ok(Ok(_))
                );
                if !reaped_in_time {
                    warn!(workflow_id = id, ?grace, "agent not reaped within kill grace period");
                }
            }
            CancelOutcome::AlreadyTerminal(status) => {
                debug!(workflow_id = id, %status, "cancel ignored for finished workflow");
            }
        }
        self.registry.get(id)
    }

    /// Cancel every active workflow and wait for their processes to be reaped.
    pub async fn shutdown(&self) {
        let active = self.registry.list_active();
        if active.is_empty() {
            return;
        }
        info!(count = active.len(), "cancelling active workflows");

        let mut pending = Vec::new();
        for record in &active {
            if let Ok(CancelOutcome::Cancelled { reaped }) = self.registry.cancel(&record.id) {
                pending.push((record.id.clone(), reaped));
            }
        }

        let deadline = Instant::now() + self.settings.kill_grace;
        for (id, mut reaped) in pending {
            let done = matches!(
                tokio::time::timeout_at(deadline, reaped.wait_for(|done| *done)).await,
                Ok(Ok(_))
            );
            if !done {
                warn!(workflow_id = %id, "agent not reaped before shutdown");
            }
        }
    }
}

/// How the supervision loop ended.
enum Ending {
    /// The process exited by itself.
    Exited(std::io::Result<ExitStatus>),
    /// The supervisor must kill the process. `None` means it was cancelled,
    /// which the registry has already recorded.
    Kill(Option<FailureReason>),
}

/// What writing the driver's injections did.
enum Delivery {
    Idle,
    Started,
    /// The record went terminal before the query could be sent.
    Preempted,
}

struct WorkflowRun {
    registry: WorkflowRegistry,
    settings: Arc<SupervisorSettings>,
    ticket: WorkflowTicket,
}

impl WorkflowRun {
    fn id(&self) -> &str {
        &self.ticket.id
    }

    fn apply(&self, event: Event) -> bool {
        match self.registry.apply(self.id(), event) {
            Ok(transition) => transition.applied(),
            Err(e) => {
                warn!(error = %e, "workflow record disappeared while supervised");
                false
            }
        }
    }

    fn append_logs(&self, text: &str) {
        debug!(output = %text.trim_end(), "agent output");
        self.registry.append_logs(self.id(), text);
    }

    async fn execute(self, launcher: Arc<AgentLauncher>, query: String, model: String) {
        if self.ticket.cancel.is_cancelled() {
            debug!("cancelled before the agent was started");
            self.registry.mark_reaped(self.id());
            return;
        }

        let process = match launcher.spawn(&model) {
            Ok(process) => process,
            Err(e) => {
                warn!(program = launcher.program(), error = %e, "failed to start agent");
                self.apply(Event::Failed(FailureReason::Spawn(e.to_string())));
                self.registry.mark_reaped(self.id());
                return;
            }
        };
        info!(pid = ?process.pid, %model, "agent started");

        self.supervise(process, &query).await;
        self.registry.mark_reaped(self.id());
        info!("supervision finished");
    }

    async fn supervise(&self, process: AgentProcess, query: &str) {
        let AgentProcess {
            pid,
            mut child,
            mut input,
            mut output,
        } = process;
        let settings = Arc::clone(&self.settings);
        let cancel = self.ticket.cancel.clone();

        let mut driver = ProtocolDriver::new(settings.script.clone(), query);
        let mut classifier = OutputClassifier::new(settings.markers.clone());

        let handshake = tokio::time::sleep(settings.handshake_timeout);
        tokio::pin!(handshake);
        // Re-armed from `started_at` once the query has been sent.
        let execution = tokio::time::sleep(settings.execution_timeout);
        tokio::pin!(execution);

        let mut running = false;
        let mut output_open = true;

        let ending = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Ending::Kill(None),

                _ = &mut handshake, if driver.state() == DriverState::AwaitingQueryPrompt => {
                    break Ending::Kill(Some(FailureReason::HandshakeTimeout(
                        settings.handshake_timeout,
                    )));
                }

                _ = &mut execution, if running => {
                    break Ending::Kill(Some(FailureReason::ExecutionTimeout(
                        settings.execution_timeout,
                    )));
                }

                chunk = output.next_text(), if output_open => {
                    let Some(text) = chunk else {
                        output_open = false;
                        continue;
                    };
                    self.append_logs(&text);
                    if let Some(marker) = classifier.observe(&text) {
                        break Ending::Kill(Some(FailureReason::AgentReported(format!(
                            "Agent reported an error: {marker}"
                        ))));
                    }
                    match self.deliver(driver.observe(&text), pid, &mut input).await {
                        Delivery::Idle => {}
                        Delivery::Started => {
                            running = true;
                            execution
                                .as_mut()
                                .reset(Instant::now() + settings.execution_timeout);
                        }
                        Delivery::Preempted => break Ending::Kill(None),
                    }
                }

                status = child.wait() => break Ending::Exited(status),
            }
        };

        match ending {
            Ending::Kill(reason) => {
                if let Some(reason) = &reason {
                    warn!(?pid, %reason, "stopping agent");
                }
                match launcher::terminate(pid, &mut child, &mut input).await {
                    Ok(status) => debug!(?pid, %status, "agent reaped after kill"),
                    Err(e) => warn!(?pid, error = %e, "failed to reap agent after kill"),
                }
                if let Some(reason) = reason {
                    self.apply(Event::Failed(reason));
                }
                if output_open {
                    self.drain(&mut output, &mut classifier).await;
                }
            }
            Ending::Exited(status) => {
                input.close();
                if output_open && !self.drain(&mut output, &mut classifier).await {
                    // Helpers still hold the pipe open after the agent left.
                    if let Some(pid) = pid {
                        launcher::kill_group(pid);
                    }
                }
                let event = match status {
                    Err(e) => Event::Failed(FailureReason::AgentReported(format!(
                        "Failed to wait for agent: {e}"
                    ))),
                    Ok(status) if !running => {
                        Event::Failed(FailureReason::AgentReported(format!(
                            "Agent exited before prompting for a query ({status})"
                        )))
                    }
                    Ok(status) => match classifier.verdict(status.code()) {
                        Verdict::Completed => Event::Succeeded,
                        Verdict::Failed(message) => {
                            Event::Failed(FailureReason::AgentReported(message))
                        }
                    },
                };
                self.apply(event);
            }
        }
    }

    /// Write the driver's injections in order. No input is written once the
    /// workflow has been cancelled.
    async fn deliver(
        &self,
        injections: Vec<Injection>,
        pid: Option<u32>,
        input: &mut AgentInput,
    ) -> Delivery {
        let mut delivery = Delivery::Idle;
        for injection in injections {
            if self.ticket.cancel.is_cancelled() {
                return Delivery::Preempted;
            }
            if let Injection::Query(_) = injection {
                if !self.apply(Event::Started { pid }) {
                    return Delivery::Preempted;
                }
                delivery = Delivery::Started;
            }
            if input.is_closed() {
                debug!(?injection, "agent input closed, dropping injection");
                continue;
            }
            if let Err(e) = input.write_line(&injection.line()).await {
                warn!(error = %e, "failed to write to agent input");
            }
            if let Injection::ContinueAnswer(_) = injection {
                input.close();
            }
        }
        delivery
    }

    /// Collect what is left in the output pipe, bounded by the kill grace period.
    /// Returns `false` if the pipe was still open when the time ran out.
    async fn drain(&self, output: &mut AgentOutput, classifier: &mut OutputClassifier) -> bool {
        let drained = tokio::time::timeout(self.settings.kill_grace, async {
            while let Some(text) = output.next_text().await {
                self.append_logs(&text);
                classifier.observe(&text);
            }
        })
        .await;
        if drained.is_err() {
            debug!("agent output still open after exit");
        }
        drained.is_ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::error::FailureKind;
    use crate::state_machine::WorkflowStatus;

    const HAPPY_AGENT: &str = r#"
echo "model=$2"
echo "[INFO] loading agent"
printf 'Query: '
read q
echo "running: $q"
echo "Task completed"
printf 'Would you like to provide another query? (y/n): '
read a
echo "answer: $a"
"#;

    const SLOW_AGENT: &str = r#"
printf 'Query: '
read q
echo "started: $q"
sleep 30
"#;

    fn settings() -> SupervisorSettings {
        let mut settings = SupervisorSettings::from_config(&OasisConfig::default());
        settings.handshake_timeout = Duration::from_secs(10);
        settings.execution_timeout = Duration::from_secs(20);
        settings.kill_grace = Duration::from_secs(3);
        settings
    }

    fn fake_agent(script: &str) -> AgentLauncher {
        AgentLauncher::new(
            "sh",
            vec!["-c".into(), script.into(), "fake-agent".into()],
            "--model",
        )
    }

    fn supervisor(script: &str, tweak: impl FnOnce(&mut SupervisorSettings)) -> Supervisor {
        let mut settings = settings();
        tweak(&mut settings);
        Supervisor::new(fake_agent(script), settings)
    }

    async fn wait_until(
        supervisor: &Supervisor,
        id: &str,
        done: impl Fn(&WorkflowRecord) -> bool,
    ) -> WorkflowRecord {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let record = supervisor.status(id).unwrap();
            if done(&record) {
                return record;
            }
            assert!(
                Instant::now() < deadline,
                "workflow {id} stuck in {}: {}",
                record.status,
                record.logs
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_terminal(supervisor: &Supervisor, id: &str) -> WorkflowRecord {
        // Wait for the reap too, so the last output is in the logs.
        wait_until(supervisor, id, |r| {
            r.is_terminal() && supervisor.registry().is_reaped(id)
        })
        .await
    }

    fn process_gone(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        matches!(
            kill(Pid::from_raw(pid as i32), None),
            Err(nix::errno::Errno::ESRCH)
        )
    }

    #[test]
    fn resolve_model_applies_alias_once() {
        let supervisor = supervisor("true", |s| {
            s.model_aliases = HashMap::from([
                ("alias-x".to_string(), "backend-y".to_string()),
                ("backend-y".to_string(), "backend-z".to_string()),
            ]);
        });
        assert_eq!(supervisor.resolve_model(Some("alias-x")), "backend-y");
        assert_eq!(supervisor.resolve_model(Some("other")), "other");
    }

    #[test]
    fn missing_model_uses_default_alias() {
        let supervisor = supervisor("true", |_| {});
        assert_eq!(supervisor.resolve_model(None), "gpt-4o");
        assert_eq!(supervisor.resolve_model(Some("  ")), "gpt-4o");
    }

    #[tokio::test]
    async fn happy_path_completes() {
        let supervisor = supervisor(HAPPY_AGENT, |_| {});
        let created = supervisor.submit("open calculator", None).unwrap();
        assert_eq!(created.status, WorkflowStatus::Pending);
        assert_eq!(created.message, "Workflow queued for execution");

        let record = wait_for_terminal(&supervisor, &created.id).await;
        assert_eq!(record.status, WorkflowStatus::Completed, "{}", record.logs);
        assert_eq!(record.message, "Workflow successfully executed");
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert!(record.duration_secs().is_some());
        assert!(record.pid.is_some());
        assert!(record.logs.contains("running: open calculator"));
        assert!(record.logs.contains("answer: n"));
        assert!(supervisor.active().is_empty());
    }

    #[tokio::test]
    async fn alias_is_passed_to_agent() {
        let supervisor = supervisor(HAPPY_AGENT, |s| {
            s.model_aliases = HashMap::from([("alias-x".to_string(), "backend-y".to_string())]);
        });
        let created = supervisor
            .submit("open calculator", Some("alias-x"))
            .unwrap();
        assert_eq!(created.model, "backend-y");

        let record = wait_for_terminal(&supervisor, &created.id).await;
        assert!(record.logs.contains("model=backend-y"), "{}", record.logs);
    }

    #[tokio::test]
    async fn identical_queries_are_independent() {
        let supervisor = supervisor(HAPPY_AGENT, |_| {});
        let a = supervisor.submit("open calculator", None).unwrap();
        let b = supervisor.submit("open calculator", None).unwrap();
        assert_ne!(a.id, b.id);

        let a = wait_for_terminal(&supervisor, &a.id).await;
        let b = wait_for_terminal(&supervisor, &b.id).await;
        assert_eq!(a.status, WorkflowStatus::Completed);
        assert_eq!(b.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let supervisor = supervisor("printf 'Query: '; read q; echo 'Task completed'; exit 3", |_| {});
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.message, "Process exited with code 3");
        assert_eq!(
            record.failure.map(|f| f.kind()),
            Some(FailureKind::AgentReportedFailure)
        );
    }

    #[tokio::test]
    async fn missing_completion_marker_fails() {
        let supervisor = supervisor("printf 'Query: '; read q; echo 'nothing to report'", |_| {});
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.message.contains("completion marker"));
    }

    #[tokio::test]
    async fn exit_before_prompt_fails() {
        let supervisor = supervisor("echo 'crashed on startup'", |_| {});
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.message.contains("before prompting"), "{}", record.message);
        assert!(record.started_at.is_none());
        assert!(record.logs.contains("crashed on startup"));
    }

    #[tokio::test]
    async fn error_marker_kills_agent() {
        let script = "printf 'Query: '; read q; echo 'Traceback (most recent call last):'; sleep 30";
        let supervisor = supervisor(script, |_| {});
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.message.starts_with("Agent reported an error"));
        assert!(process_gone(record.pid.unwrap()));
    }

    #[tokio::test]
    async fn handshake_timeout_fails_and_kills() {
        let supervisor = supervisor("echo 'warming up'; sleep 30", |s| {
            s.handshake_timeout = Duration::from_millis(300);
        });
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(
            record.message,
            "Agent did not prompt for a query within 300ms"
        );
        assert_eq!(
            record.failure.map(|f| f.kind()),
            Some(FailureKind::HandshakeTimeout)
        );
        assert!(record.started_at.is_none());
        assert!(record.pid.is_none());
    }

    #[tokio::test]
    async fn execution_timeout_fails_and_kills() {
        let supervisor = supervisor(SLOW_AGENT, |s| {
            s.execution_timeout = Duration::from_millis(500);
        });
        let created = supervisor.submit("long task", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.message, "Workflow timed out after 500ms");
        assert_eq!(
            record.failure.as_ref().map(FailureReason::kind),
            Some(FailureKind::ExecutionTimeout)
        );
        assert!(record.started_at.is_some());
        assert!(process_gone(record.pid.unwrap()));
    }

    #[tokio::test]
    async fn execution_budget_starts_when_query_is_sent() {
        // The prompt arrives after twice the execution budget; only time after
        // the query counts against it.
        let supervisor = supervisor(
            r#"
sleep 1
printf 'Query: '
read q
echo "Task completed"
printf 'Would you like to provide another query? (y/n): '
read a
"#,
            |s| {
                s.handshake_timeout = Duration::from_secs(5);
                s.execution_timeout = Duration::from_millis(500);
            },
        );
        let created = supervisor.submit("quick task", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;

        assert_eq!(record.status, WorkflowStatus::Completed, "{}", record.message);
        assert!(record.failure.is_none());
        let started = record.started_at.unwrap();
        assert!(started - record.created_at >= chrono::Duration::milliseconds(900));
    }

    #[tokio::test]
    async fn cancel_running_workflow_kills_agent() {
        let supervisor = supervisor(SLOW_AGENT, |_| {});
        let created = supervisor.submit("long task", None).unwrap();
        wait_until(&supervisor, &created.id, |r| {
            r.status == WorkflowStatus::Running && r.logs.contains("started: long task")
        })
        .await;

        let record = supervisor.cancel(&created.id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Cancelled);
        assert_eq!(record.message, "Workflow cancelled by user");
        assert!(supervisor.registry().is_reaped(&created.id));
        assert!(process_gone(record.pid.unwrap()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = supervisor.status(&created.id).unwrap();
        assert_eq!(later.status, WorkflowStatus::Cancelled);
        assert_eq!(later.logs, record.logs);
    }

    #[tokio::test]
    async fn immediate_cancel_never_completes() {
        let supervisor = supervisor(HAPPY_AGENT, |_| {});
        let created = supervisor.submit("open calculator", None).unwrap();
        let record = supervisor.cancel(&created.id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let later = supervisor.status(&created.id).unwrap();
        assert_eq!(later.status, WorkflowStatus::Cancelled);
        assert!(!later.logs.contains("answer:"));
    }

    #[tokio::test]
    async fn cancel_finished_workflow_is_noop() {
        let supervisor = supervisor(HAPPY_AGENT, |_| {});
        let created = supervisor.submit("q", None).unwrap();
        let done = wait_for_terminal(&supervisor, &created.id).await;
        assert_eq!(done.status, WorkflowStatus::Completed);

        let after = supervisor.cancel(&created.id).await.unwrap();
        assert_eq!(after.status, WorkflowStatus::Completed);
        assert_eq!(after.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let supervisor = supervisor(HAPPY_AGENT, |_| {});
        assert!(matches!(
            supervisor.cancel("workflow_nope").await,
            Err(OasisError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_recorded() {
        let mut settings = settings();
        settings.kill_grace = Duration::from_millis(500);
        let supervisor = Supervisor::new(
            AgentLauncher::new("/definitely/not/an/agent", vec![], "--model"),
            settings,
        );
        let created = supervisor.submit("q", None).unwrap();
        let record = wait_for_terminal(&supervisor, &created.id).await;

        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.message.starts_with("Failed to start agent"));
        assert_eq!(
            record.failure.map(|f| f.kind()),
            Some(FailureKind::SpawnError)
        );
        assert!(record.pid.is_none());
        assert!(record.started_at.is_none());
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() {
        let supervisor = supervisor(HAPPY_AGENT, |s| s.max_query_chars = 10);
        assert!(matches!(
            supervisor.submit("   ", None),
            Err(OasisError::InvalidRequest(_))
        ));
        assert!(matches!(
            supervisor.submit(&"x".repeat(11), None),
            Err(OasisError::InvalidRequest(_))
        ));
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn active_lists_concurrent_workflows_and_shutdown_clears_them() {
        let supervisor = supervisor(SLOW_AGENT, |_| {});
        let mut submitted = HashSet::new();
        for i in 0..12 {
            submitted.insert(supervisor.submit(&format!("task {i}"), None).unwrap().id);
        }

        let active: HashSet<String> = supervisor.active().into_iter().map(|r| r.id).collect();
        assert_eq!(active, submitted);

        for id in &submitted {
            wait_until(&supervisor, id, |r| r.status == WorkflowStatus::Running).await;
        }
        let active: HashSet<String> = supervisor.active().into_iter().map(|r| r.id).collect();
        assert_eq!(active, submitted);

        supervisor.shutdown().await;
        assert!(supervisor.active().is_empty());
        for id in &submitted {
            let record = supervisor.status(id).unwrap();
            assert_eq!(record.status, WorkflowStatus::Cancelled);
            assert!(supervisor.registry().is_reaped(id));
            assert!(process_gone(record.pid.unwrap()));
        }
    }
}
