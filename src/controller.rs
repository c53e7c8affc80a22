//! Pipeline Lifecycle Controller
//!
//! Drives one monitor process through its states:
//!
//! ```text
//! Initializing ──► Running ──► IdleServing ──► Terminating
//!      │                                           ▲
//!      └──────────── toolkit unavailable ──────────┘
//! ```
//!
//! - **Initializing**: recreate the working directory, start the metrics
//!   endpoint, probe the toolkit
//! - **Running**: run every task in order on a blocking thread
//! - **IdleServing**: keep serving the last values until a shutdown request
//!   arrives (an OS signal in the binary). A request made earlier is held
//!   until the pipeline has finished
//! - **Terminating**: apply the cleanup policy and stop the endpoint. A
//!   further request interrupts the cleanup prompt and keeps the files

use std::fmt;
use std::io::{self, BufRead, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::config::{CleanupPolicy, PipelineConfig};
use crate::environment::{Toolkit, WorkDir};
use crate::error::{MonitorError, Result};
use crate::execution::{Pipeline, PipelineSummary, TaskContext};
use crate::monitoring::{duration_chart, render_summary, MetricsRegistry, ResourceSampler};
use crate::server::{MetricsServer, Shutdown};

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    Running,
    IdleServing,
    Terminating,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::IdleServing => "idle-serving",
            Self::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// How a monitor run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All tasks ran (successfully or not) and the process was interrupted
    Completed(PipelineSummary),
    /// The toolkit was missing; no task was attempted
    EnvironmentUnavailable(String),
}

/// Owns the metrics registry and sequences a full monitor run.
pub struct Controller {
    config: PipelineConfig,
    registry: Arc<MetricsRegistry>,
    state_tx: watch::Sender<ControllerState>,
    prompt_input: Option<Box<dyn BufRead + Send>>,
    echo: bool,
}

impl Controller {
    /// Creates a controller and declares the metric set for `config`'s tasks.
    pub fn new(config: PipelineConfig) -> Self {
        let registry = Arc::new(MetricsRegistry::new(
            &config.namespace,
            &config.task_names(),
        ));
        let (state_tx, _) = watch::channel(ControllerState::Initializing);

        Self {
            config,
            registry,
            state_tx,
            prompt_input: None,
            echo: true,
        }
    }

    /// Reads the cleanup answer from `input` instead of stdin.
    pub fn set_prompt_input(&mut self, input: impl BufRead + Send + 'static) {
        self.prompt_input = Some(Box::new(input));
    }

    /// Enables or disables console output.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Shared handle to the registry.
    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: ControllerState) {
        let previous = self.state_tx.send_replace(next);
        debug!("State: {} -> {}", previous, next);
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.config.bind_address.parse().map_err(|_| {
            MonitorError::InvalidPipeline(format!(
                "bind_address '{}' is not an IP address",
                self.config.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// Runs the whole lifecycle.
    ///
    /// Returns after the first shutdown request once the pipeline has
    /// finished, or early if the toolkit is unavailable. Requests made
    /// before the pipeline finishes are held, never lost.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<RunOutcome> {
        self.transition(ControllerState::Initializing);

        let sampler = ResourceSampler::new()?
            .with_window(Duration::from_millis(self.config.sample_window_ms));
        let work_dir = WorkDir::prepare(self.config.resolved_work_dir())?;

        let server = MetricsServer::start(self.bind_addr()?, self.registry()).await?;
        if self.echo {
            println!(
                "📊 Metrics: http://localhost:{}/metrics\n",
                server.local_addr().port()
            );
        }

        let toolkit_config = self.config.toolkit.clone();
        let probe = tokio::task::spawn_blocking(move || Toolkit::verify(&toolkit_config))
            .await
            .map_err(|e| MonitorError::Worker(e.to_string()))?;

        let toolkit = match probe {
            Ok(toolkit) => toolkit,
            Err(e) => {
                error!("Toolkit unavailable: {}", e);
                if self.echo {
                    println!(
                        "❌ Cannot run tasks: {}. Install it or set toolkit.program.",
                        e
                    );
                }
                self.transition(ControllerState::Terminating);
                server.shutdown().await;
                return Ok(RunOutcome::EnvironmentUnavailable(e.to_string()));
            }
        };

        self.transition(ControllerState::Running);
        if self.echo {
            println!("Running tasks:");
        }

        let mut pipeline =
            Pipeline::from_config(&self.config, &toolkit, self.registry(), Box::new(sampler));
        pipeline.set_echo(self.echo);
        let ctx = TaskContext::new(work_dir.path()).with_params(self.config.string_params());

        let summary = tokio::task::spawn_blocking(move || pipeline.run(&ctx))
            .await
            .map_err(|e| MonitorError::Worker(e.to_string()))?;

        if self.echo {
            print!("{}", render_summary(&summary, Local::now()));
            print!("{}", duration_chart(&summary.results));
            println!();
            println!("⏸  Running. Ctrl+C to exit...");
        }

        self.transition(ControllerState::IdleServing);
        if shutdown.is_requested() {
            info!("Shutdown was requested while tasks were running");
        }
        shutdown.requested().await;

        self.transition(ControllerState::Terminating);
        if self.echo {
            println!("\n👋 STOPPED");
        }

        self.clean_up(&work_dir, &mut shutdown).await;

        server.shutdown().await;
        info!("Monitor stopped");
        Ok(RunOutcome::Completed(summary))
    }

    /// Applies the cleanup policy. While the `ask` prompt waits for an
    /// answer, another shutdown request abandons it and keeps the files.
    async fn clean_up(&mut self, work_dir: &WorkDir, shutdown: &mut Shutdown) {
        let policy = self.config.cleanup;
        let finishing = work_dir.clone();
        let input = self.prompt_input.take();
        let echo = self.echo;

        let cleanup = tokio::task::spawn_blocking(move || match input {
            Some(mut input) => {
                let mut output: Box<dyn Write> = if echo {
                    Box::new(io::stdout())
                } else {
                    Box::new(io::sink())
                };
                finishing.finish_with(policy, &mut input, &mut output)
            }
            None => finishing.finish(policy),
        });

        let joined = match policy {
            CleanupPolicy::Ask => tokio::select! {
                biased;
                joined = cleanup => Some(joined),
                _ = shutdown.requested() => None,
            },
            CleanupPolicy::Always | CleanupPolicy::Never => Some(cleanup.await),
        };

        match joined {
            Some(Ok(Ok(true))) => {
                if echo {
                    println!("✓ Cleanup complete");
                }
            }
            Some(Ok(Ok(false))) => {}
            Some(Ok(Err(e))) => warn!("Cleanup failed: {}", e),
            Some(Err(e)) => warn!("Cleanup task failed: {}", e),
            None => {
                if echo {
                    println!();
                }
                warn!(
                    "Cleanup prompt interrupted, keeping {}",
                    work_dir.path().display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskDef, ToolkitConfig};
    use crate::monitoring::Counter;
    use crate::server::ShutdownTrigger;
    use tempfile::tempdir;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    fn config(work_dir: &std::path::Path, program: &str) -> PipelineConfig {
        let mut config = PipelineConfig::new();
        config.port = 0;
        config.bind_address = "127.0.0.1".to_string();
        config.work_dir = work_dir.to_path_buf();
        config.cleanup = CleanupPolicy::Never;
        config.toolkit = ToolkitConfig {
            program: program.to_string(),
            probe_args: vec!["-c".to_string(), "true".to_string()],
            run_args: Vec::new(),
            script_extension: "sh".to_string(),
        };
        config.add_task(TaskDef::new("ok", "true"));
        config.add_task(TaskDef::new("fails", "exit 2"));
        config
    }

    type RunHandle = JoinHandle<(ControllerState, Result<RunOutcome>)>;

    fn spawn_run(mut controller: Controller) -> (ShutdownTrigger, RunHandle) {
        controller.set_echo(false);
        let (trigger, shutdown) = Shutdown::channel();
        let handle = tokio::spawn(async move {
            let outcome = controller.run(shutdown).await;
            (controller.state(), outcome)
        });
        (trigger, handle)
    }

    async fn wait_for_state(states: &mut watch::Receiver<ControllerState>, state: ControllerState) {
        timeout(Duration::from_secs(10), states.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_new_controller_starts_initializing() {
        let temp = tempdir().unwrap();
        let controller = Controller::new(config(temp.path(), "bash"));
        assert_eq!(controller.state(), ControllerState::Initializing);
        assert_eq!(controller.registry().counter_value(Counter::TasksOk), 0);
    }

    #[test]
    fn test_bind_addr() {
        let temp = tempdir().unwrap();
        let mut cfg = config(temp.path(), "bash");
        cfg.port = 9091;
        assert_eq!(
            Controller::new(cfg.clone()).bind_addr().unwrap(),
            "127.0.0.1:9091".parse().unwrap()
        );

        cfg.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            Controller::new(cfg).bind_addr(),
            Err(MonitorError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ControllerState::IdleServing.to_string(), "idle-serving");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_toolkit_exits_early() {
        let temp = tempdir().unwrap();
        let mut controller = Controller::new(config(
            &temp.path().join("w"),
            "casa-monitor-no-such-launcher",
        ));
        controller.set_echo(false);
        let registry = controller.registry();
        let (_trigger, shutdown) = Shutdown::channel();

        let outcome = controller.run(shutdown).await.unwrap();

        assert!(matches!(outcome, RunOutcome::EnvironmentUnavailable(_)));
        assert_eq!(controller.state(), ControllerState::Terminating);
        assert_eq!(registry.counter_value(Counter::TasksOk), 0);
        assert_eq!(registry.counter_value(Counter::TasksFail), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_run_until_shutdown() {
        let temp = tempdir().unwrap();
        let mut cfg = config(&temp.path().join("w"), "bash");
        cfg.cleanup = CleanupPolicy::Always;
        let work_dir = cfg.work_dir.clone();

        let controller = Controller::new(cfg);
        let registry = controller.registry();
        let mut states = controller.watch_state();
        let (trigger, handle) = spawn_run(controller);

        wait_for_state(&mut states, ControllerState::IdleServing).await;
        assert_eq!(registry.counter_value(Counter::TasksOk), 1);
        assert_eq!(registry.counter_value(Counter::TasksFail), 1);
        assert!(work_dir.exists());

        trigger.trigger();
        let (state, outcome) = handle.await.unwrap();

        assert_eq!(state, ControllerState::Terminating);
        match outcome.unwrap() {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.total(), 2);
                assert_eq!(summary.succeeded(), 1);
                assert!(!summary.is_healthy());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!work_dir.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_during_run_waits_for_pipeline() {
        let temp = tempdir().unwrap();
        let mut cfg = config(&temp.path().join("w"), "bash");
        cfg.tasks.clear();
        cfg.add_task(TaskDef::new("slow", "sleep 1"));
        cfg.add_task(TaskDef::new("after", "touch {work_dir}/after.txt"));
        let work_dir = cfg.work_dir.clone();

        let controller = Controller::new(cfg);
        let registry = controller.registry();
        let mut states = controller.watch_state();
        let (trigger, mut handle) = spawn_run(controller);

        wait_for_state(&mut states, ControllerState::Running).await;
        trigger.trigger();

        // The request is held: the run is still going
        assert!(timeout(Duration::from_millis(300), &mut handle).await.is_err());
        assert_eq!(*states.borrow(), ControllerState::Running);

        let (state, outcome) = timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state, ControllerState::Terminating);
        match outcome.unwrap() {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.total(), 2);
                assert!(summary.is_healthy());
                assert!(summary.results[0].elapsed >= Duration::from_secs(1));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(registry.counter_value(Counter::TasksOk), 2);
        assert!(work_dir.join("after.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_request_abandons_cleanup_prompt() {
        use std::io::BufReader;
        use std::os::unix::net::UnixStream;

        let temp = tempdir().unwrap();
        let mut cfg = config(&temp.path().join("w"), "bash");
        cfg.cleanup = CleanupPolicy::Ask;
        let work_dir = cfg.work_dir.clone();

        // Nobody answers until `answer` is dropped
        let (answer, prompt) = UnixStream::pair().unwrap();
        let mut controller = Controller::new(cfg);
        controller.set_prompt_input(BufReader::new(prompt));
        let mut states = controller.watch_state();
        let (trigger, mut handle) = spawn_run(controller);

        wait_for_state(&mut states, ControllerState::IdleServing).await;
        trigger.trigger();
        wait_for_state(&mut states, ControllerState::Terminating).await;

        // Blocked on the prompt
        assert!(timeout(Duration::from_millis(300), &mut handle).await.is_err());

        trigger.trigger();
        let (state, outcome) = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state, ControllerState::Terminating);
        assert!(matches!(outcome.unwrap(), RunOutcome::Completed(_)));
        assert!(work_dir.exists());
        drop(answer);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_prompt_answer_removes_files() {
        use std::io::{BufReader, Write as _};
        use std::os::unix::net::UnixStream;

        let temp = tempdir().unwrap();
        let mut cfg = config(&temp.path().join("w"), "bash");
        cfg.cleanup = CleanupPolicy::Ask;
        let work_dir = cfg.work_dir.clone();

        let (mut answer, prompt) = UnixStream::pair().unwrap();
        let mut controller = Controller::new(cfg);
        controller.set_prompt_input(BufReader::new(prompt));
        let mut states = controller.watch_state();
        let (trigger, handle) = spawn_run(controller);

        wait_for_state(&mut states, ControllerState::IdleServing).await;
        trigger.trigger();
        wait_for_state(&mut states, ControllerState::Terminating).await;
        answer.write_all(b"y\n").unwrap();

        let (_, outcome) = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert!(!work_dir.exists());
    }
}
