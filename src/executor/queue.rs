//! Phase queue
//!
//! Runs queued tasks in order. A plugin task fans out over its guests, which
//! run concurrently within a bounded worker pool; the next task starts only
//! once every outcome of the current one has been reported.

use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument, Span};

use super::error::ExecuteError;
use super::plugin::{ExecutePlugin, PhaseRun};
use crate::guest::{ExecuteOptions, Guest};
use crate::models::TestResult;

/// Order of the execute plugin among the step phases
pub const PLUGIN_ORDER: i32 = 50;

fn default_order() -> i32 {
    PLUGIN_ORDER
}

/// Command run once on every guest between plugin phases
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub command: String,
    #[serde(default = "default_order")]
    pub order: i32,
}

impl Action {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            order: PLUGIN_ORDER,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Run the action on the guests, one after another
    pub async fn go(&self, guests: &[Arc<dyn Guest>]) -> Result<(), ExecuteError> {
        for guest in guests {
            info!("Action '{}' on guest {}", self.name, guest.name());
            guest
                .execute(&self.command, &ExecuteOptions::default(), None)
                .await?;
        }
        Ok(())
    }
}

/// Action bound to the guests it runs on
pub struct ActionTask {
    pub action: Arc<Action>,
    pub guests: Vec<Arc<dyn Guest>>,
}

/// Execute plugin bound to one discover phase and its guests
pub struct PluginTask {
    pub plugin: Arc<dyn ExecutePlugin>,
    pub discover_phase: String,
    pub guests: Vec<Arc<dyn Guest>>,
}

pub enum Task {
    Action(ActionTask),
    Plugin(PluginTask),
}

impl Task {
    pub fn name(&self) -> String {
        match self {
            Task::Action(task) => task.action.name.clone(),
            Task::Plugin(task) => task.discover_phase.clone(),
        }
    }
}

/// Outcome of one unit of work
#[derive(Debug)]
pub struct TaskOutcome {
    /// Span the work was logged in
    pub span: Span,
    /// Action name or discover phase
    pub phase: String,
    /// Guest the plugin ran on, `None` for actions
    pub guest: Option<String>,
    pub results: Vec<TestResult>,
    pub error: Option<ExecuteError>,
}

impl TaskOutcome {
    pub fn is_abort(&self) -> bool {
        self.error.as_ref().is_some_and(ExecuteError::is_abort)
    }
}

/// Join handle aborting its task when dropped
struct Job(JoinHandle<TaskOutcome>);

impl Future for Job {
    type Output = Result<TaskOutcome, tokio::task::JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Keeps a running queue from starting further tasks
#[derive(Clone, Debug, Default)]
pub struct QueueStop(Arc<AtomicBool>);

impl QueueStop {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct QueueState {
    tasks: VecDeque<Task>,
    stop: QueueStop,
    running: FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
    workers: Arc<Semaphore>,
}

impl QueueState {
    fn start(&mut self, task: Task) {
        match task {
            Task::Action(task) => {
                let span = info_span!("action", name = %task.action.name);
                let phase = task.action.name.clone();
                let job = {
                    let outcome_span = span.clone();
                    tokio::spawn(
                        async move {
                            let error = task.action.go(&task.guests).await.err();
                            TaskOutcome {
                                span: outcome_span,
                                phase: task.action.name.clone(),
                                guest: None,
                                results: Vec::new(),
                                error,
                            }
                        }
                        .instrument(span.clone()),
                    )
                };
                self.running.push(supervise(job, span, phase, None));
            }
            Task::Plugin(task) => {
                debug!(
                    "Phase '{}' on {} guests",
                    task.discover_phase,
                    task.guests.len()
                );

                for guest in task.guests {
                    let plugin = task.plugin.clone();
                    let phase = task.discover_phase.clone();
                    let workers = self.workers.clone();
                    let guest_name = guest.name().to_string();
                    let span = info_span!("phase", phase = %phase, guest = %guest_name);

                    let job = {
                        let outcome_span = span.clone();
                        let phase = phase.clone();
                        let guest_name = guest_name.clone();
                        tokio::spawn(
                            async move {
                                let run = match workers.acquire_owned().await {
                                    Ok(_permit) => plugin.go(&phase, guest).await,
                                    Err(_) => PhaseRun {
                                        results: Vec::new(),
                                        error: Some(ExecuteError::Execute(
                                            "Worker pool closed.".to_string(),
                                        )),
                                    },
                                };
                                TaskOutcome {
                                    span: outcome_span,
                                    phase,
                                    guest: Some(guest_name),
                                    results: run.results,
                                    error: run.error,
                                }
                            }
                            .instrument(span.clone()),
                        )
                    };
                    self.running
                        .push(supervise(job, span, phase, Some(guest_name)));
                }
            }
        }
    }
}

/// Turn a panicked or cancelled job into a failed outcome
fn supervise(
    job: JoinHandle<TaskOutcome>,
    span: Span,
    phase: String,
    guest: Option<String>,
) -> BoxFuture<'static, TaskOutcome> {
    Job(job)
        .map(move |joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome {
                span,
                phase,
                guest,
                results: Vec::new(),
                error: Some(ExecuteError::Execute(format!("Task failed: {e}"))),
            },
        })
        .boxed()
}

/// Ordered queue of actions and plugin tasks
pub struct PhaseQueue {
    name: String,
    tasks: VecDeque<Task>,
    max_workers: usize,
    stop: QueueStop,
}

impl PhaseQueue {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            tasks: VecDeque::new(),
            max_workers: max_workers.max(1),
            stop: QueueStop::default(),
        }
    }

    pub fn enqueue_action(&mut self, action: Arc<Action>, guests: Vec<Arc<dyn Guest>>) {
        self.tasks
            .push_back(Task::Action(ActionTask { action, guests }));
    }

    pub fn enqueue_plugin(
        &mut self,
        plugin: Arc<dyn ExecutePlugin>,
        discover_phase: impl Into<String>,
        guests: Vec<Arc<dyn Guest>>,
    ) {
        self.tasks.push_back(Task::Plugin(PluginTask {
            plugin,
            discover_phase: discover_phase.into(),
            guests,
        }));
    }

    /// Handle stopping the queue once it runs
    pub fn stopper(&self) -> QueueStop {
        self.stop.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run the queued tasks, yielding one outcome per finished unit of work.
    ///
    /// Once stopped, work in flight is still reported but no further task
    /// starts. Dropping the stream cancels work in flight.
    pub fn run(self) -> impl Stream<Item = TaskOutcome> + Send {
        debug!("Queue '{}' runs {} tasks", self.name, self.tasks.len());

        let state = QueueState {
            tasks: self.tasks,
            stop: self.stop,
            running: FuturesUnordered::new(),
            workers: Arc::new(Semaphore::new(self.max_workers)),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(outcome) = state.running.next().await {
                    return Some((outcome, state));
                }

                if state.stop.is_stopped() {
                    debug!("Queue stopped, {} tasks left unstarted", state.tasks.len());
                    return None;
                }

                let task = state.tasks.pop_front()?;
                debug!("Starting task '{}'", task.name());
                state.start(task);
            }
        })
    }
}
