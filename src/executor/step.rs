//! Execute step
//!
//! Owns the step's result set across the run: loads and saves it, runs the
//! phase queue and merges what the guests report.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::ExecuteError;
use super::plugin::{ExecutePlugin, ExecuteStepData, ExecutionContext, PluginRegistry};
use super::queue::{Action, PhaseQueue, PLUGIN_ORDER};
use crate::guest::Guest;
use crate::models::{ResultOutcome, TestOrigin, TestResult};
use crate::results::{ResultsStorage, StepStatus};

fn storage_error(error: anyhow::Error) -> ExecuteError {
    ExecuteError::Execute(format!("{error:#}"))
}

/// `1 test`, `3 tests`
fn listed(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Step item scheduled by the queue
enum Phase {
    Action(Arc<Action>),
    Plugin,
}

/// Controller of the execute step
pub struct ExecuteStep {
    storage: ResultsStorage,
    data: Vec<ExecuteStepData>,
    context: Arc<ExecutionContext>,
    guests: Vec<Arc<dyn Guest>>,
    actions: Vec<Arc<Action>>,
    registry: PluginRegistry,
    plugin: Option<Arc<dyn ExecutePlugin>>,
    results: Vec<TestResult>,
    /// Results of tests not run again, merged back after the queue
    old_results: Vec<TestResult>,
    status: StepStatus,
    again: bool,
}

impl ExecuteStep {
    pub fn new(
        storage: ResultsStorage,
        data: Vec<ExecuteStepData>,
        context: Arc<ExecutionContext>,
        guests: Vec<Arc<dyn Guest>>,
    ) -> Self {
        Self {
            storage,
            data,
            context,
            guests,
            actions: Vec::new(),
            registry: PluginRegistry::default(),
            plugin: None,
            results: Vec::new(),
            old_results: Vec::new(),
            status: StepStatus::Todo,
            again: false,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run the step even if it is done already
    pub fn with_again(mut self, again: bool) -> Self {
        self.again = again;
        self
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Load saved results and status
    pub fn load(&mut self) -> Result<(), ExecuteError> {
        self.results = self.storage.load_results(true).map_err(storage_error)?;
        self.status = self.storage.load_status().map_err(storage_error)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ExecuteError> {
        self.storage
            .save_results(&self.results)
            .map_err(storage_error)?;
        self.storage
            .save_status(self.status)
            .map_err(storage_error)?;
        Ok(())
    }

    /// Load the saved state and build the execute plugin
    pub fn wake(&mut self) -> Result<(), ExecuteError> {
        if self.data.len() > 1 {
            return Err(ExecuteError::Specification(
                "Multiple execute steps defined.".to_string(),
            ));
        }

        self.load()?;

        let data = self.data.first().cloned().unwrap_or_default();
        let plugin = self.registry.delegate(data, self.context.clone())?;
        debug!("Execute method '{}'", plugin.how());
        self.plugin = Some(plugin);

        if self.status == StepStatus::Done && !self.again {
            debug!("Execute wake up complete (already done before).");
        } else {
            self.status = StepStatus::Todo;
            self.save()?;
        }

        Ok(())
    }

    /// Merge new results into the step's result set.
    ///
    /// A result replaces the one with the same identity in place. Pending
    /// results whose name prefixes the new result's name on the same guest
    /// and serial number are dropped.
    pub fn update_results(&mut self, results: Vec<TestResult>) {
        for result in results {
            self.results
                .retain(|existing| !existing.is_pending_parent_of(&result));

            let key = result.key();
            match self.results.iter_mut().find(|existing| existing.key() == key) {
                Some(existing) => *existing = result,
                None => self.results.push(result),
            }
        }
    }

    /// Pair stored results with the tests they belong to.
    ///
    /// Results of unknown tests are paired with `None`, as are tests without
    /// any stored result.
    pub fn results_for_tests<'a>(
        &'a self,
        tests: &'a [TestOrigin],
    ) -> Vec<(Option<&'a TestResult>, Option<&'a TestOrigin>)> {
        let known = |serial_number: u32| {
            tests
                .iter()
                .find(|origin| origin.test.serial_number == serial_number)
        };

        let mut pairs: Vec<_> = self
            .results
            .iter()
            .map(|result| (Some(result), known(result.serial_number)))
            .collect();

        pairs.extend(
            tests
                .iter()
                .filter(|origin| {
                    !self
                        .results
                        .iter()
                        .any(|result| result.serial_number == origin.test.serial_number)
                })
                .map(|origin| (None, Some(origin))),
        );

        pairs
    }

    /// Stored results, plus pending results for tests which have none
    pub fn create_results(&self, tests: &[TestOrigin]) -> Vec<TestResult> {
        let mut results = Vec::new();

        for (result, origin) in self.results_for_tests(tests) {
            if let Some(result) = result {
                results.push(result.clone());
                continue;
            }
            let Some(origin) = origin else {
                continue;
            };

            let test = &origin.test;
            for guest in self
                .guests
                .iter()
                .filter(|guest| test.enabled_on_guest(guest.name(), guest.role()))
            {
                let mut pending = TestResult::pending(&test.name, test.serial_number, guest.info());
                pending.fmf_id = Some(test.fmf_id());
                results.push(pending);
            }
        }

        results
    }

    /// Log how many tests were executed, skipped and left pending
    pub fn summary(&self) -> String {
        let count = |outcome: ResultOutcome| {
            self.results
                .iter()
                .filter(|result| result.result == outcome)
                .count()
        };
        let skipped = count(ResultOutcome::Skip);
        let pending = count(ResultOutcome::Pending);
        let executed = self.results.len() - skipped - pending;

        let mut message = vec![format!("{} executed", listed(executed, "test"))];
        if skipped > 0 {
            message.push(format!("{} skipped", listed(skipped, "test")));
        }
        if pending > 0 {
            message.push(format!("{} pending", listed(pending, "test")));
        }

        let message = message.join(", ");
        info!("summary: {}", message);
        message
    }

    /// Drop results of tests about to run again and keep the rest aside.
    ///
    /// Partial results belong to their test through its serial number and go
    /// with it. Pending results of those tests stay, real results replace
    /// them as they arrive.
    fn prepare_rerun(&mut self) {
        let tests = self.context.discover.tests(None, true);
        let runs_again = |result: &TestResult| {
            tests
                .iter()
                .any(|origin| origin.test.serial_number == result.serial_number)
        };

        let (pending, old): (Vec<_>, Vec<_>) = std::mem::take(&mut self.results)
            .into_iter()
            .filter(|result| result.is_pending() || !runs_again(result))
            .partition(|result| result.is_pending() && runs_again(result));

        self.results = pending;
        self.old_results = old;
    }

    /// Put results kept aside by [`Self::prepare_rerun`] back.
    ///
    /// Results of this run win over old ones of the same identity.
    fn merge_old_results(&mut self) {
        let old = std::mem::take(&mut self.old_results);
        for result in old {
            let key = result.key();
            let superseded = self.results.iter().any(|existing| {
                existing.key() == key || result.is_pending_parent_of(existing)
            });
            if superseded {
                debug!("Old result of '{}' superseded.", result.name);
                continue;
            }
            self.results.push(result);
        }
    }

    /// Run the step actions once on all guests, in their order
    async fn actions(&self) -> Result<(), ExecuteError> {
        let mut actions = self.actions.clone();
        actions.sort_by_key(|action| action.order);
        for action in actions {
            action.go(&self.guests).await?;
        }
        Ok(())
    }

    /// Build the queue: actions and one plugin task per enabled discover
    /// phase, ordered by their `order`
    fn queue(&self, plugin: &Arc<dyn ExecutePlugin>) -> PhaseQueue {
        let mut phases: Vec<(i32, Phase)> = vec![(PLUGIN_ORDER, Phase::Plugin)];
        phases.extend(
            self.actions
                .iter()
                .map(|action| (action.order, Phase::Action(action.clone()))),
        );
        phases.sort_by_key(|(order, _)| *order);

        let mut queue = PhaseQueue::new("execute", plugin.data().max_workers);

        for (_, phase) in phases {
            match phase {
                Phase::Action(action) => queue.enqueue_action(action, self.guests.clone()),
                Phase::Plugin => {
                    for discover in self.context.discover.phases() {
                        if !discover.enabled_by_when() {
                            debug!("Discover phase '{}' disabled by 'when'.", discover.name);
                            continue;
                        }

                        let guests = self
                            .guests
                            .iter()
                            .filter(|guest| discover.enabled_on_guest(guest.name(), guest.role()))
                            .cloned()
                            .collect();
                        queue.enqueue_plugin(plugin.clone(), discover.name.clone(), guests);
                    }
                }
            }
        }

        queue
    }

    /// Execute tests
    pub async fn go(&mut self, force: bool) -> Result<(), ExecuteError> {
        if self.plugin.is_none() {
            self.wake()?;
        }

        let should_run_again = self.again || force;

        if force {
            self.results.clear();
            let tests = self.context.discover.tests(None, true);
            self.results = self.create_results(&tests);
            self.save()?;
        }

        if should_run_again {
            self.status = StepStatus::Todo;
        }

        if self.status == StepStatus::Done {
            info!("status: done");
            self.summary();
            return self.actions().await;
        }

        if self.guests.is_empty() {
            return Err(ExecuteError::Execute(
                "No guests available for execution.".to_string(),
            ));
        }

        let plugin = match &self.plugin {
            Some(plugin) => plugin.clone(),
            None => {
                return Err(ExecuteError::Execute(
                    "Execute plugin is not ready.".to_string(),
                ))
            }
        };

        if should_run_again {
            self.prepare_rerun();
        }

        let queue = self.queue(&plugin);
        let stop = queue.stopper();
        let mut failed_tasks = Vec::new();

        // After an abort, guests still running finish and report, but their
        // failures no longer count.
        let mut outcomes = Box::pin(queue.run());
        while let Some(outcome) = outcomes.next().await {
            self.update_results(outcome.results);

            let Some(exc) = outcome.error else {
                continue;
            };

            outcome.span.in_scope(|| error!("{}", exc.report()));

            if stop.is_stopped() {
                continue;
            }

            if exc.is_abort() {
                warn!("Execution aborted, remaining phases are skipped.");
                stop.stop();
                continue;
            }

            failed_tasks.push(exc);
        }

        self.summary();
        if failed_tasks.is_empty() {
            self.status = StepStatus::Done;
        }

        if should_run_again {
            self.merge_old_results();
        }

        self.save()?;

        if failed_tasks.is_empty() {
            Ok(())
        } else {
            Err(ExecuteError::General {
                message: "execute step failed".to_string(),
                causes: failed_tasks,
            })
        }
    }
}
