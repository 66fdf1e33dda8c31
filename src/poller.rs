use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{
    decode::prepare_request, executor::execute_with, Executor, HttpExecutor, RequestError,
    RequestModel, RequestSpec, Result, ScheduledTimerSet,
};

/// Lifecycle of the run owned by a [`RequestPoller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No run has been started.
    Idle,
    /// Polling timers are scheduled.
    Polling,
    /// The result request is in flight, directly or as a fallback.
    AwaitingResult,
    Succeeded,
    Failed,
    /// Ended by [`RequestPoller::stop_polling`].
    Stopped,
}

impl RunState {
    /// A run in this state still owns timers or an in-flight request.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Polling | Self::AwaitingResult)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

type AbandonHook = Box<dyn FnOnce() + Send>;

struct PendingRun {
    started_at: Instant,
    overall_timeout: Duration,
    timers: ScheduledTimerSet,
    /// Drops the run's result sender without resolving it.
    abandon: AbandonHook,
}

struct RunSlot {
    state: RunState,
    /// Bumped on every `start`. Completions carrying an older value are stale.
    generation: u64,
    pending: Option<PendingRun>,
}

impl RunSlot {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state.is_active()
    }

    fn terminate(&mut self, state: RunState) -> Option<PendingRun> {
        self.state = state;
        self.pending.take().map(|mut run| {
            run.timers.cancel_all();
            run
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Completion<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> Completion<T> {
    fn new(sender: oneshot::Sender<Result<T>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn resolve(&self, outcome: Result<T>) {
        if let Some(sender) = lock(&self.sender).take() {
            // The caller may have dropped its handle; nothing to report then.
            let _ = sender.send(outcome);
        }
    }

    fn abandon(&self) {
        lock(&self.sender).take();
    }
}

/// Outcome of one run started with [`RequestPoller::start`].
///
/// Resolves exactly once: to the decoded value, to the first error, or to
/// [`RequestError::Stopped`] when the run was stopped.
#[must_use = "the run's outcome is only observable by awaiting it"]
pub struct PollingRun<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> fmt::Debug for PollingRun<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingRun").finish_non_exhaustive()
    }
}

impl<T> Future for PollingRun<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(RequestError::Stopped)))
    }
}

/// State shared by the timers and requests of a single run.
struct RunContext<E, T> {
    executor: Arc<E>,
    model: Arc<RequestModel>,
    slot: Arc<Mutex<RunSlot>>,
    generation: u64,
    completion: Arc<Completion<T>>,
}

impl<E, T> Clone for RunContext<E, T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            model: Arc::clone(&self.model),
            slot: Arc::clone(&self.slot),
            generation: self.generation,
            completion: Arc::clone(&self.completion),
        }
    }
}

impl<E, T> RunContext<E, T>
where
    E: Executor,
    T: DeserializeOwned + Send + 'static,
{
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn on_timer_fired(&self, attempt: usize) {
        let Some(schedule) = self.model.polling.as_ref() else {
            return;
        };

        let slot = lock(&self.slot);
        // The run may have ended between scheduling and firing.
        if !self.is_polling(&slot) {
            return;
        }
        if past_deadline(&slot) {
            self.expire(slot);
            return;
        }

        drop(slot);
        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, generation = self.generation, "polling attempt");
        self.spawn_request(schedule.polling_request(), Phase::Poll);
    }

    fn on_deadline(&self) {
        let slot = lock(&self.slot);
        if self.is_polling(&slot) {
            self.expire(slot);
        }
    }

    fn is_polling(&self, slot: &RunSlot) -> bool {
        slot.generation == self.generation && slot.state == RunState::Polling
    }

    /// Ends the polling phase once the overall timeout has elapsed.
    ///
    /// With fallback enabled the run moves to a new generation before the
    /// result request goes out, so polls still in flight can no longer
    /// settle it.
    fn expire(&self, mut slot: MutexGuard<'_, RunSlot>) {
        let Some(schedule) = self.model.polling.as_ref() else {
            return;
        };
        if let Some(run) = slot.pending.as_mut() {
            run.timers.cancel_all();
        }

        if !schedule.fallback_to_result_on_timeout {
            #[cfg(feature = "tracing")]
            tracing::warn!(generation = self.generation, "polling timed out without fallback");
            self.settle(
                slot,
                Err(RequestError::TimeoutExhausted {
                    timeout_secs: schedule.overall_timeout_secs,
                }),
            );
            return;
        }

        slot.generation = slot.generation.wrapping_add(1);
        slot.state = RunState::AwaitingResult;
        let fallback = Self {
            generation: slot.generation,
            ..self.clone()
        };
        drop(slot);
        #[cfg(feature = "tracing")]
        tracing::info!(generation = fallback.generation, "polling timed out, requesting result");
        fallback.spawn_request(self.model.result.clone(), Phase::Result);
    }

    /// Runs the request on its own task so cancelling timers never aborts it.
    fn spawn_request(&self, spec: RequestSpec, phase: Phase) {
        let context = self.clone();
        tokio::spawn(async move {
            let outcome = execute_with(
                &*context.executor,
                &spec,
                context.model.body.as_ref(),
                &context.model.headers,
            )
            .await;
            match phase {
                Phase::Poll => context.finish_poll(outcome),
                Phase::Result => context.finish(outcome),
            }
        });
    }

    /// A poll that completes after the overall timeout does not settle the
    /// run; the timeout handling does.
    fn finish_poll(&self, outcome: Result<T>) {
        let slot = lock(&self.slot);
        if self.is_polling(&slot) && past_deadline(&slot) {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation = self.generation, "poll completed past the deadline");
            self.expire(slot);
            return;
        }
        drop(slot);
        self.finish(outcome);
    }

    /// Ends the run with `outcome` unless it already ended.
    ///
    /// A request dispatched before the run was stopped, failed, timed out or
    /// restarted can still complete afterwards. Such completions are dropped
    /// here, so the caller hears about each run exactly once.
    fn finish(&self, outcome: Result<T>) {
        let slot = lock(&self.slot);
        if !slot.is_current(self.generation) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                generation = self.generation,
                "discarding completion of a finished run"
            );
            return;
        }
        self.settle(slot, outcome);
    }

    fn settle(&self, mut slot: MutexGuard<'_, RunSlot>, outcome: Result<T>) {
        let state = if outcome.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(_) => tracing::debug!(generation = self.generation, "run succeeded"),
            Err(err) => tracing::debug!(generation = self.generation, error = %err, "run failed"),
        }
        let ended = slot.terminate(state);
        drop(slot);
        drop(ended);
        self.completion.resolve(outcome);
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Poll,
    Result,
}

fn past_deadline(slot: &RunSlot) -> bool {
    slot.pending
        .as_ref()
        .is_some_and(|run| run.started_at.elapsed() >= run.overall_timeout)
}

/// Drives one polling run at a time: schedules status checks against the
/// polling target, then fetches the result.
///
/// Must be used from within a Tokio runtime.
pub struct RequestPoller<E = HttpExecutor> {
    executor: Arc<E>,
    model: Arc<RequestModel>,
    slot: Arc<Mutex<RunSlot>>,
}

impl<E> fmt::Debug for RequestPoller<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPoller")
            .field("model", &self.model)
            .field("state", &lock(&self.slot).state)
            .finish()
    }
}

impl RequestPoller<HttpExecutor> {
    /// Creates a poller that talks HTTP through a default [`HttpExecutor`].
    pub fn new(model: RequestModel) -> Self {
        Self::with_executor(model, HttpExecutor::new())
    }
}

impl<E: Executor> RequestPoller<E> {
    pub fn with_executor(model: RequestModel, executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            model: Arc::new(model),
            slot: Arc::new(Mutex::new(RunSlot {
                state: RunState::Idle,
                generation: 0,
                pending: None,
            })),
        }
    }

    pub fn model(&self) -> &RequestModel {
        &self.model
    }

    pub fn state(&self) -> RunState {
        lock(&self.slot).state
    }

    /// Starts a run and returns immediately.
    ///
    /// Without a polling schedule the result request is issued right away.
    /// Otherwise one timer per scheduled delay is registered; each firing
    /// polls the target. One more timer fires at the overall timeout and
    /// ends the schedule with the fallback result request or a timeout
    /// error. The first polling outcome, success or failure, ends the run.
    ///
    /// A second `start` while a run is active resolves to
    /// [`RequestError::RunInProgress`] and leaves the active run alone.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start<T>(&self) -> PollingRun<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let run = PollingRun { receiver };

        let mut slot = lock(&self.slot);
        if slot.state.is_active() {
            drop(slot);
            let _ = sender.send(Err(RequestError::RunInProgress));
            return run;
        }

        slot.generation = slot.generation.wrapping_add(1);
        let completion = Arc::new(Completion::new(sender));
        let context = RunContext {
            executor: Arc::clone(&self.executor),
            model: Arc::clone(&self.model),
            slot: Arc::clone(&self.slot),
            generation: slot.generation,
            completion: Arc::clone(&completion),
        };
        let abandon: AbandonHook = Box::new(move || completion.abandon());

        let Some(schedule) = self.model.polling.as_ref() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation = slot.generation, "no polling schedule, requesting result");
            slot.state = RunState::AwaitingResult;
            slot.pending = Some(PendingRun {
                started_at: Instant::now(),
                overall_timeout: Duration::ZERO,
                timers: ScheduledTimerSet::new(),
                abandon,
            });
            drop(slot);
            context.spawn_request(self.model.result.clone(), Phase::Result);
            return run;
        };

        let plan = schedule.delays().and_then(|delays| {
            prepare_request(
                &schedule.polling_request(),
                self.model.body.as_ref(),
                &self.model.headers,
            )?;
            Ok((delays, schedule.overall_timeout()?))
        });
        let (delays, overall_timeout) = match plan {
            Ok(plan) => plan,
            Err(err) => {
                slot.state = RunState::Failed;
                drop(slot);
                context.completion.resolve(Err(err));
                return run;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            generation = slot.generation,
            attempts = delays.len(),
            "polling run started"
        );

        let started_at = Instant::now();
        let mut timers = ScheduledTimerSet::new();
        for (attempt, delay) in delays.into_iter().enumerate() {
            let context = context.clone();
            timers.schedule(delay, move || context.on_timer_fired(attempt));
        }
        timers.schedule(overall_timeout, move || context.on_deadline());
        slot.state = RunState::Polling;
        slot.pending = Some(PendingRun {
            started_at,
            overall_timeout,
            timers,
            abandon,
        });

        run
    }

    /// Callback form of [`RequestPoller::start`].
    ///
    /// At most one callback runs. A stopped run invokes neither.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start_with_callbacks<T, S, F>(&self, on_success: S, on_failure: F)
    where
        T: DeserializeOwned + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(RequestError) + Send + 'static,
    {
        let run = self.start::<T>();
        tokio::spawn(async move {
            match run.await {
                Ok(value) => on_success(value),
                Err(RequestError::Stopped) => {}
                Err(err) => on_failure(err),
            }
        });
    }

    /// Cancels every timer that has not fired and ends the active run.
    ///
    /// Requests already in flight are not aborted, but their outcomes are
    /// discarded. Neither callback is invoked. No-op without an active run.
    pub fn stop_polling(&self) {
        let stopped = {
            let mut slot = lock(&self.slot);
            if !slot.state.is_active() {
                return;
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(generation = slot.generation, "stopping polling run");
            slot.terminate(RunState::Stopped)
        };
        if let Some(run) = stopped {
            (run.abandon)();
        }
    }

    /// Issues the result request on its own, independent of any run.
    pub async fn make_result_request_after_polling<T: DeserializeOwned>(&self) -> Result<T> {
        execute_with(
            &*self.executor,
            &self.model.result,
            self.model.body.as_ref(),
            &self.model.headers,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::{
        decode::PreparedRequest, Executor, PollingSchedule, RequestError, RequestModel,
        RequestPoller, RequestSpec, Result, RunState,
    };

    struct Unreachable;

    #[async_trait]
    impl Executor for Unreachable {
        async fn send(&self, _request: PreparedRequest) -> Result<Vec<u8>> {
            Err(RequestError::Transport("unreachable".to_owned()))
        }
    }

    #[test]
    fn run_state_classification() {
        assert!(RunState::Polling.is_active());
        assert!(RunState::AwaitingResult.is_active());
        assert!(!RunState::Idle.is_active());
        assert!(!RunState::Idle.is_terminal());
        for state in [RunState::Succeeded, RunState::Failed, RunState::Stopped] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[tokio::test]
    async fn invalid_schedule_fails_before_any_request() {
        let model = RequestModel::new(RequestSpec::new("https://jobs.example/result"))
            .with_polling(PollingSchedule::equal(RequestSpec::default(), 10.0));
        let poller = RequestPoller::with_executor(model, Unreachable);

        let err = poller
            .start::<serde_json::Value>()
            .await
            .expect_err("must fail");

        assert!(matches!(err, RequestError::Configuration(msg) if msg.contains("URL")));
        assert_eq!(poller.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn stop_without_run_is_noop() {
        let poller = RequestPoller::with_executor(
            RequestModel::new(RequestSpec::new("https://jobs.example/result")),
            Unreachable,
        );
        poller.stop_polling();
        assert_eq!(poller.state(), RunState::Idle);
    }
}
