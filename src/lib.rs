//! `request-poller` drives a bounded, time-scheduled sequence of status
//! checks against a remote job, then fetches the job's result.
//!
//! - [`RequestModel`] describes the run: an optional [`PollingSchedule`],
//!   the result [`RequestSpec`], and a shared body and headers.
//! - [`RequestPoller::start`] schedules the attempts and returns a
//!   [`PollingRun`] that resolves exactly once.
//! - [`RequestPoller::stop_polling`] cancels attempts that have not fired.
//! - [`HttpExecutor`] performs the HTTP calls; any [`Executor`] can stand in.

mod decode;
mod error;
mod executor;
mod model;
mod options;
mod poller;
mod timers;

pub use decode::PreparedRequest;
pub use error::{RequestError, ERROR_DOMAIN};
pub use executor::{Executor, HttpExecutor};
pub use model::{DelayMode, PollingSchedule, RequestModel, RequestSpec, MAX_SCHEDULED_ATTEMPTS};
pub use options::ClientOptions;
pub use poller::{PollingRun, RequestPoller, RunState};
pub use timers::{ScheduledTimerSet, TimerHandle};

pub use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, RequestError>;
