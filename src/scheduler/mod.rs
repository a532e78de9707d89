//! Decides when backups run.
//!
//! The scheduler is an explicit state machine driven by [`Scheduler::step`]:
//!
//! ```text
//! Idle -> ComputeNextRun -> Sleep(at) -> Trigger -> ComputeNextRun -> ...
//! Idle -> Trigger -> Finished                      (no schedule configured)
//! ```
//!
//! Runs are awaited inline and the next fire time is computed from the clock
//! after the run returns, so ticks missed by a long run are dropped.
pub(crate) mod clock;
pub(crate) mod expression;

use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info};

use crate::backup::{BackupRunner, RunReport};
use crate::errors::SchedulingError;

pub use clock::{Clock, SystemClock};
pub use expression::CronSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    ComputeNextRun,
    Sleep(DateTime<Local>),
    Trigger,
    Finished,
}

pub struct Scheduler {
    schedule: Option<CronSchedule>,
    last_computed_next_run: Option<DateTime<Local>>,
    state: SchedulerState,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl Scheduler {
    /// Parses the optional cron expression. A malformed expression is fatal.
    pub fn new(
        expression: Option<&str>,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Result<Self, SchedulingError> {
        let schedule = expression.map(CronSchedule::parse).transpose()?;
        Ok(Scheduler {
            schedule,
            last_computed_next_run: None,
            state: SchedulerState::Idle,
            clock,
            span,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Performs one transition. Returns the report when the step triggered a run.
    pub async fn step(
        &mut self,
        runner: &dyn BackupRunner,
    ) -> Result<Option<RunReport>, SchedulingError> {
        let span = self.span.clone();
        self.transition(runner).instrument(span).await
    }

    async fn transition(
        &mut self,
        runner: &dyn BackupRunner,
    ) -> Result<Option<RunReport>, SchedulingError> {
        match self.state {
            SchedulerState::Idle => {
                self.state = match &self.schedule {
                    Some(schedule) => {
                        info!(schedule = schedule.expression(), "scheduling backups");
                        SchedulerState::ComputeNextRun
                    }
                    None => {
                        info!("no schedule configured, running backup immediately");
                        SchedulerState::Trigger
                    }
                };
                Ok(None)
            }
            SchedulerState::ComputeNextRun => {
                let Some(schedule) = &self.schedule else {
                    self.state = SchedulerState::Finished;
                    return Ok(None);
                };
                let now = self.clock.now();
                let Some(next_run) = schedule.next_after(&now) else {
                    self.state = SchedulerState::Finished;
                    return Err(SchedulingError::NoUpcomingRun(
                        schedule.expression().to_string(),
                    ));
                };
                info!(next_run = %next_run, "next backup scheduled");
                self.last_computed_next_run = Some(next_run);
                self.state = SchedulerState::Sleep(next_run);
                Ok(None)
            }
            SchedulerState::Sleep(deadline) => {
                self.clock.sleep_until(deadline).await;
                let now = self.clock.now();
                if now < deadline {
                    debug!(now = %now, deadline = %deadline, "woke before the deadline");
                } else {
                    self.state = SchedulerState::Trigger;
                }
                Ok(None)
            }
            SchedulerState::Trigger => {
                info!(scheduled_for = ?self.last_computed_next_run, "triggering backup run");
                let report = runner.run().await;
                self.state = if self.schedule.is_some() {
                    SchedulerState::ComputeNextRun
                } else {
                    SchedulerState::Finished
                };
                Ok(Some(report))
            }
            SchedulerState::Finished => Ok(None),
        }
    }

    /// Drives the machine until it finishes. With a schedule this only returns
    /// on a scheduling error; without one it returns the single run's report.
    pub async fn run_forever(
        &mut self,
        runner: &dyn BackupRunner,
    ) -> Result<Option<RunReport>, SchedulingError> {
        let mut last_report = None;
        while self.state() != SchedulerState::Finished {
            if let Some(report) = self.step(runner).await? {
                last_report = Some(report);
            }
        }
        Ok(last_report)
    }
}
