//! Session driver
//!
//! Runs the trace script against any [`DebugControl`]: configure, break, run,
//! until, then poll the pc and trace or finish until the first error.

use std::io::Write;

use crate::analysis::policy::{AddressPolicy, StepAction};
use crate::core::debugger::DebugError;
use crate::core::trace::{dump_state, TraceLog};
use crate::debug::types::{BreakLocation, SessionSettings, SessionState};
use crate::debug::DebugControl;

/// What the session does before the stepping loop
#[derive(Debug, Clone, Default)]
pub struct LaunchPlan {
    pub settings: SessionSettings,
    pub breakpoint: Option<BreakLocation>,
    pub until: Option<u64>,
    /// Cap on loop iterations; `None` runs until the first error
    pub max_steps: Option<u64>,
}

/// Why the stepping loop ended
#[derive(Debug)]
pub enum EndReason {
    /// The target went away
    Terminated { reason: String },
    /// Any other error inside an iteration
    Failed { error: DebugError },
    /// `max_steps` iterations completed
    StepLimit,
}

#[derive(Debug)]
pub struct SessionReport {
    pub iterations: u64,
    /// Traced single-steps
    pub steps: u64,
    pub finishes: u64,
    /// Whether the final dump succeeded
    pub final_dump: bool,
    pub end: EndReason,
}

pub struct Session<D: DebugControl, W: Write> {
    debugger: D,
    trace: TraceLog<W>,
    policy: AddressPolicy,
    plan: LaunchPlan,
    state: SessionState,
    iterations: u64,
    steps: u64,
    finishes: u64,
}

impl<D: DebugControl, W: Write> Session<D, W> {
    pub fn new(debugger: D, trace: TraceLog<W>, policy: AddressPolicy, plan: LaunchPlan) -> Self {
        Self {
            debugger,
            trace,
            policy,
            plan,
            state: SessionState::Configuring,
            iterations: 0,
            steps: 0,
            finishes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn debugger(&self) -> &D {
        &self.debugger
    }

    pub fn trace(&self) -> &TraceLog<W> {
        &self.trace
    }

    pub fn into_parts(self) -> (D, TraceLog<W>) {
        (self.debugger, self.trace)
    }

    /// Drive the session to completion.
    ///
    /// Errors before the stepping loop abort the session and are returned.
    /// Errors inside the loop end it normally and are recorded in the report.
    pub fn run(&mut self) -> Result<SessionReport, DebugError> {
        self.state = SessionState::Configuring;
        log::info!("Configuring session");
        self.debugger.configure(&self.plan.settings)?;
        if let Some(location) = self.plan.breakpoint.clone() {
            self.debugger.set_breakpoint(&location)?;
        }

        self.state = SessionState::Running;
        let stop = self.debugger.run()?;
        log::info!("Target stopped: {:?}", stop);
        if let Some(address) = self.plan.until {
            let stop = self.debugger.run_until(address)?;
            log::info!("Until {:#x}: {:?}", address, stop);
        }

        self.state = SessionState::Stepping;
        log::info!("Stepping with policy {}", self.policy);
        let end = loop {
            if let Some(limit) = self.plan.max_steps {
                if self.iterations >= limit {
                    break EndReason::StepLimit;
                }
            }

            if let Err(error) = self.iterate() {
                log::info!("Stepping stopped after {} iterations: {}", self.iterations, error);
                break match error {
                    DebugError::SessionTerminated { reason } => EndReason::Terminated { reason },
                    error => EndReason::Failed { error },
                };
            }
        };

        let final_dump = match end {
            EndReason::StepLimit => false,
            _ => self.final_dump(),
        };

        self.state = SessionState::Finished;
        self.trace.flush()?;

        Ok(SessionReport {
            iterations: self.iterations,
            steps: self.steps,
            finishes: self.finishes,
            final_dump,
            end,
        })
    }

    fn iterate(&mut self) -> Result<(), DebugError> {
        self.iterations += 1;
        let pc = self.debugger.pc()?;
        let action = self.policy.classify(pc);
        log::trace!("#{} pc={:#x} -> {}", self.iterations, pc, action);

        match action {
            StepAction::Finish => {
                self.debugger.finish()?;
                self.finishes += 1;
            }
            StepAction::Trace => {
                dump_state(&mut self.debugger, &mut self.trace)?;
                self.debugger.step_instruction()?;
                self.steps += 1;
            }
        }
        self.copy_console()?;
        Ok(())
    }

    /// Append the backend's console chatter ("Run till exit from ...") to the trace
    fn copy_console(&mut self) -> Result<(), DebugError> {
        if let Some(text) = self.debugger.drain_console() {
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                self.trace.line(line)?;
            }
        }
        Ok(())
    }

    /// One best-effort dump of the last known state
    fn final_dump(&mut self) -> bool {
        match dump_state(&mut self.debugger, &mut self.trace) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("final dump failed: {}", e);
                false
            }
        }
    }
}
