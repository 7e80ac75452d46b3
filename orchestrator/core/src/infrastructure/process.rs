// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! tokio-backed [`ProcessRunner`].

use crate::domain::process::{ChildProcess, CommandOutput, CommandSpec, ProcessError, ProcessRunner};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        debug!("Running: {}", spec);
        let mut cmd = Self::command(spec);
        // A caller that stops awaiting (cancellation) must not leave the command behind.
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        if spec.verbose {
            // Let the tool write straight to the terminal.
            let status = cmd
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(|source| ProcessError::Spawn {
                    program: spec.program.clone(),
                    source,
                })?;
            return Ok(CommandOutput {
                exit_code: status.code(),
                ..Default::default()
            });
        }

        let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
        debug!("Spawning: {}", spec);
        let mut cmd = Self::command(spec);
        let output = if spec.verbose {
            Stdio::inherit
        } else {
            Stdio::null
        };
        cmd.stdin(Stdio::null()).stdout(output()).stderr(output());

        // Own process group: a Ctrl-C on the terminal must not reach the child
        // before we decide what to do with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(Box::new(TokioChild {
            program: spec.program.clone(),
            child,
        }))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

struct TokioChild {
    program: String,
    child: Child,
}

impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit_code(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll {} (pid {:?}): {}", self.program, self.child.id(), e);
                None
            }
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already reaped children report InvalidInput; nothing left to kill.
            debug!("Kill of {} skipped: {}", self.program, e);
        }
    }

    fn release(self: Box<Self>) -> Option<u32> {
        // Dropping a tokio Child without kill_on_drop leaves the process running.
        self.child.id()
    }
}
