// Copyright (c) 2026 HIL-Bridge Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The breakpoint handoff sequence: reset, halt, flash, arm, run to the
//! breakpoint, transfer state, release the emulator. Strictly sequential
//! and single-owner; the machine is driven by one actor (the session) and
//! every transition checks the current state first.

use std::path::Path;

use log::info;
use thiserror::Error;

use crate::emulator::Emulator;
use crate::sync::{self, EmulatorCpu, SyncDirection, SyncError, SyncSnapshot, TargetCpu};
use crate::transport::{DebugTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Idle,
    TargetHalted,
    ImageFlashed,
    BreakpointArmed,
    TargetRunning,
    TargetHaltedAtBreakpoint,
    Synchronized,
    Stopped,
}

/// A transition was attempted from the wrong state. Unreachable in a
/// correct driver; treated as fatal, not retried.
#[derive(Debug, Error)]
#[error("handoff protocol violation: {operation} requires {expected:?}, machine is in {actual:?}")]
pub struct HandoffProtocolError {
    pub operation: &'static str,
    pub expected: HandoffState,
    pub actual: HandoffState,
}

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error(transparent)]
    Protocol(#[from] HandoffProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("emulator error: {0}")]
    Emulator(String),
}

pub struct HandoffMachine {
    state: HandoffState,
    /// Last state a transition fully completed into; a failed phase can be
    /// retried from here.
    last_completed: HandoffState,
    entry_breakpoint: u64,
    /// The breakpoint currently set on the target, if any.
    armed: Option<u64>,
}

impl HandoffMachine {
    pub fn new(entry_breakpoint: u64) -> Self {
        Self {
            state: HandoffState::Idle,
            last_completed: HandoffState::Idle,
            entry_breakpoint,
            armed: None,
        }
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    pub fn last_completed(&self) -> HandoffState {
        self.last_completed
    }

    pub fn armed_breakpoint(&self) -> Option<u64> {
        self.armed
    }

    fn expect(
        &self,
        operation: &'static str,
        expected: HandoffState,
    ) -> Result<(), HandoffProtocolError> {
        if self.state != expected {
            return Err(HandoffProtocolError {
                operation,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn complete(&mut self, state: HandoffState) {
        self.state = state;
        self.last_completed = state;
    }

    /// Idle -> TargetHalted.
    pub fn attach_halt(&mut self, target: &mut dyn DebugTransport) -> Result<(), HandoffError> {
        self.expect("attach_halt", HandoffState::Idle)?;
        target.halt()?;
        self.complete(HandoffState::TargetHalted);
        Ok(())
    }

    /// TargetHalted -> ImageFlashed. Image verification is the probe's job.
    pub fn flash_image(
        &mut self,
        target: &mut dyn DebugTransport,
        image: &Path,
    ) -> Result<(), HandoffError> {
        self.expect("flash_image", HandoffState::TargetHalted)?;
        info!("flashing {}", image.display());
        target.flash_image(image)?;
        self.complete(HandoffState::ImageFlashed);
        Ok(())
    }

    /// ImageFlashed -> BreakpointArmed.
    pub fn arm_breakpoint(&mut self, target: &mut dyn DebugTransport) -> Result<(), HandoffError> {
        self.expect("arm_breakpoint", HandoffState::ImageFlashed)?;
        target.set_breakpoint(self.entry_breakpoint)?;
        self.armed = Some(self.entry_breakpoint);
        self.complete(HandoffState::BreakpointArmed);
        Ok(())
    }

    /// BreakpointArmed -> TargetRunning -> TargetHaltedAtBreakpoint. The
    /// wait is the transport's own blocking call; no polling.
    pub fn run_to_breakpoint(
        &mut self,
        target: &mut dyn DebugTransport,
    ) -> Result<(), HandoffError> {
        self.expect("run_to_breakpoint", HandoffState::BreakpointArmed)?;
        target.reset()?;
        self.state = HandoffState::TargetRunning;
        target.wait_for_halt()?;
        let pc = target.read_register("pc")?;
        info!("target halted at 0x{:08x}", pc);
        self.complete(HandoffState::TargetHaltedAtBreakpoint);
        Ok(())
    }

    /// TargetHaltedAtBreakpoint -> Synchronized. Memory before registers,
    /// then the emulator is released.
    pub fn synchronize(
        &mut self,
        target: &mut dyn DebugTransport,
        emulator: &mut dyn Emulator,
        ranges: &[(u64, usize)],
    ) -> Result<SyncSnapshot, HandoffError> {
        self.expect("synchronize", HandoffState::TargetHaltedAtBreakpoint)?;
        let snapshot = sync::snapshot_from(
            &mut TargetCpu(target),
            ranges,
            SyncDirection::TargetToEmulator,
        )?;
        sync::apply(&snapshot, &mut EmulatorCpu(emulator))?;
        emulator
            .continue_execution()
            .map_err(|e| HandoffError::Emulator(e.to_string()))?;
        self.complete(HandoffState::Synchronized);
        Ok(snapshot)
    }

    /// Any state -> Stopped. Pauses the emulator if it was released,
    /// removes whatever breakpoint is armed, and arms the next-phase
    /// breakpoint at the vulnerable function's return instruction.
    pub fn stop(
        &mut self,
        target: &mut dyn DebugTransport,
        emulator: Option<&mut dyn Emulator>,
        next_breakpoint: Option<u64>,
    ) -> Result<(), HandoffError> {
        if self.state == HandoffState::Synchronized {
            if let Some(emu) = emulator {
                emu.pause()
                    .map_err(|e| HandoffError::Emulator(e.to_string()))?;
            }
        }
        if let Some(addr) = self.armed.take() {
            target.remove_breakpoint(addr)?;
        }
        if let Some(addr) = next_breakpoint {
            target.set_breakpoint(addr)?;
            self.armed = Some(addr);
        }
        self.complete(HandoffState::Stopped);
        Ok(())
    }
}
