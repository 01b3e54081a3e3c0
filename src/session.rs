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

//! The co-execution session. Owns the debug transport for its whole
//! lifetime, the emulator handle, the monitor list and the handoff state
//! machine; nothing else in the process issues probe commands. Aggregates
//! component errors and decides whether a phase or the whole run aborts.

use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::config::SessionConfig;
use crate::emulator::Emulator;
use crate::handoff::{HandoffMachine, HandoffState};
use crate::monitor::{Monitor, MonitorRegistry};
use crate::proxy::RemoteMemoryProxy;
use crate::sync::SyncSnapshot;
use crate::transport::{share, DebugTransport, SharedTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    TargetAttached,
    EmulatorAttached,
    Running,
    Stopped,
}

pub struct Session {
    config: SessionConfig,
    transport: SharedTransport,
    emulator: Option<Box<dyn Emulator>>,
    monitors: Arc<Mutex<MonitorRegistry>>,
    machine: HandoffMachine,
    state: SessionState,
    last_snapshot: Option<SyncSnapshot>,
}

impl Session {
    /// Construction validates the configuration; a session that would fail
    /// lazily mid-run never exists.
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn DebugTransport>,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let machine = HandoffMachine::new(config.entry_breakpoint);
        Ok(Self {
            config,
            transport: share(transport),
            emulator: None,
            monitors: Arc::new(Mutex::new(MonitorRegistry::new())),
            machine,
            state: SessionState::Uninitialized,
            last_snapshot: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handoff_state(&self) -> HandoffState {
        self.machine.state()
    }

    pub fn last_snapshot(&self) -> Option<&SyncSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Shared handle to the probe, for the delivery phase. The mutex keeps
    /// command issuance single-owner even then.
    pub fn transport_handle(&self) -> SharedTransport {
        self.transport.clone()
    }

    /// Monitors fire in attachment order on every proxied access.
    pub fn add_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.lock().unwrap().attach(monitor);
    }

    /// Halt the physical target and take ownership of it.
    pub fn attach_target(&mut self) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            bail!("attach_target called in {:?}", self.state);
        }
        let mut probe = self.transport.lock().unwrap();
        self.machine
            .attach_halt(&mut **probe)
            .context("halting target on attach")?;
        drop(probe);
        self.state = SessionState::TargetAttached;
        info!("target attached and halted");
        Ok(())
    }

    /// Wire the emulator in: build the remote memory proxy over the session
    /// transport and install it as the engine's access hook.
    pub fn attach_emulator(&mut self, mut emulator: Box<dyn Emulator>) -> Result<()> {
        if self.state != SessionState::TargetAttached {
            bail!("attach_emulator called in {:?}", self.state);
        }
        let proxy = RemoteMemoryProxy::new(
            self.config.windows.clone(),
            self.transport.clone(),
            self.monitors.clone(),
        )?;
        emulator
            .install_access_hook(Box::new(proxy))
            .map_err(|e| anyhow::anyhow!("installing access hook: {}", e))?;
        self.emulator = Some(emulator);
        self.state = SessionState::EmulatorAttached;
        info!("emulator attached, remote memory proxy installed");
        Ok(())
    }

    /// Drive the handoff to the synchronization point and release the
    /// emulator: flash, arm, run to the breakpoint, transfer memory then
    /// registers. On failure the handoff machine remembers the last
    /// completed phase for retry.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::EmulatorAttached {
            bail!("start called in {:?}", self.state);
        }
        let emulator = self.emulator.as_mut().expect("emulator attached");
        let ranges: Vec<(u64, usize)> = self
            .config
            .sync_ranges
            .iter()
            .map(|r| (r.base, r.size as usize))
            .collect();

        let mut probe = self.transport.lock().unwrap();
        let result = (|| {
            self.machine
                .flash_image(&mut **probe, &self.config.firmware_image)?;
            self.machine.arm_breakpoint(&mut **probe)?;
            self.machine.run_to_breakpoint(&mut **probe)?;
            self.machine
                .synchronize(&mut **probe, emulator.as_mut(), &ranges)
        })();
        drop(probe);

        let snapshot = result.with_context(|| {
            format!(
                "handoff failed; last completed phase: {:?}",
                self.machine.last_completed()
            )
        })?;

        // Register dump for offline debugging; losing it is not fatal.
        if let Err(e) = self.persist_snapshot(&snapshot) {
            warn!("could not persist register dump: {:#}", e);
        }
        self.last_snapshot = Some(snapshot);
        self.state = SessionState::Running;
        info!("handoff complete, emulator running");
        Ok(())
    }

    fn persist_snapshot(&self, snapshot: &SyncSnapshot) -> Result<()> {
        fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join("cpu_state.gdb");
        snapshot.dump_gdb_script(&path)?;
        info!("register dump written to {}", path.display());
        Ok(())
    }

    /// Stop co-execution and prepare the delivery phase: pause the
    /// emulator, drop the entry breakpoint, arm the vulnerable-return
    /// breakpoint. Safe to call from any state.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        let mut probe = self.transport.lock().unwrap();
        self.machine
            .stop(
                &mut **probe,
                self.emulator.as_mut().map(|e| e.as_mut() as &mut dyn Emulator),
                Some(self.config.vuln_return_breakpoint),
            )
            .context("stopping co-execution")?;
        drop(probe);
        self.monitors.lock().unwrap().notify_stop();
        self.state = SessionState::Stopped;
        info!(
            "session stopped; breakpoint moved to vulnerable return 0x{:x}",
            self.config.vuln_return_breakpoint
        );
        Ok(())
    }

    /// Explicit teardown: stop if needed, detach monitors, release the
    /// transport (the probe connection closes when the last handle drops).
    pub fn shutdown(mut self) -> Result<()> {
        if self.state != SessionState::Stopped {
            self.stop()?;
        }
        self.emulator = None;
        Ok(())
    }
}
