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

//! Full CPU/memory state transfer between the target and the emulator at a
//! synchronization point. Both engines are halted for the duration; memory
//! moves before registers so the destination never holds a program counter
//! into code whose data has not arrived yet.

use std::error::Error;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::emulator::Emulator;
use crate::registers::{RegisterSet, CORE_REGISTERS, XPSR_THUMB_BIT};
use crate::transport::DebugTransport;

#[derive(Debug, thiserror::Error)]
#[error("state sync failed: {reason} (partially applied: {partially_applied})")]
pub struct SyncError {
    pub reason: String,
    /// True when some registers or memory bytes already landed in the
    /// destination. The caller must re-halt and retry from the source; the
    /// destination state is not trustworthy.
    pub partially_applied: bool,
}

impl SyncError {
    fn clean(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            partially_applied: false,
        }
    }

    fn torn(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            partially_applied: true,
        }
    }
}

/// Either side of a transfer, seen uniformly. Adapters wrap the debug
/// transport (target side) and the emulator engine.
pub trait CpuEndpoint {
    fn endpoint_name(&self) -> &'static str;
    fn is_halted(&self) -> bool;
    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>>;
    fn set_register(&mut self, name: &str, value: u32)
        -> Result<(), Box<dyn Error + Send + Sync>>;
    fn read_memory(&mut self, addr: u64, len: usize)
        -> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;
    fn write_memory(&mut self, addr: u64, data: &[u8])
        -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub struct TargetCpu<'a>(pub &'a mut dyn DebugTransport);

impl CpuEndpoint for TargetCpu<'_> {
    fn endpoint_name(&self) -> &'static str {
        "target"
    }

    fn is_halted(&self) -> bool {
        self.0.is_halted()
    }

    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>> {
        Ok(self.0.read_register(name)?)
    }

    fn set_register(
        &mut self,
        name: &str,
        value: u32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.0.write_register(name, value)?)
    }

    fn read_memory(
        &mut self,
        addr: u64,
        len: usize,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        Ok(self.0.read_memory(addr, len)?)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.0.write_memory(addr, data)?)
    }
}

pub struct EmulatorCpu<'a>(pub &'a mut dyn Emulator);

impl CpuEndpoint for EmulatorCpu<'_> {
    fn endpoint_name(&self) -> &'static str {
        "emulator"
    }

    fn is_halted(&self) -> bool {
        self.0.is_halted()
    }

    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>> {
        self.0.get_register(name)
    }

    fn set_register(
        &mut self,
        name: &str,
        value: u32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.set_register(name, value)
    }

    fn read_memory(
        &mut self,
        addr: u64,
        len: usize,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        self.0.read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.write_memory(addr, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    TargetToEmulator,
    EmulatorToTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCapture {
    #[serde(with = "crate::config::hex_u64")]
    pub base: u64,
    pub bytes: Vec<u8>,
}

/// Immutable point-in-time capture of a full register set plus selected
/// memory ranges, tagged with the direction it was taken for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub direction: SyncDirection,
    pub registers: RegisterSet,
    pub memory: Vec<MemoryCapture>,
}

impl SyncSnapshot {
    /// Persist the register set as a gdb command script (`set $r0 = 0x0`
    /// per line) for offline debugging and replay.
    pub fn dump_gdb_script(&self, path: &Path) -> std::io::Result<()> {
        let mut f = File::create(path)?;
        for (name, value) in self.registers.iter() {
            writeln!(f, "set ${} = 0x{:x}", name, value)?;
        }
        Ok(())
    }
}

/// Capture the full register set and the given memory ranges from a halted
/// engine. A running source yields a torn capture, so it is refused
/// outright.
pub fn snapshot_from(
    source: &mut dyn CpuEndpoint,
    ranges: &[(u64, usize)],
    direction: SyncDirection,
) -> Result<SyncSnapshot, SyncError> {
    if !source.is_halted() {
        return Err(SyncError::clean(format!(
            "{} is not halted; refusing to snapshot a running engine",
            source.endpoint_name()
        )));
    }

    let mut memory = Vec::with_capacity(ranges.len());
    for &(base, len) in ranges {
        let bytes = source.read_memory(base, len).map_err(|e| {
            SyncError::clean(format!(
                "memory read 0x{:x}+0x{:x} from {} failed: {}",
                base,
                len,
                source.endpoint_name(),
                e
            ))
        })?;
        memory.push(MemoryCapture { base, bytes });
    }

    let mut pairs = Vec::with_capacity(CORE_REGISTERS.len());
    for name in CORE_REGISTERS {
        let value = source.get_register(name).map_err(|e| {
            SyncError::clean(format!(
                "register {} read from {} failed: {}",
                name,
                source.endpoint_name(),
                e
            ))
        })?;
        pairs.push((name.to_string(), value));
    }
    let registers = RegisterSet::from_pairs(pairs)
        .map_err(|e| SyncError::clean(format!("register set mismatch: {}", e)))?;

    debug!(
        "snapshot from {}: pc=0x{:08x}, {} memory ranges",
        source.endpoint_name(),
        registers.pc(),
        memory.len()
    );
    Ok(SyncSnapshot {
        direction,
        registers,
        memory,
    })
}

/// Write a snapshot into a halted destination: memory first, then every
/// register, then the instruction-mode fix-up. All-or-nothing per
/// direction: any failure after the first write reports
/// `partially_applied` so the caller knows the destination is dirty.
pub fn apply(
    snapshot: &SyncSnapshot,
    destination: &mut dyn CpuEndpoint,
) -> Result<(), SyncError> {
    if !destination.is_halted() {
        return Err(SyncError::clean(format!(
            "{} is not halted; refusing to apply state into a running engine",
            destination.endpoint_name()
        )));
    }

    let mut touched = false;
    for capture in &snapshot.memory {
        destination
            .write_memory(capture.base, &capture.bytes)
            .map_err(|e| {
                let reason = format!(
                    "memory write 0x{:x}+0x{:x} into {} failed: {}",
                    capture.base,
                    capture.bytes.len(),
                    destination.endpoint_name(),
                    e
                );
                if touched {
                    SyncError::torn(reason)
                } else {
                    SyncError::clean(reason)
                }
            })?;
        touched = true;
    }

    for (name, value) in snapshot.registers.iter() {
        destination.set_register(name, value).map_err(|e| {
            let reason = format!(
                "register {} write into {} failed: {}",
                name,
                destination.endpoint_name(),
                e
            );
            if touched {
                SyncError::torn(reason)
            } else {
                SyncError::clean(reason)
            }
        })?;
        touched = true;
    }

    // A raw register copy leaves the destination decoder in whatever
    // instruction-width mode it booted with. Force the Thumb bit to the
    // source's mode or execution diverges on the first fetched instruction.
    let source_mode = snapshot.registers.xpsr() & XPSR_THUMB_BIT;
    let dest_xpsr = destination
        .get_register("xpsr")
        .map_err(|e| SyncError::torn(format!("xpsr read-back failed: {}", e)))?;
    let fixed = (dest_xpsr & !XPSR_THUMB_BIT) | source_mode;
    if fixed != dest_xpsr {
        destination
            .set_register("xpsr", fixed)
            .map_err(|e| SyncError::torn(format!("xpsr mode fix-up failed: {}", e)))?;
    }

    info!(
        "applied {:?} state into {}: pc=0x{:08x}",
        snapshot.direction,
        destination.endpoint_name(),
        snapshot.registers.pc()
    );
    Ok(())
}
