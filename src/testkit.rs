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

//! Fake transports, emulators and channels for tests. Each mock exposes a
//! cloneable handle onto its internal state so tests can make assertions
//! after the mock has been boxed behind a trait object.

use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::channel::PayloadChannel;
use crate::emulator::{AccessHook, Emulator, MemoryAccess};
use crate::monitor::Monitor;
use crate::registers::CORE_REGISTERS;
use crate::transport::{DebugTransport, TransportError};

/// Shared, ordered record of interesting events across mock actors. Lets a
/// test assert cross-thread ordering ("resume happened before send") without
/// caring about wall-clock timing.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    pub fn items(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.items().iter().position(|e| e == event)
    }
}

#[derive(Default)]
struct MockTransportState {
    registers: HashMap<String, u32>,
    memory: HashMap<u64, u8>,
    breakpoints: BTreeSet<u64>,
    halted: bool,
    read_memory_calls: usize,
    write_memory_calls: usize,
    resets: usize,
    steps: usize,
    flashed: Vec<PathBuf>,
    fail_next_read: Option<String>,
    /// When set, wait_for_halt blocks until the sender side fires (used to
    /// model "the breakpoint only hits after input arrives").
    halt_gate: Option<Receiver<()>>,
    log: Option<EventLog>,
}

/// In-memory debug transport with a full register file and sparse memory.
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

/// Inspection/rigging handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        for reg in CORE_REGISTERS {
            registers.insert(reg.to_string(), 0);
        }
        Self {
            state: Arc::new(Mutex::new(MockTransportState {
                registers,
                ..Default::default()
            })),
        }
    }

    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransportHandle {
    pub fn preload_memory(&self, base: u64, bytes: &[u8]) {
        let mut s = self.state.lock().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            s.memory.insert(base + i as u64, *b);
        }
    }

    pub fn memory_at(&self, base: u64, len: usize) -> Vec<u8> {
        let s = self.state.lock().unwrap();
        (0..len)
            .map(|i| s.memory.get(&(base + i as u64)).copied().unwrap_or(0))
            .collect()
    }

    pub fn set_register(&self, name: &str, value: u32) {
        self.state
            .lock()
            .unwrap()
            .registers
            .insert(name.to_string(), value);
    }

    pub fn register(&self, name: &str) -> u32 {
        self.state.lock().unwrap().registers[name]
    }

    pub fn read_memory_calls(&self) -> usize {
        self.state.lock().unwrap().read_memory_calls
    }

    pub fn write_memory_calls(&self) -> usize {
        self.state.lock().unwrap().write_memory_calls
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn steps(&self) -> usize {
        self.state.lock().unwrap().steps
    }

    pub fn breakpoints(&self) -> Vec<u64> {
        self.state.lock().unwrap().breakpoints.iter().copied().collect()
    }

    pub fn flashed(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().flashed.clone()
    }

    pub fn fail_next_read(&self, msg: &str) {
        self.state.lock().unwrap().fail_next_read = Some(msg.to_string());
    }

    pub fn gate_halt_on(&self, rx: Receiver<()>) {
        self.state.lock().unwrap().halt_gate = Some(rx);
    }

    pub fn set_log(&self, log: EventLog) {
        self.state.lock().unwrap().log = Some(log);
    }

    fn logged(&self, event: &str) {
        if let Some(log) = self.state.lock().unwrap().log.clone() {
            log.push(event);
        }
    }
}

impl DebugTransport for MockTransport {
    fn halt(&mut self) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.halted = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.halted = false;
        let log = s.log.clone();
        drop(s);
        if let Some(log) = log {
            log.push("resume");
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.resets += 1;
        s.halted = false;
        let log = s.log.clone();
        drop(s);
        if let Some(log) = log {
            log.push("reset");
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.steps += 1;
        s.halted = true;
        let log = s.log.clone();
        drop(s);
        if let Some(log) = log {
            log.push("step");
        }
        Ok(())
    }

    fn set_breakpoint(&mut self, addr: u64) -> Result<(), TransportError> {
        self.state.lock().unwrap().breakpoints.insert(addr);
        Ok(())
    }

    fn remove_breakpoint(&mut self, addr: u64) -> Result<(), TransportError> {
        self.state.lock().unwrap().breakpoints.remove(&addr);
        Ok(())
    }

    fn wait_for_halt(&mut self) -> Result<(), TransportError> {
        // Block outside the state lock if a gate is rigged.
        let gate = self.state.lock().unwrap().halt_gate.take();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        let mut s = self.state.lock().unwrap();
        s.halted = true;
        let log = s.log.clone();
        drop(s);
        if let Some(log) = log {
            log.push("halted");
        }
        Ok(())
    }

    fn read_register(&mut self, name: &str) -> Result<u32, TransportError> {
        let s = self.state.lock().unwrap();
        s.registers
            .get(name)
            .copied()
            .ok_or_else(|| TransportError::Protocol(format!("no such register {}", name)))
    }

    fn write_register(&mut self, name: &str, value: u32) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        if !s.registers.contains_key(name) {
            return Err(TransportError::Protocol(format!(
                "no such register {}",
                name
            )));
        }
        s.registers.insert(name.to_string(), value);
        Ok(())
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut s = self.state.lock().unwrap();
        if let Some(msg) = s.fail_next_read.take() {
            return Err(TransportError::Timeout(msg));
        }
        s.read_memory_calls += 1;
        Ok((0..len)
            .map(|i| s.memory.get(&(addr + i as u64)).copied().unwrap_or(0))
            .collect())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.write_memory_calls += 1;
        for (i, b) in data.iter().enumerate() {
            s.memory.insert(addr + i as u64, *b);
        }
        Ok(())
    }

    fn flash_image(&mut self, path: &Path) -> Result<(), TransportError> {
        self.state.lock().unwrap().flashed.push(path.to_path_buf());
        Ok(())
    }

    fn is_halted(&self) -> bool {
        self.state.lock().unwrap().halted
    }
}

#[derive(Default)]
struct MockEmulatorState {
    registers: HashMap<String, u32>,
    memory: HashMap<u64, u8>,
    halted: bool,
    continues: usize,
    pauses: usize,
}

/// In-memory emulator double. Starts halted, like an engine launched with
/// its processor stopped.
pub struct MockEmulator {
    state: Arc<Mutex<MockEmulatorState>>,
    hook: Option<Box<dyn AccessHook>>,
}

#[derive(Clone)]
pub struct MockEmulatorHandle {
    state: Arc<Mutex<MockEmulatorState>>,
}

impl MockEmulator {
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        for reg in CORE_REGISTERS {
            registers.insert(reg.to_string(), 0);
        }
        Self {
            state: Arc::new(Mutex::new(MockEmulatorState {
                registers,
                halted: true,
                ..Default::default()
            })),
            hook: None,
        }
    }

    pub fn handle(&self) -> MockEmulatorHandle {
        MockEmulatorHandle {
            state: self.state.clone(),
        }
    }

    /// Drive an intercepted access through the installed hook, as the
    /// engine's interceptor would.
    pub fn dispatch_access(
        &mut self,
        access: &MemoryAccess,
    ) -> Result<crate::emulator::AccessOutcome, crate::proxy::RemoteAccessError> {
        self.hook
            .as_mut()
            .expect("no access hook installed")
            .on_access(access)
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }
}

impl Default for MockEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmulatorHandle {
    pub fn register(&self, name: &str) -> u32 {
        self.state.lock().unwrap().registers[name]
    }

    pub fn set_register(&self, name: &str, value: u32) {
        self.state
            .lock()
            .unwrap()
            .registers
            .insert(name.to_string(), value);
    }

    pub fn memory_at(&self, base: u64, len: usize) -> Vec<u8> {
        let s = self.state.lock().unwrap();
        (0..len)
            .map(|i| s.memory.get(&(base + i as u64)).copied().unwrap_or(0))
            .collect()
    }

    pub fn continues(&self) -> usize {
        self.state.lock().unwrap().continues
    }

    pub fn pauses(&self) -> usize {
        self.state.lock().unwrap().pauses
    }

    pub fn set_halted(&self, halted: bool) {
        self.state.lock().unwrap().halted = halted;
    }
}

impl Emulator for MockEmulator {
    fn is_halted(&self) -> bool {
        self.state.lock().unwrap().halted
    }

    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>> {
        let s = self.state.lock().unwrap();
        s.registers
            .get(name)
            .copied()
            .ok_or_else(|| format!("emulator has no register {}", name).into())
    }

    fn set_register(
        &mut self,
        name: &str,
        value: u32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut s = self.state.lock().unwrap();
        if !s.registers.contains_key(name) {
            return Err(format!("emulator has no register {}", name).into());
        }
        s.registers.insert(name.to_string(), value);
        Ok(())
    }

    fn read_memory(
        &mut self,
        addr: u64,
        len: usize,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        let s = self.state.lock().unwrap();
        Ok((0..len)
            .map(|i| s.memory.get(&(addr + i as u64)).copied().unwrap_or(0))
            .collect())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut s = self.state.lock().unwrap();
        for (i, b) in data.iter().enumerate() {
            s.memory.insert(addr + i as u64, *b);
        }
        Ok(())
    }

    fn continue_execution(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut s = self.state.lock().unwrap();
        s.halted = false;
        s.continues += 1;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut s = self.state.lock().unwrap();
        s.halted = true;
        s.pauses += 1;
        Ok(())
    }

    fn install_access_hook(
        &mut self,
        hook: Box<dyn AccessHook>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.hook = Some(hook);
        Ok(())
    }
}

#[derive(Default)]
struct MockChannelState {
    connected: bool,
    sent: Vec<Vec<u8>>,
    log: Option<EventLog>,
    /// Fired on the first send; used to release a gated wait_for_halt.
    on_first_send: Option<std::sync::mpsc::Sender<()>>,
}

/// In-memory payload channel double.
pub struct MockChannel {
    state: Arc<Mutex<MockChannelState>>,
}

#[derive(Clone)]
pub struct MockChannelHandle {
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChannelState::default())),
        }
    }

    pub fn handle(&self) -> MockChannelHandle {
        MockChannelHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannelHandle {
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn total_bytes_sent(&self) -> usize {
        self.state.lock().unwrap().sent.iter().map(|s| s.len()).sum()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn set_log(&self, log: EventLog) {
        self.state.lock().unwrap().log = Some(log);
    }

    pub fn notify_on_first_send(&self, tx: std::sync::mpsc::Sender<()>) {
        self.state.lock().unwrap().on_first_send = Some(tx);
    }
}

impl PayloadChannel for MockChannel {
    fn connect(&mut self) -> Result<()> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if !s.connected {
            anyhow::bail!("channel not connected");
        }
        s.sent.push(data.to_vec());
        let log = s.log.clone();
        let notify = s.on_first_send.take();
        drop(s);
        if let Some(log) = log {
            log.push("send");
        }
        if let Some(tx) = notify {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }
}

/// Monitor double counting hook invocations; cloneable so the test keeps a
/// view after attachment.
#[derive(Clone, Default)]
pub struct CountingMonitor {
    pre_reads: Arc<AtomicUsize>,
    post_reads: Arc<AtomicUsize>,
    pre_writes: Arc<AtomicUsize>,
    post_writes: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    last_read_value: Arc<Mutex<Option<Vec<u8>>>>,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_reads(&self) -> usize {
        self.pre_reads.load(Ordering::SeqCst)
    }

    pub fn post_reads(&self) -> usize {
        self.post_reads.load(Ordering::SeqCst)
    }

    pub fn pre_writes(&self) -> usize {
        self.pre_writes.load(Ordering::SeqCst)
    }

    pub fn post_writes(&self) -> usize {
        self.post_writes.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn last_read_value(&self) -> Option<Vec<u8>> {
        self.last_read_value.lock().unwrap().clone()
    }
}

impl Monitor for CountingMonitor {
    fn pre_read(&mut self, _access: &MemoryAccess) -> Result<()> {
        self.pre_reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_read(&mut self, _access: &MemoryAccess, value: &[u8]) -> Result<()> {
        self.post_reads.fetch_add(1, Ordering::SeqCst);
        *self.last_read_value.lock().unwrap() = Some(value.to_vec());
        Ok(())
    }

    fn pre_write(&mut self, _access: &MemoryAccess) -> Result<()> {
        self.pre_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_write(&mut self, _access: &MemoryAccess) -> Result<()> {
        self.post_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
