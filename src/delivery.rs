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

//! Exploit delivery: two actors sharing the physical device. The device
//! controller re-arms the target at the vulnerable function's return and
//! watches it; the payload constructor feeds the exploit in over the serial
//! side channel. The two rendezvous on explicit one-shot signals -- never
//! on sleeps -- so the sequencing holds on slow and fast hardware alike.
//!
//! Controller timeline:  halt, re-arm breakpoint, reset -> signal ARMED ->
//! wait for halt (the payload's overflow trips the breakpoint) -> signal
//! HIT -> single-step -> capture registers (the hijacked control transfer
//! is now visible in pc).
//!
//! Constructor timeline: connect serial, build payload, block on ARMED ->
//! send input + payload -> block on HIT -> persist payload, disconnect.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use log::info;

use crate::channel::PayloadChannel;
use crate::payload::{ExploitPayload, PayloadSpec};
use crate::registers::{RegisterSet, CORE_REGISTERS};
use crate::transport::{DebugTransport, SharedTransport};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Breakpoint left over from the co-execution phase, removed first.
    pub entry_breakpoint: u64,
    /// Armed at the vulnerable function's return instruction.
    pub vuln_return_breakpoint: u64,
    pub payload: PayloadSpec,
    /// Where the delivered payload is persisted for replay.
    pub payload_out: PathBuf,
}

#[derive(Debug)]
pub struct DeliveryReport {
    /// Register file captured one step past the vulnerable return; pc/lr
    /// carry the hijacked control-transfer value.
    pub registers: RegisterSet,
    pub payload: ExploitPayload,
    pub payload_file: PathBuf,
}

/// Run both actors to completion and collect the evidence. The controller
/// owns the debug transport for the whole phase; the constructor only
/// touches the serial channel.
pub fn run_delivery(
    transport: SharedTransport,
    mut channel: Box<dyn PayloadChannel>,
    config: DeliveryConfig,
) -> Result<DeliveryReport> {
    let (armed_tx, armed_rx) = mpsc::channel::<()>();
    let (hit_tx, hit_rx) = mpsc::channel::<()>();

    let payload_out = config.payload_out.clone();
    let controller_config = config.clone();
    let controller = thread::Builder::new()
        .name("device-controller".to_string())
        .spawn(move || -> Result<RegisterSet> {
            let mut probe = transport.lock().unwrap();

            info!("re-arming target for delivery");
            probe.halt()?;
            probe.remove_breakpoint(controller_config.entry_breakpoint)?;
            probe.set_breakpoint(controller_config.vuln_return_breakpoint)?;
            probe.reset()?;

            // Target is running with the breakpoint armed; the constructor
            // may transmit now.
            armed_tx
                .send(())
                .context("payload constructor went away before arming")?;

            probe.wait_for_halt()?;
            let pc = probe.read_register("pc")?;
            info!("vulnerable-return breakpoint hit at 0x{:08x}", pc);
            hit_tx.send(()).ok(); // constructor may already be done waiting

            // Step through the return and capture where execution went.
            probe.step()?;
            let mut pairs = Vec::with_capacity(CORE_REGISTERS.len());
            for name in CORE_REGISTERS {
                pairs.push((name.to_string(), probe.read_register(name)?));
            }
            let registers = RegisterSet::from_pairs(pairs)
                .context("register capture after step")?;
            info!(
                "post-return register capture: pc=0x{:08x} lr=0x{:08x}",
                registers.pc(),
                registers.lr()
            );
            Ok(registers)
        })
        .context("spawning device controller")?;

    let constructor = thread::Builder::new()
        .name("payload-constructor".to_string())
        .spawn(move || -> Result<ExploitPayload> {
            channel.connect()?;
            let exploit = ExploitPayload::build(&config.payload)?;

            // Hold transmission until the breakpoint is armed and the
            // target is running and awaiting input.
            armed_rx
                .recv()
                .context("device controller died before arming the target")?;

            info!(
                "delivering exploit: {} input bytes, {} payload bytes",
                exploit.input.len(),
                exploit.payload.len()
            );
            channel.send(&exploit.input)?;
            channel.send(&exploit.payload)?;

            // Wait for confirmation that the device actually tripped the
            // breakpoint before declaring the payload good.
            hit_rx
                .recv()
                .context("device controller died before the breakpoint hit")?;

            exploit.save(&config.payload_out)?;
            channel.disconnect()?;
            Ok(exploit)
        })
        .context("spawning payload constructor")?;

    let registers = controller
        .join()
        .expect("device controller panicked")
        .context("device controller failed")?;
    let payload = constructor
        .join()
        .expect("payload constructor panicked")
        .context("payload constructor failed")?;

    Ok(DeliveryReport {
        registers,
        payload,
        payload_file: payload_out,
    })
}
