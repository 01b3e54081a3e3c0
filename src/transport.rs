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

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport command timed out: {0}")]
    Timeout(String),
    #[error("probe protocol error: {0}")]
    Protocol(String),
}

/// Command interface to the debug probe controlling the physical target.
///
/// `wait_for_halt` blocks until the target reports halted; there is no
/// polling variant. `is_halted` is tracked client-side: halt/wait set it,
/// resume/reset/step sequences clear and re-set it. That is enough for the
/// synchronizer's halted-source precondition without an extra probe query.
pub trait DebugTransport: Send {
    fn halt(&mut self) -> Result<(), TransportError>;
    fn resume(&mut self) -> Result<(), TransportError>;
    fn reset(&mut self) -> Result<(), TransportError>;
    fn step(&mut self) -> Result<(), TransportError>;
    fn set_breakpoint(&mut self, addr: u64) -> Result<(), TransportError>;
    fn remove_breakpoint(&mut self, addr: u64) -> Result<(), TransportError>;
    /// Block until the target halts (breakpoint hit, fault, or manual halt).
    fn wait_for_halt(&mut self) -> Result<(), TransportError>;
    fn read_register(&mut self, name: &str) -> Result<u32, TransportError>;
    fn write_register(&mut self, name: &str, value: u32) -> Result<(), TransportError>;
    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TransportError>;
    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError>;
    fn flash_image(&mut self, path: &Path) -> Result<(), TransportError>;
    fn is_halted(&self) -> bool;
}

/// Shared handle to the one physical probe session. The mutex is the
/// single-owner guarantee: whoever holds the lock is the only issuer of
/// probe commands, and proxied memory accesses are single-flight through it.
pub type SharedTransport = Arc<Mutex<Box<dyn DebugTransport>>>;

pub fn share(transport: Box<dyn DebugTransport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Line-based TCP client to a probe server (OpenOCD-telnet style).
///
/// Every command is one line; every reply is one line, either
/// `ok [payload]` or `err <message>`. Commands carry a read timeout so a
/// wedged probe surfaces as `TransportError::Timeout` instead of hanging
/// the session; `wait` alone runs without a deadline since halting may take
/// arbitrarily long.
pub struct TcpProbeTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    stream: TcpStream,
    command_timeout: Duration,
    halted: bool,
}

impl TcpProbeTransport {
    pub fn connect(addr: &str, command_timeout: Duration) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer,
            stream,
            command_timeout,
            halted: false,
        })
    }

    /// Send one command line and read one reply line. Returns the payload
    /// after "ok", if any.
    fn command(&mut self, line: &str) -> Result<String, TransportError> {
        self.command_with_timeout(line, Some(self.command_timeout))
    }

    fn command_with_timeout(
        &mut self,
        line: &str,
        timeout: Option<Duration>,
    ) -> Result<String, TransportError> {
        self.stream.set_read_timeout(timeout)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;

        let mut reply = String::new();
        match self.reader.read_line(&mut reply) {
            Ok(0) => {
                return Err(TransportError::Protocol(
                    "probe closed the connection".to_string(),
                ))
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                return Err(TransportError::Timeout(line.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let reply = reply.trim();
        if let Some(payload) = reply.strip_prefix("ok") {
            Ok(payload.trim().to_string())
        } else if let Some(msg) = reply.strip_prefix("err") {
            Err(TransportError::Protocol(format!(
                "'{}' failed: {}",
                line,
                msg.trim()
            )))
        } else {
            Err(TransportError::Protocol(format!(
                "unexpected reply to '{}': {}",
                line, reply
            )))
        }
    }
}

impl DebugTransport for TcpProbeTransport {
    fn halt(&mut self) -> Result<(), TransportError> {
        self.command("halt")?;
        self.halted = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TransportError> {
        self.command("resume")?;
        self.halted = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.command("reset run")?;
        self.halted = false;
        Ok(())
    }

    fn step(&mut self) -> Result<(), TransportError> {
        self.command("step")?;
        self.halted = true;
        Ok(())
    }

    fn set_breakpoint(&mut self, addr: u64) -> Result<(), TransportError> {
        self.command(&format!("bp set 0x{:x}", addr))?;
        Ok(())
    }

    fn remove_breakpoint(&mut self, addr: u64) -> Result<(), TransportError> {
        self.command(&format!("bp clear 0x{:x}", addr))?;
        Ok(())
    }

    fn wait_for_halt(&mut self) -> Result<(), TransportError> {
        // No deadline: the probe replies when the target actually halts.
        self.command_with_timeout("wait", None)?;
        self.halted = true;
        Ok(())
    }

    fn read_register(&mut self, name: &str) -> Result<u32, TransportError> {
        let payload = self.command(&format!("reg {}", name))?;
        let value = crate::config::parse_hex_address(&payload).ok_or_else(|| {
            TransportError::Protocol(format!("bad register value for {}: '{}'", name, payload))
        })?;
        Ok(value as u32)
    }

    fn write_register(&mut self, name: &str, value: u32) -> Result<(), TransportError> {
        self.command(&format!("reg {} 0x{:x}", name, value))?;
        Ok(())
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        let payload = self.command(&format!("mem read 0x{:x} {}", addr, len))?;
        let bytes = parse_hex_bytes(&payload)
            .ok_or_else(|| TransportError::Protocol(format!("bad memory payload: '{}'", payload)))?;
        if bytes.len() != len {
            return Err(TransportError::Protocol(format!(
                "short memory read at 0x{:x}: wanted {} bytes, got {}",
                addr,
                len,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        self.command(&format!("mem write 0x{:x} {}", addr, to_hex(data)))?;
        Ok(())
    }

    fn flash_image(&mut self, path: &Path) -> Result<(), TransportError> {
        // Flashing erases and reprograms; give it a generous deadline.
        self.command_with_timeout(
            &format!("flash write_image erase {}", path.display()),
            Some(self.command_timeout * 30),
        )?;
        Ok(())
    }

    fn is_halted(&self) -> bool {
        self.halted
    }
}

/// Parse space-separated hex byte pairs, e.g. "01 02 03 04".
fn parse_hex_bytes(payload: &str) -> Option<Vec<u8>> {
    payload
        .split_whitespace()
        .map(|b| u8::from_str_radix(b, 16).ok())
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
