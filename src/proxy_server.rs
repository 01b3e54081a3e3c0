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

//! TCP server for the emulator's memory-interceptor plugin. The plugin
//! connects once at emulator startup and sends one framed JSON request per
//! intercepted access; every request gets exactly one framed reply before
//! the next is read, matching the blocking-access contract on the emulator
//! side.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{TcpListener, TcpStream};

use log::{debug, error, info};
use serde_json::{json, Value};

use crate::emulator::{AccessHook, MemoryAccess};

pub struct RemoteMemoryServer {
    listener: TcpListener,
}

impl RemoteMemoryServer {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(
            "remote-memory server listening on {}",
            listener.local_addr()?
        );
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the single interceptor connection and serve accesses until the
    /// emulator closes it. A failed proxied access is reported to the
    /// emulator and ends the serve loop: the current execution path cannot
    /// continue on a stale value.
    pub fn serve(self, mut hook: Box<dyn AccessHook>) {
        let (stream, peer) = match self.listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                error!("remote-memory accept failed: {}", e);
                return;
            }
        };
        info!("emulator interceptor connected from {}", peer);

        let mut reader = BufReader::new(match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!("remote-memory stream clone failed: {}", e);
                return;
            }
        });
        let mut writer = BufWriter::new(stream);

        loop {
            let msg = match read_framed(&mut reader) {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("emulator interceptor disconnected");
                    return;
                }
                Err(e) => {
                    error!("remote-memory read failed: {}", e);
                    return;
                }
            };

            let access: MemoryAccess = match serde_json::from_value(msg) {
                Ok(access) => access,
                Err(e) => {
                    error!("malformed access request: {}", e);
                    let _ = write_framed(&mut writer, &json!({ "error": e.to_string() }));
                    continue;
                }
            };
            debug!(
                "intercepted {:?} 0x{:08x}[{}]",
                access.kind, access.address, access.size
            );

            let reply = match hook.on_access(&access) {
                Ok(outcome) => serde_json::to_value(&outcome).unwrap_or_else(|e| {
                    json!({ "error": format!("outcome serialization failed: {}", e) })
                }),
                Err(e) => {
                    error!("proxied access failed, aborting emulator path: {}", e);
                    let _ = write_framed(&mut writer, &json!({ "error": e.to_string() }));
                    return;
                }
            };
            if let Err(e) = write_framed(&mut writer, &reply) {
                error!("remote-memory write failed: {}", e);
                return;
            }
        }
    }
}

/// Read one Content-Length framed JSON message. Returns Ok(None) on a clean
/// EOF between messages.
fn read_framed(reader: &mut impl BufRead) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line)?;
        if n == 0 {
            if content_length.is_none() {
                return Ok(None); // clean EOF
            }
            return Err("EOF while reading header".into());
        }
        let header_trim = header_line.trim();
        if header_trim.is_empty() {
            break; // end of headers
        }
        if header_trim.to_lowercase().starts_with("content-length") {
            if let Some(idx) = header_trim.find(':') {
                let num = header_trim[idx + 1..].trim();
                content_length = Some(num.parse::<usize>()?);
            }
        }
        // ignore other headers
    }

    let len = content_length.ok_or("missing Content-Length header")?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let v: Value = serde_json::from_slice(&buf)?;
    Ok(Some(v))
}

fn write_framed(writer: &mut impl Write, msg: &Value) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::to_vec(msg)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Client-side framing helper for tests and for interceptor implementations
/// living in this process.
pub fn roundtrip(stream: &mut TcpStream, msg: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let mut writer = BufWriter::new(stream.try_clone()?);
    write_framed(&mut writer, msg)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    read_framed(&mut reader)?.ok_or_else(|| "server closed connection".into())
}
