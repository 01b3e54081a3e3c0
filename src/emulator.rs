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

use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::memory::AccessKind;
use crate::proxy::RemoteAccessError;

/// One emulator-issued memory access, as delivered by the interception hook.
/// `value` carries the bytes being stored for writes and is None for reads
/// and execute fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAccess {
    #[serde(with = "crate::config::hex_u64")]
    pub address: u64,
    pub size: usize,
    pub kind: AccessKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

/// What the emulator should do with an intercepted access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Not ours: the emulator handles the access natively (local concrete
    /// or symbolic memory).
    Passthrough,
    /// Read satisfied from the live target; raw bytes, no reinterpretation.
    Value { bytes: Vec<u8> },
    /// Write forwarded to the target.
    WrittenBack,
    /// Write intercepted on a write-back-disabled window: the target was
    /// not touched, the emulator must retain its local copy.
    ShadowWrite,
}

/// Installed into the emulator at session start; every memory access the
/// emulator's interceptor sees is pushed through here. A blocking call: the
/// emulator must not interleave other accesses to the same range during the
/// round trip.
pub trait AccessHook: Send {
    fn on_access(&mut self, access: &MemoryAccess) -> Result<AccessOutcome, RemoteAccessError>;
}

/// The emulator engine as this crate consumes it: register/memory access
/// mirroring the debug transport, execution control, and the interception
/// hook registration the proxy is installed through.
///
/// Error type matches the transport-trait convention used elsewhere in the
/// crate's I/O seams: boxed, Send + Sync, wrapped into typed errors by the
/// synchronizer and session.
pub trait Emulator: Send {
    fn is_halted(&self) -> bool;
    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>>;
    fn set_register(&mut self, name: &str, value: u32)
        -> Result<(), Box<dyn Error + Send + Sync>>;
    fn read_memory(&mut self, addr: u64, len: usize)
        -> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;
    fn write_memory(&mut self, addr: u64, data: &[u8])
        -> Result<(), Box<dyn Error + Send + Sync>>;
    /// Release emulated execution (the engine keeps running until paused or
    /// it blocks on an intercepted access).
    fn continue_execution(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn pause(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    /// Register the access interception hook. Called once, at session start.
    fn install_access_hook(
        &mut self,
        hook: Box<dyn AccessHook>,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Emulator reached over its own debug port, speaking the same line
/// protocol as the probe. Register and memory traffic goes over that
/// connection; the interception hook is served back to the emulator's
/// memory-interceptor plugin by a [`crate::proxy_server::RemoteMemoryServer`]
/// listening where the plugin was configured to connect.
pub struct RemoteEmulator {
    transport: Box<dyn crate::transport::DebugTransport>,
    /// Bind address for the remote-memory server, e.g. "127.0.0.1:9999".
    listen_addr: String,
}

impl RemoteEmulator {
    pub fn new(transport: Box<dyn crate::transport::DebugTransport>, listen_addr: String) -> Self {
        Self {
            transport,
            listen_addr,
        }
    }
}

impl Emulator for RemoteEmulator {
    fn is_halted(&self) -> bool {
        self.transport.is_halted()
    }

    fn get_register(&mut self, name: &str) -> Result<u32, Box<dyn Error + Send + Sync>> {
        Ok(self.transport.read_register(name)?)
    }

    fn set_register(
        &mut self,
        name: &str,
        value: u32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.transport.write_register(name, value)?)
    }

    fn read_memory(
        &mut self,
        addr: u64,
        len: usize,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        Ok(self.transport.read_memory(addr, len)?)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.transport.write_memory(addr, data)?)
    }

    fn continue_execution(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.transport.resume()?)
    }

    fn pause(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(self.transport.halt()?)
    }

    fn install_access_hook(
        &mut self,
        hook: Box<dyn AccessHook>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let server = crate::proxy_server::RemoteMemoryServer::bind(&self.listen_addr)?;
        // The serve loop ends on its own when the interceptor disconnects.
        std::thread::Builder::new()
            .name("remote-memory".to_string())
            .spawn(move || server.serve(hook))?;
        Ok(())
    }
}
