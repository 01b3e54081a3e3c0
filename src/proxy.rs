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

use std::sync::{Arc, Mutex};

use log::{debug, trace};
use thiserror::Error;

use crate::config::ConfigError;
use crate::emulator::{AccessHook, AccessOutcome, MemoryAccess};
use crate::memory::{resolve_window, validate_windows, AccessKind, MemoryWindow};
use crate::monitor::MonitorRegistry;
use crate::transport::{SharedTransport, TransportError};

/// A proxied access failed against the live target. Fatal to the current
/// emulator execution path: the emulator cannot continue on a stale or
/// missing value.
#[derive(Debug, Error)]
#[error("remote {kind:?} of {size} bytes at 0x{address:x} failed: {source}")]
pub struct RemoteAccessError {
    pub address: u64,
    pub size: usize,
    pub kind: AccessKind,
    #[source]
    pub source: TransportError,
}

/// Redirects emulator memory accesses that fall inside a configured window
/// to the physical target, invoking monitors around each forwarded access.
///
/// The transport handle is the session's shared probe mutex, so proxied
/// round trips are single-flight and never interleave with other probe
/// commands.
pub struct RemoteMemoryProxy {
    windows: Vec<MemoryWindow>,
    transport: SharedTransport,
    monitors: Arc<Mutex<MonitorRegistry>>,
}

impl RemoteMemoryProxy {
    /// Window validation happens here, once. An ambiguous window set never
    /// produces a proxy.
    pub fn new(
        windows: Vec<MemoryWindow>,
        transport: SharedTransport,
        monitors: Arc<Mutex<MonitorRegistry>>,
    ) -> Result<Self, ConfigError> {
        validate_windows(&windows).map_err(ConfigError::Invalid)?;
        Ok(Self {
            windows,
            transport,
            monitors,
        })
    }

    fn handle_read(
        &mut self,
        access: &MemoryAccess,
    ) -> Result<AccessOutcome, RemoteAccessError> {
        self.monitors.lock().unwrap().pre_read(access);

        let bytes = self
            .transport
            .lock()
            .unwrap()
            .read_memory(access.address, access.size)
            .map_err(|source| RemoteAccessError {
                address: access.address,
                size: access.size,
                kind: access.kind,
                source,
            })?;

        self.monitors.lock().unwrap().post_read(access, &bytes);
        // Raw bytes straight through; no endianness reinterpretation.
        Ok(AccessOutcome::Value { bytes })
    }

    fn handle_write(
        &mut self,
        access: &MemoryAccess,
        write_back: bool,
    ) -> Result<AccessOutcome, RemoteAccessError> {
        self.monitors.lock().unwrap().pre_write(access);

        let outcome = if write_back {
            let data = access.value.as_deref().unwrap_or(&[]);
            self.transport
                .lock()
                .unwrap()
                .write_memory(access.address, data)
                .map_err(|source| RemoteAccessError {
                    address: access.address,
                    size: access.size,
                    kind: access.kind,
                    source,
                })?;
            AccessOutcome::WrittenBack
        } else {
            // Shadow window: target untouched, emulator keeps its local copy.
            trace!(
                "shadow write 0x{:08x}[{}] not forwarded",
                access.address,
                access.size
            );
            AccessOutcome::ShadowWrite
        };

        self.monitors.lock().unwrap().post_write(access);
        Ok(outcome)
    }
}

impl AccessHook for RemoteMemoryProxy {
    fn on_access(&mut self, access: &MemoryAccess) -> Result<AccessOutcome, RemoteAccessError> {
        let window = match resolve_window(&self.windows, access.address, access.size) {
            Some(w) => w,
            None => return Ok(AccessOutcome::Passthrough),
        };
        if !window.access.allows(access.kind) {
            // Kind not enabled on the winning window: native handling,
            // no transport call, no monitor hooks.
            debug!(
                "{:?} at 0x{:08x} rejected by window '{}'",
                access.kind, access.address, window.name
            );
            return Ok(AccessOutcome::Passthrough);
        }
        let write_back = window.write_back;

        match access.kind {
            AccessKind::Read | AccessKind::Execute => self.handle_read(access),
            AccessKind::Write => self.handle_write(access, write_back),
        }
    }
}
