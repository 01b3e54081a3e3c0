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

use serde::{Deserialize, Serialize};

/// The kind of a memory access as seen by the interception layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// An rwx permission/allow set, written as a string like "rw" or "rwx" in
/// configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessSet {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl AccessSet {
    pub const RWX: AccessSet = AccessSet {
        read: true,
        write: true,
        execute: true,
    };

    pub fn allows(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Read => self.read,
            AccessKind::Write => self.write,
            AccessKind::Execute => self.execute,
        }
    }
}

impl TryFrom<String> for AccessSet {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let mut set = AccessSet {
            read: false,
            write: false,
            execute: false,
        };
        for c in s.chars() {
            match c {
                'r' => set.read = true,
                'w' => set.write = true,
                'x' => set.execute = true,
                '-' => {}
                other => return Err(format!("invalid access flag '{}' in \"{}\"", other, s)),
            }
        }
        Ok(set)
    }
}

impl From<AccessSet> for String {
    fn from(set: AccessSet) -> String {
        let mut s = String::new();
        if set.read {
            s.push('r');
        }
        if set.write {
            s.push('w');
        }
        if set.execute {
            s.push('x');
        }
        s
    }
}

/// A named region of the target's address space (flash, ram, peripherals).
/// Regions are allowed to overlap -- memory-mapped aliasing is real hardware
/// behavior -- so nothing here assumes disjointness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    #[serde(with = "crate::config::hex_u64")]
    pub base: u64,
    #[serde(with = "crate::config::hex_u64")]
    pub size: u64,
    pub perms: AccessSet,
}

impl MemoryRegion {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// An interception window: emulator accesses inside it are forwarded to the
/// live target. Windows may overlap; the highest priority wins, ties broken
/// by the smaller (more specific) window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryWindow {
    pub name: String,
    #[serde(with = "crate::config::hex_u64")]
    pub base: u64,
    #[serde(with = "crate::config::hex_u64")]
    pub size: u64,
    #[serde(default)]
    pub priority: u32,
    pub access: AccessSet,
    /// When false the window is shadow read-only: proxied writes never reach
    /// the target and the emulator keeps its local copy instead.
    #[serde(default = "default_write_back")]
    pub write_back: bool,
}

fn default_write_back() -> bool {
    true
}

impl MemoryWindow {
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    /// Whether the byte range [addr, addr+len) lies entirely inside the window.
    pub fn covers(&self, addr: u64, len: usize) -> bool {
        addr >= self.base && addr.saturating_add(len as u64) <= self.end()
    }

    pub fn overlaps(&self, other: &MemoryWindow) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Pick the window governing an access: highest priority first, smallest
/// range on ties. Returns None when no window covers the full access.
pub fn resolve_window<'a>(
    windows: &'a [MemoryWindow],
    addr: u64,
    len: usize,
) -> Option<&'a MemoryWindow> {
    windows.iter().filter(|w| w.covers(addr, len)).min_by(|a, b| {
        b.priority
            .cmp(&a.priority) // higher priority wins
            .then(a.size.cmp(&b.size)) // then the narrower window
    })
}

/// Reject window sets where overlap resolution would be ambiguous: two
/// overlapping windows with the same priority and the same size have no
/// most-specific winner. Checked once at session start, never at access time.
pub fn validate_windows(windows: &[MemoryWindow]) -> Result<(), String> {
    for (i, a) in windows.iter().enumerate() {
        for b in windows.iter().skip(i + 1) {
            if a.overlaps(b) && a.priority == b.priority && a.size == b.size {
                return Err(format!(
                    "windows '{}' and '{}' overlap with equal priority {} and equal size 0x{:x}; \
                     resolution is ambiguous",
                    a.name, b.name, a.priority, a.size
                ));
            }
        }
    }
    Ok(())
}
