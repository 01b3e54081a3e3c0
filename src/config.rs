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

/// Session configuration, loaded from a JSON file and validated once up
/// front. Anything that can be rejected here is rejected here, so the
/// access path and the handoff sequence never hit a config surprise mid-run.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{validate_windows, MemoryRegion, MemoryWindow};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Addresses appear as "0x..." strings in the JSON. 64-bit numbers as hex
/// strings avoids both ambiguity about radix and JavaScript-side precision
/// loss for tooling that consumes the same files.
pub mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("0x{:x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        let s = String::deserialize(de)?;
        super::parse_hex_address(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex address \"{}\"", s)))
    }
}

/// Parse a hex address from a string (supports "0x1234" or "1234" format).
pub fn parse_hex_address(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u64::from_str_radix(hex_str, 16).ok()
}

/// A memory range synchronized target->emulator at the handoff point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncRange {
    #[serde(with = "hex_u64")]
    pub base: u64,
    #[serde(with = "hex_u64")]
    pub size: u64,
}

/// Serial side-channel parameters for payload delivery. 8N1 framing is
/// fixed; only the device path and baud rate vary per rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub architecture: String,
    pub cpu_model: String,
    pub memory_map: Vec<MemoryRegion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub machine: MachineConfig,

    /// Probe server address for the physical target, e.g. "127.0.0.1:4444".
    pub probe_addr: String,
    /// Debug port of the emulator, same line protocol as the probe.
    pub emulator_addr: String,
    /// Where the remote-memory server accepts the emulator's interceptor
    /// connection, e.g. "127.0.0.1:9999".
    pub remote_memory_listen: String,

    pub firmware_image: PathBuf,

    /// Breakpoint at the firmware's post-initialization point; execution is
    /// handed to the emulator here.
    #[serde(with = "hex_u64")]
    pub entry_breakpoint: u64,
    /// Breakpoint at the vulnerable function's return instruction, armed
    /// for the delivery phase.
    #[serde(with = "hex_u64")]
    pub vuln_return_breakpoint: u64,

    /// Memory copied target->emulator before registers at the handoff.
    pub sync_ranges: Vec<SyncRange>,

    /// Interception windows served by the remote memory proxy.
    pub windows: Vec<MemoryWindow>,

    pub serial: SerialConfig,

    /// Directory for persisted artifacts (register dumps, captured payloads).
    pub output_dir: PathBuf,
}

impl SessionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// One-shot validation. Window ambiguity, empty register/memory setup
    /// and nonsensical sync ranges all fail the session before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.memory_map.is_empty() {
            return Err(ConfigError::Invalid("memory_map is empty".to_string()));
        }
        validate_windows(&self.windows).map_err(ConfigError::Invalid)?;

        for range in &self.sync_ranges {
            if range.size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "sync range at 0x{:x} has zero size",
                    range.base
                )));
            }
            let covered = self
                .machine
                .memory_map
                .iter()
                .any(|r| range.base >= r.base && range.base + range.size <= r.end());
            if !covered {
                return Err(ConfigError::Invalid(format!(
                    "sync range 0x{:x}+0x{:x} is outside every mapped region",
                    range.base, range.size
                )));
            }
        }

        for window in &self.windows {
            if window.size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "window '{}' has zero size",
                    window.name
                )));
            }
        }

        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid("serial baud rate is zero".to_string()));
        }
        Ok(())
    }
}
