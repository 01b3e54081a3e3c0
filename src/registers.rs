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

/// The architecture-defined register set transferred between target and
/// emulator. The name list and its order are fixed; both sides of a transfer
/// must support exactly these names.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical transfer order for the Cortex-M core registers. The banked
/// stack pointers (msp/psp) come last so the active sp is written before
/// the banked copies.
pub const CORE_REGISTERS: [&str; 19] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "xpsr", "msp", "psp",
];

/// EPSR Thumb bit in xPSR. Cortex-M only executes Thumb; a transfer that
/// leaves this bit cleared puts the destination decoder in ARM mode and
/// execution diverges on the first instruction after the handoff.
pub const XPSR_THUMB_BIT: u32 = 1 << 5;

#[derive(Debug, Error)]
pub enum RegisterSetError {
    #[error("unknown register '{0}', not part of the fixed transfer set")]
    Unknown(String),
    #[error("register '{0}' missing from capture")]
    Missing(&'static str),
}

/// A full capture of the core register set, indexed by canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSet {
    values: Vec<u32>, // one slot per CORE_REGISTERS entry
}

impl RegisterSet {
    pub fn new() -> Self {
        Self {
            values: vec![0; CORE_REGISTERS.len()],
        }
    }

    /// Index of a register name in the canonical order.
    pub fn index_of(name: &str) -> Option<usize> {
        CORE_REGISTERS.iter().position(|r| *r == name)
    }

    /// Build a set from (name, value) pairs. Every pair must name a known
    /// register and every known register must be present -- a partial or
    /// mislabeled capture is a contract violation, not a silent default.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, RegisterSetError>
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let mut values = vec![None; CORE_REGISTERS.len()];
        for (name, value) in pairs {
            let idx =
                Self::index_of(&name).ok_or_else(|| RegisterSetError::Unknown(name.clone()))?;
            values[idx] = Some(value);
        }
        if let Some(missing) = values.iter().position(|v| v.is_none()) {
            return Err(RegisterSetError::Missing(CORE_REGISTERS[missing]));
        }
        Ok(Self {
            values: values.into_iter().flatten().collect(),
        })
    }

    pub fn get(&self, name: &str) -> Result<u32, RegisterSetError> {
        Self::index_of(name)
            .map(|i| self.values[i])
            .ok_or_else(|| RegisterSetError::Unknown(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: u32) -> Result<(), RegisterSetError> {
        let idx = Self::index_of(name).ok_or_else(|| RegisterSetError::Unknown(name.to_string()))?;
        self.values[idx] = value;
        Ok(())
    }

    pub fn pc(&self) -> u32 {
        self.values[Self::index_of("pc").unwrap()]
    }

    pub fn lr(&self) -> u32 {
        self.values[Self::index_of("lr").unwrap()]
    }

    pub fn xpsr(&self) -> u32 {
        self.values[Self::index_of("xpsr").unwrap()]
    }

    /// Iterate registers in canonical transfer order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        CORE_REGISTERS
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

impl Default for RegisterSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_roundtrip() {
        let pairs: Vec<(String, u32)> = CORE_REGISTERS
            .iter()
            .enumerate()
            .map(|(i, r)| (r.to_string(), i as u32 * 4))
            .collect();
        let set = RegisterSet::from_pairs(pairs).unwrap();
        assert_eq!(set.get("r0").unwrap(), 0);
        assert_eq!(set.get("sp").unwrap(), 13 * 4);
        assert_eq!(set.pc(), 15 * 4);
    }

    #[test]
    fn unknown_register_is_an_error() {
        let mut pairs: Vec<(String, u32)> = CORE_REGISTERS
            .iter()
            .map(|r| (r.to_string(), 0))
            .collect();
        pairs.push(("cpsr_fake".to_string(), 1));
        assert!(RegisterSet::from_pairs(pairs).is_err());

        let set = RegisterSet::new();
        assert!(set.get("r99").is_err());
    }

    #[test]
    fn missing_register_is_an_error() {
        let pairs: Vec<(String, u32)> = CORE_REGISTERS
            .iter()
            .skip(1) // drop r0
            .map(|r| (r.to_string(), 0))
            .collect();
        let err = RegisterSet::from_pairs(pairs).unwrap_err();
        assert!(err.to_string().contains("r0"));
    }

    #[test]
    fn canonical_iteration_order() {
        let set = RegisterSet::new();
        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names, CORE_REGISTERS.to_vec());
    }
}
