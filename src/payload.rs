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

//! Exploit payload assembly. The interesting analysis happened earlier, in
//! the symbolic engine; here we only turn its captured trace (or a literal
//! test string) into the bytes that go down the serial channel.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where the delivered bytes come from. Mirrors the three run modes of the
/// analysis workflow: a literal smoke-test string, a fully trace-derived
/// exploit, or a trace-derived input paired with a canned payload file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PayloadSpec {
    Literal {
        input: String,
        payload: String,
    },
    FromTrace {
        trace: PathBuf,
        template: PathBuf,
    },
    TraceInputWithFilePayload {
        trace: PathBuf,
        payload_file: PathBuf,
    },
}

/// The assembled exploit: the input that steers execution down the
/// vulnerable path, and the payload that overflows the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploitPayload {
    pub input: Vec<u8>,
    pub payload: Vec<u8>,
}

impl ExploitPayload {
    pub fn build(spec: &PayloadSpec) -> Result<Self> {
        match spec {
            PayloadSpec::Literal { input, payload } => Ok(Self {
                input: input.clone().into_bytes(),
                payload: payload.clone().into_bytes(),
            }),
            PayloadSpec::FromTrace { trace, template } => {
                let input = input_from_trace(trace)?;
                let template_text = fs::read_to_string(template)
                    .with_context(|| format!("reading payload template {}", template.display()))?;
                let payload = render_template(&template_text, &input);
                Ok(Self { input, payload })
            }
            PayloadSpec::TraceInputWithFilePayload {
                trace,
                payload_file,
            } => {
                let input = input_from_trace(trace)?;
                let payload = fs::read_to_string(payload_file)
                    .with_context(|| format!("reading payload file {}", payload_file.display()))?
                    .trim()
                    .as_bytes()
                    .to_vec();
                Ok(Self { input, payload })
            }
        }
    }

    /// Persist the payload bytes for later replay.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.payload)
            .with_context(|| format!("writing payload to {}", path.display()))?;
        info!("payload saved to {}", path.display());
        Ok(())
    }
}

/// Recover the concrete input bytes the solver chose for the vulnerable
/// path. Test-case lines in the captured trace look like
/// `v0_input_0 = 0x49`; bytes are taken in line order.
fn input_from_trace(trace: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(trace)
        .with_context(|| format!("reading trace {}", trace.display()))?;
    let re = Regex::new(r"v\d+_\w+_\d+\s*=\s*0x([0-9a-fA-F]{1,2})\b").unwrap();
    let bytes: Vec<u8> = re
        .captures_iter(&text)
        .filter_map(|cap| u8::from_str_radix(&cap[1], 16).ok())
        .collect();
    if bytes.is_empty() {
        bail!(
            "no test-case bytes found in trace {}; was the path captured?",
            trace.display()
        );
    }
    Ok(bytes)
}

/// Substitute the derived input into the payload template. `{input}` is the
/// only placeholder.
fn render_template(template: &str, input: &[u8]) -> Vec<u8> {
    let input_str = String::from_utf8_lossy(input);
    template
        .trim_end_matches('\n')
        .replace("{input}", &input_str)
        .into_bytes()
}
