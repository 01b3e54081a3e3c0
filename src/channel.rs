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

use std::io::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use crate::config::SerialConfig;

/// Byte-stream side channel for delivering input to the device, separate
/// from the debug transport. The delivery pipeline's payload constructor is
/// its only user.
pub trait PayloadChannel: Send {
    fn connect(&mut self) -> Result<()>;
    fn send(&mut self, data: &[u8]) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
}

/// UART channel, 8N1 framing at the configured baud rate.
pub struct SerialPayloadChannel {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPayloadChannel {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }
}

impl PayloadChannel for SerialPayloadChannel {
    fn connect(&mut self) -> Result<()> {
        let port = serialport::new(&self.config.device, self.config.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_secs(5))
            .open()
            .with_context(|| format!("opening serial port {}", self.config.device))?;
        info!(
            "serial channel open: {} @ {} 8N1",
            self.config.device, self.config.baud
        );
        self.port = Some(port);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .context("serial channel is not connected")?;
        port.write_all(data)
            .with_context(|| format!("writing {} bytes to {}", data.len(), self.config.device))?;
        port.flush().context("flushing serial port")?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            info!("serial channel closed: {}", self.config.device);
        }
        Ok(())
    }
}
