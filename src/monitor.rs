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

use anyhow::Result;
use log::{info, warn};

use crate::emulator::MemoryAccess;

/// Observer invoked around every proxied memory access and at session stop.
///
/// Monitors are observational: they see accesses, they never veto them. A
/// hook returning an error is logged and the access proceeds. Hooks run
/// synchronously on the access path, so a slow monitor stalls the emulator;
/// keep them cheap.
pub trait Monitor: Send {
    fn pre_read(&mut self, _access: &MemoryAccess) -> Result<()> {
        Ok(())
    }
    fn post_read(&mut self, _access: &MemoryAccess, _value: &[u8]) -> Result<()> {
        Ok(())
    }
    fn pre_write(&mut self, _access: &MemoryAccess) -> Result<()> {
        Ok(())
    }
    fn post_write(&mut self, _access: &MemoryAccess) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) {}
}

/// Ordered monitor list. Hooks fire in attachment order, every monitor sees
/// every access.
#[derive(Default)]
pub struct MonitorRegistry {
    monitors: Vec<Box<dyn Monitor>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.push(monitor);
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn pre_read(&mut self, access: &MemoryAccess) {
        for m in &mut self.monitors {
            if let Err(e) = m.pre_read(access) {
                warn!("monitor pre_read failed (ignored): {:#}", e);
            }
        }
    }

    pub fn post_read(&mut self, access: &MemoryAccess, value: &[u8]) {
        for m in &mut self.monitors {
            if let Err(e) = m.post_read(access, value) {
                warn!("monitor post_read failed (ignored): {:#}", e);
            }
        }
    }

    pub fn pre_write(&mut self, access: &MemoryAccess) {
        for m in &mut self.monitors {
            if let Err(e) = m.pre_write(access) {
                warn!("monitor pre_write failed (ignored): {:#}", e);
            }
        }
    }

    pub fn post_write(&mut self, access: &MemoryAccess) {
        for m in &mut self.monitors {
            if let Err(e) = m.post_write(access) {
                warn!("monitor post_write failed (ignored): {:#}", e);
            }
        }
    }

    pub fn notify_stop(&mut self) {
        for m in &mut self.monitors {
            m.stop();
        }
    }
}

/// Logs every proxied access, values included.
pub struct RwLogMonitor;

impl Monitor for RwLogMonitor {
    fn pre_read(&mut self, access: &MemoryAccess) -> Result<()> {
        info!(
            "emulator requesting read 0x{:08x}[{}]",
            access.address, access.size
        );
        Ok(())
    }

    fn post_read(&mut self, access: &MemoryAccess, value: &[u8]) -> Result<()> {
        info!(
            "executed read 0x{:08x}[{}] = {:02x?}",
            access.address, access.size, value
        );
        Ok(())
    }

    fn pre_write(&mut self, access: &MemoryAccess) -> Result<()> {
        info!(
            "emulator requesting write 0x{:08x}[{}] = {:02x?}",
            access.address,
            access.size,
            access.value.as_deref().unwrap_or(&[])
        );
        Ok(())
    }

    fn post_write(&mut self, access: &MemoryAccess) -> Result<()> {
        info!(
            "executed write 0x{:08x}[{}]",
            access.address, access.size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AccessKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        pre: Arc<AtomicUsize>,
        post: Arc<AtomicUsize>,
        fail_pre: bool,
    }

    impl Monitor for Counting {
        fn pre_read(&mut self, _access: &MemoryAccess) -> Result<()> {
            self.pre.fetch_add(1, Ordering::SeqCst);
            if self.fail_pre {
                anyhow::bail!("intentional");
            }
            Ok(())
        }
        fn post_read(&mut self, _access: &MemoryAccess, _value: &[u8]) -> Result<()> {
            self.post.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn read_access() -> MemoryAccess {
        MemoryAccess {
            address: 0x2000_0000,
            size: 4,
            kind: AccessKind::Read,
            value: None,
        }
    }

    #[test]
    fn hooks_fire_in_attachment_order_for_all_monitors() {
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        let mut registry = MonitorRegistry::new();
        for _ in 0..3 {
            registry.attach(Box::new(Counting {
                pre: pre.clone(),
                post: post.clone(),
                fail_pre: false,
            }));
        }
        registry.pre_read(&read_access());
        registry.post_read(&read_access(), &[1, 2, 3, 4]);
        assert_eq!(pre.load(Ordering::SeqCst), 3);
        assert_eq!(post.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn monitor_error_does_not_stop_the_others() {
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        let mut registry = MonitorRegistry::new();
        registry.attach(Box::new(Counting {
            pre: pre.clone(),
            post: post.clone(),
            fail_pre: true,
        }));
        registry.attach(Box::new(Counting {
            pre: pre.clone(),
            post: post.clone(),
            fail_pre: false,
        }));
        registry.pre_read(&read_access());
        // Both monitors ran despite the first one failing.
        assert_eq!(pre.load(Ordering::SeqCst), 2);
    }
}
