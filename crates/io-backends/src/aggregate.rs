//! One device list spanning several backends.

use std::sync::Arc;

use engine_rt::{InputPacket, OutputPacket};

use crate::{AudioDeviceBackend, BackendError, BackendKind, DeviceInfo, PacketHandler, Result, StreamConfig};

/// Concatenates the device lists of its members. Device `n` of the aggregate
/// is the `n`-th device when the members' lists are laid end to end, and
/// packets reach the handler stamped with that aggregate index.
#[derive(Default)]
pub struct AggregatedBackend {
    members: Vec<Box<dyn AudioDeviceBackend>>,
}

impl std::fmt::Debug for AggregatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.members.iter().map(|m| m.name().to_owned()))
            .finish()
    }
}

impl AggregatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, member: Box<dyn AudioDeviceBackend>) -> Self {
        self.members.push(member);
        self
    }

    pub fn push(&mut self, member: Box<dyn AudioDeviceBackend>) {
        self.members.push(member);
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Member index and member-local device index of aggregate device `device`.
    fn locate(&self, device: usize) -> Result<(usize, usize)> {
        let mut offset = 0;
        for (member, backend) in self.members.iter().enumerate() {
            let count = backend.devices()?.len();
            if device < offset + count {
                return Ok((member, device - offset));
            }
            offset += count;
        }
        Err(BackendError::DeviceNotFound(device))
    }
}

/// Restamps member-local packets with the aggregate device index.
struct Remap {
    device: usize,
    inner: Arc<dyn PacketHandler>,
}

impl PacketHandler for Remap {
    fn process<'a>(&self, inputs: &[InputPacket<'a>], outputs: &mut [OutputPacket<'_>]) {
        for packet in outputs.iter_mut() {
            packet.device = self.device;
        }
        let restamp = |packet: &InputPacket<'a>| -> InputPacket<'a> {
            let mut packet = *packet;
            packet.device = self.device;
            packet
        };
        match inputs.split_last() {
            None => self.inner.process(&[], outputs),
            Some((last, rest)) => {
                for packet in rest {
                    self.inner.process(&[restamp(packet)], &mut []);
                }
                self.inner.process(&[restamp(last)], outputs);
            }
        }
    }
}

impl AudioDeviceBackend for AggregatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Aggregated
    }

    fn name(&self) -> &str {
        "aggregated"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();
        for member in &self.members {
            for mut info in member.devices()? {
                info.index = devices.len();
                devices.push(info);
            }
        }
        Ok(devices)
    }

    fn open(&mut self, device: usize, config: &StreamConfig, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let (member, local) = self.locate(device)?;
        let remap = Arc::new(Remap {
            device,
            inner: handler,
        });
        self.members[member].open(local, config, remap)
    }

    fn start(&mut self, device: usize) -> Result<()> {
        let (member, local) = self.locate(device)?;
        self.members[member].start(local)
    }

    fn stop(&mut self, device: usize) -> Result<()> {
        let (member, local) = self.locate(device)?;
        self.members[member].stop(local)
    }

    fn close(&mut self, device: usize) {
        if let Ok((member, local)) = self.locate(device) {
            self.members[member].close(local);
        }
    }

    fn is_running(&self, device: usize) -> bool {
        self.locate(device)
            .is_ok_and(|(member, local)| self.members[member].is_running(local))
    }
}
