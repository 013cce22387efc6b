use std::sync::Arc;

use audio_buf::{BufferManager, DeviceSetup, Dir};
use engine_rt::{InputPacket, MessageQueue, OutputPacket};
use io_backends::{AudioDeviceBackend, DeviceInfo, PacketHandler, StreamConfig};

use crate::config::{EngineConfig, SubsystemConfig};
use crate::dsp::DspProcessor;
use crate::error::{EngineError, Result};
use crate::message::{ControlMessage, HostMessage};
use crate::subsystem::{Shared, Subsystem, SubsystemStats};

/// Sub-systems to wake when a device's direction becomes ready.
#[derive(Debug, Default, Clone)]
struct DeviceWake {
    on_input: Option<Arc<Shared>>,
    on_output: Option<Arc<Shared>>,
}

/// Packet handler installed on every opened device: feeds the buffer manager
/// and wakes the sub-system synchronised to the device.
struct Router {
    manager: Arc<BufferManager>,
    wake: Arc<[DeviceWake]>,
}

impl PacketHandler for Router {
    fn process(&self, inputs: &[InputPacket<'_>], outputs: &mut [OutputPacket<'_>]) {
        self.manager.update(inputs, outputs);
        for packet in inputs {
            if let Some(shared) = self.wake.get(packet.device).and_then(|w| w.on_input.as_ref()) {
                if self.manager.is_device_ready(packet.device, Dir::In) {
                    shared.notify();
                }
            }
        }
        for packet in outputs.iter() {
            if let Some(shared) = self.wake.get(packet.device).and_then(|w| w.on_output.as_ref()) {
                if self.manager.is_device_ready(packet.device, Dir::Out) {
                    shared.notify();
                }
            }
        }
    }
}

/// Everything built by one successful [`AudioSystem::configure`].
struct Configured {
    config: EngineConfig,
    manager: Arc<BufferManager>,
    subsystems: Vec<Subsystem>,
    /// Devices opened on the backend, with the number of enabled
    /// sub-systems using each.
    opened: Vec<(usize, usize)>,
}

/// Owns a backend, the buffer manager and one thread per sub-system.
pub struct AudioSystem {
    backend: Box<dyn AudioDeviceBackend>,
    host: MessageQueue<HostMessage>,
    configured: Option<Configured>,
}

impl std::fmt::Debug for AudioSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSystem")
            .field("backend", &self.backend.name())
            .field(
                "subsystems",
                &self.configured.as_ref().map_or(0, |c| c.subsystems.len()),
            )
            .finish()
    }
}

impl AudioSystem {
    pub fn new(backend: Box<dyn AudioDeviceBackend>) -> Self {
        Self {
            backend,
            host: MessageQueue::new(1),
            configured: None,
        }
    }

    pub fn backend(&self) -> &dyn AudioDeviceBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn AudioDeviceBackend {
        self.backend.as_mut()
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    pub fn config(&self) -> Option<&EngineConfig> {
        self.configured.as_ref().map(|c| &c.config)
    }

    pub fn subsystem_count(&self) -> usize {
        self.configured.as_ref().map_or(0, |c| c.subsystems.len())
    }

    pub fn manager(&self) -> Option<&Arc<BufferManager>> {
        self.configured.as_ref().map(|c| &c.manager)
    }

    /// Tears down any previous configuration, then builds buffers, threads
    /// and device streams for `config`. `processor` supplies the DSP
    /// processor of each sub-system by index.
    ///
    /// On error everything built so far is released and the system is left
    /// unconfigured.
    pub fn configure<F>(&mut self, config: EngineConfig, mut processor: F) -> Result<()>
    where
        F: FnMut(usize) -> Box<dyn DspProcessor>,
    {
        self.finalize();
        if let Err(err) = config.validate() {
            tracing::error!(%err, "rejected engine configuration");
            return Err(err);
        }
        let devices = self.backend.devices()?;
        let used = used_devices(&config, &devices)?;

        let mut manager = BufferManager::new(devices.len(), config.meter_ms);
        for &device in &used {
            manager.setup(device, &device_setup(&config, &devices[device], device))?;
        }
        let manager = Arc::new(manager);
        self.host = MessageQueue::new(config.host_queue_capacity);

        let mut subsystems = Vec::with_capacity(config.subsystems.len());
        for (index, subsystem) in config.subsystems.iter().enumerate() {
            subsystems.push(Subsystem::spawn(
                index,
                subsystem,
                manager.clone(),
                processor(index),
                self.host.clone(),
                config.realtime_priority,
            )?);
        }

        let mut wake = vec![DeviceWake::default(); devices.len()];
        for (subsystem, spawned) in config.subsystems.iter().zip(&subsystems) {
            let (device, on_input) = match (subsystem.input_device, subsystem.output_device) {
                (Some(input), _) if subsystem.sync_to_input => (input, true),
                (_, Some(output)) => (output, false),
                (Some(input), None) => (input, true),
                (None, None) => continue,
            };
            let slot = &mut wake[device];
            let target = if on_input { &mut slot.on_input } else { &mut slot.on_output };
            *target = Some(spawned.shared().clone());
        }
        let router: Arc<dyn PacketHandler> = Arc::new(Router {
            manager: manager.clone(),
            wake: wake.into(),
        });

        let mut configured = Configured {
            config,
            manager,
            subsystems,
            opened: Vec::new(),
        };
        for &device in &used {
            let stream = stream_config(&configured.config, &configured.manager, device);
            if let Err(err) = self.backend.open(device, &stream, router.clone()) {
                tracing::error!(device, %err, "failed to open device");
                self.configured = Some(configured);
                self.finalize();
                return Err(err.into());
            }
            configured.opened.push((device, 0));
        }
        tracing::info!(
            subsystems = configured.subsystems.len(),
            devices = configured.opened.len(),
            backend = self.backend.name(),
            "audio system configured"
        );
        self.configured = Some(configured);
        Ok(())
    }

    fn configured(&self) -> Result<&Configured> {
        self.configured.as_ref().ok_or(EngineError::NotConfigured)
    }

    fn subsystem(&self, index: usize) -> Result<&Subsystem> {
        self.configured()?
            .subsystems
            .get(index)
            .ok_or(EngineError::UnknownSubsystem(index))
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.subsystem(index).is_ok_and(|s| s.shared().is_enabled())
    }

    /// Lets sub-system `index` run and starts its devices.
    ///
    /// For a full-duplex sub-system the output buffers are first filled with
    /// silence, so output callbacks that precede the first processed block
    /// find data.
    pub fn enable(&mut self, index: usize) -> Result<()> {
        let Self {
            backend, configured, ..
        } = self;
        let configured = configured.as_mut().ok_or(EngineError::NotConfigured)?;
        let subsystem = configured
            .subsystems
            .get(index)
            .ok_or(EngineError::UnknownSubsystem(index))?;
        if subsystem.shared().is_enabled() {
            return Ok(());
        }
        let config = subsystem.config().clone();
        if let (Some(_), Some(output)) = (config.input_device, config.output_device) {
            while let Ok(true) = configured.manager.zero_output(output) {}
        }
        subsystem.shared().enable();

        let mut started = Vec::new();
        for device in bound_devices(&config) {
            let Some(entry) = configured.opened.iter_mut().find(|(d, _)| *d == device) else {
                continue;
            };
            if entry.1 == 0 {
                if let Err(err) = backend.start(device) {
                    tracing::error!(subsystem = index, device, %err, "failed to start device");
                    subsystem.shared().disable(configured.config.disable_timeout());
                    for device in started {
                        release(backend.as_mut(), &mut configured.opened, device);
                    }
                    return Err(err.into());
                }
            }
            entry.1 += 1;
            started.push(device);
        }
        tracing::info!(subsystem = index, "sub-system enabled");
        Ok(())
    }

    /// Stops sub-system `index` from running DSP callbacks, waiting up to the
    /// configured timeout for an in-flight callback, then stops devices no
    /// other enabled sub-system uses. Returns false if the wait timed out.
    pub fn disable(&mut self, index: usize) -> Result<bool> {
        let Self {
            backend, configured, ..
        } = self;
        let configured = configured.as_mut().ok_or(EngineError::NotConfigured)?;
        let subsystem = configured
            .subsystems
            .get(index)
            .ok_or(EngineError::UnknownSubsystem(index))?;
        if !subsystem.shared().is_enabled() {
            return Ok(true);
        }
        let idle = subsystem.shared().disable(configured.config.disable_timeout());
        if !idle {
            tracing::warn!(
                subsystem = index,
                timeout_ms = configured.config.disable_timeout_ms,
                "DSP callback still running after disable timeout"
            );
        }
        for device in bound_devices(subsystem.config()) {
            release(backend.as_mut(), &mut configured.opened, device);
        }
        tracing::info!(subsystem = index, "sub-system disabled");
        Ok(idle)
    }

    /// Queues a control message for its sub-system and wakes the thread.
    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.subsystem(message.subsystem)?.send(message)
    }

    pub fn try_recv(&self) -> Option<HostMessage> {
        self.host.try_pop().ok()
    }

    /// Hands every queued host message to `f`; returns how many there were.
    pub fn drain<F>(&self, f: F) -> usize
    where
        F: FnMut(HostMessage),
    {
        self.host.drain_with(f)
    }

    pub fn stats(&self, index: usize) -> Result<SubsystemStats> {
        Ok(self.subsystem(index)?.stats())
    }

    /// Disables every sub-system, wakes and joins their threads, closes the
    /// devices and releases the buffers. Idempotent.
    pub fn finalize(&mut self) {
        let Some(count) = self.configured.as_ref().map(|c| c.subsystems.len()) else {
            return;
        };
        for index in 0..count {
            if let Err(err) = self.disable(index) {
                tracing::warn!(subsystem = index, %err, "failed to disable sub-system");
            }
        }
        let Some(mut configured) = self.configured.take() else {
            return;
        };
        for subsystem in &mut configured.subsystems {
            subsystem.join();
        }
        for &(device, _) in &configured.opened {
            self.backend.close(device);
        }
        tracing::info!("audio system finalized");
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn bound_devices(config: &SubsystemConfig) -> Vec<usize> {
    let mut devices: Vec<usize> = config.input_device.into_iter().chain(config.output_device).collect();
    devices.dedup();
    devices
}

/// Drops one user of `device`, stopping it when none remain.
fn release(backend: &mut dyn AudioDeviceBackend, opened: &mut [(usize, usize)], device: usize) {
    let Some(entry) = opened.iter_mut().find(|(d, _)| *d == device) else {
        return;
    };
    entry.1 = entry.1.saturating_sub(1);
    if entry.1 == 0 {
        if let Err(err) = backend.stop(device) {
            tracing::warn!(device, %err, "failed to stop device");
        }
    }
}

/// Sorted, de-duplicated devices bound by any sub-system, checked against the
/// backend's device list.
fn used_devices(config: &EngineConfig, devices: &[DeviceInfo]) -> Result<Vec<usize>> {
    let mut used = Vec::new();
    for (subsystem, sub) in config.subsystems.iter().enumerate() {
        for device in bound_devices(sub) {
            if device >= devices.len() {
                return Err(EngineError::UnknownDevice {
                    subsystem,
                    device,
                    count: devices.len(),
                });
            }
            used.push(device);
        }
    }
    used.sort_unstable();
    used.dedup();
    Ok(used)
}

/// Sub-system whose buffer parameters a device takes. Validation guarantees
/// every sub-system sharing the device agrees.
fn owner(config: &EngineConfig, device: usize) -> Option<&SubsystemConfig> {
    config
        .binding(device, Dir::In)
        .or_else(|| config.binding(device, Dir::Out))
        .map(|index| &config.subsystems[index])
}

fn stream_config(config: &EngineConfig, manager: &BufferManager, device: usize) -> StreamConfig {
    let mut stream = StreamConfig {
        input_channels: manager.channel_count(device, Dir::In),
        output_channels: manager.channel_count(device, Dir::Out),
        ..StreamConfig::default()
    };
    if let Some(sub) = owner(config, device) {
        stream.sample_rate = sub.sample_rate;
        stream.cycle_frames = sub.device_cycle_frames;
    }
    stream
}

fn device_setup(config: &EngineConfig, info: &DeviceInfo, device: usize) -> DeviceSetup {
    let mut setup = DeviceSetup::default();
    if let Some(sub) = owner(config, device) {
        setup = setup
            .with_sample_rate(sub.sample_rate)
            .with_block(sub.dsp_block_frames, sub.cycle_count)
            .with_ratio(sub.rate_ratio);
    }
    if let Some(sub) = config.binding(device, Dir::In).map(|i| &config.subsystems[i]) {
        let channels = sub.input_channels.unwrap_or(info.input_channels);
        setup = setup.with_input(channels, sub.device_cycle_frames);
    }
    if let Some(sub) = config.binding(device, Dir::Out).map(|i| &config.subsystems[i]) {
        let channels = sub.output_channels.unwrap_or(info.output_channels);
        setup = setup.with_output(channels, sub.device_cycle_frames);
    }
    setup
}
