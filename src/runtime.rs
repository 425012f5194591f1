//! runtime.rs
//! `HandContext` owns what the hand interface's threads share (config, state cell,
//! device gate, metrics, cancel token) and starts each loop on its own named thread.
//!
//! Bring-up order: device (activate, settle, close), sampler, stream server, heartbeat,
//! then whichever input watchers the caller attaches. Shutdown cancels once and joins
//! everything in start order.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    thread::{self, JoinHandle},
};
use log::{error, info, warn};

use crate::component_a::{
    device::{DeviceChannel, GripperDevice, actuate},
    heartbeat::Heartbeat,
    sampler::Sampler,
    state_cell::SharedStateCell,
    stream_server::StreamServer,
};
use crate::component_b::{
    actuation::ActuationPort,
    input_watcher::{InputStateMachine, spawn_watcher},
};
use crate::utils::{
    cancel::CancelToken,
    config::AppConfig,
    error::DeviceFault,
    metrics::{SharedMetrics, shared_metrics},
};

pub struct HandContext {
    config: AppConfig,
    cell: Arc<SharedStateCell>,
    device: Arc<DeviceChannel>,
    metrics: SharedMetrics,
    cancel: CancelToken,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl HandContext {
    pub fn new(config: AppConfig, device: Box<dyn GripperDevice>) -> Self {
        Self {
            config,
            cell: Arc::new(SharedStateCell::new()),
            device: Arc::new(DeviceChannel::new(device)),
            metrics: shared_metrics(),
            cancel: CancelToken::new(),
            threads: Vec::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cell(&self) -> &Arc<SharedStateCell> {
        &self.cell
    }

    pub fn device(&self) -> &Arc<DeviceChannel> {
        &self.device
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn actuation_port(&self) -> ActuationPort {
        ActuationPort::new(self.cell.clone(), self.device.clone(), self.metrics.clone())
    }

    /// Activates (which also calibrates), waits for the fingers to settle, then closes.
    pub fn bring_up_device(&self) -> Result<(), DeviceFault> {
        info!("[Hand] activating gripper");
        self.device.activate()?;

        let settle = self.config.telemetry.startup_settle();
        if !self.cancel.sleep(settle) {
            return Ok(());
        }

        self.device.with_device(|dev| {
            self.cell.set_command(false);
            actuate(dev, false)
        })?;
        info!("[Hand] gripper activated and closed");
        Ok(())
    }

    pub fn start_sampler(&mut self) -> io::Result<()> {
        let mut sampler = Sampler::new(
            self.cell.clone(),
            self.device.clone(),
            self.config.telemetry.sample_period(),
            self.metrics.clone(),
        );
        let core = self.config.telemetry.sampler_core;
        let cancel = self.cancel.clone();

        self.spawn("sampler", move || {
            if let Some(core) = core {
                pin_to_core(core);
            }
            sampler.run(&cancel);
        })
    }

    /// Binds the stream listener and starts serving. Returns the bound address.
    pub fn start_stream_server(&mut self) -> io::Result<SocketAddr> {
        let t = &self.config.telemetry;
        let addr: SocketAddr = t
            .bind_addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let server = StreamServer::bind(addr, self.cell.clone(), t.format, t.stream_period(), self.metrics.clone())?;
        let bound = server.local_addr()?;
        let cancel = self.cancel.clone();

        self.spawn("stream-server", move || server.run(&cancel))?;
        Ok(bound)
    }

    pub fn start_heartbeat(&mut self) -> io::Result<()> {
        let h = &self.config.heartbeat;
        if !h.enabled {
            info!("[Hand] heartbeat disabled");
            return Ok(());
        }
        let group: IpAddr = h
            .group
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let heartbeat = Heartbeat::new(group, h.port, h.ttl, h.period(), self.metrics.clone())?;
        let cancel = self.cancel.clone();

        self.spawn("heartbeat", move || heartbeat.run(&cancel))
    }

    pub fn attach_watcher(&mut self, watcher: Box<dyn InputStateMachine>) -> io::Result<()> {
        let name = watcher.name();
        let handle = spawn_watcher(watcher, self.cancel.clone())?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Sampler, stream server and heartbeat. Returns the stream address.
    pub fn start_telemetry(&mut self) -> io::Result<SocketAddr> {
        self.start_sampler()?;
        let addr = self.start_stream_server()?;
        self.start_heartbeat()?;
        Ok(addr)
    }

    fn spawn(&mut self, name: &str, f: impl FnOnce() + Send + 'static) -> io::Result<()> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
        self.threads.push((name.to_string(), handle));
        Ok(())
    }

    /// Cancels every loop and joins them.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        for (name, handle) in self.threads.drain(..) {
            match handle.join() {
                Ok(()) => info!("[Hand] {} joined", name),
                Err(_) => error!("[Hand] {} exited with a panic", name),
            }
        }
    }
}

impl Drop for HandContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(id) if core_affinity::set_for_current(*id) => info!("[Sampler] pinned to core {}", core),
        Some(_) => warn!("[Sampler] failed to pin to core {}", core),
        None => warn!("[Sampler] core {} not found among available cores", core),
    }
}
