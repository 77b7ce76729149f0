use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::pump::{read_pump, write_pump};
use crate::{Device, Error, Packet, Result, Tun};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, info_span, warn};

/// Moves raw IP packets between a [`Device`] and two bounded queues.
///
/// [`read`](Engine::read) and [`write`](Engine::write) only ever touch the
/// queues. Two pump threads, launched by [`start`](Engine::start), do the
/// blocking device I/O.
pub struct Engine {
    name: String,
    device: Arc<dyn Device>,
    config: EngineConfig,
    incoming_tx: Sender<Packet>,
    incoming_rx: Receiver<Packet>,
    outgoing_tx: Sender<Packet>,
    outgoing_rx: Receiver<Packet>,
    cancel: CancellationToken,
    started: AtomicBool,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens the named TUN interface with default settings.
    pub fn open(name: &str) -> Result<Self> {
        Self::with_config(EngineConfig::for_interface(name))
    }

    /// Opens and configures the TUN interface named in `config`.
    ///
    /// Nothing is returned unless both steps succeed.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let tun = Tun::open_and_configure(&config.interface)?;
        let name = tun.name().to_string();
        Ok(Self::build(name, Arc::new(tun), config))
    }

    /// Builds an engine around an already opened device.
    pub fn with_device(device: Box<dyn Device>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let name = config.interface.clone();
        Ok(Self::build(name, Arc::from(device), config))
    }

    fn build(name: String, device: Arc<dyn Device>, config: EngineConfig) -> Self {
        let (incoming_tx, incoming_rx) = channel::bounded(config.queue_capacity);
        let (outgoing_tx, outgoing_rx) = channel::bounded(config.queue_capacity);
        Self {
            name,
            device,
            config,
            incoming_tx,
            incoming_rx,
            outgoing_tx,
            outgoing_rx,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            writer: Mutex::new(None),
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Packets waiting in the incoming queue.
    pub fn pending_incoming(&self) -> usize {
        self.incoming_rx.len()
    }

    /// Launches the read and write pumps.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on every call after the first,
    /// [`Error::DeviceClosed`] after [`close`](Engine::close).
    pub fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::DeviceClosed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let reader = {
            let device = Arc::clone(&self.device);
            let incoming = self.incoming_tx.clone();
            let cancel = self.cancel.clone();
            let packet_size = self.config.packet_size;
            let retry = self.config.retry;
            let span = info_span!("read_pump", iface = %self.name);
            thread::Builder::new()
                .name(format!("{}-rx", self.name))
                .spawn(move || {
                    let _enter = span.enter();
                    read_pump(&*device, incoming, &cancel, packet_size, retry);
                })
        };
        // Detached: it may stay parked in a blocking device read past close.
        if let Err(err) = reader {
            self.cancel.cancel();
            return Err(Error::Spawn(err));
        }

        let writer = {
            let device = Arc::clone(&self.device);
            let outgoing = self.outgoing_rx.clone();
            let cancel = self.cancel.clone();
            let retry = self.config.retry;
            let span = info_span!("write_pump", iface = %self.name);
            thread::Builder::new()
                .name(format!("{}-tx", self.name))
                .spawn(move || {
                    let _enter = span.enter();
                    write_pump(&*device, outgoing, &cancel, retry);
                })
        };
        match writer {
            Ok(handle) => {
                *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => {
                self.cancel.cancel();
                return Err(Error::Spawn(err));
            }
        }

        info!(iface = %self.name, "packet pumps started");
        Ok(())
    }

    /// Takes the next packet received from the device, blocking while the
    /// incoming queue is empty.
    ///
    /// After [`close`](Engine::close) packets already queued are still
    /// returned; once the queue is empty this fails with
    /// [`Error::QueueClosed`].
    pub fn read(&self) -> Result<Packet> {
        if let Ok(packet) = self.incoming_rx.try_recv() {
            return Ok(packet);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        select! {
            recv(self.incoming_rx) -> packet => packet.map_err(|_| Error::QueueClosed),
            recv(self.cancel.signal()) -> _ => {
                self.incoming_rx.try_recv().map_err(|_| Error::QueueClosed)
            }
        }
    }

    /// Like [`read`](Engine::read) but returns `None` instead of blocking.
    pub fn try_read(&self) -> Option<Packet> {
        self.incoming_rx.try_recv().ok()
    }

    /// Queues `packet` for the device, blocking while the outgoing queue is
    /// full.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceClosed`] if the engine is closed before the packet
    /// could be queued.
    pub fn write(&self, packet: Packet) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::DeviceClosed);
        }
        select! {
            send(self.outgoing_tx, packet) -> res => res.map_err(|_| Error::DeviceClosed),
            recv(self.cancel.signal()) -> _ => Err(Error::DeviceClosed),
        }
    }

    /// Stops the pumps and releases the device.
    ///
    /// The write pump is joined before the device is closed, so nothing is
    /// written to a released handle. A read already blocked in the device is
    /// not interrupted. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.cancel.cancel() {
            return Ok(());
        }
        debug!(iface = %self.name, "closing engine");

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if writer.join().is_err() {
                warn!(iface = %self.name, "write pump panicked");
            }
        }

        self.device.close().map_err(Error::Close)?;
        info!(iface = %self.name, "engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(iface = %self.name, error = %err, "failed to close engine");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .field("pending_incoming", &self.incoming_rx.len())
            .field("pending_outgoing", &self.outgoing_tx.len())
            .finish()
    }
}
