//! High-level server orchestrator: lifecycle, the producer push API, and
//! the fan-out pipeline.
//!
//! The host application owns the media pipeline (camera, encoder,
//! microphone) and pushes finished units — JPEG frames, PCM blocks,
//! subtitle lines — into the server, which packetizes each unit once and
//! delivers the packets to every playing session over its negotiated
//! transport.
//!
//! Backpressure is single-slot drop-on-busy: while a unit of some kind is
//! still being fanned out, further pushes of that kind return immediately
//! without queueing. With [`ServerConfig::video_worker`] enabled, video
//! pushes instead stage the frame in a preallocated slot and a dedicated
//! worker performs the fan-out, so a slow receiver cannot stall the
//! producer's capture loop.

use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::config::{ServerConfig, VIDEO_SLOT_SIZE};
use crate::control;
use crate::error::{Result, RtspError};
use crate::media::jpeg::{self, FrameGeometry};
use crate::media::{l16, t140, MediaKind, MediaStreams};
use crate::session::SessionRegistry;
use crate::transport::udp::{UdpMux, UdpScope};
use crate::transport::SessionTransport;

/// State shared between the server handle, the control loop, and the
/// video worker.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) streams: MediaStreams,
    pub(crate) udp: UdpMux,
    pub(crate) video_slot: VideoSlot,
    pub(crate) running: AtomicBool,
}

/// The RTSP server.
///
/// ```no_run
/// use rtsp_cam::{Server, ServerConfig, TransportType};
///
/// let mut server = Server::new(ServerConfig {
///     transport: TransportType::VideoOnly,
///     rtsp_port: 8554,
///     ..ServerConfig::default()
/// }).unwrap();
/// server.start().unwrap();
///
/// // Capture loop:
/// // if server.ready_for_frame() {
/// //     server.push_frame(&jpeg, 60, 640, 480).unwrap();
/// // }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    control: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    /// Validate the configuration and build the server. The three media
    /// SSRCs are carved from [`ServerConfig::device_id`], falling back to
    /// a random seed.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let seed = config
            .device_id
            .unwrap_or_else(|| rand::rng().random::<u64>());
        let max_clients = config.clamped_max_clients();

        Ok(Self {
            shared: Arc::new(Shared {
                registry: SessionRegistry::new(max_clients),
                streams: MediaStreams::new(seed),
                udp: UdpMux::new(),
                video_slot: VideoSlot::new(),
                running: AtomicBool::new(false),
                config,
            }),
            control: None,
            worker: None,
        })
    }

    /// Bind the RTSP listener and spawn the control loop (and the video
    /// worker when configured).
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.shared.config.rtsp_port))?;
        listener.set_nonblocking(true)?;
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        self.control = Some(thread::spawn(move || control::control_loop(listener, shared)));

        if self.shared.config.video_worker && self.shared.config.transport.has_video() {
            let shared = self.shared.clone();
            self.worker = Some(thread::spawn(move || video_worker_loop(shared)));
        }

        tracing::info!(port = self.shared.config.rtsp_port, "RTSP server listening");
        Ok(())
    }

    /// Stop the server: the control loop closes every connection and the
    /// shared RTP sockets are released.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.video_slot.wake();
        if let Some(handle) = self.control.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.udp.close_all();
        tracing::info!("RTSP server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Push one JPEG frame. Drops immediately unless a session is playing
    /// and no earlier frame is still in flight.
    ///
    /// `quality` is carried verbatim in the JPEG payload header; `width`
    /// and `height` must be multiples of 8 no larger than 2040.
    pub fn push_frame(&self, data: &[u8], quality: u8, width: u16, height: u16) -> Result<()> {
        let geometry = FrameGeometry {
            quality,
            width,
            height,
        };
        geometry.validate()?;

        if !self.shared.config.transport.has_video() || !self.shared.registry.any_playing() {
            return Ok(());
        }
        if !self.shared.streams.begin_send(MediaKind::Video) {
            return Ok(()); // previous frame still in flight
        }

        if self.shared.config.video_worker {
            if !self.shared.video_slot.stage(data, geometry) {
                // Slot unavailable (unallocated or frame oversized):
                // nothing will fan out, so restore the flag ourselves.
                self.shared.streams.finish_send(MediaKind::Video);
            }
            return Ok(());
        }

        fan_out_video(&self.shared, data, geometry);
        self.shared.streams.finish_send(MediaKind::Video);
        Ok(())
    }

    /// Push a block of 16-bit PCM samples (host byte order).
    pub fn push_audio(&self, samples: &[i16]) {
        if !self.shared.config.transport.has_audio() || !self.shared.registry.any_playing() {
            return;
        }
        if !self.shared.streams.begin_send(MediaKind::Audio) {
            return;
        }

        let packets = {
            let mut stream = self.shared.streams.audio.lock();
            l16::packetize_audio(&mut stream, samples)
        };
        deliver(&self.shared, MediaKind::Audio, &packets);
        self.shared.streams.finish_send(MediaKind::Audio);
    }

    /// Push one subtitle line (UTF-8, T.140).
    pub fn push_subtitle(&self, text: &str) {
        if !self.shared.config.transport.has_subtitles() || !self.shared.registry.any_playing() {
            return;
        }
        if !self.shared.streams.begin_send(MediaKind::Subtitles) {
            return;
        }

        let packet = {
            let mut stream = self.shared.streams.subtitles.lock();
            t140::packetize_subtitle(&mut stream, text.as_bytes())
        };
        deliver(&self.shared, MediaKind::Subtitles, std::slice::from_ref(&packet));
        self.shared.streams.finish_send(MediaKind::Subtitles);
    }

    /// Whether a [`push_frame`](Self::push_frame) right now would be
    /// delivered rather than dropped.
    pub fn ready_for_frame(&self) -> bool {
        self.shared.config.transport.has_video()
            && self.shared.registry.any_playing()
            && self.shared.streams.is_sent(MediaKind::Video)
    }

    pub fn ready_for_audio(&self) -> bool {
        self.shared.config.transport.has_audio()
            && self.shared.registry.any_playing()
            && self.shared.streams.is_sent(MediaKind::Audio)
    }

    pub fn ready_for_subtitles(&self) -> bool {
        self.shared.config.transport.has_subtitles()
            && self.shared.registry.any_playing()
            && self.shared.streams.is_sent(MediaKind::Subtitles)
    }

    /// Frames actually delivered per second, refreshed once per second.
    /// Handy for overlaying the true stream rate in subtitles.
    pub fn rtp_fps(&self) -> u32 {
        self.shared.streams.rtp_fps()
    }

    /// Sessions with at least one successful SETUP.
    pub fn active_clients(&self) -> usize {
        self.shared.registry.active_clients()
    }

    /// True while any session is in the PLAY state.
    pub fn is_playing(&self) -> bool {
        self.shared.registry.any_playing()
    }

    /// Effective client cap under the current admission profile.
    pub fn max_clients(&self) -> u8 {
        self.shared.registry.effective_max_clients()
    }
}

/// Packetize one frame under the video stream lock, then deliver.
fn fan_out_video(shared: &Shared, data: &[u8], geometry: FrameGeometry) {
    let packets = {
        let mut video = shared.streams.video.lock();
        let increment = video.on_frame();
        let packets = jpeg::packetize_frame(&mut video.rtp, data, geometry, increment);
        shared.streams.store_rtp_fps(video.fps());
        packets
    };
    deliver(shared, MediaKind::Video, &packets);
}

/// Send a packetized unit to every playing session.
///
/// Works on a registry snapshot — no lock is held across sends. Multicast
/// delivery is de-duplicated: one emission per unit regardless of how many
/// multicast sessions are subscribed. Per-recipient errors drop packets
/// for that recipient only; a vanished peer is cleaned up by the control
/// loop on its next read.
fn deliver(shared: &Shared, kind: MediaKind, packets: &[Vec<u8>]) {
    let snapshots = shared.registry.snapshot_playing();
    let mut multicast_sent = false;

    for transport in &snapshots {
        match transport {
            SessionTransport::Multicast => {
                if multicast_sent {
                    continue;
                }
                multicast_sent = true;
                let dest = SocketAddr::V4(SocketAddrV4::new(
                    shared.config.multicast_group,
                    kind.rtp_port(&shared.config),
                ));
                for packet in packets {
                    log_udp_result(
                        shared.udp.send(kind, UdpScope::Multicast, packet, dest),
                        kind,
                    );
                }
            }
            SessionTransport::Unicast { ip, .. } => {
                let port = match transport.client_port(kind) {
                    Some(p) if p != 0 => p,
                    _ => continue, // kind not set up by this session
                };
                let dest = SocketAddr::new(*ip, port);
                for packet in packets {
                    log_udp_result(
                        shared.udp.send(kind, UdpScope::Unicast, packet, dest),
                        kind,
                    );
                }
            }
            SessionTransport::Interleaved { sender } => {
                let channel = shared.streams.channel(kind);
                for packet in packets {
                    match sender.send_interleaved(channel, packet) {
                        Ok(()) => {}
                        Err(RtspError::SendBusy) => {
                            tracing::debug!(kind = kind.control_name(), "interleaved send busy, packet dropped");
                        }
                        Err(RtspError::PeerClosed) => break,
                        Err(e) => {
                            tracing::warn!(kind = kind.control_name(), error = %e, "interleaved send failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn log_udp_result(result: Result<()>, kind: MediaKind) {
    match result {
        Ok(()) => {}
        Err(RtspError::SendBusy) => {
            tracing::debug!(kind = kind.control_name(), "UDP send busy, packet dropped");
        }
        Err(e) => {
            tracing::warn!(kind = kind.control_name(), error = %e, "UDP send failed");
        }
    }
}

/// The dedicated video fan-out task: drains the staging slot and restores
/// the in-flight flag when done.
fn video_worker_loop(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let Some((buf, len, geometry)) = shared.video_slot.take_frame(&shared.running) else {
            continue;
        };
        fan_out_video(&shared, &buf[..len], geometry);
        shared.video_slot.put_back(buf);
        shared.streams.finish_send(MediaKind::Video);
    }
    tracing::debug!("video worker exited");
}

/// Single-slot staging buffer between the producer and the video worker.
///
/// The buffer is allocated once (on the first video SETUP) and only ever
/// written while empty; the worker takes it wholesale, fans the frame
/// out, and puts it back cleared. A frame arriving while the slot is
/// occupied is dropped.
pub(crate) struct VideoSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

struct SlotState {
    buf: Vec<u8>,
    len: usize,
    /// The worker currently owns the buffer.
    taken: bool,
    allocated: bool,
    geometry: FrameGeometry,
}

impl VideoSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                buf: Vec::new(),
                len: 0,
                taken: false,
                allocated: false,
                geometry: FrameGeometry {
                    quality: 0,
                    width: 0,
                    height: 0,
                },
            }),
            ready: Condvar::new(),
        }
    }

    /// Reserve the slot's capacity. Called from the first video SETUP.
    pub(crate) fn ensure_allocated(&self) {
        let mut state = self.state.lock();
        if !state.allocated {
            state.buf.reserve_exact(VIDEO_SLOT_SIZE);
            state.allocated = true;
            tracing::debug!(capacity = VIDEO_SLOT_SIZE, "video staging slot allocated");
        }
    }

    /// Copy a frame into the slot if it is empty. Returns false when the
    /// slot is occupied, unallocated, or the frame exceeds its capacity.
    fn stage(&self, data: &[u8], geometry: FrameGeometry) -> bool {
        let mut state = self.state.lock();
        if !state.allocated || state.taken || state.len != 0 {
            return false;
        }
        if data.len() > VIDEO_SLOT_SIZE {
            tracing::warn!(len = data.len(), capacity = VIDEO_SLOT_SIZE, "frame exceeds staging slot, dropped");
            return false;
        }
        state.buf.clear();
        state.buf.extend_from_slice(data);
        state.len = data.len();
        state.geometry = geometry;
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Worker side: wait for a staged frame and take the buffer out of
    /// the slot. Returns `None` when woken without a frame (shutdown or
    /// spurious wakeup) so the caller can re-check `running`.
    fn take_frame(&self, running: &AtomicBool) -> Option<(Vec<u8>, usize, FrameGeometry)> {
        let mut state = self.state.lock();
        if state.len == 0 {
            let _ = self
                .ready
                .wait_for(&mut state, Duration::from_millis(100));
        }
        if state.len == 0 || !running.load(Ordering::SeqCst) {
            return None;
        }
        state.taken = true;
        let len = state.len;
        let geometry = state.geometry;
        let buf = std::mem::take(&mut state.buf);
        Some((buf, len, geometry))
    }

    /// Worker side: return the drained buffer and mark the slot empty.
    fn put_back(&self, buf: Vec<u8>) {
        let mut state = self.state.lock();
        state.buf = buf;
        state.len = 0;
        state.taken = false;
    }

    /// Wake the worker so it can observe shutdown.
    fn wake(&self) {
        self.ready.notify_all();
    }
}
