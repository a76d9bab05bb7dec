//! Session records and the registry with its first-client admission policy.
//!
//! The registry is the single owner of session state, keyed by the 32-bit
//! session id; the control loop and fan-out pipeline hold ids and
//! snapshots, never references into the map. A session is mutated only by
//! the control loop driving its connection.
//!
//! ## Admission
//!
//! The first accepted SETUP pins the server to that client's transport
//! profile `(is_multicast, is_tcp)` and fixes the effective client cap:
//! multicast allows up to the configured ceiling, unicast and
//! TCP-interleaved are single-client. Subsequent SETUPs must match the
//! profile exactly. The profile clears when the last session departs, so a
//! fresh first client may pick any transport again.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::transport::tcp::TcpSender;
use crate::transport::SessionTransport;

/// The transport shape pinned by the first accepted SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportProfile {
    pub is_multicast: bool,
    pub is_tcp: bool,
}

/// One RTSP session.
///
/// Created when a connection issues its first request, registered (and
/// counted) on its first successful SETUP, removed on TEARDOWN,
/// disconnect, or fatal send failure.
pub struct Session {
    pub id: u32,
    pub peer: SocketAddr,
    pub sender: Arc<TcpSender>,
    /// Client RTP ports declared per kind in UDP unicast SETUPs.
    pub video_port: u16,
    pub audio_port: u16,
    pub subtitles_port: u16,
    pub is_multicast: bool,
    pub is_tcp: bool,
    pub is_playing: bool,
    /// Last CSeq echoed to this session.
    pub cseq: u32,
}

impl Session {
    pub fn profile(&self) -> TransportProfile {
        TransportProfile {
            is_multicast: self.is_multicast,
            is_tcp: self.is_tcp,
        }
    }

    fn transport_snapshot(&self) -> SessionTransport {
        if self.is_multicast {
            SessionTransport::Multicast
        } else if self.is_tcp {
            SessionTransport::Interleaved {
                sender: self.sender.clone(),
            }
        } else {
            SessionTransport::Unicast {
                ip: self.peer.ip(),
                video_port: self.video_port,
                audio_port: self.audio_port,
                subtitles_port: self.subtitles_port,
            }
        }
    }
}

/// Verdict of the admission check for a SETUP. Both rejections answer
/// `461 Unsupported Transport` on the wire; the distinction is kept for
/// logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Transport does not match the pinned profile.
    Mismatch,
    /// Profile matches but the ceiling is full.
    Full,
}

struct AdmissionState {
    profile: Option<TransportProfile>,
    active_clients: usize,
    effective_max: u8,
}

/// Registry of live sessions plus the aggregate state the fan-out and
/// control loop consult: the active-client count, the admission profile,
/// and the any-session-playing flag.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u32, Session>>,
    admission: Mutex<AdmissionState>,
    playing: Mutex<bool>,
    used_ids: Mutex<HashSet<u32>>,
    configured_max: u8,
}

impl SessionRegistry {
    pub fn new(configured_max: u8) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            admission: Mutex::new(AdmissionState {
                profile: None,
                active_clients: 0,
                effective_max: configured_max,
            }),
            playing: Mutex::new(false),
            used_ids: Mutex::new(HashSet::new()),
            configured_max,
        }
    }

    /// Generate a session id: random, non-zero, never repeated within this
    /// server's uptime.
    pub fn generate_session_id(&self) -> u32 {
        let mut used = self.used_ids.lock();
        loop {
            let id = rand::rng().random::<u32>();
            if id != 0 && used.insert(id) {
                return id;
            }
        }
    }

    /// Apply the admission rule for a SETUP with the given profile.
    ///
    /// `new_session` is false when the session is already registered
    /// (repeated SETUP for another media kind): it consumes no capacity
    /// but must still match the pinned profile.
    pub fn admit(&self, profile: TransportProfile, new_session: bool) -> Admission {
        let mut adm = self.admission.lock();
        match adm.profile {
            None => {
                adm.profile = Some(profile);
                adm.effective_max = if profile.is_multicast {
                    self.configured_max
                } else {
                    1
                };
                tracing::info!(
                    multicast = profile.is_multicast,
                    tcp = profile.is_tcp,
                    max_clients = adm.effective_max,
                    "first client pinned the transport profile"
                );
            }
            Some(first) => {
                if first != profile {
                    return Admission::Mismatch;
                }
            }
        }
        if new_session {
            if adm.active_clients >= usize::from(adm.effective_max) {
                return Admission::Full;
            }
            adm.active_clients += 1;
        }
        Admission::Accepted
    }

    /// Undo the capacity taken by [`admit`](Self::admit) when a SETUP
    /// fails after admission (e.g. RTP socket setup). No-op unless the
    /// admit consumed a slot.
    pub(crate) fn release_slot(&self, took_slot: bool) {
        if !took_slot {
            return;
        }
        let mut adm = self.admission.lock();
        adm.active_clients = adm.active_clients.saturating_sub(1);
        if adm.active_clients == 0 {
            adm.profile = None;
            adm.effective_max = self.configured_max;
        }
    }

    /// Register a session created by its first successful SETUP. The
    /// capacity slot was already taken by [`admit`](Self::admit).
    pub fn insert(&self, session: Session) {
        let id = session.id;
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(id, session);
            sessions.len()
        };
        tracing::debug!(session_id = id, total, "session registered");
    }

    /// Mutate a registered session under the write lock.
    pub fn with_session_mut<R>(&self, id: u32, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.write().get_mut(&id).map(f)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Remove a session, releasing its capacity slot. Returns true when it
    /// was the last one — the caller then clears shared transport state.
    /// The admission profile resets here so a fresh first client may pick
    /// any transport.
    pub fn remove(&self, id: u32) -> Option<bool> {
        self.sessions.write().remove(&id)?;

        let was_last = {
            let mut adm = self.admission.lock();
            adm.active_clients = adm.active_clients.saturating_sub(1);
            let was_last = adm.active_clients == 0;
            if was_last {
                adm.profile = None;
                adm.effective_max = self.configured_max;
            }
            was_last
        };

        self.recompute_playing();
        tracing::debug!(session_id = id, was_last, "session removed");
        Some(was_last)
    }

    /// Sessions with at least one successful SETUP.
    pub fn active_clients(&self) -> usize {
        self.admission.lock().active_clients
    }

    /// Effective client cap: the configured ceiling until a first SETUP
    /// pins the profile, then per that profile.
    pub fn effective_max_clients(&self) -> u8 {
        self.admission.lock().effective_max
    }

    pub fn at_capacity(&self) -> bool {
        let adm = self.admission.lock();
        adm.active_clients >= usize::from(adm.effective_max)
    }

    /// Flip a session's playing state and refresh the aggregate.
    pub fn set_playing(&self, id: u32, playing: bool) -> bool {
        let found = self
            .with_session_mut(id, |s| s.is_playing = playing)
            .is_some();
        if found {
            self.recompute_playing();
        }
        found
    }

    /// True while any session is in the PLAY state.
    pub fn any_playing(&self) -> bool {
        *self.playing.lock()
    }

    /// Copy the transport descriptors of every playing session. Taken
    /// before fan-out so no registry lock is held across network sends.
    pub fn snapshot_playing(&self) -> Vec<SessionTransport> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing)
            .map(Session::transport_snapshot)
            .collect()
    }

    fn recompute_playing(&self) {
        let any = self.sessions.read().values().any(|s| s.is_playing);
        *self.playing.lock() = any;
    }
}
