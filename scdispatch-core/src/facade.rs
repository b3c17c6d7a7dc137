//! Public facade: the single entry point an embedding application talks
//! to. Owns the shared region, the prescheduler thread, the reply/debug
//! reader threads, the resource cache, and the lifecycle state machine;
//! fans every observable occurrence out to registered listeners as a
//! [`FacadeEvent`].
//!
//! Event fan-out is callback-based (`on_event` registers a closure invoked
//! synchronously from whichever thread observed the occurrence) rather
//! than a single-consumer channel split — listeners are explicitly
//! multi-subscriber ("listeners survive everything except destroy",
//! plural), which an mpmc/broadcast channel doesn't model as directly as a
//! callback list. Events are delivered live, not replayed from a retained
//! history.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio_callback::BlockReport;
use crate::config::{Config, ConfigOverrides};
use crate::direct_writer::{DirectWriter, SendMeta};
use crate::error::{DispatchError, SendOutcome};
use crate::osc::{NtpTimeTag, OscArg, OscMessageOwned, OscPacketOwned};
use crate::prescheduler::{CancelSelector, Prescheduler};
use crate::purge;
use crate::reply_path::{DebugReader, DeliveredReply, ReplyReader};
use crate::resource_cache::{validate_resource_path, BufferId, ResourceCache, ResourceRef};
use crate::shared_region::{RingSizes, SharedRegion};

const SYNC_REPLY_ADDRESS: &str = "/synced";
const SYNC_REQUEST_ADDRESS: &str = "/sync";
const AUX_READER_POLL_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state: `uninitialised -> initialising -> ready ->
/// {suspended -> ready, reset -> ready, shutdown -> uninitialised,
/// destroy -> terminal}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    Uninitialised,
    Initialising,
    Ready,
    Suspended,
    Destroyed,
}

/// Why a resource load event fired (`loading:{start,complete}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    SynthDef,
    Sample,
}

/// Audio-context lifecycle sub-events
/// (`audiocontext:{statechange,resumed,suspended,interrupted}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContextEvent {
    StateChange,
    Resumed,
    Suspended,
    Interrupted,
}

/// The complete observable event set, one variant per lifecycle row.
#[derive(Debug, Clone)]
pub enum FacadeEvent {
    Ready,
    Shutdown,
    Destroy,
    In(DeliveredReply),
    OutOsc { bytes: Vec<u8>, source_id: u32, sequence: u64 },
    Debug(String),
    AudioContext(AudioContextEvent),
    Loading { kind: ResourceKind, name: String, start: bool },
    RecoverStart,
}

type Listener = Box<dyn Fn(&FacadeEvent) + Send>;

struct AuxThreads {
    reply_shutdown: Arc<std::sync::atomic::AtomicBool>,
    reply_handle: JoinHandle<()>,
    debug_shutdown: Arc<std::sync::atomic::AtomicBool>,
    debug_handle: JoinHandle<()>,
}

/// The public facade object.
pub struct Facade {
    shared: Arc<SharedRegion>,
    config: Config,
    prescheduler: Arc<Prescheduler>,
    prescheduler_handle: Mutex<Option<JoinHandle<()>>>,
    direct_writer: DirectWriter,
    resource_cache: Mutex<ResourceCache>,
    state: Mutex<FacadeState>,
    listeners: Mutex<Vec<Listener>>,
    aux: Mutex<Option<AuxThreads>>,
    sync_waiters: Arc<(Mutex<HashSet<i32>>, Condvar)>,
    next_session: AtomicU32,
    id_tag: u8,
}

impl Facade {
    /// `init(config)`. Validates configuration synchronously, throwing
    /// directly from the constructor on failure, builds the shared region,
    /// spawns the prescheduler and the reply/debug reader threads, and
    /// transitions straight to `Ready`.
    pub fn init(overrides: ConfigOverrides, ring_sizes: RingSizes) -> Result<Arc<Self>, DispatchError> {
        let config = Config::from_overrides(&overrides)?;
        let shared = SharedRegion::new(ring_sizes);
        let (prescheduler, prescheduler_handle) = Prescheduler::spawn(Arc::clone(&shared), &config);
        let direct_writer = DirectWriter::new(Arc::clone(&shared), Arc::clone(&prescheduler), &config);
        let id_tag = config.ntp_identifier_tag;

        let facade = Arc::new(Self {
            shared: Arc::clone(&shared),
            config,
            prescheduler,
            prescheduler_handle: Mutex::new(Some(prescheduler_handle)),
            direct_writer,
            resource_cache: Mutex::new(ResourceCache::new()),
            state: Mutex::new(FacadeState::Initialising),
            listeners: Mutex::new(Vec::new()),
            aux: Mutex::new(None),
            sync_waiters: Arc::new((Mutex::new(HashSet::new()), Condvar::new())),
            next_session: AtomicU32::new(1),
            id_tag,
        });

        facade.spawn_aux_threads();
        *facade.state.lock().expect("facade state poisoned") = FacadeState::Ready;
        log::info!(target: "dispatch::facade", "initialised and ready");
        facade.emit(FacadeEvent::Ready);
        Ok(facade)
    }

    fn spawn_aux_threads(self: &Arc<Self>) {
        let reply_shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let debug_shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reply_flag = Arc::clone(&reply_shutdown);
        let reply_facade = Arc::clone(self);
        let reply_handle = thread::Builder::new()
            .name("dispatch-reply-reader".to_string())
            .spawn(move || {
                let mut reader = ReplyReader::new(Arc::clone(&reply_facade.shared), reply_facade.id_tag);
                while !reply_flag.load(Ordering::Relaxed) {
                    for delivered in reader.drain() {
                        reply_facade.observe_sync_reply(&delivered);
                        reply_facade.emit(FacadeEvent::In(delivered));
                    }
                    thread::sleep(AUX_READER_POLL_INTERVAL);
                }
            })
            .expect("failed to spawn dispatch-reply-reader thread");

        let debug_flag = Arc::clone(&debug_shutdown);
        let debug_facade = Arc::clone(self);
        let debug_handle = thread::Builder::new()
            .name("dispatch-debug-reader".to_string())
            .spawn(move || {
                let reader = DebugReader::new(Arc::clone(&debug_facade.shared));
                while !debug_flag.load(Ordering::Relaxed) {
                    for line in reader.drain() {
                        debug_facade.emit(FacadeEvent::Debug(line));
                    }
                    thread::sleep(AUX_READER_POLL_INTERVAL);
                }
            })
            .expect("failed to spawn dispatch-debug-reader thread");

        *self.aux.lock().expect("facade aux poisoned") =
            Some(AuxThreads { reply_shutdown, reply_handle, debug_shutdown, debug_handle });
    }

    fn observe_sync_reply(&self, delivered: &DeliveredReply) {
        if let OscPacketOwned::Message(msg) = &delivered.packet {
            if msg.address == SYNC_REPLY_ADDRESS {
                if let Some(OscArg::Int32(id)) = msg.args.first() {
                    let (set, cvar) = &*self.sync_waiters;
                    set.lock().expect("sync waiter set poisoned").insert(*id);
                    cvar.notify_all();
                }
            }
        }
    }

    fn stop_aux_threads(&self) {
        if let Some(aux) = self.aux.lock().expect("facade aux poisoned").take() {
            aux.reply_shutdown.store(true, Ordering::Relaxed);
            aux.debug_shutdown.store(true, Ordering::Relaxed);
            let _ = aux.reply_handle.join();
            let _ = aux.debug_handle.join();
        }
    }

    pub fn state(&self) -> FacadeState {
        *self.state.lock().expect("facade state poisoned")
    }

    /// Hands the shared region out so the host can drive an
    /// `AudioCallback` against the exact same rings/clock/metrics.
    pub fn shared_region(&self) -> Arc<SharedRegion> {
        Arc::clone(&self.shared)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a listener invoked for every subsequent event. Listeners
    /// survive everything except `destroy`.
    pub fn on_event(&self, listener: impl Fn(&FacadeEvent) + Send + 'static) {
        self.listeners.lock().expect("facade listeners poisoned").push(Box::new(listener));
    }

    fn emit(&self, event: FacadeEvent) {
        for listener in self.listeners.lock().expect("facade listeners poisoned").iter() {
            listener(&event);
        }
    }

    /// Forwards the OSC-log frames from one audio block as `out:osc`
    /// events. Call once per `process_block`.
    pub fn report_block(&self, report: &BlockReport) {
        if !report.osc_log_frames.is_empty() {
            log::trace!(target: "dispatch::osclog", "forwarding {} logged frame(s) as out:osc events", report.osc_log_frames.len());
        }
        for frame in &report.osc_log_frames {
            self.emit(FacadeEvent::OutOsc {
                bytes: frame.bytes.clone(),
                source_id: frame.source_id,
                sequence: frame.sequence,
            });
        }
    }

    /// Allocates a fresh session id (the facade owns the session/tag
    /// taxonomy); tags remain caller-chosen strings.
    pub fn new_session_id(&self) -> u32 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// `send(address, args...)`: convenience for an untimed message with
    /// no session/tag bookkeeping.
    pub fn send(&self, address: impl Into<String>, args: Vec<OscArg>) -> SendOutcome {
        let packet = OscPacketOwned::Message(OscMessageOwned { address: address.into(), args });
        self.direct_writer.send(packet, SendMeta { session_id: 0, tag: String::new(), target_ntp: None }, self.id_tag)
    }

    /// `sendOSC(bytes, {session, tag, target_ntp})`.
    pub fn send_osc(&self, packet: OscPacketOwned, session_id: u32, tag: String, target_ntp: Option<NtpTimeTag>) -> SendOutcome {
        self.direct_writer.send(packet, SendMeta { session_id, tag, target_ntp }, self.id_tag)
    }

    pub fn cancel(&self, selector: CancelSelector) {
        self.prescheduler.cancel(selector);
    }

    pub fn cancel_all(&self) {
        self.cancel(CancelSelector::All);
    }

    /// `purge()`: blocks until both acknowledgements land.
    pub fn purge(&self) -> Result<(), DispatchError> {
        purge::purge(&self.shared, &self.prescheduler, self.id_tag)
    }

    /// `loadSynthDef(name_or_bytes)`. Fetching the bytes themselves is out
    /// of scope; this records the resource so `recover`'s full-reload path
    /// can replay it, and emits the
    /// `loading:{start,complete}` pair around the (synchronous, in-crate)
    /// cache write.
    pub fn load_synthdef(&self, name: impl Into<String>, resource: ResourceRef) {
        let name = name.into();
        self.emit(FacadeEvent::Loading { kind: ResourceKind::SynthDef, name: name.clone(), start: true });
        self.resource_cache.lock().expect("resource cache poisoned").record_synthdef(name.clone(), resource);
        self.emit(FacadeEvent::Loading { kind: ResourceKind::SynthDef, name, start: false });
    }

    /// `loadSample(buffer_id, name_or_bytes, start_frame?, num_frames?)`.
    /// `start_frame`/`num_frames` select a sub-range of a
    /// fetched sample but don't change what's cached for replay, so they
    /// are accepted and otherwise unused here (the out-of-scope fetch
    /// layer consumes them).
    pub fn load_sample(
        &self,
        buffer_id: BufferId,
        name: impl Into<String>,
        resource: ResourceRef,
        base: &std::path::Path,
        _start_frame: Option<u32>,
        _num_frames: Option<u32>,
    ) -> Result<(), DispatchError> {
        let name = name.into();
        if let ResourceRef::Url(path) = &resource {
            validate_resource_path(path, base).map_err(|_| {
                log::warn!(target: "dispatch::facade", "rejected unsafe sample path: {path}");
                DispatchError::InvalidConfig(format!("unsafe sample path: {path}"))
            })?;
        }
        self.emit(FacadeEvent::Loading { kind: ResourceKind::Sample, name: name.clone(), start: true });
        self.resource_cache.lock().expect("resource cache poisoned").record_sample(buffer_id, resource);
        self.emit(FacadeEvent::Loading { kind: ResourceKind::Sample, name, start: false });
        Ok(())
    }

    /// `sync(id)`: sends `/sync id` and blocks until the engine's
    /// matching `/synced id` reply is observed, or `timeout` elapses.
    pub fn sync(&self, id: i32) -> Result<(), DispatchError> {
        self.sync_with_timeout(id, DEFAULT_SYNC_TIMEOUT)
    }

    pub fn sync_with_timeout(&self, id: i32, timeout: Duration) -> Result<(), DispatchError> {
        {
            let (set, _) = &*self.sync_waiters;
            set.lock().expect("sync waiter set poisoned").remove(&id);
        }

        let outcome = self.send(SYNC_REQUEST_ADDRESS, vec![OscArg::Int32(id)]);
        if outcome != SendOutcome::Ok {
            return Err(DispatchError::SyncTimeout);
        }

        let (set, cvar) = &*self.sync_waiters;
        let mut guard = set.lock().expect("sync waiter set poisoned");
        let deadline = Instant::now() + timeout;
        while !guard.contains(&id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DispatchError::SyncTimeout);
            }
            let (new_guard, result) = cvar.wait_timeout(guard, remaining).expect("sync waiter set poisoned");
            guard = new_guard;
            if result.timed_out() && !guard.contains(&id) {
                return Err(DispatchError::SyncTimeout);
            }
        }
        guard.remove(&id);
        Ok(())
    }

    /// `suspend()`: application-side state only — the host still owns
    /// whether it actually calls into the audio callback.
    pub fn suspend(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock().expect("facade state poisoned");
        if *state != FacadeState::Ready {
            return Err(DispatchError::WrongState { expected: "ready", actual: state_name(*state) });
        }
        *state = FacadeState::Suspended;
        drop(state);
        self.emit(FacadeEvent::AudioContext(AudioContextEvent::Suspended));
        Ok(())
    }

    /// `resume()`.
    pub fn resume(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock().expect("facade state poisoned");
        if *state != FacadeState::Suspended {
            return Err(DispatchError::WrongState { expected: "suspended", actual: state_name(*state) });
        }
        *state = FacadeState::Ready;
        drop(state);
        self.emit(FacadeEvent::AudioContext(AudioContextEvent::Resumed));
        Ok(())
    }

    /// `reset()`: cancels everything pending in the prescheduler,
    /// re-anchors the NTP clock, and returns to `Ready`
    /// without touching the resource cache (callers that also want the
    /// cache replayed want `recover`, not `reset`).
    pub fn reset(&self) -> Result<(), DispatchError> {
        self.cancel_all();
        self.shared.clock.resync();
        *self.state.lock().expect("facade state poisoned") = FacadeState::Ready;
        self.emit(FacadeEvent::Ready);
        Ok(())
    }

    /// `recover()`: resumes if merely suspended; otherwise performs a full
    /// `reset()` and replays every cached synth-def/sample load (the
    /// full-reload path).
    pub fn recover(&self) -> Result<(), DispatchError> {
        if self.state() == FacadeState::Suspended {
            return self.resume();
        }

        log::info!(target: "dispatch::facade", "recovering: full reset plus cached-resource replay");
        self.emit(FacadeEvent::RecoverStart);
        self.reset()?;

        let cache = self.resource_cache.lock().expect("resource cache poisoned");
        let synthdefs: Vec<(String, ResourceRef)> =
            cache.synthdefs().map(|(name, r)| (name.clone(), r.clone())).collect();
        let samples: Vec<(BufferId, ResourceRef)> = cache.samples().map(|(id, r)| (*id, r.clone())).collect();
        drop(cache);

        for (name, resource) in synthdefs {
            self.emit(FacadeEvent::Loading { kind: ResourceKind::SynthDef, name: name.clone(), start: true });
            self.resource_cache.lock().expect("resource cache poisoned").record_synthdef(name.clone(), resource);
            self.emit(FacadeEvent::Loading { kind: ResourceKind::SynthDef, name, start: false });
        }
        for (buffer_id, resource) in samples {
            let name = buffer_id.to_string();
            self.emit(FacadeEvent::Loading { kind: ResourceKind::Sample, name: name.clone(), start: true });
            self.resource_cache.lock().expect("resource cache poisoned").record_sample(buffer_id, resource);
            self.emit(FacadeEvent::Loading { kind: ResourceKind::Sample, name, start: false });
        }

        Ok(())
    }

    /// `shutdown()`: stops the prescheduler and auxiliary reader threads
    /// and returns to `Uninitialised`. Fires
    /// `shutdown` exactly once.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock().expect("facade state poisoned");
            if matches!(*state, FacadeState::Uninitialised | FacadeState::Destroyed) {
                return Err(DispatchError::WrongState { expected: "ready or suspended", actual: state_name(*state) });
            }
            *state = FacadeState::Uninitialised;
        }

        self.prescheduler.request_shutdown();
        if let Some(handle) = self.prescheduler_handle.lock().expect("facade prescheduler handle poisoned").take() {
            let _ = handle.join();
        }
        self.stop_aux_threads();

        log::info!(target: "dispatch::facade", "shut down");
        self.emit(FacadeEvent::Shutdown);
        Ok(())
    }

    /// `destroy()`: shuts down if not already, fires
    /// `destroy` before listeners are cleared, then transitions to the
    /// terminal `Destroyed` state.
    pub fn destroy(&self) {
        if !matches!(self.state(), FacadeState::Uninitialised | FacadeState::Destroyed) {
            let _ = self.shutdown();
        }
        self.emit(FacadeEvent::Destroy);
        *self.state.lock().expect("facade state poisoned") = FacadeState::Destroyed;
        self.listeners.lock().expect("facade listeners poisoned").clear();
    }
}

fn state_name(state: FacadeState) -> &'static str {
    match state {
        FacadeState::Uninitialised => "uninitialised",
        FacadeState::Initialising => "initialising",
        FacadeState::Ready => "ready",
        FacadeState::Suspended => "suspended",
        FacadeState::Destroyed => "destroyed",
    }
}
