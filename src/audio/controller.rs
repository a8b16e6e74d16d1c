//! The volume controller.
//!
//! Keeps a local mirror of the default sink's volume and mute flag. The
//! mirror is refreshed whenever the server reports a change, and local
//! changes are applied optimistically before they are sent to the server.
//!
//! Every server interaction is a small async pipeline spawned on the
//! application's main loop. Pipelines never hold a sink index across
//! events: they look up the default sink by name each time, because the
//! default sink can change between an event and the query it triggers.
//! Overlapping pipelines are fine, the last one to finish wins.
//!
//! An optimistic update can race with a server event caused by another
//! client. Whatever arrives last ends up in the cache, which is good
//! enough for a volume slider.


use crate::audio::frontend::*;
use crate::audio::session::*;
use crate::errors::*;
use crate::prefs::{ConnectionPrefs, Prefs};
use crate::support::audio::*;
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::cell::Cell;
use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};



const SUBSCRIBED_FACILITIES: [Facility; 4] = [Facility::Sink,
                                              Facility::Source,
                                              Facility::SourceOutput,
                                              Facility::Server];



struct Inner {
    connector: Box<dyn Connector>,
    spawner: Rc<dyn LocalSpawn>,
    identity: AppIdentity,
    conn_prefs: ConnectionPrefs,
    scroll_step: Cell<u32>,

    session: RefCell<Option<Rc<dyn Session>>>,
    /// Bumped for every new session, so callbacks of replaced sessions
    /// can be told apart.
    generation: Cell<u64>,
    state: Cell<SessionState>,
    reconnect_attempts: Cell<u32>,
    reconnect_pending: Cell<bool>,

    volume: Cell<f64>,
    muted: Cell<bool>,
    sink_name: RefCell<Option<String>>,

    handlers: Handlers,
}


impl Inner {
    fn open_session(this: &Rc<Inner>) -> Result<()> {
        let old = this.session.borrow_mut().take();
        if let Some(old) = old {
            debug!("Dropping previous session");
            old.disconnect();
        }

        let generation = this.generation.get() + 1;
        this.generation.set(generation);
        this.state.set(SessionState::Unconnected);

        let session = this.connector.open(&this.identity)?;

        let weak = Rc::downgrade(this);
        session.set_state_callback(Box::new(move |state| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_state(&inner, generation, state);
            }
        }));

        let weak = Rc::downgrade(this);
        session.set_event_callback(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_event(&inner, generation, event);
            }
        }));

        *this.session.borrow_mut() = Some(session.clone());

        debug!("Connecting as {} {} ({})",
               this.identity.name,
               this.identity.version,
               this.identity.id);
        if let Err(e) = session.connect(this.conn_prefs.server.as_deref()) {
            warn!("pa_context_connect() failed: {}", e);
            if !this.state.get().is_terminal() {
                Inner::on_state(this, generation, SessionState::Failed);
            }
        }

        return Ok(());
    }


    fn on_state(this: &Rc<Inner>, generation: u64, state: SessionState) {
        if generation != this.generation.get() {
            debug!("Ignoring state {:?} of a replaced session", state);
            return;
        }
        if this.state.replace(state) == state {
            return;
        }

        match state {
            SessionState::Ready => {
                info!("PulseAudio connection established");
                this.reconnect_attempts.set(0);
                this.handlers.invoke(AudioSignal::Connected);
                Inner::subscribe_events(this);
                Inner::check_sink(this);
            }
            SessionState::Failed | SessionState::Terminated => {
                warn!("Disconnected from PulseAudio server ({:?})", state);
                this.handlers.invoke(AudioSignal::Disconnected);
                Inner::schedule_reconnect(this);
            }
            SessionState::Connecting => debug!("Connecting to PulseAudio server"),
            SessionState::Authorizing => debug!("Authorizing"),
            SessionState::SettingName => debug!("Setting application name"),
            SessionState::Unconnected => debug!("Not connected to PulseAudio server"),
        }
    }


    fn on_event(this: &Rc<Inner>, generation: u64, event: ServerEvent) {
        if generation != this.generation.get() {
            return;
        }

        match event.facility {
            Facility::Sink => {
                debug!("PulseAudio sink event {:?} on #{}", event.kind, event.index);
                Inner::check_sink(this);
            }
            Facility::Server => {
                debug!("PulseAudio server event");
                Inner::check_sink(this);
            }
            Facility::Source => debug!("PulseAudio source event"),
            Facility::SourceOutput => debug!("PulseAudio source output event"),
            Facility::Other => debug!("Unknown PulseAudio event"),
        }
    }


    fn subscribe_events(this: &Rc<Inner>) {
        let session = match this.current_session() {
            Some(s) => s,
            None => return,
        };

        try_w!(this.spawn(async move {
            if session.subscribe(&SUBSCRIBED_FACILITIES).await {
                debug!("Subscribed to PulseAudio events");
            } else {
                warn!("Could not subscribe to PulseAudio events");
            }
        }));
    }


    /// Re-resolve the default sink and update the cache from it.
    fn check_sink(this: &Rc<Inner>) {
        let session = match this.current_session() {
            Some(s) => s,
            None => return,
        };
        let weak = Rc::downgrade(this);

        try_w!(this.spawn(async move {
            let sink = match default_sink(&*session).await {
                Some(sink) => sink,
                None => return,
            };
            if let Some(inner) = weak.upgrade() {
                inner.update_from_sink(&sink);
            }
        }));
    }


    fn update_from_sink(&self, sink: &SinkInfo) {
        if self.state.get() != SessionState::Ready {
            debug!("Session not ready, discarding info of sink {}", sink.name);
            return;
        }
        let vol = match sink.volumes.first() {
            Some(&v) => vol_to_normalized(v),
            None => {
                debug!("Sink {} has no channels", sink.name);
                return;
            }
        };

        let mut changed = false;
        if self.muted.get() != sink.mute {
            debug!("Updated Mute: {} -> {}", self.muted.get(), sink.mute);
            self.muted.set(sink.mute);
            changed = true;
        }
        if vol_changed(self.volume.get(), vol) {
            debug!("Updated Volume: {:04.3} -> {:04.3}", self.volume.get(), vol);
            self.volume.set(vol);
            changed = true;
        }

        let sink_changed = self.sink_name.borrow().as_deref() != Some(sink.name.as_str());
        if sink_changed {
            info!("Tracking default sink {} ({})", sink.name, sink.description);
            *self.sink_name.borrow_mut() = Some(sink.name.clone());
        }

        if changed {
            self.handlers.invoke(AudioSignal::ValuesChanged);
        }
        if sink_changed {
            self.handlers.invoke(AudioSignal::SinkChanged);
        }
    }


    fn schedule_reconnect(this: &Rc<Inner>) {
        let prefs = &this.conn_prefs;
        if !prefs.reconnect {
            info!("Reconnecting is disabled, staying disconnected");
            return;
        }
        if this.reconnect_pending.get() {
            return;
        }

        let attempt = this.reconnect_attempts.get() + 1;
        if prefs.reconnect_max_attempts != 0 && attempt > prefs.reconnect_max_attempts {
            warn!("Giving up on PulseAudio after {} reconnect attempts",
                  attempt - 1);
            return;
        }
        this.reconnect_attempts.set(attempt);
        this.reconnect_pending.set(true);

        let delay = prefs.reconnect_delay(attempt);
        info!("Reconnecting in {:?} (attempt {})", delay, attempt);

        let sleep = this.connector.sleep(delay);
        let weak = Rc::downgrade(this);
        let res = this.spawn(async move {
            sleep.await;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            inner.reconnect_pending.set(false);
            if let Err(e) = Inner::open_session(&inner) {
                warn!("Reconnecting failed: {}", e);
                Inner::schedule_reconnect(&inner);
            }
        });
        if let Err(e) = res {
            warn!("Could not schedule reconnect: {}", e);
            this.reconnect_pending.set(false);
        }
    }


    fn current_session(&self) -> Option<Rc<dyn Session>> {
        return self.session.borrow().clone();
    }


    /// The session, if it may be written to.
    fn ready_session(&self) -> Result<Rc<dyn Session>> {
        let state = self.state.get();
        if state != SessionState::Ready {
            warn!("Ignoring request, audio session is not ready ({:?})", state);
            bail!(ErrorKind::NotReady(state));
        }
        return self.current_session()
            .ok_or_else(|| ErrorKind::NotReady(state).into());
    }


    fn spawn<F>(&self, fut: F) -> Result<()>
        where F: Future<Output = ()> + 'static
    {
        self.spawner.spawn_local(fut)?;
        return Ok(());
    }
}


impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            debug!("Disconnecting from PulseAudio server");
            session.disconnect();
        }
    }
}


/// Server info, then the default sink by name.
async fn default_sink(session: &dyn Session) -> Option<SinkInfo> {
    let info = match session.server_info().await {
        Some(info) => info,
        None => {
            debug!("No server info");
            return None;
        }
    };
    let name = match info.default_sink_name {
        Some(name) => name,
        None => {
            debug!("No default sink reported by {} {}",
                   info.server_name.as_deref().unwrap_or("unknown server"),
                   info.server_version.as_deref().unwrap_or(""));
            return None;
        }
    };
    debug!("default sink name = {} ({} {})",
           name,
           info.server_name.as_deref().unwrap_or("unknown server"),
           info.server_version.as_deref().unwrap_or(""));

    let sink = session.sink_info_by_name(&name).await;
    if sink.is_none() {
        debug!("No info for sink {}", name);
    }
    return sink;
}


/// The volume controller. There is one per application; it owns the
/// server session and disconnects it when dropped.
///
/// Consumers that need to keep a reference around (e.g. in signal
/// handlers) should use a `VolumeHandle` from `downgrade()`.
pub struct VolumeController {
    inner: Rc<Inner>,
}


impl VolumeController {
    /// Create the controller and start connecting. This doesn't block,
    /// the cached state stays at its defaults until the session is ready
    /// and the default sink was resolved.
    /// ## `connector`
    /// Creates the sessions, for the initial connection and reconnects.
    /// ## `spawner`
    /// Executor for the request pipelines. Must run on the same loop the
    /// sessions are driven by.
    pub fn new(connector: Box<dyn Connector>,
               spawner: Rc<dyn LocalSpawn>,
               prefs: &Prefs)
               -> Result<VolumeController> {
        let inner = Rc::new(Inner {
            connector,
            spawner,
            identity: AppIdentity::from(&prefs.identity_prefs),
            conn_prefs: prefs.connection_prefs.clone(),
            scroll_step: Cell::new(prefs.behavior_prefs.vol_scroll_step),
            session: RefCell::new(None),
            generation: Cell::new(0),
            state: Cell::new(SessionState::Unconnected),
            reconnect_attempts: Cell::new(0),
            reconnect_pending: Cell::new(false),
            volume: Cell::new(0.0),
            muted: Cell::new(false),
            sink_name: RefCell::new(None),
            handlers: Handlers::new(),
        });

        Inner::open_session(&inner)?;

        return Ok(VolumeController { inner });
    }


    /// Cached volume of the default sink, between 0 and 1.
    pub fn volume(&self) -> f64 {
        return self.inner.volume.get();
    }


    /// Cached mute flag of the default sink.
    pub fn muted(&self) -> bool {
        return self.inner.muted.get();
    }


    /// State of the current session.
    pub fn state(&self) -> SessionState {
        return self.inner.state.get();
    }


    /// Name of the sink the cache currently mirrors.
    pub fn sink_name(&self) -> Option<String> {
        return self.inner.sink_name.borrow().clone();
    }


    /// Set the volume of the default sink. The cache is updated right
    /// away and the handlers are invoked, a second `ValuesChanged`
    /// follows once the server confirmed the change.
    /// ## `vol`
    /// The new volume. Callers are expected to clamp it to `[0, 1]`.
    ///
    /// # Returns
    ///
    /// `ErrorKind::InvalidVolume` for NaN or infinite volumes,
    /// `ErrorKind::NotReady` if the session isn't ready.
    pub fn set_volume(&self, vol: f64) -> Result<()> {
        if !vol.is_finite() {
            warn!("Ignoring request to set volume to {}", vol);
            bail!(ErrorKind::InvalidVolume(vol));
        }
        let inner = &self.inner;
        let session = inner.ready_session()?;

        if inner.volume.get() == vol {
            debug!("Volume already at {:.3}", vol);
            return Ok(());
        }

        debug!("Setting volume {:.3} -> {:.3}", inner.volume.get(), vol);
        inner.volume.set(vol);
        inner.handlers.invoke(AudioSignal::ValuesChanged);

        let weak = Rc::downgrade(inner);
        return inner.spawn(async move {
            let sink = match default_sink(&*session).await {
                Some(sink) => sink,
                None => return,
            };
            if sink.volumes.is_empty() {
                debug!("Sink {} has no channels", sink.name);
                return;
            }

            let volumes = broadcast_vol(&sink.volumes, normalized_to_vol(vol));
            if session.set_sink_volume_by_index(sink.index, &volumes).await {
                if let Some(inner) = weak.upgrade() {
                    inner.handlers.invoke(AudioSignal::ValuesChanged);
                }
            } else {
                warn!("Could not set volume of sink {}", sink.name);
            }
        });
    }


    /// Set the mute flag of the default sink. Same contract as
    /// `set_volume()`.
    pub fn set_mute(&self, mute: bool) -> Result<()> {
        let inner = &self.inner;
        let session = inner.ready_session()?;

        if inner.muted.get() == mute {
            debug!("Mute already {}", mute);
            return Ok(());
        }

        debug!("Setting mute to {}", mute);
        inner.muted.set(mute);
        inner.handlers.invoke(AudioSignal::ValuesChanged);

        let weak = Rc::downgrade(inner);
        return inner.spawn(async move {
            let sink = match default_sink(&*session).await {
                Some(sink) => sink,
                None => return,
            };

            if session.set_sink_mute_by_index(sink.index, mute).await {
                if let Some(inner) = weak.upgrade() {
                    inner.handlers.invoke(AudioSignal::ValuesChanged);
                }
            } else {
                warn!("Could not set mute of sink {}", sink.name);
            }
        });
    }


    /// Toggle the mute flag of the default sink.
    pub fn toggle_mute(&self) -> Result<()> {
        return self.set_mute(!self.muted());
    }


    /// Increase the volume by the scroll step, up to 100%.
    pub fn increase_volume(&self) -> Result<()> {
        let new_vol = step_vol(self.volume(), self.scroll_step(), true);
        return self.set_volume(new_vol);
    }


    /// Decrease the volume by the scroll step, down to 0%.
    pub fn decrease_volume(&self) -> Result<()> {
        let new_vol = step_vol(self.volume(), self.scroll_step(), false);
        return self.set_volume(new_vol);
    }


    /// Volume step in percent.
    pub fn scroll_step(&self) -> u32 {
        return self.inner.scroll_step.get();
    }


    /// Set the volume step in percent.
    pub fn set_scroll_step(&self, scroll_step: u32) {
        self.inner.scroll_step.set(scroll_step);
    }


    /// Connect a signal handler. Handlers are executed in the order they
    /// were connected.
    pub fn connect_handler(&self, cb: Box<dyn Fn(AudioSignal)>) -> HandlerId {
        return self.inner.handlers.add_handler(cb);
    }


    /// Disconnect a signal handler. Returns whether it was connected.
    pub fn disconnect_handler(&self, id: HandlerId) -> bool {
        return self.inner.handlers.remove_handler(id);
    }


    /// Connect a signal handler that stays connected for as long as the
    /// returned `Subscription` lives.
    pub fn subscribe(&self, cb: Box<dyn Fn(AudioSignal)>) -> Subscription {
        let id = self.connect_handler(cb);
        return Subscription {
            inner: Rc::downgrade(&self.inner),
            id,
        };
    }


    /// A non-owning handle to this controller.
    pub fn downgrade(&self) -> VolumeHandle {
        return VolumeHandle { inner: Rc::downgrade(&self.inner) };
    }
}


/// Non-owning reference to a `VolumeController`.
#[derive(Clone)]
pub struct VolumeHandle {
    inner: Weak<Inner>,
}


impl VolumeHandle {
    /// The controller, unless it has been dropped already. The result
    /// is meant to be used and dropped right away, holding on to it keeps
    /// the session alive.
    pub fn upgrade(&self) -> Option<VolumeController> {
        return self.inner.upgrade().map(|inner| VolumeController { inner });
    }
}


/// A connected signal handler, disconnected when this is dropped.
#[must_use]
pub struct Subscription {
    inner: Weak<Inner>,
    id: HandlerId,
}


impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handlers.remove_handler(self.id);
        }
    }
}
