//! PulseAudio sessions, driven by the glib main loop.
//!
//! Replies of the server arrive as callbacks on the main loop. Each
//! request hands a oneshot sender to its callback and returns the
//! receiving end as a future. Requests that are still pending when the
//! session fails or is disconnected resolve to `None`/`false`.


use crate::audio::session::*;
use crate::errors::*;
use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use libpulse_binding as pulse;
use libpulse_glib_binding::Mainloop;
use pulse::callbacks::ListResult;
use pulse::context::subscribe::{self, InterestMaskSet};
use pulse::context::{Context, FlagSet, State};
use pulse::proplist::{properties, Proplist};
use pulse::volume::{ChannelVolumes, Volume};
use std::cell::Cell;
use std::cell::Ref;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;



impl From<State> for SessionState {
    fn from(state: State) -> SessionState {
        return match state {
            State::Unconnected => SessionState::Unconnected,
            State::Connecting => SessionState::Connecting,
            State::Authorizing => SessionState::Authorizing,
            State::SettingName => SessionState::SettingName,
            State::Ready => SessionState::Ready,
            State::Failed => SessionState::Failed,
            State::Terminated => SessionState::Terminated,
        };
    }
}


fn facility_from_pulse(facility: Option<subscribe::Facility>) -> Facility {
    return match facility {
        Some(subscribe::Facility::Sink) => Facility::Sink,
        Some(subscribe::Facility::Source) => Facility::Source,
        Some(subscribe::Facility::SourceOutput) => Facility::SourceOutput,
        Some(subscribe::Facility::Server) => Facility::Server,
        _ => Facility::Other,
    };
}


fn kind_from_pulse(op: Option<subscribe::Operation>) -> Option<EventKind> {
    return op.map(|op| match op {
        subscribe::Operation::New => EventKind::New,
        subscribe::Operation::Changed => EventKind::Changed,
        subscribe::Operation::Removed => EventKind::Removed,
    });
}


fn interest_mask(facilities: &[Facility]) -> InterestMaskSet {
    return facilities.iter().fold(InterestMaskSet::NULL, |mask, f| {
        mask |
        match *f {
            Facility::Sink => InterestMaskSet::SINK,
            Facility::Source => InterestMaskSet::SOURCE,
            Facility::SourceOutput => InterestMaskSet::SOURCE_OUTPUT,
            Facility::Server => InterestMaskSet::SERVER,
            Facility::Other => InterestMaskSet::NULL,
        }
    });
}


/// A request whose reply can be dropped from the outside.
trait Cancel {
    fn cancel(&self);
}

impl<T> Cancel for RefCell<Option<oneshot::Sender<T>>> {
    fn cancel(&self) {
        self.borrow_mut().take();
    }
}


/// Sending half of a pending request, owned by the pulse callback.
struct Reply<T> {
    tx: Rc<RefCell<Option<oneshot::Sender<T>>>>,
}

impl<T> Reply<T> {
    /// Only the first value is delivered.
    fn send(&self, value: T) {
        if let Some(tx) = self.tx.borrow_mut().take() {
            let _ = tx.send(value);
        }
    }
}


/// Session state shared with the context callbacks.
struct Shared {
    state: Cell<SessionState>,
    closed: Cell<bool>,
    state_cb: RefCell<Option<Box<dyn FnMut(SessionState)>>>,
    event_cb: RefCell<Option<Box<dyn FnMut(ServerEvent)>>>,
    pending: RefCell<Vec<Weak<dyn Cancel>>>,
}


impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state.set(state);
        if state.is_terminal() {
            self.cancel_pending();
        }

        let cb = self.state_cb.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(state);
            if !self.closed.get() {
                let mut slot = self.state_cb.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
        }
    }


    fn fire_event(&self, event: ServerEvent) {
        let cb = self.event_cb.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(event);
            if !self.closed.get() {
                let mut slot = self.event_cb.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
        }
    }


    fn reply<T: 'static>(&self) -> (Reply<T>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let weak = Rc::downgrade(&tx) as Weak<dyn Cancel>;
        let mut pending = self.pending.borrow_mut();
        pending.retain(|p| p.strong_count() > 0);
        pending.push(weak);

        return (Reply { tx }, rx);
    }


    /// Drop the user callbacks and fail all pending requests. Returns
    /// false if this was done before.
    fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        self.state_cb.borrow_mut().take();
        self.event_cb.borrow_mut().take();
        self.cancel_pending();
        self.state.set(SessionState::Terminated);
        return true;
    }


    fn cancel_pending(&self) {
        let pending: Vec<Weak<dyn Cancel>> = self.pending.borrow_mut().drain(..).collect();
        if !pending.is_empty() {
            debug!("Cancelling {} pending PulseAudio requests", pending.len());
        }
        for p in pending {
            if let Some(p) = p.upgrade() {
                p.cancel();
            }
        }
    }
}


/// A PulseAudio context.
pub struct PulseSession {
    context: Rc<RefCell<Context>>,
    shared: Rc<Shared>,
    // the context must go first
    _mainloop: Rc<Mainloop>,
}


impl PulseSession {
    fn new(context: Context, mainloop: Rc<Mainloop>) -> PulseSession {
        let context = Rc::new(RefCell::new(context));
        let shared = Rc::new(Shared {
            state: Cell::new(SessionState::Unconnected),
            closed: Cell::new(false),
            state_cb: RefCell::new(None),
            event_cb: RefCell::new(None),
            pending: RefCell::new(vec![]),
        });

        {
            let mut ctx = context.borrow_mut();

            let ctx_ref = Rc::downgrade(&context);
            let shared_ref = shared.clone();
            ctx.set_state_callback(Some(Box::new(move || {
                let ctx = match ctx_ref.upgrade() {
                    Some(ctx) => ctx,
                    None => return,
                };
                // may be invoked while the context is borrowed by connect()
                let state = unsafe { (*ctx.as_ptr()).get_state() };
                shared_ref.set_state(SessionState::from(state));
            })));

            let shared_ref = shared.clone();
            ctx.set_subscribe_callback(Some(Box::new(move |facility, op, index| {
                shared_ref.fire_event(ServerEvent {
                    facility: facility_from_pulse(facility),
                    kind: kind_from_pulse(op),
                    index,
                });
            })));
        }

        return PulseSession {
            context,
            shared,
            _mainloop: mainloop,
        };
    }


    /// Issuing requests on a context that isn't ready fails without an
    /// operation object.
    fn is_ready(&self) -> bool {
        let state = self.shared.state.get();
        if state != SessionState::Ready {
            debug!("PulseAudio context not ready ({:?}), dropping request", state);
            return false;
        }
        return true;
    }


    fn ready_context(&self) -> Option<Ref<Context>> {
        if !self.is_ready() {
            return None;
        }
        return Some(self.context.borrow());
    }
}


impl Session for PulseSession {
    fn set_state_callback(&self, cb: Box<dyn FnMut(SessionState)>) {
        *self.shared.state_cb.borrow_mut() = Some(cb);
    }


    fn set_event_callback(&self, cb: Box<dyn FnMut(ServerEvent)>) {
        *self.shared.event_cb.borrow_mut() = Some(cb);
    }


    fn connect(&self, server: Option<&str>) -> Result<()> {
        self.context.borrow_mut().connect(server, FlagSet::NOFAIL, None)?;
        return Ok(());
    }


    fn subscribe(&self, facilities: &[Facility]) -> LocalBoxFuture<'static, bool> {
        if !self.is_ready() {
            return future::ready(false).boxed_local();
        }

        let (reply, rx) = self.shared.reply();
        self.context.borrow_mut().subscribe(interest_mask(facilities), move |success| reply.send(success));

        return rx.map(|r| r.unwrap_or(false)).boxed_local();
    }


    fn server_info(&self) -> LocalBoxFuture<'static, Option<ServerInfo>> {
        let ctx = match self.ready_context() {
            Some(ctx) => ctx,
            None => return future::ready(None).boxed_local(),
        };

        let (reply, rx) = self.shared.reply();
        ctx.introspect().get_server_info(move |info| {
            reply.send(ServerInfo {
                default_sink_name: info.default_sink_name.as_ref().map(|s| s.to_string()),
                server_name: info.server_name.as_ref().map(|s| s.to_string()),
                server_version: info.server_version.as_ref().map(|s| s.to_string()),
            });
        });

        return rx.map(|r| r.ok()).boxed_local();
    }


    fn sink_info_by_name(&self, name: &str) -> LocalBoxFuture<'static, Option<SinkInfo>> {
        let ctx = match self.ready_context() {
            Some(ctx) => ctx,
            None => return future::ready(None).boxed_local(),
        };

        let (reply, rx) = self.shared.reply();
        ctx.introspect().get_sink_info_by_name(name, move |result| {
            match result {
                ListResult::Item(info) => {
                    reply.send(Some(SinkInfo {
                        index: info.index,
                        name: info.name
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                        description: info.description
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                        mute: info.mute,
                        volumes: info.volume.get().iter().map(|v| v.0).collect(),
                    }))
                }
                ListResult::End => reply.send(None),
                ListResult::Error => {
                    debug!("get_sink_info_by_name() failed");
                    reply.send(None)
                }
            }
        });

        return rx.map(|r| r.ok().and_then(|s| s)).boxed_local();
    }


    fn set_sink_mute_by_index(&self, index: u32, mute: bool) -> LocalBoxFuture<'static, bool> {
        let ctx = match self.ready_context() {
            Some(ctx) => ctx,
            None => return future::ready(false).boxed_local(),
        };

        let (reply, rx) = self.shared.reply();
        ctx.introspect()
            .set_sink_mute_by_index(index,
                                    mute,
                                    Some(Box::new(move |success| reply.send(success))));

        return rx.map(|r| r.unwrap_or(false)).boxed_local();
    }


    fn set_sink_volume_by_index(&self,
                                index: u32,
                                volumes: &[u32])
                                -> LocalBoxFuture<'static, bool> {
        if volumes.is_empty() || volumes.len() > ChannelVolumes::CHANNELS_MAX as usize {
            warn!("Invalid channel count {}", volumes.len());
            return future::ready(false).boxed_local();
        }
        let ctx = match self.ready_context() {
            Some(ctx) => ctx,
            None => return future::ready(false).boxed_local(),
        };

        let mut cvol = ChannelVolumes::default();
        cvol.set(volumes.len() as u8, Volume::MUTED);
        for (dst, &v) in cvol.get_mut().iter_mut().zip(volumes) {
            *dst = Volume(v);
        }

        let (reply, rx) = self.shared.reply();
        ctx.introspect()
            .set_sink_volume_by_index(index,
                                      &cvol,
                                      Some(Box::new(move |success| reply.send(success))));

        return rx.map(|r| r.unwrap_or(false)).boxed_local();
    }


    fn disconnect(&self) {
        if !self.shared.close() {
            return;
        }
        debug!("Disconnecting PulseAudio context");

        let mut ctx = self.context.borrow_mut();
        ctx.set_state_callback(None);
        ctx.set_subscribe_callback(None);
        ctx.disconnect();
    }
}


impl Drop for PulseSession {
    fn drop(&mut self) {
        debug!("Destructing PulseAudio session");
        self.disconnect();
    }
}


/// Creates PulseAudio sessions on the default glib main context.
pub struct PulseConnector {
    mainloop: Rc<Mainloop>,
}


impl PulseConnector {
    /// Attach a PulseAudio main loop to the default glib main context.
    /// The sessions are only driven while that context is iterated.
    pub fn new() -> Result<PulseConnector> {
        let mainloop = Mainloop::new(None)
            .ok_or("Could not create PulseAudio glib main loop")?;

        return Ok(PulseConnector { mainloop: Rc::new(mainloop) });
    }
}


impl Connector for PulseConnector {
    fn open(&self, identity: &AppIdentity) -> Result<Rc<dyn Session>> {
        let mut proplist = Proplist::new().ok_or("Could not create proplist")?;
        let props = [(properties::APPLICATION_NAME, &identity.name),
                     (properties::APPLICATION_VERSION, &identity.version),
                     (properties::APPLICATION_ID, &identity.id),
                     (properties::APPLICATION_ICON_NAME, &identity.icon_name)];
        for &(key, value) in props.iter() {
            proplist.set_str(key, value)
                .map_err(|_| format!("Could not set property {}", key))?;
        }

        let context = Context::new_with_proplist(&*self.mainloop, &identity.name, &proplist)
            .ok_or("Could not create PulseAudio context")?;
        debug!("Created PulseAudio context for {}", identity.name);

        return Ok(Rc::new(PulseSession::new(context, self.mainloop.clone())));
    }


    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        return glib::timeout_future(duration).boxed_local();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_states_map_one_to_one() {
        assert_eq!(SessionState::from(State::Unconnected), SessionState::Unconnected);
        assert_eq!(SessionState::from(State::Connecting), SessionState::Connecting);
        assert_eq!(SessionState::from(State::Authorizing), SessionState::Authorizing);
        assert_eq!(SessionState::from(State::SettingName), SessionState::SettingName);
        assert_eq!(SessionState::from(State::Ready), SessionState::Ready);
        assert_eq!(SessionState::from(State::Failed), SessionState::Failed);
        assert_eq!(SessionState::from(State::Terminated), SessionState::Terminated);
    }

    #[test]
    fn interest_mask_covers_requested_facilities() {
        let mask = interest_mask(&[Facility::Sink, Facility::Server]);
        assert_eq!(mask, InterestMaskSet::SINK | InterestMaskSet::SERVER);

        assert_eq!(interest_mask(&[]), InterestMaskSet::NULL);
        assert_eq!(interest_mask(&[Facility::Other]), InterestMaskSet::NULL);
    }

    #[test]
    fn unknown_facilities_are_other() {
        assert_eq!(facility_from_pulse(Some(subscribe::Facility::Card)), Facility::Other);
        assert_eq!(facility_from_pulse(None), Facility::Other);
        assert_eq!(facility_from_pulse(Some(subscribe::Facility::SourceOutput)),
                   Facility::SourceOutput);
        assert_eq!(kind_from_pulse(Some(subscribe::Operation::Removed)),
                   Some(EventKind::Removed));
    }

    fn new_shared(state: SessionState) -> Rc<Shared> {
        return Rc::new(Shared {
            state: Cell::new(state),
            closed: Cell::new(false),
            state_cb: RefCell::new(None),
            event_cb: RefCell::new(None),
            pending: RefCell::new(vec![]),
        });
    }

    #[test]
    fn pending_replies_resolve_on_cancel() {
        let shared = new_shared(SessionState::Ready);

        let (done, done_rx) = shared.reply::<bool>();
        let (_leaked, leaked_rx) = shared.reply::<bool>();
        done.send(true);
        shared.set_state(SessionState::Failed);

        let mut pool = futures::executor::LocalPool::new();
        assert_eq!(pool.run_until(done_rx), Ok(true));
        assert!(pool.run_until(leaked_rx).is_err());
        assert!(shared.pending.borrow().is_empty());
    }

    #[test]
    fn closing_from_state_callback_drops_callbacks() {
        let shared = new_shared(SessionState::Connecting);
        let calls = Rc::new(Cell::new(0));
        let events = Rc::new(Cell::new(0));

        {
            let weak = Rc::downgrade(&shared);
            let calls = calls.clone();
            *shared.state_cb.borrow_mut() = Some(Box::new(move |_| {
                calls.set(calls.get() + 1);
                if let Some(shared) = weak.upgrade() {
                    assert!(shared.close());
                }
            }));
        }
        {
            let events = events.clone();
            *shared.event_cb.borrow_mut() = Some(Box::new(move |_| events.set(events.get() + 1)));
        }
        let (_reply, rx) = shared.reply::<bool>();

        shared.set_state(SessionState::Failed);
        assert_eq!(calls.get(), 1);
        assert!(shared.state_cb.borrow().is_none());
        assert!(shared.event_cb.borrow().is_none());
        assert_eq!(shared.state.get(), SessionState::Terminated);
        assert!(!shared.close());

        shared.set_state(SessionState::Terminated);
        shared.fire_event(ServerEvent {
            facility: Facility::Sink,
            kind: Some(EventKind::Changed),
            index: 0,
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(events.get(), 0);

        let mut pool = futures::executor::LocalPool::new();
        assert!(pool.run_until(rx).is_err());
    }

    #[test]
    fn closing_from_event_callback_drops_callbacks() {
        let shared = new_shared(SessionState::Ready);
        let events = Rc::new(Cell::new(0));
        {
            let weak = Rc::downgrade(&shared);
            let events = events.clone();
            *shared.event_cb.borrow_mut() = Some(Box::new(move |_| {
                events.set(events.get() + 1);
                if let Some(shared) = weak.upgrade() {
                    shared.close();
                }
            }));
        }

        let event = ServerEvent {
            facility: Facility::Server,
            kind: None,
            index: 0,
        };
        shared.fire_event(event);
        shared.fire_event(event);
        assert_eq!(events.get(), 1);
        assert!(shared.event_cb.borrow().is_none());
    }
}
