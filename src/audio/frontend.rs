//! Signals of the audio subsystem and the handler list consumers connect
//! to.
//!
//! The UI code (tray icon, popup, hotkeys) never talks to the session
//! directly. It reads the cached state of the `VolumeController` and
//! re-reads it whenever one of these signals is invoked.


use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;



/// An audio signal. Handlers connected to the controller receive these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioSignal {
    /// The session became ready.
    Connected,
    /// The default sink was resolved to a different device than before.
    SinkChanged,
    /// The cached volume or mute flag changed, or the server confirmed
    /// a change we requested.
    ValuesChanged,
    /// The session failed or was terminated.
    Disconnected,
}


/// Identifies a connected handler, so it can be disconnected again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);


type Handler = Rc<dyn Fn(AudioSignal)>;


/// Ordered list of signal handlers.
pub struct Handlers {
    inner: RefCell<Vec<(HandlerId, Handler)>>,
    next_id: Cell<u64>,
}


impl Handlers {
    /// An empty handler list.
    pub fn new() -> Handlers {
        return Handlers {
            inner: RefCell::new(vec![]),
            next_id: Cell::new(0),
        };
    }


    /// Append a handler. Handlers are executed in the order they were
    /// added.
    pub fn add_handler(&self, cb: Box<dyn Fn(AudioSignal)>) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.inner.borrow_mut().push((id, Rc::from(cb)));
        return id;
    }


    /// Remove a handler. Returns whether it was still connected.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.borrow_mut();
        let len = handlers.len();
        handlers.retain(|&(hid, _)| hid != id);
        return handlers.len() != len;
    }


    /// Number of connected handlers.
    pub fn len(&self) -> usize {
        return self.inner.borrow().len();
    }


    /// Invoke all handlers with `signal`.
    ///
    /// Works on a snapshot of the list, so handlers may connect,
    /// disconnect or trigger further signals while being invoked.
    pub fn invoke(&self, signal: AudioSignal) {
        let handlers: Vec<Handler> = self.inner
            .borrow()
            .iter()
            .map(|&(_, ref h)| h.clone())
            .collect();

        debug!("Invoking {} handlers for signal {:?}", handlers.len(), signal);
        for handler in handlers {
            handler(signal);
        }
    }
}


impl Default for Handlers {
    fn default() -> Handlers {
        return Handlers::new();
    }
}
