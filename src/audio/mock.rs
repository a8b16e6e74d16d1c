#![allow(missing_docs)]

//! In-memory sound server, used by the controller tests.
//!
//! Every request is recorded and answered immediately from the server's
//! sink list. State changes and events are pushed by the test through
//! `MockServer::set_state()` and `MockServer::emit()`.

use crate::audio::session::*;
use crate::errors::*;
use crate::support::audio::*;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;


pub const SINK_NAME: &str = "alsa_output.pci-0000_00_1f.3.analog-stereo";
pub const SINK_INDEX: u32 = 3;


#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Connect(Option<String>),
    Subscribe(Vec<Facility>),
    ServerInfo,
    SinkInfo(String),
    SetMute(u32, bool),
    SetVolume(u32, Vec<u32>),
    Disconnect,
}


pub struct MockServer {
    pub default_sink: RefCell<Option<String>>,
    pub sinks: RefCell<Vec<SinkInfo>>,
    pub fail_server_info: Cell<bool>,
    pub fail_sink_info: Cell<bool>,
    pub fail_writes: Cell<bool>,
    pub fail_open: Cell<bool>,
    pub open_calls: Cell<u32>,
    pub identities: RefCell<Vec<AppIdentity>>,
    pub sleeps: RefCell<Vec<Duration>>,
    requests: RefCell<Vec<Request>>,
    current: RefCell<Weak<MockSession>>,
}


impl MockServer {
    /// A server with one stereo sink at 0% that is the default sink.
    pub fn new() -> Rc<MockServer> {
        let sink = SinkInfo {
            index: SINK_INDEX,
            name: String::from(SINK_NAME),
            description: String::from("Built-in Audio Analog Stereo"),
            mute: false,
            volumes: vec![PA_VOLUME_MUTED, PA_VOLUME_MUTED],
        };

        return Rc::new(MockServer {
            default_sink: RefCell::new(Some(String::from(SINK_NAME))),
            sinks: RefCell::new(vec![sink]),
            fail_server_info: Cell::new(false),
            fail_sink_info: Cell::new(false),
            fail_writes: Cell::new(false),
            fail_open: Cell::new(false),
            open_calls: Cell::new(0),
            identities: RefCell::new(vec![]),
            sleeps: RefCell::new(vec![]),
            requests: RefCell::new(vec![]),
            current: RefCell::new(Weak::new()),
        });
    }


    /// Set all channels of the default sink.
    pub fn set_sink(&self, vol: f64, mute: bool) {
        self.set_sink_raw(&[normalized_to_vol(vol), normalized_to_vol(vol)], mute);
    }


    pub fn set_sink_raw(&self, volumes: &[u32], mute: bool) {
        let name = self.default_sink.borrow().clone();
        for sink in self.sinks.borrow_mut().iter_mut() {
            if Some(&sink.name) == name.as_ref() {
                sink.volumes = volumes.to_vec();
                sink.mute = mute;
            }
        }
    }


    pub fn session(&self) -> Option<Rc<MockSession>> {
        return self.current.borrow().upgrade();
    }


    /// Move the current session to `state`, invoking its state callback.
    pub fn set_state(&self, state: SessionState) {
        if let Some(session) = self.session() {
            session.fire_state(state);
        }
    }


    /// Push an event of `facility` to the current session.
    pub fn emit(&self, facility: Facility) {
        if let Some(session) = self.session() {
            session.fire_event(ServerEvent {
                facility,
                kind: Some(EventKind::Changed),
                index: SINK_INDEX,
            });
        }
    }


    pub fn requests(&self) -> Vec<Request> {
        return self.requests.borrow().clone();
    }


    pub fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
    }


    fn record(&self, request: Request) {
        self.requests.borrow_mut().push(request);
    }


    fn update_sink<F: Fn(&mut SinkInfo)>(&self, index: u32, f: F) -> bool {
        let mut sinks = self.sinks.borrow_mut();
        match sinks.iter_mut().find(|s| s.index == index) {
            Some(sink) => {
                f(sink);
                return true;
            }
            None => return false,
        }
    }
}


pub struct MockSession {
    server: Rc<MockServer>,
    disconnected: Cell<bool>,
    state_cb: RefCell<Option<Box<dyn FnMut(SessionState)>>>,
    event_cb: RefCell<Option<Box<dyn FnMut(ServerEvent)>>>,
}


impl MockSession {
    fn fire_state(&self, state: SessionState) {
        let cb = self.state_cb.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(state);
            if !self.disconnected.get() {
                *self.state_cb.borrow_mut() = Some(cb);
            }
        }
    }


    fn fire_event(&self, event: ServerEvent) {
        let cb = self.event_cb.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(event);
            if !self.disconnected.get() {
                *self.event_cb.borrow_mut() = Some(cb);
            }
        }
    }
}


impl Session for MockSession {
    fn set_state_callback(&self, cb: Box<dyn FnMut(SessionState)>) {
        *self.state_cb.borrow_mut() = Some(cb);
    }


    fn set_event_callback(&self, cb: Box<dyn FnMut(ServerEvent)>) {
        *self.event_cb.borrow_mut() = Some(cb);
    }


    fn connect(&self, server: Option<&str>) -> Result<()> {
        self.server.record(Request::Connect(server.map(String::from)));
        self.fire_state(SessionState::Connecting);
        return Ok(());
    }


    fn subscribe(&self, facilities: &[Facility]) -> LocalBoxFuture<'static, bool> {
        self.server.record(Request::Subscribe(facilities.to_vec()));
        return future::ready(true).boxed_local();
    }


    fn server_info(&self) -> LocalBoxFuture<'static, Option<ServerInfo>> {
        self.server.record(Request::ServerInfo);
        if self.server.fail_server_info.get() {
            return future::ready(None).boxed_local();
        }
        let info = ServerInfo {
            default_sink_name: self.server.default_sink.borrow().clone(),
            server_name: Some(String::from("mock")),
            server_version: Some(String::from("1.0")),
        };
        return future::ready(Some(info)).boxed_local();
    }


    fn sink_info_by_name(&self, name: &str) -> LocalBoxFuture<'static, Option<SinkInfo>> {
        self.server.record(Request::SinkInfo(String::from(name)));
        if self.server.fail_sink_info.get() {
            return future::ready(None).boxed_local();
        }
        let sink = self.server
            .sinks
            .borrow()
            .iter()
            .find(|s| s.name == name)
            .cloned();
        return future::ready(sink).boxed_local();
    }


    fn set_sink_mute_by_index(&self, index: u32, mute: bool) -> LocalBoxFuture<'static, bool> {
        self.server.record(Request::SetMute(index, mute));
        let ok = !self.server.fail_writes.get() &&
                 self.server.update_sink(index, |s| s.mute = mute);
        return future::ready(ok).boxed_local();
    }


    fn set_sink_volume_by_index(&self,
                                index: u32,
                                volumes: &[u32])
                                -> LocalBoxFuture<'static, bool> {
        self.server.record(Request::SetVolume(index, volumes.to_vec()));
        let ok = !self.server.fail_writes.get() &&
                 self.server.update_sink(index, |s| s.volumes = volumes.to_vec());
        return future::ready(ok).boxed_local();
    }


    fn disconnect(&self) {
        self.server.record(Request::Disconnect);
        self.disconnected.set(true);
        self.state_cb.borrow_mut().take();
        self.event_cb.borrow_mut().take();
    }
}


pub struct MockConnector {
    server: Rc<MockServer>,
}


impl MockConnector {
    pub fn new(server: Rc<MockServer>) -> MockConnector {
        return MockConnector { server };
    }
}


impl Connector for MockConnector {
    fn open(&self, identity: &AppIdentity) -> Result<Rc<dyn Session>> {
        self.server.open_calls.set(self.server.open_calls.get() + 1);
        self.server.identities.borrow_mut().push(identity.clone());
        if self.server.fail_open.get() {
            bail!("Mock server refuses new sessions");
        }

        let session = Rc::new(MockSession {
            server: self.server.clone(),
            disconnected: Cell::new(false),
            state_cb: RefCell::new(None),
            event_cb: RefCell::new(None),
        });
        *self.server.current.borrow_mut() = Rc::downgrade(&session);

        return Ok(session);
    }


    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        self.server.sleeps.borrow_mut().push(duration);
        return future::ready(()).boxed_local();
    }
}
