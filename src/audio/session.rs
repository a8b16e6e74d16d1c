//! The boundary between the controller and the sound server.
//!
//! A `Session` is one client connection. Every request is asynchronous:
//! the call enqueues it and returns a future that resolves once the server
//! answered. Requests that fail, or that are still pending when the
//! session goes away, resolve to `None`/`false`.

use crate::errors::*;
use crate::prefs::IdentityPrefs;
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::time::Duration;



/// Lifecycle of a server session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected yet.
    Unconnected,
    /// Connecting to the server socket.
    Connecting,
    /// Authenticating with the server.
    Authorizing,
    /// Announcing the client name.
    SettingName,
    /// Connected and usable.
    Ready,
    /// The connection failed or was lost.
    Failed,
    /// The connection was closed.
    Terminated,
}

impl SessionState {
    /// Whether the session can't become `Ready` anymore.
    pub fn is_terminal(&self) -> bool {
        return *self == SessionState::Failed || *self == SessionState::Terminated;
    }
}


/// The kind of server object an event is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Facility {
    /// An output device.
    Sink,
    /// An input device.
    Source,
    /// A recording stream.
    SourceOutput,
    /// Global server settings, e.g. the default sink.
    Server,
    /// Anything we never subscribe to.
    Other,
}


/// What happened to the object an event is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    #[allow(missing_docs)]
    New,
    #[allow(missing_docs)]
    Changed,
    #[allow(missing_docs)]
    Removed,
}


/// A change notification pushed by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerEvent {
    /// The object type.
    pub facility: Facility,
    /// The change, if the server reported a known one.
    pub kind: Option<EventKind>,
    /// Index of the object.
    pub index: u32,
}


/// Answer to a server info request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerInfo {
    /// Name of the current default sink, if there is one.
    pub default_sink_name: Option<String>,
    #[allow(missing_docs)]
    pub server_name: Option<String>,
    #[allow(missing_docs)]
    pub server_version: Option<String>,
}


/// Answer to a sink info request.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkInfo {
    /// Numeric handle, only valid for the lifetime of the device.
    pub index: u32,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub description: String,
    #[allow(missing_docs)]
    pub mute: bool,
    /// Per channel volumes in the server domain.
    pub volumes: Vec<u32>,
}


/// How the application presents itself to the server, e.g. in the
/// server's list of clients.
#[derive(Clone, Debug, PartialEq)]
pub struct AppIdentity {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub version: String,
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub icon_name: String,
}

impl<'a> From<&'a IdentityPrefs> for AppIdentity {
    fn from(prefs: &'a IdentityPrefs) -> Self {
        return AppIdentity {
            name: prefs.app_name.clone(),
            version: prefs.app_version.clone(),
            id: prefs.app_id.clone(),
            icon_name: prefs.icon_name.clone(),
        };
    }
}


/// A client session with the sound server.
pub trait Session {
    /// Set the callback invoked on every state change. It may be invoked
    /// synchronously from within `connect()`.
    fn set_state_callback(&self, cb: Box<dyn FnMut(SessionState)>);

    /// Set the callback invoked for subscribed server events.
    fn set_event_callback(&self, cb: Box<dyn FnMut(ServerEvent)>);

    /// Start connecting.
    /// ## `server`
    /// The server to connect to, `None` for the default one.
    fn connect(&self, server: Option<&str>) -> Result<()>;

    /// Subscribe to events of the given facilities. Resolves to whether
    /// the server accepted the subscription.
    fn subscribe(&self, facilities: &[Facility]) -> LocalBoxFuture<'static, bool>;

    /// Query the global server info.
    fn server_info(&self) -> LocalBoxFuture<'static, Option<ServerInfo>>;

    /// Query a sink by its name.
    fn sink_info_by_name(&self, name: &str) -> LocalBoxFuture<'static, Option<SinkInfo>>;

    /// Set the mute flag of a sink. Resolves to whether it succeeded.
    fn set_sink_mute_by_index(&self, index: u32, mute: bool) -> LocalBoxFuture<'static, bool>;

    /// Set all channel volumes of a sink. Resolves to whether it succeeded.
    fn set_sink_volume_by_index(&self,
                                index: u32,
                                volumes: &[u32])
                                -> LocalBoxFuture<'static, bool>;

    /// Drop the callbacks and close the connection.
    fn disconnect(&self);
}


/// Creates sessions, both for the initial connection and for reconnects.
pub trait Connector {
    /// Create a new, unconnected session.
    fn open(&self, identity: &AppIdentity) -> Result<Rc<dyn Session>>;

    /// A future that resolves after `duration`, on the same loop the
    /// sessions are driven by.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}
