//! External-facing seams: the event stream a socket layer or CLI would
//! subscribe to, and the error envelope every JSON-emitting surface wraps
//! a failure in. No HTTP/websocket transport lives in this crate, only
//! the trait and payload shapes a transport would wrap.

pub mod error;
pub mod events;
