pub mod decode;
pub mod listener;

pub use decode::{DecodeError, DecodeErrorKind, OscArg, OscMessage, decode};
pub use listener::{
    BindError, ListenerConfig, ListenerError, ListenerState, MAX_UDP_PAYLOAD, OscListener,
};
