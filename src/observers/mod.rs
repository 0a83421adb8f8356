//! Observer registries.
//!
//! Four observer kinds are supported, each with its own registry:
//!
//! | Registry | Observer | Events |
//! |---|---|---|
//! | [`ReceiveObservers`] | [`ReceiveObserver`] | pre/post receive, receive fault |
//! | [`ReceiveTransportObservers`] | [`ReceiveTransportObserver`] | ready, completed, faulted |
//! | [`SendObservers`] | [`SendObserver`] | pre/post send, send fault |
//! | [`PublishObservers`] | [`PublishObserver`] | pre/post publish, publish fault |
//!
//! Connecting returns a [`ConnectHandle`](crate::ConnectHandle); dropping or
//! disconnecting it removes the observer.

mod receive;
mod registry;
mod send;
mod transport;

pub use receive::{ReceiveObserver, ReceiveObservers};
pub use registry::ObserverRegistry;
pub use send::{PublishObserver, PublishObservers, SendObserver, SendObservers};
pub use transport::{
    // ---
    ReceiveTransportCompleted,
    ReceiveTransportFaulted,
    ReceiveTransportObserver,
    ReceiveTransportObservers,
    ReceiveTransportReady,
};
