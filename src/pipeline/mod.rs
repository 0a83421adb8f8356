//! Receive-side plumbing between a transport and the endpoint's pipe.

mod context;
mod dispatcher;
mod endpoint;

pub use context::ReceiveContext;
pub use dispatcher::{pipe_fn, DeliveryMetrics, ReceivePipe, ReceivePipeDispatcher};
pub use endpoint::{EndpointContext, ReceiveEndpointContext};
