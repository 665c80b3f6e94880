//! Session capability boundary for the barrage load harness.
//!
//! The harness drives an abstract request/response session protocol. This
//! crate defines that boundary: the `Client` capability that binds
//! sessions, the `Session` capability with windowed asynchronous sends,
//! the handler callbacks the transport invokes on response delivery, and
//! the correlation helper that turns an asynchronous send into a bounded
//! synchronous one.
//!
//! It also ships `LoopbackClient`, an in-process simulated peer that
//! implements the full session contract (window backpressure, response
//! latency, receipt routing, bind faults, mid-flight severing). The CLI
//! and the integration tests run against it; a real protocol client plugs
//! in through the same traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod correlate;
mod error;
pub mod loopback;
mod payload;
mod session;

pub use correlate::send_and_await;
pub use error::{BindError, CorrelationError, SessionError};
pub use loopback::{LoopbackClient, LoopbackConfig, LoopbackSession};
pub use payload::{FixedRequest, RequestSource};
pub use session::{
    Client, PendingResponse, Receipt, Request, Response, SendFailure, SendOutcome, Session,
    SessionHandler,
};
