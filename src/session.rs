//! The seam between the publisher loop and the transport.
//!
//! A [`Connector`] opens one [`Session`] per connection cycle. The publisher
//! holds at most one session at a time and never submits to a session whose
//! [`Session::closed`] signal has fired.

use crate::types::{BrokerEndpoint, OutboundMessage};
use crate::Result;
use std::future::Future;

pub trait Session: Send {
    /// Hands one message to the session's outbound buffer.
    ///
    /// Success means the transport accepted the record for batching, not that
    /// the cluster acknowledged it. [`Error::Rejected`](crate::Error::Rejected)
    /// refuses only this record; any other error means the session is done.
    ///
    /// Must be cancel safe: a dropped call leaves the record unsubmitted.
    fn submit(&mut self, message: &OutboundMessage) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the transport has reported a session-ending failure.
    ///
    /// Must be cancel safe: the publisher re-creates this future on every
    /// loop iteration.
    fn closed(&self) -> impl Future<Output = ()> + Send + '_;

    /// Flushes and releases the transport. Failures are logged, not returned.
    fn close(self) -> impl Future<Output = ()> + Send;
}

pub trait Connector: Send + Sync {
    type Session: Session;

    fn open(
        &self,
        endpoints: &[BrokerEndpoint],
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
