//! Readiness-driven TCP server core.
//!
//! Connections are multiplexed over `mio::Poll`; each connection keeps an
//! explicit interest mask (read/write booleans) that the event loop
//! re-registers whenever it changes. Replies are queued per connection and
//! flushed with vectored writes; the queue length gates read interest
//! (backpressure) with hysteresis between the high and low watermarks.
//!
//! Two server variants share the connection pipeline:
//!
//! - [`StServer`]: a single thread owns the listener and every connection.
//! - [`MtServer`]: one acceptor thread hands accepted streams to worker
//!   threads over channels; each worker runs its own poll loop over a
//!   disjoint, pinned set of connections. The storage is shared behind its
//!   own mutex.
//!
//! A `mio::Waker` per loop (an eventfd underneath) lets [`StServer::stop`]
//! and [`MtServer::stop`] interrupt the wait; `join` then reclaims the
//! threads after each loop drains and closes its connections.

mod connection;
mod mt;
mod st;

pub use connection::{HIGH_WATERMARK, LOW_WATERMARK};
pub use mt::MtServer;
pub use st::StServer;

/// Keep writes to half-closed peers as `EPIPE` errors instead of a
/// process-killing signal.
#[cfg(unix)]
pub(crate) fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub(crate) fn ignore_sigpipe() {}
