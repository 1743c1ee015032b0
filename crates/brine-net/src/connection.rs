//! Per-connection request/response pipeline.
//!
//! Incoming bytes land in a fixed 4096-byte buffer and flow through an
//! incremental parse -> collect-argument -> execute -> enqueue-reply cycle.
//! A header that does not fit the current chunk is carried over via
//! `r_offset`; a declared data body is accumulated across reads until its
//! trailing `\r\n` arrives. Replies are queued and written with a single
//! vectored write per attempt, the head entry offset by `w_offset`.
//!
//! The connection owns its interest mask as two explicit booleans. Write
//! interest tracks "queue non-empty"; read interest is gated off when the
//! queue reaches [`HIGH_WATERMARK`] entries and back on when it falls below
//! [`LOW_WATERMARK`] -- the gap keeps the mask from flapping.

use std::collections::VecDeque;
use std::io::{self, IoSlice, Read, Write};
use std::sync::Arc;

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use slab::Slab;

use brine_proto::{execute, parse, Request};
use brine_store::Storage;

/// Output queue length at which read interest is switched off.
pub const HIGH_WATERMARK: usize = 100;

/// Output queue length below which read interest is switched back on.
pub const LOW_WATERMARK: usize = 90;

const READ_BUF_SIZE: usize = 4096;

/// Readiness events a connection wants the loop to observe.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct InterestSet {
    pub read: bool,
    pub write: bool,
}

impl InterestSet {
    pub(crate) fn to_mio(self) -> Interest {
        match (self.read, self.write) {
            (_, false) => Interest::READABLE,
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
        }
    }
}

pub(crate) struct Connection {
    stream: TcpStream,
    alive: bool,
    interest: InterestSet,

    read_buf: [u8; READ_BUF_SIZE],
    r_offset: usize,

    pending: Option<Request>,
    arg_remains: usize,
    argument: Vec<u8>,

    out_queue: VecDeque<Vec<u8>>,
    w_offset: usize,

    storage: Arc<dyn Storage + Send + Sync>,
}

impl Connection {
    /// Wrap an accepted stream. Initial interest is read (hangup detection
    /// comes with it on registration).
    pub(crate) fn new(stream: TcpStream, storage: Arc<dyn Storage + Send + Sync>) -> Self {
        Connection {
            stream,
            alive: true,
            interest: InterestSet {
                read: true,
                write: false,
            },
            read_buf: [0; READ_BUF_SIZE],
            r_offset: 0,
            pending: None,
            arg_remains: 0,
            argument: Vec::new(),
            out_queue: VecDeque::new(),
            w_offset: 0,
            storage,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn interest(&self) -> InterestSet {
        self.interest
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn on_error(&mut self) {
        self.alive = false;
    }

    pub(crate) fn on_close(&mut self) {
        self.alive = false;
    }

    /// Dispatch one readiness event against this connection.
    pub(crate) fn handle(&mut self, event: &Event) {
        if event.is_error() {
            self.on_error();
        } else if event.is_read_closed() {
            self.on_close();
        } else {
            if event.is_readable() {
                self.do_read();
            }
            if event.is_writable() && self.alive {
                let read_was_gated = !self.interest.read;
                self.do_write();
                if self.alive && read_was_gated && self.interest.read {
                    // Registration is edge-triggered: bytes that arrived
                    // while reads were gated off will not fire again, so
                    // drain them now that the gate is open.
                    self.do_read();
                }
            }
        }
    }

    /// Read and process input until the socket runs dry, the read gate
    /// closes, or the connection dies.
    pub(crate) fn do_read(&mut self) {
        while self.alive && self.interest.read {
            match self.stream.read(&mut self.read_buf[self.r_offset..]) {
                Ok(0) => {
                    // Peer closed (or a header overran the whole buffer).
                    self.on_close();
                }
                Ok(n) => {
                    let readed = self.r_offset + n;
                    self.r_offset = 0;
                    self.consume(readed);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    eprintln!("[brine-net] read failed: {}", e);
                    self.on_error();
                }
            }
        }
    }

    /// Run the parse/collect/execute cycle over `readed` buffered bytes.
    fn consume(&mut self, mut readed: usize) {
        let mut cur = 0;
        while readed > 0 {
            // No request in flight: try to parse a header.
            if self.pending.is_none() {
                match parse(&self.read_buf[cur..cur + readed]) {
                    Ok(Some((parsed, request))) => {
                        self.arg_remains = request.arg_len();
                        if self.arg_remains > 0 {
                            // Account for the body's \r\n terminator.
                            self.arg_remains += 2;
                        }
                        self.pending = Some(request);
                        cur += parsed;
                        readed -= parsed;
                    }
                    Ok(None) => {
                        // Incomplete header: keep the prefix for the next
                        // readiness round.
                        self.r_offset = readed;
                        self.read_buf.copy_within(cur..cur + readed, 0);
                        return;
                    }
                    Err(err) => {
                        eprintln!("[brine-net] protocol error: {}", err);
                        self.on_error();
                        return;
                    }
                }
            }

            // Request waiting on its data body: take what arrived.
            if self.pending.is_some() && self.arg_remains > 0 {
                let take = self.arg_remains.min(readed);
                self.argument
                    .extend_from_slice(&self.read_buf[cur..cur + take]);
                cur += take;
                self.arg_remains -= take;
                readed -= take;
            }

            // Header and body complete: execute and queue the reply.
            if self.arg_remains == 0 {
                if let Some(request) = self.pending.take() {
                    if !self.argument.is_empty() {
                        // Drop the body's \r\n terminator.
                        self.argument.truncate(self.argument.len() - 2);
                    }
                    let mut result = execute(&request, &self.argument, self.storage.as_ref());
                    result.extend_from_slice(b"\r\n");

                    if self.out_queue.is_empty() {
                        self.interest.write = true;
                    }
                    self.out_queue.push_back(result);
                    if self.out_queue.len() >= HIGH_WATERMARK {
                        self.interest.read = false;
                    }

                    self.argument.clear();
                }
            }
        }
    }

    /// Flush the output queue with vectored writes until it drains or the
    /// socket would block.
    pub(crate) fn do_write(&mut self) {
        while !self.out_queue.is_empty() {
            let mut iovs: Vec<IoSlice<'_>> = Vec::with_capacity(self.out_queue.len());
            for (i, entry) in self.out_queue.iter().enumerate() {
                if i == 0 {
                    iovs.push(IoSlice::new(&entry[self.w_offset..]));
                } else {
                    iovs.push(IoSlice::new(entry));
                }
            }
            match self.stream.write_vectored(&iovs) {
                Ok(0) => {
                    self.on_error();
                    break;
                }
                Ok(n) => {
                    // Normalize to the head entry's start, then pop every
                    // fully consumed entry.
                    let mut written = self.w_offset + n;
                    while let Some(front) = self.out_queue.front() {
                        if written >= front.len() {
                            written -= front.len();
                            self.out_queue.pop_front();
                        } else {
                            break;
                        }
                    }
                    self.w_offset = written;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    eprintln!("[brine-net] write failed: {}", e);
                    self.on_error();
                    break;
                }
            }
        }

        if self.out_queue.is_empty() {
            self.interest.write = false;
        }
        if self.out_queue.len() < LOW_WATERMARK {
            self.interest.read = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Shared loop bookkeeping
// ---------------------------------------------------------------------------

/// Register a new connection into the arena; slab key plus `base` becomes
/// the poll token. A registration failure drops (and thereby closes) the
/// connection.
pub(crate) fn install(
    registry: &Registry,
    conns: &mut Slab<Connection>,
    base: usize,
    stream: TcpStream,
    storage: &Arc<dyn Storage + Send + Sync>,
) {
    let entry = conns.vacant_entry();
    let token = Token(entry.key() + base);
    let mut conn = Connection::new(stream, Arc::clone(storage));
    let interest = conn.interest().to_mio();
    match registry.register(conn.stream_mut(), token, interest) {
        Ok(()) => {
            entry.insert(conn);
        }
        Err(e) => {
            eprintln!("[brine-net] failed to register connection: {}", e);
        }
    }
}

/// Dispatch an event to its connection, then settle the aftermath: a dead
/// connection is deregistered and dropped; a changed interest mask is
/// re-registered, and a failed re-register tears down that connection only.
pub(crate) fn service_event(
    registry: &Registry,
    conns: &mut Slab<Connection>,
    base: usize,
    event: &Event,
) {
    let idx = event.token().0 - base;
    let Some(conn) = conns.get_mut(idx) else {
        return;
    };
    let old_interest = conn.interest();
    conn.handle(event);

    if !conn.is_alive() {
        let mut conn = conns.remove(idx);
        let _ = registry.deregister(conn.stream_mut());
        // Socket closes when the connection drops.
    } else if conn.interest() != old_interest {
        let interest = conn.interest().to_mio();
        if let Err(e) = registry.reregister(conn.stream_mut(), event.token(), interest) {
            eprintln!("[brine-net] failed to update interest: {}", e);
            let mut conn = conns.remove(idx);
            let _ = registry.deregister(conn.stream_mut());
        }
    }
}

/// Deregister and close every connection a loop still owns.
pub(crate) fn drain_all(registry: &Registry, conns: &mut Slab<Connection>) {
    for mut conn in conns.drain() {
        conn.on_close();
        let _ = registry.deregister(conn.stream_mut());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
