//! Multi-threaded server: one acceptor thread, N worker threads.
//!
//! The acceptor owns the listener and hands accepted streams to workers
//! round-robin over per-worker channels, nudging the worker's `Waker` after
//! each handoff. A connection is pinned to its worker for life: the worker
//! registers it with its own poll, services all of its events and closes it.
//! Only the storage is shared, behind its own lock.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use brine_store::Storage;

use crate::connection::{self, Connection};

// Acceptor tokens.
const LISTENER: Token = Token(0);
const ACCEPTOR_WAKER: Token = Token(1);

// Worker tokens: the waker, then connections.
const WORKER_WAKER: Token = Token(0);
const CONN_START: usize = 1;

/// Multi-threaded non-blocking server.
///
/// `start` spawns the acceptor and `workers` worker threads; `stop` +
/// `join` shut everything down. Dropping the server stops and joins it.
pub struct MtServer {
    storage: Arc<dyn Storage + Send + Sync>,
    workers: usize,
    running: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    local_addr: Option<SocketAddr>,
    handles: Vec<JoinHandle<()>>,
}

impl MtServer {
    /// A server with `workers` worker threads (at least one).
    pub fn new(storage: Arc<dyn Storage + Send + Sync>, workers: usize) -> Self {
        MtServer {
            storage,
            workers: workers.max(1),
            running: Arc::new(AtomicBool::new(false)),
            wakers: Vec::new(),
            local_addr: None,
            handles: Vec::new(),
        }
    }

    /// Bind `addr`, spawn the workers and the acceptor.
    ///
    /// Setup failures are returned before any thread is spawned.
    pub fn start(&mut self, addr: SocketAddr) -> io::Result<()> {
        crate::ignore_sigpipe();

        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let acceptor_poll = Poll::new()?;
        acceptor_poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let acceptor_waker = Arc::new(Waker::new(acceptor_poll.registry(), ACCEPTOR_WAKER)?);

        // Build every worker's poll/waker/channel up front so that a setup
        // failure leaves nothing running.
        let mut worker_parts: Vec<(Poll, Arc<Waker>, Sender<TcpStream>, Receiver<TcpStream>)> =
            Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let poll = Poll::new()?;
            let waker = Arc::new(Waker::new(poll.registry(), WORKER_WAKER)?);
            let (tx, rx) = crossbeam_channel::unbounded();
            worker_parts.push((poll, waker, tx, rx));
        }

        self.local_addr = Some(local_addr);
        self.running.store(true, Ordering::SeqCst);
        self.wakers.push(Arc::clone(&acceptor_waker));

        let mut senders = Vec::with_capacity(self.workers);
        let mut worker_wakers = Vec::with_capacity(self.workers);
        for (poll, waker, tx, rx) in worker_parts {
            senders.push(tx);
            worker_wakers.push(Arc::clone(&waker));
            self.wakers.push(waker);

            let storage = Arc::clone(&self.storage);
            let running = Arc::clone(&self.running);
            self.handles.push(std::thread::spawn(move || {
                worker_loop(poll, rx, storage, running);
            }));
        }

        let running = Arc::clone(&self.running);
        self.handles.push(std::thread::spawn(move || {
            acceptor_loop(acceptor_poll, listener, senders, worker_wakers, running);
        }));

        eprintln!(
            "[brine-net] listening on {} ({} workers)",
            local_addr, self.workers
        );
        Ok(())
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Ask every loop to exit after its current batch of events.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                eprintln!("[brine-net] failed to wake loop: {}", e);
            }
        }
    }

    /// Wait for the acceptor and every worker to finish.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for MtServer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn acceptor_loop(
    mut poll: Poll,
    mut listener: TcpListener,
    senders: Vec<Sender<TcpStream>>,
    worker_wakers: Vec<Arc<Waker>>,
    running: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(16);
    let mut next_worker = 0usize;
    let mut run = true;

    while run {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            eprintln!("[brine-net] acceptor poll failed: {}", e);
            break;
        }

        for event in events.iter() {
            match event.token() {
                ACCEPTOR_WAKER => {
                    if !running.load(Ordering::SeqCst) {
                        run = false;
                    }
                }
                LISTENER => loop {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            // Pin the connection to a worker; it never
                            // migrates afterwards.
                            let w = next_worker % senders.len();
                            next_worker = next_worker.wrapping_add(1);
                            eprintln!(
                                "[brine-net] accepted connection from {} -> worker {}",
                                peer, w
                            );
                            if senders[w].send(stream).is_ok() {
                                let _ = worker_wakers[w].wake();
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            eprintln!("[brine-net] accept failed: {}", e);
                            break;
                        }
                    }
                },
                _ => {}
            }
        }
    }

    // Senders drop here; workers see a disconnected channel on their next
    // waker event.
    eprintln!("[brine-net] acceptor stopped");
}

fn worker_loop(
    mut poll: Poll,
    handoff: Receiver<TcpStream>,
    storage: Arc<dyn Storage + Send + Sync>,
    running: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(64);
    let mut conns: Slab<Connection> = Slab::new();
    let mut run = true;

    while run {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            eprintln!("[brine-net] worker poll failed: {}", e);
            break;
        }

        for event in events.iter() {
            match event.token() {
                WORKER_WAKER => {
                    // Adopt newly handed-off connections.
                    while let Ok(stream) = handoff.try_recv() {
                        connection::install(
                            poll.registry(),
                            &mut conns,
                            CONN_START,
                            stream,
                            &storage,
                        );
                    }
                    if !running.load(Ordering::SeqCst) {
                        run = false;
                    }
                }
                _ => connection::service_event(poll.registry(), &mut conns, CONN_START, event),
            }
        }
    }

    connection::drain_all(poll.registry(), &mut conns);
    eprintln!("[brine-net] worker stopped");
}
