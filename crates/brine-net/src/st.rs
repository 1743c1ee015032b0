//! Single-threaded server: one thread owns the listener, the poll loop and
//! every connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use brine_store::Storage;

use crate::connection::{self, Connection};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const CONN_START: usize = 2;

/// Single-threaded non-blocking server.
///
/// `start` spawns the loop thread and returns; `stop` + `join` shut it
/// down. Dropping the server stops and joins it.
pub struct StServer {
    storage: Arc<dyn Storage + Send + Sync>,
    running: Arc<AtomicBool>,
    waker: Option<Arc<Waker>>,
    local_addr: Option<SocketAddr>,
    handle: Option<JoinHandle<()>>,
}

impl StServer {
    pub fn new(storage: Arc<dyn Storage + Send + Sync>) -> Self {
        StServer {
            storage,
            running: Arc::new(AtomicBool::new(false)),
            waker: None,
            local_addr: None,
            handle: None,
        }
    }

    /// Bind `addr` and spawn the event-loop thread.
    ///
    /// Setup failures (bind, poll creation, registration) are returned to
    /// the caller; nothing is spawned in that case.
    pub fn start(&mut self, addr: SocketAddr) -> io::Result<()> {
        crate::ignore_sigpipe();

        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        self.local_addr = Some(local_addr);
        self.waker = Some(Arc::clone(&waker));
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let storage = Arc::clone(&self.storage);
        self.handle = Some(std::thread::spawn(move || {
            event_loop(poll, listener, storage, running);
        }));

        eprintln!("[brine-net] listening on {}", local_addr);
        Ok(())
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Ask the loop to exit after its current batch of events.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(waker) = &self.waker {
            if let Err(e) = waker.wake() {
                eprintln!("[brine-net] failed to wake event loop: {}", e);
            }
        }
    }

    /// Wait for the loop thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StServer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn event_loop(
    mut poll: Poll,
    mut listener: TcpListener,
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
            eprintln!("[brine-net] poll failed: {}", e);
            break;
        }

        for event in events.iter() {
            match event.token() {
                WAKER => {
                    if !running.load(Ordering::SeqCst) {
                        run = false;
                    }
                }
                LISTENER => accept_batch(&poll, &mut listener, &mut conns, &storage),
                _ => connection::service_event(poll.registry(), &mut conns, CONN_START, event),
            }
        }
    }

    // Close every remaining connection before the thread unwinds.
    connection::drain_all(poll.registry(), &mut conns);
    eprintln!("[brine-net] server stopped");
}

/// Accept until the listener would block. Accept errors other than
/// `WouldBlock` end the batch.
fn accept_batch(
    poll: &Poll,
    listener: &mut TcpListener,
    conns: &mut Slab<Connection>,
    storage: &Arc<dyn Storage + Send + Sync>,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                eprintln!("[brine-net] accepted connection from {}", peer);
                connection::install(poll.registry(), conns, CONN_START, stream, storage);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                eprintln!("[brine-net] accept failed: {}", e);
                break;
            }
        }
    }
}
