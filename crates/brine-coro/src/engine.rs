//! Engine internals: coroutine registry, run queues, scheduler loop.
//!
//! Each coroutine is a `corosensei` stackful coroutine on a dedicated
//! 64 KiB stack. Suspension hands control back to the scheduler loop in
//! [`Engine::start`]; the scheduling request (a directed transfer from
//! [`sched`]) travels through the engine state rather than the yield
//! payload.
//!
//! ## Thread-local state
//!
//! Two thread-locals track the execution context:
//! - `CURRENT_ENGINE`: the engine driving this thread, installed for the
//!   duration of [`Engine::start`]. The free functions resolve against it.
//! - `CURRENT_YIELDER`: pointer to the running coroutine's `Yielder`, set
//!   inside the coroutine body and re-installed after every resume.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use rustc_hash::{FxHashMap, FxHashSet};

/// Stack size for each coroutine.
const STACK_SIZE: usize = 64 * 1024;

type Coro = Coroutine<(), (), ()>;

// ---------------------------------------------------------------------------
// CoroId
// ---------------------------------------------------------------------------

/// Opaque handle to a coroutine.
///
/// Ids are assigned from a per-engine counter and never reused, so a handle
/// to a completed coroutine is recognizably dead: scheduling or blocking it
/// is a no-op rather than undefined behavior.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroId(u64);

impl fmt::Debug for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Thread-local current-engine context
// ---------------------------------------------------------------------------

thread_local! {
    /// Engine currently driving this thread, if any.
    static CURRENT_ENGINE: RefCell<Option<Rc<RefCell<EngineState>>>> = const { RefCell::new(None) };

    /// Raw pointer to the running coroutine's `Yielder`.
    ///
    /// Stored as `*const ()` to erase the lifetime; the `Yielder` is
    /// borrowed from within the coroutine body and stays valid for the
    /// duration of that resume. Re-installed after every suspension because
    /// another coroutine may have overwritten the slot in between.
    static CURRENT_YIELDER: Cell<Option<*const ()>> = const { Cell::new(None) };
}

/// Clone out the current engine state. Never hold the returned `Rc`'s
/// borrow across a suspension point.
fn current_state() -> Option<Rc<RefCell<EngineState>>> {
    CURRENT_ENGINE.with(|c| c.borrow().as_ref().cloned())
}

/// Suspend the running coroutine, returning control to the scheduler loop.
///
/// Must only be called from within a running coroutine. All engine-state
/// borrows must be released before calling this.
fn suspend_current() {
    CURRENT_YIELDER.with(|c| {
        let ptr = c.get().expect("suspension outside of a coroutine");
        // Safety: the pointer was installed by the coroutine body that is
        // currently running, and the Yielder it refers to is borrowed for
        // the duration of this resume.
        let yielder: &Yielder<(), ()> = unsafe { &*(ptr as *const Yielder<(), ()>) };
        yielder.suspend(());
        c.set(Some(ptr));
    });
}

// ---------------------------------------------------------------------------
// Free functions (operate on the engine running on this thread)
// ---------------------------------------------------------------------------

/// Register a new coroutine with the engine running on this thread.
///
/// The coroutine is placed on the runnable queue but does not execute until
/// scheduled. Returns `None` when no engine is running here -- registering
/// work before [`Engine::start`] has no engine to attach it to.
pub fn spawn<F>(f: F) -> Option<CoroId>
where
    F: FnOnce() + 'static,
{
    let state = current_state()?;
    let id = {
        let mut st = state.borrow_mut();
        st.next_id += 1;
        CoroId(st.next_id)
    };

    let stack = DefaultStack::new(STACK_SIZE).expect("failed to allocate coroutine stack");
    let coro = Coroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, _input: ()| {
        // Install the yielder so suspension points inside `f` can reach it.
        CURRENT_YIELDER.with(|c| {
            c.set(Some(yielder as *const Yielder<(), ()> as *const ()));
        });
        f();
    });

    let mut st = state.borrow_mut();
    st.coros.insert(id, coro);
    st.alive.push_back(id);
    Some(id)
}

/// Give up execution and let the engine schedule some other runnable
/// coroutine. Returns immediately when the current coroutine is the only
/// live one, when nothing else is runnable, or when called outside a
/// coroutine.
pub fn yield_now() {
    let Some(state) = current_state() else { return };
    let can_switch = {
        let st = state.borrow();
        st.running.is_some() && !st.alive.is_empty()
    };
    if can_switch {
        suspend_current();
    }
}

/// Transfer control to `target`.
///
/// `None` yields and returns. A blocked, dead, or currently-running target
/// makes this a no-op.
pub fn sched(target: Option<CoroId>) {
    let Some(id) = target else {
        yield_now();
        return;
    };
    let Some(state) = current_state() else { return };
    let transfer = {
        let mut st = state.borrow_mut();
        if st.running.is_none()
            || st.running == Some(id)
            || st.blocked.contains(&id)
            || !st.coros.contains_key(&id)
        {
            false
        } else {
            st.next_target = Some(id);
            true
        }
    };
    if transfer {
        suspend_current();
    }
}

/// Block `target` (`None` = the current coroutine) so it cannot be
/// scheduled until [`unblock`]ed. Blocking the current coroutine suspends
/// it after the move; blocking an already-blocked or dead target is a
/// no-op.
pub fn block(target: Option<CoroId>) {
    let Some(state) = current_state() else { return };
    let mut suspend = false;
    {
        let mut st = state.borrow_mut();
        let id = match target.or(st.running) {
            Some(id) => id,
            None => return,
        };
        if st.blocked.contains(&id) {
            // Nothing to do.
        } else if st.running == Some(id) {
            st.blocked.insert(id);
            suspend = true;
        } else if let Some(pos) = st.alive.iter().position(|&a| a == id) {
            st.alive.remove(pos);
            st.blocked.insert(id);
        }
    }
    if suspend {
        suspend_current();
    }
}

/// Move a blocked coroutine back to the runnable queue. No-op when the
/// target is already runnable, dead, or unknown.
pub fn unblock(target: CoroId) {
    let Some(state) = current_state() else { return };
    let mut st = state.borrow_mut();
    if st.blocked.remove(&target) {
        st.alive.push_back(target);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineState {
    /// Monotonic id source; ids are never reused.
    next_id: u64,
    /// Coroutine currently being resumed, if any.
    running: Option<CoroId>,
    /// Runnable coroutines in round-robin order (front runs next).
    alive: VecDeque<CoroId>,
    /// Coroutines invisible to the scheduler until unblocked.
    blocked: FxHashSet<CoroId>,
    /// Directed transfer requested by `sched`, honored on the next pick.
    next_target: Option<CoroId>,
    /// Live coroutine objects. The running coroutine's entry is taken out
    /// of the map for the duration of its resume.
    coros: FxHashMap<CoroId, Coro>,
}

impl EngineState {
    fn new() -> Self {
        EngineState {
            next_id: 0,
            running: None,
            alive: VecDeque::new(),
            blocked: FxHashSet::default(),
            next_target: None,
            coros: FxHashMap::default(),
        }
    }

    /// Pick the next coroutine to run: a pending `sched` target when it is
    /// still runnable, otherwise the front of the round-robin queue.
    fn take_next(&mut self) -> Option<CoroId> {
        if let Some(target) = self.next_target.take() {
            if let Some(pos) = self.alive.iter().position(|&id| id == target) {
                self.alive.remove(pos);
                return Some(target);
            }
        }
        self.alive.pop_front()
    }
}

/// The coroutine engine. Construct, then [`start`](Engine::start) it with
/// the main coroutine; `start` returns once every coroutine has completed.
pub struct Engine {
    state: Rc<RefCell<EngineState>>,
    unblocker: Box<dyn FnMut()>,
}

impl Engine {
    /// Engine with a no-op unblocker: once every live coroutine is
    /// blocked, the engine shuts down.
    pub fn new() -> Self {
        Engine::with_unblocker(|| {})
    }

    /// Engine with an unblocker hook, invoked whenever every live
    /// coroutine is blocked. The hook is expected to wait on an external
    /// readiness source and [`unblock`] at least one coroutine; if it
    /// unblocks nobody, the engine shuts down.
    pub fn with_unblocker<F>(unblocker: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Engine {
            state: Rc::new(RefCell::new(EngineState::new())),
            unblocker: Box::new(unblocker),
        }
    }

    /// Run `main` as the first coroutine and drive the scheduler until no
    /// coroutine remains. Does not return while any coroutine is alive or
    /// a blocked coroutine can still be unblocked by the unblocker.
    ///
    /// # Panics
    ///
    /// Panics if an engine is already running on this thread.
    pub fn start<F>(mut self, main: F)
    where
        F: FnOnce() + 'static,
    {
        CURRENT_ENGINE.with(|c| {
            let mut slot = c.borrow_mut();
            assert!(
                slot.is_none(),
                "Engine::start called while another engine is running on this thread"
            );
            *slot = Some(Rc::clone(&self.state));
        });

        spawn(main).expect("engine just installed");

        loop {
            let next = self.state.borrow_mut().take_next();
            let id = match next {
                Some(id) => id,
                None => {
                    // Nothing runnable. If someone is blocked, give the
                    // unblocker a chance; otherwise we are done.
                    if self.state.borrow().blocked.is_empty() {
                        break;
                    }
                    (self.unblocker)();
                    if self.state.borrow().alive.is_empty() {
                        break;
                    }
                    continue;
                }
            };

            let mut coro = self
                .state
                .borrow_mut()
                .coros
                .remove(&id)
                .expect("scheduled coroutine has no context");
            self.state.borrow_mut().running = Some(id);

            let result = coro.resume(());
            CURRENT_YIELDER.with(|c| c.set(None));

            let mut st = self.state.borrow_mut();
            st.running = None;
            match result {
                CoroutineResult::Yield(()) => {
                    st.coros.insert(id, coro);
                    if !st.blocked.contains(&id) {
                        st.alive.push_back(id);
                    }
                }
                CoroutineResult::Return(()) => {
                    // Completed: dropping the coroutine releases its stack.
                    st.blocked.remove(&id);
                }
            }
        }

        CURRENT_ENGINE.with(|c| c.borrow_mut().take());
        // Coroutines still blocked at shutdown are dropped with the state;
        // corosensei unwinds their stacks.
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
