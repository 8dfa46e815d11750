//! Watchdog timers: deadline-ordered timers backing blocking-with-timeout.
//!
//! # Event times
//!
//! Deadlines are kept as [`Time32`] *event times*, a wrapping 32-bit tick
//! count. The current event time is reconstructed on demand by comparing the
//! port's tick counter against the value recorded on the previous "tick"
//! ([`TimeoutGlobals::last_tick_count`]), so the port only needs a
//! free-running counter. Because event times wrap, chronological order is
//! decided relative to a *critical point* trailing the current time by
//! [`HEADROOM`] ticks: a watchdog whose deadline falls between the critical
//! point and the current time is overdue. Deadlines may be armed at most
//! [`ARM_DELTA_MAX`] ticks ahead, and a timer interrupt may be serviced up
//! to `HEADROOM` ticks late, without breaking the ordering.
//!
//! # Two-phase cancellation
//!
//! Cancelling an armed watchdog is split into [`Watchdog::deactivate`]
//! (flip the state to inert, O(1), done inside the critical section) and
//! [`remove_watchdog`] (unlink from the deadline heap, done in a fresh,
//! short critical section afterwards). Phase 1 already makes the watchdog
//! invisible to the expiry dispatcher, so phase 2 can be deferred past a
//! critical-section boundary without a correctness cost.
use core::{fmt, marker::PhantomPinned, pin::Pin, ptr::NonNull};

use crate::{
    error::BadParamError,
    klock::{lock_cpu, CpuLockCell, CpuLockGuard, CpuLockTokenRefMut},
    utils::{
        binary_heap::{BinaryHeap, BinaryHeapCtx, VecLike},
        Init,
    },
    KernelTraits, UTicks,
};

// ---------------------------------------------------------------------------
// Define a singleton token type to allow the mutable access to
// `Watchdog::{at, heap_pos}` while the heap itself is mutably borrowed.

struct WatchdogPropTag;

/// The key that "unlocks" [`WatchdogPropCell`].
type WatchdogPropToken = tokenlock::UnsyncSingletonToken<WatchdogPropTag>;
type WatchdogPropTokenRef<'a> = tokenlock::UnsyncSingletonTokenRef<'a, WatchdogPropTag>;
type WatchdogPropTokenRefMut<'a> = tokenlock::UnsyncSingletonTokenRefMut<'a, WatchdogPropTag>;

/// The keyhole type for [`WatchdogPropCell`].
type WatchdogPropKeyhole = tokenlock::SingletonTokenId<WatchdogPropTag>;

/// Cell type that can be accessed by [`WatchdogPropToken`] (which is stored
/// alongside the heap and therefore available exactly when the heap is).
type WatchdogPropCell<T> = tokenlock::UnsyncTokenLock<T, WatchdogPropKeyhole>;

// Types representing times
// ---------------------------------------------------------------------------

/// Represents an event time or a relative tick count, with a wrapping range.
pub type Time32 = u32;

/// How overdue a watchdog can become (e.g., because of a belated timer
/// interrupt) without breaking the deadline ordering.
const HEADROOM: Time32 = 1 << 30;

/// The largest relative deadline accepted by [`arm_watchdog`].
pub const ARM_DELTA_MAX: Time32 = 1 << 31;

/// Find the critical point based on the current event time. Event times `x`
/// and `y` can have their chronological order determined by comparing
/// `x.wrapping_sub(critical_point)` and `y.wrapping_sub(critical_point)`.
#[inline]
fn critical_point(current_time: Time32) -> Time32 {
    current_time.wrapping_sub(HEADROOM)
}

/// Convert a whole tick count (e.g., the result of
/// [`Timestamp::to_ticks`]) to a relative deadline for [`arm_watchdog`].
///
/// [`Timestamp::to_ticks`]: crate::timestamp::Timestamp::to_ticks
#[inline]
pub const fn time32_from_ticks(ticks: u64) -> Result<Time32, BadParamError> {
    if ticks > ARM_DELTA_MAX as u64 {
        Err(BadParamError::BadParam)
    } else {
        Ok(ticks as Time32)
    }
}

// ---------------------------------------------------------------------------

/// A kernel-global state for timed event management.
pub struct TimeoutGlobals<Traits: KernelTraits> {
    /// The value of [`PortTimer::tick_count`] on the previous "tick".
    ///
    /// [`PortTimer::tick_count`]: crate::PortTimer::tick_count
    last_tick_count: CpuLockCell<Traits, UTicks>,

    /// The event time on the previous "tick".
    last_tick_time: CpuLockCell<Traits, Time32>,

    /// The heap (priority queue) containing the armed watchdogs, sorted by
    /// deadline, and the `WatchdogPropToken` used to access
    /// [`Watchdog`]'s field contents.
    heap_and_prop_token: CpuLockCell<Traits, WatchdogHeapAndPropToken<Traits::TimeoutHeap>>,

    /// Flag indicating whether `handle_tick` is in progress or not.
    handle_tick_in_progress: CpuLockCell<Traits, bool>,
}

#[derive(Debug)]
struct WatchdogHeapAndPropToken<TimeoutHeap: 'static> {
    heap: TimeoutHeap,
    prop_token: WatchdogPropToken,
}

impl<Traits: KernelTraits> Init for TimeoutGlobals<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        last_tick_count: Init::INIT,
        last_tick_time: Init::INIT,
        heap_and_prop_token: CpuLockCell::new(WatchdogHeapAndPropToken {
            heap: VecLike::DEFAULT,
            // Safety: In each particular `Traits`, this is the only instance
            //         of `WatchdogPropToken`. Multiple `Traits` technically
            //         break the singleton property, but the token of one
            //         `Traits` is never used to unlock another's cells.
            prop_token: unsafe { WatchdogPropToken::new_unchecked() },
        }),
        handle_tick_in_progress: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for TimeoutGlobals<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimeoutGlobals")
            .field("last_tick_count", &self.last_tick_count)
            .field("last_tick_time", &self.last_tick_time)
            .field(
                "heap_and_prop_token",
                &self.heap_and_prop_token.debug_fmt_with_ref(|x, f| x.fmt(f)),
            )
            .field("handle_tick_in_progress", &self.handle_tick_in_progress)
            .finish()
    }
}

impl<Traits: KernelTraits> TimeoutGlobals<Traits> {
    /// Initialize the timekeeping system.
    pub(crate) fn init(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        // Mark the first "tick"
        // Safety: CPU Lock active
        self.last_tick_count
            .replace(&mut *lock.borrow_mut(), unsafe { Traits::tick_count() });

        // Schedule the next tick. There are no watchdogs armed at the
        // moment, so use `MAX_TIMEOUT`.
        // Safety: CPU Lock active
        unsafe { Traits::pend_tick_after(Traits::MAX_TIMEOUT) };
    }
}

/// An internal utility to access `TimeoutGlobals`.
trait KernelTimeoutGlobalsExt: KernelTraits {
    fn g_timeout() -> &'static TimeoutGlobals<Self>;
}

impl<T: KernelTraits> KernelTimeoutGlobalsExt for T {
    /// Shortcut for `&Self::state().timeout`.
    #[inline(always)]
    fn g_timeout() -> &'static TimeoutGlobals<Self> {
        &Self::state().timeout
    }
}

// Watchdogs
// ---------------------------------------------------------------------------

/// The life-cycle state of a [`Watchdog`].
///
/// `Firing` is observable only from within the expiry hook; the dispatcher
/// restores `Inactive` when the hook returns. A watchdog that is
/// `Inactive` may still be *linked* (present in the deadline heap) - that is
/// the deactivated-but-not-yet-removed intermediate of the two-phase
/// cancellation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Inactive,
    Armed,
    Firing,
}

impl Init for WatchdogState {
    const INIT: Self = Self::Inactive;
}

/// Watchdog expiry hook.
///
/// Called with CPU Lock active, in an interrupt context, when the watchdog
/// reaches its deadline without having been deactivated. The hook receives
/// the parameter given to [`arm_watchdog`] and must return the lock guard it
/// was given (possibly after releasing and re-acquiring it).
pub type WatchdogFn<Traits> = fn(usize, CpuLockGuard<Traits>) -> CpuLockGuard<Traits>;

/// Value of [`Watchdog::heap_pos`] indicating the watchdog is not in the
/// heap.
const HEAP_POS_NONE: usize = usize::MAX;

/// A deadline timer.
///
/// `Watchdog` is a `!Unpin` type. Once armed, it must stay in the same
/// memory location until it's unlinked; dropping a still-linked `Watchdog`
/// is detected and causes a panic.
pub struct Watchdog<Traits: KernelTraits> {
    /// The deadline, an event time. Wrapped by `WatchdogPropCell` because
    /// [`WatchdogHeapCtx`]'s methods need access while the heap - and
    /// therefore the CPU Lock token - is mutably borrowed.
    at: WatchdogPropCell<Time32>,

    /// The position of this watchdog in [`TimeoutGlobals::heap_and_prop_token`],
    /// or [`HEAP_POS_NONE`].
    heap_pos: WatchdogPropCell<usize>,

    /// The life-cycle state. Checked by the expiry dispatcher; flipping this
    /// to `Inactive` while linked is the cheap half of cancellation.
    state: CpuLockCell<Traits, WatchdogState>,

    /// Expiry hook.
    hook: WatchdogFn<Traits>,

    /// Parameter given to the expiry hook. Assigned on every arm.
    param: CpuLockCell<Traits, usize>,

    _pin: PhantomPinned,
}

impl<Traits: KernelTraits> Watchdog<Traits> {
    /// Construct an inactive `Watchdog` with the specified expiry hook.
    pub const fn new(hook: WatchdogFn<Traits>) -> Self {
        Self {
            at: WatchdogPropCell::new(Init::INIT, 0),
            heap_pos: WatchdogPropCell::new(Init::INIT, HEAP_POS_NONE),
            state: CpuLockCell::new(WatchdogState::Inactive),
            hook,
            param: CpuLockCell::new(0),
            _pin: PhantomPinned,
        }
    }

    /// Get a flag indicating whether the `Watchdog` is armed.
    ///
    /// A deactivated or expired watchdog is not armed, even if it is still
    /// linked into the deadline heap.
    pub fn is_armed(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> bool {
        self.state.get(&*lock) == WatchdogState::Armed
    }

    /// Mark the watchdog inert without unlinking it - the first, O(1) phase
    /// of cancellation, performed inside the critical section that decided
    /// the cancellation. The expiry dispatcher will silently discard the
    /// watchdog when it surfaces in the heap.
    pub fn deactivate(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        self.state.replace(&mut *lock, WatchdogState::Inactive);
    }

    /// Get a flag indicating whether the `Watchdog` is currently in the
    /// heap.
    pub fn is_linked(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> bool {
        let prop_token = &Traits::g_timeout().heap_and_prop_token.read(&*lock).prop_token;

        *self.heap_pos.read(prop_token) != HEAP_POS_NONE
    }
}

impl<Traits: KernelTraits> Drop for Watchdog<Traits> {
    #[inline]
    fn drop(&mut self) {
        if *self.heap_pos.get_mut() != HEAP_POS_NONE {
            // The watchdog is still in the heap. Dropping `self` now would
            // leave a dangling reference there. We don't have CPU Lock and
            // aren't sure we can get hold of it, so panicking is the only
            // available course of action. The owner of `Watchdog` is
            // responsible for ensuring this does not happen.
            panic!("watchdog is still linked");
        }
    }
}

impl<Traits: KernelTraits> fmt::Debug for Watchdog<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("at", &self.at)
            .field("heap_pos", &self.heap_pos)
            .field("state", &self.state)
            .field("hook", &self.hook)
            .field("param", &self.param)
            .finish()
    }
}

/// A reference to a [`Watchdog`].
pub struct WatchdogRef<Traits: KernelTraits>(NonNull<Watchdog<Traits>>);

// Safety: `Watchdog` is `Send + Sync` (all shared mutation is token-gated)
unsafe impl<Traits: KernelTraits> Send for WatchdogRef<Traits> {}
unsafe impl<Traits: KernelTraits> Sync for WatchdogRef<Traits> {}

impl<Traits: KernelTraits> Clone for WatchdogRef<Traits> {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl<Traits: KernelTraits> Copy for WatchdogRef<Traits> {}

impl<Traits: KernelTraits> fmt::Debug for WatchdogRef<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("WatchdogRef").field(&self.0).finish()
    }
}

/// Used when manipulating the deadline heap. Provides the comparator
/// relative to the current critical point and keeps
/// [`Watchdog::heap_pos`] up-to-date.
struct WatchdogHeapCtx<'a> {
    critical_point: Time32,
    prop_token: WatchdogPropTokenRefMut<'a>,
}

impl<Traits: KernelTraits> BinaryHeapCtx<WatchdogRef<Traits>> for WatchdogHeapCtx<'_> {
    #[inline]
    fn lt(&mut self, x: &WatchdogRef<Traits>, y: &WatchdogRef<Traits>) -> bool {
        // Safety: `x` and `y` are in the heap, so the pointees must be valid
        let (x, y) = unsafe {
            (
                *x.0.as_ref().at.read(&*self.prop_token),
                *y.0.as_ref().at.read(&*self.prop_token),
            )
        };
        let critical_point = self.critical_point;
        x.wrapping_sub(critical_point) < y.wrapping_sub(critical_point)
    }

    #[inline]
    fn on_move(&mut self, e: &mut WatchdogRef<Traits>, new_index: usize) {
        // Safety: `e` is in the heap, so the pointee must be valid
        unsafe { e.0.as_ref() }
            .heap_pos
            .replace(&mut *self.prop_token, new_index);
    }
}

// Tick bookkeeping
// ---------------------------------------------------------------------------

/// Calculate the elapsed time since the last tick.
///
/// Returns two values:
///
///  1. The duration in range `0..=Traits::MAX_TICK_COUNT`.
///  2. The value of `Traits::tick_count()` used for the calculation.
#[inline]
fn duration_since_last_tick<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
) -> (Time32, Time32) {
    // Safety: CPU Lock active
    let tick_count = unsafe { Traits::tick_count() };

    let last_tick_count = Traits::g_timeout().last_tick_count.get(&*lock.borrow_mut());

    // Find the smallest `elapsed` satisfying
    // `(last_tick_count + elapsed) % (MAX_TICK_COUNT + 1) == tick_count`,
    // accounting for the counter's wrap-around point.
    let elapsed = if Traits::MAX_TICK_COUNT == UTicks::MAX || tick_count >= last_tick_count {
        tick_count.wrapping_sub(last_tick_count)
    } else {
        tick_count.wrapping_sub(last_tick_count) - (UTicks::MAX - Traits::MAX_TICK_COUNT)
    };

    (elapsed, tick_count)
}

/// Create a tick now: fold the elapsed duration into `last_tick_time`.
fn mark_tick<Traits: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, Traits>) {
    let (duration_since_last_tick, tick_count) =
        duration_since_last_tick::<Traits>(lock.borrow_mut());

    let g_timeout = Traits::g_timeout();
    g_timeout.last_tick_count.replace(&mut *lock, tick_count);
    g_timeout
        .last_tick_time
        .replace_with(&mut *lock, |old_value| {
            old_value.wrapping_add(duration_since_last_tick)
        });
}

/// Get the current event time.
fn current_time<Traits: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, Traits>) -> Time32 {
    let (duration_since_last_tick, _) = duration_since_last_tick::<Traits>(lock.borrow_mut());

    Traits::g_timeout()
        .last_tick_time
        .get(&*lock)
        .wrapping_add(duration_since_last_tick)
}

/// Calculate the number of ticks until the specified watchdog's deadline.
/// Returns `0` if the deadline has already passed.
fn saturating_ticks_until_deadline<Traits: KernelTraits>(
    watchdog: &Watchdog<Traits>,
    current_time: Time32,
    prop_token: WatchdogPropTokenRef<'_>,
) -> Time32 {
    let critical_point = critical_point(current_time);

    watchdog
        .at
        .read(&*prop_token)
        .wrapping_sub(critical_point)
        .saturating_sub(HEADROOM)
}

/// Schedule the next tick.
fn pend_next_tick<Traits: KernelTraits>(lock: CpuLockTokenRefMut<'_, Traits>, current_time: Time32) {
    let mut delay = Traits::MAX_TIMEOUT;

    let WatchdogHeapAndPropToken { heap, prop_token } =
        Traits::g_timeout().heap_and_prop_token.read(&*lock);

    // Check the top element (representing the earliest deadline) in the heap
    if let Some(&watchdog_ref) = heap.first() {
        // Safety: `watchdog_ref` is in the heap, meaning the pointee is valid
        let watchdog = unsafe { watchdog_ref.0.as_ref() };

        delay = delay.min(saturating_ticks_until_deadline(
            watchdog,
            current_time,
            prop_token.borrow(),
        ));
    }

    // Safety: CPU Lock active
    unsafe {
        if delay == 0 {
            Traits::pend_tick();
        } else {
            Traits::pend_tick_after(delay);
        }
    }
}

/// Implements [`PortToKernel::timer_tick`]: dispatch every overdue watchdog,
/// then reprogram the next tick.
///
/// Precondition: CPU Lock inactive, an interrupt context.
///
/// [`PortToKernel::timer_tick`]: crate::PortToKernel::timer_tick
pub(crate) fn handle_tick<Traits: KernelTraits>() {
    // The precondition includes CPU Lock being inactive, so this `unwrap`
    // should succeed
    let mut lock = lock_cpu::<Traits>().unwrap();

    mark_tick(lock.borrow_mut());

    let g_timeout = Traits::g_timeout();
    let current_time = g_timeout.last_tick_time.get(&*lock);
    let critical_point = critical_point(current_time);

    // Suppress redundant calls to `pend_next_tick` made by expiry hooks that
    // arm or cancel watchdogs.
    g_timeout.handle_tick_in_progress.replace(&mut *lock, true);

    // For each iteration, check the earliest deadline in the heap. Exit from
    // the loop when it hasn't been reached yet or the heap is empty.
    while let Some(&watchdog_ref) = g_timeout.heap_and_prop_token.read(&*lock).heap.first() {
        // Safety: `watchdog_ref` is in the heap, meaning the pointee is valid
        let watchdog = unsafe { &*watchdog_ref.0.as_ptr() };

        let remaining = {
            let heap_and_prop_token = g_timeout.heap_and_prop_token.read(&*lock);
            saturating_ticks_until_deadline(
                watchdog,
                current_time,
                heap_and_prop_token.prop_token.borrow(),
            )
        };
        if remaining > 0 {
            break;
        }

        // The deadline has been reached. Capture the hook and decide whether
        // it still gets to run before unlinking the watchdog.
        let hook = watchdog.hook;
        let param = watchdog.param.get(&*lock);
        let state = watchdog.state.get(&*lock);
        if state == WatchdogState::Armed {
            watchdog.state.replace(&mut *lock, WatchdogState::Firing);
        }

        let WatchdogHeapAndPropToken { heap, prop_token } =
            g_timeout.heap_and_prop_token.write(&mut *lock);

        debug_assert_eq!(*watchdog.heap_pos.read(prop_token), 0);
        watchdog.heap_pos.replace(prop_token, HEAP_POS_NONE);

        heap.heap_remove(
            0,
            WatchdogHeapCtx {
                critical_point,
                prop_token: prop_token.borrow_mut(),
            },
        );

        if state == WatchdogState::Armed {
            // Call the expiry hook.
            lock = hook(param, lock);

            watchdog.state.replace(&mut *lock, WatchdogState::Inactive);
        }
        // A deactivated watchdog is discarded without running its hook; the
        // cancelling path already resolved the wait it was backing.
    }

    g_timeout.handle_tick_in_progress.replace(&mut *lock, false);

    // Schedule the next tick
    pend_next_tick(lock.borrow_mut(), current_time);
}

// Arming and removal
// ---------------------------------------------------------------------------

/// Arm the specified watchdog to expire in `delta` ticks.
///
/// `param` is passed to the expiry hook. `delta` must not exceed
/// [`ARM_DELTA_MAX`].
pub fn arm_watchdog<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    watchdog: Pin<&Watchdog<Traits>>,
    delta: Time32,
    param: usize,
) {
    assert!(delta <= ARM_DELTA_MAX, "deadline out of range");

    let g_timeout = Traits::g_timeout();

    // For each `Watchdog` there can be only one heap entry pointing to it.
    // Were two entries allowed, removing the first would falsely flag the
    // watchdog as unlinked while the second still references it.
    {
        let prop_token = &g_timeout.heap_and_prop_token.read(&*lock).prop_token;
        assert_eq!(
            *watchdog.heap_pos.read(prop_token),
            HEAP_POS_NONE,
            "watchdog is already armed",
        );
    }

    watchdog.param.replace(&mut *lock, param);
    watchdog.state.replace(&mut *lock, WatchdogState::Armed);

    let current_time = current_time(lock.borrow_mut());
    let at = current_time.wrapping_add(delta);
    let critical_point = critical_point(current_time);

    // Insert a reference to `*watchdog` into the heap. `Watchdog` is
    // `!Unpin` and its `Drop` implementation refuses to drop a linked
    // watchdog, so the reference can't be left dangling.
    let WatchdogHeapAndPropToken { heap, prop_token } =
        g_timeout.heap_and_prop_token.write(&mut *lock);

    *watchdog.at.write(prop_token) = at;

    let pos = heap.heap_push(
        WatchdogRef(NonNull::from(&*watchdog)),
        WatchdogHeapCtx {
            critical_point,
            prop_token: prop_token.borrow_mut(),
        },
    );

    // `WatchdogHeapCtx::on_move` should have assigned `heap_pos`
    debug_assert_eq!(*watchdog.heap_pos.read(prop_token), pos);

    if !g_timeout.handle_tick_in_progress.get(&*lock) {
        // (Re-)schedule the next tick
        pend_next_tick(lock, current_time);
    }
}

/// Unlink the specified watchdog from the deadline heap and mark it
/// inactive. Does nothing if it's not linked.
///
/// This is the structural (slower) half of cancellation. When cancelling
/// from inside a longer critical section, call [`Watchdog::deactivate`]
/// there first and defer this call until after the section ends.
#[inline]
pub fn remove_watchdog<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    watchdog: &Watchdog<Traits>,
) {
    let g_timeout = Traits::g_timeout();

    let current_time = current_time(lock.borrow_mut());
    let critical_point = critical_point(current_time);

    // Remove `watchdog` from the heap.
    //
    // If `heap_pos == HEAP_POS_NONE`, we are supposed to do nothing.
    // `HEAP_POS_NONE` is a huge value, so `heap_remove` will inevitably
    // reject it by bounds check. This way, we can check both for bounds and
    // `HEAP_POS_NONE` in one fell swoop.
    let WatchdogHeapAndPropToken { heap, prop_token } =
        g_timeout.heap_and_prop_token.write(&mut *lock);

    let heap_pos = *watchdog.heap_pos.read(prop_token);

    let watchdog_ref = heap.heap_remove(
        heap_pos,
        WatchdogHeapCtx {
            critical_point,
            prop_token: prop_token.borrow_mut(),
        },
    );

    match watchdog_ref {
        None => {
            // The cause of failure must be `watchdog` not being linked in
            // the first place. (A bounds-check failure for a linked one
            // would clearly be a programming error on our part.)
            debug_assert_eq!(heap_pos, HEAP_POS_NONE);
            return;
        }
        Some(removed) => {
            // The removed element should have pointed to `watchdog`
            debug_assert_eq!(removed.0.as_ptr() as *const _, watchdog as *const _);
        }
    }

    watchdog.heap_pos.replace(
        &mut g_timeout.heap_and_prop_token.write(&mut *lock).prop_token,
        HEAP_POS_NONE,
    );
    watchdog.state.replace(&mut *lock, WatchdogState::Inactive);

    if !g_timeout.handle_tick_in_progress.get(&*lock) {
        // (Re-)schedule the next tick
        pend_next_tick(lock, current_time);
    }
}
