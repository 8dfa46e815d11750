//! The synchronization core of the Strix kernel.
//!
//! This crate implements the mechanism by which a blocked task is released
//! when the resource it is waiting for becomes available. A producer - another
//! task or an interrupt handler - posts a [`ResourceSet`] value to a target
//! task by calling [`surrender`], which decides, atomically with respect to
//! interrupts, whether the target's wait condition is now satisfied and, if
//! so, performs the wake-up. The same engine backs event flags, counting
//! semaphores, and message-queue slot availability; only the bit layout of
//! the posted value differs between those instantiations.
//!
//! [`ResourceSet`]: crate::resource::ResourceSet
//! [`surrender`]: crate::wait::surrender
//!
//! # Architecture
//!
//! The crate is generic over a `Traits` type implementing [`KernelTraits`],
//! which supplies the port layer ([`PortThreading`] for the CPU Lock state
//! and context queries, [`PortTimer`] for the tick source), the kernel-global
//! [`State`], and the external unblock dispatcher. All mutable kernel state
//! lives in [`klock::CpuLockCell`]s, which statically require the CPU Lock to
//! be held for access.
//!
//! # Contexts
//!
//! No operation in this crate ever blocks. [`surrender`] may be called from
//! task context or from an interrupt handler; [`PortToKernel::timer_tick`]
//! must be called from an interrupt context. The *blocking entry path* - the
//! code that populates a task's wait descriptor, arms its watchdog, and
//! suspends the task - is a collaborator outside this crate; its obligations
//! are documented in [`wait`].
#![cfg_attr(not(test), no_std)]
use core::{fmt, mem};

pub mod error;
pub mod klock;
pub mod resource;
pub mod task;
pub mod timeout;
pub mod timestamp;
pub mod utils;
pub mod wait;

#[cfg(test)]
mod test_port;

pub use crate::{resource::ResourceSet, task::TaskCb, wait::surrender};

use crate::utils::{binary_heap::VecLike, Init};

/// Unsigned integer type representing a tick count.
///
/// The period of a tick is fixed by the port and never observed by this
/// crate; all tick arithmetic is relative.
pub type UTicks = u32;

/// Provides access to the CPU Lock state and to context queries.
///
/// # Safety
///
/// The implementation must uphold the CPU Lock protocol: between a successful
/// [`enter_cpu_lock`] and the matching [`leave_cpu_lock`], no other thread of
/// execution (task or interrupt handler) on the same conceptual processor may
/// enter the CPU Lock state.
///
/// [`enter_cpu_lock`]: Self::enter_cpu_lock
/// [`leave_cpu_lock`]: Self::leave_cpu_lock
pub unsafe trait PortThreading: Sized + 'static {
    /// Return `true` iff the CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return `true` iff the current context is a task context.
    fn is_task_context() -> bool;

    /// Return `true` iff the current context is an interrupt context.
    fn is_interrupt_context() -> bool;

    /// Enter the CPU Lock state.
    ///
    /// # Safety
    ///
    /// The CPU Lock state must be inactive.
    unsafe fn enter_cpu_lock();

    /// Leave the CPU Lock state.
    ///
    /// # Safety
    ///
    /// The CPU Lock state must be active, and the caller must be the one
    /// controlling it.
    unsafe fn leave_cpu_lock();

    /// Enter the CPU Lock state if it's inactive. Return `true` iff the
    /// state was entered by this call.
    ///
    /// # Safety
    ///
    /// Same as [`Self::enter_cpu_lock`], except that an active CPU Lock
    /// state is tolerated.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }
}

/// Provides access to the tick source used for timeout bookkeeping.
///
/// # Safety
///
/// [`tick_count`] must be monotone modulo `MAX_TICK_COUNT + 1` and must not
/// move faster than real time.
///
/// [`tick_count`]: Self::tick_count
pub unsafe trait PortTimer: Sized + 'static {
    /// The maximum value [`Self::tick_count`] can take before wrapping
    /// around to zero.
    const MAX_TICK_COUNT: UTicks;

    /// The maximum delta the kernel passes to [`Self::pend_tick_after`].
    /// Must not exceed `MAX_TICK_COUNT / 2`.
    const MAX_TIMEOUT: UTicks;

    /// Read the current tick count.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn tick_count() -> UTicks;

    /// Pend a call to [`PortToKernel::timer_tick`] as soon as possible.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn pend_tick() {}

    /// Pend a call to [`PortToKernel::timer_tick`] in `tick_count_delta`
    /// ticks. The port may fire it earlier, but must not fire it later.
    ///
    /// # Safety
    ///
    /// CPU Lock active.
    unsafe fn pend_tick_after(tick_count_delta: UTicks) {
        let _ = tick_count_delta;
    }
}

/// The all-encompassing trait a kernel instantiation implements.
///
/// # Safety
///
/// [`state`] must return the same instance for the lifetime of the program.
/// [`unblock`] is the *unblock dispatcher* - it must transition the given
/// task out of its blocked state and return it to the ready set. It is
/// called with the CPU Lock inactive, from task or interrupt context, and is
/// itself responsible for idempotent behavior when the task is not actually
/// blocked.
///
/// [`state`]: Self::state
/// [`unblock`]: Self::unblock
pub unsafe trait KernelTraits: PortThreading + PortTimer {
    /// The backing store for the deadline-ordered watchdog heap, e.g.,
    /// `ArrayVec<WatchdogRef<Self>, N>` where `N` bounds the number of
    /// concurrently armed watchdogs.
    type TimeoutHeap: VecLike<Element = timeout::WatchdogRef<Self>> + fmt::Debug + 'static;

    /// Access the kernel-global state.
    fn state() -> &'static State<Self>;

    /// The unblock dispatcher. See the trait-level safety documentation for
    /// the calling contract.
    fn unblock(task: &'static TaskCb<Self>);
}

/// Global kernel state.
pub struct State<Traits: KernelTraits> {
    /// The task the processor is currently executing, or `None` in an idle
    /// state. Maintained by the (external) scheduler.
    running_task: klock::CpuLockCell<Traits, Option<&'static TaskCb<Traits>>>,

    /// The timekeeping state.
    pub(crate) timeout: timeout::TimeoutGlobals<Traits>,
}

impl<Traits: KernelTraits> Init for State<Traits> {
    const INIT: Self = Self {
        running_task: Init::INIT,
        timeout: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for State<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State")
            .field(
                "running_task",
                &self.running_task.debug_fmt_with(|x, f| {
                    x.map(|task_cb| task_cb as *const _).fmt(f)
                }),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<Traits: KernelTraits> State<Traits> {
    /// Get the currently running task.
    pub fn running_task(
        &self,
        lock: klock::CpuLockTokenRefMut<'_, Traits>,
    ) -> Option<&'static TaskCb<Traits>> {
        self.running_task.get(&*lock)
    }

    /// Designate the currently running task. Called by the (external)
    /// scheduler on every dispatch.
    pub fn set_running_task(
        &self,
        mut lock: klock::CpuLockTokenRefMut<'_, Traits>,
        task_cb: Option<&'static TaskCb<Traits>>,
    ) {
        self.running_task.replace(&mut *lock, task_cb);
    }
}

/// Entry points invoked by the port layer.
pub trait PortToKernel {
    /// Initialize the timekeeping state.
    ///
    /// # Safety
    ///
    /// Called once at boot time with CPU Lock active, before any watchdog is
    /// armed.
    unsafe fn boot();

    /// Process a tick: dispatch expired watchdogs and reprogram the next
    /// tick.
    ///
    /// # Safety
    ///
    /// Called in an interrupt context with CPU Lock inactive.
    unsafe fn timer_tick();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn boot() {
        // Safety: CPU Lock active per this method's precondition
        let mut lock = unsafe { klock::assume_cpu_lock::<Traits>() };

        Traits::state().timeout.init(lock.borrow_mut());

        // The port retains control of the CPU Lock state across `boot`
        mem::forget(lock);
    }

    unsafe fn timer_tick() {
        timeout::handle_tick::<Traits>();
    }
}
