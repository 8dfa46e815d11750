//! The blocking-resource wake-up engine.
//!
//! A producer - a task or an interrupt handler - *surrenders* resource units
//! to a target task by calling [`surrender`]. The engine merges the units
//! into the task's pending set, evaluates the task's wait condition, and, if
//! the condition is now satisfied and the task is provably still waiting,
//! consumes exactly the seized units and hands the task to the unblock
//! dispatcher. Event flags, counting semaphores, and message-queue slot
//! availability all drive this one engine; a front end only chooses the
//! [`ResourceSet`] bit layout, the [`WaitFlags`] encoding, and the
//! [`TaskState`] bit to test.
//!
//! # The blocking entry path
//!
//! The code that puts a task to sleep is a collaborator outside this crate.
//! Before the engine may be invoked on a task, the entry path must have
//! performed, under the CPU Lock:
//!
//!  1. [`prepare_wait`] - populate the wait descriptor;
//!  2. [`arm_wait_timeout`] - arm the watchdog, if the wait has a deadline;
//!  3. set the task state to the blocked state being waited in.
//!
//! It then releases the CPU Lock and suspends the task. Between step 3 and
//! the suspension there is a window in which an interrupt handler can invoke
//! the engine on the task that is still executing; the engine resolves this
//! through the descriptor's [`SyncState`] marker instead of dispatching an
//! unblock (see [`surrender`]). After waking, the entry path reads the
//! outcome from [`TaskWait::sync_state`] and the seized units from
//! [`TaskWait::result`].
use bitflags::bitflags;
use core::fmt;

use crate::{
    error::BadContextError,
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    resource::ResourceSet,
    task::{TaskCb, TaskState},
    timeout::{self, Time32},
    utils::Init,
    KernelTraits,
};

bitflags! {
    /// Wait option flags. Immutable while the owning task is blocked.
    pub struct WaitFlags: u8 {
        /// Satisfy the wait as soon as *any* requested unit is available.
        /// Without this flag, every requested unit must be available at
        /// once.
        const ANY = 1 << 0;

        /// The caller declines to block: the front end polls and returns
        /// instead of suspending. Recorded here for the front ends' benefit;
        /// never examined by the wake-up engine.
        const NO_WAIT = 1 << 1;
    }
}

impl Init for WaitFlags {
    const INIT: Self = WaitFlags::empty();
}

/// The outcome marker of a blocking operation.
///
/// The marker is shared by two independent call paths - the wake-up engine
/// and the watchdog expiry hook - with a single-writer-wins contract:
/// whichever path observes `NothingHappened` first inside the critical
/// section gets to write the terminal value, and the loser must behave as a
/// no-op. It also resolves the window in which a task has published its
/// wait descriptor but has not yet suspended (see [`surrender`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// The wait is still pending. Only meaningful transiently, while a
    /// blocking operation is in progress.
    NothingHappened,
    /// The deadline elapsed before the condition was satisfied.
    Timeout,
    /// The condition was satisfied.
    Satisfied,
}

impl Init for SyncState {
    const INIT: Self = Self::NothingHappened;
}

/// Wait descriptor: per-task data describing what the task is blocked on.
/// Owned by its task control block; mutated only under the CPU Lock.
pub struct TaskWait<Traits> {
    /// The resource units the task requires. Set once when the task blocks;
    /// cleared to the empty set when the wait is satisfied or abandoned.
    /// The zeroed value is the single source of truth arbitrating races
    /// between a late post and a concurrent timeout: once a path clears it,
    /// no other path can satisfy the same wait.
    condition: CpuLockCell<Traits, ResourceSet>,

    /// Option flags. Immutable while the task is blocked.
    flags: CpuLockCell<Traits, WaitFlags>,

    /// Receives the seized units when the wait is satisfied. Written at
    /// most once per wait.
    result: CpuLockCell<Traits, ResourceSet>,

    /// The outcome marker.
    sync_state: CpuLockCell<Traits, SyncState>,
}

impl<Traits> Init for TaskWait<Traits> {
    const INIT: Self = Self {
        condition: Init::INIT,
        flags: Init::INIT,
        result: Init::INIT,
        sync_state: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for TaskWait<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskWait")
            .field("condition", &self.condition)
            .field("flags", &self.flags.debug_fmt_with(|x, f| x.bits().fmt(f)))
            .field("result", &self.result)
            .field("sync_state", &self.sync_state)
            .finish()
    }
}

impl<Traits: KernelTraits> TaskWait<Traits> {
    /// Get the wait condition.
    pub fn condition(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> ResourceSet {
        self.condition.get(&*lock)
    }

    /// Get the option flags.
    pub fn flags(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> WaitFlags {
        self.flags.get(&*lock)
    }

    /// Get the seized units of a satisfied wait.
    pub fn result(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> ResourceSet {
        self.result.get(&*lock)
    }

    /// Get the outcome marker.
    pub fn sync_state(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> SyncState {
        self.sync_state.get(&*lock)
    }
}

/// Populate the wait descriptor for a new wait. The first step of the
/// blocking entry sequence (see the module documentation).
pub fn prepare_wait<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &TaskCb<Traits>,
    condition: ResourceSet,
    flags: WaitFlags,
) {
    let wait = &task_cb.wait;
    wait.condition.replace(&mut *lock, condition);
    wait.flags.replace(&mut *lock, flags);
    wait.result.replace(&mut *lock, ResourceSet::EMPTY);
    wait.sync_state.replace(&mut *lock, SyncState::NothingHappened);
}

/// Arm the task's watchdog for a wait with a deadline `delta` ticks ahead.
/// The second step of the blocking entry sequence.
///
/// On expiry the watchdog resolves the wait to [`SyncState::Timeout`] and
/// invokes the unblock dispatcher, unless a satisfying post got there first.
pub fn arm_wait_timeout<Traits: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
    delta: Time32,
) {
    timeout::arm_watchdog(
        lock,
        task_cb.watchdog(),
        delta,
        task_cb as *const TaskCb<Traits> as usize,
    );
}

/// The watchdog expiry hook backing [`arm_wait_timeout`].
///
/// Runs when a timed wait reaches its deadline without having been
/// satisfied. Competes with [`surrender`] under the single-writer-wins
/// contract of [`SyncState`]: if a satisfying post already resolved the
/// wait (and therefore deactivated the watchdog, making this hook's firing
/// an abnormal but tolerated occurrence), this is a no-op.
pub(crate) fn timeout_expired<Traits: KernelTraits>(
    param: usize,
    mut lock: klock::CpuLockGuard<Traits>,
) -> klock::CpuLockGuard<Traits> {
    // Safety: `param` was derived from a `&'static TaskCb` by
    // `arm_wait_timeout`
    let task_cb: &'static TaskCb<Traits> = unsafe { &*(param as *const TaskCb<Traits>) };

    if task_cb.wait.sync_state.get(&*lock) != SyncState::NothingHappened {
        return lock;
    }

    task_cb
        .wait
        .sync_state
        .replace(&mut *lock, SyncState::Timeout);

    // Bar any late post from satisfying the abandoned wait
    task_cb
        .wait
        .condition
        .replace(&mut *lock, ResourceSet::EMPTY);

    // The unblock dispatcher runs with the CPU Lock inactive
    drop(lock);
    Traits::unblock(task_cb);

    // The watchdog dispatcher expects the hook to return with the lock
    // re-acquired; nothing can be holding it at this point
    klock::lock_cpu().unwrap()
}

/// Post `posted` to `task_cb`, waking the task up if its wait condition is
/// thereby satisfied.
///
/// This is the engine shared by every blocking resource kind. `wait_state`
/// selects the task-state bit that represents "blocked on this resource
/// kind"; the caller (a resource front end) passes the bit matching the
/// resource it manages.
///
/// Posting is unconditional and cannot fail: the units are merged into the
/// task's pending set even when nothing is waiting for them, and they stay
/// there for a future wait. Only the wake-up is conditional. Posting units
/// entirely disjoint from the task's wait condition, or posting to a task
/// that isn't waiting at all, is a silent no-op.
///
/// May be called from task context or from an interrupt handler. When an
/// interrupt handler posts to the very task it interrupted, the target may
/// be inside the blocking entry path - descriptor published, not yet
/// suspended. In that case the engine records the outcome in the
/// descriptor's [`SyncState`] and returns *without* invoking the unblock
/// dispatcher; the entry path notices the `Satisfied` marker and skips the
/// suspension.
pub fn surrender<Traits: KernelTraits>(
    task_cb: &'static TaskCb<Traits>,
    posted: ResourceSet,
    wait_state: TaskState,
) -> Result<(), BadContextError> {
    let mut lock = klock::lock_cpu::<Traits>()?;

    let flags = task_cb.wait.flags.get(&*lock);

    let pending = task_cb.pending.get(&*lock).post(posted);
    task_cb.pending.replace(&mut *lock, pending);

    // At this point the wait condition is a speculative quantity: the task
    // may not have reached (or may already have left) the corresponding
    // blocked state. The state checks further down are authoritative, not
    // this snapshot. Merging and seizing before checking any state is
    // deliberate: the emptiness test below settles the common case - nobody
    // asked for what was just posted - with nothing but set arithmetic.
    let condition = task_cb.wait.condition.get(&*lock);

    let seized = pending.seize(condition);

    if seized.is_empty() {
        // No units were seized; the posted ones stay in `pending` for a
        // future wait
        return Ok(());
    }

    let is_satisfied = seized == condition || flags.contains(WaitFlags::ANY);

    let is_executing = Traits::state()
        .running_task(lock.borrow_mut())
        .map_or(false, |running| core::ptr::eq(running, task_cb));

    // If we are in an interrupt handler posting to the interrupted task
    // itself, the task may be mid-way through the blocking entry path.
    // Resolve through the outcome marker and leave the task alone - it was
    // never suspended, so there is nothing to unblock. The guard admits
    // `Timeout` in addition to `NothingHappened`: a watchdog that fired in
    // the same pre-suspension window is overridden, since the entry path
    // has not yet acted on either marker. A marker of `Satisfied` falls
    // through to the ordinary path, where the already-zeroed condition
    // keeps this from resolving the same wait twice.
    let sync_state = task_cb.wait.sync_state.get(&*lock);
    if Traits::is_interrupt_context()
        && is_executing
        && matches!(sync_state, SyncState::NothingHappened | SyncState::Timeout)
    {
        if is_satisfied {
            task_cb.pending.replace(&mut *lock, pending.clear(seized));
            task_cb
                .wait
                .condition
                .replace(&mut *lock, ResourceSet::EMPTY);
            task_cb.wait.result.replace(&mut *lock, seized);
            task_cb
                .wait
                .sync_state
                .replace(&mut *lock, SyncState::Satisfied);
        }
        return Ok(());
    }

    // Otherwise, this is a normal post to another task
    if task_cb.st.get(&*lock).contains(wait_state) && is_satisfied {
        task_cb.pending.replace(&mut *lock, pending.clear(seized));
        task_cb
            .wait
            .condition
            .replace(&mut *lock, ResourceSet::EMPTY);
        task_cb.wait.result.replace(&mut *lock, seized);

        // The wait is resolved; every mutation above is done. Give pending
        // interrupts a window before the longer-running cleanup below. The
        // zeroed condition keeps any path that runs inside the window from
        // resolving this wait again.
        // Safety: no token borrows are held, and no value read before the
        // flash is used after it except `seized`, which is ours alone now
        unsafe { lock.flash() };

        if !task_cb.watchdog.is_armed(lock.borrow_mut()) {
            drop(lock);
        } else {
            // Make the watchdog invisible to the expiry dispatcher while
            // still inside the critical section...
            task_cb.watchdog.deactivate(lock.borrow_mut());
            drop(lock);

            // ...and do the structural unlink - a heap walk - in its own,
            // short critical section
            let mut lock = klock::lock_cpu::<Traits>()?;
            timeout::remove_watchdog(lock.borrow_mut(), &task_cb.watchdog);
            drop(lock);
        }

        Traits::unblock(task_cb);
        return Ok(());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        klock::lock_cpu,
        test_port::{define_test_kernel, init_logger},
        KernelTraits,
    };

    /// Everything the engine may touch, captured for no-op verification.
    #[derive(Debug, PartialEq, Eq)]
    struct Snapshot {
        st: TaskState,
        condition: ResourceSet,
        flags: WaitFlags,
        result: ResourceSet,
        sync_state: SyncState,
        pending: ResourceSet,
    }

    fn snapshot<Traits: KernelTraits>(task_cb: &'static TaskCb<Traits>) -> Snapshot {
        let mut lock = lock_cpu::<Traits>().unwrap();
        Snapshot {
            st: task_cb.state(lock.borrow_mut()),
            condition: task_cb.wait().condition(lock.borrow_mut()),
            flags: task_cb.wait().flags(lock.borrow_mut()),
            result: task_cb.wait().result(lock.borrow_mut()),
            sync_state: task_cb.wait().sync_state(lock.borrow_mut()),
            pending: task_cb.pending(lock.borrow_mut()),
        }
    }

    /// Emulate the blocking entry sequence up to (but not including) the
    /// suspension: populate the descriptor, optionally arm the watchdog,
    /// then enter the blocked state.
    fn begin_wait<Traits: KernelTraits>(
        task_cb: &'static TaskCb<Traits>,
        condition: u32,
        flags: WaitFlags,
        timeout: Option<Time32>,
        wait_state: TaskState,
    ) {
        let mut lock = lock_cpu::<Traits>().unwrap();
        prepare_wait(
            lock.borrow_mut(),
            task_cb,
            ResourceSet::from_bits(condition),
            flags,
        );
        if let Some(delta) = timeout {
            arm_wait_timeout(lock.borrow_mut(), task_cb, delta);
        }
        task_cb.set_state(lock.borrow_mut(), wait_state);
    }

    fn bits(bits: u32) -> ResourceSet {
        ResourceSet::from_bits(bits)
    }

    #[test]
    fn all_mode_requires_every_unit() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b11, WaitFlags::empty(), None, TaskState::WAIT_EVENT);

        // A proper subset must not wake the task, but its units must be
        // retained for the next evaluation
        surrender(&TASK, bits(0b01), TaskState::WAIT_EVENT).unwrap();
        let s = snapshot(&TASK);
        assert_eq!(s.st, TaskState::WAIT_EVENT);
        assert_eq!(s.pending, bits(0b01));
        assert_eq!(s.sync_state, SyncState::NothingHappened);
        assert!(Traits::unblock_log().is_empty());

        // The second unit completes the condition
        surrender(&TASK, bits(0b10), TaskState::WAIT_EVENT).unwrap();
        let s = snapshot(&TASK);
        assert_eq!(s.st, TaskState::empty());
        assert_eq!(s.result, bits(0b11));
        assert_eq!(s.condition, ResourceSet::EMPTY);
        assert_eq!(s.pending, ResourceSet::EMPTY);
        assert_eq!(Traits::unblock_log(), vec![&TASK as *const _ as usize]);
    }

    #[test]
    fn any_mode_takes_what_is_there() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b11, WaitFlags::ANY, None, TaskState::WAIT_EVENT);

        surrender(&TASK, bits(0b10), TaskState::WAIT_EVENT).unwrap();
        let s = snapshot(&TASK);
        assert_eq!(s.st, TaskState::empty());
        assert_eq!(s.result, bits(0b10));
        assert_eq!(s.pending, ResourceSet::EMPTY);
        assert_eq!(Traits::unblock_log().len(), 1);
    }

    #[test]
    fn disjoint_post_is_a_pure_no_op_except_pending() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1100, WaitFlags::empty(), None, TaskState::WAIT_EVENT);
        let before = snapshot(&TASK);

        surrender(&TASK, bits(0b0011), TaskState::WAIT_EVENT).unwrap();

        let after = snapshot(&TASK);
        assert_eq!(after.pending, bits(0b0011));
        assert_eq!(
            Snapshot {
                pending: before.pending,
                ..after
            },
            before
        );
        assert!(Traits::unblock_log().is_empty());
    }

    #[test]
    fn post_to_non_waiting_task_changes_nothing_but_pending() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        // The task is ready, not blocked; its descriptor still holds the
        // condition of a previous (completed) wait cycle
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            prepare_wait(lock.borrow_mut(), &TASK, bits(0b1), WaitFlags::empty());
            TASK.set_state(lock.borrow_mut(), TaskState::empty());
        }
        let before = snapshot(&TASK);

        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();

        let after = snapshot(&TASK);
        assert_eq!(after.pending, bits(0b1));
        assert_eq!(
            Snapshot {
                pending: before.pending,
                ..after
            },
            before
        );
        assert!(Traits::unblock_log().is_empty());
    }

    #[test]
    fn residual_pending_units_survive_a_satisfying_post() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b010, WaitFlags::empty(), None, TaskState::WAIT_EVENT);

        // More units than asked for: exactly the seized ones are consumed
        surrender(&TASK, bits(0b111), TaskState::WAIT_EVENT).unwrap();
        let s = snapshot(&TASK);
        assert_eq!(s.result, bits(0b010));
        assert_eq!(s.pending, bits(0b101));
    }

    #[test]
    fn pending_units_accumulated_while_ready_satisfy_a_later_wait() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            TASK.set_state(lock.borrow_mut(), TaskState::empty());
        }
        surrender(&TASK, bits(0b01), TaskState::WAIT_EVENT).unwrap();

        // The wait finds its condition already posted; the entry path would
        // normally poll first, but a post right after `begin_wait` completes
        // it just as well
        begin_wait(&TASK, 0b11, WaitFlags::empty(), None, TaskState::WAIT_EVENT);
        surrender(&TASK, bits(0b10), TaskState::WAIT_EVENT).unwrap();

        let s = snapshot(&TASK);
        assert_eq!(s.result, bits(0b11));
        assert_eq!(s.pending, ResourceSet::EMPTY);
        assert_eq!(Traits::unblock_log().len(), 1);
    }

    #[test]
    fn wrong_wait_state_bit_is_not_a_wake_up() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), None, TaskState::WAIT_SEMAPHORE);

        // The engine is driven for a different resource kind than the one
        // the task is blocked on; the authoritative state check must reject
        // the speculative seizure
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();

        let s = snapshot(&TASK);
        assert_eq!(s.st, TaskState::WAIT_SEMAPHORE);
        assert_eq!(s.sync_state, SyncState::NothingHappened);
        assert!(Traits::unblock_log().is_empty());
    }

    #[test]
    fn satisfying_post_cancels_the_watchdog() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), Some(100), TaskState::WAIT_EVENT);
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            assert!(TASK.watchdog.is_armed(lock.borrow_mut()));
        }

        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            assert!(!TASK.watchdog.is_armed(lock.borrow_mut()));
            assert!(!TASK.watchdog.is_linked(lock.borrow_mut()));
        }
        assert_eq!(Traits::unblock_log().len(), 1);

        // The deadline passing later must not produce a second wake-up
        Traits::advance_time(200);
        Traits::timer_tick();
        assert_eq!(Traits::unblock_log().len(), 1);
        assert_eq!(snapshot(&TASK).sync_state, SyncState::NothingHappened);
    }

    #[test]
    fn timeout_resolves_an_unsatisfied_wait() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), Some(100), TaskState::WAIT_EVENT);

        Traits::advance_time(150);
        Traits::timer_tick();

        let s = snapshot(&TASK);
        assert_eq!(s.sync_state, SyncState::Timeout);
        assert_eq!(s.condition, ResourceSet::EMPTY);
        assert_eq!(Traits::unblock_log(), vec![&TASK as *const _ as usize]);

        // A late post finds the condition zeroed and degrades to a plain
        // accumulation into `pending`
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        let s = snapshot(&TASK);
        assert_eq!(s.sync_state, SyncState::Timeout);
        assert_eq!(s.pending, bits(0b1));
        assert_eq!(Traits::unblock_log().len(), 1);
    }

    #[test]
    fn self_post_from_interrupt_resolves_through_the_marker() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        // The task has published its descriptor and blocked state but has
        // not suspended yet; it is still the running task when the
        // interrupt arrives
        begin_wait(&TASK, 0b1, WaitFlags::empty(), None, TaskState::WAIT_EVENT);
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            Traits::state().set_running_task(lock.borrow_mut(), Some(&TASK));
        }

        Traits::set_interrupt_context(true);
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        Traits::set_interrupt_context(false);

        let s = snapshot(&TASK);
        assert_eq!(s.sync_state, SyncState::Satisfied);
        assert_eq!(s.result, bits(0b1));
        assert_eq!(s.condition, ResourceSet::EMPTY);
        assert_eq!(s.pending, ResourceSet::EMPTY);
        // The blocked state bit is untouched and no unblock was dispatched:
        // the entry path will see `Satisfied` and skip the suspension
        assert_eq!(s.st, TaskState::WAIT_EVENT);
        assert!(Traits::unblock_log().is_empty());
    }

    #[test]
    fn self_post_from_interrupt_after_satisfaction_is_a_no_op() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), None, TaskState::WAIT_EVENT);
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            Traits::state().set_running_task(lock.borrow_mut(), Some(&TASK));
        }

        Traits::set_interrupt_context(true);
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        let before = snapshot(&TASK);

        // A second interrupt posting the same unit: the wait is already
        // resolved, so `result` must not be overwritten and no unblock may
        // be dispatched
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        Traits::set_interrupt_context(false);

        let after = snapshot(&TASK);
        assert_eq!(
            Snapshot {
                pending: before.pending,
                ..after
            },
            before
        );
        assert_eq!(after.pending, bits(0b1));
        assert!(Traits::unblock_log().is_empty());
    }

    #[test]
    fn self_post_from_interrupt_overrides_a_pre_suspension_timeout() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), Some(1), TaskState::WAIT_EVENT);
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            Traits::state().set_running_task(lock.borrow_mut(), Some(&TASK));
        }

        // The tiny deadline elapses while the task is still on its way into
        // the suspension
        Traits::advance_time(5);
        Traits::timer_tick();
        assert_eq!(snapshot(&TASK).sync_state, SyncState::Timeout);

        // The marker was `Timeout`, but the condition as restored below is
        // still wanted; re-publish it the way a retrying entry path would
        {
            let mut lock = lock_cpu::<Traits>().unwrap();
            prepare_wait(lock.borrow_mut(), &TASK, bits(0b1), WaitFlags::empty());
            TASK.wait
                .sync_state
                .replace(&mut *lock, SyncState::Timeout);
        }

        Traits::set_interrupt_context(true);
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        Traits::set_interrupt_context(false);

        let s = snapshot(&TASK);
        assert_eq!(s.sync_state, SyncState::Satisfied);
        assert_eq!(s.result, bits(0b1));
    }

    #[test]
    fn post_beats_timeout_under_the_same_lock() {
        define_test_kernel!(Traits);
        init_logger();
        Traits::init_kernel();
        static TASK: TaskCb<Traits> = TaskCb::INIT;

        begin_wait(&TASK, 0b1, WaitFlags::empty(), Some(100), TaskState::WAIT_EVENT);

        // The deadline has technically passed, but the post takes the
        // critical section first: it wins, and the expired watchdog -
        // already deactivated and unlinked - never runs its hook
        Traits::advance_time(150);
        surrender(&TASK, bits(0b1), TaskState::WAIT_EVENT).unwrap();
        Traits::timer_tick();

        let s = snapshot(&TASK);
        assert_eq!(s.result, bits(0b1));
        assert_ne!(s.sync_state, SyncState::Timeout);
        assert_eq!(Traits::unblock_log().len(), 1);
    }
}
