//! Tasks
//!
//! Only the portion of the task control block that the wake-up engine needs
//! is defined here: the state bit-set, the wait descriptor, the pending
//! resource holder, and the embedded watchdog. Stacks, priorities, and the
//! ready queue belong to the (external) scheduler.
use bitflags::bitflags;
use core::{fmt, pin::Pin};

use crate::{klock, resource::ResourceSet, timeout, utils::Init, wait, KernelTraits};

bitflags! {
    /// Task state bit-set.
    ///
    /// An empty set means the task is schedulable (ready or running; whether
    /// it currently owns the processor is tracked by
    /// [`State::running_task`]). Each `WAIT_*` bit identifies the resource
    /// kind the task is blocked on; the wake-up engine tests exactly one of
    /// them, passed by the resource front end driving it.
    ///
    /// [`State::running_task`]: crate::State::running_task
    pub struct TaskState: u8 {
        /// Blocked waiting for event flags.
        const WAIT_EVENT = 1 << 0;
        /// Blocked waiting for semaphore units.
        const WAIT_SEMAPHORE = 1 << 1;
        /// Blocked waiting for a message-queue slot.
        const WAIT_MESSAGE = 1 << 2;
        /// Created but not yet activated.
        const DORMANT = 1 << 3;
    }
}

impl Init for TaskState {
    const INIT: Self = TaskState::DORMANT;
}

/// *Task control block* - the state data of a task.
pub struct TaskCb<Traits: KernelTraits> {
    pub(crate) st: klock::CpuLockCell<Traits, TaskState>,

    /// The wait state of the task.
    pub(crate) wait: wait::TaskWait<Traits>,

    /// Posted-but-unconsumed resource units. Mutated only by posting (union)
    /// and by the engine's clearing of seized bits (difference) - never
    /// reset wholesale, so units posted while no wait was in progress
    /// survive for a future wait.
    pub(crate) pending: klock::CpuLockCell<Traits, ResourceSet>,

    /// The timer backing this task's blocking-with-timeout operations. At
    /// most one wait per task is timed at a time, so one embedded watchdog
    /// suffices.
    pub(crate) watchdog: timeout::Watchdog<Traits>,
}

impl<Traits: KernelTraits> Init for TaskCb<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        st: Init::INIT,
        wait: Init::INIT,
        pending: Init::INIT,
        watchdog: timeout::Watchdog::new(wait::timeout_expired::<Traits>),
    };
}

impl<Traits: KernelTraits> fmt::Debug for TaskCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("self", &(self as *const _))
            .field("st", &self.st)
            .field("wait", &self.wait)
            .field("pending", &self.pending)
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

impl<Traits: KernelTraits> TaskCb<Traits> {
    /// Get the task state bit-set.
    pub fn state(&self, lock: klock::CpuLockTokenRefMut<'_, Traits>) -> TaskState {
        self.st.get(&*lock)
    }

    /// Replace the task state bit-set. Called by the scheduler and the
    /// blocking entry path.
    pub fn set_state(&self, mut lock: klock::CpuLockTokenRefMut<'_, Traits>, st: TaskState) {
        self.st.replace(&mut *lock, st);
    }

    /// Get the pending resource set.
    pub fn pending(&self, lock: klock::CpuLockTokenRefMut<'_, Traits>) -> ResourceSet {
        self.pending.get(&*lock)
    }

    /// Get the wait descriptor.
    pub fn wait(&self) -> &wait::TaskWait<Traits> {
        &self.wait
    }

    /// Get a pinned reference to the task's watchdog.
    pub fn watchdog(&'static self) -> Pin<&'static timeout::Watchdog<Traits>> {
        // Safety: `self` is `'static`; the watchdog is never moved out of it
        unsafe { Pin::new_unchecked(&self.watchdog) }
    }
}
