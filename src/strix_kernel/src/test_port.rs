//! A mock port and kernel instantiation for unit tests.
//!
//! [`define_test_kernel!`] stamps out a fresh `KernelTraits` type, with its
//! own port state and kernel `State`, inside the invoking scope. Each test
//! defines its own kernel, so tests can run in parallel without sharing any
//! singleton tokens or statics.
//!
//! The mock port keeps the CPU Lock and interrupt-context states in plain
//! atomics and drives time from a counter the test advances by hand. The
//! unblock dispatcher records every call and transitions the task back to
//! the ready (empty) state, the way the real scheduler's dispatcher would.
use std::sync::{
    atomic::{AtomicBool, AtomicU32},
    Mutex,
};

pub(crate) struct TestPortState {
    pub(crate) cpu_lock: AtomicBool,
    pub(crate) interrupt_ctx: AtomicBool,
    pub(crate) tick_count: AtomicU32,
    /// The argument of the most recent `pend_tick_after` call.
    pub(crate) last_pend_delta: AtomicU32,
    pub(crate) unblocked: Mutex<Vec<usize>>,
}

impl TestPortState {
    pub(crate) const fn new() -> Self {
        Self {
            cpu_lock: AtomicBool::new(false),
            interrupt_ctx: AtomicBool::new(false),
            tick_count: AtomicU32::new(0),
            last_pend_delta: AtomicU32::new(0),
            unblocked: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

macro_rules! define_test_kernel {
    ($Traits:ident) => {
        struct $Traits;

        static TEST_PORT_STATE: $crate::test_port::TestPortState =
            $crate::test_port::TestPortState::new();

        static KERNEL_STATE: $crate::State<$Traits> =
            <$crate::State<$Traits> as $crate::utils::Init>::INIT;

        unsafe impl $crate::PortThreading for $Traits {
            fn is_cpu_lock_active() -> bool {
                TEST_PORT_STATE
                    .cpu_lock
                    .load(::std::sync::atomic::Ordering::Relaxed)
            }

            fn is_task_context() -> bool {
                !Self::is_interrupt_context()
            }

            fn is_interrupt_context() -> bool {
                TEST_PORT_STATE
                    .interrupt_ctx
                    .load(::std::sync::atomic::Ordering::Relaxed)
            }

            unsafe fn enter_cpu_lock() {
                assert!(
                    !TEST_PORT_STATE
                        .cpu_lock
                        .swap(true, ::std::sync::atomic::Ordering::Relaxed),
                    "CPU Lock was already active"
                );
            }

            unsafe fn leave_cpu_lock() {
                assert!(
                    TEST_PORT_STATE
                        .cpu_lock
                        .swap(false, ::std::sync::atomic::Ordering::Relaxed),
                    "CPU Lock was not active"
                );
            }
        }

        unsafe impl $crate::PortTimer for $Traits {
            const MAX_TICK_COUNT: $crate::UTicks = $crate::UTicks::MAX;
            const MAX_TIMEOUT: $crate::UTicks = 1 << 30;

            unsafe fn tick_count() -> $crate::UTicks {
                TEST_PORT_STATE
                    .tick_count
                    .load(::std::sync::atomic::Ordering::Relaxed)
            }

            unsafe fn pend_tick_after(tick_count_delta: $crate::UTicks) {
                ::log::trace!("pend_tick_after({})", tick_count_delta);
                TEST_PORT_STATE
                    .last_pend_delta
                    .store(tick_count_delta, ::std::sync::atomic::Ordering::Relaxed);
            }
        }

        unsafe impl $crate::KernelTraits for $Traits {
            type TimeoutHeap = ::arrayvec::ArrayVec<$crate::timeout::WatchdogRef<Self>, 8>;

            fn state() -> &'static $crate::State<Self> {
                &KERNEL_STATE
            }

            fn unblock(task_cb: &'static $crate::TaskCb<Self>) {
                assert!(
                    !<Self as $crate::PortThreading>::is_cpu_lock_active(),
                    "the unblock dispatcher must be called with CPU Lock inactive"
                );
                ::log::trace!("unblock({:p})", task_cb);
                TEST_PORT_STATE
                    .unblocked
                    .lock()
                    .unwrap()
                    .push(task_cb as *const _ as usize);

                let mut lock = $crate::klock::lock_cpu::<Self>().unwrap();
                task_cb.set_state(lock.borrow_mut(), $crate::task::TaskState::empty());
            }
        }

        #[allow(dead_code)]
        impl $Traits {
            /// Enter the CPU Lock state and run the boot-time
            /// initialization, the way a port's startup code would.
            fn init_kernel() {
                unsafe {
                    <Self as $crate::PortThreading>::enter_cpu_lock();
                    <Self as $crate::PortToKernel>::boot();
                    <Self as $crate::PortThreading>::leave_cpu_lock();
                }
            }

            fn set_interrupt_context(active: bool) {
                TEST_PORT_STATE
                    .interrupt_ctx
                    .store(active, ::std::sync::atomic::Ordering::Relaxed);
            }

            fn advance_time(ticks: $crate::UTicks) {
                TEST_PORT_STATE
                    .tick_count
                    .fetch_add(ticks, ::std::sync::atomic::Ordering::Relaxed);
            }

            /// Deliver a timer interrupt.
            fn timer_tick() {
                Self::set_interrupt_context(true);
                unsafe { <Self as $crate::PortToKernel>::timer_tick() };
                Self::set_interrupt_context(false);
            }

            fn last_pend_delta() -> $crate::UTicks {
                TEST_PORT_STATE
                    .last_pend_delta
                    .load(::std::sync::atomic::Ordering::Relaxed)
            }

            fn unblock_log() -> ::std::vec::Vec<usize> {
                TEST_PORT_STATE.unblocked.lock().unwrap().clone()
            }
        }
    };
}

pub(crate) use define_test_kernel;
