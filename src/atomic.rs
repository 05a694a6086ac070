//! Atomic wrappers around fixed-width integers.
//!
//! Each wrapper exposes the same small surface: `load`, `store`, `add`,
//! `inc`, `dec`, `compare_and_swap` and `swap`. Every operation is a single
//! indivisible step. Arithmetic wraps on overflow, so decrementing an
//! unsigned zero yields its maximum value.
//!
//! Counters are owned by the component that creates them (one message id
//! counter per connection, one state word per relayed call); nothing here
//! is global.
//!
//! # Example
//!
//! ```
//! use muxwire::atomic::Uint32;
//!
//! let ids = Uint32::new(0);
//! assert_eq!(ids.inc(), 1);
//! assert_eq!(ids.inc(), 2);
//! assert!(ids.compare_and_swap(2, 10));
//! assert_eq!(ids.load(), 10);
//! ```

use std::sync::atomic::{self, Ordering};

macro_rules! atomic_int {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $atomic:ty) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name($atomic);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "`.")]
            #[inline]
            pub const fn new(value: $raw) -> Self {
                Self(<$atomic>::new(value))
            }

            /// Atomically load the wrapped value.
            #[inline]
            pub fn load(&self) -> $raw {
                self.0.load(Ordering::Acquire)
            }

            /// Atomically store `value`.
            #[inline]
            pub fn store(&self, value: $raw) {
                self.0.store(value, Ordering::Release);
            }

            /// Atomically add `n` and return the new value.
            #[inline]
            pub fn add(&self, n: $raw) -> $raw {
                self.0.fetch_add(n, Ordering::AcqRel).wrapping_add(n)
            }

            /// Atomically increment and return the new value.
            #[inline]
            pub fn inc(&self) -> $raw {
                self.add(1)
            }

            /// Atomically decrement and return the new value.
            #[inline]
            pub fn dec(&self) -> $raw {
                self.0.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
            }

            /// Store `new` if the current value is `old`.
            ///
            /// Returns whether the swap happened.
            #[inline]
            pub fn compare_and_swap(&self, old: $raw, new: $raw) -> bool {
                self.0
                    .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }

            /// Atomically replace the value, returning the previous one.
            #[inline]
            pub fn swap(&self, value: $raw) -> $raw {
                self.0.swap(value, Ordering::AcqRel)
            }
        }
    };
}

atomic_int!(
    /// Atomic `i32`.
    Int32,
    i32,
    atomic::AtomicI32
);
atomic_int!(
    /// Atomic `i64`.
    Int64,
    i64,
    atomic::AtomicI64
);
atomic_int!(
    /// Atomic `u32`.
    Uint32,
    u32,
    atomic::AtomicU32
);
atomic_int!(
    /// Atomic `u64`.
    Uint64,
    u64,
    atomic::AtomicU64
);
