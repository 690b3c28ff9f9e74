// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Platform sizing helpers: page size and the default/minimum stack size
//! handed out when a caller doesn't pick one explicitly.
//!
//! Page size via `sysconf`, default size from `SIGSTKSZ`, minimum from
//! `MINSIGSTKSZ`. No segmented-stack runtime bookkeeping here — swapping
//! a rust-managed-stack-limit TLS slot on every context switch only
//! matters for the compiler's old segmented-stack ABI and has no
//! counterpart once stack switching goes through the `context` crate.

use std::sync::OnceLock;

/// Fallback used on platforms where `sysconf(_SC_PAGESIZE)` cannot be
/// trusted (not expected to trigger on the unix targets this crate
/// supports).
const FALLBACK_PAGE_SIZE: usize = 4096;

/// `MINSIGSTKSZ` on Linux/glibc as of this writing; used as the floor for
/// caller-supplied stack sizes when the platform doesn't expose a tighter
/// bound at compile time.
const MIN_SIGNAL_STACK_SIZE: usize = 8 * 1024;

/// `SIGSTKSZ`-equivalent default: comfortably above `MIN_SIGNAL_STACK_SIZE`
/// so ordinary coroutine bodies (a few stack frames of application logic,
/// not recursion-heavy work) don't need to pass an explicit size.
const DEFAULT_SIGNAL_STACK_SIZE: usize = 32 * 1024;

/// The OS page size, queried once and cached for the life of the process.
pub fn page_size() -> usize {
    static CACHED: OnceLock<usize> = OnceLock::new();
    *CACHED.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

/// The smallest stack this crate will hand out.
pub fn min_stack_size() -> usize {
    MIN_SIGNAL_STACK_SIZE
}

/// The default stack size for a coroutine that doesn't ask for one.
pub fn default_stack_size() -> usize {
    DEFAULT_SIGNAL_STACK_SIZE
}

/// Round `size` up to a whole number of pages.
pub fn round_up_to_page(size: usize) -> usize {
    let page = page_size();
    if size % page == 0 {
        size
    } else {
        size + page - (size % page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_nonzero_power_of_two() {
        let p = page_size();
        assert!(p > 0);
        assert_eq!(p & (p - 1), 0);
    }

    #[test]
    fn round_up_is_idempotent_and_monotonic() {
        let p = page_size();
        assert_eq!(round_up_to_page(1), p);
        assert_eq!(round_up_to_page(p), p);
        assert_eq!(round_up_to_page(p + 1), p * 2);
    }
}
