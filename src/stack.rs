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

//! Stack allocator.
//!
//! A coroutine's stack is a guard-paged region: one inaccessible page at
//! the low end so a stack overflow faults instead of silently corrupting
//! whatever memory happens to sit below it. `context::stack::ProtectedFixedSizeStack`
//! already does exactly this (mmap + `mprotect(PROT_NONE)` on the guard
//! page), so this module is a thin wrapper that resolves a requested
//! size against the platform minimum and page-rounds it, turning
//! allocation failure into `Error::StackAlloc` rather than a panic.

use context::stack::{ProtectedFixedSizeStack, Stack as ContextStack};

use crate::error::{Error, Result};
use crate::sys;

/// A coroutine's execution stack: a guard-paged region big enough for
/// `size` bytes of usable stack, rounded up to whole pages.
pub struct Stack {
    inner: ProtectedFixedSizeStack,
}

impl Stack {
    /// Allocate a stack of at least `requested` bytes (clamped to the
    /// platform minimum, then rounded up to whole pages by the guard-page
    /// allocator underneath).
    pub fn allocate(requested: usize) -> Result<Stack> {
        let size = sys::round_up_to_page(requested.max(sys::min_stack_size()));
        ProtectedFixedSizeStack::new(size)
            .map(|inner| Stack { inner })
            .map_err(|_| Error::StackAlloc)
    }

    /// Total size of the allocated region in bytes, including the guard
    /// page.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn context_stack(&self) -> &ContextStack {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_at_least_the_platform_minimum() {
        let stack = Stack::allocate(1).expect("stack allocation should succeed");
        assert!(stack.len() >= sys::min_stack_size());
    }

    #[test]
    fn rounds_requested_size_up_to_pages() {
        let stack = Stack::allocate(sys::default_stack_size() + 1).expect("alloc");
        assert_eq!(stack.len() % sys::page_size(), 0);
    }
}
