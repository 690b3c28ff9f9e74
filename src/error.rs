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

//! Error kinds: resource exhaustion and reactor init failures are
//! `Error`s; EWOULDBLOCK, disconnects, timeouts and cancellation are not
//! — those are encoded as `Event`s and negative/zero return codes at the
//! socket boundary instead.

use std::io;

/// Errors this crate can return from its public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Allocating a guard-paged coroutine stack failed (resource
    /// exhaustion). Carries no partial state; the coroutine was never
    /// created.
    #[error("failed to allocate a coroutine stack")]
    StackAlloc,

    /// An OS syscall at a socket boundary, or reactor registration,
    /// failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The reactor failed to initialize (e.g. the underlying poll
    /// instance could not be created). Fatal; callers are expected to
    /// log and abort rather than retry.
    #[error("reactor failed to initialize: {0}")]
    ReactorInit(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
