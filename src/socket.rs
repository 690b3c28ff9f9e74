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

//! Non-blocking OS socket bound to the coroutine that created it. Every
//! public method here must be called from that coroutine, on its
//! scheduler's thread: the poll handle is armed only while the
//! coroutine sits WAITING on it.
//!
//! The reuseaddr/reuseport/v6only dance on `listen`, the
//! EWOULDBLOCK/EINPROGRESS suspend loops on `accept`/`connect`, and the
//! arm-poll/suspend/disarm shape of `wait_readable`/`wait_writable` are
//! built directly on raw libc sockets plus a `mio` reactor.

use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

use mio::unix::SourceFd;
use mio::{Interest, Token};

use crate::coroutine::{Event, Handle};
use crate::scheduler::Scheduler;

/// Sentinel "invalid socket" value (platform-dependent in general; here
/// just -1, as on every unix target this crate supports).
pub const BAD_SOCKET: RawFd = -1;

pub struct Socket {
    fd: RawFd,
    token: Token,
    owner: Handle,
    scheduler: *const Scheduler,
    deadline_secs: Option<u32>,
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd != BAD_SOCKET {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Socket {
    /// Wrap a raw fd as a `Socket` owned by whichever coroutine is
    /// currently running. Used directly by `listen`/`connect` (which
    /// create their fd on the coroutine that will go on using it), and
    /// by callers adopting a fd handed to them by `accept` — typically a
    /// freshly-created connection coroutine wrapping the fd its listener
    /// just accepted, rather than the coroutine that called `accept`
    /// itself.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Socket> {
        let owner = Handle::current().expect("Socket operations require a running coroutine");
        let scheduler = owner.scheduler_ptr();
        let sched = unsafe { &*scheduler };
        let token = sched.alloc_token();
        set_nonblocking(fd)?;
        set_no_sigpipe(fd);
        Ok(Socket {
            fd,
            token,
            owner,
            scheduler,
            deadline_secs: None,
        })
    }

    fn scheduler(&self) -> &Scheduler {
        unsafe { &*self.scheduler }
    }

    /// `SetDeadline(seconds)`: copied onto the coroutine's deadline on
    /// every subsequent wait.
    pub fn set_deadline(&mut self, seconds: Option<u32>) {
        self.deadline_secs = seconds;
    }

    /// The address this socket is bound to, e.g. to discover the
    /// ephemeral port assigned by `listen(host, 0, backlog)`.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        socket_addr_of(&storage)
    }

    /// Create a listening socket, resolving `host` (a hostname or
    /// numeric address) via the compute pool so the reactor never
    /// blocks on DNS. Prefers an IPv6 result when both are available,
    /// and disables IPv6-only so dual-stack clients still connect.
    pub fn listen(host: &str, port: u16, backlog: i32) -> io::Result<Socket> {
        let target = format!("{host}:{port}");
        let me = Handle::current().expect("Socket::listen requires a running coroutine");

        me.begin_compute();
        let resolved = target.to_socket_addrs().map(|mut it| {
            let mut v4 = None;
            for addr in it.by_ref() {
                if addr.is_ipv6() {
                    return Some(addr);
                }
                if v4.is_none() {
                    v4 = Some(addr);
                }
            }
            v4
        });
        me.end_compute();

        let addr = resolved?
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;
        Self::listen_addr(addr, backlog)
    }

    /// `ListenByIp` equivalent: binds a numeric address directly,
    /// skipping the compute-pool DNS hop entirely.
    pub fn listen_ip(addr: SocketAddr, backlog: i32) -> io::Result<Socket> {
        Self::listen_addr(addr, backlog)
    }

    fn listen_addr(addr: SocketAddr, backlog: i32) -> io::Result<Socket> {
        let fd = new_socket(&addr)?;
        set_reuseaddr(fd)?;
        set_reuseport(fd);
        if addr.is_ipv6() {
            set_v6only(fd, false);
        }
        bind(fd, &addr)?;
        if unsafe { libc::listen(fd, backlog) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Socket::from_raw_fd(fd)
    }

    /// Loops internally: tries a non-blocking accept, suspending
    /// WAITING for READABLE on EWOULDBLOCK. Returns the raw accepted fd
    /// rather than a `Socket` — the accepting coroutine is not
    /// necessarily the one that will service the new connection (the
    /// usual pattern spawns a fresh coroutine per connection), so
    /// binding the fd to a `Socket` (which fixes an owning coroutine for
    /// its poll handle) is left to whichever coroutine ends up handling
    /// it, via `Socket::from_raw_fd`.
    pub fn accept(&self) -> io::Result<RawFd> {
        loop {
            let fd = unsafe { libc::accept4(self.fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK) };
            if fd >= 0 {
                set_no_sigpipe(fd);
                return Ok(fd);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                match self.wait_readable()? {
                    Event::Readable => continue,
                    Event::Timeout => return Err(io::Error::new(io::ErrorKind::TimedOut, "accept timed out")),
                    _ => return Err(io::Error::new(io::ErrorKind::Other, "accept interrupted")),
                }
            }
            return Err(err);
        }
    }

    /// Resolves `host` via the compute pool, then connects
    /// non-blockingly, suspending WAITING for WRITABLE once if the
    /// connect returns EINPROGRESS.
    pub fn connect(host: &str, port: u16) -> io::Result<Socket> {
        let target = format!("{host}:{port}");
        let me = Handle::current().expect("Socket::connect requires a running coroutine");

        me.begin_compute();
        let resolved = target.to_socket_addrs().map(|mut it| it.next());
        me.end_compute();

        let addr = resolved?
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;
        Self::connect_addr(addr)
    }

    pub fn connect_ip(addr: SocketAddr) -> io::Result<Socket> {
        Self::connect_addr(addr)
    }

    fn connect_addr(addr: SocketAddr) -> io::Result<Socket> {
        let fd = new_socket(&addr)?;
        set_nonblocking(fd)?;
        let rc = unsafe {
            let (raw, len) = sockaddr_of(&addr);
            libc::connect(fd, &raw as *const _ as *const libc::sockaddr, len)
        };
        let socket = Socket::from_raw_fd(fd)?;
        if rc == 0 {
            return Ok(socket);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock
            && err.raw_os_error() != Some(libc::EINPROGRESS)
        {
            return Err(err);
        }
        match socket.wait_writable()? {
            Event::Writable => {
                let mut errno: libc::c_int = 0;
                let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
                unsafe {
                    libc::getsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_ERROR,
                        &mut errno as *mut _ as *mut libc::c_void,
                        &mut len,
                    );
                }
                if errno != 0 {
                    return Err(io::Error::from_raw_os_error(errno));
                }
                Ok(socket)
            }
            Event::Timeout => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            _ => Err(io::Error::new(io::ErrorKind::Other, "connect interrupted")),
        }
    }

    /// At most one successful `recv`. `Ok(0)` is EOF.
    pub fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                match self.wait_readable()? {
                    Event::Readable => continue,
                    Event::Timeout => return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
                    Event::Disconnect | Event::PollErr => return Ok(0),
                    _ => return Err(io::Error::new(io::ErrorKind::Other, "read interrupted")),
                }
            }
            return Err(err);
        }
    }

    /// Loops `read_some` until `min` bytes have accumulated, or EOF/
    /// error. Returns the number of bytes actually read.
    pub fn read_at_least(&self, buf: &mut [u8], min: usize) -> io::Result<usize> {
        debug_assert!(min <= buf.len());
        let mut total = 0;
        while total < min {
            let n = self.read_some(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Loops `read_some` until `buf` is completely full, or EOF/error.
    pub fn read_exactly(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_at_least(buf, buf.len())
    }

    /// At most one successful `send`; may return fewer bytes than
    /// `buf.len()`.
    pub fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::send(
                    self.fd,
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    no_sigpipe_flag(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                match self.wait_writable()? {
                    Event::Writable => continue,
                    Event::Timeout => return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
                    _ => return Err(io::Error::new(io::ErrorKind::Other, "write interrupted")),
                }
            }
            return Err(err);
        }
    }

    /// Loops `write_some` until everything is sent or a fatal error.
    pub fn write_exactly(&self, buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.write_some(&buf[total..])?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            total += n;
        }
        Ok(total)
    }

    /// Deregisters this fd from the reactor synchronously (no suspension
    /// involved), then closes the OS descriptor. Deregistering first
    /// avoids racing the reactor's own bookkeeping for this fd.
    pub fn close(mut self) -> io::Result<()> {
        self.deregister();
        let fd = self.fd;
        self.fd = BAD_SOCKET;
        if unsafe { libc::close(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait on a condition instead of a bare timer — e.g. so several
    /// coroutines sharing a connection pool can park together.
    pub fn wait_readable_on(&self, cond: &crate::condition::Condition) -> Event {
        self.arm(Interest::READABLE);
        let event = cond.wait();
        self.disarm();
        event
    }

    pub fn wait_readable(&self) -> io::Result<Event> {
        self.arm(Interest::READABLE);
        let event = self.apply_deadline_and_suspend();
        self.disarm();
        Ok(event)
    }

    pub fn wait_writable(&self) -> io::Result<Event> {
        self.arm(Interest::WRITABLE);
        let event = self.apply_deadline_and_suspend();
        self.disarm();
        Ok(event)
    }

    fn apply_deadline_and_suspend(&self) -> Event {
        self.owner.set_deadline(self.deadline_secs);
        self.owner.suspend(crate::coroutine::State::Waiting)
    }

    fn arm(&self, interest: Interest) {
        let sched = self.scheduler();
        let mut source = SourceFd(&self.fd);
        let _ = sched
            .poll_handle()
            .registry()
            .register(&mut source, self.token, interest);
        sched.arm_io(self.token, self.owner.clone());
    }

    fn disarm(&self) {
        let sched = self.scheduler();
        let mut source = SourceFd(&self.fd);
        let _ = sched.poll_handle().registry().deregister(&mut source);
        sched.disarm_io(self.token);
    }

    fn deregister(&self) {
        if self.fd != BAD_SOCKET {
            self.disarm();
        }
    }
}

fn new_socket(addr: &SocketAddr) -> io::Result<RawFd> {
    let domain = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_reuseport(fd: RawFd) {
    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_reuseport(_fd: RawFd) {}

fn set_v6only(fd: RawFd, only: bool) {
    let flag: libc::c_int = if only { 1 } else { 0 };
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            &flag as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_no_sigpipe(fd: RawFd) {
    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn set_no_sigpipe(_fd: RawFd) {}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn no_sigpipe_flag() -> libc::c_int {
    0
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn no_sigpipe_flag() -> libc::c_int {
    libc::MSG_NOSIGNAL
}

fn bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (raw, len) = sockaddr_of(addr);
    let rc = unsafe { libc::bind(fd, &raw as *const _ as *const libc::sockaddr, len) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Converts a `SocketAddr` into a raw `sockaddr_storage` plus length,
/// suitable for `bind`/`connect`.
fn sockaddr_of(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        match addr {
            SocketAddr::V4(v4) => {
                let s = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
                s.sin_family = libc::AF_INET as libc::sa_family_t;
                s.sin_port = v4.port().to_be();
                s.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            SocketAddr::V6(v6) => {
                let s = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
                s.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                s.sin6_port = v6.port().to_be();
                s.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                s.sin6_scope_id = v6.scope_id();
                (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }
}

/// Converts a raw `sockaddr_storage` back into a `SocketAddr`, the
/// inverse of `sockaddr_of`. Used by `local_addr`.
fn socket_addr_of(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    unsafe {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let s = &*(storage as *const _ as *const libc::sockaddr_in);
                let ip = std::net::Ipv4Addr::from(u32::from_ne_bytes(s.sin_addr.s_addr.to_ne_bytes()));
                Ok(SocketAddr::new(ip.into(), u16::from_be(s.sin_port)))
            }
            libc::AF_INET6 => {
                let s = &*(storage as *const _ as *const libc::sockaddr_in6);
                let ip = std::net::Ipv6Addr::from(s.sin6_addr.s6_addr);
                Ok(SocketAddr::new(ip.into(), u16::from_be(s.sin6_port)))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported address family",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_of_v4_round_trips_port_and_octets() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (storage, len) = sockaddr_of(&addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
        let s = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
        assert_eq!(u16::from_be(s.sin_port), 8080);
    }

    #[test]
    fn socket_addr_of_inverts_sockaddr_of() {
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let (storage, _) = sockaddr_of(&addr);
        assert_eq!(socket_addr_of(&storage).unwrap(), addr);
    }
}
