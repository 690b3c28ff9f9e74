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

//! End-to-end echo scenario: a listener coroutine on the
//! default scheduler accepts one connection and hands it to a fresh
//! coroutine on a worker scheduler, which echoes "hello" then "exit"
//! and closes. A plain `std::net::TcpStream` on its own OS thread plays
//! the client, since it isn't part of the runtime under test.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use coros::{Builder, PoolOptions, Scheduler, SchedulerOptions, SchedulerPool, Socket};

#[test]
fn echo_one_client_one_worker_scheduler() {
    let _ = env_logger::try_init();

    let default = Arc::new(Scheduler::new(SchedulerOptions::default()).unwrap());
    let pool = Arc::new(
        SchedulerPool::new(
            default.clone(),
            PoolOptions {
                workers: 1,
                scheduler: SchedulerOptions::default(),
            },
        )
        .unwrap(),
    );

    let (addr_tx, addr_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let pool_for_listener = pool.clone();
    Builder::new()
        .name("listener".to_string())
        .spawn(&default, move || {
            let listener = Socket::listen_ip("127.0.0.1:0".parse().unwrap(), 128).unwrap();
            addr_tx.send(listener.local_addr().unwrap()).unwrap();

            let fd = listener.accept().unwrap();
            let worker = pool_for_listener.next();
            let done = done_tx.clone();
            coros::spawn(worker, move || {
                let socket = Socket::from_raw_fd(fd).unwrap();
                let mut buf = [0u8; 256];

                let n = socket.read_exactly(&mut buf[..5]).unwrap();
                assert_eq!(n, 5);
                assert_eq!(&buf[..5], b"hello");
                assert_eq!(socket.write_exactly(&buf[..5]).unwrap(), 5);

                let n = socket.read_exactly(&mut buf[..4]).unwrap();
                assert_eq!(n, 4);
                assert_eq!(&buf[..4], b"exit");
                assert_eq!(socket.write_exactly(&buf[..4]).unwrap(), 4);

                socket.close().unwrap();
                done.send(()).unwrap();
            })
            .unwrap();
        })
        .unwrap();

    let client = thread::spawn(move || {
        let addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();

        stream.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        stream.write_all(b"exit").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"exit");
    });

    // The listener coroutine suspends in `accept` until the client
    // connects, then finishes as soon as it hands the connection off;
    // the default scheduler's own "no waiting, no outstanding" stop
    // condition fires at that point regardless of the worker.
    default.run();

    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    client.join().unwrap();

    let pool = Arc::try_unwrap(pool)
        .ok()
        .expect("no coroutine should still hold a pool reference once both sides are done");
    pool.stop();
}
