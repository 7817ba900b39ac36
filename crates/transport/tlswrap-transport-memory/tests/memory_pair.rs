//! 内存传输的时序契约：异步完成、分块交付、饱和、关闭与故障注入。

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use proptest::prelude::*;
use tlswrap_core::{CoreError, EventLoop, ReadEvent, Transport, codes};
use tlswrap_transport_memory::pair;

type Log = Rc<RefCell<Vec<String>>>;

fn recorder(log: &Log, tag: &'static str) -> Box<dyn FnMut(ReadEvent)> {
    let log = Rc::clone(log);
    Box::new(move |event| {
        let line = match event {
            ReadEvent::Data(bytes) => format!("{tag} data {}", String::from_utf8_lossy(&bytes)),
            ReadEvent::Eof => format!("{tag} eof"),
            ReadEvent::Error(err) => format!("{tag} error {}", err.code()),
        };
        log.borrow_mut().push(line);
    })
}

fn completion(log: &Log, tag: &'static str) -> Box<dyn FnOnce(tlswrap_core::Result<()>)> {
    let log = Rc::clone(log);
    Box::new(move |result| {
        let line = match result {
            Ok(()) => format!("{tag} ok"),
            Err(err) => format!("{tag} err {}", err.code()),
        };
        log.borrow_mut().push(line);
    })
}

#[test]
fn write_completes_after_peer_receives_never_synchronously() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();

    b.read_start(recorder(&log, "b")).unwrap();
    a.write(Bytes::from_static(b"hello"), completion(&log, "write"))
        .unwrap();
    assert!(log.borrow().is_empty(), "callbacks must not fire synchronously");
    assert_eq!(a.write_queue_size(), 5);

    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["write ok", "b data hello"]);
    assert_eq!(a.write_queue_size(), 0);
    assert_eq!(a.stats().writes_completed, 1);
    assert_eq!(b.stats().bytes_delivered, 5);
}

#[test]
fn delivery_chunk_splits_incoming_data() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();
    b.set_delivery_chunk(Some(2));
    b.read_start(recorder(&log, "b")).unwrap();
    a.write(Bytes::from_static(b"abcde"), Box::new(|_| {}))
        .unwrap();
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["b data ab", "b data cd", "b data e"]);
    assert_eq!(b.stats().deliveries, 3);
}

#[test]
fn saturated_endpoint_queues_until_released() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();
    b.read_start(recorder(&log, "b")).unwrap();

    a.set_saturated(true);
    a.write(Bytes::from_static(b"one"), completion(&log, "w1"))
        .unwrap();
    a.write(Bytes::from_static(b"two"), completion(&log, "w2"))
        .unwrap();
    event_loop.run_until_idle();
    assert!(log.borrow().is_empty());
    assert_eq!(a.write_queue_size(), 6);

    a.set_saturated(false);
    event_loop.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec!["w1 ok", "w2 ok", "b data one", "b data two"]
    );
}

#[test]
fn shutdown_waits_for_queued_writes_then_sends_eof() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();
    b.read_start(recorder(&log, "b")).unwrap();

    a.set_saturated(true);
    a.write(Bytes::from_static(b"last"), completion(&log, "write"))
        .unwrap();
    a.shutdown(completion(&log, "shutdown")).unwrap();
    assert!(a.is_write_closed());
    let err = a
        .write(Bytes::from_static(b"late"), Box::new(|_| {}))
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_STATE);

    event_loop.run_until_idle();
    assert!(log.borrow().is_empty());

    a.set_saturated(false);
    event_loop.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec!["write ok", "shutdown ok", "b data last", "b eof"]
    );
}

#[test]
fn close_cancels_pending_requests_and_signals_peer() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();
    b.read_start(recorder(&log, "b")).unwrap();

    a.set_saturated(true);
    a.write(Bytes::from_static(b"lost"), completion(&log, "write"))
        .unwrap();
    a.close();
    a.close();
    assert!(a.is_closed());
    assert!(log.borrow().is_empty());

    event_loop.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec![
            "b eof".to_string(),
            format!("write err {}", codes::CANCELLED)
        ]
    );
    assert!(a.read_start(recorder(&log, "a")).is_err());
}

#[test]
fn injected_failures_reach_callbacks() {
    let event_loop = EventLoop::new();
    let (mut a, mut b) = pair(&event_loop);
    let log: Log = Rc::default();
    b.read_start(recorder(&log, "b")).unwrap();

    a.fail_writes(CoreError::new(codes::TRANSPORT_WRITE, "broken pipe"));
    a.write(Bytes::from_static(b"x"), completion(&log, "write"))
        .unwrap();
    b.inject_read_error(CoreError::new(codes::TRANSPORT_READ, "reset"));
    event_loop.run_until_idle();

    let log = log.borrow();
    assert!(log.contains(&format!("write err {}", codes::TRANSPORT_WRITE)));
    assert!(log.contains(&format!("b error {}", codes::TRANSPORT_READ)));
}

#[test]
fn read_stop_inside_callback_holds_remaining_chunks() {
    let event_loop = EventLoop::new();
    let (mut a, b) = pair(&event_loop);
    let control = b.clone();
    let seen = Rc::new(RefCell::new(Vec::<Bytes>::new()));

    let mut reader = b;
    {
        let seen = Rc::clone(&seen);
        let mut stopper = reader.clone();
        reader
            .read_start(Box::new(move |event| {
                if let ReadEvent::Data(bytes) = event {
                    seen.borrow_mut().push(bytes);
                    stopper.read_stop().unwrap();
                }
            }))
            .unwrap();
    }
    control.set_delivery_chunk(Some(3));
    a.write(Bytes::from_static(b"abcdef"), Box::new(|_| {}))
        .unwrap();
    event_loop.run_until_idle();
    assert_eq!(*seen.borrow(), vec![Bytes::from_static(b"abc")]);
    assert_eq!(control.pending_inbound(), 3);
    assert!(!control.is_reading());
}

proptest! {
    /// 任意写入序列与交付块大小组合下，对端按序收到完全相同的字节流。
    #[test]
    fn byte_order_survives_any_chunking(
        writes in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..16),
        chunk in 1usize..17,
    ) {
        let event_loop = EventLoop::new();
        let (mut a, mut b) = pair(&event_loop);
        b.set_delivery_chunk(Some(chunk));
        let received = Rc::new(RefCell::new(Vec::<u8>::new()));
        {
            let received = Rc::clone(&received);
            b.read_start(Box::new(move |event| {
                if let ReadEvent::Data(bytes) = event {
                    received.borrow_mut().extend_from_slice(&bytes);
                }
            }))
            .unwrap();
        }
        for write in &writes {
            a.write(Bytes::copy_from_slice(write), Box::new(|_| {})).unwrap();
        }
        event_loop.run_until_idle();
        prop_assert_eq!(received.borrow().clone(), writes.concat());
    }
}
