//! 背压、关闭写方向的顺序，以及 `read_stop` 的生效时机。

mod common;

use std::{cell::RefCell, rc::Rc, sync::OnceLock};

use bytes::Bytes;
use common::{Harness, Journal, Pki, Received, SERVER_NAME, logged, read_all, recorder};
use tlswrap_core::{ReadEvent, StreamConfig, Transport, codes};
use tlswrap_stream::StreamState;

fn shared_pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| Pki::generate(SERVER_NAME).expect("generate test pki"))
}

#[test]
fn saturated_transport_stops_plaintext_pushes_without_losing_data() -> anyhow::Result<()> {
    let config = StreamConfig::default();
    let h = Harness::established(shared_pki())?;
    let inbox = read_all(&h.server.stream)?;
    let journal = Journal::default();

    h.client.wire.set_saturated(true);
    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 241) as u8).collect();
    for (index, piece) in payload.chunks(64 * 1024).enumerate() {
        h.client.stream.write(
            Bytes::copy_from_slice(piece),
            logged(&journal, format!("w{index}")),
        )?;
    }
    h.settle();

    assert!(journal.borrow().is_empty());
    let queued = h.client.wire.write_queue_size();
    assert!(queued >= config.write_high_water_mark, "queued {queued}");
    assert!(
        queued < config.write_high_water_mark + config.max_write_chunk + 1024,
        "transport queue must stay bounded, got {queued}"
    );
    let stats = h.client.stream.stats();
    assert!(stats.backpressure_stalls > 0);
    assert!(stats.plaintext_written < payload.len() as u64);
    assert!(h.client.stream.write_queue_size() >= payload.len() - config.write_high_water_mark);

    // 再跑一轮也不会增长。
    h.settle();
    assert_eq!(h.client.wire.write_queue_size(), queued);

    h.client.wire.set_saturated(false);
    h.settle();

    let expected: Vec<String> = (0..16).map(|i| format!("w{i} ok")).collect();
    assert_eq!(*journal.borrow(), expected);
    assert_eq!(inbox.borrow().data, payload);
    assert_eq!(h.client.stream.write_queue_size(), 0);
    Ok(())
}

#[test]
fn shutdown_flushes_pending_writes_before_completing() -> anyhow::Result<()> {
    let h = Harness::established(shared_pki())?;
    let inbox = read_all(&h.server.stream)?;
    let journal = Journal::default();

    h.client.wire.set_saturated(true);
    let mut sent = Vec::new();
    for index in 0..3u8 {
        let piece = vec![index; 40 * 1024];
        sent.extend_from_slice(&piece);
        h.client
            .stream
            .write(Bytes::from(piece), logged(&journal, format!("w{index}")))?;
    }
    h.client.stream.shutdown(logged(&journal, "shutdown"))?;
    assert_eq!(h.client.stream.state(), StreamState::ShuttingDown);

    let late = h
        .client
        .stream
        .write(Bytes::from_static(b"late"), Box::new(|_| {}))
        .unwrap_err();
    assert_eq!(late.code(), codes::INVALID_STATE);
    let again = h.client.stream.shutdown(Box::new(|_| {})).unwrap_err();
    assert_eq!(again.code(), codes::INVALID_STATE);

    h.settle();
    assert!(journal.borrow().is_empty());
    assert!(!inbox.borrow().eof);

    h.client.wire.set_saturated(false);
    h.settle();

    assert_eq!(
        *journal.borrow(),
        vec!["w0 ok", "w1 ok", "w2 ok", "shutdown ok"]
    );
    let inbox = inbox.borrow();
    assert_eq!(inbox.data, sent);
    assert!(inbox.eof);
    assert!(inbox.errors.is_empty());
    assert!(h.client.wire.is_write_closed());
    assert_eq!(h.server.stream.state(), StreamState::Closed);
    Ok(())
}

#[test]
fn peer_close_notify_is_answered_and_both_sides_close() -> anyhow::Result<()> {
    let h = Harness::established(shared_pki())?;
    let client_inbox = read_all(&h.client.stream)?;
    let server_inbox = read_all(&h.server.stream)?;
    let journal = Journal::default();

    h.client.stream.shutdown(logged(&journal, "client"))?;
    h.settle();

    assert_eq!(*journal.borrow(), vec!["client ok"]);
    for (side, inbox) in [(&h.client, &client_inbox), (&h.server, &server_inbox)] {
        let inbox = inbox.borrow();
        assert!(inbox.eof);
        assert!(inbox.errors.is_empty());
        assert_eq!(side.stream.state(), StreamState::Closed);
        assert_eq!(side.stream.failure().map(|err| err.code()), None);
        assert!(side.wire.is_closed());
    }
    Ok(())
}

#[test]
fn peer_close_lets_pushed_writes_land_before_closing() -> anyhow::Result<()> {
    let h = Harness::established(shared_pki())?;
    let client_inbox = read_all(&h.client.stream)?;
    let server_inbox = read_all(&h.server.stream)?;
    let journal = Journal::default();

    // 应答在对端关闭前已推送，但传输尚未送达。
    h.server.wire.set_saturated(true);
    h.server
        .stream
        .write(Bytes::from_static(b"bye"), logged(&journal, "reply"))?;
    h.client.stream.shutdown(logged(&journal, "client"))?;
    h.settle();

    assert_eq!(*journal.borrow(), vec!["client ok"]);
    assert!(server_inbox.borrow().eof);
    assert_eq!(h.server.stream.state(), StreamState::Closed);
    assert!(!h.server.wire.is_closed());
    let write = h
        .server
        .stream
        .write(Bytes::from_static(b"late"), Box::new(|_| {}))
        .unwrap_err();
    assert_eq!(write.code(), codes::TRANSPORT_CLOSED);
    let shutdown = h.server.stream.shutdown(Box::new(|_| {})).unwrap_err();
    assert_eq!(shutdown.code(), codes::TRANSPORT_CLOSED);

    h.server.wire.set_saturated(false);
    h.settle();

    assert_eq!(*journal.borrow(), vec!["client ok", "reply ok"]);
    {
        let client_inbox = client_inbox.borrow();
        assert_eq!(client_inbox.data, b"bye");
        assert!(client_inbox.eof);
        assert!(client_inbox.errors.is_empty());
    }
    assert!(server_inbox.borrow().errors.is_empty());
    assert!(h.server.wire.is_closed());
    assert_eq!(h.server.stream.failure().map(|err| err.code()), None);
    assert_eq!(h.client.stream.state(), StreamState::Closed);
    Ok(())
}

#[test]
fn read_stop_holds_remaining_plaintext_until_restarted() -> anyhow::Result<()> {
    let h = Harness::established(shared_pki())?;
    let inbox: Rc<RefCell<Received>> = Rc::default();
    {
        let inbox = Rc::clone(&inbox);
        let stopper = h.server.stream.clone();
        h.server.stream.read_start(Box::new(move |event| {
            if let ReadEvent::Data(bytes) = event {
                inbox.borrow_mut().data.extend_from_slice(&bytes);
                stopper.read_stop().expect("read_stop");
            }
        }))?;
    }
    h.client
        .stream
        .write(Bytes::from_static(b"first"), Box::new(|_| {}))?;
    h.client
        .stream
        .write(Bytes::from_static(b"second"), Box::new(|_| {}))?;
    h.settle();
    assert_eq!(inbox.borrow().data, b"first");

    h.server.stream.read_start(recorder(&inbox))?;
    h.settle();
    assert_eq!(inbox.borrow().data, b"firstsecond");
    Ok(())
}
