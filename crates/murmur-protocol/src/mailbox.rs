//! Event mailbox — the single queue the application drains.
//!
//! The runtime loop pushes events in arrival order; the application pops
//! them with a blocking, timed, or non-blocking receive. The queue is
//! unbounded and never drops an event.
//!
//! A loopback notifier socket carries one wakeup datagram per queued
//! event, so the embedding application can multiplex "this node has
//! traffic" alongside its own I/O in an external poll/select loop. The
//! descriptor is a wakeup hint, not an exact level: after it polls
//! readable, drain with `recv(0)` until it returns `None` before polling
//! again. When the loop ends, the sender side disappears and any
//! in-flight receive returns `None` promptly.

use std::net::UdpSocket;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::MurmurError;
use crate::event::Event;

/// Runtime-loop half: enqueue events.
pub struct MailboxSender {
    tx: mpsc::Sender<Event>,
    notifier: Arc<UdpSocket>,
}

impl MailboxSender {
    /// Enqueue one event. Infallible from the loop's perspective — if the
    /// application dropped its receiver the event simply goes nowhere.
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_ok() {
            // Best-effort wakeup; the receiver treats the fd as a hint.
            let _ = self.notifier.send(&[1]);
        }
    }
}

/// Application half: drain events.
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Event>,
    notifier: Arc<UdpSocket>,
}

impl MailboxReceiver {
    /// Receive the next event.
    ///
    /// `timeout_ms < 0` blocks until an event arrives or the node stops;
    /// `timeout_ms == 0` polls; `timeout_ms > 0` waits at most that long.
    /// Returns `None` on timeout or once the node has stopped and the
    /// queue is empty.
    pub fn recv(&self, timeout_ms: i64) -> Option<Event> {
        let event = if timeout_ms < 0 {
            self.rx.recv().ok()
        } else if timeout_ms == 0 {
            self.rx.try_recv().ok()
        } else {
            self.rx.recv_timeout(Duration::from_millis(timeout_ms as u64)).ok()
        };
        let mut buf = [0u8; 1];
        match event {
            Some(event) => {
                let _ = self.notifier.recv(&mut buf);
                Some(event)
            }
            None => {
                // The queue looked empty: swallow stale wakeups so the fd
                // goes quiet, then re-check for an event that raced in.
                while self.notifier.recv(&mut buf).is_ok() {}
                self.rx.try_recv().ok()
            }
        }
    }

    /// The raw notifier descriptor: readable when events are waiting.
    /// Treat it as a wakeup hint — after it polls readable, call
    /// [`recv`](Self::recv) with a zero timeout until it returns `None`,
    /// then go back to polling.
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.notifier.as_raw_fd()
    }
}

/// Create a connected mailbox pair.
pub fn mailbox() -> Result<(MailboxSender, MailboxReceiver), MurmurError> {
    let notifier = UdpSocket::bind(("127.0.0.1", 0))
        .map_err(|e| MurmurError::Runtime(format!("mailbox notifier bind: {e}")))?;
    let addr = notifier
        .local_addr()
        .map_err(|e| MurmurError::Runtime(format!("mailbox notifier addr: {e}")))?;
    notifier
        .connect(addr)
        .map_err(|e| MurmurError::Runtime(format!("mailbox notifier connect: {e}")))?;
    notifier
        .set_nonblocking(true)
        .map_err(|e| MurmurError::Runtime(format!("mailbox notifier nonblocking: {e}")))?;

    let notifier = Arc::new(notifier);
    let (tx, rx) = mpsc::channel();
    Ok((
        MailboxSender {
            tx,
            notifier: Arc::clone(&notifier),
        },
        MailboxReceiver { rx, notifier },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeUuid;

    fn exit_event(name: &str) -> Event {
        Event::Exit {
            uuid: NodeUuid::new_random(),
            name: name.into(),
        }
    }

    #[test]
    fn fifo_order() {
        let (tx, rx) = mailbox().expect("mailbox");
        tx.send(exit_event("first"));
        tx.send(exit_event("second"));
        tx.send(exit_event("third"));

        assert_eq!(rx.recv(0).map(|e| e.peer_name().to_string()), Some("first".into()));
        assert_eq!(rx.recv(0).map(|e| e.peer_name().to_string()), Some("second".into()));
        assert_eq!(rx.recv(0).map(|e| e.peer_name().to_string()), Some("third".into()));
    }

    #[test]
    fn zero_timeout_polls() {
        let (tx, rx) = mailbox().expect("mailbox");
        assert!(rx.recv(0).is_none());
        tx.send(exit_event("now"));
        assert!(rx.recv(0).is_some());
        assert!(rx.recv(0).is_none());
    }

    #[test]
    fn positive_timeout_expires() {
        let (_tx, rx) = mailbox().expect("mailbox");
        let start = std::time::Instant::now();
        assert!(rx.recv(50).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn blocking_recv_returns_none_after_sender_drops() {
        let (tx, rx) = mailbox().expect("mailbox");
        tx.send(exit_event("last"));
        drop(tx);

        // Queued event still delivered, then a clean end-of-stream.
        assert!(rx.recv(-1).is_some());
        assert!(rx.recv(-1).is_none());
    }

    #[test]
    fn blocking_recv_wakes_on_send_from_other_thread() {
        let (tx, rx) = mailbox().expect("mailbox");
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            tx.send(exit_event("late"));
        });
        assert!(rx.recv(-1).is_some());
        handle.join().expect("join");
    }

    #[cfg(unix)]
    #[test]
    fn notifier_level_tracks_queue_depth() {
        let (tx, rx) = mailbox().expect("mailbox");
        tx.send(exit_event("a"));
        tx.send(exit_event("b"));

        // Two datagrams pending; popping both drains them.
        assert!(rx.recv(0).is_some());
        assert!(rx.recv(0).is_some());
        let mut buf = [0u8; 1];
        assert!(rx.notifier.recv(&mut buf).is_err(), "notifier should be drained");
    }

    #[cfg(unix)]
    #[test]
    fn empty_recv_clears_stale_wakeups() {
        let (tx, rx) = mailbox().expect("mailbox");
        // Wakeups with no events behind them.
        tx.notifier.send(&[1]).expect("notify");
        tx.notifier.send(&[1]).expect("notify");

        assert!(rx.recv(0).is_none());
        // The fd is quiet again, so a poll loop will not spin.
        let mut buf = [0u8; 1];
        assert!(rx.notifier.recv(&mut buf).is_err(), "stale wakeups should be gone");

        // And fresh events still wake it.
        tx.send(exit_event("later"));
        assert!(rx.notifier.peek(&mut buf).is_ok(), "new event should signal the fd");
        assert_eq!(rx.recv(0).map(|e| e.peer_name().to_string()), Some("later".into()));
    }
}
