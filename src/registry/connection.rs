//! Per-connection tasks: the inbound reader, the writer watcher and the
//! backlog drain waiter.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use super::WorkerId;
use crate::control::ControlFrameBuffer;
use crate::error::{RelayError, Result};
use crate::writer::{OutboundFrame, WriterHandle};

/// Event reported by a connection task to the reactor.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    Frame {
        worker_id: WorkerId,
        serial: u64,
        payload: Bytes,
    },
    /// `error` is `None` for an orderly peer close.
    Closed {
        worker_id: WorkerId,
        serial: u64,
        error: Option<RelayError>,
    },
    /// The writer queue has room again for the backlog.
    Writable { worker_id: WorkerId, serial: u64 },
}

/// Lifecycle of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Accepted,
    Active,
}

/// Registry entry for one worker.
pub(crate) struct WorkerEntry {
    pub(crate) serial: u64,
    pub(crate) state: ConnectionState,
    pub(crate) writer: WriterHandle,
    pub(crate) reader: JoinHandle<()>,
    pub(crate) writer_task: AbortHandle,
    /// Frames that did not fit the writer queue, oldest first.
    pub(crate) backlog: VecDeque<OutboundFrame>,
    /// Pending [`wait_writable`] task while the backlog is non-empty.
    pub(crate) drain: Option<AbortHandle>,
}

impl WorkerEntry {
    pub(crate) fn new(
        serial: u64,
        writer: WriterHandle,
        reader: JoinHandle<()>,
        writer_task: AbortHandle,
    ) -> Self {
        Self {
            serial,
            state: ConnectionState::Accepted,
            writer,
            reader,
            writer_task,
            backlog: VecDeque::new(),
            drain: None,
        }
    }

    /// Tear the connection down now.
    ///
    /// Both tasks are aborted, which drops both socket halves: the write
    /// direction is shut down and the socket closed. Anything still queued
    /// or backlogged is discarded.
    pub(crate) fn close(self) {
        if let Some(drain) = self.drain {
            drain.abort();
        }
        self.reader.abort();
        self.writer_task.abort();
        if !self.backlog.is_empty() {
            tracing::debug!(frames = self.backlog.len(), "discarding backlog on close");
        }
    }
}

/// Wait for writer room and tell the reactor to flush the backlog.
///
/// A closed writer is not reported here; [`watch_writer`] covers it.
pub(crate) async fn wait_writable(
    writer: WriterHandle,
    worker_id: WorkerId,
    serial: u64,
    events: mpsc::Sender<ConnEvent>,
) {
    if writer.wait_writable().await.is_ok() {
        let _ = events.send(ConnEvent::Writable { worker_id, serial }).await;
    }
}

/// Read control frames and forward them to the reactor until the link ends.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    worker_id: WorkerId,
    serial: u64,
    mut frames: ControlFrameBuffer,
    read_buffer: usize,
    events: mpsc::Sender<ConnEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer];

    let error = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(RelayError::Io(e)),
        };

        match frames.push(&buf[..n]) {
            Ok(payloads) => {
                for payload in payloads {
                    let event = ConnEvent::Frame {
                        worker_id,
                        serial,
                        payload,
                    };
                    if events.send(event).await.is_err() {
                        // Reactor is gone
                        return;
                    }
                }
            }
            Err(e) => break Some(e),
        }
    };

    let _ = events
        .send(ConnEvent::Closed {
            worker_id,
            serial,
            error,
        })
        .await;
}

/// Report a writer failure to the reactor.
pub(crate) async fn watch_writer(
    writer_task: JoinHandle<Result<()>>,
    worker_id: WorkerId,
    serial: u64,
    events: mpsc::Sender<ConnEvent>,
) {
    let error = match writer_task.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        // Aborted by the reactor during teardown
        Err(e) if e.is_cancelled() => return,
        Err(e) => RelayError::Io(std::io::Error::other(e.to_string())),
    };

    let _ = events
        .send(ConnEvent::Closed {
            worker_id,
            serial,
            error: Some(error),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::encode_control_frame;
    use crate::writer::{spawn_writer_task, WriterConfig};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_loop_forwards_frames_then_close() {
        let (mut peer, local) = duplex(1024);
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(read_loop(
            local,
            7,
            1,
            ControlFrameBuffer::new(),
            3,
            tx,
        ));

        peer.write_all(&encode_control_frame(b"first")).await.unwrap();
        peer.write_all(&encode_control_frame(b"second")).await.unwrap();
        drop(peer);

        let mut payloads = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                ConnEvent::Frame {
                    worker_id,
                    serial,
                    payload,
                } => {
                    assert_eq!((worker_id, serial), (7, 1));
                    payloads.push(payload);
                }
                ConnEvent::Closed { error, .. } => {
                    assert!(error.is_none());
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(payloads, vec![Bytes::from("first"), Bytes::from("second")]);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_loop_oversize_frame_closes_with_error() {
        let (mut peer, local) = duplex(1024);
        let (tx, mut rx) = mpsc::channel(16);

        tokio::spawn(read_loop(
            local,
            1,
            2,
            ControlFrameBuffer::with_capacity_and_max(64, 8),
            64,
            tx,
        ));

        peer.write_all(&encode_control_frame(&[0u8; 9])).await.unwrap();

        match rx.recv().await.unwrap() {
            ConnEvent::Closed { error, serial, .. } => {
                assert_eq!(serial, 2);
                assert!(matches!(error, Some(RelayError::FrameTooLarge { .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_writer_reports_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        let failing = tokio::spawn(async { Err(RelayError::ConnectionClosed) });

        watch_writer(failing, 3, 4, tx).await;

        match rx.recv().await.unwrap() {
            ConnEvent::Closed { worker_id, error, .. } => {
                assert_eq!(worker_id, 3);
                assert!(matches!(error, Some(RelayError::ConnectionClosed)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_writable_reports_room() {
        let (client, mut server) = duplex(8);
        let config = WriterConfig {
            max_pending_frames: 1,
            channel_capacity: 1,
            ..WriterConfig::default()
        };
        let (writer, _task) = spawn_writer_task(client, config);
        writer
            .try_send(OutboundFrame::new(Bytes::from_static(&[7u8; 32])).unwrap())
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(wait_writable(writer, 9, 3, tx));

        let mut sink = [0u8; 36];
        server.read_exact(&mut sink).await.unwrap();

        match rx.recv().await.unwrap() {
            ConnEvent::Writable { worker_id, serial } => assert_eq!((worker_id, serial), (9, 3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_shuts_socket_with_queue_pending() {
        let (client, mut server) = duplex(8);
        let (writer, writer_task) = spawn_writer_task(client, WriterConfig::default());
        for _ in 0..16 {
            writer
                .try_send(OutboundFrame::new(Bytes::from_static(&[1u8; 64])).unwrap())
                .unwrap();
        }
        let reader = tokio::spawn(std::future::pending::<()>());
        let entry = WorkerEntry::new(1, writer, reader, writer_task.abort_handle());

        entry.close();
        assert!(writer_task.await.unwrap_err().is_cancelled());

        // Only what fit the pipe before close arrives, then EOF.
        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.len() <= 8);
    }

    #[tokio::test]
    async fn test_watch_writer_ignores_clean_exit() {
        let (tx, mut rx) = mpsc::channel(4);
        let clean = tokio::spawn(async { Ok(()) });

        watch_writer(clean, 3, 4, tx).await;
        assert!(rx.recv().await.is_none());
    }
}
