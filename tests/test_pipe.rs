// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Byte channels: exact transfers, early end of stream, FIFOs and
// cancellable reads.

use std::thread;
use std::time::{Duration, Instant};

use libsync::pipe::{pipe, read_value, read_values, write_value, write_values};
use libsync::worker::spawn;
use libsync::{ByteSink, ByteSource, Fifo, Payload, SyncError};

#[test]
fn exact_transfer_across_threads() {
    let (mut rx, mut tx) = pipe().expect("pipe");
    let data: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
    let expected = data.clone();

    // Larger than the pipe buffer, so the writer blocks in partial writes.
    let writer = thread::spawn(move || tx.write_exact(&data));
    let mut got = vec![0u8; expected.len()];
    rx.read_exact(&mut got).expect("read_exact");
    writer.join().unwrap().expect("write_exact");
    assert_eq!(got, expected);
}

#[test]
fn early_eof_reports_closed() {
    let (mut rx, mut tx) = pipe().expect("pipe");
    tx.write_exact(&[1, 2, 3]).expect("write");
    drop(tx);

    let mut buf = [0u8; 8];
    match rx.read_exact(&mut buf) {
        Err(SyncError::Closed {
            transferred,
            requested,
        }) => {
            assert_eq!(transferred, 3);
            assert_eq!(requested, 8);
        }
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[test]
fn write_without_reader_reports_closed() {
    let (rx, mut tx) = pipe().expect("pipe");
    drop(rx);
    assert!(matches!(
        tx.write_exact(b"hello"),
        Err(SyncError::Closed { transferred: 0, requested: 5 })
    ));
}

#[test]
fn count_prefixed_integers() {
    let (mut rx, mut tx) = pipe().expect("pipe");
    let values = vec![10i32, -20, 30, i32::MAX, i32::MIN];
    let v = values.clone();
    let writer = thread::spawn(move || write_values(&mut tx, &v));
    let got: Vec<i32> = read_values(&mut rx).expect("read_values");
    writer.join().unwrap().expect("write_values");
    assert_eq!(got, values);
}

#[test]
fn fifo_between_threads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("numbers");
    let fifo = Fifo::create(&path, 0o600).expect("mkfifo");
    // Creating over an existing FIFO is accepted.
    Fifo::create(&path, 0o600).expect("mkfifo again");

    let f = fifo.clone();
    let writer = thread::spawn(move || -> libsync::Result<()> {
        let mut tx = f.open_writer()?;
        write_value(&mut tx, 0x1234_5678u32)?;
        write_value(&mut tx, -1i64)
    });

    let mut rx = fifo.open_reader().expect("open reader");
    assert_eq!(read_value::<u32>(&mut rx).expect("u32"), 0x1234_5678);
    assert_eq!(read_value::<i64>(&mut rx).expect("i64"), -1);
    writer.join().unwrap().expect("writer");

    fifo.remove().expect("remove");
    assert!(!path.exists());
}

#[test]
fn cancellable_read_terminates_as_cancelled() {
    let (rx, tx) = pipe().expect("pipe");
    let mut h = spawn(Payload::Consumes(rx), |ctx, rx| {
        let mut buf = [0u8; 4];
        rx.read_exact_cancellable(ctx, &mut buf)?;
        Ok(buf)
    })
    .expect("spawn");

    thread::sleep(Duration::from_millis(30));
    let start = Instant::now();
    h.request_cancel();
    let joined = h.join().expect("join");
    assert!(joined.outcome.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(1));
    drop(tx);
}

#[test]
fn cancellable_read_completes_with_data() {
    let (rx, mut tx) = pipe().expect("pipe");
    let mut h = spawn(Payload::Consumes(rx), |ctx, rx| {
        let mut buf = [0u8; 4];
        rx.read_exact_cancellable(ctx, &mut buf)?;
        Ok(buf)
    })
    .expect("spawn");

    tx.write_exact(&[1, 2]).expect("write");
    thread::sleep(Duration::from_millis(20));
    tx.write_exact(&[3, 4]).expect("write");
    let joined = h.join().expect("join");
    assert_eq!(joined.outcome.into_value(), Some([1, 2, 3, 4]));
}
