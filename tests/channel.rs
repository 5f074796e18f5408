// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Integration tests exercising a named channel across threads, standing in
// for the separate-process scenarios the original implementation covers —
// the header-embedded robust mutex and condition variable behave the same
// whether the second handle lives in another thread or another process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use achannel::{CancelAttrs, Channel, ChannelError, CreateAttrs, OpenAttrs, ReceiveOptions};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{n}_{}", std::process::id())
}

#[test]
fn open_before_create_fails_not_found() {
    let name = unique_name("no_such_channel");
    let _ = achannel::unlink(&name);
    let err = Channel::open(&name, &OpenAttrs::new()).unwrap_err();
    assert!(matches!(err, ChannelError::NotFound));
}

#[test]
fn create_without_truncate_on_existing_name_fails() {
    let name = unique_name("dup_create");
    let _ = achannel::unlink(&name);
    let first = Channel::create(&name, 4, 32, &CreateAttrs::new()).unwrap();
    let second = Channel::create(&name, 4, 32, &CreateAttrs::new());
    assert!(matches!(second.unwrap_err(), ChannelError::AlreadyExists));
    first.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn reader_blocks_until_writer_publishes() {
    let name = unique_name("block_until_publish");
    let _ = achannel::unlink(&name);
    let mut writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 32];
        reader.receive(&mut buf, None, ReceiveOptions::new().with_wait(true))
            .map(|outcome| (outcome, buf))
    });

    thread::sleep(Duration::from_millis(30));
    writer.publish(b"payload").unwrap();

    let (outcome, buf) = handle.join().unwrap().unwrap();
    assert_eq!(&buf[..outcome.len], b"payload");
    assert!(!outcome.missed_frame);

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn receive_without_wait_reports_stale_frames() {
    let name = unique_name("stale_no_wait");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    let mut buf = [0u8; 32];
    let err = reader
        .receive(&mut buf, None, ReceiveOptions::new())
        .unwrap_err();
    assert!(matches!(err, ChannelError::StaleFrames));

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn deadline_elapses_with_timeout() {
    let name = unique_name("deadline_timeout");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    let deadline = SystemTime::now() + Duration::from_millis(50);
    let mut buf = [0u8; 32];
    let err = reader
        .receive(&mut buf, Some(deadline), ReceiveOptions::new().with_wait(true))
        .unwrap_err();
    assert!(matches!(err, ChannelError::Timeout));

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn falling_behind_reports_missed_frame_and_jumps_to_oldest() {
    let name = unique_name("missed_frame");
    let _ = achannel::unlink(&name);
    let mut writer = Channel::create(&name, 2, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    writer.publish(b"one").unwrap();
    writer.publish(b"two").unwrap();
    writer.publish(b"three").unwrap(); // evicts "one" out of the 2-slot ring

    let mut buf = [0u8; 32];
    let outcome = reader
        .receive(&mut buf, None, ReceiveOptions::new())
        .unwrap();
    assert!(outcome.missed_frame);
    assert_eq!(&buf[..outcome.len], b"two");

    writer.close().unwrap();
    reader.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn last_skips_straight_to_newest() {
    let name = unique_name("last_flag");
    let _ = achannel::unlink(&name);
    let mut writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    writer.publish(b"a").unwrap();
    writer.publish(b"b").unwrap();
    writer.publish(b"c").unwrap();

    let mut buf = [0u8; 32];
    let outcome = reader
        .receive(&mut buf, None, ReceiveOptions::new().with_last(true))
        .unwrap();
    assert_eq!(&buf[..outcome.len], b"c");

    writer.close().unwrap();
    reader.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn flush_catches_up_without_delivering_backlog() {
    let name = unique_name("flush_catchup");
    let _ = achannel::unlink(&name);
    let mut writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    writer.publish(b"a").unwrap();
    writer.publish(b"b").unwrap();
    reader.flush().unwrap();

    let mut buf = [0u8; 32];
    let stale = reader.receive(&mut buf, None, ReceiveOptions::new());
    assert!(matches!(stale, Err(ChannelError::StaleFrames)));

    writer.publish(b"c").unwrap();
    let outcome = reader
        .receive(&mut buf, None, ReceiveOptions::new())
        .unwrap();
    assert_eq!(&buf[..outcome.len], b"c");

    writer.close().unwrap();
    reader.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn second_handle_cancels_a_blocked_receive() {
    let name = unique_name("cross_handle_cancel");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader_a = Channel::open(&name, &OpenAttrs::new()).unwrap();
    let canceler = reader_a.canceler();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 32];
        reader_a.receive(&mut buf, None, ReceiveOptions::new().with_wait(true))
    });

    thread::sleep(Duration::from_millis(30));
    // Simulates a second handle ("B") interrupting A's blocked receive.
    canceler.cancel(&CancelAttrs::new()).unwrap();

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(ChannelError::Canceled)));

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn async_unsafe_cancel_skips_the_helper_fork() {
    let name = unique_name("cancel_async_unsafe");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 4, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();
    let canceler = reader.canceler();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 32];
        reader.receive(&mut buf, None, ReceiveOptions::new().with_wait(true))
    });

    thread::sleep(Duration::from_millis(30));
    canceler
        .cancel(&CancelAttrs::new().with_async_unsafe(true))
        .unwrap();

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(ChannelError::Canceled)));

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn high_volume_producer_consumer() {
    let name = unique_name("high_volume");
    let _ = achannel::unlink(&name);
    let mut writer = Channel::create(&name, 8, 64, &CreateAttrs::new().with_truncate(true)).unwrap();
    let mut reader = Channel::open(&name, &OpenAttrs::new()).unwrap();

    const COUNT: u64 = 2000;
    let handle = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut received = 0u64;
        let mut missed = 0u64;
        loop {
            match reader.receive(&mut buf, None, ReceiveOptions::new().with_wait(true)) {
                Ok(outcome) => {
                    received += 1;
                    if outcome.missed_frame {
                        missed += 1;
                    }
                    let text = std::str::from_utf8(&buf[..outcome.len]).unwrap();
                    if text == "done" {
                        break;
                    }
                }
                Err(ChannelError::Canceled) => break,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
        (received, missed)
    });

    for i in 0..COUNT {
        writer.publish(format!("msg-{i}").as_bytes()).unwrap();
    }
    writer.publish(b"done").unwrap();

    let (received, _missed) = handle.join().unwrap();
    assert!(received > 0);
    assert!(received <= COUNT + 1);

    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn chmod_on_named_channel_succeeds() {
    let name = unique_name("chmod_named");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 2, 16, &CreateAttrs::new().with_truncate(true)).unwrap();
    writer.chmod(0o600).unwrap();
    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn unlink_is_idempotent() {
    let name = unique_name("unlink_twice");
    let _ = achannel::unlink(&name);
    let writer = Channel::create(&name, 2, 16, &CreateAttrs::new().with_truncate(true)).unwrap();
    writer.close().unwrap();
    achannel::unlink(&name).unwrap();
    achannel::unlink(&name).unwrap();
}

#[test]
fn drop_without_close_does_not_panic() {
    let name = unique_name("drop_no_close");
    let _ = achannel::unlink(&name);
    {
        let _writer = Channel::create(&name, 2, 16, &CreateAttrs::new().with_truncate(true)).unwrap();
    }
    achannel::unlink(&name).unwrap();
}
