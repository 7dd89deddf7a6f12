//! Cross-process media channel tests.
//!
//! The child process is the same test binary re-invoked with an env var
//! flag. It opens the channel by name, so every byte crosses a real mapping
//! of the shared segment.

mod common;

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use common::{test_config, unique_name, video_head};
use mediaring_core::{MediaChannel, Polled, ProtocolVersion, SeekTo};
use mediaring_types::{MediaItem, Payload};

/// Env var that marks a child process invocation.
const CHILD_ENV: &str = "MEDIARING_IPC_CHILD";
/// Env var carrying the channel name to the child.
const CHANNEL_ENV: &str = "MEDIARING_IPC_CHANNEL";
/// Env var carrying the item count to the child.
const COUNT_ENV: &str = "MEDIARING_IPC_COUNT";

fn is_child() -> bool {
    std::env::var(CHILD_ENV).is_ok()
}

fn child_args() -> (String, usize) {
    let name = std::env::var(CHANNEL_ENV).expect("MEDIARING_IPC_CHANNEL not set");
    let count = std::env::var(COUNT_ENV)
        .expect("MEDIARING_IPC_COUNT not set")
        .parse()
        .expect("invalid count");
    (name, count)
}

fn spawn_child(test_name: &str, channel: &str, count: usize) -> Child {
    let exe = std::env::current_exe().expect("current_exe");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture"])
        .env(CHILD_ENV, "1")
        .env(CHANNEL_ENV, channel)
        .env(COUNT_ENV, count.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn child process")
}

fn payload(pts: i64) -> Vec<u8> {
    (0..256 + pts as usize).map(|i| (i as i64 ^ pts) as u8).collect()
}

fn item(video: &[u8], pts: i64) -> MediaItem<'_> {
    MediaItem {
        video: Payload::Borrowed(video),
        video_pts: pts,
        video_dts: pts,
        ..Default::default()
    }
}

/// Child: read until the writer closes, checking every payload.
fn child_read() {
    let (name, _) = child_args();
    let config = test_config(ProtocolVersion::Current);
    let mut rx = MediaChannel::open(&name, &config).expect("child: open failed");
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received = Vec::new();
    while Instant::now() < deadline {
        match rx.poll_read_item(Duration::from_millis(50)) {
            Ok(Polled::Ready((head, got))) => {
                assert_eq!(head, video_head(), "child: head mismatch");
                let expected = payload(got.video_pts);
                assert_eq!(
                    got.video.as_slice(),
                    Some(&expected[..]),
                    "child: corrupted item {}",
                    got.video_pts
                );
                received.push(got.video_pts);
            }
            Ok(Polled::Wait) => {}
            Ok(Polled::Closed) => break,
            Err(e) => panic!("child: read failed: {}", e),
        }
    }
    println!("SKIPPED:{}", rx.skipped_items());
    for pts in received {
        println!("PTS:{}", pts);
    }
}

fn parse_output(stdout: &str) -> (u64, Vec<i64>) {
    let mut skipped = 0;
    let mut pts = Vec::new();
    for line in stdout.lines() {
        if let Some(n) = line.strip_prefix("SKIPPED:") {
            skipped = n.parse().unwrap_or(0);
        } else if let Some(v) = line.strip_prefix("PTS:") {
            if let Ok(v) = v.parse() {
                pts.push(v);
            }
        }
    }
    (skipped, pts)
}

#[test]
fn cross_process_media_stream() {
    if is_child() {
        child_read();
        return;
    }

    let name = unique_name("xproc");
    let count = 48usize;
    let config = test_config(ProtocolVersion::Current);
    let mut tx = MediaChannel::create_or_open(&name, 64, 4096, &config).unwrap();
    let child = spawn_child("cross_process_media_stream", &name, count);

    // the reader's heartbeat shows it opened and positioned its cursor
    let deadline = Instant::now() + Duration::from_secs(10);
    while !tx.has_readers(Duration::from_millis(500)) {
        assert!(Instant::now() < deadline, "child never attached");
        std::thread::sleep(Duration::from_millis(5));
    }

    for pts in 0..count as i64 {
        let video = payload(pts);
        tx.send_item(&video_head(), &item(&video, pts)).unwrap();
    }
    tx.destroy().unwrap();

    let output = child.wait_with_output().expect("child wait failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "child failed:\nstdout: {}\nstderr: {}",
        stdout,
        stderr
    );
    let (skipped, pts) = parse_output(&stdout);
    assert_eq!(skipped, 0);
    assert_eq!(pts, (0..count as i64).collect::<Vec<_>>());
}

/// Child: write a stream and exit without closing the channel.
fn child_write_and_vanish() {
    let (name, count) = child_args();
    let config = test_config(ProtocolVersion::Legacy);
    let mut tx = MediaChannel::create_or_open(&name, 8, 4096, &config).expect("child: create");
    for pts in 0..count as i64 {
        let video = payload(pts);
        tx.send_item(&video_head(), &item(&video, pts))
            .expect("child: send");
    }
    println!("SENT:{}", count);
    // no destructor runs, like a crashed writer
    std::process::exit(0);
}

#[cfg(unix)]
#[test]
fn segment_outlives_a_vanished_writer() {
    if is_child() {
        child_write_and_vanish();
        return;
    }

    let name = unique_name("vanish");
    let child = spawn_child("segment_outlives_a_vanished_writer", &name, 5);
    let output = child.wait_with_output().expect("child wait failed");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("SENT:5"));

    let config = test_config(ProtocolVersion::Current);
    let mut rx = MediaChannel::open(&name, &config).unwrap();
    assert_eq!(rx.version(), ProtocolVersion::Legacy);
    assert!(!rx.check_close_flag());
    rx.seek_read_index(SeekTo::Oldest).unwrap();
    let mut pts = Vec::new();
    while let Polled::Ready((_, got)) = rx.poll_read_item(Duration::ZERO).unwrap() {
        assert_eq!(got.video.as_slice(), Some(&payload(got.video_pts)[..]));
        pts.push(got.video_pts);
    }
    assert_eq!(pts, vec![0, 1, 2, 3, 4]);
    drop(rx);

    assert!(MediaChannel::remove_from_system(&name).unwrap());
}
