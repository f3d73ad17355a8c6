//! Integration tests for the upload orchestrator.
//!
//! These tests drive complete upload sessions against an in-memory target,
//! with Tokio's clock paused so retry backoff does not slow them down.

mod common;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{drain, event_channel, pseudo_random_bytes, Call, FakeTarget, LOCATION, UPLOAD_ID};
use glacier_pipe::cloud::PartRange;
use glacier_pipe::constants::MIB;
use glacier_pipe::pipe::{GlacierPipe, NoopObserver, PipeEvent, PipeOptions, RetryPolicy};
use glacier_pipe::qos::FixedRate;
use glacier_pipe::utils::tree_hash::{to_hex, TreeHash};
use glacier_pipe::PipeError;

fn options(part_size: u64, max_retries: u32) -> PipeOptions {
    PipeOptions {
        part_size,
        retry: RetryPolicy::new(max_retries),
        ..Default::default()
    }
}

fn count(events: &[PipeEvent], predicate: impl Fn(&PipeEvent) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}

/// Test a 2.5MB stream in 1MB parts
#[tokio::test(start_paused = true)]
async fn test_end_to_end_three_parts() {
    let data = pseudo_random_bytes(2 * MIB as usize + MIB as usize / 2, 42);
    let target = Arc::new(FakeTarget::new());
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 10), observer).unwrap();
    let receipt = pipe.upload(&data[..], "test", "three parts").await.unwrap();

    let calls = target.calls();
    assert_eq!(
        calls[0],
        Call::Begin {
            vault: "test".to_string(),
            description: "three parts".to_string(),
            part_size: MIB,
        }
    );

    let parts = target.part_calls();
    assert_eq!(parts.len(), 3);

    let expected_ranges = [
        PartRange { start: 0, end: MIB - 1 },
        PartRange { start: MIB, end: 2 * MIB - 1 },
        PartRange { start: 2 * MIB, end: 2 * MIB + MIB / 2 - 1 },
    ];
    let mut hashes = Vec::new();
    for (call, expected) in parts.iter().zip(expected_ranges) {
        let Call::Part { upload_id, range, tree_hash, body } = call else {
            unreachable!();
        };
        assert_eq!(upload_id, UPLOAD_ID);
        assert_eq!(*range, expected);
        assert_eq!(body[..], data[range.start as usize..=range.end as usize]);
        assert_eq!(*tree_hash, to_hex(&TreeHash::digest(body)));
        hashes.push(tree_hash.clone());
    }
    hashes.dedup();
    assert_eq!(hashes.len(), 3);

    let archive_hash = to_hex(&TreeHash::digest(&data));
    assert_eq!(
        target.complete_call(),
        Some(Call::Complete {
            upload_id: UPLOAD_ID.to_string(),
            archive_size: 2_621_440,
            tree_hash: archive_hash.clone(),
        })
    );

    assert_eq!(receipt.location, LOCATION);
    assert_eq!(receipt.size, 2_621_440);
    assert_eq!(receipt.parts, 3);
    assert_eq!(receipt.tree_hash, archive_hash);

    let events = drain(&mut rx);
    assert_eq!(events[0], PipeEvent::SessionStarted { upload_id: UPLOAD_ID.to_string() });
    assert_eq!(
        events.last(),
        Some(&PipeEvent::SessionDone {
            tree_hash: archive_hash,
            location: LOCATION.to_string(),
        })
    );
    assert_eq!(count(&events, |e| matches!(e, PipeEvent::PartHashed { .. })), 3);
    assert_eq!(count(&events, |e| matches!(e, PipeEvent::UploadFailed { .. })), 0);
}

/// Test that the buffered and uploaded byte counts reported to the observer add up
#[tokio::test(start_paused = true)]
async fn test_progress_events_account_for_every_byte() {
    let data = pseudo_random_bytes(3 * MIB as usize / 2, 7);
    let target = Arc::new(FakeTarget::new());
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target, options(MIB, 10), observer).unwrap();
    pipe.upload(&data[..], "test", "progress").await.unwrap();

    let events = drain(&mut rx);
    let buffered: u64 = events
        .iter()
        .filter_map(|e| match e {
            PipeEvent::BufferingProgress { bytes, .. } => Some(*bytes),
            _ => None,
        })
        .sum();
    let uploaded: u64 = events
        .iter()
        .filter_map(|e| match e {
            PipeEvent::UploadProgress { bytes, .. } => Some(*bytes),
            _ => None,
        })
        .sum();

    assert_eq!(buffered, data.len() as u64);
    assert_eq!(uploaded, data.len() as u64);
    assert!(events.contains(&PipeEvent::BufferingEnded { part: 0, bytes: MIB }));
    assert!(events.contains(&PipeEvent::BufferingEnded { part: 1, bytes: MIB / 2 }));
}

/// Test that a source ending exactly on a part boundary produces no empty part
#[tokio::test(start_paused = true)]
async fn test_exact_multiple_uploads_no_empty_part() {
    let data = pseudo_random_bytes(2 * MIB as usize, 3);
    let target = Arc::new(FakeTarget::new());
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 10), observer).unwrap();
    let receipt = pipe.upload(&data[..], "test", "exact").await.unwrap();

    assert_eq!(target.part_calls().len(), 2);
    assert_eq!(receipt.size, 2 * MIB);

    let events = drain(&mut rx);
    assert!(events.contains(&PipeEvent::BufferingEnded { part: 2, bytes: 0 }));
    assert!(!events.contains(&PipeEvent::PartHashed {
        part: 2,
        tree_hash: to_hex(&TreeHash::digest(b"")),
    }));
}

/// Test that an empty source completes an empty archive
#[tokio::test(start_paused = true)]
async fn test_empty_source() {
    let target = Arc::new(FakeTarget::new());
    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 10), Arc::new(NoopObserver)).unwrap();

    let receipt = pipe.upload(&b""[..], "test", "empty").await.unwrap();

    assert!(target.part_calls().is_empty());
    assert_eq!(receipt.parts, 0);
    assert_eq!(
        receipt.tree_hash,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

/// Test that K transient failures produce exactly K retries before success
#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let data = pseudo_random_bytes(2 * MIB as usize, 11);
    let target = Arc::new(FakeTarget::new().fail_part(MIB, 3));
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 5), observer).unwrap();
    pipe.upload(&data[..], "test", "flaky").await.unwrap();

    let parts = target.part_calls();
    assert_eq!(parts.len(), 5);

    let events = drain(&mut rx);
    let failures: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipeEvent::UploadFailed { part, attempt, will_retry, .. } => Some((*part, *attempt, *will_retry)),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![(1, 1, true), (1, 2, true), (1, 3, true)]);

    let backoffs: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipeEvent::BackoffSleeping { duration } => Some(*duration),
            _ => None,
        })
        .collect();
    assert_eq!(
        backoffs,
        vec![
            Duration::from_millis(1500),
            Duration::from_millis(2250),
            Duration::from_micros(3_375_000),
        ]
    );

    // The accepted attempt carried the hash of exactly the buffered bytes
    let Call::Part { tree_hash, body, .. } = parts.last().unwrap() else {
        unreachable!();
    };
    assert_eq!(*tree_hash, to_hex(&TreeHash::digest(&data[MIB as usize..])));
    assert_eq!(body[..], data[MIB as usize..]);
}

/// Test that a tree hash mismatch is treated as a retryable failure
#[tokio::test(start_paused = true)]
async fn test_hash_mismatch_is_retried() {
    let data = pseudo_random_bytes(MIB as usize / 4, 5);
    let target = Arc::new(FakeTarget::new().corrupt_part(0, 1));
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 3), observer).unwrap();
    pipe.upload(&data[..], "test", "corrupt").await.unwrap();

    assert_eq!(target.part_calls().len(), 2);

    let events = drain(&mut rx);
    let mismatch = events.iter().find_map(|e| match e {
        PipeEvent::UploadFailed { error, .. } => Some(error.clone()),
        _ => None,
    });
    assert!(mismatch.unwrap().contains("tree hash mismatch"));
    assert_eq!(count(&events, |e| matches!(e, PipeEvent::BackoffSleeping { .. })), 1);
}

/// Test that a part failing every attempt ends the session after max_retries attempts
#[tokio::test(start_paused = true)]
async fn test_always_failing_part_is_fatal() {
    let data = pseudo_random_bytes(MIB as usize, 9);
    let target = Arc::new(FakeTarget::new().always_fail_part(0));
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 4), observer).unwrap();
    let err = pipe.upload(&data[..], "test", "doomed").await.unwrap_err();

    match &err {
        PipeError::RetriesExhausted { part, attempts, .. } => {
            assert_eq!(*part, 0);
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(target.part_calls().len(), 4);
    assert_eq!(target.complete_call(), None);

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, PipeEvent::BackoffSleeping { .. })), 3);
    assert!(events.contains(&PipeEvent::UploadFailed {
        part: 0,
        error: "connection reset by peer".to_string(),
        attempt: 4,
        will_retry: false,
    }));
    assert!(matches!(events.last(), Some(PipeEvent::SessionFatal { .. })));
}

/// Test that failing to initiate the upload is fatal and sends nothing
#[tokio::test(start_paused = true)]
async fn test_begin_failure_is_fatal() {
    let target = Arc::new(FakeTarget::new().fail_begin());
    let (observer, mut rx) = event_channel();

    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 4), observer).unwrap();
    let err = pipe.upload(&[1u8; 100][..], "test", "x").await.unwrap_err();

    assert!(matches!(err, PipeError::BeginSession(_)));
    assert!(target.part_calls().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![PipeEvent::SessionFatal {
            error: "failed to initiate multipart upload: vault not found".to_string()
        }]
    );
}

/// Test that failing to complete the upload is fatal
#[tokio::test(start_paused = true)]
async fn test_complete_failure_is_fatal() {
    let target = Arc::new(FakeTarget::new().fail_complete());
    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 4), Arc::new(NoopObserver)).unwrap();

    let err = pipe.upload(&[1u8; 100][..], "test", "x").await.unwrap_err();
    assert!(matches!(err, PipeError::CompleteSession(_)));
    assert_eq!(target.part_calls().len(), 1);
}

/// Test that a failing source is fatal and reported as an I/O error
#[tokio::test(start_paused = true)]
async fn test_source_failure_is_fatal() {
    let source = tokio_test::io::Builder::new()
        .read(&[7u8; 100])
        .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "producer died"))
        .build();

    let target = Arc::new(FakeTarget::new());
    let mut pipe = GlacierPipe::new(target.clone(), options(MIB, 4), Arc::new(NoopObserver)).unwrap();

    let err = pipe.upload(source, "test", "x").await.unwrap_err();
    assert!(matches!(err, PipeError::Source(_)));
    assert!(err.is_io());
    assert!(target.part_calls().is_empty());
    assert_eq!(target.complete_call(), None);
}

/// Test that cancellation interrupts the backoff sleep
#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let cancel = CancellationToken::new();
    let target = Arc::new(FakeTarget::new().cancel_on_part(cancel.clone()));
    let (observer, mut rx) = event_channel();

    let options = PipeOptions {
        part_size: MIB,
        retry: RetryPolicy::new(10),
        rate: None,
        cancel,
    };
    let mut pipe = GlacierPipe::new(target.clone(), options, observer).unwrap();
    let err = pipe.upload(&[1u8; 100][..], "test", "x").await.unwrap_err();

    assert!(matches!(err, PipeError::Interrupted));
    assert_eq!(target.part_calls().len(), 1);

    let events = drain(&mut rx);
    let tail: Vec<_> = events.iter().rev().take(2).collect();
    assert!(matches!(tail[0], PipeEvent::SessionFatal { .. }));
    assert!(matches!(tail[1], PipeEvent::BackoffSleeping { .. }));
}

/// Test that the upload pass is paced to the configured rate
#[tokio::test(start_paused = true)]
async fn test_throttled_upload_takes_expected_time() {
    let data = pseudo_random_bytes(200 * 1024, 13);
    let target = Arc::new(FakeTarget::new());

    let options = PipeOptions {
        part_size: MIB,
        retry: RetryPolicy::new(3),
        rate: Some(Arc::new(FixedRate(100.0 * 1024.0))),
        ..Default::default()
    };
    let mut pipe = GlacierPipe::new(target.clone(), options, Arc::new(NoopObserver)).unwrap();

    let started = tokio::time::Instant::now();
    pipe.upload(&data[..], "test", "slow").await.unwrap();
    let elapsed = started.elapsed();

    // one quantum of slack: the first quantum's budget is spent immediately
    assert!(elapsed >= Duration::from_millis(1950), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

/// Test that invalid settings are rejected before any remote call
#[test]
fn test_rejects_invalid_options() {
    let target = Arc::new(FakeTarget::new());

    for part_size in [0, MIB / 2, 3 * MIB, 8 * 1024 * MIB] {
        let result = GlacierPipe::new(target.clone(), options(part_size, 3), Arc::new(NoopObserver));
        assert!(matches!(result, Err(PipeError::Config(_))), "part size {}", part_size);
    }

    let result = GlacierPipe::new(target.clone(), options(MIB, 0), Arc::new(NoopObserver));
    assert!(matches!(result, Err(PipeError::Config(_))));
    assert!(target.calls().is_empty());
}
