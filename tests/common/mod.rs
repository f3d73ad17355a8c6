//! Shared helpers for the integration tests: an in-memory archive target
//! that records every call and can be scripted to misbehave.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use glacier_pipe::cloud::{ArchiveTarget, PartBody, PartRange};
use glacier_pipe::pipe::{PipeEvent, PipeObserver};
use glacier_pipe::utils::tree_hash::{to_hex, TreeHash};

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin {
        vault: String,
        description: String,
        part_size: u64,
    },
    Part {
        upload_id: String,
        range: PartRange,
        tree_hash: String,
        body: Vec<u8>,
    },
    Complete {
        upload_id: String,
        archive_size: u64,
        tree_hash: String,
    },
}

#[derive(Default)]
struct Script {
    /// Remaining transport failures, keyed by range start
    failures: HashMap<u64, u32>,
    /// Remaining corrupted echoes, keyed by range start
    corruptions: HashMap<u64, u32>,
    always_fail: Option<u64>,
    fail_begin: bool,
    fail_complete: bool,
    cancel_on_part: Option<CancellationToken>,
}

/// In-memory [`ArchiveTarget`].
///
/// Every part body is read twice, once unpaced the way a transport computes
/// its own checksum and once paced, and both passes must agree.
#[derive(Default)]
pub struct FakeTarget {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
}

pub const UPLOAD_ID: &str = "upload-0001";
pub const LOCATION: &str = "/-/vaults/test/archives/archive-0001";

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the part starting at `start` with a transport error `times` times.
    pub fn fail_part(self, start: u64, times: u32) -> Self {
        self.script.lock().unwrap().failures.insert(start, times);
        self
    }

    /// Echo a wrong tree hash for the part starting at `start` `times` times.
    pub fn corrupt_part(self, start: u64, times: u32) -> Self {
        self.script.lock().unwrap().corruptions.insert(start, times);
        self
    }

    pub fn always_fail_part(self, start: u64) -> Self {
        self.script.lock().unwrap().always_fail = Some(start);
        self
    }

    pub fn fail_begin(self) -> Self {
        self.script.lock().unwrap().fail_begin = true;
        self
    }

    pub fn fail_complete(self) -> Self {
        self.script.lock().unwrap().fail_complete = true;
        self
    }

    /// Cancel `token` (and fail) on the first part upload.
    pub fn cancel_on_part(self, token: CancellationToken) -> Self {
        self.script.lock().unwrap().cancel_on_part = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn part_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Part { .. }))
            .collect()
    }

    pub fn complete_call(&self) -> Option<Call> {
        self.calls()
            .into_iter()
            .find(|c| matches!(c, Call::Complete { .. }))
    }
}

#[async_trait]
impl ArchiveTarget for FakeTarget {
    async fn begin_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Begin {
            vault: vault.to_string(),
            description: description.to_string(),
            part_size,
        });

        if self.script.lock().unwrap().fail_begin {
            return Err(anyhow!("vault not found"));
        }
        Ok(UPLOAD_ID.to_string())
    }

    async fn upload_part(
        &self,
        _vault: &str,
        upload_id: &str,
        range: PartRange,
        tree_hash: &str,
        body: PartBody<'_>,
    ) -> Result<String> {
        let mut pre_read = Vec::new();
        body.open_unpaced()?.read_to_end(&mut pre_read).await?;
        let sent = body.read_paced().await?;
        assert_eq!(pre_read, sent, "body passes disagree");
        assert_eq!(sent.len() as u64, range.size(), "body length does not match range");

        self.calls.lock().unwrap().push(Call::Part {
            upload_id: upload_id.to_string(),
            range,
            tree_hash: tree_hash.to_string(),
            body: sent.clone(),
        });

        let mut script = self.script.lock().unwrap();
        if let Some(token) = script.cancel_on_part.take() {
            token.cancel();
            return Err(anyhow!("connection aborted"));
        }
        if script.always_fail == Some(range.start) {
            return Err(anyhow!("connection reset by peer"));
        }
        if let Some(remaining) = script.failures.get_mut(&range.start) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("connection reset by peer"));
            }
        }
        if let Some(remaining) = script.corruptions.get_mut(&range.start) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok("0".repeat(64));
            }
        }

        // The service answers in upper case; comparison must not care.
        Ok(to_hex(&TreeHash::digest(&sent)).to_uppercase())
    }

    async fn complete_multipart_upload(
        &self,
        _vault: &str,
        upload_id: &str,
        archive_size: u64,
        tree_hash: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Complete {
            upload_id: upload_id.to_string(),
            archive_size,
            tree_hash: tree_hash.to_string(),
        });

        if self.script.lock().unwrap().fail_complete {
            return Err(anyhow!("tree hash does not match"));
        }
        Ok(LOCATION.to_string())
    }
}

/// Observer handle plus the receiving end of its events.
pub fn event_channel() -> (Arc<dyn PipeObserver>, UnboundedReceiver<PipeEvent>) {
    let (tx, rx) = unbounded_channel();
    (Arc::new(tx), rx)
}

/// Everything received so far.
pub fn drain(rx: &mut UnboundedReceiver<PipeEvent>) -> Vec<PipeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Deterministic pseudo-random bytes (xorshift64).
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}
