//! Integration tests for the transcode pipeline and the maintenance queue.
//!
//! Drives `rc-av` through the same entry points the CLI uses, with fake
//! encoders standing in for ffmpeg.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use rc_av::{Codec, ToolRegistry, TranscodeRequest, TranscodeSettings, Transcoder};
use rc_core::{Error, FolderId, ItemId, MediaItem, SessionId, UserId};
use rc_sched::{DelayedOperationQueue, OperationState};
use reelcast::maintenance::{MemoryAccountStore, PurgeJob, SessionRecord, UserAccount};
use reelcast::transcode::{self, TranscodeOptions};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn transcoder_for(
    dir: &std::path::Path,
    tools: ToolRegistry,
    settings: TranscodeSettings,
) -> (Transcoder, FolderId) {
    let folder_id = FolderId::new();
    let mut folders = HashMap::new();
    folders.insert(folder_id, dir.to_path_buf());
    (Transcoder::new(tools, settings, Arc::new(folders)), folder_id)
}

#[cfg(unix)]
#[tokio::test]
async fn test_stream_encoder_output() {
    let dir = tempdir().unwrap();
    let ffmpeg = common::fake_encoder(dir.path(), 0);
    common::write_media(dir.path(), "episode.mkv", b"mkv");

    let tools = ToolRegistry::empty().with_tool("ffmpeg", &ffmpeg);
    let (transcoder, folder_id) = transcoder_for(dir.path(), tools, TranscodeSettings::default());

    let item = MediaItem::new(ItemId::new(), folder_id, "episode.mkv").with_dimensions(1920, 1080);
    let request = TranscodeRequest::new(item, Codec::Vp8)
        .quality(1)
        .height(Some(480));
    let plan = transcoder.plan(&request).unwrap();

    let output = transcoder.stream(&plan, &CancellationToken::new());
    assert_eq!(output.mime_type, "video/webm");
    assert_eq!(output.extension, Some("webm"));

    let chunks: Vec<_> = output.stream.collect().await;
    let mut bytes = Vec::new();
    for chunk in chunks {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    let text = String::from_utf8(bytes).unwrap();
    let args: Vec<&str> = text.lines().collect();

    assert!(args.contains(&"libvpx"));
    assert!(args.contains(&"854x480"));
    assert_eq!(args.last(), Some(&"pipe:1"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_stops_hanging_encoder() {
    let dir = tempdir().unwrap();
    let ffmpeg = common::hanging_encoder(dir.path());
    common::write_media(dir.path(), "episode.mkv", b"mkv");

    let tools = ToolRegistry::empty().with_tool("ffmpeg", &ffmpeg);
    let (transcoder, folder_id) = transcoder_for(dir.path(), tools, TranscodeSettings::default());

    let item = MediaItem::new(ItemId::new(), folder_id, "episode.mkv");
    let plan = transcoder
        .plan(&TranscodeRequest::new(item, Codec::Mp3))
        .unwrap();

    let cancel = CancellationToken::new();
    let mut stream = transcoder.stream(&plan, &cancel).stream;

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"started\n");

    let started = Instant::now();
    cancel.cancel();

    let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(10), stream.collect())
        .await
        .expect("stream did not end after cancellation");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_matches!(rest.last(), Some(Err(Error::Cancelled(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_deadline_cancels_encode() {
    let dir = tempdir().unwrap();
    let ffmpeg = common::hanging_encoder(dir.path());
    common::write_media(dir.path(), "track.flac", b"flac");

    let settings = TranscodeSettings {
        max_duration: Duration::from_millis(200),
        ..TranscodeSettings::default()
    };
    let tools = ToolRegistry::empty().with_tool("ffmpeg", &ffmpeg);
    let (transcoder, folder_id) = transcoder_for(dir.path(), tools, settings);

    let item = MediaItem::new(ItemId::new(), folder_id, "track.flac");
    let plan = transcoder
        .plan(&TranscodeRequest::new(item, Codec::Opus))
        .unwrap();

    let mut out = Vec::new();
    let mut sink = rc_av::WriterSink::new(&mut out);
    let err = transcoder
        .execute(&plan, &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, Error::Cancelled(ref reason) if reason.contains("maximum encode time"));
    assert_eq!(out, b"started\n");
}

#[tokio::test]
async fn test_prepare_and_run_direct() {
    let dir = tempdir().unwrap();
    let input = common::write_media(dir.path(), "clip.mp4", &[7u8; 200_000]);

    let mut options = TranscodeOptions::new(&input);
    options.direct = true;
    options.offset_secs = 10;

    let prepared = transcode::prepare(&options, &Default::default()).await.unwrap();
    let plan = prepared.plan().unwrap();
    assert_eq!(plan.mime_type(), "video/mp4");

    let mut out = Vec::new();
    let n = transcode::run_to_writer(&prepared, &plan, &mut out, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(n, 200_000);
    assert!(out.iter().all(|&b| b == 7));
}

#[test]
fn test_purge_job_on_queue() {
    let store = Arc::new(MemoryAccountStore::new());
    let now = Utc::now();

    let expired = UserId::new();
    let active = UserId::new();
    store.add_user(UserAccount {
        id: expired,
        name: "guest".into(),
        expires_at: Some(now - TimeDelta::days(1)),
    });
    store.add_user(UserAccount {
        id: active,
        name: "owner".into(),
        expires_at: None,
    });

    let stale = SessionId::new();
    let fresh = SessionId::new();
    store.add_session(SessionRecord {
        id: stale,
        user_id: active,
        updated_at: now - TimeDelta::hours(2),
    });
    store.add_session(SessionRecord {
        id: fresh,
        user_id: active,
        updated_at: now + TimeDelta::hours(1),
    });

    let queue = DelayedOperationQueue::start("purge-test").unwrap();
    let job = Arc::new(PurgeJob::new(store.clone(), Duration::from_secs(30 * 60)));
    let first = job.schedule(&queue.handle(), Duration::from_millis(20));

    let deadline = Instant::now() + Duration::from_secs(5);
    while (store.has_user(expired) || store.has_session(stale)) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(!store.has_user(expired));
    assert!(store.has_user(active));
    assert!(!store.has_session(stale));
    assert!(store.has_session(fresh));

    let deadline = Instant::now() + Duration::from_secs(5);
    while queue.state(first) != Some(OperationState::Completed) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(queue.state(first), Some(OperationState::Completed));

    queue.shutdown();
    assert!(queue.handle().is_shutdown());
}
