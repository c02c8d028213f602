
use std::time::Duration;

use dvr::{
    CaptureState, DvrError, PlaylistItem, SegmentFile, SegmentFileState, SegmentFileStore,
    StopReason,
};

use crate::{
    common::{
        capture, delivery_url, eager_capture, next_tick, playlist, sequences, settle,
        EagerStore, ManualStore, ScriptedResolver, Step,
    },
    AssertWrapper,
};

const HEADER: &str =
    "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n";

#[tokio::test(start_paused = true)]
async fn getters_fail_before_start() {
    let resolver = ScriptedResolver::new([]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert_eq!(capture.state(), CaptureState::NotStarted);
    assert!(!capture.is_capturing());
    assert!(matches!(capture.current_content(), Err(DvrError::NotStarted)));
    assert!(matches!(capture.capture_start_time(), Err(DvrError::NotStarted)));
    assert!(matches!(capture.capture_duration(), Err(DvrError::NotStarted)));
    assert!(matches!(capture.summary(), Err(DvrError::NotStarted)));
    assert!(matches!(
        capture.stop(),
        Err(DvrError::InvalidCaptureState {
            expected: CaptureState::Capturing,
            actual: CaptureState::NotStarted,
        })
    ));
    assert!(capture.updates().borrow().is_none());
}

#[tokio::test(start_paused = true)]
async fn start_publishes_header_only_playlist() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(10, 3))]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    assert!(capture.is_capturing());
    assert_eq!(&*capture.current_content().assert_success(), HEADER);
    capture.capture_start_time().assert_success();
}

#[tokio::test(start_paused = true)]
async fn start_reports_unreachable_source() {
    let resolver = ScriptedResolver::new([Step::Unreachable]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(!capture.start().await.assert_success());
    assert_eq!(capture.state(), CaptureState::NotStarted);
    capture.current_content().assert_error();

    // retrying is up to the caller
    resolver.push(Step::Playlist(playlist(0, 1)));
    assert!(capture.start().await.assert_success());
    assert!(capture.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn start_twice_faults() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(10, 3))]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    let captured = sequences(&capture);
    let calls = resolver.calls();

    assert!(matches!(
        capture.start().await,
        Err(DvrError::InvalidCaptureState {
            expected: CaptureState::NotStarted,
            actual: CaptureState::Capturing,
        })
    ));
    assert_eq!(sequences(&capture), captured);
    assert_eq!(resolver.calls(), calls);
    assert!(capture.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn reconcile_by_media_sequence() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(10, 3)),
        Step::Playlist(playlist(10, 3)),
        Step::Playlist(playlist(11, 4)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    assert_eq!(sequences(&capture), vec![12]);
    assert_eq!(store.file("seg12.ts").url().as_str(), "http://h/live/seg12.ts");

    next_tick().await;
    assert_eq!(sequences(&capture), vec![12, 13, 14]);

    // the playlist did not move
    next_tick().await;
    assert_eq!(sequences(&capture), vec![12, 13, 14]);
    assert_eq!(store.requests(), 3);
    assert_eq!(resolver.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn empty_source_playlist_captures_nothing() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(5, 0)),
        Step::Playlist(playlist(5, 0)),
        Step::Playlist(playlist(5, 2)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    assert!(capture.segments().is_empty());

    next_tick().await;
    assert_eq!(sequences(&capture), vec![6]);
}

#[tokio::test(start_paused = true)]
async fn sequences_strictly_increase_across_ticks() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 5)),
        Step::Playlist(playlist(0, 5)),
        Step::Playlist(playlist(2, 5)),
        Step::Playlist(playlist(1, 3)),
        Step::Playlist(playlist(6, 5)),
        Step::Playlist(playlist(9, 5)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    for _ in 0..4 {
        next_tick().await;
    }

    let captured = sequences(&capture);
    assert_eq!(captured, (4..=13).collect::<Vec<_>>());
    assert!(captured.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn downloaded_segments_are_published_in_order() {
    let mut source = playlist(20, 1);
    source.items[0].discontinuity = true;
    let mut next = playlist(20, 3);
    next.items[0].discontinuity = true;
    let resolver = ScriptedResolver::new([
        Step::Playlist(source.clone()),
        Step::Playlist(source),
        Step::Playlist(next),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);
    let mut updates = capture.updates();

    assert!(capture.start().await.assert_success());
    settle().await;
    next_tick().await;
    assert_eq!(sequences(&capture), vec![20, 21, 22]);
    assert!(updates.has_changed().assert_success());
    updates.borrow_and_update();

    // seg21 is withheld until it completes, and seg22 behind it
    store.download("seg20.ts");
    store.download("seg22.ts");
    let content = capture.current_content().assert_success();
    assert_eq!(
        &*content,
        format!(
            "{HEADER}#EXT-X-DISCONTINUITY\n#EXTINF:4,\n{}\n",
            delivery_url("seg20.ts")
        )
    );

    store.download("seg21.ts");
    let content = capture.current_content().assert_success();
    assert!(content.ends_with(&format!(
        "{}\n#EXTINF:4,\n{}\n#EXTINF:4,\n{}\n",
        delivery_url("seg20.ts"),
        delivery_url("seg21.ts"),
        delivery_url("seg22.ts")
    )));
    assert!(!content.contains("#EXT-X-ENDLIST"));
    assert!(updates.has_changed().assert_success());
}

#[tokio::test(start_paused = true)]
async fn end_marker_waits_for_pending_downloads() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 2)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    next_tick().await;
    store.download("seg0.ts");
    store.file("seg1.ts").transition(SegmentFileState::Downloading, None);
    assert!(!capture.current_content().assert_success().contains("#EXT-X-ENDLIST"));

    capture.stop().assert_success();
    assert_eq!(capture.state(), CaptureState::Stopped);
    assert_eq!(capture.stop_reason(), Some(StopReason::Requested));
    assert!(!capture.current_content().assert_success().contains("#EXT-X-ENDLIST"));

    store.download("seg1.ts");
    let content = capture.current_content().assert_success();
    assert!(content.ends_with(&format!("{}\n#EXT-X-ENDLIST\n", delivery_url("seg1.ts"))));

    // polling has ended
    let calls = resolver.calls();
    next_tick().await;
    next_tick().await;
    assert_eq!(resolver.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_faults() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(0, 1))]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    capture.stop().assert_success();
    assert!(matches!(
        capture.stop(),
        Err(DvrError::InvalidCaptureState {
            expected: CaptureState::Capturing,
            actual: CaptureState::Stopped,
        })
    ));
    assert!(matches!(
        capture.start().await,
        Err(DvrError::InvalidCaptureState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn regenerating_without_change_does_not_notify() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 2)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);
    let mut updates = capture.updates();

    assert!(capture.start().await.assert_success());
    settle().await;
    next_tick().await;
    assert_eq!(sequences(&capture), vec![0, 1]);
    updates.borrow_and_update();

    // regenerated, but seg0 still withholds everything behind it
    store.file("seg0.ts").transition(SegmentFileState::Downloading, None);
    store.download("seg1.ts");
    assert!(!updates.has_changed().assert_success());
    assert_eq!(&*capture.current_content().assert_success(), HEADER);

    store.download("seg0.ts");
    assert!(updates.has_changed().assert_success());
    let first = updates.borrow_and_update().clone();

    next_tick().await;
    assert!(!updates.has_changed().assert_success());
    assert_eq!(capture.current_content().ok(), first);
}

#[tokio::test(start_paused = true)]
async fn failed_download_stops_and_truncates() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 3)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    next_tick().await;
    assert_eq!(sequences(&capture), vec![0, 1, 2]);

    store.download("seg0.ts");
    store.download("seg2.ts");
    store.fail("seg1.ts");

    assert_eq!(capture.state(), CaptureState::Stopped);
    assert_eq!(capture.stop_reason(), Some(StopReason::SegmentFailed));
    // the caller could not know, this is not a usage fault
    capture.stop().assert_success();
    assert_eq!(capture.stop_reason(), Some(StopReason::SegmentFailed));

    let content = capture.current_content().assert_success();
    assert!(content.contains(&delivery_url("seg0.ts")));
    assert!(!content.contains(&delivery_url("seg2.ts")));
    assert!(content.ends_with(&format!("{}\n#EXT-X-ENDLIST\n", delivery_url("seg0.ts"))));

    // nothing is captured after the failure
    next_tick().await;
    assert_eq!(sequences(&capture), vec![0, 1, 2]);
    assert_eq!(store.file("seg1.ts").listener_count(), 0);
    capture.wait_stopped().await;
}

#[tokio::test(start_paused = true)]
async fn already_failed_file_stops_on_subscription() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
    ]);
    let store = ManualStore::new();

    // another capture of the same stream already failed this file
    {
        let file = store.get_or_create("http://h/live/seg0.ts".parse().unwrap());
        assert_eq!(file.state(), SegmentFileState::Pending);
    }
    store.fail("seg0.ts");

    let capture = capture(&resolver, &store);
    assert!(capture.start().await.assert_success());
    settle().await;

    assert_eq!(capture.stop_reason(), Some(StopReason::SegmentFailed));
    assert_eq!(store.file("seg0.ts").listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_stops_capture() {
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
        Step::Unreachable,
        Step::Playlist(playlist(0, 3)),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    store.download("seg0.ts");
    next_tick().await;

    assert_eq!(capture.state(), CaptureState::Stopped);
    assert_eq!(capture.stop_reason(), Some(StopReason::SourceUnavailable));
    assert!(capture
        .current_content()
        .assert_success()
        .ends_with("#EXT-X-ENDLIST\n"));

    next_tick().await;
    assert_eq!(sequences(&capture), vec![0]);
    assert_eq!(resolver.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_segment_uri_stops_capture() {
    let mut broken = playlist(0, 2);
    broken.items[1] = PlaylistItem {
        uri: "http://[::1".to_string(),
        duration: 4.,
        discontinuity: false,
    };
    let resolver = ScriptedResolver::new([
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(playlist(0, 1)),
        Step::Playlist(broken),
    ]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    next_tick().await;

    assert_eq!(capture.stop_reason(), Some(StopReason::MalformedSegment));
    assert_eq!(sequences(&capture), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn duration_freezes_after_stop() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(0, 1))]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    tokio::time::sleep(Duration::from_secs(5)).await;
    let running = capture.capture_duration().assert_success();
    assert!(running >= Duration::from_secs(5));

    capture.stop().assert_success();
    let stopped = capture.capture_duration().assert_success();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(capture.capture_duration().assert_success(), stopped);

    let summary = capture.summary().assert_success();
    assert_eq!(summary.state, CaptureState::Stopped);
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
    assert_eq!(summary.segments, 1);
    assert_eq!(summary.downloaded_segments, 0);
    assert_eq!(summary.duration_secs, stopped.as_secs_f64());

    let json = serde_json::to_value(&summary).assert_success();
    assert_eq!(json["state"], "stopped");
    assert_eq!(json["stop_reason"], "requested");
}

#[tokio::test(start_paused = true)]
async fn downloaded_state_reported_on_subscribe_is_handled_once() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(0, 1))]);
    let store = EagerStore::new(SegmentFileState::Downloaded);
    let capture = eager_capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;

    let file = store.file("seg0.ts");
    assert_eq!(file.listener_count(), 0);
    // one regeneration, the state read after subscribing was ignored
    assert_eq!(file.url_reads(), 1);
    assert_eq!(
        &*capture.current_content().assert_success(),
        format!("{HEADER}#EXTINF:4,\n{}\n", delivery_url("seg0.ts"))
    );

    next_tick().await;
    assert_eq!(sequences(&capture), vec![0]);
    assert_eq!(file.url_reads(), 1);
    assert!(capture.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn failed_state_reported_on_subscribe_stops_once() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(0, 1))]);
    let store = EagerStore::new(SegmentFileState::Failed);
    let capture = eager_capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;

    let file = store.file("seg0.ts");
    assert_eq!(file.listener_count(), 0);
    assert_eq!(file.url_reads(), 0);
    assert_eq!(capture.state(), CaptureState::Stopped);
    assert_eq!(capture.stop_reason(), Some(StopReason::SegmentFailed));
    assert_eq!(
        &*capture.current_content().assert_success(),
        format!("{HEADER}#EXT-X-ENDLIST\n")
    );
    capture.stop().assert_success();
}

#[tokio::test(start_paused = true)]
async fn dropping_capture_releases_pending_listeners() {
    let resolver = ScriptedResolver::new([Step::Playlist(playlist(0, 2))]);
    let store = ManualStore::new();
    let capture = capture(&resolver, &store);

    assert!(capture.start().await.assert_success());
    settle().await;
    resolver.push(Step::Playlist(playlist(0, 3)));
    next_tick().await;
    assert_eq!(sequences(&capture), vec![1, 2]);

    store.download("seg1.ts");
    assert_eq!(store.file("seg1.ts").listener_count(), 0);
    assert_eq!(store.file("seg2.ts").listener_count(), 1);

    drop(capture);
    assert_eq!(store.file("seg2.ts").listener_count(), 0);

    // settling after the drop reaches nobody
    store.download("seg2.ts");
    next_tick().await;
    assert_eq!(resolver.calls(), 3);
}
