mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use support::{seed, Harness, SurfaceCall};
use tape_stream::{
    AppendOutcome, ContextPatch, FinalizeOutcome, SeedEntry, StreamConfig, StreamError, StreamId,
    StreamStatus, ViewContext, THINKING_PLACEHOLDER,
};

fn id(value: &str) -> StreamId {
    StreamId::new(value)
}

#[test]
fn chunks_accumulate_in_arrival_order() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine.start(seed("m1")).expect("stream starts");

    for chunk in ["Hello", ", ", "wor", "ld", "!"] {
        assert!(matches!(
            h.engine.append("m1", chunk, None),
            AppendOutcome::Applied { .. }
        ));
    }
    h.frames(5);

    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("Hello, world!"));
    assert_eq!(
        h.surface.patches().last().map(String::as_str),
        Some("Hello, world!")
    );
}

#[test]
fn duplicate_start_keeps_accumulated_text() {
    let mut h = Harness::new(StreamConfig::default());
    let first = h.engine.start(seed("m1")).expect("stream starts");
    assert_eq!(first.status, StreamStatus::Ready);
    assert!(first.view_relevant);
    h.engine.append("m1", "abc", None);

    let second = h.engine.start(seed("m1")).expect("duplicate start is accepted");

    assert_eq!(second.target, first.target);
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("abc"));
    assert_eq!(h.surface.begin_renders(), 1);
}

#[test]
fn chunks_before_start_are_applied_once_ready() {
    let mut h = Harness::new(StreamConfig::default());

    assert_eq!(
        h.engine.append("m1", "A", None),
        AppendOutcome::Buffered { dropped: 0 }
    );
    assert_eq!(
        h.engine.append("m1", "B", None),
        AppendOutcome::Buffered { dropped: 0 }
    );
    assert_eq!(h.engine.status(&id("m1")), Some(StreamStatus::Uninitialized));
    assert!(!h.engine.is_initialized(&id("m1")));

    let handle = h.engine.start(seed("m1")).expect("stream starts");

    assert_eq!(handle.status, StreamStatus::Ready);
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("AB"));
    assert_eq!(
        h.engine.record(&id("m1")).map(|record| record.buffered_chunks()),
        Some(0)
    );
}

#[test]
fn pre_buffer_overflow_drops_the_oldest_chunks() {
    let mut h = Harness::new(StreamConfig {
        pre_buffer_cap: 2,
        ..StreamConfig::default()
    });

    h.engine.append("m1", "a", None);
    h.engine.append("m1", "b", None);
    assert_eq!(
        h.engine.append("m1", "c", None),
        AppendOutcome::Buffered { dropped: 1 }
    );

    h.engine.start(seed("m1")).expect("stream starts");
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("bc"));
}

#[test]
fn finalized_streams_reject_late_chunks_and_restarts() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine.start(seed("m1")).expect("stream starts");
    h.engine.append("m1", "x", None);

    assert_eq!(
        h.engine.finalize("m1", "completed", None, None),
        FinalizeOutcome::Finalized {
            text: "x".to_string()
        }
    );
    assert_eq!(
        h.engine.append("m1", "y", None),
        AppendOutcome::Rejected(StreamError::StreamAlreadyFinalized {
            stream_id: id("m1")
        })
    );
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("x"));
    assert_eq!(
        h.engine.finalize("m1", "completed", None, None),
        FinalizeOutcome::AlreadyFinalized
    );
    assert_eq!(
        h.engine.start(seed("m1")),
        Err(StreamError::StreamAlreadyFinalized { stream_id: id("m1") })
    );
}

#[test]
fn finalize_without_start_abandons_the_placeholder() {
    let mut h = Harness::new(StreamConfig::default());
    assert_eq!(
        h.engine.finalize("ghost", "completed", None, None),
        FinalizeOutcome::UnknownStream
    );

    h.engine.append("m1", "early", None);
    assert_eq!(
        h.engine.finalize("m1", "error", None, None),
        FinalizeOutcome::Abandoned { dropped: 1 }
    );
    assert_eq!(h.engine.status(&id("m1")), Some(StreamStatus::Finalized));
    assert!(h.surface.calls().is_empty());

    h.advance(h.engine.config().cleanup_grace);
    assert_eq!(h.engine.poll().cleaned, 1);
    assert_eq!(h.engine.tracked_streams(), 0);
}

#[test]
fn start_needs_a_resolvable_context() {
    let mut h = Harness::with_view(StreamConfig::default(), None);

    let err = h
        .engine
        .start(SeedEntry::new("m1", ContextPatch::default()))
        .expect_err("no context anywhere");
    assert_eq!(
        err,
        StreamError::InvalidContext {
            stream_id: id("m1"),
            missing: "principal and topic",
        }
    );
    assert_eq!(h.engine.status(&id("m1")), None);

    h.view.show(ViewContext::new("agent-7", "topic-7"));
    let handle = h
        .engine
        .start(SeedEntry::new("m1", ContextPatch::default()))
        .expect("context falls back to the view");
    assert!(handle.view_relevant);
    let context = h
        .engine
        .record(&id("m1"))
        .and_then(|record| record.context().cloned())
        .expect("context recorded");
    assert_eq!(context.principal_id, "agent-7");
    assert_eq!(context.topic_id, "topic-7");
}

#[test]
fn thinking_placeholder_is_replaced_by_content() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine
        .start(seed("m1").thinking(THINKING_PLACEHOLDER))
        .expect("thinking stream starts");
    assert_eq!(
        h.surface.calls().first(),
        Some(&SurfaceCall::BeginRender {
            stream_id: "m1".to_string(),
            placeholder: THINKING_PLACEHOLDER.to_string(),
        })
    );
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some(THINKING_PLACEHOLDER));

    h.engine.append("m1", "Hi", None);
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("Hi"));
}

#[test]
fn leaving_thinking_renders_the_cleared_placeholder_at_once() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine
        .start(seed("m1").thinking(THINKING_PLACEHOLDER))
        .expect("thinking stream starts");

    h.engine.start(seed("m1")).expect("stream re-initializes");

    assert_eq!(h.engine.accumulated_text(&id("m1")), Some(""));
    assert_eq!(h.surface.patches(), vec![String::new()]);
    assert_eq!(h.surface.begin_renders(), 1);
}

#[test]
fn display_name_updates_ride_along_with_chunks() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine.start(seed("m1")).expect("stream starts");

    h.engine
        .append("m1", "hi", Some(ContextPatch::display_name("Ada")));

    let record = h.engine.record(&id("m1")).expect("record exists");
    let context = record.context().expect("context set");
    assert_eq!(context.display_name.as_deref(), Some("Ada"));
    assert_eq!(context.principal_id, support::AGENT);

    let entry = h
        .engine
        .history(&support::key())
        .and_then(|history| history.find(&id("m1")).cloned())
        .expect("history entry exists");
    assert_eq!(entry.name.as_deref(), Some("Ada"));
    assert_eq!(entry.content, "hi");
}

#[test]
fn unrecognized_and_error_payloads_are_discarded() {
    let mut h = Harness::new(StreamConfig::default());
    h.engine.start(seed("m1")).expect("stream starts");

    let flagged = serde_json::json!({"error": "json_parse_error", "raw": "{oops"});
    assert_eq!(
        h.engine.append("m1", flagged, None),
        AppendOutcome::Discarded(tape_stream::DiscardReason::ErrorFlagged)
    );
    assert_eq!(h.engine.append("m1", "", None), AppendOutcome::Empty);
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some(""));

    h.advance(Duration::from_millis(5));
    assert!(matches!(
        h.engine.append("m1", serde_json::json!({"content": "ok"}), None),
        AppendOutcome::Applied { queued_units: 1 }
    ));
    assert_eq!(h.engine.accumulated_text(&id("m1")), Some("ok"));
}
