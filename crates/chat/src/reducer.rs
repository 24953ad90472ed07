use sidechat_engine::{Attachment, ImageRef, Role};

use crate::events::{ChatEvent, ChatEventKind, ImageFrame};
use crate::message::{
    ChatLog, ChatMessage, ContentPhase, FAILURE_FALLBACK, IMAGE_READY_CAPTION, LOADING_MODEL_LABEL,
    MessageStatus, PendingSlot, THINKING_LABEL,
};

/// Returns the log that results from applying `event` to `log`.
pub fn reduce(log: &ChatLog, event: &ChatEvent) -> ChatLog {
    let mut next = log.clone();
    apply(&mut next, event);
    next
}

/// In-place form of [`reduce`]. Returns `true` when the log changed.
///
/// Events for a session other than the one owning the pending message, and any
/// event other than `RequestSubmitted` against a closed log, are ignored.
pub fn apply(log: &mut ChatLog, event: &ChatEvent) -> bool {
    if let ChatEventKind::RequestSubmitted { text, attachment } = &event.kind {
        submit(log, event, text, attachment.as_ref());
        return true;
    }

    let Some(slot) = log.pending.as_mut() else {
        tracing::trace!(session_id = %event.session_id, "event for closed log ignored");
        return false;
    };
    if slot.session_id != event.session_id {
        tracing::debug!(
            active = %slot.session_id,
            attempted = %event.session_id,
            "event from stale session ignored"
        );
        return false;
    }
    let Some(message) = log.messages.get_mut(slot.index) else {
        tracing::warn!(index = slot.index, "pending slot points past the log");
        log.pending = None;
        return false;
    };

    let mut close = false;
    match &event.kind {
        ChatEventKind::RequestSubmitted { .. } => return false,
        ChatEventKind::ModelLoadProgress { pending_files, .. }
        | ChatEventKind::ModelFileDone { pending_files, .. } => {
            let label = if *pending_files > 0 {
                LOADING_MODEL_LABEL
            } else {
                THINKING_LABEL
            };
            return set_placeholder_label(message, slot, label);
        }
        ChatEventKind::ModelReady => {
            return set_placeholder_label(message, slot, THINKING_LABEL);
        }
        ChatEventKind::TextDelta(chunk) => {
            match slot.phase {
                ContentPhase::Awaiting => message.content = chunk.clone(),
                ContentPhase::Reasoning | ContentPhase::Answer => message.content.push_str(chunk),
            }
            slot.phase = ContentPhase::Answer;
            message.status = MessageStatus::Streaming;
        }
        ChatEventKind::ReasoningDelta(chunk) => {
            match slot.phase {
                ContentPhase::Awaiting => {
                    message.content = chunk.clone();
                    message.reasoning_len = Some(message.content.len());
                    slot.phase = ContentPhase::Reasoning;
                }
                ContentPhase::Reasoning => {
                    message.content.push_str(chunk);
                    message.reasoning_len = Some(message.content.len());
                }
                // The prefix is frozen once the answer has begun.
                ContentPhase::Answer => message.content.push_str(chunk),
            }
            message.status = MessageStatus::Streaming;
        }
        ChatEventKind::ImageFrame(ImageFrame::Partial(progress)) => {
            message.content = format!("Generating... {:.1}%", progress * 100.0);
            message.status = MessageStatus::Streaming;
        }
        ChatEventKind::ImageFrame(ImageFrame::Final(image)) => {
            message.content = IMAGE_READY_CAPTION.to_string();
            message.image = Some(image.clone());
            message.status = MessageStatus::Done;
            close = true;
        }
        ChatEventKind::Completed(metrics) => {
            message.metadata = Some(metrics.metadata_line());
            message.status = MessageStatus::Done;
            close = true;
        }
        ChatEventKind::Interrupted => {
            message.status = MessageStatus::Cancelled;
            close = true;
        }
        ChatEventKind::Failed(reason) => {
            if slot.phase == ContentPhase::Awaiting {
                message.content = FAILURE_FALLBACK.to_string();
            }
            message.status = MessageStatus::Error(reason.clone());
            close = true;
        }
    }

    if close {
        log.pending = None;
    }
    true
}

/// Swaps the placeholder label while no content has arrived.
fn set_placeholder_label(message: &mut ChatMessage, slot: &PendingSlot, label: &str) -> bool {
    let showing_label = slot.phase == ContentPhase::Awaiting && message.shows_placeholder();
    if !showing_label || message.content == label {
        return false;
    }
    message.content = label.to_string();
    true
}

/// Appends the user turn and a fresh placeholder.
///
/// Closed messages are never touched. A slot still open here belongs to a
/// session that never delivered its terminal event; it is marked cancelled so
/// the log keeps a single pending message.
fn submit(log: &mut ChatLog, event: &ChatEvent, text: &str, attachment: Option<&Attachment>) {
    if let Some(stale) = log.pending.take() {
        tracing::warn!(
            stale = %stale.session_id,
            next = %event.session_id,
            "new request closed a pending message"
        );
        if let Some(message) = log.messages.get_mut(stale.index) {
            message.status = MessageStatus::Cancelled;
        }
    }

    let image = match attachment {
        Some(Attachment::Image(image)) => Some(image.clone()),
        Some(Attachment::Audio(_)) | None => None,
    };
    log.messages.push(ChatMessage::user(text, image));
    log.messages.push(ChatMessage::assistant_placeholder());
    log.pending = Some(PendingSlot {
        index: log.messages.len() - 1,
        session_id: event.session_id,
        phase: ContentPhase::Awaiting,
    });
}

/// Final image attached to the last assistant message, if any.
pub fn latest_image(log: &ChatLog) -> Option<&ImageRef> {
    log.messages()
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .find_map(|message| message.image.as_ref())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sidechat_engine::{RasterImage, SessionId};

    use super::*;
    use crate::progress::ProgressEntry;
    use crate::session::GenerationMetrics;

    const SESSION: SessionId = SessionId(7);

    fn event(kind: ChatEventKind) -> ChatEvent {
        ChatEvent::new(SESSION, kind)
    }

    fn submitted(text: &str) -> ChatLog {
        reduce(
            &ChatLog::new(),
            &ChatEvent::request_submitted(SESSION, text, None),
        )
    }

    fn fold(log: ChatLog, events: Vec<ChatEventKind>) -> ChatLog {
        events
            .into_iter()
            .fold(log, |log, kind| reduce(&log, &event(kind)))
    }

    fn load_progress() -> ChatEventKind {
        ChatEventKind::ModelLoadProgress {
            entry: ProgressEntry {
                file_id: "model.onnx".to_string(),
                bytes_done: 1,
                bytes_total: 4,
            },
            pending_files: 1,
        }
    }

    #[test]
    fn streaming_reply_ends_with_metadata() {
        let log = fold(
            submitted("Hello"),
            vec![
                load_progress(),
                ChatEventKind::ModelReady,
                ChatEventKind::TextDelta("Hi".to_string()),
                ChatEventKind::TextDelta(" there".to_string()),
                ChatEventKind::Completed(GenerationMetrics::from_totals(2, 500.0)),
            ],
        );

        assert!(log.is_closed());
        assert_eq!(log.len(), 2);
        assert_eq!(log.messages()[0].role, Role::User);
        assert_eq!(log.messages()[0].content, "Hello");
        let reply = &log.messages()[1];
        assert_eq!(reply.content, "Hi there");
        assert_eq!(
            reply.metadata.as_deref(),
            Some("2 tokens in 500 ms (4.0 tokens/sec)")
        );
        assert_eq!(reply.status, MessageStatus::Done);
    }

    #[test]
    fn placeholder_tracks_loading_until_content_arrives() {
        let log = fold(submitted("Hello"), vec![load_progress()]);
        assert_eq!(log.messages()[1].content, LOADING_MODEL_LABEL);

        let log = fold(log, vec![ChatEventKind::ModelReady]);
        assert_eq!(log.messages()[1].content, THINKING_LABEL);

        let log = fold(
            log,
            vec![ChatEventKind::TextDelta("ok".to_string()), load_progress()],
        );
        assert_eq!(log.messages()[1].content, "ok");
    }

    #[test]
    fn label_follows_files_of_a_later_batch() {
        let log = fold(
            submitted("Hello"),
            vec![load_progress(), ChatEventKind::ModelReady, load_progress()],
        );
        assert_eq!(log.messages()[1].content, LOADING_MODEL_LABEL);

        let still_loading = fold(
            log.clone(),
            vec![ChatEventKind::ModelFileDone {
                file_id: "config.json".to_string(),
                pending_files: 1,
            }],
        );
        assert_eq!(still_loading.messages()[1].content, LOADING_MODEL_LABEL);

        let drained = fold(
            log,
            vec![ChatEventKind::ModelFileDone {
                file_id: "model.onnx".to_string(),
                pending_files: 0,
            }],
        );
        assert_eq!(drained.messages()[1].content, THINKING_LABEL);
    }

    #[test]
    fn reasoning_prefix_freezes_once_answer_starts() {
        let log = fold(
            submitted("2+2?"),
            vec![
                ChatEventKind::ReasoningDelta("add ".to_string()),
                ChatEventKind::ReasoningDelta("them".to_string()),
                ChatEventKind::TextDelta("4".to_string()),
                ChatEventKind::ReasoningDelta("!".to_string()),
            ],
        );

        let reply = log.pending_message().unwrap();
        assert_eq!(reply.content, "add them4!");
        assert_eq!(reply.reasoning_prefix(), Some("add them"));
        assert_eq!(reply.answer(), "4!");
    }

    #[test]
    fn terminal_events_close_the_log_once() {
        let metrics = GenerationMetrics::from_totals(1, 10.0);
        let completed = fold(
            submitted("Hello"),
            vec![
                ChatEventKind::TextDelta("Hi".to_string()),
                ChatEventKind::Completed(metrics),
            ],
        );

        let replayed = reduce(&completed, &event(ChatEventKind::Completed(metrics)));
        assert_eq!(replayed, completed);
        let late = reduce(&completed, &event(ChatEventKind::TextDelta("x".to_string())));
        assert_eq!(late, completed);
    }

    #[test]
    fn interrupted_keeps_partial_content() {
        let log = fold(
            submitted("Tell me a story"),
            vec![
                ChatEventKind::TextDelta("Once".to_string()),
                ChatEventKind::Interrupted,
            ],
        );

        assert!(log.is_closed());
        assert_eq!(log.messages()[1].content, "Once");
        assert_eq!(log.messages()[1].status, MessageStatus::Cancelled);
        assert_eq!(log.messages()[1].metadata, None);
    }

    #[test]
    fn failure_replaces_bare_placeholder() {
        let reason = "model load failed: 404".to_string();
        let log = fold(
            submitted("Hello"),
            vec![load_progress(), ChatEventKind::Failed(reason.clone())],
        );
        assert_eq!(log.messages()[1].content, FAILURE_FALLBACK);
        assert_eq!(log.messages()[1].status, MessageStatus::Error(reason.clone()));

        let log = fold(
            submitted("Hello"),
            vec![
                ChatEventKind::TextDelta("Hal".to_string()),
                ChatEventKind::Failed(reason),
            ],
        );
        assert_eq!(log.messages()[1].content, "Hal");
    }

    #[test]
    fn stale_session_events_are_ignored() {
        let log = submitted("Hello");
        let stale = ChatEvent::new(SessionId(6), ChatEventKind::TextDelta("old".to_string()));
        assert_eq!(reduce(&log, &stale), log);
    }

    #[test]
    fn image_frames_update_then_close() {
        let log = fold(
            submitted("/image a fox"),
            vec![ChatEventKind::ImageFrame(ImageFrame::Partial(0.4567))],
        );
        assert_eq!(log.messages()[1].content, "Generating... 45.7%");

        let image = ImageRef::Raster(Arc::new(RasterImage {
            width: 1,
            height: 1,
            channels: 3,
            data: vec![0, 0, 0],
        }));
        let log = fold(
            log,
            vec![ChatEventKind::ImageFrame(ImageFrame::Final(image.clone()))],
        );
        assert!(log.is_closed());
        assert_eq!(log.messages()[1].content, IMAGE_READY_CAPTION);
        assert_eq!(latest_image(&log), Some(&image));
    }

    #[test]
    fn new_request_leaves_closed_messages_untouched() {
        let finished = fold(
            submitted("first"),
            vec![
                ChatEventKind::TextDelta("one".to_string()),
                ChatEventKind::Completed(GenerationMetrics::from_totals(1, 5.0)),
            ],
        );
        let next = reduce(
            &finished,
            &ChatEvent::request_submitted(SessionId(8), "second", None),
        );

        assert_eq!(next.len(), 4);
        assert_eq!(&next.messages()[..2], finished.messages());
        assert_eq!(next.messages()[2].content, "second");
        assert_eq!(next.messages()[3].content, THINKING_LABEL);
        assert_eq!(next.pending().map(|slot| slot.index), Some(3));
    }

    #[test]
    fn new_request_closes_abandoned_pending_message() {
        let log = fold(
            submitted("first"),
            vec![ChatEventKind::TextDelta("par".to_string())],
        );
        let next = reduce(
            &log,
            &ChatEvent::request_submitted(SessionId(8), "second", None),
        );

        assert_eq!(next.len(), 4);
        assert_eq!(next.messages()[1].status, MessageStatus::Cancelled);
        assert_eq!(next.pending().map(|slot| slot.session_id), Some(SessionId(8)));
        assert_eq!(next.messages()[3].content, THINKING_LABEL);
    }
}
