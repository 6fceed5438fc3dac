//! Async terminal input service backed by `crossterm::EventStream`.
//!
//! One task reads the terminal, normalizes every event, and pushes it into
//! the shared runtime channel. Bracketed pastes arrive from crossterm as a
//! single intact event; content is never logged, only its byte length.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossterm::event::{Event as CEvent, EventStream};
use tokio::sync::Notify;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

use core_events::{Event, InputEvent, PASTE_BYTES};

use crate::normalize::{map_key_event, map_mouse_event};

/// Handle used to request immediate termination of the input task.
#[derive(Clone, Debug)]
pub struct InputShutdown {
    notify: Arc<Notify>,
}

impl InputShutdown {
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExitReason {
    ShutdownSignal,
    ChannelClosed,
    StreamEnded,
    StreamError,
}

impl ExitReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ShutdownSignal => "shutdown_signal",
            ExitReason::ChannelClosed => "channel_closed",
            ExitReason::StreamEnded => "stream_ended",
            ExitReason::StreamError => "stream_error",
        }
    }
}

/// Spawn the input task. Returns the join handle and a shutdown handle.
pub fn spawn_async_input(sender: Sender<Event>) -> (JoinHandle<()>, InputShutdown) {
    let notify = Arc::new(Notify::new());
    let shutdown = InputShutdown {
        notify: Arc::clone(&notify),
    };
    let handle = tokio::spawn(async move {
        info!(target: "input.task", "input task started");
        let mut stream = EventStream::new();
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = notify.notified() => break ExitReason::ShutdownSignal,
                ev = stream.next() => ev,
            };
            let Some(result) = next else {
                break ExitReason::StreamEnded;
            };
            let event = match result {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(target: "input.task", error = %e, "event stream error");
                    break ExitReason::StreamError;
                }
            };
            let Some(mapped) = map_terminal_event(event) else {
                continue;
            };
            if sender.send(Event::Input(mapped)).await.is_err() {
                break ExitReason::ChannelClosed;
            }
        };
        info!(target: "input.task", reason = reason.as_str(), "input task stopped");
    });
    (handle, shutdown)
}

fn map_terminal_event(event: CEvent) -> Option<InputEvent> {
    match event {
        CEvent::Key(key) => {
            let mapped = map_key_event(&key)?;
            trace!(target: "input.key", base = ?mapped.base, mods = ?mapped.mods, "key");
            Some(InputEvent::Key(mapped))
        }
        CEvent::Mouse(mouse) => map_mouse_event(&mouse).map(InputEvent::Mouse),
        CEvent::Paste(data) => {
            PASTE_BYTES.fetch_add(data.len() as u64, Ordering::Relaxed);
            debug!(target: "input.paste", size_bytes = data.len(), "paste captured");
            Some(InputEvent::Paste(data))
        }
        CEvent::Resize(w, h) => {
            trace!(target: "input.task", w, h, "resize");
            Some(InputEvent::Resize(w, h))
        }
        CEvent::FocusGained => Some(InputEvent::FocusGained),
        CEvent::FocusLost => Some(InputEvent::FocusLost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paste_maps_intact_and_counts_bytes() {
        let before = PASTE_BYTES.load(Ordering::Relaxed);
        let mapped = map_terminal_event(CEvent::Paste("https://example.com\n".into()));
        match mapped {
            Some(InputEvent::Paste(s)) => assert_eq!(s, "https://example.com\n"),
            other => panic!("unexpected mapping: {other:?}"),
        }
        assert!(PASTE_BYTES.load(Ordering::Relaxed) >= before + 20);
    }

    #[test]
    fn resize_and_focus_pass_through() {
        assert!(matches!(
            map_terminal_event(CEvent::Resize(120, 40)),
            Some(InputEvent::Resize(120, 40))
        ));
        assert!(matches!(
            map_terminal_event(CEvent::FocusLost),
            Some(InputEvent::FocusLost)
        ));
    }
}
