// Process-wide "which session is the RPC client bound to" singleton.
// The teacher's closest analog is per-session busy detection (whether a
// client is currently attached to *that* session, checked by probing
// `SessionInner`'s mutex); there is no teacher concept of a single
// global attachment shared by all sessions, so the state machine here is
// new, grounded in the same Mutex-guarded-state idiom.

use std::sync::Mutex;

use ptyhub_protocol::{McpMessage, SessionId};

use crate::event_bus::EventBus;

pub struct AttachmentState {
    attached: Mutex<Option<SessionId>>,
    bus: EventBus,
}

impl AttachmentState {
    pub fn new(bus: EventBus) -> AttachmentState {
        AttachmentState { attached: Mutex::new(None), bus }
    }

    pub fn attached_session(&self) -> Option<SessionId> {
        *self.attached.lock().unwrap()
    }

    /// Rebinds the attachment to `id`, publishing `AttachmentChanged` iff
    /// it actually changed.
    pub fn attach(&self, id: SessionId) {
        let previous = {
            let mut attached = self.attached.lock().unwrap();
            let previous = *attached;
            *attached = Some(id);
            previous
        };
        if previous != Some(id) {
            self.publish_changed(Some(id), previous);
        }
    }

    /// No-op if nothing is currently attached.
    pub fn detach(&self) {
        let previous = {
            let mut attached = self.attached.lock().unwrap();
            attached.take()
        };
        if let Some(previous) = previous {
            self.publish_changed(None, Some(previous));
        }
    }

    /// Called by the SessionManager when a session closes: clears the
    /// attachment if it was pointing at that session.
    pub fn on_session_closed(&self, id: SessionId) {
        let was_attached = {
            let mut attached = self.attached.lock().unwrap();
            if *attached == Some(id) {
                *attached = None;
                true
            } else {
                false
            }
        };
        if was_attached {
            self.publish_changed(None, Some(id));
        }
    }

    fn publish_changed(&self, new: Option<SessionId>, previous: Option<SessionId>) {
        self.bus.publish_mcp(McpMessage::AttachmentChanged {
            attached_session_id: new,
            previous_session_id: previous,
        });
    }
}
