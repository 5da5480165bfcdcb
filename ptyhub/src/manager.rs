// Owns every live Session. Generalizes the teacher's
// `Server.shells: Arc<Mutex<HashMap<String, Box<shell::Session>>>>` from a
// name-keyed table to a SessionId-keyed one, with linearizable id
// allocation instead of caller-chosen names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, instrument};

use ptyhub_protocol::{RecordingMode, SessionId};

use crate::attachment::AttachmentState;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::recorder::RecordingManager;
use crate::session::{Session, SessionOptions};

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    insertion_order: Mutex<Vec<SessionId>>,
    next_id: AtomicU64,
    bus: EventBus,
    attachment: Mutex<Option<Arc<AttachmentState>>>,
    recording: Mutex<Option<(Arc<RecordingManager>, RecordingMode)>>,
}

impl SessionManager {
    pub fn new(bus: EventBus) -> Arc<SessionManager> {
        Arc::new(SessionManager {
            sessions: Mutex::new(HashMap::new()),
            insertion_order: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            bus,
            attachment: Mutex::new(None),
            recording: Mutex::new(None),
        })
    }

    /// Wires the attachment arbiter so `close` can apply the auto-detach
    /// rule. Separate from `new` since the two are constructed
    /// independently and only the daemon bootstrap knows both.
    pub fn set_attachment(&self, attachment: Arc<AttachmentState>) {
        *self.attachment.lock().unwrap() = Some(attachment);
    }

    /// Wires the daemon-wide recording manager and default retention
    /// mode. Every `create_session` call that doesn't set its own
    /// `recording_manager` picks these up, so recording works without
    /// every caller having to know about `RecordingManager` itself.
    pub fn set_recording(&self, manager: Arc<RecordingManager>, mode: RecordingMode) {
        *self.recording.lock().unwrap() = Some((manager, mode));
    }

    /// Allocates a fresh id and spawns its session before publishing it,
    /// so a returned id is immediately usable for every other operation
    /// (create_session is linearizable: no two calls can observe the
    /// same id).
    #[instrument(skip(self, opts))]
    pub fn create_session(&self, mut opts: SessionOptions) -> CoreResult<Arc<Session>> {
        if opts.recording_manager.is_none() {
            if let Some((manager, mode)) = self.recording.lock().unwrap().clone() {
                opts.recording_manager = Some(manager);
                opts.recording_mode = mode;
            }
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let session = Session::new(id, opts, self.bus.clone())?;

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(id, Arc::clone(&session));
        self.insertion_order.lock().unwrap().push(id);
        info!(id = id.0, "session created");
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> CoreResult<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned().ok_or(CoreError::NotFound(id))
    }

    /// Idempotent: returns `false` if the session was already closed or
    /// never existed.
    #[instrument(skip(self))]
    pub fn close(&self, id: SessionId) -> bool {
        let session = self.sessions.lock().unwrap().remove(&id);
        self.insertion_order.lock().unwrap().retain(|sid| *sid != id);
        match session {
            Some(session) => {
                session.dispose();
                if let Some(attachment) = self.attachment.lock().unwrap().as_ref() {
                    attachment.on_session_closed(id);
                }
                true
            }
            None => false,
        }
    }

    pub fn list_ids(&self) -> Vec<SessionId> {
        self.insertion_order.lock().unwrap().clone()
    }

    pub fn dispose(&self) {
        let ids = self.list_ids();
        for id in ids {
            self.close(id);
        }
    }
}
