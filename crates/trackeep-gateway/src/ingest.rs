use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use trackeep_db::Database;
use trackeep_detector::detect;
use trackeep_types::events::EventPayload;
use trackeep_types::models::{
    ConversationId, Message, MessageAttachment, MessageId, MessageReference, MessageSuggestion,
    MessageView, NewAttachment, NewReference, NewSuggestion, UserId,
};

use crate::hub::Hub;

/// What the pipeline needs from storage. Calls are blocking and are always
/// made from the blocking pool.
pub trait MessageStore: Send + Sync + 'static {
    fn is_archived(&self, conversation_id: ConversationId) -> anyhow::Result<bool>;

    fn create_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
        is_sensitive: bool,
    ) -> anyhow::Result<Message>;

    fn append_attachments(
        &self,
        message_id: MessageId,
        attachments: &[NewAttachment],
    ) -> anyhow::Result<Vec<MessageAttachment>>;

    fn append_references(
        &self,
        message_id: MessageId,
        references: &[NewReference],
    ) -> anyhow::Result<Vec<MessageReference>>;

    fn append_suggestions(
        &self,
        message_id: MessageId,
        suggestions: &[NewSuggestion],
    ) -> anyhow::Result<Vec<MessageSuggestion>>;

    fn touch_conversation(
        &self,
        conversation_id: ConversationId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

impl MessageStore for Database {
    fn is_archived(&self, conversation_id: ConversationId) -> anyhow::Result<bool> {
        Ok(self
            .get_conversation(conversation_id)?
            .is_some_and(|c| c.is_archived))
    }

    fn create_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
        is_sensitive: bool,
    ) -> anyhow::Result<Message> {
        Database::create_message(self, conversation_id, sender_id, body, is_sensitive)
    }

    fn append_attachments(
        &self,
        message_id: MessageId,
        attachments: &[NewAttachment],
    ) -> anyhow::Result<Vec<MessageAttachment>> {
        Database::append_attachments(self, message_id, attachments)
    }

    fn append_references(
        &self,
        message_id: MessageId,
        references: &[NewReference],
    ) -> anyhow::Result<Vec<MessageReference>> {
        Database::append_references(self, message_id, references)
    }

    fn append_suggestions(
        &self,
        message_id: MessageId,
        suggestions: &[NewSuggestion],
    ) -> anyhow::Result<Vec<MessageSuggestion>> {
        Database::append_suggestions(self, message_id, suggestions)
    }

    fn touch_conversation(
        &self,
        conversation_id: ConversationId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Database::touch_conversation(self, conversation_id, at)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message body is empty")]
    EmptyBody,

    #[error("conversation {0} is archived")]
    Archived(ConversationId),

    #[error("failed to persist message")]
    Persist(#[source] anyhow::Error),

    #[error("persistence task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// An authenticated, authorized submission. Membership and write permission
/// are checked by the caller.
#[derive(Debug, Clone)]
pub struct Submission {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub references: Vec<NewReference>,
}

#[derive(Debug, Clone)]
pub struct Ingested {
    /// Full view including author-only suggestions
    pub view: MessageView,
    /// Clients that received `message_created`
    pub delivered: usize,
    /// Sender clients that received `password_warning`
    pub warned: usize,
}

/// Detector, persistence and hub wired together.
pub struct Pipeline<S> {
    store: Arc<S>,
    hub: Hub,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<S: MessageStore> Pipeline<S> {
    pub fn new(store: Arc<S>, hub: Hub) -> Self {
        Self { store, hub }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Persist, derive and fan out one message. The work runs on its own task:
    /// once the insert has started, the broadcast happens even if the caller
    /// is dropped (a connection torn down mid-command).
    pub async fn ingest(&self, submission: Submission) -> Result<Ingested, IngestError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(submission).await }).await?
    }

    async fn run(&self, submission: Submission) -> Result<Ingested, IngestError> {
        let Submission {
            conversation_id,
            sender_id,
            body,
            references,
        } = submission;

        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(IngestError::EmptyBody);
        }

        // Pure; run up front so the insert carries the sensitivity verdict
        let detection = detect(&body);
        let store = self.store.clone();

        let view = tokio::task::spawn_blocking(move || -> Result<MessageView, IngestError> {
            if store.is_archived(conversation_id).map_err(IngestError::Persist)? {
                return Err(IngestError::Archived(conversation_id));
            }

            let message = store
                .create_message(conversation_id, sender_id, &body, detection.sensitive)
                .map_err(IngestError::Persist)?;
            let message_id = message.id;

            let attachments = store
                .append_attachments(message_id, &detection.attachments)
                .unwrap_or_else(|e| {
                    warn!("Failed to store attachments for message {}: {}", message_id, e);
                    vec![]
                });
            let references = store
                .append_references(message_id, &references)
                .unwrap_or_else(|e| {
                    warn!("Failed to store references for message {}: {}", message_id, e);
                    vec![]
                });
            let suggestions = store
                .append_suggestions(message_id, &detection.suggestions)
                .unwrap_or_else(|e| {
                    warn!("Failed to store suggestions for message {}: {}", message_id, e);
                    vec![]
                });

            if let Err(e) = store.touch_conversation(conversation_id, message.created_at) {
                warn!("Failed to touch conversation {}: {}", conversation_id, e);
            }

            Ok(MessageView {
                attachments,
                references,
                suggestions,
                ..MessageView::new(message)
            })
        })
        .await??;

        let delivered = self
            .hub
            .broadcast(conversation_id, &EventPayload::MessageCreated(view.for_room()));

        let mut warned = 0;
        if view.message.is_sensitive {
            let suggestions: Vec<MessageSuggestion> = view
                .suggestions
                .iter()
                .filter(|s| s.kind.is_author_only())
                .cloned()
                .collect();
            warned = self.hub.send_to_user(
                conversation_id,
                sender_id,
                &EventPayload::PasswordWarning {
                    message_id: view.message.id,
                    suggestions,
                },
            );
        }

        debug!(
            "Message {} in conversation {}: {} attachment(s), {} suggestion(s), delivered to {}",
            view.message.id,
            conversation_id,
            view.attachments.len(),
            view.suggestions.len(),
            delivered
        );

        Ok(Ingested {
            view,
            delivered,
            warned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};
    use trackeep_types::events::EventEnvelope;
    use trackeep_types::models::SuggestionType;

    use crate::hub::Frame;

    /// Wraps the real database and can be told to fail individual steps.
    struct FlakyStore {
        db: Database,
        fail_insert: AtomicBool,
        fail_suggestions: AtomicBool,
        /// When set, the next insert signals `insert_started` and then
        /// blocks until the paired sender fires.
        hold_insert: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
        insert_started: Notify,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                db: Database::open_in_memory().unwrap(),
                fail_insert: AtomicBool::new(false),
                fail_suggestions: AtomicBool::new(false),
                hold_insert: Mutex::new(None),
                insert_started: Notify::new(),
            }
        }
    }

    impl MessageStore for FlakyStore {
        fn is_archived(&self, conversation_id: ConversationId) -> anyhow::Result<bool> {
            self.db.is_archived(conversation_id)
        }

        fn create_message(
            &self,
            conversation_id: ConversationId,
            sender_id: UserId,
            body: &str,
            is_sensitive: bool,
        ) -> anyhow::Result<Message> {
            if self.fail_insert.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            let hold = self.hold_insert.lock().unwrap().take();
            if let Some(release) = hold {
                self.insert_started.notify_one();
                let _ = release.recv();
            }
            self.db.create_message(conversation_id, sender_id, body, is_sensitive)
        }

        fn append_attachments(
            &self,
            message_id: MessageId,
            attachments: &[NewAttachment],
        ) -> anyhow::Result<Vec<MessageAttachment>> {
            self.db.append_attachments(message_id, attachments)
        }

        fn append_references(
            &self,
            message_id: MessageId,
            references: &[NewReference],
        ) -> anyhow::Result<Vec<MessageReference>> {
            self.db.append_references(message_id, references)
        }

        fn append_suggestions(
            &self,
            message_id: MessageId,
            suggestions: &[NewSuggestion],
        ) -> anyhow::Result<Vec<MessageSuggestion>> {
            if self.fail_suggestions.load(Ordering::SeqCst) {
                anyhow::bail!("constraint violation");
            }
            self.db.append_suggestions(message_id, suggestions)
        }

        fn touch_conversation(
            &self,
            conversation_id: ConversationId,
            at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.db.touch_conversation(conversation_id, at)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn submission(body: &str) -> Submission {
        Submission {
            conversation_id: trackeep_db::GLOBAL_CONVERSATION_ID,
            sender_id: 1,
            body: body.to_string(),
            references: vec![],
        }
    }

    #[tokio::test]
    async fn links_are_persisted_and_broadcast() {
        let store = Arc::new(FlakyStore::new());
        let pipeline = Pipeline::new(store.clone(), Hub::new(16));
        let (reader, mut rx) = pipeline.hub().register(2);
        pipeline.hub().subscribe(&reader, trackeep_db::GLOBAL_CONVERSATION_ID);

        let out = pipeline
            .ingest(submission(
                "see https://github.com/rust-lang/rust and https://youtu.be/dQw4w9WgXcQ",
            ))
            .await
            .unwrap();

        assert_eq!(out.delivered, 1);
        assert_eq!(out.warned, 0);
        assert!(!out.view.message.is_sensitive);
        assert_eq!(out.view.attachments.len(), 2);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "message_created");
        let EventPayload::MessageCreated(view) = events[0].decode().unwrap() else {
            panic!("expected message_created");
        };
        let kinds: Vec<_> = view.suggestions.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SuggestionType::LinkGithub));
        assert!(kinds.contains(&SuggestionType::SaveYoutube));

        let conv = store
            .db
            .get_conversation(trackeep_db::GLOBAL_CONVERSATION_ID)
            .unwrap()
            .unwrap();
        assert!(conv.last_message_at.is_some());
    }

    #[tokio::test]
    async fn sensitive_message_warns_only_the_sender() {
        let pipeline = Pipeline::new(Arc::new(FlakyStore::new()), Hub::new(16));
        let room = trackeep_db::GLOBAL_CONVERSATION_ID;
        let (phone, mut phone_rx) = pipeline.hub().register(1);
        let (laptop, mut laptop_rx) = pipeline.hub().register(1);
        let (peer, mut peer_rx) = pipeline.hub().register(2);
        for c in [&phone, &laptop, &peer] {
            pipeline.hub().subscribe(c, room);
        }

        let out = pipeline.ingest(submission("password: SuperSecret123!")).await.unwrap();
        assert!(out.view.message.is_sensitive);
        assert_eq!(out.delivered, 3);
        assert_eq!(out.warned, 2);

        for rx in [&mut phone_rx, &mut laptop_rx] {
            let events = drain(rx);
            let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
            assert_eq!(types, ["message_created", "password_warning"]);
            let EventPayload::PasswordWarning { suggestions, .. } = events[1].decode().unwrap()
            else {
                panic!("expected password_warning");
            };
            assert_eq!(suggestions.len(), 2);
            assert!(!events[1].data.to_string().contains("SuperSecret123!"));
        }

        let peer_events = drain(&mut peer_rx);
        assert_eq!(peer_events.len(), 1);
        let EventPayload::MessageCreated(view) = peer_events[0].decode().unwrap() else {
            panic!("expected message_created");
        };
        assert!(view.suggestions.iter().all(|s| !s.kind.is_author_only()));
    }

    #[tokio::test]
    async fn failed_insert_broadcasts_nothing() {
        let store = Arc::new(FlakyStore::new());
        store.fail_insert.store(true, Ordering::SeqCst);
        let pipeline = Pipeline::new(store, Hub::new(16));
        let (reader, mut rx) = pipeline.hub().register(2);
        pipeline.hub().subscribe(&reader, trackeep_db::GLOBAL_CONVERSATION_ID);

        let err = pipeline.ingest(submission("hello")).await.unwrap_err();
        assert!(matches!(err, IngestError::Persist(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn derived_row_failure_is_not_fatal() {
        let store = Arc::new(FlakyStore::new());
        store.fail_suggestions.store(true, Ordering::SeqCst);
        let pipeline = Pipeline::new(store, Hub::new(16));
        let (reader, mut rx) = pipeline.hub().register(2);
        pipeline.hub().subscribe(&reader, trackeep_db::GLOBAL_CONVERSATION_ID);

        let out = pipeline
            .ingest(submission("bookmark https://example.com/docs"))
            .await
            .unwrap();
        assert_eq!(out.view.attachments.len(), 1);
        assert!(out.view.suggestions.is_empty());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn blank_body_is_rejected_before_storage() {
        let store = Arc::new(FlakyStore::new());
        let pipeline = Pipeline::new(store.clone(), Hub::new(4));
        let err = pipeline.ingest(submission("   \n\t")).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyBody));
        assert!(
            store
                .db
                .get_messages(trackeep_db::GLOBAL_CONVERSATION_ID, 10, None)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn client_references_are_stored() {
        let pipeline = Pipeline::new(Arc::new(FlakyStore::new()), Hub::new(4));
        let mut sub = submission("see the task");
        sub.references = vec![NewReference {
            entity_type: "task".into(),
            entity_id: 77,
            deep_link: "/tasks/77".into(),
        }];

        let out = pipeline.ingest(sub).await.unwrap();
        assert_eq!(out.view.references.len(), 1);
        assert_eq!(out.view.references[0].entity_id, 77);
    }

    #[tokio::test]
    async fn dropped_caller_still_broadcasts_stored_message() {
        let store = Arc::new(FlakyStore::new());
        let (release, hold) = std::sync::mpsc::channel();
        *store.hold_insert.lock().unwrap() = Some(hold);

        let pipeline = Pipeline::new(store.clone(), Hub::new(16));
        let (reader, mut rx) = pipeline.hub().register(2);
        pipeline.hub().subscribe(&reader, trackeep_db::GLOBAL_CONVERSATION_ID);

        let caller = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.ingest(submission("ship it")).await }
        });

        // Tear the caller down while the insert is in flight
        store.insert_started.notified().await;
        caller.abort();
        release.send(()).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message_created never arrived")
            .unwrap();
        let env: EventEnvelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(env.event_type, "message_created");
        assert_eq!(
            store
                .db
                .get_messages(trackeep_db::GLOBAL_CONVERSATION_ID, 10, None)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn archived_conversation_rejects_new_messages() {
        let store = Arc::new(FlakyStore::new());
        let room = store
            .db
            .create_conversation(trackeep_types::models::ConversationKind::Group, "old", None, None, false)
            .unwrap();
        store.db.archive_conversation(room.id).unwrap();
        let pipeline = Pipeline::new(store.clone(), Hub::new(4));

        let mut sub = submission("anyone here?");
        sub.conversation_id = room.id;
        let err = pipeline.ingest(sub).await.unwrap_err();
        assert!(matches!(err, IngestError::Archived(id) if id == room.id));
        assert!(store.db.get_messages(room.id, 10, None).unwrap().is_empty());
        let conv = store.db.get_conversation(room.id).unwrap().unwrap();
        assert!(conv.last_message_at.is_none());
    }
}
