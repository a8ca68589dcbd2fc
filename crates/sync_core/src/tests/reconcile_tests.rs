use super::*;
use chrono::{TimeZone, Utc};
use shared::domain::{
    ParticipantRole, PresenceStatus, Session, SessionKind, SessionStatus, UserId,
};

fn sample_session(id: &str) -> Session {
    Session {
        id: SessionId::new(id),
        name: "standup".to_string(),
        description: String::new(),
        kind: SessionKind::Chat,
        status: SessionStatus::Active,
        participants: Vec::new(),
        max_participants: 8,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    }
}

fn message_from(id: &str, session_id: &str, username: &str, seconds: u32) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(id),
        session_id: SessionId::new(session_id),
        username: username.to_string(),
        content: format!("message {id}"),
        kind: Default::default(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, seconds).unwrap(),
        edited: false,
        edited_at: None,
    }
}

fn participant(id: &str, username: &str) -> Participant {
    Participant {
        id: UserId::new(id),
        username: username.to_string(),
        role: ParticipantRole::Participant,
        status: PresenceStatus::Online,
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn seen_ids(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn message_received(&self, message: &ChatMessage) {
        self.seen
            .lock()
            .unwrap()
            .push(message.id.as_str().to_string());
    }
}

struct Harness {
    reconciler: Reconciler,
    store: Arc<Mutex<SessionStore>>,
    events: broadcast::Receiver<EngineEvent>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness() -> Harness {
    let (tx, rx) = broadcast::channel(64);
    let store = Arc::new(Mutex::new(SessionStore::new()));
    store.lock().await.set_session(sample_session("s1"));
    let notifier = Arc::new(RecordingNotifier::default());
    let reconciler = Reconciler::new(Arc::clone(&store), tx, notifier.clone());
    Harness {
        reconciler,
        store,
        events: rx,
        notifier,
    }
}

async fn stored_ids(store: &Arc<Mutex<SessionStore>>) -> Vec<String> {
    store
        .lock()
        .await
        .messages()
        .iter()
        .map(|m| m.id.as_str().to_string())
        .collect()
}

#[tokio::test]
async fn duplicate_push_delivery_merges_once() {
    let mut h = harness().await;
    let message = message_from("m1", "s1", "bob", 1);

    h.reconciler
        .apply(ServerEvent::NewMessage {
            message: message.clone(),
        })
        .await;
    h.reconciler
        .apply(ServerEvent::NewMessage { message })
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1"]);
    assert_eq!(h.notifier.seen_ids(), vec!["m1"]);
    assert!(matches!(
        h.events.recv().await.unwrap(),
        EngineEvent::MessageAdded(_)
    ));
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn poll_snapshot_is_idempotent_against_push_deliveries() {
    let h = harness().await;
    let m1 = message_from("m1", "s1", "bob", 1);
    let m2 = message_from("m2", "s1", "bob", 2);
    let m3 = message_from("m3", "s1", "bob", 3);

    h.reconciler
        .apply(ServerEvent::NewMessage { message: m1.clone() })
        .await;
    h.reconciler
        .apply(ServerEvent::NewMessage { message: m2.clone() })
        .await;
    h.reconciler
        .on_messages_snapshot(&SessionId::new("s1"), vec![m1, m2, m3])
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn snapshot_inserts_unseen_messages_in_timestamp_order() {
    let h = harness().await;
    let out_of_order = vec![
        message_from("m3", "s1", "bob", 30),
        message_from("m1", "s1", "bob", 10),
        message_from("m2", "s1", "bob", 20),
    ];

    h.reconciler
        .on_messages_snapshot(&SessionId::new("s1"), out_of_order)
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn bootstrap_history_loads_silently() {
    let h = harness().await;
    h.reconciler.set_local_user(Some("alice".to_string())).await;
    let history = vec![
        message_from("m2", "s1", "bob", 20),
        message_from("m1", "s1", "bob", 10),
        message_from("m3", "s1", "bob", 30),
    ];

    h.reconciler
        .on_messages_bootstrap(&SessionId::new("s1"), history)
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1", "m2", "m3"]);
    assert!(h.notifier.seen_ids().is_empty());

    // A message first seen after the join still notifies.
    h.reconciler
        .on_new_message(message_from("m4", "s1", "bob", 40))
        .await;
    assert_eq!(h.notifier.seen_ids(), vec!["m4"]);
}

#[tokio::test]
async fn edit_for_unknown_message_is_dropped() {
    let mut h = harness().await;

    h.reconciler
        .apply(ServerEvent::MessageUpdated {
            message: message_from("m9", "s1", "bob", 1),
        })
        .await;

    assert!(stored_ids(&h.store).await.is_empty());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn edit_updates_content_in_place() {
    let h = harness().await;
    h.reconciler
        .on_new_message(message_from("m1", "s1", "bob", 1))
        .await;
    h.reconciler
        .on_new_message(message_from("m2", "s1", "bob", 2))
        .await;

    let mut edited = message_from("m1", "s1", "bob", 1);
    edited.content = "revised".to_string();
    edited.edited = true;
    h.reconciler
        .apply(ServerEvent::MessageUpdated { message: edited })
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1", "m2"]);
    let store = h.store.lock().await;
    assert_eq!(store.messages()[0].content, "revised");
    assert!(store.messages()[0].edited);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let h = harness().await;
    h.reconciler
        .on_new_message(message_from("m1", "s1", "bob", 1))
        .await;

    let session_id = SessionId::new("s1");
    let message_id = MessageId::new("m1");
    h.reconciler
        .on_message_deleted(&session_id, &message_id)
        .await;
    h.reconciler
        .on_message_deleted(&session_id, &message_id)
        .await;

    assert!(stored_ids(&h.store).await.is_empty());
}

#[tokio::test]
async fn events_for_other_sessions_are_dropped() {
    let h = harness().await;

    h.reconciler
        .apply(ServerEvent::NewMessage {
            message: message_from("m1", "s2", "bob", 1),
        })
        .await;
    h.reconciler
        .apply(ServerEvent::UserJoined {
            session_id: SessionId::new("s2"),
            participant: participant("u1", "bob"),
        })
        .await;

    let store = h.store.lock().await;
    assert!(store.messages().is_empty());
    assert!(store.session().unwrap().participants.is_empty());
}

#[tokio::test]
async fn local_user_messages_never_notify() {
    let h = harness().await;
    h.reconciler.set_local_user(Some("alice".to_string())).await;

    h.reconciler
        .apply(ServerEvent::NewMessage {
            message: message_from("m1", "s1", "alice", 1),
        })
        .await;
    h.reconciler
        .apply(ServerEvent::NewMessage {
            message: message_from("m2", "s1", "bob", 2),
        })
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1", "m2"]);
    assert_eq!(h.notifier.seen_ids(), vec!["m2"]);
}

#[tokio::test]
async fn sender_echo_merges_without_notification() {
    let h = harness().await;

    h.reconciler
        .apply(ServerEvent::MessageSent {
            message: message_from("m1", "s1", "bob", 1),
        })
        .await;

    assert_eq!(stored_ids(&h.store).await, vec!["m1"]);
    assert!(h.notifier.seen_ids().is_empty());
}

#[tokio::test]
async fn participant_join_and_leave_are_idempotent() {
    let h = harness().await;
    let session_id = SessionId::new("s1");
    let bob = participant("u1", "bob");

    h.reconciler
        .on_participant_joined(&session_id, bob.clone())
        .await;
    h.reconciler
        .on_participant_joined(&session_id, bob.clone())
        .await;
    assert_eq!(h.store.lock().await.session().unwrap().participants.len(), 1);

    h.reconciler.on_participant_left(&session_id, &bob).await;
    h.reconciler.on_participant_left(&session_id, &bob).await;
    assert!(h.store.lock().await.session().unwrap().participants.is_empty());
}

#[tokio::test]
async fn participants_snapshot_replaces_local_roster() {
    let h = harness().await;
    let session_id = SessionId::new("s1");
    h.reconciler
        .on_participant_joined(&session_id, participant("u1", "bob"))
        .await;

    h.reconciler
        .on_participants_snapshot(
            &session_id,
            vec![participant("u2", "carol"), participant("u3", "dave")],
        )
        .await;

    let store = h.store.lock().await;
    let roster: Vec<&str> = store
        .session()
        .unwrap()
        .participants
        .iter()
        .map(|p| p.username.as_str())
        .collect();
    assert_eq!(roster, vec!["carol", "dave"]);
}

#[tokio::test]
async fn session_update_applies_metadata_and_keeps_roster() {
    let h = harness().await;
    let session_id = SessionId::new("s1");
    h.reconciler
        .on_participant_joined(&session_id, participant("u1", "bob"))
        .await;

    let mut summary = sample_session("s1").summary();
    summary.name = "retro".to_string();
    summary.status = SessionStatus::Paused;
    h.reconciler
        .apply(ServerEvent::SessionUpdated { session: summary })
        .await;

    let store = h.store.lock().await;
    let session = store.session().unwrap();
    assert_eq!(session.name, "retro");
    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(session.participants.len(), 1);
}

#[tokio::test]
async fn session_update_for_inactive_session_is_dropped() {
    let h = harness().await;

    let mut summary = sample_session("s2").summary();
    summary.name = "someone else's".to_string();
    h.reconciler
        .apply(ServerEvent::SessionUpdated { session: summary })
        .await;

    assert_eq!(h.store.lock().await.session().unwrap().name, "standup");
}
