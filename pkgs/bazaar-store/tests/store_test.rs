// Copyright 2025 Bazaar Team.
//
// Comprehensive tests for MessageStore and ConversationStore

use std::collections::BTreeMap;
use std::sync::Arc;

use bazaar_store::{
    conversation_key, BlobKeys, Conversation, ConversationScope, ConversationStore, DatabaseInfo,
    DocumentStore, LastMessage, Message, MessageStore, StoreError,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
}

async fn memory_db() -> Arc<dyn DocumentStore> {
    Arc::new(
        DatabaseInfo::Memory {
            keys: BlobKeys::default(),
        }
        .connect()
        .await
        .unwrap(),
    )
}

fn create_test_message(from: &str, to: &str, content: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: String::new(),
        sender_id: from.to_string(),
        sender_name: from.to_uppercase(),
        sender_photo: None,
        receiver_id: to.to_string(),
        receiver_name: to.to_uppercase(),
        content: content.to_string(),
        timestamp: at,
        read: false,
        conversation_id: None,
        product_id: None,
        product_name: None,
    }
}

fn create_test_conversation(a: &str, b: &str, product_id: Option<&str>, at: DateTime<Utc>) -> Conversation {
    Conversation {
        id: conversation_key(a, b, ConversationScope::PairAndProduct, product_id),
        participants: vec![a.to_string(), b.to_string()],
        participant_names: BTreeMap::from([
            (a.to_string(), a.to_uppercase()),
            (b.to_string(), b.to_uppercase()),
        ]),
        participant_photos: BTreeMap::new(),
        last_message: None,
        unread_count: BTreeMap::from([(a.to_string(), 0), (b.to_string(), 1)]),
        created_at: at,
        updated_at: at,
        product_id: product_id.map(str::to_string),
        product_name: product_id.map(|p| format!("Product {}", p)),
    }
}

#[tokio::test]
async fn test_list_by_conversation_sorts_by_timestamp() {
    let store = MessageStore::new(memory_db().await);

    // Appended out of order on purpose.
    for (content, at) in [("second", t(20)), ("first", t(10)), ("third", t(30))] {
        let message = store
            .append(create_test_message("alice", "bob", content, at))
            .await
            .unwrap();
        store.assign_conversation(&message.id, "c1").await.unwrap();
    }
    let other = store
        .append(create_test_message("alice", "carol", "elsewhere", t(15)))
        .await
        .unwrap();
    store.assign_conversation(&other.id, "c2").await.unwrap();

    let thread = store.list_by_conversation("c1").await.unwrap();
    let contents: Vec<&str> = thread.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    assert!(thread.iter().all(|m| m.conversation_id.as_deref() == Some("c1")));
}

#[tokio::test]
async fn test_conversation_id_is_set_once() {
    let store = MessageStore::new(memory_db().await);
    let message = store
        .append(create_test_message("alice", "bob", "hi", t(0)))
        .await
        .unwrap();
    assert!(!message.id.is_empty());
    assert_eq!(message.conversation_id, None);

    store.assign_conversation(&message.id, "c1").await.unwrap();
    store.assign_conversation(&message.id, "c1").await.unwrap();

    let err = store
        .assign_conversation(&message.id, "c2")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = store.assign_conversation("ghost", "c1").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let stored = store.get(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.conversation_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_relink_overwrites_placeholder_links() {
    let store = MessageStore::new(memory_db().await);

    let mut placeholder = create_test_message("alice", "bob", "hello", t(0));
    placeholder.conversation_id = Some("conv_1700000000000_alice_bob".to_string());
    let placeholder = store.append(placeholder).await.unwrap();
    let unlinked = store
        .append(create_test_message("bob", "alice", "hi", t(5)))
        .await
        .unwrap();

    store
        .relink(&[
            (placeholder.id.clone(), "c1".to_string()),
            (unlinked.id.clone(), "c1".to_string()),
        ])
        .await
        .unwrap();

    let thread = store.list_by_conversation("c1").await.unwrap();
    let ids: Vec<&str> = thread.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![placeholder.id.as_str(), unlinked.id.as_str()]);
    assert_eq!(store.list_all().await.unwrap().len(), 2);

    // A missing message fails the whole batch.
    let err = store
        .relink(&[
            (placeholder.id.clone(), "c2".to_string()),
            ("ghost".to_string(), "c2".to_string()),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(store.list_by_conversation("c2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unread_listing_and_mark_read() {
    let store = MessageStore::new(memory_db().await);
    let mut ids = Vec::new();
    for (from, to, conv) in [("alice", "bob", "c1"), ("carol", "bob", "c2"), ("bob", "alice", "c1")] {
        let message = store
            .append(create_test_message(from, to, "msg", t(0)))
            .await
            .unwrap();
        store.assign_conversation(&message.id, conv).await.unwrap();
        ids.push(message.id);
    }

    assert_eq!(store.list_unread_for("bob", None).await.unwrap().len(), 2);
    assert_eq!(store.list_unread_for("bob", Some("c1")).await.unwrap().len(), 1);

    store.mark_read(&ids[..1]).await.unwrap();
    let unread = store.list_unread_for("bob", None).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].sender_id, "carol");

    // Empty batches are fine.
    store.mark_read(&[]).await.unwrap();
}

#[tokio::test]
async fn test_find_by_participant_pair_respects_scope() {
    let store = ConversationStore::new(memory_db().await);

    store
        .upsert(&create_test_conversation("alice", "bob", Some("p1"), t(0)))
        .await
        .unwrap();

    let pair_only = store
        .find_by_participant_pair("bob", "alice", ConversationScope::Pair, Some("p2"))
        .await
        .unwrap();
    assert!(pair_only.is_some());

    let scoped_miss = store
        .find_by_participant_pair("bob", "alice", ConversationScope::PairAndProduct, Some("p2"))
        .await
        .unwrap();
    assert!(scoped_miss.is_none());

    let scoped_hit = store
        .find_by_participant_pair("alice", "bob", ConversationScope::PairAndProduct, Some("p1"))
        .await
        .unwrap();
    assert_eq!(scoped_hit.unwrap().product_id.as_deref(), Some("p1"));

    let stranger = store
        .find_by_participant_pair("alice", "carol", ConversationScope::Pair, None)
        .await
        .unwrap();
    assert!(stranger.is_none());
}

#[tokio::test]
async fn test_list_by_participant_most_recent_first() {
    let store = ConversationStore::new(memory_db().await);

    store
        .upsert(&create_test_conversation("alice", "bob", None, t(0)))
        .await
        .unwrap();
    store
        .upsert(&create_test_conversation("alice", "carol", None, t(10)))
        .await
        .unwrap();
    store
        .upsert(&create_test_conversation("bob", "carol", None, t(20)))
        .await
        .unwrap();

    let snapshot = LastMessage {
        content: "bump".to_string(),
        timestamp: t(30),
        sender_id: "bob".to_string(),
    };
    store
        .record_message(
            &conversation_key("alice", "bob", ConversationScope::PairAndProduct, None),
            "alice",
            &snapshot,
            t(30),
        )
        .await
        .unwrap();

    let conversations = store.list_by_participant("alice").await.unwrap();
    let others: Vec<&str> = conversations
        .iter()
        .map(|c| c.other_participant("alice").unwrap())
        .collect();
    assert_eq!(others, vec!["bob", "carol"]);
    assert_eq!(conversations[0].unread_for("alice"), 1);
    assert_eq!(conversations[0].last_message.as_ref(), Some(&snapshot));
}

#[tokio::test]
async fn test_upsert_replaces_whole_record() {
    let store = ConversationStore::new(memory_db().await);

    let mut conversation = create_test_conversation("alice", "bob", Some("p1"), t(0));
    conversation
        .participant_photos
        .insert("alice".to_string(), "https://img/alice.png".to_string());
    store.upsert(&conversation).await.unwrap();

    conversation.participant_photos.clear();
    conversation.product_id = None;
    conversation.product_name = None;
    conversation.unread_count.insert("bob".to_string(), 7);
    store.upsert(&conversation).await.unwrap();

    let stored = store.get(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored, conversation);

    let err = store.reset_unread("ghost", "bob").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    store.reset_unread(&conversation.id, "bob").await.unwrap();
    let stored = store.get(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for("bob"), 0);
}
