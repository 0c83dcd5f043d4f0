use std::sync::Arc;

use uuid::Uuid;

use sokoni_types::events::MessageChange;
use sokoni_types::models::{Conversation, Message};

use super::*;
use crate::context::{NetworkTrust, SessionContext};
use crate::error::NoticeLevel;
use crate::testing::FakeGateway;

struct Fixture {
    gateway: Arc<FakeGateway>,
    sync: ConversationSync,
    me: Uuid,
    seller: Uuid,
}

fn fixture() -> Fixture {
    let gateway = Arc::new(FakeGateway::new());
    let me = gateway.add_profile("wanjiku", None, None);
    let seller = gateway.add_profile("otieno", Some("0712345678"), None);
    let sync = ConversationSync::new(gateway.clone(), SessionContext::new(me, NetworkTrust::Trusted));
    Fixture {
        gateway,
        sync,
        me,
        seller,
    }
}

fn keys(sync: &ConversationSync) -> Vec<MessageKey> {
    sync.messages().map(|m| m.key).collect()
}

fn open_with(f: &Fixture) -> Conversation {
    let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
    f.gateway.add_conversation(f.me, f.seller, Some(product))
}

#[tokio::test]
async fn test_list_orders_newest_first_and_counts_unread() {
    let mut f = fixture();
    let other = f.gateway.add_profile("akinyi", None, None);
    let older = f.gateway.add_conversation(f.me, f.seller, None);
    let newer = f.gateway.add_conversation(other, f.me, None);
    f.gateway.add_message(&older, f.seller, "Iko bado?");
    f.gateway.add_message(&older, f.me, "Ndiyo");
    f.gateway.add_message(&older, f.seller, "Sawa");

    f.sync.refresh_conversations().await.unwrap();

    let list = f.sync.conversations();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id(), newer.id);
    assert_eq!(list[0].preview, Preview::Empty);
    assert_eq!(list[0].preview.text(), "No messages yet");
    assert_eq!(list[1].other_user.username, "otieno");
    assert_eq!(list[1].preview.text(), "Sawa");
    assert_eq!(list[1].unread_count, 2);
    assert_eq!(f.sync.total_unread(), 2);
}

#[tokio::test]
async fn test_one_bad_row_does_not_abort_the_list() {
    let mut f = fixture();
    let broken = f.gateway.add_profile("ghost", None, None);
    f.gateway.add_conversation(f.me, f.seller, None);
    let bad = f.gateway.add_conversation(f.me, broken, None);
    f.gateway.fail_profile(broken);

    f.sync.refresh_conversations().await.unwrap();

    let list = f.sync.conversations();
    assert_eq!(list.len(), 2);
    let degraded = list.iter().find(|c| c.id() == bad.id).unwrap();
    assert_eq!(degraded.other_user.display_name(), "Unknown User");
    assert!(list.iter().any(|c| c.other_user.username == "otieno"));
}

#[tokio::test]
async fn test_preview_failure_shows_error_text() {
    let mut f = fixture();
    let c = f.gateway.add_conversation(f.me, f.seller, None);
    f.gateway.add_message(&c, f.seller, "Habari");
    f.gateway.fail("latest_message");

    f.sync.refresh_conversations().await.unwrap();

    assert_eq!(f.sync.conversations()[0].preview, Preview::Unavailable);
    assert_eq!(f.sync.conversations()[0].preview.text(), "Error loading messages");
}

#[tokio::test]
async fn test_list_failure_keeps_previous_list() {
    let mut f = fixture();
    f.gateway.add_conversation(f.me, f.seller, None);
    f.sync.refresh_conversations().await.unwrap();

    f.gateway.fail("conversations");
    assert!(f.sync.refresh_conversations().await.is_err());

    assert_eq!(f.sync.conversations().len(), 1);
    let notices = f.sync.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].text, "Failed to load conversations");

    f.gateway.recover("conversations");
    f.gateway.add_conversation(f.me, f.seller, None);
    f.sync.refresh_conversations().await.unwrap();
    assert_eq!(f.sync.conversations().len(), 2);
}

#[tokio::test]
async fn test_open_marks_read_and_zeroes_unread() {
    let mut f = fixture();
    let c = open_with(&f);
    f.gateway.add_message(&c, f.seller, "Karibu");
    f.gateway.add_message(&c, f.me, "Asante");
    f.gateway.add_message(&c, f.seller, "Bei ni 15000");
    f.sync.refresh_conversations().await.unwrap();
    assert_eq!(f.sync.conversations()[0].unread_count, 2);

    assert!(f.sync.open_conversation(c.clone()).await);

    assert_eq!(f.sync.conversations()[0].unread_count, 0);
    let shown: Vec<_> = f.sync.messages().collect();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[0].content, "Karibu");
    assert_eq!(shown[0].status, DeliveryStatus::Read);
    assert_eq!(shown[1].status, DeliveryStatus::Sent);
    assert!(shown[1].is_own);
    assert_eq!(shown[0].sender.as_ref().map(|p| p.username.as_str()), Some("otieno"));
    assert!(f.gateway.stored_messages(c.id).iter().filter(|m| m.receiver_id == f.me).all(|m| m.is_read));
    assert_eq!(f.gateway.calls("profiles"), 1);
}

#[tokio::test]
async fn test_open_tolerates_profile_failure() {
    let mut f = fixture();
    let c = open_with(&f);
    f.gateway.add_message(&c, f.seller, "Karibu");
    f.gateway.fail("profiles");

    assert!(f.sync.open_conversation(c).await);

    let shown: Vec<_> = f.sync.messages().collect();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].sender.is_none());
    assert!(f.sync.take_notices().is_empty());
}

#[tokio::test]
async fn test_open_failure_leaves_thread_empty() {
    let mut f = fixture();
    let c = open_with(&f);
    f.gateway.add_message(&c, f.seller, "Karibu");
    f.gateway.fail("messages");

    f.sync.open_conversation(c.clone()).await;

    assert!(f.sync.thread().is_empty());
    assert_eq!(f.sync.selected().map(|s| s.id), Some(c.id));
    assert_eq!(f.sync.take_notices()[0].text, "Failed to load messages");
}

#[tokio::test]
async fn test_late_load_of_previous_selection_is_discarded() {
    let mut f = fixture();
    let first = open_with(&f);
    let second = f.gateway.add_conversation(f.me, f.seller, None);
    f.gateway.add_message(&first, f.seller, "from first");
    f.gateway.add_message(&second, f.seller, "from second");

    let slow = f.sync.begin_open(first.clone());
    let fast = f.sync.begin_open(second.clone());
    let fast_fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, second.id).await;
    let slow_fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, first.id).await;

    assert!(f.sync.complete_open(fast, fast_fetch));
    assert!(!f.sync.complete_open(slow, slow_fetch));

    let contents: Vec<_> = f.sync.messages().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["from second"]);
}

#[tokio::test]
async fn test_reopening_same_conversation_supersedes_older_load() {
    let mut f = fixture();
    let c = open_with(&f);
    f.gateway.add_message(&c, f.seller, "one");

    let old = f.sync.begin_open(c.clone());
    let old_fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, c.id).await;
    f.gateway.add_message(&c, f.seller, "two");
    let new = f.sync.begin_open(c.clone());
    let new_fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, c.id).await;

    assert!(f.sync.complete_open(new, new_fetch));
    assert!(!f.sync.complete_open(old, old_fetch));
    assert_eq!(f.sync.thread().len(), 2);
}

#[tokio::test]
async fn test_blank_draft_is_rejected_without_mutation() {
    let mut f = fixture();
    let c = open_with(&f);
    f.sync.open_conversation(c).await;

    f.sync.set_draft("   \n\t");
    assert!(matches!(f.sync.send_draft().await, Err(SendError::Empty)));

    assert!(f.sync.thread().is_empty());
    assert_eq!(f.gateway.calls("insert_message"), 0);
    let notices = f.sync.take_notices();
    assert_eq!(notices[0].level, NoticeLevel::Warning);
}

#[tokio::test]
async fn test_send_shows_pending_then_confirmed() {
    let mut f = fixture();
    let c = open_with(&f);
    let quiet = f.gateway.add_conversation(f.me, f.seller, None);
    f.sync.open_conversation(c.clone()).await;
    f.sync.refresh_conversations().await.unwrap();
    assert_eq!(f.sync.conversations()[0].id(), quiet.id);

    f.sync.set_draft("Hello");
    let pending = f.sync.begin_send().unwrap();
    assert_eq!(f.sync.draft(), "");
    let shown: Vec<_> = f.sync.messages().collect();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].key, MessageKey::Pending(pending.local_id));
    assert_eq!(shown[0].status, DeliveryStatus::Sending);
    assert_eq!(pending.request.product_id, c.product_id);

    let result = ConversationSync::deliver(f.gateway.as_ref(), f.me, &pending).await;
    let id = f.sync.complete_send(pending.clone(), result).await.unwrap();

    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
    assert!(!f.sync.thread().contains(&MessageKey::Pending(pending.local_id)));
    let sent = f.sync.thread().get(&MessageKey::Confirmed(id)).unwrap();
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(f.sync.conversations()[0].id(), c.id);
    assert_eq!(f.sync.conversations()[0].preview.text(), "Hello");
    assert_eq!(f.gateway.calls("touch_conversation"), 1);
}

#[tokio::test]
async fn test_failed_send_removes_pending_and_keeps_draft_empty() {
    let mut f = fixture();
    let c = open_with(&f);
    f.sync.open_conversation(c.clone()).await;
    f.gateway.fail("insert_message");

    f.sync.set_draft("Is this still available?");
    let err = f.sync.send_draft().await.unwrap_err();

    assert!(matches!(err, SendError::Gateway(_)));
    assert!(f.sync.thread().is_empty());
    assert_eq!(f.sync.draft(), "");
    let notices = f.sync.take_notices();
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].text, "Failed to send message");
    assert!(f.gateway.stored_messages(c.id).is_empty());
}

#[tokio::test]
async fn test_realtime_echo_of_own_send_is_not_duplicated() {
    let mut f = fixture();
    let c = open_with(&f);
    let mut feed = f.sync.subscribe().await.unwrap();
    f.sync.open_conversation(c).await;

    f.sync.set_draft("Nitachukua kesho");
    let id = f.sync.send_draft().await.unwrap();
    assert_eq!(f.sync.drain(&mut feed).await, 1);

    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
}

#[tokio::test]
async fn test_echo_arriving_before_confirmation_is_not_duplicated() {
    let mut f = fixture();
    let c = open_with(&f);
    let mut feed = f.sync.subscribe().await.unwrap();
    f.sync.open_conversation(c).await;

    f.sync.set_draft("Poa");
    let pending = f.sync.begin_send().unwrap();
    let result = ConversationSync::deliver(f.gateway.as_ref(), f.me, &pending).await;
    f.sync.drain(&mut feed).await;
    assert_eq!(f.sync.thread().len(), 2);

    let id = f.sync.complete_send(pending, result).await.unwrap();
    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
}

#[tokio::test]
async fn test_insert_for_other_conversation_only_refreshes_list() {
    let mut f = fixture();
    let open = open_with(&f);
    let elsewhere = f.gateway.add_conversation(f.me, f.seller, None);
    f.sync.open_conversation(open).await;

    let incoming = f.gateway.add_message(&elsewhere, f.seller, "Uko wapi?");
    f.sync.apply_change(MessageChange::Insert(incoming)).await;

    assert!(f.sync.thread().is_empty());
    let entry = f.sync.conversations().iter().find(|c| c.id() == elsewhere.id).unwrap();
    assert_eq!(entry.unread_count, 1);
}

#[tokio::test]
async fn test_insert_for_open_conversation_appends_with_sender() {
    let mut f = fixture();
    let c = open_with(&f);
    f.sync.open_conversation(c.clone()).await;

    let incoming = f.gateway.add_message(&c, f.seller, "Niko njiani");
    let id = incoming.id;
    f.sync.apply_change(MessageChange::Insert(incoming.clone())).await;
    f.sync.apply_change(MessageChange::Insert(incoming)).await;

    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
    let shown = f.sync.thread().get(&MessageKey::Confirmed(id)).unwrap();
    assert_eq!(shown.status, DeliveryStatus::Delivered);
    assert_eq!(shown.sender.as_ref().map(|p| p.username.as_str()), Some("otieno"));
}

#[tokio::test]
async fn test_read_receipt_update_merges() {
    let mut f = fixture();
    let c = open_with(&f);
    f.sync.open_conversation(c).await;
    f.sync.set_draft("Nimefika");
    let id = f.sync.send_draft().await.unwrap();

    let stored: Message = f.gateway.stored_messages(f.sync.selected().unwrap().id)[0].clone();
    f.sync
        .apply_change(MessageChange::Update(Message {
            is_read: true,
            ..stored
        }))
        .await;

    let shown = f.sync.thread().get(&MessageKey::Confirmed(id)).unwrap();
    assert!(shown.is_read);
    assert_eq!(shown.status, DeliveryStatus::Read);
}

#[tokio::test]
async fn test_start_conversation_reuses_existing() {
    let mut f = fixture();
    let product = f.gateway.add_product(f.seller, None, None);
    let existing = f.gateway.add_conversation(f.seller, f.me, Some(product));

    let id = f.sync.start_conversation(f.seller, Some(product)).await.unwrap();

    assert_eq!(id, existing.id);
    assert_eq!(f.sync.selected().map(|c| c.id), Some(existing.id));
}

#[tokio::test]
async fn test_feed_delivers_incoming_message_to_open_thread() {
    let mut f = fixture();
    let c = open_with(&f);
    let mut feed = f.sync.subscribe().await.unwrap();
    f.sync.open_conversation(c.clone()).await;

    let incoming = f.gateway.add_message(&c, f.seller, "Bado iko");
    f.gateway.emit(MessageChange::Insert(incoming.clone()));
    assert_eq!(f.sync.drain(&mut feed).await, 1);

    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(incoming.id)]);
    assert_eq!(f.sync.conversations()[0].preview.text(), "Bado iko");
}

#[tokio::test]
async fn test_send_during_load_survives_completion() {
    let mut f = fixture();
    let c = open_with(&f);
    let earlier = f.gateway.add_message(&c, f.seller, "Karibu");

    let ticket = f.sync.begin_open(c.clone());
    let fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, c.id).await;
    f.sync.set_draft("Nataka kuiona");
    let pending = f.sync.begin_send().unwrap();
    let local = MessageKey::Pending(pending.local_id);

    assert!(f.sync.complete_open(ticket, fetch));
    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(earlier.id), local]);

    let result = ConversationSync::deliver(f.gateway.as_ref(), f.me, &pending).await;
    let id = f.sync.complete_send(pending, result).await.unwrap();
    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(earlier.id), MessageKey::Confirmed(id)]);
}

#[tokio::test]
async fn test_send_stored_before_fetch_is_not_duplicated() {
    let mut f = fixture();
    let c = open_with(&f);

    let ticket = f.sync.begin_open(c.clone());
    f.sync.set_draft("Nipo hapa");
    let pending = f.sync.begin_send().unwrap();
    let result = ConversationSync::deliver(f.gateway.as_ref(), f.me, &pending).await;
    let fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, c.id).await;

    assert!(f.sync.complete_open(ticket, fetch));
    assert_eq!(f.sync.thread().len(), 2);

    let id = f.sync.complete_send(pending, result).await.unwrap();
    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
}

#[tokio::test]
async fn test_realtime_insert_during_load_survives_completion() {
    let mut f = fixture();
    let c = open_with(&f);
    let earlier = f.gateway.add_message(&c, f.seller, "Karibu");

    let ticket = f.sync.begin_open(c.clone());
    let fetch = ConversationSync::fetch_thread(f.gateway.as_ref(), f.me, c.id).await;
    let incoming = f.gateway.add_message(&c, f.seller, "Bado iko");
    f.sync.apply_change(MessageChange::Insert(incoming.clone())).await;
    assert_eq!(f.sync.thread().len(), 1);

    assert!(f.sync.complete_open(ticket, fetch));
    assert_eq!(
        keys(&f.sync),
        vec![MessageKey::Confirmed(earlier.id), MessageKey::Confirmed(incoming.id)]
    );
}

#[tokio::test]
async fn test_confirmation_for_a_closed_conversation_is_not_shown() {
    let mut f = fixture();
    let first = open_with(&f);
    let second = f.gateway.add_conversation(f.me, f.seller, None);
    f.sync.open_conversation(first.clone()).await;

    f.sync.set_draft("Asante");
    let pending = f.sync.begin_send().unwrap();
    f.sync.open_conversation(second).await;

    let result = ConversationSync::deliver(f.gateway.as_ref(), f.me, &pending).await;
    f.sync.complete_send(pending, result).await.unwrap();

    assert!(f.sync.thread().is_empty());
    assert_eq!(f.gateway.stored_messages(first.id).len(), 1);
}

#[tokio::test]
async fn test_send_succeeds_when_list_refresh_fails() {
    let mut f = fixture();
    let c = open_with(&f);
    f.sync.open_conversation(c).await;
    f.gateway.fail("conversations");

    f.sync.set_draft("Tuonane saa nane");
    let id = f.sync.send_draft().await.unwrap();

    assert_eq!(keys(&f.sync), vec![MessageKey::Confirmed(id)]);
    let notices = f.sync.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].text, "Failed to load conversations");
}
