//! Conversation session behaviour against the in-memory backend
//!
//! Two sessions (customer and advisor) share one `MemoryBackend`, so change
//! notifications and typing broadcasts flow between them the same way they do
//! across processes on Postgres.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tienda_core::config::RealtimeConfig;
use tienda_core::models::message::MESSAGES_TABLE;
use tienda_core::models::profile::PROFILES_TABLE;
use tienda_core::models::{ContractStatus, Message};
use tienda_core::{Backend, MemoryBackend};
use tienda_server::subsystems::contracts::ContractService;
use tienda_server::subsystems::conversation::ConversationSession;
use tienda_server::subsystems::messages;
use tokio::sync::watch;
use uuid::Uuid;

struct Fixture {
    memory: Arc<MemoryBackend>,
    backend: Arc<dyn Backend>,
    settings: RealtimeConfig,
    thread: Uuid,
    customer: Uuid,
    advisor: Uuid,
}

fn fixture() -> Fixture {
    let memory = Arc::new(MemoryBackend::default());
    let backend: Arc<dyn Backend> = memory.clone();
    Fixture {
        memory,
        backend,
        settings: RealtimeConfig::default(),
        thread: Uuid::new_v4(),
        customer: Uuid::new_v4(),
        advisor: Uuid::new_v4(),
    }
}

impl Fixture {
    async fn customer_session(&self) -> ConversationSession {
        ConversationSession::open(
            self.backend.clone(),
            &self.settings,
            self.thread,
            self.customer,
            Some(self.advisor),
        )
        .await
    }

    async fn advisor_session(&self) -> ConversationSession {
        ConversationSession::open(
            self.backend.clone(),
            &self.settings,
            self.thread,
            self.advisor,
            None,
        )
        .await
    }
}

async fn settle() {
    for _ in 0..30 {
        tokio::task::yield_now().await;
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<Vec<Message>>,
    predicate: impl FnMut(&Vec<Message>) -> bool,
) -> Vec<Message> {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for messages")
        .expect("message view closed")
        .clone()
}

fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

#[tokio::test]
async fn test_sent_message_appears_once_after_earlier_ones() {
    let fx = fixture();
    let session = fx.customer_session().await;
    let mut rx = session.messages();

    session.send("primero").await.expect("first send");
    wait_until(&mut rx, |m| m.len() == 1).await;

    let sent = session.send("segundo").await.expect("second send");
    let messages = wait_until(&mut rx, |m| m.len() == 2).await;

    assert_eq!(messages.iter().filter(|m| m.id == sent.id).count(), 1);
    assert_eq!(messages.last().map(|m| m.id), Some(sent.id));
    assert_eq!(bodies(&messages), vec!["primero", "segundo"]);
}

#[tokio::test]
async fn test_two_quick_messages_reload_in_order() {
    let fx = fixture();
    let session = fx.customer_session().await;
    let mut rx = session.messages();

    session.send("hola").await.unwrap();
    session.send("qué tal").await.unwrap();

    let messages = wait_until(&mut rx, |m| m.len() == 2).await;
    assert_eq!(bodies(&messages), vec!["hola", "qué tal"]);

    let reloaded = messages::load_messages(fx.backend.as_ref(), fx.thread).await;
    assert_eq!(bodies(&reloaded), vec!["hola", "qué tal"]);
}

#[tokio::test]
async fn test_blank_message_rejected() {
    let fx = fixture();
    let session = fx.customer_session().await;
    assert!(session.send("   \n").await.is_none());
    assert!(fx.memory.rows(MESSAGES_TABLE).is_empty());
}

#[tokio::test]
async fn test_viewer_marks_thread_read() {
    let fx = fixture();
    let customer = fx.customer_session().await;
    customer.send("¿sigue disponible?").await.unwrap();
    settle().await;

    let advisor = fx.advisor_session().await;
    let mut rx = advisor.messages();
    wait_until(&mut rx, |m| m.len() == 1).await;
    settle().await;

    let stored = messages::load_messages(fx.backend.as_ref(), fx.thread).await;
    assert!(stored.iter().all(|m| m.read));
}

#[tokio::test]
async fn test_mark_read_twice_is_stable() {
    let fx = fixture();
    let session = fx.customer_session().await;
    session.send("uno").await.unwrap();
    session.send("dos").await.unwrap();
    settle().await;

    assert!(session.mark_read().await);
    let first = messages::load_messages(fx.backend.as_ref(), fx.thread).await;
    assert!(session.mark_read().await);
    let second = messages::load_messages(fx.backend.as_ref(), fx.thread).await;

    assert_eq!(first, second);
    assert!(second.iter().all(|m| m.read));
}

#[tokio::test]
async fn test_failed_load_is_empty_and_subscription_survives() {
    let fx = fixture();
    fx.memory.fail_table(MESSAGES_TABLE);

    let session = fx.customer_session().await;
    let mut rx = session.messages();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_empty());

    fx.memory.restore_table(MESSAGES_TABLE);
    session.send("de vuelta").await.unwrap();

    let messages = wait_until(&mut rx, |m| m.len() == 1).await;
    assert_eq!(messages[0].body, "de vuelta");
}

#[tokio::test(start_paused = true)]
async fn test_peer_typing_decays_without_refresh() {
    let fx = fixture();
    let customer = fx.customer_session().await;
    let advisor = fx.advisor_session().await;
    settle().await;

    customer.notify_typing(true).await;
    settle().await;
    assert!(advisor.peer_typing());

    tokio::time::advance(Duration::from_millis(2_500)).await;
    settle().await;
    assert!(advisor.peer_typing());

    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert!(!advisor.peer_typing());
}

#[tokio::test(start_paused = true)]
async fn test_sending_clears_typing_without_explicit_false() {
    let fx = fixture();
    let customer = fx.customer_session().await;
    let advisor = fx.advisor_session().await;
    settle().await;

    customer.input_changed("hola, una");
    settle().await;
    tokio::time::advance(Duration::from_millis(350)).await;
    settle().await;
    assert!(advisor.peer_typing());
    assert_eq!(advisor.typing_users(), vec![fx.customer]);

    customer.send("hola, una pregunta").await.unwrap();
    settle().await;
    assert!(!advisor.peer_typing());
    assert!(!customer.peer_typing());
}

#[tokio::test]
async fn test_own_typing_is_not_peer_typing() {
    let fx = fixture();
    let customer = fx.customer_session().await;
    customer.notify_typing(true).await;
    settle().await;
    assert_eq!(customer.typing_users(), vec![fx.customer]);
    assert!(!customer.peer_typing());
}

#[tokio::test]
async fn test_close_tears_down_feeds() {
    let fx = fixture();
    let mut session = fx.customer_session().await;
    settle().await;
    assert_eq!(fx.memory.hub().change_subscribers(), 1);

    session.close();
    settle().await;
    assert_eq!(fx.memory.hub().change_subscribers(), 0);

    drop(session);
    let _second = fx.advisor_session().await;
    settle().await;
    assert_eq!(fx.memory.hub().change_subscribers(), 1);
}

#[tokio::test]
async fn test_advisor_decides_contracts() {
    let fx = fixture();
    fx.memory
        .insert_row(
            PROFILES_TABLE,
            json!({"user_id": fx.advisor, "full_name": "Asesor", "rol": "asesor_comercial"}),
        )
        .unwrap();
    let contracts = ContractService::new(fx.backend.clone());

    let approved = contracts.create(fx.customer, Uuid::new_v4(), 25.0).await.unwrap();
    let rejected = contracts.create(fx.customer, Uuid::new_v4(), 15.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(contracts.approve(fx.advisor, approved.id).await);
    assert!(contracts.reject(fx.advisor, rejected.id).await);

    let after = contracts.get(approved.id).await.unwrap();
    assert_eq!(after.status, ContractStatus::Active);
    assert!(after.updated_at > approved.updated_at);
    assert_eq!(
        contracts.get(rejected.id).await.unwrap().status,
        ContractStatus::Cancelled
    );

    assert!(!contracts.approve(fx.customer, rejected.id).await);
}
