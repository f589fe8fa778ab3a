use std::time::Duration;

use anyhow::anyhow;
use shared::{
    domain::{MessageId, UserRef},
    error::ApiError,
    protocol::MessagePayload,
};

use super::*;
use crate::{
    test_support::{
        alice, bob, payload, settle, ConnectionRecorder, MockConnector, OpenBehavior,
        RecordingListener,
    },
    transport::TransportEvent,
};

fn client_with(behavior: OpenBehavior) -> (Arc<RealtimeClient>, Arc<MockConnector>) {
    let connector = MockConnector::new(behavior);
    let client = RealtimeClient::new_with_dependencies(
        ClientConfig::default(),
        Arc::new(MemoryCredentialStore::new(Some(Credential::new("token")))),
        connector.clone(),
    );
    (client, connector)
}

async fn connected() -> (Arc<RealtimeClient>, Arc<MockConnector>) {
    let (client, connector) = client_with(OpenBehavior::Connect);
    client.connect().await.expect("connect");
    (client, connector)
}

fn inbound(connector: &MockConnector, event: ServerEvent) {
    connector.last_link().push(TransportEvent::Inbound(event));
}

fn history(other: &UserRef, messages: Vec<MessagePayload>) -> ServerEvent {
    ServerEvent::ChatHistory {
        other_user_id: other.id,
        messages,
    }
}

#[tokio::test(start_paused = true)]
async fn send_before_connect_fails_without_io() {
    let (client, connector) = client_with(OpenBehavior::Connect);

    assert_eq!(
        client.send_message(bob().id, "hello").await,
        Err(ClientError::NotConnected)
    );
    assert_eq!(connector.open_count(), 0);
    assert!(!client.connection_status());
}

#[tokio::test(start_paused = true)]
async fn send_emits_a_send_message_request() {
    let (client, connector) = connected().await;

    client.send_message(bob().id, "hello").await.expect("send");

    assert_eq!(
        connector.last_link().handle.sent(),
        vec![ClientRequest::SendMessage {
            to_user_id: bob().id,
            message: "hello".into(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn message_text_is_validated() {
    let (client, connector) = connected().await;

    assert!(matches!(
        client.send_message(bob().id, "").await,
        Err(ClientError::InvalidMessage(_))
    ));
    let too_long = "x".repeat(MAX_MESSAGE_CHARS + 1);
    assert!(matches!(
        client.send_message(bob().id, &too_long).await,
        Err(ClientError::InvalidMessage(_))
    ));
    let at_limit = "é".repeat(MAX_MESSAGE_CHARS);
    client
        .send_message(bob().id, &at_limit)
        .await
        .expect("a message at the limit is accepted");

    assert_eq!(connector.last_link().handle.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn history_is_returned_oldest_first() {
    let (client, connector) = connected().await;
    let request = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_chat_history(bob().id, None).await })
    };
    settle().await;

    assert_eq!(
        connector.last_link().handle.sent(),
        vec![ClientRequest::GetChatHistory {
            other_user_id: bob().id,
            limit: 50,
        }]
    );
    inbound(
        &connector,
        history(
            &bob(),
            vec![
                payload(1, &alice(), &bob(), "first"),
                payload(2, &bob(), &alice(), "second"),
            ],
        ),
    );

    let messages = request.await.expect("join").expect("history");
    let ids: Vec<_> = messages.iter().filter_map(ChatMessage::server_id).collect();
    assert_eq!(ids, [MessageId(1), MessageId(2)]);
    assert!(messages.iter().all(|m| !m.provisional));
}

#[tokio::test(start_paused = true)]
async fn history_limit_is_passed_through() {
    let (client, connector) = connected().await;
    let request = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_chat_history(bob().id, Some(10)).await })
    };
    settle().await;
    inbound(&connector, history(&bob(), Vec::new()));

    assert_eq!(request.await.expect("join"), Ok(Vec::new()));
    assert_eq!(
        connector.last_link().handle.sent(),
        vec![ClientRequest::GetChatHistory {
            other_user_id: bob().id,
            limit: 10,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_history_times_out_and_late_reply_is_ignored() {
    let (client, connector) = connected().await;
    let started = tokio::time::Instant::now();

    assert_eq!(
        client.get_chat_history(bob().id, None).await,
        Err(ClientError::RequestTimeout)
    );
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.pending_requests(), 0);

    inbound(&connector, history(&bob(), Vec::new()));
    settle().await;
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn server_error_fails_the_history_request() {
    let (client, connector) = connected().await;
    let mut events = client.subscribe_events();
    let request = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_chat_history(bob().id, None).await })
    };
    settle().await;

    inbound(&connector, ServerEvent::Error(ApiError::new("user not found")));

    assert_eq!(
        request.await.expect("join"),
        Err(ClientError::Server("user not found".into()))
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ClientEvent::ServerError("user not found".into())
    );
}

#[tokio::test(start_paused = true)]
async fn failing_listener_does_not_starve_the_others() {
    let (client, connector) = connected().await;
    client.add_message_listener(Arc::new(|_: &ChatMessage| -> anyhow::Result<()> {
        Err(anyhow!("always fails"))
    }));
    let recorder = Arc::new(RecordingListener::default());
    client.add_message_listener(recorder.clone());

    for id in 1..=5 {
        inbound(
            &connector,
            ServerEvent::ReceiveMessage(payload(id, &bob(), &alice(), "ping")),
        );
    }
    settle().await;

    assert_eq!(recorder.received_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn fifty_confirmed_sends_reconcile_without_residue() {
    let (client, connector) = connected().await;
    let opening = tokio::spawn(ConversationSession::open(Arc::clone(&client), alice(), bob()));
    settle().await;
    inbound(&connector, history(&bob(), Vec::new()));
    let session = opening.await.expect("join").expect("open");

    for n in 0..50 {
        session.send(&format!("message {n}")).await.expect("send");
    }
    for n in 0..50 {
        inbound(
            &connector,
            ServerEvent::MessageSent(payload(1000 + n, &alice(), &bob(), &format!("message {n}"))),
        );
    }
    settle().await;

    let entries = session.snapshot();
    assert_eq!(entries.len(), 50);
    assert!(entries.iter().all(|m| !m.provisional));
    let mut ids: Vec<_> = entries.iter().filter_map(ChatMessage::server_id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn connection_changes_reach_listeners_and_subscribers() {
    let (client, _connector) = client_with(OpenBehavior::Connect);
    let recorder = Arc::new(ConnectionRecorder::default());
    let handle: Arc<dyn ConnectionListener> = recorder.clone();
    assert!(client.add_connection_listener(Arc::clone(&handle)));
    let mut events = client.subscribe_events();

    client.connect().await.expect("connect");
    client.disconnect().await;
    assert!(client.remove_connection_listener(&handle));
    client.connect().await.expect("connect again");

    assert_eq!(recorder.seen(), vec![true, false]);
    assert_eq!(
        events.recv().await.expect("event"),
        ClientEvent::ConnectionChanged(true)
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ClientEvent::ConnectionChanged(false)
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ClientEvent::ConnectionChanged(true)
    );
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_reopens_the_transport() {
    let (client, connector) = connected().await;

    client.force_reconnect().await.expect("reconnect");

    assert_eq!(connector.open_count(), 2);
    assert!(connector.link(0).handle.is_closed());
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_reported() {
    let (client, _connector) = client_with(OpenBehavior::Fail("no route".into()));

    assert_eq!(
        client.connect().await,
        Err(ClientError::Connect("no route".into()))
    );
    assert!(!client.connection_status());
}
