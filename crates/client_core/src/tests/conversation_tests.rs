use shared::{
    domain::{MessageId, UserId},
    protocol::{ClientRequest, MessagePayload, ServerEvent},
};

use super::*;
use crate::{
    config::ClientConfig,
    credential::{Credential, MemoryCredentialStore},
    error::ClientError,
    test_support::{alice, bob, payload, settle, MockConnector, OpenBehavior},
    transport::TransportEvent,
};

async fn connected_client() -> (Arc<RealtimeClient>, Arc<MockConnector>) {
    let connector = MockConnector::new(OpenBehavior::Connect);
    let client = RealtimeClient::new_with_dependencies(
        ClientConfig::default(),
        Arc::new(MemoryCredentialStore::new(Some(Credential::new("token")))),
        connector.clone(),
    );
    client.connect().await.expect("connect");
    (client, connector)
}

async fn open_session(
    client: &Arc<RealtimeClient>,
    connector: &MockConnector,
    history: Vec<MessagePayload>,
) -> ConversationSession {
    let opening = tokio::spawn(ConversationSession::open(Arc::clone(client), alice(), bob()));
    settle().await;
    connector
        .last_link()
        .push(TransportEvent::Inbound(ServerEvent::ChatHistory {
            other_user_id: bob().id,
            messages: history,
        }));
    opening.await.expect("join").expect("open")
}

#[tokio::test(start_paused = true)]
async fn open_requests_and_applies_history() {
    let (client, connector) = connected_client().await;
    let session = open_session(
        &client,
        &connector,
        vec![
            payload(1, &alice(), &bob(), "hey"),
            payload(2, &bob(), &alice(), "hello"),
        ],
    )
    .await;

    assert_eq!(
        connector.last_link().handle.sent(),
        vec![ClientRequest::GetChatHistory {
            other_user_id: UserId(2),
            limit: 50,
        }]
    );
    let texts: Vec<_> = session.snapshot().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["hey", "hello"]);
}

#[tokio::test(start_paused = true)]
async fn sent_message_is_confirmed_in_place() {
    let (client, connector) = connected_client().await;
    let session = open_session(&client, &connector, Vec::new()).await;

    let provisional = session.send("hi").await.expect("send");
    assert!(provisional.provisional);
    assert_eq!(session.snapshot().len(), 1);

    connector
        .last_link()
        .push(TransportEvent::Inbound(ServerEvent::MessageSent(payload(
            77,
            &alice(),
            &bob(),
            "hi",
        ))));
    settle().await;

    let entries = session.snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].server_id(), Some(MessageId(77)));
    assert!(!entries[0].provisional);
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_from_the_other_party_are_appended() {
    let (client, connector) = connected_client().await;
    let session = open_session(&client, &connector, Vec::new()).await;
    let carol = UserRef::new(UserId(3), "carol");
    let link = connector.last_link();

    link.push(TransportEvent::Inbound(ServerEvent::ReceiveMessage(payload(
        5,
        &carol,
        &alice(),
        "elsewhere",
    ))));
    link.push(TransportEvent::Inbound(ServerEvent::ReceiveMessage(payload(
        6,
        &bob(),
        &alice(),
        "here",
    ))));
    settle().await;

    let entries = session.snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "here");
}

#[tokio::test(start_paused = true)]
async fn failed_send_rolls_back_the_provisional_entry() {
    let (client, connector) = connected_client().await;
    let session = open_session(&client, &connector, Vec::new()).await;
    client.disconnect().await;

    assert_eq!(session.send("lost").await, Err(ClientError::NotConnected));
    assert!(session.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_text_never_reaches_the_view() {
    let (client, connector) = connected_client().await;
    let session = open_session(&client, &connector, Vec::new()).await;

    assert!(matches!(
        session.send("   ").await,
        Err(ClientError::InvalidMessage(_))
    ));
    assert!(session.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closing_the_session_deregisters_its_listener() {
    let (client, connector) = connected_client().await;
    let session = open_session(&client, &connector, Vec::new()).await;
    assert_eq!(client.dispatcher.message_listener_count(), 1);

    session.close();

    assert_eq!(client.dispatcher.message_listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_open_leaves_no_listener_behind() {
    let (client, _connector) = connected_client().await;
    client.disconnect().await;

    let opened = ConversationSession::open(Arc::clone(&client), alice(), bob()).await;

    assert!(matches!(opened, Err(ClientError::NotConnected)));
    assert_eq!(client.dispatcher.message_listener_count(), 0);
}
