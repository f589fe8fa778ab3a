use reqwest::{header::AUTHORIZATION, Client};
use serde::Deserialize;
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::{socket::endpoint, LinkEnd, TransportEvent};
use crate::credential::Credential;

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    session_id: String,
}

pub(crate) struct PollingLink {
    http: Client,
    session_url: Url,
    authorization: String,
}

pub(crate) async fn connect(
    http: &Client,
    base: &Url,
    credential: &Credential,
) -> Result<PollingLink, String> {
    let authorization = credential.bearer_header();
    let handshake: HandshakeResponse = http
        .post(endpoint(base, "poll/handshake"))
        .header(AUTHORIZATION, &authorization)
        .send()
        .await
        .and_then(|res| res.error_for_status())
        .map_err(|err| format!("polling handshake failed: {err}"))?
        .json()
        .await
        .map_err(|err| format!("invalid polling handshake response: {err}"))?;

    Ok(PollingLink {
        http: http.clone(),
        session_url: endpoint(base, &format!("poll/{}", handshake.session_id)),
        authorization,
    })
}

impl PollingLink {
    pub(crate) async fn run(
        self,
        commands: &mut mpsc::UnboundedReceiver<ClientRequest>,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> LinkEnd {
        let (batches_tx, mut batches_rx) = mpsc::channel(16);
        let poller = tokio::spawn(poll_loop(
            self.http.clone(),
            self.session_url.clone(),
            self.authorization.clone(),
            batches_tx,
        ));

        let end = 'link: loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(request) => {
                        if let Err(err) = self.post(&request).await {
                            break LinkEnd::Dropped(err);
                        }
                    }
                    None => break LinkEnd::Released,
                },
                batch = batches_rx.recv() => match batch {
                    Some(Ok(frames)) => {
                        for event in frames {
                            if events.send(TransportEvent::Inbound(event)).is_err() {
                                break 'link LinkEnd::Released;
                            }
                        }
                    }
                    Some(Err(reason)) => break LinkEnd::Dropped(reason),
                    None => break LinkEnd::Dropped("polling loop stopped".into()),
                },
            }
        };

        poller.abort();
        end
    }

    async fn post(&self, request: &ClientRequest) -> Result<(), String> {
        debug!(event = request.name(), "transport: polling emit");
        self.http
            .post(self.session_url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .json(request)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| format!("polling send failed: {err}"))?;
        Ok(())
    }
}

async fn poll_loop(
    http: Client,
    session_url: Url,
    authorization: String,
    batches: mpsc::Sender<Result<Vec<ServerEvent>, String>>,
) {
    loop {
        let batch = poll_once(&http, &session_url, &authorization).await;
        let failed = batch.is_err();
        if batches.send(batch).await.is_err() || failed {
            return;
        }
    }
}

async fn poll_once(
    http: &Client,
    session_url: &Url,
    authorization: &str,
) -> Result<Vec<ServerEvent>, String> {
    let frames: Vec<serde_json::Value> = http
        .get(session_url.clone())
        .header(AUTHORIZATION, authorization)
        .send()
        .await
        .and_then(|res| res.error_for_status())
        .map_err(|err| format!("polling receive failed: {err}"))?
        .json()
        .await
        .map_err(|err| format!("invalid polling batch: {err}"))?;

    Ok(frames
        .into_iter()
        .filter_map(|frame| match serde_json::from_value::<ServerEvent>(frame) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("transport: ignoring invalid server frame: {err}");
                None
            }
        })
        .collect())
}
