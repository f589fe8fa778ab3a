use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use super::{socket::endpoint, LinkEnd, TransportEvent};
use crate::credential::Credential;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn websocket_url(base: &Url) -> Result<Url, String> {
    let mut url = endpoint(base, "ws");
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(format!("unsupported server scheme '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot derive websocket url from {base}"))?;
    Ok(url)
}

pub(crate) async fn connect(base: &Url, credential: &Credential) -> Result<WsStream, String> {
    let url = websocket_url(base)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| format!("failed to build websocket request: {err}"))?;
    let header = HeaderValue::from_str(&credential.bearer_header())
        .map_err(|_| "credential is not a valid header value".to_string())?;
    request.headers_mut().insert(AUTHORIZATION, header);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|err| format!("websocket handshake with {url} failed: {err}"))?;
    Ok(stream)
}

pub(crate) async fn run(
    stream: WsStream,
    commands: &mut mpsc::UnboundedReceiver<ClientRequest>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> LinkEnd {
    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(request) => {
                    let frame = match serde_json::to_string(&request) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(event = request.name(), "transport: failed to encode frame: {err}");
                            continue;
                        }
                    };
                    debug!(event = request.name(), "transport: websocket emit");
                    if let Err(err) = writer.send(Message::Text(frame)).await {
                        return LinkEnd::Dropped(format!("websocket send failed: {err}"));
                    }
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return LinkEnd::Released;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if events.send(TransportEvent::Inbound(event)).is_err() {
                            return LinkEnd::Released;
                        }
                    }
                    Err(err) => warn!("transport: ignoring invalid server frame: {err}"),
                },
                Some(Ok(Message::Close(_))) => {
                    return LinkEnd::Dropped("websocket closed by server".into());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return LinkEnd::Dropped(format!("websocket receive failed: {err}"));
                }
                None => return LinkEnd::Dropped("websocket stream ended".into()),
            },
        }
    }
}
