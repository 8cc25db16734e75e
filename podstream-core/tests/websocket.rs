//! End-to-end test: the WebSocket connector against a local
//! tokio-tungstenite server on localhost.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use podstream_core::{
    SessionManager, SessionOptions, SessionState, SessionTarget, StaticTokenSource, WsConnector,
};
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

#[tokio::test]
async fn test_terminal_session_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut path = String::new();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_owned();
                Ok(resp)
            },
        )
        .await
        .unwrap();
        let (mut sink, mut stream) = ws.split();

        let token = stream.next().await.unwrap().unwrap();
        sink.send(Message::Text("hello".into())).await.unwrap();

        let input = stream.next().await.unwrap().unwrap();
        let resize = stream.next().await.unwrap().unwrap();
        let close = stream.next().await.unwrap().unwrap();

        // Keep polling so the close reply is flushed.
        while let Some(Ok(_)) = stream.next().await {}

        (path, token, input, resize, close)
    });

    let connector = WsConnector::new(&format!("http://{addr}")).unwrap();
    let session = SessionManager::new(
        SessionTarget::terminal("web-0"),
        Arc::new(connector),
        SessionOptions {
            auth_grace_ms: 2_000,
            ..Default::default()
        },
    );

    assert_ok!(session.open(Arc::new(StaticTokenSource::new("secret"))).await);
    assert_eq!(session.state(), SessionState::Streaming);

    let hello = tokio::time::timeout(Duration::from_secs(5), session.next_output())
        .await
        .expect("timeout")
        .expect("output ended");
    assert_eq!(hello.data, "hello");

    assert_ok!(session.send_input("ls\r").await);
    assert_ok!(session.resize(80, 24).await);
    assert_ok!(session.close().await);
    assert_eq!(session.state(), SessionState::Closed);

    let (path, token, input, resize, close) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("timeout")
        .unwrap();

    assert_eq!(path, "/api/ws/terminal/web-0");
    assert_eq!(token, Message::Text("secret".into()));
    assert_eq!(input, Message::Binary(b"ls\r".to_vec()));
    assert_eq!(
        resize,
        Message::Text(r#"{"type":"resize","cols":80,"rows":24}"#.into())
    );
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason, "session closed");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let connector = WsConnector::new(&format!("http://{addr}")).unwrap();
    let mut options = SessionOptions::default();
    options.reconnect.terminal_max_attempts = Some(0);

    let session = SessionManager::new(SessionTarget::terminal("web-0"), Arc::new(connector), options);
    let err = session
        .open(Arc::new(StaticTokenSource::new("secret")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        podstream_core::StreamError::ReconnectExhausted { attempts: 0 }
    ));
    assert_eq!(session.state(), SessionState::Failed);
}
