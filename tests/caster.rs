//! NTRIP handshake and streaming scenarios against an in-process caster.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use rtklink::{CorrectionClient, CorrectionSettings, GnssError};

/// Build a synthetic RTCM frame; the scanner reads only the header.
fn rtcm_frame(message_type: u16, payload_len: usize) -> Vec<u8> {
    assert!(payload_len >= 2);
    let mut frame = vec![0xD3];
    frame.extend_from_slice(&(payload_len as u16).to_be_bytes());
    frame.push((message_type >> 4) as u8);
    frame.push(((message_type & 0x0F) as u8) << 4);
    frame.extend(std::iter::repeat_n(0x55, payload_len - 2));
    frame.extend_from_slice(&[0, 0, 0]);
    frame
}

fn config(port: u16) -> CorrectionSettings {
    CorrectionSettings {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port,
        mountpoint: "TEST00".to_string(),
        username: Some("rover".to_string()),
        password: Some("secret".to_string()),
        filter_message_types: None,
        silence_timeout_secs: 1,
    }
}

/// Spawn a single-connection caster that sends `response` after reading the
/// request head, then returns the request it saw.
async fn spawn_caster(response: Vec<u8>) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") || n == 0 {
                break;
            }
        }
        socket.write_all(&response).await.unwrap();
        // Hold the socket open long enough for the client to read.
        tokio::time::sleep(Duration::from_millis(500)).await;
        String::from_utf8_lossy(&request).to_string()
    });

    (port, handle)
}

#[tokio::test]
async fn handshake_and_streaming_preserve_byte_order() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut response = b"ICY 200 OK\r\n\r\n".to_vec();
    let mut corrections = rtcm_frame(1005, 19);
    corrections.extend(rtcm_frame(1077, 48));
    corrections.extend(rtcm_frame(1087, 44));
    response.extend_from_slice(&corrections);

    let (port, caster) = spawn_caster(response).await;
    let mut client = CorrectionClient::new(config(port));

    let mut stream = client.connect().await.expect("handshake should succeed");

    let mut received = Vec::new();
    let mut types = Vec::new();
    while received.len() < corrections.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next_chunk())
            .await
            .expect("chunk within timeout")
            .expect("stream healthy");
        received.extend_from_slice(&chunk.data);
        types.extend(chunk.message_types);
    }

    // RTCM semantics require byte-order preservation.
    assert_eq!(received, corrections);
    assert_eq!(types, vec![1005, 1077, 1087]);
    assert_eq!(stream.stats().messages_forwarded, 3);

    let request = caster.await.unwrap();
    assert!(request.starts_with("GET /TEST00 HTTP/1.1\r\n"));
    assert!(request.contains("Authorization: Basic cm92ZXI6c2VjcmV0"));
    assert!(request.contains("Ntrip-Version"));
}

#[tokio::test]
async fn type_filter_drops_unwanted_messages() {
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: gnss/data\r\n\r\n".to_vec();
    response.extend(rtcm_frame(1005, 19));
    response.extend(rtcm_frame(1008, 24)); // antenna descriptor, not wanted
    response.extend(rtcm_frame(1097, 52));

    let (port, _caster) = spawn_caster(response).await;
    let mut settings = config(port);
    settings.filter_message_types = Some(BTreeSet::from([1005, 1097]));
    let mut client = CorrectionClient::new(settings);

    let mut stream = client.connect().await.unwrap();
    let mut types = Vec::new();
    while types.len() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next_chunk())
            .await
            .unwrap()
            .unwrap();
        types.extend(chunk.message_types);
    }

    assert_eq!(types, vec![1005, 1097]);
    assert_eq!(stream.stats().messages_seen, 3);
    assert_eq!(stream.stats().messages_forwarded, 2);
}

#[tokio::test]
async fn unauthorized_response_is_authentication_failed() {
    let (port, _caster) =
        spawn_caster(b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic\r\n\r\n".to_vec())
            .await;
    let mut client = CorrectionClient::new(config(port));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, GnssError::AuthenticationFailed { mountpoint } if mountpoint == "TEST00"));
}

#[tokio::test]
async fn sourcetable_response_is_mountpoint_not_found() {
    let body = b"SOURCETABLE 200 OK\r\nContent-Type: text/plain\r\n\r\nSTR;OTHER;...\r\nENDSOURCETABLE\r\n";
    let (port, _caster) = spawn_caster(body.to_vec()).await;
    let mut client = CorrectionClient::new(config(port));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, GnssError::MountpointNotFound { .. }));
}

#[tokio::test]
async fn html_error_page_never_becomes_a_silent_stream() {
    let body =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body>No such stream</body></html>";
    let (port, _caster) = spawn_caster(body.to_vec()).await;
    let mut client = CorrectionClient::new(config(port));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, GnssError::MountpointNotFound { .. }));
}

#[tokio::test]
async fn refused_connection_is_caster_unreachable() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = CorrectionClient::new(config(port));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, GnssError::CasterUnreachable { .. }));
}

#[tokio::test]
async fn silent_stream_stalls_after_timeout() {
    // Caster accepts, completes the handshake, then goes quiet while
    // keeping the connection open -- the transport never reports a fault,
    // so silence is the only failure signal.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _caster = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        socket.write_all(b"ICY 200 OK\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    let mut client = CorrectionClient::new(config(port));

    let mut stream = client.connect().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(3), stream.next_chunk())
        .await
        .expect("stall must be detected within the silence timeout")
        .unwrap_err();

    assert!(matches!(err, GnssError::StreamStalled { .. }));
}
