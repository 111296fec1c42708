//! NTRIP caster client.
//!
//! Speaks just enough of the NTRIP protocol to be a rover: one GET against a
//! configured mountpoint with optional basic auth, then a raw RTCM3 byte
//! stream until something breaks. Casters are a motley fleet -- some answer
//! `ICY 200 OK`, some proper HTTP, some an HTML error page with a 200 status
//! -- so handshake classification looks at the whole response head, not just
//! the status line. Sourcetable browsing is out of scope: a sourcetable in
//! response to a mountpoint request just means the mountpoint does not
//! exist.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{GnssError, Result};
use crate::settings::CorrectionSettings;
use crate::types::correction::{CorrectionChunk, CorrectionStats, RtcmScanner};

/// Time allowed for TCP connect and the handshake exchange.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the response head before we classify it as garbage.
const MAX_RESPONSE_HEAD: usize = 4096;

/// Caster connection lifecycle, owned and mutated only by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasterState {
    Disconnected,
    Handshaking,
    Authenticated,
    Streaming,
    Failed,
}

/// NTRIP client for one configured mountpoint.
pub struct CorrectionClient {
    config: CorrectionSettings,
    state: CasterState,
}

impl CorrectionClient {
    pub fn new(config: CorrectionSettings) -> Self {
        Self { config, state: CasterState::Disconnected }
    }

    pub fn state(&self) -> CasterState {
        self.state
    }

    /// Note that a previously returned stream has ended.
    pub fn mark_disconnected(&mut self) {
        self.state = CasterState::Disconnected;
    }

    /// Dial the caster, perform the mountpoint handshake, and return the
    /// streaming half.
    pub async fn connect(&mut self) -> Result<CorrectionStream> {
        self.state = CasterState::Handshaking;
        match self.handshake().await {
            Ok(stream) => {
                self.state = CasterState::Streaming;
                Ok(stream)
            }
            Err(e) => {
                self.state = CasterState::Failed;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<CorrectionStream> {
        let host = self.config.host.clone();
        let port = self.config.port;
        info!(%host, port, mountpoint = %self.config.mountpoint, "connecting to NTRIP caster");

        let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(GnssError::caster_unreachable(host, port, Some(e))),
            Err(_) => return Err(GnssError::caster_unreachable(host, port, None)),
        };

        let request = build_request(&self.config);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| GnssError::caster_unreachable(&self.config.host, port, Some(e)))?;

        // Accumulate the response head up to the blank line. Casters that
        // stream immediately after `ICY 200 OK` are handled by classifying
        // once a full first line is present and the read stalls.
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        let body_start = loop {
            if let Some(pos) = find_subslice(&head, b"\r\n\r\n") {
                break pos + 4;
            }
            if head.len() > MAX_RESPONSE_HEAD {
                break head.len();
            }

            match timeout(CONNECT_TIMEOUT, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break head.len(),
                Ok(Ok(n)) => head.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => {
                    return Err(GnssError::caster_unreachable(&self.config.host, port, Some(e)));
                }
                Err(_) if find_subslice(&head, b"\r\n").is_some() => break head.len(),
                Err(_) => {
                    return Err(GnssError::caster_unreachable(&self.config.host, port, None));
                }
            }
        };

        classify_response(&head, &self.config.mountpoint)?;
        self.state = CasterState::Authenticated;
        debug!("caster accepted mountpoint request, correction stream live");

        // Bytes past the header already belong to the RTCM stream.
        let mut scanner = RtcmScanner::new(self.config.filter_message_types.clone());
        let leftover = head.get(body_start.min(head.len())..).unwrap_or_default();
        let pending = scanner.scan(leftover);

        Ok(CorrectionStream {
            stream,
            scanner,
            silence_timeout: self.config.silence_timeout(),
            pending,
        })
    }
}

/// The streaming half of a caster connection.
#[derive(Debug)]
pub struct CorrectionStream {
    stream: TcpStream,
    scanner: RtcmScanner,
    silence_timeout: Duration,
    /// Chunk assembled from bytes that arrived with the handshake response.
    pending: Option<CorrectionChunk>,
}

impl CorrectionStream {
    /// Wait for the next batch of forwardable correction bytes.
    ///
    /// Silence past the configured timeout yields `StreamStalled` -- the
    /// transport may never report a dead peer on its own, so absence of data
    /// is the primary failure signal.
    pub async fn next_chunk(&mut self) -> Result<CorrectionChunk> {
        if let Some(chunk) = self.pending.take() {
            return Ok(chunk);
        }

        let mut buf = [0u8; 2048];
        loop {
            let n = match timeout(self.silence_timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    warn!("caster closed the correction stream");
                    return Err(GnssError::io(
                        "caster closed connection",
                        std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                    ));
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(GnssError::io("reading correction stream", e)),
                Err(_) => return Err(GnssError::stream_stalled(self.silence_timeout)),
            };

            // Filtered-out frames produce no chunk; keep reading.
            if let Some(chunk) = self.scanner.scan(&buf[..n]) {
                return Ok(chunk);
            }
        }
    }

    pub fn stats(&self) -> &CorrectionStats {
        self.scanner.stats()
    }
}

/// Build the NTRIP mountpoint request.
fn build_request(config: &CorrectionSettings) -> String {
    let mut request = format!(
        "GET /{} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Ntrip-Version: Ntrip/2.0\r\n\
         User-Agent: NTRIP rtklink/{}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n",
        config.mountpoint,
        config.host,
        config.port,
        env!("CARGO_PKG_VERSION"),
    );

    if let Some(username) = &config.username {
        let password = config.password.as_deref().unwrap_or_default();
        let credentials = BASE64.encode(format!("{username}:{password}"));
        request.push_str(&format!("Authorization: Basic {credentials}\r\n"));
    }

    request.push_str("\r\n");
    request
}

/// Decide what the caster's response head means.
fn classify_response(head: &[u8], mountpoint: &str) -> Result<()> {
    let text = String::from_utf8_lossy(head);
    let lower = text.to_lowercase();
    let first_line = text.lines().next().unwrap_or_default();

    if first_line.starts_with("ICY 200")
        || (first_line.starts_with("HTTP/1.") && first_line.contains(" 200"))
    {
        // An HTML body behind a 200 status is an error page in disguise,
        // never a correction stream.
        if lower.contains("<html") || lower.contains("<!doctype") {
            return Err(GnssError::MountpointNotFound { mountpoint: mountpoint.to_string() });
        }
        return Ok(());
    }

    if first_line.starts_with("SOURCETABLE") {
        // The caster fell back to its sourcetable: the mountpoint is unknown.
        return Err(GnssError::MountpointNotFound { mountpoint: mountpoint.to_string() });
    }

    if first_line.contains(" 401") || first_line.contains(" 403") || lower.contains("unauthorized")
    {
        return Err(GnssError::AuthenticationFailed { mountpoint: mountpoint.to_string() });
    }

    Err(GnssError::MountpointNotFound { mountpoint: mountpoint.to_string() })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_auth() -> CorrectionSettings {
        CorrectionSettings {
            enabled: true,
            host: "caster.example.net".to_string(),
            port: 2101,
            mountpoint: "MOUNT1".to_string(),
            username: Some("rover".to_string()),
            password: Some("secret".to_string()),
            ..CorrectionSettings::default()
        }
    }

    #[test]
    fn request_names_mountpoint_and_credentials() {
        let request = build_request(&config_with_auth());
        assert!(request.starts_with("GET /MOUNT1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: caster.example.net:2101\r\n"));
        // "rover:secret"
        assert!(request.contains("Authorization: Basic cm92ZXI6c2VjcmV0\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_without_credentials_omits_auth_header() {
        let mut config = config_with_auth();
        config.username = None;
        config.password = None;
        let request = build_request(&config);
        assert!(!request.contains("Authorization"));
    }

    #[test]
    fn icy_and_http_success_preambles_are_accepted() {
        assert!(classify_response(b"ICY 200 OK\r\n\r\n", "M").is_ok());
        assert!(classify_response(b"HTTP/1.1 200 OK\r\nContent-Type: gnss/data\r\n\r\n", "M").is_ok());
    }

    #[test]
    fn unauthorized_status_is_authentication_failure() {
        for head in [
            b"HTTP/1.1 401 Unauthorized\r\n\r\n".as_slice(),
            b"HTTP/1.0 403 Forbidden\r\n\r\n".as_slice(),
        ] {
            assert!(matches!(
                classify_response(head, "M"),
                Err(GnssError::AuthenticationFailed { .. })
            ));
        }
    }

    #[test]
    fn sourcetable_fallback_means_unknown_mountpoint() {
        let head = b"SOURCETABLE 200 OK\r\nContent-Type: text/plain\r\n\r\nSTR;...";
        assert!(matches!(
            classify_response(head, "MOUNT1"),
            Err(GnssError::MountpointNotFound { mountpoint }) if mountpoint == "MOUNT1"
        ));
    }

    #[test]
    fn html_error_page_is_never_a_silent_stream() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body>error</body></html>";
        assert!(matches!(
            classify_response(head, "M"),
            Err(GnssError::MountpointNotFound { .. })
        ));

        let head = b"HTTP/1.1 404 Not Found\r\n\r\n";
        assert!(matches!(
            classify_response(head, "M"),
            Err(GnssError::MountpointNotFound { .. })
        ));
    }
}
