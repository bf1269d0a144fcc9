use std::{io::ErrorKind, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

const PACKET_AUTH: i32 = 3;
const PACKET_EXEC: i32 = 2;
const PACKET_AUTH_RESPONSE: i32 = 2;

// Minecraft caps server->client bodies at 4096 bytes; anything far beyond
// that is a framing error, not a reply.
const MAX_PACKET_LEN: i32 = 64 * 1024;
const MIN_PACKET_LEN: i32 = 10;
// Servers may interleave empty RESPONSE_VALUE packets before the one we want.
const MAX_SKIPPED_PACKETS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RconError {
    #[error("RCON password is not configured")]
    AuthMissing,
    #[error("RCON connection to {addr} failed: {reason} (server might be down or not responding)")]
    ConnectionRefused { addr: String, reason: String },
    #[error("failed to dial RCON at {addr}: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("RCON authentication failed: {0}")]
    AuthFailed(String),
    #[error("RCON command {command:?} failed: {reason}")]
    CommandFailed { command: String, reason: String },
    #[error("unexpected RCON response to {command:?}: {response:?}")]
    MalformedResponse { command: String, response: String },
}

impl RconError {
    pub fn kind(&self) -> &'static str {
        match self {
            RconError::AuthMissing => "auth_missing",
            RconError::ConnectionRefused { .. } => "connection_refused",
            RconError::DialFailed { .. } => "dial_failed",
            RconError::AuthFailed(_) => "auth_failed",
            RconError::CommandFailed { .. } => "command_failed",
            RconError::MalformedResponse { .. } => "malformed_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

pub fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let len = (4 + 4 + body.len() + 2) as i32;
    let mut buf = Vec::with_capacity(len as usize + 4);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Packet> {
    let len = r.read_i32_le().await?;
    if !(MIN_PACKET_LEN..=MAX_PACKET_LEN).contains(&len) {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid RCON packet length {len}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;

    let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let body = &buf[8..];
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    Ok(Packet {
        id,
        kind,
        body: String::from_utf8_lossy(&body[..end]).into_owned(),
    })
}

/// Extracts the online count from a `list` reply.
///
/// Handles both `There are 2/20 players online: ...` and the newer
/// `There are 2 of a max of 20 players online: ...`.
pub fn parse_player_count(response: &str) -> Option<u32> {
    if !response.contains("players online") {
        return None;
    }
    let (_, rest) = response.split_once("There are ")?;
    let token = rest.split_whitespace().next()?;
    token.split('/').next()?.parse().ok()
}

pub struct RconConnection {
    stream: TcpStream,
    next_id: i32,
    io_timeout: Duration,
}

impl RconConnection {
    pub async fn dial(addr: &str, timeout: Duration) -> Result<Self, RconError> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Err(_) => Err(RconError::ConnectionRefused {
                addr: addr.to_string(),
                reason: "dial timeout".to_string(),
            }),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                Err(RconError::ConnectionRefused {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => Err(RconError::DialFailed {
                addr: addr.to_string(),
                source: e,
            }),
            Ok(Ok(stream)) => Ok(Self {
                stream,
                next_id: 1,
                io_timeout: timeout,
            }),
        }
    }

    async fn send(&mut self, kind: i32, body: &str) -> std::io::Result<i32> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let buf = encode_packet(id, kind, body);
        tokio::time::timeout(self.io_timeout, self.stream.write_all(&buf))
            .await
            .map_err(|_| std::io::Error::new(ErrorKind::TimedOut, "write timed out"))??;
        Ok(id)
    }

    async fn recv(&mut self) -> std::io::Result<Packet> {
        tokio::time::timeout(self.io_timeout, read_packet(&mut self.stream))
            .await
            .map_err(|_| std::io::Error::new(ErrorKind::TimedOut, "read timed out"))?
    }

    pub async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let id = self
            .send(PACKET_AUTH, password)
            .await
            .map_err(|e| RconError::AuthFailed(e.to_string()))?;

        for _ in 0..MAX_SKIPPED_PACKETS {
            let p = self
                .recv()
                .await
                .map_err(|e| RconError::AuthFailed(e.to_string()))?;
            if p.kind != PACKET_AUTH_RESPONSE {
                continue;
            }
            if p.id == -1 {
                return Err(RconError::AuthFailed("password rejected".to_string()));
            }
            if p.id == id {
                return Ok(());
            }
        }
        Err(RconError::AuthFailed("no auth response".to_string()))
    }

    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        let failed = |reason: String| RconError::CommandFailed {
            command: command.to_string(),
            reason,
        };

        let id = self
            .send(PACKET_EXEC, command)
            .await
            .map_err(|e| failed(e.to_string()))?;
        for _ in 0..MAX_SKIPPED_PACKETS {
            let p = self.recv().await.map_err(|e| failed(e.to_string()))?;
            if p.id == id {
                return Ok(p.body);
            }
        }
        Err(failed("no response for request".to_string()))
    }
}

/// The game server as the idle monitor sees it.
#[async_trait]
pub trait GameServer: Send + Sync {
    async fn player_count(&self) -> Result<u32, RconError>;

    /// Asks the server to save and stop. Returns the server's reply text.
    async fn stop_server(&self) -> Result<String, RconError>;
}

#[derive(Debug, Clone)]
pub struct RconGameServer {
    addr: String,
    password: String,
    timeout: Duration,
}

impl RconGameServer {
    pub fn new(host: &str, port: u16, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            password: password.into(),
            timeout,
        }
    }

    pub async fn run_command(&self, command: &str) -> Result<String, RconError> {
        if self.password.is_empty() {
            return Err(RconError::AuthMissing);
        }
        let mut conn = RconConnection::dial(&self.addr, self.timeout).await?;
        conn.authenticate(&self.password).await?;
        conn.execute(command).await
    }
}

#[async_trait]
impl GameServer for RconGameServer {
    async fn player_count(&self) -> Result<u32, RconError> {
        let response = self.run_command("list").await?;
        tracing::debug!(%response, "rcon list response");
        parse_player_count(&response).ok_or(RconError::MalformedResponse {
            command: "list".to_string(),
            response,
        })
    }

    async fn stop_server(&self) -> Result<String, RconError> {
        self.run_command("stop").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    // Serves one RCON session: auth, then one command answered with `reply`.
    async fn fake_server(password: &'static str, reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let auth = read_packet(&mut sock).await.unwrap();
            assert_eq!(auth.kind, PACKET_AUTH);
            // Source-style servers send an empty value packet first.
            sock.write_all(&encode_packet(auth.id, 0, "")).await.unwrap();
            let id = if auth.body == password { auth.id } else { -1 };
            sock.write_all(&encode_packet(id, PACKET_AUTH_RESPONSE, ""))
                .await
                .unwrap();
            if id == -1 {
                return;
            }
            let cmd = read_packet(&mut sock).await.unwrap();
            assert_eq!(cmd.kind, PACKET_EXEC);
            sock.write_all(&encode_packet(cmd.id, 0, reply)).await.unwrap();
        });
        port
    }

    #[test]
    fn parse_player_count_formats() {
        assert_eq!(
            parse_player_count("There are 2/20 players online: Alex, Steve"),
            Some(2)
        );
        assert_eq!(
            parse_player_count("There are 0 of a max of 20 players online: "),
            Some(0)
        );
        assert_eq!(parse_player_count("Unknown command"), None);
        assert_eq!(parse_player_count("There are many/20 players online:"), None);
    }

    #[test]
    fn encode_then_read_packet() {
        let buf = encode_packet(7, PACKET_EXEC, "list");
        assert_eq!(&buf[..4], &14i32.to_le_bytes());
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let p = rt.block_on(read_packet(&mut buf.as_slice())).unwrap();
        assert_eq!(
            p,
            Packet {
                id: 7,
                kind: PACKET_EXEC,
                body: "list".to_string()
            }
        );
    }

    #[tokio::test]
    async fn read_packet_rejects_bad_length() {
        let buf = 3i32.to_le_bytes();
        let err = read_packet(&mut buf.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn player_count_over_rcon() {
        let port = fake_server("hunter2", "There are 3/20 players online: a, b, c").await;
        let server = RconGameServer::new("127.0.0.1", port, "hunter2", Duration::from_secs(2));
        assert_eq!(server.player_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unparsable_list_reply_is_malformed() {
        let port = fake_server("hunter2", "Unknown or incomplete command").await;
        let server = RconGameServer::new("127.0.0.1", port, "hunter2", Duration::from_secs(2));
        let err = server.player_count().await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[tokio::test]
    async fn wrong_password_is_auth_failed() {
        let port = fake_server("hunter2", "").await;
        let server = RconGameServer::new("127.0.0.1", port, "nope", Duration::from_secs(2));
        let err = server.player_count().await.unwrap_err();
        assert!(matches!(err, RconError::AuthFailed(_)), "{err}");
    }

    #[tokio::test]
    async fn empty_password_is_auth_missing() {
        let server = RconGameServer::new("127.0.0.1", 1, "", Duration::from_secs(1));
        assert!(matches!(
            server.player_count().await,
            Err(RconError::AuthMissing)
        ));
    }

    #[tokio::test]
    async fn closed_port_is_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = RconGameServer::new("127.0.0.1", port, "pw", Duration::from_secs(2));
        let err = server.player_count().await.unwrap_err();
        assert_eq!(err.kind(), "connection_refused");
    }
}
