//! Minimal blocking IMAP4rev1 client — just enough to fetch unseen mail.
//!
//! The session is generic over any `Read + Write` stream; production code
//! runs it over rustls, tests run it over a scripted in-memory stream.
//! Everything here blocks, so call it from `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// A raw message fetched from the server.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Mailbox sequence number.
    pub seq: u32,
    pub bytes: Vec<u8>,
}

/// One untagged server response, with its literal payload if it carried one.
#[derive(Debug, Clone)]
pub struct Untagged {
    pub line: String,
    pub literal: Option<Vec<u8>>,
}

/// An IMAP session over an arbitrary stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    /// Read the server greeting; anything but `* OK` / `* PREAUTH` is an error.
    pub fn greeting(&mut self) -> Result<String, MonitorError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(line)
        } else {
            Err(MonitorError::Protocol(format!("unexpected greeting: {}", line.trim_end())))
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MonitorError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        match self.command("LOGIN", &cmd) {
            Ok(_) => Ok(()),
            Err(MonitorError::Command { .. }) => Err(MonitorError::LoginFailed),
            Err(e) => Err(e),
        }
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), MonitorError> {
        self.command("SELECT", &format!("SELECT {}", quote(mailbox)))?;
        Ok(())
    }

    /// Sequence numbers of unseen messages.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, MonitorError> {
        let responses = self.command("SEARCH", "SEARCH UNSEEN")?;
        Ok(parse_search(&responses))
    }

    /// Fetch one full message without setting `\Seen`.
    pub fn fetch(&mut self, seq: u32) -> Result<Vec<u8>, MonitorError> {
        let responses = self.command("FETCH", &format!("FETCH {seq} BODY.PEEK[]"))?;
        responses
            .into_iter()
            .find(|u| u.line.contains("FETCH") && u.literal.is_some())
            .and_then(|u| u.literal)
            .ok_or_else(|| MonitorError::Protocol(format!("no message body in FETCH {seq}")))
    }

    pub fn mark_seen(&mut self, seqs: &[u32]) -> Result<(), MonitorError> {
        if seqs.is_empty() {
            return Ok(());
        }
        let set: Vec<String> = seqs.iter().map(u32::to_string).collect();
        self.command("STORE", &format!("STORE {} +FLAGS (\\Seen)", set.join(",")))?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), MonitorError> {
        self.command("LOGOUT", "LOGOUT")?;
        Ok(())
    }

    /// Send a tagged command and collect untagged responses until the tagged status.
    ///
    /// `verb` is what goes into errors; the full command may contain credentials.
    pub fn command(&mut self, verb: &str, cmd: &str) -> Result<Vec<Untagged>, MonitorError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let tag_prefix = format!("{tag} ");
        let mut responses = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&tag_prefix) {
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(MonitorError::Command {
                    command: verb.to_string(),
                    response: status.trim_end().to_string(),
                });
            }

            let literal = match literal_len(&line) {
                Some(len) => {
                    let mut buf = vec![0_u8; len];
                    self.stream.read_exact(&mut buf)?;
                    Some(buf)
                }
                None => None,
            };
            responses.push(Untagged { line, literal });
        }
    }

    fn read_line(&mut self) -> Result<String, MonitorError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MonitorError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Run a full fetch cycle over an established stream:
/// greeting → login → select → search → fetch each → mark seen → logout.
///
/// A failed FETCH skips that one message; connection-level errors abort.
pub fn fetch_unseen_with<S: Read + Write>(
    stream: S,
    username: &str,
    password: &str,
) -> Result<Vec<RawMessage>, MonitorError> {
    let mut session = ImapSession::new(stream);
    session.greeting()?;
    session.login(username, password)?;
    session.select("INBOX")?;

    let unseen = session.search_unseen()?;
    debug!(count = unseen.len(), "Unseen messages");

    let mut messages = Vec::with_capacity(unseen.len());
    for seq in unseen {
        match session.fetch(seq) {
            Ok(bytes) => messages.push(RawMessage { seq, bytes }),
            Err(e @ (MonitorError::Command { .. } | MonitorError::Protocol(_))) => {
                warn!(seq, error = %e, "Skipping message that could not be fetched");
            }
            Err(e) => return Err(e),
        }
    }

    let seqs: Vec<u32> = messages.iter().map(|m| m.seq).collect();
    session.mark_seen(&seqs)?;

    if let Err(e) = session.logout() {
        debug!(error = %e, "IMAP logout failed");
    }
    Ok(messages)
}

/// Connect over TLS and fetch unseen messages (blocking).
pub fn fetch_unseen(config: &MonitorConfig) -> Result<Vec<RawMessage>, MonitorError> {
    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
        .map_err(|e| MonitorError::Connect(format!("{}:{}: {e}", config.imap_host, config.imap_port)))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(|e| MonitorError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MonitorError::Tls(e.to_string()))?;
    let tls = rustls::StreamOwned::new(conn, tcp);

    fetch_unseen_with(tls, &config.username, config.password.expose_secret())
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `{123}\r\n` at the end of a line announces a literal of that many bytes.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

fn parse_search(responses: &[Untagged]) -> Vec<u32> {
    responses
        .iter()
        .filter_map(|u| u.line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}
