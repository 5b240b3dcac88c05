//! SMTP client implementation with support for STARTTLS, implicit TLS and AUTH.

use base64::{Engine, engine::general_purpose::STANDARD};
use maple_common::relay;
use tokio::net::TcpStream;

use super::{
    capabilities::Capabilities,
    connection::{self, ClientConnection},
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// A single SMTP session with one server.
///
/// Methods map one-to-one onto protocol steps and return the server's reply;
/// deciding whether a reply is acceptable is left to the caller except where
/// a step cannot continue otherwise (STARTTLS, AUTH).
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
    capabilities: Capabilities,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_domain", &self.server_domain)
            .field("tls", &self.is_tls())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    fn with_connection(connection: ClientConnection, server_domain: String) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
            capabilities: Capabilities::default(),
        }
    }

    /// Open a plaintext connection to `addr` (`host:port`).
    ///
    /// `server_domain` is the name the certificate is checked against if the
    /// session is later upgraded with STARTTLS.
    ///
    /// # Errors
    /// Returns an error if the TCP connection fails.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        relay!("Connected to {addr}");

        Ok(Self::with_connection(
            ClientConnection::Plain(stream),
            server_domain.into(),
        ))
    }

    /// Open a connection that is TLS from the first byte (SMTPS).
    ///
    /// # Errors
    /// Returns an error if the TCP connection or the TLS handshake fails.
    pub async fn connect_tls(
        addr: &str,
        server_domain: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let server_domain = server_domain.into();
        let stream = TcpStream::connect(addr).await?;
        let tls = connection::handshake(stream, &server_domain, accept_invalid_certs).await?;
        relay!("Connected to {addr} with implicit TLS");

        let mut client =
            Self::with_connection(ClientConnection::Tls(Box::new(tls)), server_domain);
        client.accept_invalid_certs = accept_invalid_certs;
        Ok(client)
    }

    /// Skip certificate validation on a later STARTTLS upgrade.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    /// Capabilities from the most recent EHLO.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Read the server greeting.
    ///
    /// # Errors
    /// Returns an error if reading fails or the reply is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let response = self.read_response().await?;
        relay!("S: {} {}", response.code, response.message());
        Ok(response)
    }

    /// Send a raw command line (without CRLF).
    ///
    /// # Errors
    /// Returns an error if sending fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        relay!("C: {command}");
        self.write_line(command).await
    }

    /// Send a command and read the reply.
    ///
    /// # Errors
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        let response = self.read_response().await?;
        relay!("S: {} {}", response.code, response.message());
        Ok(response)
    }

    /// Like [`command`](Self::command), but the line never reaches the logs.
    async fn secret_command(&mut self, command: &str) -> Result<Response> {
        relay!("C: <credentials redacted>");
        self.write_line(command).await?;
        let response = self.read_response().await?;
        relay!("S: {} {}", response.code, response.message());
        Ok(response)
    }

    /// Send EHLO and remember the advertised capabilities on success.
    ///
    /// # Errors
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        let response = self.command(&format!("EHLO {domain}")).await?;
        if response.is_success() {
            self.capabilities = Capabilities::from_ehlo(&response);
        }
        Ok(response)
    }

    /// Send STARTTLS and, if the server agrees, upgrade the connection.
    ///
    /// The capabilities are cleared afterwards; send EHLO again.
    ///
    /// # Errors
    /// Returns an error if the server refuses or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self
            .command("STARTTLS")
            .await?
            .expect_code("STARTTLS", 220)?;

        let old = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        self.connection = Some(
            old.upgrade(&self.server_domain, self.accept_invalid_certs)
                .await?,
        );
        self.buffer_pos = 0;
        self.capabilities = Capabilities::default();
        relay!("Connection upgraded to TLS");

        Ok(response)
    }

    /// Authenticate with the best mechanism both sides support (PLAIN, then LOGIN).
    ///
    /// # Errors
    /// Returns [`ClientError::NoAuthMechanism`] when the server offers neither,
    /// or [`ClientError::AuthenticationFailed`] when the credentials are refused.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<Response> {
        if self.capabilities.supports_auth("PLAIN") {
            self.auth_plain(username, password).await
        } else if self.capabilities.supports_auth("LOGIN") {
            self.auth_login(username, password).await
        } else {
            Err(ClientError::NoAuthMechanism(
                self.capabilities.auth_mechanisms().join(" "),
            ))
        }
    }

    /// AUTH PLAIN with an initial response (RFC 4616).
    ///
    /// # Errors
    /// Returns [`ClientError::AuthenticationFailed`] unless the server replies 235.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        let response = self.secret_command(&format!("AUTH PLAIN {token}")).await?;
        Self::auth_outcome(response)
    }

    /// AUTH LOGIN challenge/response.
    ///
    /// # Errors
    /// Returns [`ClientError::AuthenticationFailed`] if any step is refused.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let challenge = self.command("AUTH LOGIN").await?;
        if challenge.code != 334 {
            return Self::auth_outcome(challenge);
        }

        let challenge = self.secret_command(&STANDARD.encode(username)).await?;
        if challenge.code != 334 {
            return Self::auth_outcome(challenge);
        }

        let response = self.secret_command(&STANDARD.encode(password)).await?;
        Self::auth_outcome(response)
    }

    fn auth_outcome(response: Response) -> Result<Response> {
        if response.code == 235 {
            Ok(response)
        } else {
            Err(ClientError::AuthenticationFailed {
                code: response.code,
                message: response.message(),
            })
        }
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message content followed by the end-of-data marker.
    ///
    /// Line endings are normalised to CRLF and lines starting with `.` are
    /// dot-stuffed (RFC 5321 section 4.5.2).
    ///
    /// # Errors
    /// Returns an error if sending or reading the reply fails.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let mut payload = dot_stuff(data);
        payload.push_str(".\r\n");

        relay!("C: <{} bytes of message data>", payload.len());
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(payload.as_bytes())
            .await?;

        let response = self.read_response().await?;
        relay!("S: {} {}", response.code, response.message());
        Ok(response)
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + data.len() / 64 + 2);

    for line in data.split_inclusive('\n') {
        let line = line
            .strip_suffix('\n')
            .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l));

        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}
