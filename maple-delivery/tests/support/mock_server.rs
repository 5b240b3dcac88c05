//! Scriptable SMTP relay for exercising [`RelayClient`] end to end.
//!
//! Every command the client sends is recorded so tests can assert on the
//! exact conversation, including AUTH exchanges and the final QUIT.
//!
//! ```rust,ignore
//! let server = MockRelay::builder()
//!     .with_capabilities(&["AUTH PLAIN LOGIN"])
//!     .with_rcpt_to_response(550, "No such user")
//!     .build()
//!     .await?;
//! ```

use std::{fmt::Write, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ehlo(String),
    /// `AUTH PLAIN` with its initial response, still base64 encoded.
    AuthPlain(String),
    /// `AUTH LOGIN` with the username and password lines, still base64 encoded.
    AuthLogin { username: String, password: String },
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content between DATA and the terminating dot, as received.
    Message(String),
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.message)
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    /// Stop answering once this many commands have been read.
    hang_after: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.relay ESMTP ready"),
            capabilities: vec!["SIZE 10240000".to_string()],
            auth: Reply::new(235, "2.7.0 Authentication successful"),
            mail_from: Reply::new(250, "2.1.0 OK"),
            rcpt_to: Reply::new(250, "2.1.5 OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Queued"),
            hang_after: None,
        }
    }
}

impl Script {
    fn ehlo_reply(&self) -> String {
        let mut reply = String::new();
        let lines: Vec<&str> = std::iter::once("mock.relay greets you")
            .chain(self.capabilities.iter().map(String::as_str))
            .collect();

        for (i, line) in lines.iter().enumerate() {
            let separator = if i + 1 == lines.len() { ' ' } else { '-' };
            let _ = write!(reply, "250{separator}{line}\r\n");
        }
        reply
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<Command>>>,
    accept_loop: JoinHandle<()>,
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl MockRelay {
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            script: Script::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<Command> {
        self.commands.read().await.clone()
    }

    async fn handle(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<Command>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut seen = 0;

        writer.write_all(script.greeting.line().as_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            seen += 1;
            if script.hang_after.is_some_and(|n| seen > n) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            let input = line.trim_end().to_string();
            let (verb, rest) = input
                .split_once(' ')
                .map_or((input.as_str(), ""), |(v, r)| (v, r));

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (Command::Ehlo(rest.to_string()), script.ehlo_reply()),
                "MAIL" => (Command::MailFrom(rest.to_string()), script.mail_from.line()),
                "RCPT" => (Command::RcptTo(rest.to_string()), script.rcpt_to.line()),
                "STARTTLS" => (
                    Command::StartTls,
                    Reply::new(502, "5.5.1 Not implemented").line(),
                ),
                "AUTH" => {
                    let (mechanism, initial) = rest.split_once(' ').unwrap_or((rest, ""));
                    if mechanism.eq_ignore_ascii_case("LOGIN") {
                        writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                        let username = Self::read_trimmed(&mut reader).await?;
                        writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                        let password = Self::read_trimmed(&mut reader).await?;
                        (Command::AuthLogin { username, password }, script.auth.line())
                    } else {
                        (Command::AuthPlain(initial.to_string()), script.auth.line())
                    }
                }
                "DATA" => {
                    commands.write().await.push(Command::Data);
                    writer.write_all(script.data.line().as_bytes()).await?;
                    if script.data.code != 354 {
                        continue;
                    }

                    let mut message = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        message.push_str(&line);
                    }

                    (Command::Message(message), script.data_end.line())
                }
                "QUIT" => {
                    commands.write().await.push(Command::Quit);
                    writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    Command::Other(input.clone()),
                    Reply::new(500, "5.5.2 Unknown command").line(),
                ),
            };

            commands.write().await.push(command);
            writer.write_all(reply.as_bytes()).await?;
        }
    }

    async fn read_trimmed<R>(reader: &mut R) -> std::io::Result<String>
    where
        R: AsyncBufReadExt + Unpin,
    {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

pub struct MockRelayBuilder {
    script: Script,
}

impl MockRelayBuilder {
    /// Extension lines advertised after the EHLO greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.script.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: &str) -> Self {
        self.script.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: &str) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Read `count` commands normally, then stop responding.
    #[must_use]
    pub const fn hang_after_commands(mut self, count: usize) -> Self {
        self.script.hang_after = Some(count);
        self
    }

    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let accept_loop = {
            let commands = Arc::clone(&commands);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let script = Arc::clone(&script);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        if let Err(e) = MockRelay::handle(stream, script, commands).await {
                            eprintln!("mock relay connection error: {e}");
                        }
                    });
                }
            })
        };

        Ok(MockRelay {
            addr,
            commands,
            accept_loop,
        })
    }
}
