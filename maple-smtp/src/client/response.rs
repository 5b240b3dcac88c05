//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// One line of a possibly multi-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `250-...` continuation lines.
    pub is_last: bool,
    pub message: String,
}

/// A complete SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Pass the reply through if it carries `expected`, otherwise turn it into
    /// [`ClientError::UnexpectedResponse`] tagged with `stage`.
    ///
    /// # Errors
    /// When the code differs from `expected`.
    pub fn expect_code(self, stage: &'static str, expected: u16) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(ClientError::UnexpectedResponse {
                stage,
                code: self.code,
                message: self.message(),
            })
        }
    }

    /// Parse a single reply line (without its line terminator).
    ///
    /// # Errors
    /// Returns `ClientError::ParseError` if the line is not `NNN`, `NNN text`
    /// or `NNN-text`.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(ClientError::ParseError(format!(
                "Invalid reply line: '{line}'"
            )));
        }

        let code = line[..3]
            .parse::<u16>()
            .map_err(|e| ClientError::ParseError(format!("Invalid status code: {e}")))?;

        let is_last = match bytes.get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&other) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(other)
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` if
    /// the buffer does not yet hold a final line.
    ///
    /// # Errors
    /// Returns `ClientError::ParseError` if a line is malformed or the lines
    /// of a multi-line reply disagree on the code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;

            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
