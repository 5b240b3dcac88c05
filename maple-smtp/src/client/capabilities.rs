use super::response::Response;

/// Extensions a server advertised in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<String>,
    auth: Vec<String>,
}

impl Capabilities {
    /// Read the capability lines of an EHLO reply. The first line is the
    /// server's greeting and carries no capability.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self::default();

        for line in response.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();

            // Some servers still send the pre-standard `AUTH=PLAIN LOGIN` form.
            if let Some(first) = keyword.strip_prefix("AUTH=") {
                capabilities.auth.push(first.to_string());
                capabilities
                    .auth
                    .extend(words.map(str::to_ascii_uppercase));
                continue;
            }

            if keyword == "AUTH" {
                capabilities
                    .auth
                    .extend(words.map(str::to_ascii_uppercase));
            }
            capabilities.keywords.push(keyword);
        }

        capabilities.auth.sort();
        capabilities.auth.dedup();
        capabilities
    }

    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }

    #[must_use]
    pub fn starttls(&self) -> bool {
        self.supports("STARTTLS")
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    #[must_use]
    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth
    }
}
