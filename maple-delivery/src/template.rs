//! Branded HTML document every notification is wrapped in.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

const STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
.container { max-width: 600px; margin: 0 auto; padding: 20px; }
.header { background: linear-gradient(45deg, #3498db, #2ecc71); color: white; padding: 20px; text-align: center; }
.content { padding: 30px; background: #f9f9f9; }
.footer { text-align: center; padding: 20px; color: #666; font-size: 12px; }
.server-info { background: white; padding: 20px; border-radius: 5px; border-left: 4px solid #3498db; }
.important { color: #e74c3c; font-weight: bold; }";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlLayout {
    /// Shown as the header title.
    #[serde(default = "defaults::brand")]
    pub brand: String,

    #[serde(default = "defaults::tagline")]
    pub tagline: String,

    /// One paragraph per entry.
    #[serde(default = "defaults::footer")]
    pub footer: Vec<String>,
}

impl Default for HtmlLayout {
    fn default() -> Self {
        Self {
            brand: defaults::brand(),
            tagline: defaults::tagline(),
            footer: defaults::footer(),
        }
    }
}

impl HtmlLayout {
    /// Wrap `content`, which is inserted as-is, in the full document.
    #[must_use]
    pub fn render(&self, content: &str) -> String {
        let mut footer = String::new();
        for line in &self.footer {
            let _ = write!(footer, "<p>{}</p>", escape_html(line));
        }

        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n\
             <div class=\"container\">\n\
             <div class=\"header\"><h1>{brand}</h1><p>{tagline}</p></div>\n\
             <div class=\"content\">\n{content}\n</div>\n\
             <div class=\"footer\">{footer}</div>\n\
             </div>\n</body>\n</html>\n",
            brand = escape_html(&self.brand),
            tagline = escape_html(&self.tagline),
        )
    }
}

/// Escape text for use in HTML element content and quoted attributes.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

mod defaults {
    pub fn brand() -> String {
        "Maple Server".to_string()
    }

    pub fn tagline() -> String {
        "DDoS and CC protected hosting".to_string()
    }

    pub fn footer() -> Vec<String> {
        vec![
            "© Maple Network Technology".to_string(),
            "This message was sent automatically. Please do not reply.".to_string(),
        ]
    }
}
