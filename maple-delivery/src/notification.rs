//! Notifications the platform sends, rendered to subject and HTML content.
//!
//! The content is the inner part of the message; [`HtmlLayout`](crate::HtmlLayout)
//! adds the surrounding document when the message is delivered.

use chrono::{DateTime, Utc};

use crate::template::escape_html;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Sent once an account has been created.
    Welcome {
        username: String,
        email: String,
        registered_at: DateTime<Utc>,
    },

    /// Sent when a purchased server is ready, with its access details.
    ServerProvisioned(Box<ServerDetails>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
    pub username: String,
    pub plan_name: String,
    /// e.g. "300G".
    pub protection: String,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_password: String,
    pub panel_url: String,
    pub panel_username: String,
    pub panel_password: String,
}

impl Notification {
    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            Self::Welcome { .. } => "Welcome to Maple Server".to_string(),
            Self::ServerProvisioned(details) => format!(
                "Your server is ready: {} - Maple Server",
                details.plan_name
            ),
        }
    }

    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Welcome {
                username,
                email,
                registered_at,
            } => format!(
                "<h2>Welcome to Maple Server!</h2>\n\
                 <p>Dear {username},</p>\n\
                 <p>Thank you for registering. Your account has been created.</p>\n\
                 <div class=\"server-info\">\n\
                 <p><strong>Account details:</strong></p>\n\
                 <p>Username: {username}</p>\n\
                 <p>Email: {email}</p>\n\
                 <p>Registered: {registered}</p>\n\
                 </div>\n\
                 <p class=\"important\">Keep your account details safe and never share them.</p>",
                username = escape_html(username),
                email = escape_html(email),
                registered = registered_at.format(TIMESTAMP_FORMAT),
            ),
            Self::ServerProvisioned(details) => details.body(),
        }
    }
}

impl ServerDetails {
    fn body(&self) -> String {
        format!(
            "<h2>Your server is ready!</h2>\n\
             <p>Dear {username},</p>\n\
             <p>Your server has been provisioned. Its details are below.</p>\n\
             <div class=\"server-info\">\n\
             <p><strong>Plan:</strong></p>\n\
             <p>Plan name: {plan}</p>\n\
             <p>Protection: {protection} DDoS protection</p>\n\
             <p>Activated: {activated}</p>\n\
             <p>Expires: {expires}</p>\n\
             <p><strong>Access:</strong></p>\n\
             <p>IP address: {ip}</p>\n\
             <p>SSH port: {ssh_port}</p>\n\
             <p>SSH username: {ssh_username}</p>\n\
             <p>SSH password: {ssh_password}</p>\n\
             <p>Control panel: <a href=\"{panel_url}\">{panel_url}</a></p>\n\
             <p>Panel username: {panel_username}</p>\n\
             <p>Panel password: {panel_password}</p>\n\
             </div>\n\
             <p class=\"important\">Change the default passwords immediately!</p>",
            username = escape_html(&self.username),
            plan = escape_html(&self.plan_name),
            protection = escape_html(&self.protection),
            activated = self.activated_at.format(TIMESTAMP_FORMAT),
            expires = self.expires_at.format(TIMESTAMP_FORMAT),
            ip = escape_html(&self.ip_address),
            ssh_port = self.ssh_port,
            ssh_username = escape_html(&self.ssh_username),
            ssh_password = escape_html(&self.ssh_password),
            panel_url = escape_html(&self.panel_url),
            panel_username = escape_html(&self.panel_username),
            panel_password = escape_html(&self.panel_password),
        )
    }
}
