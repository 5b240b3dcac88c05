mod capabilities;
mod connection;
mod error;
mod response;
mod smtp_client;

pub use capabilities::Capabilities;
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
