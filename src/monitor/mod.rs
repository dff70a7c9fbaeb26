//! Inbox monitor: IMAP polling, email parsing, bug-report creation.

pub mod allowlist;
pub mod imap;
pub mod parse;
pub mod poller;

pub use allowlist::is_sender_allowed;
pub use parse::{InboundEmail, parse_email, strip_html};
pub use poller::{MailMonitor, PollReport, spawn_mail_monitor};
