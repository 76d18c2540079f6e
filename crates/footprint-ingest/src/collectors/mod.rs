//! Built-in collectors, one per source schema.

mod chrome;
mod knowledgec;
mod messages;
mod podcasts;

pub use chrome::{transition_name, ChromeCollector};
pub use knowledgec::KnowledgeCCollector;
pub use messages::MessagesCollector;
pub use podcasts::PodcastsCollector;

pub const KNOWLEDGEC: &str = "knowledgeC";
pub const MESSAGES: &str = "messages";
pub const CHROME: &str = "chrome";
pub const PODCASTS: &str = "podcasts";
