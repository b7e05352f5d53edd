pub mod chat;
pub mod event;
pub mod group;
pub mod post;
pub mod token;
pub mod user;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use chat::{Chat, Message, MessageRead};
pub use event::{Event, EventRsvp, RsvpStatus};
pub use group::{Group, GroupMember, GroupRole, Invitation};
pub use post::{Attachment, Comment, MarkKind, Post, PostMark, Share};
pub use token::{OneTimeToken, TokenKind};
pub use user::{Role, User, UserProfile};

/// A document type with a fixed home collection.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Unpin {
    const COLLECTION: &'static str;
}

/// Fresh document id; UUID strings keep ids portable between store and JSON.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
