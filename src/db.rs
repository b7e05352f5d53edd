use std::time::Duration;

use log::info;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};

use crate::models::{
    Chat, Comment, EventRsvp, Group, GroupMember, Invitation, MarkKind, Message, MessageRead,
    Model, Post, TokenKind, User,
};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    /// The driver connects lazily; no I/O happens until the first operation.
    pub async fn connect(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub fn coll<T: Model>(&self) -> Collection<T> {
        self.db.collection::<T>(T::COLLECTION)
    }

    pub fn marks(&self, kind: MarkKind) -> Collection<crate::models::PostMark> {
        self.db.collection(kind.collection())
    }

    pub fn tokens(&self, kind: TokenKind) -> Collection<crate::models::OneTimeToken> {
        self.db.collection(kind.collection())
    }

    /// Creates every index the handlers rely on for uniqueness, geo search
    /// and token expiry. Safe to run on every start.
    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let username_present = doc! { "usernameLower": { "$type": "string" } };
        self.index::<User>(doc! { "tenantId": 1, "userId": 1 }, unique()).await?;
        self.index::<User>(doc! { "tenantId": 1, "email": 1 }, unique()).await?;
        self.index::<User>(
            doc! { "tenantId": 1, "usernameLower": 1 },
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(username_present)
                .build(),
        )
        .await?;

        self.index::<Post>(doc! { "location": "2dsphere" }, plain()).await?;
        self.index::<Post>(doc! { "tenantId": 1, "createdAt": -1 }, plain()).await?;
        self.index::<Comment>(doc! { "tenantId": 1, "postId": 1, "createdAt": 1 }, plain())
            .await?;

        for kind in [MarkKind::Like, MarkKind::Favorite] {
            self.db
                .collection::<Document>(kind.collection())
                .create_index(model(doc! { "tenantId": 1, "postId": 1, "userId": 1 }, unique()))
                .await?;
        }

        self.index::<Group>(doc! { "tenantId": 1, "slug": 1 }, unique()).await?;
        self.index::<GroupMember>(doc! { "tenantId": 1, "groupId": 1, "userId": 1 }, unique())
            .await?;
        self.index::<EventRsvp>(doc! { "tenantId": 1, "eventId": 1, "userId": 1 }, unique())
            .await?;
        self.index::<Invitation>(doc! { "tenantId": 1, "token": 1 }, unique()).await?;

        self.index::<Chat>(doc! { "tenantId": 1, "participantIds": 1 }, plain()).await?;
        self.index::<Message>(doc! { "tenantId": 1, "chatId": 1, "createdAt": -1 }, plain())
            .await?;
        self.index::<MessageRead>(doc! { "tenantId": 1, "chatId": 1, "userId": 1 }, unique())
            .await?;

        for kind in TokenKind::ALL {
            let tokens = self.db.collection::<Document>(kind.collection());
            tokens
                .create_index(model(doc! { "tenantId": 1, "token": 1 }, unique()))
                .await?;
            tokens
                .create_index(model(
                    doc! { "expiresAt": 1 },
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                ))
                .await?;
        }

        info!("MongoDB indexes ensured on {}", self.db.name());
        Ok(())
    }

    async fn index<T: Model>(&self, keys: Document, options: IndexOptions) -> mongodb::error::Result<()> {
        self.db
            .collection::<Document>(T::COLLECTION)
            .create_index(model(keys, options))
            .await?;
        Ok(())
    }
}

fn model(keys: Document, options: IndexOptions) -> IndexModel {
    IndexModel::builder().keys(keys).options(options).build()
}

fn unique() -> IndexOptions {
    IndexOptions::builder().unique(true).build()
}

fn plain() -> IndexOptions {
    IndexOptions::default()
}

/// True when a write failed on a unique index.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY,
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}
