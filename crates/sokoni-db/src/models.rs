//! Row mapping between SQLite text columns and the shared model types.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use sokoni_types::models::{ContactChannel, ContactSession, Conversation, Message, Profile, Product};

/// Credentials row; never leaves the auth handlers.
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub(crate) const PROFILE_COLUMNS: &str =
    "id, username, full_name, phone, whatsapp, avatar_url, created_at";
pub(crate) const PRODUCT_COLUMNS: &str = "id, seller_id, title, price, phone, whatsapp, created_at";
pub(crate) const SESSION_COLUMNS: &str = "id, product_id, buyer_id, seller_id, contact_type, revealed_contact, \
     created_at, expires_at, is_verified, verification_method";
pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, user1_id, user2_id, product_id, created_at, updated_at";
pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, message_type, \
     is_read, product_id, created_at, updated_at";

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion(idx, e))).transpose()
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    crate::parse_ts(&raw).map_err(|e| conversion(idx, std::io::Error::other(e.to_string())))
}

fn channel_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<ContactChannel> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion(idx, std::io::Error::other(e)))
}

pub(crate) fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        phone: row.get(3)?,
        whatsapp: row.get(4)?,
        avatar_url: row.get(5)?,
        created_at: ts_at(row, 6)?,
    })
}

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: uuid_at(row, 0)?,
        seller_id: uuid_at(row, 1)?,
        title: row.get(2)?,
        price: row.get(3)?,
        phone: row.get(4)?,
        whatsapp: row.get(5)?,
        created_at: ts_at(row, 6)?,
    })
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ContactSession> {
    Ok(ContactSession {
        id: uuid_at(row, 0)?,
        product_id: uuid_at(row, 1)?,
        buyer_id: uuid_at(row, 2)?,
        seller_id: uuid_at(row, 3)?,
        contact_type: channel_at(row, 4)?,
        revealed_contact: row.get(5)?,
        created_at: ts_at(row, 6)?,
        expires_at: ts_at(row, 7)?,
        is_verified: row.get(8)?,
        verification_method: row.get(9)?,
    })
}

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        user1_id: uuid_at(row, 1)?,
        user2_id: uuid_at(row, 2)?,
        product_id: opt_uuid_at(row, 3)?,
        created_at: ts_at(row, 4)?,
        updated_at: ts_at(row, 5)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        receiver_id: uuid_at(row, 3)?,
        content: row.get(4)?,
        message_type: row.get(5)?,
        is_read: row.get(6)?,
        product_id: opt_uuid_at(row, 7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
    })
}
