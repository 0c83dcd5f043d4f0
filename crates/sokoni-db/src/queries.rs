use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use sokoni_types::api::SessionInsert;
use sokoni_types::models::{ContactChannel, ContactSession, Conversation, Message, Profile, Product, Report};

use crate::models::{
    CONVERSATION_COLUMNS, MESSAGE_COLUMNS, PRODUCT_COLUMNS, PROFILE_COLUMNS, SESSION_COLUMNS, UserRow,
    conversation_from_row, message_from_row, product_from_row, profile_from_row, session_from_row,
};
use crate::{Database, format_ts};

/// Profile fields supplied at registration.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
}

impl Database {
    // -- Users & profiles --

    /// Create the credentials row and its public profile in one transaction.
    pub fn create_account(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        profile: &NewProfile,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            tx.execute(
                "INSERT INTO profiles (id, username, full_name, phone, whatsapp) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, username, profile.full_name, profile.phone, profile.whatsapp],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password, created_at FROM users WHERE username = ?1",
                    [username],
                    |row| {
                        Ok(UserRow {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            password: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], profile_from_row).optional()?)
        })
    }

    /// Batch-fetch profiles. Unknown ids are silently absent from the result.
    pub fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM profiles WHERE id IN ({})",
                PROFILE_COLUMNS,
                placeholders.join(", ")
            );

            let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = id_strings
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Products --

    pub fn insert_product(&self, product: &Product) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (id, seller_id, title, price, phone, whatsapp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    product.id.to_string(),
                    product.seller_id.to_string(),
                    product.title,
                    product.price,
                    product.phone,
                    product.whatsapp,
                    format_ts(product.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], product_from_row).optional()?)
        })
    }

    // -- Contact sessions --

    pub fn find_active_session(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
        channel: ContactChannel,
        now: DateTime<Utc>,
    ) -> Result<Option<ContactSession>> {
        self.with_conn(|conn| query_active_session(conn, buyer_id, product_id, channel, now))
    }

    /// Check-and-insert under the writer lock: if the buyer already holds an
    /// active session for the tuple, that row is returned and nothing is written.
    pub fn insert_contact_session(&self, session: &ContactSession, now: DateTime<Utc>) -> Result<SessionInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(existing) = query_active_session(
                &tx,
                session.buyer_id,
                session.product_id,
                session.contact_type,
                now,
            )? {
                return Ok(SessionInsert::Existing(existing));
            }

            tx.execute(
                "INSERT INTO contact_sessions (id, product_id, buyer_id, seller_id, contact_type, revealed_contact,
                                               created_at, expires_at, is_verified, verification_method)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.id.to_string(),
                    session.product_id.to_string(),
                    session.buyer_id.to_string(),
                    session.seller_id.to_string(),
                    session.contact_type.as_str(),
                    session.revealed_contact,
                    format_ts(session.created_at),
                    format_ts(session.expires_at),
                    session.is_verified,
                    session.verification_method,
                ],
            )?;
            tx.commit()?;

            Ok(SessionInsert::Created(session.clone()))
        })
    }

    /// All sessions a buyer ever opened, newest first, expired ones included.
    pub fn sessions_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<ContactSession>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM contact_sessions WHERE buyer_id = ?1 ORDER BY created_at DESC",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([buyer_id.to_string()], session_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations WHERE user1_id = ?1 OR user2_id = ?1 ORDER BY updated_at DESC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], conversation_from_row).optional()?)
        })
    }

    /// Idempotent: returns the existing conversation for the unordered pair
    /// and product context, creating it on first use.
    pub fn get_or_create_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        product_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let (user1, user2) = if a <= b { (a, b) } else { (b, a) };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE user1_id = ?1 AND user2_id = ?2 AND IFNULL(product_id, '') = ?3",
                CONVERSATION_COLUMNS
            );
            let product_key = product_id.map(|p| p.to_string()).unwrap_or_default();
            let existing = tx
                .query_row(
                    &sql,
                    params![user1.to_string(), user2.to_string(), product_key],
                    conversation_from_row,
                )
                .optional()?;

            if let Some(conversation) = existing {
                return Ok(conversation);
            }

            let conversation = Conversation {
                id: Uuid::new_v4(),
                user1_id: user1,
                user2_id: user2,
                product_id,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO conversations (id, user1_id, user2_id, product_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conversation.id.to_string(),
                    user1.to_string(),
                    user2.to_string(),
                    product_id.map(|p| p.to_string()),
                    format_ts(now),
                    format_ts(now),
                ],
            )?;
            tx.commit()?;
            Ok(conversation)
        })
    }

    /// Bump `updated_at`. Returns false if the conversation does not exist.
    pub fn touch_conversation(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), format_ts(now)],
            )?;
            Ok(n > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, message_type,
                                       is_read, product_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.content,
                    message.message_type,
                    message.is_read,
                    message.product_id.map(|p| p.to_string()),
                    format_ts(message.created_at),
                    format_ts(message.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Whole thread, oldest first.
    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn latest_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                MESSAGE_COLUMNS
            );
            Ok(conn.query_row(&sql, [conversation_id.to_string()], message_from_row).optional()?)
        })
    }

    /// Unread messages in the conversation that `user_id` did not send.
    pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND is_read = 0 AND sender_id != ?2",
                [conversation_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Flip every unread message addressed to `receiver_id` in the
    /// conversation to read. Returns the rows as they are after the update.
    pub fn mark_read(&self, conversation_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                )?;
                let ids = stmt
                    .query_map([conversation_id.to_string(), receiver_id.to_string()], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };

            tx.execute(
                "UPDATE messages SET is_read = 1, updated_at = ?3
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                params![conversation_id.to_string(), receiver_id.to_string(), format_ts(now)],
            )?;

            let mut updated = Vec::with_capacity(ids.len());
            {
                let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
                let mut stmt = tx.prepare(&sql)?;
                for id in &ids {
                    updated.push(stmt.query_row([id], message_from_row)?);
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    // -- Reports --

    pub fn insert_report(&self, report: &Report) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, reporter_id, product_id, reported_user_id, reason, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report.id.to_string(),
                    report.reporter_id.to_string(),
                    report.product_id.map(|p| p.to_string()),
                    report.reported_user_id.map(|u| u.to_string()),
                    report.reason,
                    report.details,
                    format_ts(report.created_at),
                ],
            )?;
            Ok(())
        })
    }

    // -- Billing --

    /// Store a payment callback body verbatim.
    pub fn insert_billing_event(&self, id: Uuid, source: &str, payload: &str, received_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO billing_history (id, source, payload, received_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), source, payload, format_ts(received_at)],
            )?;
            Ok(())
        })
    }

    pub fn billing_event_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM billing_history", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

fn query_active_session(
    conn: &Connection,
    buyer_id: Uuid,
    product_id: Uuid,
    channel: ContactChannel,
    now: DateTime<Utc>,
) -> Result<Option<ContactSession>> {
    let sql = format!(
        "SELECT {} FROM contact_sessions
         WHERE buyer_id = ?1 AND product_id = ?2 AND contact_type = ?3 AND expires_at > ?4
         ORDER BY created_at DESC
         LIMIT 1",
        SESSION_COLUMNS
    );
    let row = conn
        .query_row(
            &sql,
            params![buyer_id.to_string(), product_id.to_string(), channel.as_str(), format_ts(now)],
            session_from_row,
        )
        .optional()?;
    Ok(row)
}
