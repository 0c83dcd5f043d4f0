use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts, listings, contact sessions)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY REFERENCES users(id),
                username    TEXT NOT NULL,
                full_name   TEXT,
                phone       TEXT,
                whatsapp    TEXT,
                avatar_url  TEXT,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE products (
                id          TEXT PRIMARY KEY,
                seller_id   TEXT NOT NULL REFERENCES profiles(id),
                title       TEXT NOT NULL,
                price       INTEGER NOT NULL,
                phone       TEXT,
                whatsapp    TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_products_seller ON products(seller_id);

            -- Append-only: rows are never updated or deleted, expiry is a read predicate.
            CREATE TABLE contact_sessions (
                id                  TEXT PRIMARY KEY,
                product_id          TEXT NOT NULL REFERENCES products(id),
                buyer_id            TEXT NOT NULL REFERENCES profiles(id),
                seller_id           TEXT NOT NULL REFERENCES profiles(id),
                contact_type        TEXT NOT NULL CHECK (contact_type IN ('phone', 'whatsapp')),
                revealed_contact    TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                expires_at          TEXT NOT NULL,
                is_verified         INTEGER NOT NULL DEFAULT 0,
                verification_method TEXT NOT NULL DEFAULT 'none'
            );

            CREATE INDEX idx_contact_sessions_lookup
                ON contact_sessions(buyer_id, product_id, contact_type, expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                user1_id    TEXT NOT NULL REFERENCES profiles(id),
                user2_id    TEXT NOT NULL REFERENCES profiles(id),
                product_id  TEXT REFERENCES products(id),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            -- user1_id < user2_id is normalised on insert, so the pair is unordered.
            CREATE UNIQUE INDEX idx_conversations_pair
                ON conversations(user1_id, user2_id, IFNULL(product_id, ''));

            CREATE INDEX idx_conversations_updated ON conversations(updated_at);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES profiles(id),
                receiver_id     TEXT NOT NULL REFERENCES profiles(id),
                content         TEXT NOT NULL,
                message_type    TEXT NOT NULL DEFAULT 'text',
                is_read         INTEGER NOT NULL DEFAULT 0,
                product_id      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE INDEX idx_messages_unread
                ON messages(conversation_id, receiver_id, is_read);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (reports, billing history)");
        conn.execute_batch(
            "
            CREATE TABLE reports (
                id                  TEXT PRIMARY KEY,
                reporter_id         TEXT NOT NULL REFERENCES profiles(id),
                product_id          TEXT REFERENCES products(id),
                reported_user_id    TEXT REFERENCES profiles(id),
                reason              TEXT NOT NULL,
                details             TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE UNIQUE INDEX idx_reports_once
                ON reports(reporter_id, IFNULL(product_id, ''), IFNULL(reported_user_id, ''));

            CREATE TABLE billing_history (
                id          TEXT PRIMARY KEY,
                source      TEXT NOT NULL,
                payload     TEXT NOT NULL,
                received_at TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
