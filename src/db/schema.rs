use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Course catalogue (mirror of the course-management collaborator's
        -- record; only price and purchasability matter here)
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            purchasable INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        -- Payment intents: the append-only purchase ledger.
        -- Rows are never deleted; only status and derived fields update,
        -- and always through conditional (compare-and-set) statements.
        CREATE TABLE IF NOT EXISTS payment_intents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL REFERENCES courses(id),
            provider_session_id TEXT NOT NULL,
            provider_charge_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'succeeded', 'failed', 'canceled', 'refunded')),
            refunded_cents INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            dispute_id TEXT,
            dispute_reason TEXT,
            created_at INTEGER NOT NULL,
            paid_at INTEGER,
            refunded_at INTEGER,
            CHECK (refunded_cents >= 0 AND refunded_cents <= amount_cents)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_intents_session ON payment_intents(provider_session_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_intents_charge ON payment_intents(provider_charge_id) WHERE provider_charge_id IS NOT NULL;
        -- At most one in-flight payment per (user, course): enforced by the
        -- store, which is the only synchronization primitive in the system.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_intents_one_pending ON payment_intents(user_id, course_id) WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_payment_intents_user_time ON payment_intents(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_payment_intents_course ON payment_intents(course_id);

        -- Refund history: one row per applied refund (structured, additive;
        -- no read-modify-write of a metadata blob)
        CREATE TABLE IF NOT EXISTS payment_refunds (
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL REFERENCES payment_intents(id),
            provider_refund_id TEXT,
            amount_cents INTEGER NOT NULL,
            reason TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_refunds_payment ON payment_refunds(payment_id);

        -- Enrollments: payment-derived fields are owned by this engine; the
        -- course collaborator owns academic fields (kept in its own schema)
        CREATE TABLE IF NOT EXISTS enrollments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL REFERENCES courses(id),
            status TEXT NOT NULL CHECK (status IN ('active', 'suspended', 'inactive')),
            payment_status TEXT NOT NULL CHECK (payment_status IN ('pending', 'paid', 'refunded', 'failed')),
            payment_id TEXT REFERENCES payment_intents(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(user_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id);

        -- Webhook events (idempotency gate for provider redelivery)
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);
        "#,
    )?;
    Ok(())
}
