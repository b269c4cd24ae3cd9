//! Event store database schema.

/// SQL to create the event log and outbox tables.
pub const CREATE_EVENT_STORE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS stream_events (
    state_kind      VARCHAR(255) NOT NULL,
    stream_id       VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL CHECK (version >= 1),
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    raised_at       TIMESTAMPTZ NOT NULL,
    message_id      UUID NOT NULL UNIQUE,
    process_id      UUID NOT NULL,
    initiator       VARCHAR(255),
    predecessor_id  UUID,
    transaction_id  UUID NOT NULL,
    PRIMARY KEY (state_kind, stream_id, version)
);

CREATE INDEX IF NOT EXISTS idx_stream_events_process_id
    ON stream_events (process_id);

CREATE TABLE IF NOT EXISTS pending_tickets (
    transaction_id  UUID PRIMARY KEY,
    state_kind      VARCHAR(255) NOT NULL,
    stream_id       VARCHAR(255) NOT NULL,
    start_version   BIGINT NOT NULL,
    event_count     BIGINT NOT NULL CHECK (event_count >= 1),
    created_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_tickets_stream
    ON pending_tickets (state_kind, stream_id, start_version);

CREATE INDEX IF NOT EXISTS idx_pending_tickets_created_at
    ON pending_tickets (created_at);
";
