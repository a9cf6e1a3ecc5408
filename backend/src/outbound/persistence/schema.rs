//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Venues known to the gateway and their rotation settings.
    venues (id) {
        /// Primary key.
        id -> Uuid,
        /// `hourly`, `daily`, `weekly` or `monthly`.
        rotation_frequency -> Varchar,
        /// Inactive venues issue no codes and accept no scans.
        is_active -> Bool,
        /// Record creation timestamp.
        created_at -> Timestamptz,
        /// Last modification timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only epoch history; the row with `superseded_at IS NULL` is
    /// the venue's active epoch.
    token_epochs (venue_id, epoch_sequence) {
        venue_id -> Uuid,
        epoch_sequence -> Int8,
        token_value -> Varchar,
        generated_at -> Timestamptz,
        expires_at -> Timestamptz,
        superseded_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Visitor sessions, open while `close_reason IS NULL`.
    visitor_sessions (id) {
        id -> Uuid,
        venue_id -> Uuid,
        visitor_id -> Uuid,
        epoch_sequence_joined -> Int8,
        joined_at -> Timestamptz,
        last_seen_at -> Timestamptz,
        left_at -> Nullable<Timestamptz>,
        close_reason -> Nullable<Varchar>,
    }
}

diesel::table! {
    /// Per-venue chat log, unique on `(venue_id, sequence_number)`.
    chat_messages (id) {
        id -> Uuid,
        venue_id -> Uuid,
        sender_session_id -> Uuid,
        text -> Text,
        created_at -> Timestamptz,
        sequence_number -> Int8,
    }
}

diesel::joinable!(token_epochs -> venues (venue_id));
diesel::joinable!(visitor_sessions -> venues (venue_id));
diesel::joinable!(chat_messages -> venues (venue_id));

diesel::allow_tables_to_appear_in_same_query!(venues, token_epochs, visitor_sessions, chat_messages);
