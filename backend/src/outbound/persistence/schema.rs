//! Diesel table definitions for the application namespace.
//!
//! These definitions must match the embedded migrations exactly. Tables are
//! unqualified; pooled connections resolve them through their `search_path`.

diesel::table! {
    /// Catalogue of books.
    books (id) {
        /// Primary key: UUID v4 identifier.
        id -> Uuid,
        /// Title (max 255 characters).
        name -> Varchar,
        description -> Text,
        created_at -> Timestamptz,
        /// Set to `now()` by every update.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// User accounts. `email` is unique.
    users (id) {
        id -> Uuid,
        email -> Varchar,
        first_name -> Varchar,
        last_name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
