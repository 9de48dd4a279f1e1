// Identifier helpers.
//
// Row keys use UUIDv7 so `token_log` stays ordered by insertion time.
// Anything handed to a client and later presented back (jti, verification
// and reset ids) is UUIDv4: 122 random bits from the OS CSPRNG, no timestamp.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate an unguessable identifier for tokens handed out to clients.
pub fn opaque_id() -> Uuid {
    Uuid::new_v4()
}

/// Parse a client-supplied opaque id. Returns `None` for anything that is
/// not a well-formed UUID.
pub fn parse_opaque_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}
