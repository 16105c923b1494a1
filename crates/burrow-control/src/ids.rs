//! Short id generation for tunnels and in-flight requests

use uuid::Uuid;

/// Length of generated tunnel and request ids.
const ID_LEN: usize = 8;

/// Draw a short URL-safe id: the leading hex of a v4 UUID (32 bits of
/// entropy at 8 chars). Callers regenerate on collision.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
}
