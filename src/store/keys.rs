//! Store key conventions
//!
//! Key layout shared with other processes using the same backend:
//!
//! - `room:{room}:users`    set of member user ids
//! - `user:{user}:rooms`    set of rooms the user joined
//! - `room:{room}:messages` newest-first list of message ids, bounded
//! - `message:{id}`         field map for one message
//! - `room:{room}`          pub/sub channel carrying published message ids

/// Membership set for a room
pub fn room_members(room_id: &str) -> String {
    format!("room:{room_id}:users")
}

/// Set of rooms a user has joined
pub fn user_rooms(user_id: &str) -> String {
    format!("user:{user_id}:rooms")
}

/// Newest-first message id list for a room
pub fn room_messages(room_id: &str) -> String {
    format!("room:{room_id}:messages")
}

/// Field-map record for a message
pub fn message_record(message_id: &str) -> String {
    format!("message:{message_id}")
}

/// Pub/sub channel for a room
pub fn room_channel(room_id: &str) -> String {
    format!("room:{room_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(room_members("weather"), "room:weather:users");
        assert_eq!(user_rooms("alice"), "user:alice:rooms");
        assert_eq!(room_messages("weather"), "room:weather:messages");
        assert_eq!(message_record("m1"), "message:m1");
        assert_eq!(room_channel("weather"), "room:weather");
    }
}
