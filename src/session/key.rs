//! Device keys and the policy deriving them from inbound messages.

use std::{borrow::Borrow, fmt};

use crate::message::Message;

/// Key identifying a device in the [`SessionDirectory`](super::SessionDirectory).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// Create a key from any string-like value.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self { Self(value) }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Derives the directory key for a connection from one of its messages.
///
/// Returning `None` leaves the connection unregistered; the next message is
/// tried again. Any `Fn(&Message) -> Option<SessionKey>` closure implements
/// this trait.
pub trait KeyExtractor: Send + Sync + 'static {
    /// Extract the key for `message`, if it carries one.
    fn extract(&self, message: &Message) -> Option<SessionKey>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Message) -> Option<SessionKey> + Send + Sync + 'static,
{
    fn extract(&self, message: &Message) -> Option<SessionKey> { self(message) }
}

/// Default extractor keying devices by the header phone number.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhoneKey;

impl KeyExtractor for PhoneKey {
    fn extract(&self, message: &Message) -> Option<SessionKey> {
        let phone = message.phone();
        (!phone.is_empty()).then(|| SessionKey::from(phone))
    }
}
