//! Panic payload formatting for task diagnostics.

use std::any::Any;

/// Best-effort text of a panic payload.
///
/// `panic!` payloads are either `&'static str` or `String`; anything else is
/// reported generically.
///
/// ```
/// use jt808::panic::panic_message;
///
/// assert_eq!(panic_message(&"boom"), "boom");
/// assert_eq!(panic_message(&String::from("boom")), "boom");
/// assert_eq!(panic_message(&5_u32), "non-string panic payload");
/// ```
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
