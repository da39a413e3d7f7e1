#![forbid(unsafe_code)]

mod ping;

pub use ping::PingHandler;

use crate::registry::HandlerRegistry;

/// All built-in handlers. Built once at process start and passed by
/// reference; nothing registers at call time.
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(PingHandler));
    registry
}
