//! Schema-validated message router shared by host and client.
//!
//! The router is generic over a context type `C` (the host or client
//! core). It owns no game state itself: handlers receive `&mut C` for
//! the duration of one message, which keeps the whole peer
//! single-threaded without any locking.
//!
//! ```text
//! raw JSON ─→ type known? ─→ schema ok? ─→ middleware chain ─→ decode ─→ handlers
//!                 │              │                │                │          │
//!                 └──────────────┴────────────────┴────────────────┴──────────┴─→ Err (logged, dropped)
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::{Message, MessageType, PeerId, ProtocolError, schema};

/// Error type handlers may return. Any `std::error::Error` converts.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message handler: `(context, sender, message)`.
pub type Handler<C> = Box<dyn FnMut(&mut C, &PeerId, &Message) -> Result<(), HandlerError> + Send>;

/// A middleware interceptor. Returning [`Flow::Next`] passes the message
/// on to the next middleware (and finally the handlers).
pub type Middleware<C> = Box<dyn FnMut(&mut C, &PeerId, &Message) -> Flow + Send>;

/// Outcome of a middleware step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue down the chain.
    Next,
    /// Drop the message.
    Halt,
}

/// Registration metadata for a handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Handlers with a higher priority run first. Equal priorities run
    /// in registration order.
    pub priority: i32,
    /// Human-readable label used in logs.
    pub description: String,
}

impl HandlerOptions {
    pub fn new(priority: i32, description: impl Into<String>) -> Self {
        Self {
            priority,
            description: description.into(),
        }
    }
}

struct Registered<C> {
    handler: Handler<C>,
    options: HandlerOptions,
}

/// Routes incoming messages to registered handlers.
pub struct NetworkProtocol<C> {
    handlers: HashMap<MessageType, Vec<Registered<C>>>,
    middleware: Vec<Middleware<C>>,
}

impl<C> NetworkProtocol<C> {
    /// Creates a router with no handlers and no middleware.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            middleware: Vec::new(),
        }
    }

    /// Registers a handler for a message type.
    pub fn register_handler<F>(&mut self, message_type: MessageType, options: HandlerOptions, handler: F)
    where
        F: FnMut(&mut C, &PeerId, &Message) -> Result<(), HandlerError> + Send + 'static,
    {
        tracing::trace!(%message_type, description = %options.description, "handler registered");
        let entries = self.handlers.entry(message_type).or_default();
        entries.push(Registered {
            handler: Box::new(handler),
            options,
        });
        // Stable sort: equal priorities keep registration order.
        entries.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));
    }

    /// Appends a middleware to the chain.
    pub fn use_middleware<F>(&mut self, middleware: F)
    where
        F: FnMut(&mut C, &PeerId, &Message) -> Flow + Send + 'static,
    {
        self.middleware.push(Box::new(middleware));
    }

    /// Returns `true` if at least one handler exists for the type.
    pub fn has_handler(&self, message_type: MessageType) -> bool {
        self.handlers
            .get(&message_type)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Validates, intercepts, decodes and dispatches a raw message.
    ///
    /// # Errors
    /// Any stage failing yields a [`ProtocolError`]; handlers after a
    /// failing handler are not run.
    pub fn dispatch(&mut self, ctx: &mut C, from: &PeerId, raw: Value) -> Result<MessageType, ProtocolError> {
        let message_type = schema::validate(&raw)?;

        let message: Message = serde_json::from_value(raw).map_err(ProtocolError::Decode)?;

        for middleware in &mut self.middleware {
            if middleware(ctx, from, &message) == Flow::Halt {
                return Err(ProtocolError::Halted(message_type));
            }
        }

        let entries = self
            .handlers
            .get_mut(&message_type)
            .filter(|entries| !entries.is_empty())
            .ok_or(ProtocolError::NoHandler(message_type))?;

        for entry in entries.iter_mut() {
            (entry.handler)(ctx, from, &message).map_err(|e| ProtocolError::Handler {
                message_type,
                reason: format!("{} ({})", e, entry.options.description),
            })?;
        }

        Ok(message_type)
    }

    /// Like [`dispatch`](Self::dispatch) but logs failures and reports
    /// only whether the message was delivered.
    pub fn handle_message(&mut self, ctx: &mut C, from: &PeerId, raw: Value) -> bool {
        match self.dispatch(ctx, from, raw) {
            Ok(message_type) => {
                tracing::trace!(%from, %message_type, "message handled");
                true
            }
            Err(error) => {
                tracing::warn!(%from, %error, "message dropped");
                false
            }
        }
    }
}

impl<C> Default for NetworkProtocol<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Log {
        seen: Vec<String>,
    }

    fn peer() -> PeerId {
        PeerId::from("peer-1")
    }

    fn heartbeat() -> Value {
        json!({"type": "HEARTBEAT", "timestamp": 10})
    }

    #[test]
    fn test_handle_message_invokes_handler() {
        let mut router = NetworkProtocol::<Log>::new();
        router.register_handler(MessageType::Heartbeat, HandlerOptions::default(), |log, from, msg| {
            if let Message::Heartbeat { timestamp } = msg {
                log.seen.push(format!("{from}:{timestamp}"));
            }
            Ok(())
        });

        let mut log = Log::default();
        assert!(router.handle_message(&mut log, &peer(), heartbeat()));
        assert_eq!(log.seen, vec!["peer-1:10"]);
    }

    #[test]
    fn test_handlers_run_by_descending_priority_then_registration() {
        let mut router = NetworkProtocol::<Log>::new();
        for (priority, label) in [(0, "low-a"), (5, "high"), (0, "low-b")] {
            router.register_handler(
                MessageType::Heartbeat,
                HandlerOptions::new(priority, label),
                move |log, _, _| {
                    log.seen.push(label.to_string());
                    Ok(())
                },
            );
        }

        let mut log = Log::default();
        router.dispatch(&mut log, &peer(), heartbeat()).unwrap();
        assert_eq!(log.seen, vec!["high", "low-a", "low-b"]);
    }

    #[test]
    fn test_handle_message_rejects_bad_input_without_calling_handler() {
        let mut router = NetworkProtocol::<Log>::new();
        router.register_handler(MessageType::Heartbeat, HandlerOptions::default(), |log, _, _| {
            log.seen.push("called".into());
            Ok(())
        });

        let mut log = Log::default();
        let from = peer();
        assert!(!router.handle_message(&mut log, &from, json!({"timestamp": 1})));
        assert!(!router.handle_message(&mut log, &from, json!({"type": "NOPE"})));
        assert!(!router.handle_message(&mut log, &from, json!({"type": "HEARTBEAT"})));
        assert!(log.seen.is_empty());
    }

    #[test]
    fn test_dispatch_without_handler_is_an_error() {
        let mut router = NetworkProtocol::<Log>::new();
        let err = router
            .dispatch(&mut Log::default(), &peer(), json!({"type": "START_GAME"}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NoHandler(MessageType::StartGame)));
    }

    #[test]
    fn test_middleware_halt_drops_message() {
        let mut router = NetworkProtocol::<Log>::new();
        router.use_middleware(|log, _, msg| {
            log.seen.push(format!("mw:{}", msg.message_type()));
            if msg.message_type() == MessageType::Heartbeat {
                Flow::Halt
            } else {
                Flow::Next
            }
        });
        router.register_handler(MessageType::Heartbeat, HandlerOptions::default(), |log, _, _| {
            log.seen.push("handler".into());
            Ok(())
        });

        let mut log = Log::default();
        let err = router.dispatch(&mut log, &peer(), heartbeat()).unwrap_err();
        assert!(matches!(err, ProtocolError::Halted(MessageType::Heartbeat)));
        assert_eq!(log.seen, vec!["mw:HEARTBEAT"]);
    }

    #[test]
    fn test_handler_error_is_reported_and_stops_chain() {
        let mut router = NetworkProtocol::<Log>::new();
        router.register_handler(MessageType::Heartbeat, HandlerOptions::new(1, "fails"), |_, _, _| {
            Err("boom".into())
        });
        router.register_handler(MessageType::Heartbeat, HandlerOptions::new(0, "after"), |log, _, _| {
            log.seen.push("after".into());
            Ok(())
        });

        let mut log = Log::default();
        let err = router.dispatch(&mut log, &peer(), heartbeat()).unwrap_err();
        match err {
            ProtocolError::Handler { reason, .. } => assert!(reason.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.seen.is_empty());
    }
}
