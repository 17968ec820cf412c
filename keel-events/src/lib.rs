//! Event dispatching for the Keel framework.
//!
//! A synchronous, priority-ordered, stoppable publish/subscribe bus. The
//! kernel drives its request lifecycle through this dispatcher; applications
//! can register their own listeners on the kernel's event keys or define
//! events of their own.
//!
//! # Example
//!
//! ```rust
//! use keel_events::{Event, EventDispatcher, Propagation};
//! use std::any::Any;
//!
//! #[derive(Debug, Default)]
//! struct Greeting {
//!     propagation: Propagation,
//!     message: String,
//! }
//!
//! impl Event for Greeting {
//!     fn event_name(&self) -> &str { "greeting" }
//!     fn propagation_stopped(&self) -> bool { self.propagation.is_stopped() }
//!     fn stop_propagation(&mut self) { self.propagation.stop(); }
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn Any { self }
//! }
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher.listen::<Greeting, _>("greeting", 0, |event| {
//!     event.message.push_str(", world");
//!     Ok(())
//! });
//!
//! let mut event = Greeting { message: "hello".into(), ..Default::default() };
//! dispatcher.dispatch(&mut event, "greeting").unwrap();
//! assert_eq!(event.message, "hello, world");
//! ```

pub mod dispatcher;
pub mod event;

pub use dispatcher::{EventDispatcher, EventError, ListenerFn, ListenerId, ListenerResult};
pub use event::{Event, EventMetadata, Propagation};
