// Keel - a request-processing runtime for Rust
//
// This library wires a declarative dependency-injection container, a
// pattern-compiling router, and a priority-ordered event bus into an
// event-driven request lifecycle kernel.

// Re-export core functionality
pub use keel_core::*;

// Re-export the event bus under its own namespace as well
pub use keel_events as events;

// Prelude for common imports
pub mod prelude {
    pub use keel_core::{
        Argument,
        ArgumentResolver,
        Constructor,
        Container,
        ContainerBuilder,
        ControllerHandle,
        ControllerResolver,
        ControllerResult,
        ControllerSpec,
        Definition,
        Error,
        Factory,
        HttpRequest,
        HttpResponse,
        Kernel,
        KernelBuilder,
        MatchOutcome,
        ParamSpec,
        Reference,
        RequestKind,
        Resolved,
        Route,
        RouteCollection,
        RouteConfig,
        Router,
        ServiceConfigurator,
    };
    pub use keel_core::events::keys;
    pub use keel_events::{Event, EventDispatcher, ListenerResult, Propagation};
}
