// Kernel lifecycle events

use crate::controller::ControllerHandle;
use crate::definition::Resolved;
use crate::{Error, HttpRequest, HttpResponse, RequestKind};
use keel_events::{Event, Propagation};
use std::any::Any;

/// Event keys dispatched by the kernel, in lifecycle order
pub mod keys {
    pub const REQUEST: &str = "request";
    pub const CONTROLLER: &str = "controller";
    pub const CONTROLLER_ARGUMENTS: &str = "controller_arguments";
    pub const VIEW: &str = "view";
    pub const RESPONSE: &str = "response";
    pub const EXCEPTION: &str = "exception";
    pub const TERMINATE: &str = "terminate";
    pub const FINISH_REQUEST: &str = "finish_request";
}

macro_rules! kernel_event {
    ($ty:ident, $name:expr) => {
        impl Event for $ty {
            fn event_name(&self) -> &str {
                $name
            }

            fn propagation_stopped(&self) -> bool {
                self.propagation.is_stopped()
            }

            fn stop_propagation(&mut self) {
                self.propagation.stop();
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        impl $ty {
            pub fn request(&self) -> &HttpRequest {
                &self.request
            }

            pub fn request_mut(&mut self) -> &mut HttpRequest {
                &mut self.request
            }

            pub fn kind(&self) -> RequestKind {
                self.kind
            }

            pub fn is_main_request(&self) -> bool {
                self.kind.is_main()
            }
        }
    };
}

/// Dispatched before routing. A listener that sets a response short-circuits
/// the lifecycle straight to the response stage.
pub struct RequestEvent {
    request: HttpRequest,
    kind: RequestKind,
    response: Option<HttpResponse>,
    propagation: Propagation,
}

kernel_event!(RequestEvent, "kernel.request");

impl RequestEvent {
    pub fn new(request: HttpRequest, kind: RequestKind) -> Self {
        Self {
            request,
            kind,
            response: None,
            propagation: Propagation::new(),
        }
    }

    /// Decide the response early; skips routing and the controller entirely
    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub(crate) fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }

    pub(crate) fn into_request(self) -> HttpRequest {
        self.request
    }
}

/// Dispatched once the controller is resolved; listeners may replace the
/// invokable.
pub struct ControllerEvent {
    request: HttpRequest,
    kind: RequestKind,
    controller: ControllerHandle,
    propagation: Propagation,
}

kernel_event!(ControllerEvent, "kernel.controller");

impl ControllerEvent {
    pub fn new(request: HttpRequest, kind: RequestKind, controller: ControllerHandle) -> Self {
        Self {
            request,
            kind,
            controller,
            propagation: Propagation::new(),
        }
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn set_controller(&mut self, controller: ControllerHandle) {
        self.controller = controller;
    }

    pub(crate) fn into_parts(self) -> (HttpRequest, ControllerHandle) {
        (self.request, self.controller)
    }
}

/// Dispatched after argument resolution; listeners may rewrite the bound
/// argument list before the controller runs.
pub struct ControllerArgumentsEvent {
    request: HttpRequest,
    kind: RequestKind,
    controller: ControllerHandle,
    arguments: Vec<Resolved>,
    propagation: Propagation,
}

kernel_event!(ControllerArgumentsEvent, "kernel.controller_arguments");

impl ControllerArgumentsEvent {
    pub fn new(
        request: HttpRequest,
        kind: RequestKind,
        controller: ControllerHandle,
        arguments: Vec<Resolved>,
    ) -> Self {
        Self {
            request,
            kind,
            controller,
            arguments,
            propagation: Propagation::new(),
        }
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn arguments(&self) -> &[Resolved] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Vec<Resolved> {
        &mut self.arguments
    }

    pub(crate) fn into_parts(self) -> (HttpRequest, ControllerHandle, Vec<Resolved>) {
        (self.request, self.controller, self.arguments)
    }
}

/// Dispatched when the controller returned a raw value instead of a
/// response. Some listener must convert it, or the request fails.
pub struct ViewEvent {
    request: HttpRequest,
    kind: RequestKind,
    result: serde_json::Value,
    response: Option<HttpResponse>,
    propagation: Propagation,
}

kernel_event!(ViewEvent, "kernel.view");

impl ViewEvent {
    pub fn new(request: HttpRequest, kind: RequestKind, result: serde_json::Value) -> Self {
        Self {
            request,
            kind,
            result,
            response: None,
            propagation: Propagation::new(),
        }
    }

    /// The controller's raw return value
    pub fn result(&self) -> &serde_json::Value {
        &self.result
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub(crate) fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }

    pub(crate) fn into_request(self) -> HttpRequest {
        self.request
    }
}

/// Dispatched just before the response leaves the kernel; listeners may
/// mutate or replace it.
pub struct ResponseEvent {
    request: HttpRequest,
    kind: RequestKind,
    response: HttpResponse,
    propagation: Propagation,
}

kernel_event!(ResponseEvent, "kernel.response");

impl ResponseEvent {
    pub fn new(request: HttpRequest, kind: RequestKind, response: HttpResponse) -> Self {
        Self {
            request,
            kind,
            response,
            propagation: Propagation::new(),
        }
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = response;
    }

    pub(crate) fn into_response(self) -> HttpResponse {
        self.response
    }
}

/// Dispatched when any stage failed. A listener may recover by setting a
/// response, and may replace the error that propagates otherwise.
pub struct ExceptionEvent {
    request: HttpRequest,
    kind: RequestKind,
    error: Error,
    response: Option<HttpResponse>,
    allow_custom_response_code: bool,
    propagation: Propagation,
}

kernel_event!(ExceptionEvent, "kernel.exception");

impl ExceptionEvent {
    pub fn new(request: HttpRequest, kind: RequestKind, error: Error) -> Self {
        Self {
            request,
            kind,
            error,
            response: None,
            allow_custom_response_code: false,
            propagation: Propagation::new(),
        }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Replace the error that will propagate if no response is set
    pub fn set_error(&mut self, error: Error) {
        self.error = error;
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Keep the recovery response's status even if it is not an error code
    pub fn allow_custom_response_code(&mut self) {
        self.allow_custom_response_code = true;
    }

    pub(crate) fn into_parts(self) -> (Error, Option<HttpResponse>, bool) {
        (self.error, self.response, self.allow_custom_response_code)
    }
}

/// Dispatched on every exit path once a request's lifecycle is over
pub struct FinishRequestEvent {
    request: HttpRequest,
    kind: RequestKind,
    propagation: Propagation,
}

kernel_event!(FinishRequestEvent, "kernel.finish_request");

impl FinishRequestEvent {
    pub fn new(request: HttpRequest, kind: RequestKind) -> Self {
        Self {
            request,
            kind,
            propagation: Propagation::new(),
        }
    }
}

/// Dispatched after the response has been sent; informational only
pub struct TerminateEvent {
    request: HttpRequest,
    kind: RequestKind,
    response: HttpResponse,
    propagation: Propagation,
}

kernel_event!(TerminateEvent, "kernel.terminate");

impl TerminateEvent {
    pub fn new(request: HttpRequest, kind: RequestKind, response: HttpResponse) -> Self {
        Self {
            request,
            kind,
            response,
            propagation: Propagation::new(),
        }
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }
}
