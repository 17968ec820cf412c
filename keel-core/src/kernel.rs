// The kernel: drives a request through the full lifecycle

use crate::arguments::ArgumentResolver;
use crate::container::Container;
use crate::controller::{ControllerResolver, ControllerResult, ControllerSpec};
use crate::events::{
    keys, ControllerArgumentsEvent, ControllerEvent, ExceptionEvent, FinishRequestEvent,
    RequestEvent, ResponseEvent, TerminateEvent, ViewEvent,
};
use crate::http::{CONTROLLER_ATTRIBUTE, ROUTE_ATTRIBUTE};
use crate::routing::{MatchOutcome, Router};
use crate::{Error, HttpRequest, HttpResponse, RequestKind};
use keel_events::EventDispatcher;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on internal forwarding before a sub-request is refused
const MAX_FORWARD_DEPTH: u32 = 32;

/// Orchestrates routing, the container, the resolvers, and the event bus
/// into the request lifecycle:
///
/// 1. `request` event (early response short-circuits to 6)
/// 2. routing (failures take the exception path as 404/405)
/// 3. controller resolution + `controller` event
/// 4. argument resolution + `controller_arguments` event, invocation,
///    `view` event for raw results
/// 5. `exception` event on any failure; recovery or propagation
/// 6. `response` event
/// 7. `terminate` event after the response is sent (main requests)
///
/// `finish_request` fires exactly once per handled request, on every exit
/// path. The kernel never swallows an unrecovered error and never returns
/// an empty result.
pub struct Kernel {
    router: Arc<Router>,
    container: Arc<Container>,
    dispatcher: EventDispatcher,
    controllers: ControllerResolver,
    arguments: ArgumentResolver,
}

impl Kernel {
    pub fn new(router: Arc<Router>, container: Arc<Container>, dispatcher: EventDispatcher) -> Self {
        Self {
            controllers: ControllerResolver::new(container.clone()),
            arguments: ArgumentResolver::new(container.clone()),
            router,
            container,
            dispatcher,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Convert a request into a response, or propagate the failure.
    pub async fn handle(
        &self,
        request: HttpRequest,
        kind: RequestKind,
    ) -> Result<HttpResponse, Error> {
        debug!(method = %request.method, path = %request.path, ?kind, "Handling request");

        match self.handle_raw(request, kind).await {
            Ok((response, request)) => {
                self.finish_request(&request, kind);
                Ok(response)
            }
            Err((error, request)) => {
                let result = self.handle_throwable(error, &request, kind).await;
                self.finish_request(&request, kind);
                result
            }
        }
    }

    /// Re-enter the kernel for an internally forwarded sub-request.
    pub async fn forward(&self, mut request: HttpRequest) -> Result<HttpResponse, Error> {
        if request.forward_depth >= MAX_FORWARD_DEPTH {
            return Err(Error::Internal(format!(
                "sub-request forwarding depth exceeded {MAX_FORWARD_DEPTH}"
            )));
        }
        request.forward_depth += 1;
        self.handle(request, RequestKind::Sub).await
    }

    /// Post-send notification. Failures here are logged and swallowed; the
    /// response is already on the wire.
    pub fn terminate(&self, request: &HttpRequest, response: &HttpResponse) {
        let mut event =
            TerminateEvent::new(request.clone(), RequestKind::Main, response.clone());
        if let Err(error) = self.dispatcher.dispatch(&mut event, keys::TERMINATE) {
            warn!(error = %error, "Terminate listener failed after response was sent");
        }
    }

    async fn handle_raw(
        &self,
        request: HttpRequest,
        kind: RequestKind,
    ) -> Result<(HttpResponse, HttpRequest), (Error, HttpRequest)> {
        // Stage 1: request listeners may decide the response outright.
        let mut event = RequestEvent::new(request, kind);
        if let Err(error) = self.dispatcher.dispatch(&mut event, keys::REQUEST) {
            let request = event.into_request();
            return Err((Error::from_event(error), request));
        }
        if let Some(response) = event.take_response() {
            debug!("Request listener produced an early response");
            let request = event.into_request();
            let response = self
                .filter_response(response, &request, kind)
                .map_err(|error| (error, request.clone()))?;
            return Ok((response, request));
        }
        let mut request = event.into_request();

        // Stage 2: routing. Failures are synthesized into the exception path.
        match self.router.match_request(&request.path, &request.method) {
            MatchOutcome::Matched(matched) => {
                request.set_attribute(ROUTE_ATTRIBUTE, Value::String(matched.name));
                for (name, value) in matched.params {
                    request.set_attribute(name, value);
                }
            }
            MatchOutcome::NotFound => {
                let error =
                    Error::RouteNotFound(format!("{} {}", request.method, request.path));
                return Err((error, request));
            }
            MatchOutcome::MethodNotAllowed { allowed } => {
                let error = Error::MethodNotAllowed {
                    path: request.path.clone(),
                    allowed,
                };
                return Err((error, request));
            }
        }

        // Stage 3: controller resolution.
        let spec = match request.attribute(CONTROLLER_ATTRIBUTE) {
            Some(value) => match ControllerSpec::from_attribute(value) {
                Ok(spec) => spec,
                Err(error) => return Err((error, request)),
            },
            None => {
                let identifier = request.route_name().unwrap_or("<unrouted>").to_string();
                return Err((
                    Error::UnresolvableController {
                        identifier,
                        reason: "route declares no `_controller` default".to_string(),
                    },
                    request,
                ));
            }
        };
        let controller = match self.controllers.resolve(&spec) {
            Ok(controller) => controller,
            Err(error) => return Err((error, request)),
        };

        let mut event = ControllerEvent::new(request, kind, controller);
        if let Err(error) = self.dispatcher.dispatch(&mut event, keys::CONTROLLER) {
            let (request, _) = event.into_parts();
            return Err((Error::from_event(error), request));
        }
        let (request, controller) = event.into_parts();

        // Stage 4: argument resolution and execution.
        let arguments = match self.arguments.resolve(&request, &controller) {
            Ok(arguments) => arguments,
            Err(error) => return Err((error, request)),
        };
        let mut event = ControllerArgumentsEvent::new(request, kind, controller, arguments);
        if let Err(error) = self
            .dispatcher
            .dispatch(&mut event, keys::CONTROLLER_ARGUMENTS)
        {
            let (request, _, _) = event.into_parts();
            return Err((Error::from_event(error), request));
        }
        let (mut request, controller, arguments) = event.into_parts();

        debug!(controller = controller.name(), "Invoking controller");
        let result = match controller.invoke(arguments).await {
            Ok(result) => result,
            Err(error) => return Err((error, request)),
        };

        let response = match result {
            ControllerResult::Response(response) => response,
            ControllerResult::Raw(value) => {
                // A raw result needs a view listener to become a response.
                let mut event = ViewEvent::new(request, kind, value);
                if let Err(error) = self.dispatcher.dispatch(&mut event, keys::VIEW) {
                    let request = event.into_request();
                    return Err((Error::from_event(error), request));
                }
                match event.take_response() {
                    Some(response) => {
                        request = event.into_request();
                        response
                    }
                    None => {
                        let request = event.into_request();
                        return Err((
                            Error::ViewNotConvertible {
                                controller: controller.name().to_string(),
                            },
                            request,
                        ));
                    }
                }
            }
        };

        let response = self
            .filter_response(response, &request, kind)
            .map_err(|error| (error, request.clone()))?;
        Ok((response, request))
    }

    /// Stage 6: the response event, applied to every outgoing response,
    /// including recovered ones.
    fn filter_response(
        &self,
        response: HttpResponse,
        request: &HttpRequest,
        kind: RequestKind,
    ) -> Result<HttpResponse, Error> {
        let mut event = ResponseEvent::new(request.clone(), kind, response);
        self.dispatcher
            .dispatch(&mut event, keys::RESPONSE)
            .map_err(Error::from_event)?;
        Ok(event.into_response())
    }

    /// Stage 5: offer the failure to exception listeners; adopt a recovery
    /// response or propagate the (possibly replaced) error.
    async fn handle_throwable(
        &self,
        error: Error,
        request: &HttpRequest,
        kind: RequestKind,
    ) -> Result<HttpResponse, Error> {
        debug!(error = %error, "Entering exception stage");

        let mut event = ExceptionEvent::new(request.clone(), kind, error);
        if let Err(dispatch_error) = self.dispatcher.dispatch(&mut event, keys::EXCEPTION) {
            warn!(error = %dispatch_error, "Exception listener itself failed");
        }
        let (error, response, allow_custom) = event.into_parts();

        match response {
            Some(mut response) => {
                // The recovery response keeps the error's status unless the
                // listener opted into a custom code or already set an
                // error/redirect status.
                if !allow_custom
                    && !response.is_client_error()
                    && !response.is_server_error()
                    && !response.is_redirect()
                {
                    response.status = error.status_code();
                }
                self.filter_response(response, request, kind)
            }
            None => Err(error),
        }
    }

    /// Dispatched once per handled request, success or failure.
    fn finish_request(&self, request: &HttpRequest, kind: RequestKind) {
        let mut event = FinishRequestEvent::new(request.clone(), kind);
        if let Err(error) = self.dispatcher.dispatch(&mut event, keys::FINISH_REQUEST) {
            warn!(error = %error, "finish_request listener failed");
        }
    }
}
