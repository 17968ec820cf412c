// Controller identifiers and their normalization into invokables

use crate::definition::{ParamSpec, Resolved};
use crate::{Container, Error, HttpResponse};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::trace;

/// Conventional action name for invokable controller services
pub const DEFAULT_ACTION: &str = "invoke";

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type InvokeFn =
    Arc<dyn Fn(Vec<Resolved>) -> BoxFuture<Result<ControllerResult, Error>> + Send + Sync>;

/// What a controller invocation produced: either a finished response, or a
/// raw value that a view listener must convert.
#[derive(Debug)]
pub enum ControllerResult {
    Response(HttpResponse),
    Raw(Value),
}

impl From<HttpResponse> for ControllerResult {
    fn from(response: HttpResponse) -> Self {
        ControllerResult::Response(response)
    }
}

impl From<Value> for ControllerResult {
    fn from(value: Value) -> Self {
        ControllerResult::Raw(value)
    }
}

/// The canonical invokable every controller identifier normalizes into: a
/// declared parameter table plus an async invoke closure.
#[derive(Clone)]
pub struct ControllerHandle {
    name: String,
    parameters: Vec<ParamSpec>,
    invoke: InvokeFn,
}

impl ControllerHandle {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        parameters: Vec<ParamSpec>,
        invoke: F,
    ) -> Self
    where
        F: Fn(Vec<Resolved>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ControllerResult, Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            parameters,
            invoke: Arc::new(move |args| Box::pin(invoke(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub async fn invoke(&self, args: Vec<Resolved>) -> Result<ControllerResult, Error> {
        (self.invoke)(args).await
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("name", &self.name)
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

/// The accepted controller identifier shapes, as a tagged union.
///
/// Each variant maps to exactly one normalization rule in
/// [`ControllerResolver::resolve`].
#[derive(Clone, Debug)]
pub enum ControllerSpec {
    /// Already invokable; returned as-is
    Handler(ControllerHandle),
    /// A service id following the invokable convention (action named
    /// [`DEFAULT_ACTION`])
    Service(String),
    /// A `"service_id::action"` pair
    ServiceMethod { id: String, method: String },
}

impl ControllerSpec {
    /// Parse a string identifier: `"id::method"` or a bare service id.
    pub fn parse(identifier: &str) -> Self {
        match identifier.split_once("::") {
            Some((id, method)) => ControllerSpec::ServiceMethod {
                id: id.to_string(),
                method: method.to_string(),
            },
            None => ControllerSpec::Service(identifier.to_string()),
        }
    }

    /// Interpret a `_controller` request attribute
    pub fn from_attribute(value: &Value) -> Result<Self, Error> {
        match value.as_str() {
            Some(identifier) => Ok(Self::parse(identifier)),
            None => Err(Error::UnresolvableController {
                identifier: value.to_string(),
                reason: "controller attribute must be a string identifier".to_string(),
            }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ControllerSpec::Handler(handle) => handle.name().to_string(),
            ControllerSpec::Service(id) => id.clone(),
            ControllerSpec::ServiceMethod { id, method } => format!("{id}::{method}"),
        }
    }
}

impl From<&str> for ControllerSpec {
    fn from(identifier: &str) -> Self {
        Self::parse(identifier)
    }
}

/// Normalizes every [`ControllerSpec`] shape into one [`ControllerHandle`],
/// resolving service-backed controllers through the container's explicit
/// action tables.
pub struct ControllerResolver {
    container: Arc<Container>,
}

impl ControllerResolver {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }

    pub fn resolve(&self, spec: &ControllerSpec) -> Result<ControllerHandle, Error> {
        trace!(controller = %spec.describe(), "Resolving controller");
        match spec {
            ControllerSpec::Handler(handle) => Ok(handle.clone()),
            ControllerSpec::Service(id) => self.action(id, DEFAULT_ACTION, &spec.describe()),
            ControllerSpec::ServiceMethod { id, method } => {
                self.action(id, method, &spec.describe())
            }
        }
    }

    fn action(
        &self,
        id: &str,
        method: &str,
        identifier: &str,
    ) -> Result<ControllerHandle, Error> {
        let target = self.container.resolve_alias(id)?;
        let definition =
            self.container
                .definition(&target)
                .ok_or_else(|| Error::UnresolvableController {
                    identifier: identifier.to_string(),
                    reason: format!("service `{id}` is not registered"),
                })?;

        let factory = definition.actions.get(method).cloned().ok_or_else(|| {
            Error::UnresolvableController {
                identifier: identifier.to_string(),
                reason: format!("service `{id}` exposes no action `{method}`"),
            }
        })?;

        let instance = self.container.controller_instance(&target)?;
        factory(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ContainerBuilder;
    use crate::definition::Constructor;
    use serde_json::json;

    struct Greeter {
        salutation: String,
    }

    impl Greeter {
        fn greeting(&self, name: &str) -> String {
            format!("{}, {name}", self.salutation)
        }
    }

    fn container_with_greeter() -> Arc<Container> {
        let mut builder = ContainerBuilder::new();
        builder
            .register(
                "greeter",
                Constructor::of::<Greeter, _>(|_| {
                    Ok(Greeter {
                        salutation: "Hello".into(),
                    })
                }),
            )
            .with_action::<Greeter, _>("greet", |greeter| {
                ControllerHandle::new(
                    "greeter::greet",
                    vec![ParamSpec::string("name")],
                    move |args| {
                        let greeter = greeter.clone();
                        async move {
                            let name = args[0].as_str().unwrap_or("stranger").to_string();
                            Ok(HttpResponse::text(greeter.greeting(&name)).into())
                        }
                    },
                )
            })
            .with_action::<Greeter, _>(DEFAULT_ACTION, |greeter| {
                ControllerHandle::new("greeter", vec![], move |_| {
                    let greeter = greeter.clone();
                    async move { Ok(HttpResponse::text(greeter.greeting("world")).into()) }
                })
            });
        Arc::new(builder.compile().unwrap())
    }

    #[test]
    fn test_parse_shapes() {
        assert!(matches!(
            ControllerSpec::parse("blog.controller::show"),
            ControllerSpec::ServiceMethod { .. }
        ));
        assert!(matches!(
            ControllerSpec::parse("blog.controller"),
            ControllerSpec::Service(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_handler_passthrough() {
        let container = Arc::new(ContainerBuilder::new().compile().unwrap());
        let resolver = ControllerResolver::new(container);

        let handle = ControllerHandle::new("inline", vec![], |_| async {
            Ok(HttpResponse::ok().into())
        });
        let resolved = resolver
            .resolve(&ControllerSpec::Handler(handle))
            .unwrap();
        let result = resolved.invoke(vec![]).await.unwrap();
        assert!(matches!(result, ControllerResult::Response(_)));
    }

    #[tokio::test]
    async fn test_resolve_service_method() {
        let resolver = ControllerResolver::new(container_with_greeter());
        let handle = resolver
            .resolve(&ControllerSpec::parse("greeter::greet"))
            .unwrap();

        assert_eq!(handle.parameters().len(), 1);
        let result = handle
            .invoke(vec![Resolved::Value(json!("keel"))])
            .await
            .unwrap();
        match result {
            ControllerResult::Response(response) => {
                assert_eq!(response.body_string(), "Hello, keel")
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invokable_service_convention() {
        let resolver = ControllerResolver::new(container_with_greeter());
        let handle = resolver
            .resolve(&ControllerSpec::parse("greeter"))
            .unwrap();

        let result = handle.invoke(vec![]).await.unwrap();
        match result {
            ControllerResult::Response(response) => {
                assert_eq!(response.body_string(), "Hello, world")
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_service() {
        let resolver = ControllerResolver::new(container_with_greeter());
        let err = resolver
            .resolve(&ControllerSpec::parse("ghost::show"))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvableController { .. }));
    }

    #[test]
    fn test_unknown_action() {
        let resolver = ControllerResolver::new(container_with_greeter());
        let err = resolver
            .resolve(&ControllerSpec::parse("greeter::missing"))
            .unwrap_err();
        match err {
            Error::UnresolvableController { reason, .. } => {
                assert!(reason.contains("no action `missing`"))
            }
            other => panic!("expected UnresolvableController, got {other:?}"),
        }
    }

    #[test]
    fn test_from_attribute_rejects_non_string() {
        let err = ControllerSpec::from_attribute(&json!(42)).unwrap_err();
        assert!(matches!(err, Error::UnresolvableController { .. }));
    }
}
