// Declarative service definitions: the mutable-until-frozen graph metadata

use crate::controller::ControllerHandle;
use crate::{Error, HttpRequest};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A constructed service instance, type-erased and shareable
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// A freshly built service before it is shared
pub type BoxedService = Box<dyn Any + Send + Sync>;

pub(crate) type BuildFn =
    Arc<dyn Fn(&[Resolved]) -> Result<BoxedService, Error> + Send + Sync>;
pub(crate) type CallFn =
    Arc<dyn Fn(&mut BoxedService, &str, &[Resolved]) -> Result<(), Error> + Send + Sync>;
pub(crate) type UpcastFn =
    Arc<dyn Fn(ServiceInstance) -> Result<ServiceInstance, Error> + Send + Sync>;
pub(crate) type FactoryFn =
    Arc<dyn Fn(&crate::Container, &[Resolved]) -> Result<BoxedService, Error> + Send + Sync>;
pub(crate) type ProduceFn =
    Arc<dyn Fn(ServiceInstance, &[Resolved]) -> Result<BoxedService, Error> + Send + Sync>;
pub(crate) type ActionFn =
    Arc<dyn Fn(ServiceInstance) -> Result<ControllerHandle, Error> + Send + Sync>;

/// What to do when a referenced service does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidBehavior {
    /// Fail compilation (hard dependency)
    Raise,
    /// Inject null instead (soft dependency)
    Null,
}

/// A pointer from one definition to another service id
#[derive(Debug, Clone)]
pub struct Reference {
    id: String,
    invalid: InvalidBehavior,
    /// Type the consumer expects; drives upcasting for interface-shaped
    /// injection. Set by the autowiring pass, rarely by hand.
    expects: Option<TypeId>,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            invalid: InvalidBehavior::Raise,
            expects: None,
        }
    }

    /// Inject null rather than failing when the target is missing
    pub fn null_on_missing(mut self) -> Self {
        self.invalid = InvalidBehavior::Null;
        self
    }

    pub fn expecting(mut self, type_id: TypeId) -> Self {
        self.expects = Some(type_id);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn invalid_behavior(&self) -> InvalidBehavior {
        self.invalid
    }

    pub(crate) fn expects(&self) -> Option<TypeId> {
        self.expects
    }
}

/// One declared argument: a literal, a `%parameter%` placeholder, or a
/// reference to another service.
#[derive(Clone)]
pub enum Argument {
    Literal(Value),
    Param(String),
    Ref(Reference),
}

impl Argument {
    pub fn literal(value: Value) -> Self {
        Argument::Literal(value)
    }

    pub fn param(key: impl Into<String>) -> Self {
        Argument::Param(key.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Argument::Ref(Reference::new(id))
    }
}

/// Identity of a Rust type as used by the autowiring index.
///
/// Interface-shaped dependencies use the `Arc<dyn Trait>` carrier type as
/// their key; concrete dependencies use the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeKey {
    pub fn of<T: Send + Sync + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// Declared kind of a constructor or controller parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The current request itself
    Request,
    Int,
    Float,
    Bool,
    Str,
    /// A raw JSON value, bound without coercion
    Value,
    /// A service resolved by type
    Service(TypeKey),
}

impl ParamKind {
    pub fn type_label(&self) -> &'static str {
        match self {
            ParamKind::Request => "request",
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::Str => "string",
            ParamKind::Value => "value",
            ParamKind::Service(key) => key.name,
        }
    }
}

/// One declared parameter of a constructor or controller action.
///
/// This table is the registration-time stand-in for reflecting a callable's
/// signature: name, kind, default and nullability drive both autowiring and
/// request-argument binding.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
    pub nullable: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            nullable: false,
        }
    }

    pub fn request(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Request)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Float)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Bool)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Str)
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Value)
    }

    pub fn service<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Service(TypeKey::of::<T>()))
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A value bound to a declared parameter: what build closures and controller
/// actions actually receive.
#[derive(Clone)]
pub enum Resolved {
    Value(Value),
    Service(ServiceInstance),
    Request(HttpRequest),
    Null,
}

impl Resolved {
    pub fn is_null(&self) -> bool {
        matches!(self, Resolved::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_request(&self) -> Option<&HttpRequest> {
        match self {
            Resolved::Request(request) => Some(request),
            _ => None,
        }
    }

    /// Downcast a bound service to its concrete type (or its `Arc<dyn Trait>`
    /// carrier for interface-shaped dependencies).
    pub fn service<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        match self {
            Resolved::Service(instance) => {
                instance.clone().downcast::<T>().map_err(|_| {
                    Error::DependencyInjection(format!(
                        "bound service is not of type {}",
                        std::any::type_name::<T>()
                    ))
                })
            }
            _ => Err(Error::DependencyInjection(
                "bound value is not a service".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolved::Service(_) => f.write_str("Service(..)"),
            Resolved::Request(request) => {
                f.debug_tuple("Request").field(&request.path).finish()
            }
            Resolved::Null => f.write_str("Null"),
        }
    }
}

pub(crate) struct Provides {
    pub key: TypeKey,
    pub upcast: Option<UpcastFn>,
}

impl Clone for Provides {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            upcast: self.upcast.clone(),
        }
    }
}

/// Registration-time constructor description: the service's type identity,
/// the types it satisfies, its declared parameters, and the closure that
/// builds an instance from resolved values.
#[derive(Clone)]
pub struct Constructor {
    pub(crate) type_key: TypeKey,
    pub(crate) provides: Vec<Provides>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) build: BuildFn,
    pub(crate) call: Option<CallFn>,
}

impl Constructor {
    /// Describe a service of concrete type `T` built by `build`.
    pub fn of<T, F>(build: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&[Resolved]) -> Result<T, Error> + Send + Sync + 'static,
    {
        Self {
            type_key: TypeKey::of::<T>(),
            provides: vec![Provides {
                key: TypeKey::of::<T>(),
                upcast: None,
            }],
            params: Vec::new(),
            build: Arc::new(move |args| Ok(Box::new(build(args)?) as BoxedService)),
            call: None,
        }
    }

    /// Declare a constructor parameter (order is significant)
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Declare that this service also satisfies type `C` (typically an
    /// `Arc<dyn Trait>` carrier), with the conversion from the concrete type.
    pub fn satisfies<T, C, F>(mut self, convert: F) -> Self
    where
        T: Send + Sync + 'static,
        C: Send + Sync + 'static,
        F: Fn(Arc<T>) -> C + Send + Sync + 'static,
    {
        let upcast: UpcastFn = Arc::new(move |instance: ServiceInstance| {
            let concrete = instance.downcast::<T>().map_err(|_| {
                Error::DependencyInjection(format!(
                    "cannot upcast: instance is not of type {}",
                    std::any::type_name::<T>()
                ))
            })?;
            Ok(Arc::new(convert(concrete)) as ServiceInstance)
        });
        self.provides.push(Provides {
            key: TypeKey::of::<C>(),
            upcast: Some(upcast),
        });
        self
    }

    /// Register the applicator for post-construction method calls.
    ///
    /// The closure receives the freshly built instance, the method name and
    /// the resolved call arguments; unknown names should be reported, not
    /// ignored.
    pub fn with_call_applicator<F>(mut self, applicator: F) -> Self
    where
        F: Fn(&mut BoxedService, &str, &[Resolved]) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.call = Some(Arc::new(applicator));
        self
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }
}

/// A post-construction method call
#[derive(Clone)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Vec<Argument>,
}

/// How a service is produced when not built by its own constructor
#[derive(Clone)]
pub enum Factory {
    /// A free factory function; receives the compiled container and the
    /// definition's resolved arguments
    Call(FactoryFn),
    /// A method on another service
    Service {
        service: Reference,
        method: String,
        produce: ProduceFn,
    },
}

impl Factory {
    pub fn call<F>(factory: F) -> Self
    where
        F: Fn(&crate::Container, &[Resolved]) -> Result<BoxedService, Error>
            + Send
            + Sync
            + 'static,
    {
        Factory::Call(Arc::new(factory))
    }

    /// Factory method on another service. `produce` downcasts the factory
    /// service and invokes the named method.
    pub fn service<T, F, R>(service: Reference, method: impl Into<String>, produce: F) -> Self
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
        F: Fn(Arc<T>, &[Resolved]) -> Result<R, Error> + Send + Sync + 'static,
    {
        let method = method.into();
        let method_for_err = method.clone();
        Factory::Service {
            service,
            method,
            produce: Arc::new(move |instance, args| {
                let factory = instance.downcast::<T>().map_err(|_| {
                    Error::DependencyInjection(format!(
                        "factory service for method `{method_for_err}` is not of type {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                Ok(Box::new(produce(factory, args)?) as BoxedService)
            }),
        }
    }
}

/// A named tag with attributes, used for grouping definitions
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub attributes: HashMap<String, Value>,
}

/// Declarative metadata describing how to construct and wire one service.
#[derive(Clone, Default)]
pub struct Definition {
    pub(crate) constructor: Option<Constructor>,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) calls: Vec<MethodCall>,
    pub(crate) factory: Option<Factory>,
    pub(crate) tags: Vec<Tag>,
    pub(crate) actions: HashMap<String, ActionFn>,
    pub(crate) shared: bool,
    pub(crate) lazy: bool,
    pub(crate) autowired: bool,
    pub(crate) abstract_: bool,
    pub(crate) public: bool,
}

impl Definition {
    pub fn new(constructor: Constructor) -> Self {
        Self {
            constructor: Some(constructor),
            shared: true,
            public: true,
            ..Default::default()
        }
    }

    /// A definition produced entirely by a factory
    pub fn from_factory(factory: Factory) -> Self {
        Self {
            factory: Some(factory),
            shared: true,
            public: true,
            ..Default::default()
        }
    }

    pub fn argument(&mut self, argument: Argument) -> &mut Self {
        self.arguments.push(argument);
        self
    }

    pub fn arguments(&mut self, arguments: Vec<Argument>) -> &mut Self {
        self.arguments = arguments;
        self
    }

    pub fn call(&mut self, method: impl Into<String>, arguments: Vec<Argument>) -> &mut Self {
        self.calls.push(MethodCall {
            method: method.into(),
            arguments,
        });
        self
    }

    pub fn factory(&mut self, factory: Factory) -> &mut Self {
        self.factory = Some(factory);
        self
    }

    pub fn tag(&mut self, name: impl Into<String>) -> &mut Self {
        self.tag_with(name, HashMap::new())
    }

    pub fn tag_with(
        &mut self,
        name: impl Into<String>,
        attributes: HashMap<String, Value>,
    ) -> &mut Self {
        self.tags.push(Tag {
            name: name.into(),
            attributes,
        });
        self
    }

    /// Singleton within the container lifetime (default) vs a fresh instance
    /// per resolution
    pub fn shared(&mut self, shared: bool) -> &mut Self {
        self.shared = shared;
        self
    }

    /// Opt out of eager warm-up
    pub fn lazy(&mut self, lazy: bool) -> &mut Self {
        self.lazy = lazy;
        self
    }

    /// Let the autowiring pass fill in the argument list from the declared
    /// constructor parameters
    pub fn autowired(&mut self, autowired: bool) -> &mut Self {
        self.autowired = autowired;
        self
    }

    /// Template-only definition: may be used as a parent, never resolved
    pub fn abstract_(&mut self, abstract_: bool) -> &mut Self {
        self.abstract_ = abstract_;
        self
    }

    /// Retrievable from outside the container vs only by reference
    pub fn public(&mut self, public: bool) -> &mut Self {
        self.public = public;
        self
    }

    /// Expose a controller action on this service.
    ///
    /// The factory receives the resolved service instance and returns the
    /// canonical invokable; this is the explicit table the controller
    /// resolver consults instead of looking methods up at runtime.
    pub fn with_action<T, F>(&mut self, method: impl Into<String>, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> ControllerHandle + Send + Sync + 'static,
    {
        let method = method.into();
        let method_for_err = method.clone();
        self.actions.insert(
            method,
            Arc::new(move |instance: ServiceInstance| {
                let service = instance.downcast::<T>().map_err(|_| {
                    Error::DependencyInjection(format!(
                        "controller service for action `{method_for_err}` is not of type {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                Ok(factory(service))
            }),
        );
        self
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_autowired(&self) -> bool {
        self.autowired
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn explicit_arguments(&self) -> &[Argument] {
        &self.arguments
    }
}
