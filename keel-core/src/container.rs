// Compiled dependency injection container

use crate::compiler::ContainerBuilder;
use crate::definition::{
    Argument, Definition, Factory, InvalidBehavior, Reference, Resolved, ServiceInstance, TypeKey,
};
use crate::parameters::ParameterBag;
use crate::Error;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

/// Frozen view of the definition graph plus an instance cache.
///
/// Created once by [`ContainerBuilder::compile`]; read-only afterwards, so a
/// single container can be shared across threads. Shared services are cached
/// by id; non-shared definitions produce a fresh instance per resolution.
pub struct Container {
    definitions: HashMap<String, Definition>,
    order: Vec<String>,
    aliases: HashMap<String, String>,
    parameters: ParameterBag,
    type_index: HashMap<TypeId, Vec<String>>,
    instances: RwLock<HashMap<String, ServiceInstance>>,
    /// Per-thread resolution stacks for construction-time cycle detection.
    /// Factories can re-enter `get` in ways the static pass cannot see.
    resolving: Mutex<HashMap<ThreadId, Vec<String>>>,
}

impl Container {
    pub(crate) fn from_builder(builder: ContainerBuilder) -> Self {
        Self {
            definitions: builder.definitions,
            order: builder.order,
            aliases: builder.aliases,
            parameters: builder.parameters,
            type_index: builder.type_index,
            instances: RwLock::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a public service by id (or alias).
    pub fn get(&self, id: &str) -> Result<ServiceInstance, Error> {
        let target = self.resolve_alias(id)?;
        let definition = self
            .definitions
            .get(&target)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;

        if definition.is_abstract() {
            return Err(Error::DependencyInjection(format!(
                "abstract definition `{target}` cannot be resolved directly"
            )));
        }
        if !definition.is_public() {
            return Err(Error::ServiceNotFound(format!(
                "`{id}` exists but is private; it can only be injected by reference"
            )));
        }

        self.resolve_service(&target)
    }

    /// Resolve a public service and downcast it to its concrete type
    pub fn get_as<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>, Error> {
        self.get(id)?.downcast::<T>().map_err(|_| {
            Error::DependencyInjection(format!(
                "service `{id}` is not of type {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Resolve a service by declared type, the way autowiring would:
    /// exact-id match first, then the precomputed type index.
    pub fn get_for_type(&self, key: &TypeKey) -> Result<ServiceInstance, Error> {
        let reference = if self.has(key.name) {
            Reference::new(key.name).expecting(key.id)
        } else {
            let id = self
                .type_index
                .get(&key.id)
                .and_then(|ids| ids.first())
                .ok_or_else(|| Error::ServiceNotFound(format!("no service of type {}", key.name)))?;
            Reference::new(id.clone()).expecting(key.id)
        };
        match self.resolve_reference(&reference, "<type lookup>")? {
            Resolved::Service(instance) => Ok(instance),
            _ => Err(Error::ServiceNotFound(format!(
                "no service of type {}",
                key.name
            ))),
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id) || self.aliases.contains_key(id)
    }

    /// Registered service ids, in registration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn definition(&self, id: &str) -> Option<&Definition> {
        self.definitions.get(id)
    }

    /// A resolved configuration parameter
    pub fn parameter(&self, key: &str) -> Result<&Value, Error> {
        self.parameters.get(key)
    }

    /// The precomputed type -> service-ids index built by the autowiring
    /// pass, exposed for diagnostics.
    pub fn type_index(&self) -> &HashMap<TypeId, Vec<String>> {
        &self.type_index
    }

    /// Ids of definitions carrying the given tag, with their attributes,
    /// in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<(String, HashMap<String, Value>)> {
        let mut out = Vec::new();
        for id in &self.order {
            for entry in self.definitions[id].tags() {
                if entry.name == tag {
                    out.push((id.clone(), entry.attributes.clone()));
                }
            }
        }
        out
    }

    /// Eagerly instantiate every shared, public, non-lazy service.
    pub fn warm_up(&self) -> Result<(), Error> {
        for id in &self.order {
            let definition = &self.definitions[id];
            if definition.is_shared()
                && definition.is_public()
                && !definition.is_lazy()
                && !definition.is_abstract()
            {
                self.resolve_service(id)?;
            }
        }
        debug!("Container warmed up");
        Ok(())
    }

    /// Resolve a controller service regardless of visibility; the kernel is
    /// inside the container boundary.
    pub(crate) fn controller_instance(&self, id: &str) -> Result<ServiceInstance, Error> {
        let target = self.resolve_alias(id)?;
        let definition = self
            .definitions
            .get(&target)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        if definition.is_abstract() {
            return Err(Error::DependencyInjection(format!(
                "abstract definition `{target}` cannot be used as a controller"
            )));
        }
        self.resolve_service(&target)
    }

    pub(crate) fn resolve_alias(&self, id: &str) -> Result<String, Error> {
        let mut current = id.to_string();
        let mut path = vec![current.clone()];
        while let Some(target) = self.aliases.get(&current) {
            if path.contains(target) {
                path.push(target.clone());
                return Err(Error::CircularReference { path });
            }
            current = target.clone();
            path.push(current.clone());
        }
        Ok(current)
    }

    fn resolve_service(&self, id: &str) -> Result<ServiceInstance, Error> {
        let definition = self
            .definitions
            .get(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;

        if definition.is_shared() {
            if let Some(instance) = self.instances.read().unwrap().get(id) {
                trace!(service = %id, "Returning cached instance");
                return Ok(instance.clone());
            }
        }

        self.enter(id)?;
        let constructed = self.construct(id, definition);
        self.exit(id);
        let instance = constructed?;

        if definition.is_shared() {
            self.instances
                .write()
                .unwrap()
                .insert(id.to_string(), instance.clone());
        }
        debug!(service = %id, shared = definition.is_shared(), "Service constructed");
        Ok(instance)
    }

    fn construct(&self, id: &str, definition: &Definition) -> Result<ServiceInstance, Error> {
        let arguments = self.resolve_arguments(&definition.arguments, id)?;

        let mut boxed = match (&definition.factory, &definition.constructor) {
            (Some(Factory::Call(factory)), _) => factory(self, &arguments)?,
            (Some(Factory::Service { service, produce, method }), _) => {
                let factory_instance = match self.resolve_reference(service, id)? {
                    Resolved::Service(instance) => instance,
                    _ => {
                        return Err(Error::DependencyInjection(format!(
                            "factory service `{}` for `{id}` resolved to null",
                            service.id()
                        )));
                    }
                };
                trace!(service = %id, method = %method, "Invoking factory method");
                produce(factory_instance, &arguments)?
            }
            (None, Some(constructor)) => (constructor.build)(&arguments)?,
            (None, None) => {
                return Err(Error::DependencyInjection(format!(
                    "definition `{id}` has neither a constructor nor a factory"
                )));
            }
        };

        for call in &definition.calls {
            let applicator = definition
                .constructor
                .as_ref()
                .and_then(|constructor| constructor.call.clone())
                .ok_or_else(|| {
                    Error::DependencyInjection(format!(
                        "definition `{id}` declares method calls but no call applicator"
                    ))
                })?;
            let call_arguments = self.resolve_arguments(&call.arguments, id)?;
            applicator(&mut boxed, &call.method, &call_arguments)?;
        }

        Ok(Arc::from(boxed))
    }

    fn resolve_arguments(
        &self,
        arguments: &[Argument],
        origin: &str,
    ) -> Result<Vec<Resolved>, Error> {
        arguments
            .iter()
            .map(|argument| match argument {
                Argument::Literal(Value::Null) => Ok(Resolved::Null),
                Argument::Literal(value) => Ok(Resolved::Value(value.clone())),
                Argument::Param(key) => Ok(Resolved::Value(self.parameters.get(key)?.clone())),
                Argument::Ref(reference) => self.resolve_reference(reference, origin),
            })
            .collect()
    }

    fn resolve_reference(&self, reference: &Reference, origin: &str) -> Result<Resolved, Error> {
        let target = self.resolve_alias(reference.id())?;
        let definition = match self.definitions.get(&target) {
            Some(definition) => definition,
            None => {
                return match reference.invalid_behavior() {
                    InvalidBehavior::Null => Ok(Resolved::Null),
                    InvalidBehavior::Raise => Err(Error::ServiceNotFound(format!(
                        "`{target}` (referenced from `{origin}`)"
                    ))),
                };
            }
        };
        if definition.is_abstract() {
            return Err(Error::DependencyInjection(format!(
                "abstract definition `{target}` cannot be injected into `{origin}`"
            )));
        }

        let instance = self.resolve_service(&target)?;

        // Interface-shaped injection: apply the provider's upcast when the
        // consumer expects a type other than the concrete one.
        if let Some(expects) = reference.expects() {
            if let Some(constructor) = definition.constructor() {
                if constructor.type_key.id != expects {
                    let provides = constructor
                        .provides
                        .iter()
                        .find(|entry| entry.key.id == expects)
                        .ok_or_else(|| {
                            Error::DependencyInjection(format!(
                                "service `{target}` does not satisfy the type expected by `{origin}`"
                            ))
                        })?;
                    if let Some(upcast) = &provides.upcast {
                        return Ok(Resolved::Service(upcast(instance)?));
                    }
                }
            }
        }

        Ok(Resolved::Service(instance))
    }

    fn enter(&self, id: &str) -> Result<(), Error> {
        let mut resolving = self.resolving.lock().unwrap();
        let stack = resolving.entry(thread::current().id()).or_default();
        if stack.iter().any(|entry| entry == id) {
            let mut path = stack.clone();
            path.push(id.to_string());
            return Err(Error::CircularReference { path });
        }
        stack.push(id.to_string());
        Ok(())
    }

    fn exit(&self, id: &str) {
        let mut resolving = self.resolving.lock().unwrap();
        let thread_id = thread::current().id();
        if let Some(stack) = resolving.get_mut(&thread_id) {
            if let Some(position) = stack.iter().rposition(|entry| entry == id) {
                stack.remove(position);
            }
            if stack.is_empty() {
                resolving.remove(&thread_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Constructor, ParamSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Config {
        dsn: String,
    }

    struct Mailer {
        config: Arc<Config>,
        sent: AtomicU32,
    }

    fn config_constructor() -> Constructor {
        Constructor::of::<Config, _>(|args| {
            Ok(Config {
                dsn: args[0]
                    .as_str()
                    .ok_or_else(|| Error::DependencyInjection("dsn must be a string".into()))?
                    .to_string(),
            })
        })
        .param(ParamSpec::string("dsn"))
    }

    #[test]
    fn test_shared_service_identity() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")));

        let container = builder.compile().unwrap();
        let first = container.get_as::<Config>("config").unwrap();
        let second = container.get_as::<Config>("config").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.dsn, "smtp://mail");
    }

    #[test]
    fn test_non_shared_service_fresh_instances() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")))
            .shared(false);

        let container = builder.compile().unwrap();
        let first = container.get_as::<Config>("config").unwrap();
        let second = container.get_as::<Config>("config").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.dsn, second.dsn);
    }

    #[test]
    fn test_parameter_placeholder_argument() {
        let mut builder = ContainerBuilder::new();
        builder.set_parameter("mailer.dsn", json!("smtp://%mailer.host%"));
        builder.set_parameter("mailer.host", json!("localhost"));
        builder
            .register("config", config_constructor())
            .argument(Argument::param("mailer.dsn"));

        let container = builder.compile().unwrap();
        let config = container.get_as::<Config>("config").unwrap();
        assert_eq!(config.dsn, "smtp://localhost");
    }

    #[test]
    fn test_reference_injection() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")));
        builder
            .register(
                "mailer",
                Constructor::of::<Mailer, _>(|args| {
                    Ok(Mailer {
                        config: args[0].service::<Config>()?,
                        sent: AtomicU32::new(0),
                    })
                })
                .param(ParamSpec::service::<Config>("config")),
            )
            .argument(Argument::reference("config"));

        let container = builder.compile().unwrap();
        let mailer = container.get_as::<Mailer>("mailer").unwrap();
        let config = container.get_as::<Config>("config").unwrap();
        assert!(Arc::ptr_eq(&mailer.config, &config));
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_service() {
        let container = ContainerBuilder::new().compile().unwrap();
        assert!(matches!(
            container.get("ghost"),
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_private_service_hidden_but_injectable() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")))
            .public(false);
        builder
            .register(
                "mailer",
                Constructor::of::<Mailer, _>(|args| {
                    Ok(Mailer {
                        config: args[0].service::<Config>()?,
                        sent: AtomicU32::new(0),
                    })
                }),
            )
            .argument(Argument::reference("config"));

        let container = builder.compile().unwrap();
        assert!(matches!(
            container.get("config"),
            Err(Error::ServiceNotFound(_))
        ));
        assert!(container.get_as::<Mailer>("mailer").is_ok());
    }

    #[test]
    fn test_abstract_definition_not_resolvable() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("template", config_constructor())
            .argument(Argument::literal(json!("smtp://base")))
            .abstract_(true);
        builder
            .register_child("concrete", "template")
            .unwrap()
            .arguments(vec![Argument::literal(json!("smtp://child"))]);

        let container = builder.compile().unwrap();
        assert!(matches!(
            container.get("template"),
            Err(Error::DependencyInjection(_))
        ));
        let child = container.get_as::<Config>("concrete").unwrap();
        assert_eq!(child.dsn, "smtp://child");
    }

    #[test]
    fn test_alias_resolution() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")));
        builder.set_alias("settings", "config");

        let container = builder.compile().unwrap();
        let direct = container.get_as::<Config>("config").unwrap();
        let aliased = container.get_as::<Config>("settings").unwrap();
        assert!(Arc::ptr_eq(&direct, &aliased));
    }

    #[test]
    fn test_null_on_missing_reference() {
        let mut builder = ContainerBuilder::new();
        builder
            .register(
                "mailer",
                Constructor::of::<Mailer, _>(|args| {
                    assert!(args[0].is_null());
                    Ok(Mailer {
                        config: Arc::new(Config { dsn: "none".into() }),
                        sent: AtomicU32::new(0),
                    })
                }),
            )
            .argument(Argument::Ref(
                Reference::new("optional.config").null_on_missing(),
            ));

        let container = builder.compile().unwrap();
        assert!(container.get("mailer").is_ok());
    }

    #[test]
    fn test_method_calls_applied_in_order() {
        struct Registry {
            entries: Vec<String>,
        }

        let mut builder = ContainerBuilder::new();
        builder
            .register(
                "registry",
                Constructor::of::<Registry, _>(|_| Ok(Registry { entries: vec![] }))
                    .with_call_applicator(|instance, method, args| {
                        let registry = instance
                            .downcast_mut::<Registry>()
                            .ok_or_else(|| Error::DependencyInjection("not a Registry".into()))?;
                        match method {
                            "add" => {
                                let entry = args[0].as_str().ok_or_else(|| {
                                    Error::DependencyInjection("entry must be a string".into())
                                })?;
                                registry.entries.push(entry.to_string());
                                Ok(())
                            }
                            other => Err(Error::DependencyInjection(format!(
                                "unknown method `{other}`"
                            ))),
                        }
                    }),
            )
            .call("add", vec![Argument::literal(json!("first"))])
            .call("add", vec![Argument::literal(json!("second"))]);

        let container = builder.compile().unwrap();
        let registry = container.get_as::<Registry>("registry").unwrap();
        assert_eq!(registry.entries, vec!["first", "second"]);
    }

    #[test]
    fn test_factory_call() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://factory")));
        builder
            .set_definition(
                "mailer",
                crate::definition::Definition::from_factory(Factory::call(|container, _args| {
                    let config = container.get_as::<Config>("config")?;
                    Ok(Box::new(Mailer {
                        config,
                        sent: AtomicU32::new(0),
                    }))
                })),
            );

        let container = builder.compile().unwrap();
        let mailer = container.get_as::<Mailer>("mailer").unwrap();
        assert_eq!(mailer.config.dsn, "smtp://factory");
    }

    #[test]
    fn test_factory_service_method() {
        struct MailerFactory {
            prefix: String,
        }

        let mut builder = ContainerBuilder::new();
        builder.register(
            "mailer.factory",
            Constructor::of::<MailerFactory, _>(|_| {
                Ok(MailerFactory {
                    prefix: "smtp".into(),
                })
            }),
        );
        builder
            .set_definition(
                "config",
                crate::definition::Definition::from_factory(Factory::service::<MailerFactory, _, Config>(
                    Reference::new("mailer.factory"),
                    "create",
                    |factory, args| {
                        let host = args[0]
                            .as_str()
                            .ok_or_else(|| Error::DependencyInjection("host required".into()))?;
                        Ok(Config {
                            dsn: format!("{}://{host}", factory.prefix),
                        })
                    },
                )),
            )
            .argument(Argument::literal(json!("mail.example.org")));

        let container = builder.compile().unwrap();
        let config = container.get_as::<Config>("config").unwrap();
        assert_eq!(config.dsn, "smtp://mail.example.org");
    }

    #[test]
    fn test_factory_runtime_cycle_detected() {
        // The static pass cannot see a factory closure re-entering `get` for
        // its own id; the per-thread resolution stack catches it.
        let mut builder = ContainerBuilder::new();
        builder.set_definition(
            "self.referential",
            crate::definition::Definition::from_factory(Factory::call(|container, _args| {
                let _ = container.get("self.referential")?;
                Ok(Box::new(Config { dsn: String::new() }))
            })),
        );

        let container = builder.compile().unwrap();
        match container.get("self.referential") {
            Err(Error::CircularReference { path }) => {
                assert_eq!(path.first().map(String::as_str), Some("self.referential"));
                assert_eq!(path.last().map(String::as_str), Some("self.referential"));
            }
            other => panic!("expected CircularReference, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tagged_enumeration() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("a", config_constructor())
            .argument(Argument::literal(json!("a")))
            .tag_with(
                "kernel.listener",
                HashMap::from([("priority".to_string(), json!(10))]),
            );
        builder
            .register("b", config_constructor())
            .argument(Argument::literal(json!("b")))
            .tag("kernel.listener");
        builder
            .register("c", config_constructor())
            .argument(Argument::literal(json!("c")));

        let container = builder.compile().unwrap();
        let tagged = container.tagged("kernel.listener");
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].0, "a");
        assert_eq!(tagged[0].1.get("priority"), Some(&json!(10)));
        assert_eq!(tagged[1].0, "b");
    }

    #[test]
    fn test_warm_up_skips_lazy() {
        use std::sync::atomic::AtomicBool;
        static EAGER_BUILT: AtomicBool = AtomicBool::new(false);
        static LAZY_BUILT: AtomicBool = AtomicBool::new(false);

        struct Eager;
        struct Lazy;

        let mut builder = ContainerBuilder::new();
        builder.register(
            "eager",
            Constructor::of::<Eager, _>(|_| {
                EAGER_BUILT.store(true, Ordering::SeqCst);
                Ok(Eager)
            }),
        );
        builder
            .register(
                "lazy",
                Constructor::of::<Lazy, _>(|_| {
                    LAZY_BUILT.store(true, Ordering::SeqCst);
                    Ok(Lazy)
                }),
            )
            .lazy(true);

        let container = builder.compile().unwrap();
        container.warm_up().unwrap();
        assert!(EAGER_BUILT.load(Ordering::SeqCst));
        assert!(!LAZY_BUILT.load(Ordering::SeqCst));
    }

    #[test]
    fn test_get_for_type() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("config", config_constructor())
            .argument(Argument::literal(json!("smtp://mail")));

        let container = builder.compile().unwrap();
        let instance = container.get_for_type(&TypeKey::of::<Config>()).unwrap();
        assert!(instance.downcast::<Config>().is_ok());
    }
}
