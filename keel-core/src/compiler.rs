// Container builder and compiler passes

use crate::container::Container;
use crate::definition::{
    Argument, Constructor, Definition, Factory, ParamKind, Reference,
};
use crate::parameters::ParameterBag;
use crate::Error;
use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A transformation/validation step run once over the service graph before
/// it is frozen.
pub trait CompilerPass: Send + Sync {
    fn process(&self, builder: &mut ContainerBuilder) -> Result<(), Error>;
}

/// Mutable service graph: definitions, aliases and parameters accumulate
/// here until [`compile`](ContainerBuilder::compile) freezes them into a
/// [`Container`]. Compilation consumes the builder, so late registration is
/// impossible by construction.
#[derive(Default)]
pub struct ContainerBuilder {
    pub(crate) definitions: HashMap<String, Definition>,
    pub(crate) order: Vec<String>,
    pub(crate) aliases: HashMap<String, String>,
    pub(crate) parameters: ParameterBag,
    pub(crate) type_index: HashMap<TypeId, Vec<String>>,
    passes: Vec<Box<dyn CompilerPass>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a definition built by `constructor`; returns the
    /// definition for fluent configuration.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        constructor: Constructor,
    ) -> &mut Definition {
        self.set_definition(id, Definition::new(constructor))
    }

    /// Insert a preassembled definition
    pub fn set_definition(
        &mut self,
        id: impl Into<String>,
        definition: Definition,
    ) -> &mut Definition {
        let id = id.into();
        if self.definitions.insert(id.clone(), definition).is_some() {
            self.order.retain(|existing| existing != &id);
        }
        self.order.push(id.clone());
        trace!(service = %id, "Definition registered");
        self.definitions.get_mut(&id).expect("just inserted")
    }

    /// Create a concrete child from a (possibly abstract) parent template.
    pub fn register_child(
        &mut self,
        id: impl Into<String>,
        parent: &str,
    ) -> Result<&mut Definition, Error> {
        let template = self
            .definitions
            .get(parent)
            .ok_or_else(|| Error::ServiceNotFound(format!("parent definition `{parent}`")))?;
        let mut child = template.clone();
        child.abstract_ = false;
        Ok(self.set_definition(id, child))
    }

    pub fn set_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: Value) {
        self.parameters.set(key, value);
    }

    pub fn parameters(&self) -> &ParameterBag {
        &self.parameters
    }

    /// Register a custom pass. Custom passes run before the built-in
    /// autowiring and reference-resolution passes, in registration order.
    pub fn add_pass(&mut self, pass: impl CompilerPass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id) || self.aliases.contains_key(id)
    }

    pub fn definition(&self, id: &str) -> Option<&Definition> {
        self.definitions.get(id)
    }

    pub fn definition_mut(&mut self, id: &str) -> Option<&mut Definition> {
        self.definitions.get_mut(id)
    }

    /// Follow the alias table to a definition id, detecting alias loops.
    pub fn resolve_alias(&self, id: &str) -> Result<String, Error> {
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

    /// Run every pass, validate the graph, and freeze it.
    ///
    /// All configuration-time failures (unknown parameters or references,
    /// autowiring gaps, cycles) surface here rather than at first use.
    pub fn compile(mut self) -> Result<Container, Error> {
        debug!(definitions = self.order.len(), "Compiling container");
        self.parameters.resolve()?;

        let passes = std::mem::take(&mut self.passes);
        for pass in &passes {
            pass.process(&mut self)?;
        }
        AutowirePass.process(&mut self)?;
        ReferenceResolutionPass.process(&mut self)?;

        debug!("Container compiled and frozen");
        Ok(Container::from_builder(self))
    }
}

/// Fills in constructor arguments for autowired definitions by matching
/// declared parameter types against the registered graph.
///
/// The type -> service-id index is built once here, by scanning all public,
/// non-abstract definitions; ties go to the first registered service. The
/// index is kept on the compiled container for diagnostics and runtime
/// type-based lookups.
pub struct AutowirePass;

impl CompilerPass for AutowirePass {
    fn process(&self, builder: &mut ContainerBuilder) -> Result<(), Error> {
        let mut index: HashMap<TypeId, Vec<String>> = HashMap::new();
        for id in &builder.order {
            let definition = &builder.definitions[id];
            if !definition.is_public() || definition.is_abstract() {
                continue;
            }
            if let Some(constructor) = definition.constructor() {
                for provides in &constructor.provides {
                    index.entry(provides.key.id).or_default().push(id.clone());
                }
            }
        }

        let ids = builder.order.clone();
        for id in ids {
            let definition = &builder.definitions[&id];
            if !definition.is_autowired()
                || definition.is_abstract()
                || !definition.arguments.is_empty()
            {
                continue;
            }
            let Some(constructor) = definition.constructor() else {
                continue;
            };
            let params = constructor.params.to_vec();

            let mut arguments = Vec::with_capacity(params.len());
            for param in &params {
                let service_match = match param.kind {
                    ParamKind::Service(key) => {
                        if builder.has(key.name) {
                            // Exact id match: a service registered under the
                            // type's name wins over the index.
                            Some(Argument::Ref(Reference::new(key.name).expecting(key.id)))
                        } else {
                            index.get(&key.id).map(|ids| {
                                Argument::Ref(Reference::new(ids[0].clone()).expecting(key.id))
                            })
                        }
                    }
                    _ => None,
                };

                let argument = match service_match {
                    Some(argument) => argument,
                    None => {
                        if let Some(default) = &param.default {
                            Argument::Literal(default.clone())
                        } else if param.nullable {
                            Argument::Literal(Value::Null)
                        } else {
                            return Err(Error::AutowireFailure {
                                service: id.clone(),
                                parameter: param.name.clone(),
                                type_name: param.kind.type_label().to_string(),
                            });
                        }
                    }
                };
                arguments.push(argument);
            }

            builder
                .definitions
                .get_mut(&id)
                .expect("definition present")
                .arguments = arguments;
            debug!(service = %id, "Autowired constructor arguments");
        }

        builder.type_index = index;
        Ok(())
    }
}

/// Verifies that every reference and parameter placeholder in the graph
/// points at something that exists, and that the hard-reference graph is
/// acyclic. Runs strictly after autowiring so autowired references are
/// validated too.
pub struct ReferenceResolutionPass;

impl ReferenceResolutionPass {
    fn check_reference(
        builder: &ContainerBuilder,
        from: &str,
        reference: &Reference,
    ) -> Result<(), Error> {
        let target = builder.resolve_alias(reference.id())?;
        if !builder.definitions.contains_key(&target)
            && reference.invalid_behavior() == crate::definition::InvalidBehavior::Raise
        {
            return Err(Error::ServiceNotFound(format!(
                "`{target}` (referenced from `{from}`)"
            )));
        }
        Ok(())
    }

    fn hard_edges(builder: &ContainerBuilder, id: &str) -> Vec<String> {
        let definition = &builder.definitions[id];
        let mut edges = Vec::new();
        let mut push = |reference: &Reference| {
            if reference.invalid_behavior() != crate::definition::InvalidBehavior::Raise {
                return;
            }
            if let Ok(target) = builder.resolve_alias(reference.id()) {
                if builder.definitions.contains_key(&target) && !edges.contains(&target) {
                    edges.push(target);
                }
            }
        };

        let call_args = definition.calls.iter().flat_map(|call| call.arguments.iter());
        for argument in definition.arguments.iter().chain(call_args) {
            if let Argument::Ref(reference) = argument {
                push(reference);
            }
        }
        if let Some(Factory::Service { service, .. }) = &definition.factory {
            push(service);
        }
        edges
    }

    fn visit(
        builder: &ContainerBuilder,
        id: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), Error> {
        if let Some(position) = stack.iter().position(|entry| entry == id) {
            let mut path: Vec<String> = stack[position..].to_vec();
            path.push(id.to_string());
            return Err(Error::CircularReference { path });
        }
        if done.contains(id) {
            return Ok(());
        }

        stack.push(id.to_string());
        for edge in Self::hard_edges(builder, id) {
            Self::visit(builder, &edge, stack, done)?;
        }
        stack.pop();
        done.insert(id.to_string());
        Ok(())
    }
}

impl CompilerPass for ReferenceResolutionPass {
    fn process(&self, builder: &mut ContainerBuilder) -> Result<(), Error> {
        for alias in builder.aliases.keys() {
            builder.resolve_alias(alias)?;
        }

        for id in &builder.order {
            let definition = &builder.definitions[id];
            let call_args = definition.calls.iter().flat_map(|call| call.arguments.iter());
            for argument in definition.arguments.iter().chain(call_args) {
                match argument {
                    Argument::Ref(reference) => Self::check_reference(builder, id, reference)?,
                    Argument::Param(key) => {
                        if !builder.parameters.has(key) {
                            return Err(Error::ParameterNotFound(format!(
                                "{key} (referenced from `{id}`)"
                            )));
                        }
                    }
                    Argument::Literal(_) => {}
                }
            }
            if let Some(Factory::Service { service, .. }) = &definition.factory {
                Self::check_reference(builder, id, service)?;
            }
        }

        let mut done = HashSet::new();
        for id in &builder.order {
            Self::visit(builder, id, &mut Vec::new(), &mut done)?;
        }

        trace!("Reference graph validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ParamSpec, TypeKey};
    use serde_json::json;
    use std::sync::Arc;

    trait Notifier: Send + Sync {
        fn channel(&self) -> &'static str;
    }

    struct EmailNotifier;

    impl Notifier for EmailNotifier {
        fn channel(&self) -> &'static str {
            "email"
        }
    }

    struct SmsNotifier;

    impl Notifier for SmsNotifier {
        fn channel(&self) -> &'static str {
            "sms"
        }
    }

    struct Alerts {
        notifier: Arc<dyn Notifier>,
    }

    fn notifier_constructor<T: Notifier + Send + Sync + 'static>(build: fn() -> T) -> Constructor {
        Constructor::of::<T, _>(move |_| Ok(build()))
            .satisfies::<T, Arc<dyn Notifier>, _>(|notifier| notifier as Arc<dyn Notifier>)
    }

    #[test]
    fn test_reference_to_unknown_service_fails_compile() {
        struct Service;

        let mut builder = ContainerBuilder::new();
        builder
            .register("service", Constructor::of::<Service, _>(|_| Ok(Service)))
            .argument(Argument::reference("ghost"));

        match builder.compile() {
            Err(Error::ServiceNotFound(message)) => {
                assert!(message.contains("ghost"));
                assert!(message.contains("service"));
            }
            other => panic!("expected ServiceNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_parameter_placeholder_fails_compile() {
        struct Service;

        let mut builder = ContainerBuilder::new();
        builder
            .register("service", Constructor::of::<Service, _>(|_| Ok(Service)))
            .argument(Argument::param("missing.key"));

        assert!(matches!(
            builder.compile(),
            Err(Error::ParameterNotFound(_))
        ));
    }

    #[test]
    fn test_alias_loop_fails_compile() {
        let mut builder = ContainerBuilder::new();
        builder.set_alias("a", "b");
        builder.set_alias("b", "a");

        assert!(matches!(
            builder.compile(),
            Err(Error::CircularReference { .. })
        ));
    }

    #[test]
    fn test_transitive_cycle_through_calls_fails_compile() {
        struct Service;

        let mut builder = ContainerBuilder::new();
        builder
            .register(
                "a",
                Constructor::of::<Service, _>(|_| Ok(Service))
                    .with_call_applicator(|_, _, _| Ok(())),
            )
            .call("set_peer", vec![Argument::reference("b")]);
        builder
            .register("b", Constructor::of::<Service, _>(|_| Ok(Service)))
            .argument(Argument::reference("c"));
        builder
            .register("c", Constructor::of::<Service, _>(|_| Ok(Service)))
            .argument(Argument::reference("a"));

        match builder.compile() {
            Err(Error::CircularReference { path }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 4);
            }
            other => panic!("expected CircularReference, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_autowire_ambiguity_first_registered_wins() {
        let mut builder = ContainerBuilder::new();
        builder.register("notifier.email", notifier_constructor(|| EmailNotifier));
        builder.register("notifier.sms", notifier_constructor(|| SmsNotifier));
        builder
            .register(
                "alerts",
                Constructor::of::<Alerts, _>(|args| {
                    let carrier = args[0].service::<Arc<dyn Notifier>>()?;
                    Ok(Alerts {
                        notifier: carrier.as_ref().clone(),
                    })
                })
                .param(ParamSpec::service::<Arc<dyn Notifier>>("notifier")),
            )
            .autowired(true);

        let container = builder.compile().unwrap();
        let alerts = container.get_as::<Alerts>("alerts").unwrap();
        assert_eq!(alerts.notifier.channel(), "email");
    }

    #[test]
    fn test_type_index_exposed_for_diagnostics() {
        let mut builder = ContainerBuilder::new();
        builder.register("notifier.email", notifier_constructor(|| EmailNotifier));
        builder.register("notifier.sms", notifier_constructor(|| SmsNotifier));

        let container = builder.compile().unwrap();
        let key = TypeKey::of::<Arc<dyn Notifier>>();
        assert_eq!(
            container.type_index().get(&key.id),
            Some(&vec![
                "notifier.email".to_string(),
                "notifier.sms".to_string()
            ])
        );
    }

    #[test]
    fn test_private_definitions_excluded_from_type_index() {
        let mut builder = ContainerBuilder::new();
        builder
            .register("notifier.email", notifier_constructor(|| EmailNotifier))
            .public(false);

        let container = builder.compile().unwrap();
        let key = TypeKey::of::<Arc<dyn Notifier>>();
        assert!(container.type_index().get(&key.id).is_none());
    }

    #[test]
    fn test_autowire_prefers_defaults_for_scalars() {
        struct Retrier {
            attempts: i64,
        }

        let mut builder = ContainerBuilder::new();
        builder
            .register(
                "retrier",
                Constructor::of::<Retrier, _>(|args| {
                    Ok(Retrier {
                        attempts: args[0].as_i64().unwrap_or(0),
                    })
                })
                .param(ParamSpec::int("attempts").with_default(json!(3))),
            )
            .autowired(true);

        let container = builder.compile().unwrap();
        let retrier = container.get_as::<Retrier>("retrier").unwrap();
        assert_eq!(retrier.attempts, 3);
    }

    #[test]
    fn test_custom_pass_runs_before_builtin_passes() {
        struct Service;

        struct PublishEverythingPass;

        impl CompilerPass for PublishEverythingPass {
            fn process(&self, builder: &mut ContainerBuilder) -> Result<(), Error> {
                let ids = builder.order.clone();
                for id in ids {
                    if let Some(definition) = builder.definition_mut(&id) {
                        definition.public(true);
                    }
                }
                Ok(())
            }
        }

        let mut builder = ContainerBuilder::new();
        builder
            .register("service", Constructor::of::<Service, _>(|_| Ok(Service)))
            .public(false);
        builder.add_pass(PublishEverythingPass);

        let container = builder.compile().unwrap();
        assert!(container.get("service").is_ok());
    }
}
