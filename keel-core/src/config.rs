// Configuration entry points: loaders, configurator contract, kernel builder

use crate::compiler::ContainerBuilder;
use crate::kernel::Kernel;
use crate::routing::{RouteCollection, RouteConfig, Router};
use crate::Error;
use keel_events::EventDispatcher;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The sanctioned way to populate the container from outside the core: a
/// loader receives the mutable builder before `compile()` runs. Closures
/// implement it directly.
pub trait ServiceConfigurator {
    fn configure(&self, builder: &mut ContainerBuilder) -> Result<(), Error>;
}

impl<F> ServiceConfigurator for F
where
    F: Fn(&mut ContainerBuilder) -> Result<(), Error>,
{
    fn configure(&self, builder: &mut ContainerBuilder) -> Result<(), Error> {
        self(builder)
    }
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Result<Self, Error> {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| {
                Error::Deserialization(format!("unsupported configuration file: {path}"))
            })
    }
}

#[derive(Debug, Deserialize)]
struct RouteFile {
    routes: Vec<RouteConfig>,
}

/// Parse an ordered route table from a configuration document.
///
/// Both formats expect a top-level `routes` list.
pub fn routes_from_str(content: &str, format: FileFormat) -> Result<Vec<RouteConfig>, Error> {
    let file: RouteFile = match format {
        FileFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::Deserialization(format!("invalid route table: {e}")))?,
        FileFormat::Toml => toml::from_str(content)
            .map_err(|e| Error::Deserialization(format!("invalid route table: {e}")))?,
    };
    Ok(file.routes)
}

/// Parse a flat parameter map from a configuration document.
pub fn parameters_from_str(
    content: &str,
    format: FileFormat,
) -> Result<HashMap<String, Value>, Error> {
    match format {
        FileFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::Deserialization(format!("invalid parameter map: {e}"))),
        FileFormat::Toml => {
            let table: toml::Value = toml::from_str(content)
                .map_err(|e| Error::Deserialization(format!("invalid parameter map: {e}")))?;
            let json = serde_json::to_value(table)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            match json {
                Value::Object(map) => Ok(map.into_iter().collect()),
                _ => Err(Error::Deserialization(
                    "parameter document must be a table".to_string(),
                )),
            }
        }
    }
}

/// Assembles the routing table, the service graph, and the dispatcher into a
/// compiled [`Kernel`]. The container is passed around explicitly; there is
/// no ambient global, so independently configured kernels can coexist.
pub struct KernelBuilder {
    routes: RouteCollection,
    container: ContainerBuilder,
    dispatcher: EventDispatcher,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            routes: RouteCollection::new(),
            container: ContainerBuilder::new(),
            dispatcher: EventDispatcher::new(),
        }
    }

    /// The mutable route table
    pub fn routes(&mut self) -> &mut RouteCollection {
        &mut self.routes
    }

    /// Append declarative route records
    pub fn add_routes<I>(&mut self, configs: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = RouteConfig>,
    {
        for config in configs {
            let name = config.name.clone();
            self.routes.add(name, config.into())?;
        }
        Ok(self)
    }

    /// The mutable service graph
    pub fn container(&mut self) -> &mut ContainerBuilder {
        &mut self.container
    }

    /// Run a service configurator against the builder
    pub fn load(&mut self, configurator: &dyn ServiceConfigurator) -> Result<&mut Self, Error> {
        configurator.configure(&mut self.container)?;
        Ok(self)
    }

    /// The event dispatcher; listeners registered here survive into the
    /// built kernel.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Compile the container, freeze the graph, warm up eager services, and
    /// wire the kernel.
    pub fn build(self) -> Result<Kernel, Error> {
        debug!(routes = self.routes.len(), "Building kernel");
        let container = Arc::new(self.container.compile()?);
        container.warm_up()?;
        let router = Arc::new(Router::new(self.routes));
        Ok(Kernel::new(router, container, self.dispatcher))
    }
}
