// Routing: named URL patterns compiled to matchers and generators

use crate::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A named, parameterized URL pattern with defaults, per-placeholder
/// requirements and optional method restrictions.
///
/// Placeholders use `{name}` syntax. A placeholder with a default value is
/// optional and may be omitted from the tail of the path.
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    defaults: HashMap<String, Value>,
    requirements: HashMap<String, String>,
    methods: Vec<String>,
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            defaults: HashMap::new(),
            requirements: HashMap::new(),
            methods: Vec::new(),
        }
    }

    /// Set a default value for a placeholder (or a reserved `_` attribute)
    pub fn default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Shorthand for the reserved `_controller` default
    pub fn controller(self, identifier: impl Into<String>) -> Self {
        self.default(crate::http::CONTROLLER_ATTRIBUTE, Value::String(identifier.into()))
    }

    /// Constrain a placeholder with a regex fragment (anchored on use)
    pub fn requirement(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.requirements.insert(name.into(), pattern.into());
        self
    }

    /// Restrict the allowed HTTP methods; empty means any
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.as_ref().to_uppercase())
            .collect();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn defaults(&self) -> &HashMap<String, Value> {
        &self.defaults
    }

    pub fn allowed_methods(&self) -> &[String] {
        &self.methods
    }

    fn set_path(&mut self, path: String) {
        self.path = path;
    }
}

/// Declarative route record, the external configuration entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub defaults: HashMap<String, Value>,
    #[serde(default)]
    pub requirements: HashMap<String, String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

impl From<RouteConfig> for Route {
    fn from(config: RouteConfig) -> Self {
        Self {
            path: config.path,
            defaults: config.defaults,
            requirements: config.requirements,
            methods: config.methods.iter().map(|m| m.to_uppercase()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SegmentPart {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
struct Segment {
    parts: Vec<SegmentPart>,
}

impl Segment {
    /// The placeholder name if this segment is a single bare `{name}`
    fn sole_placeholder(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [SegmentPart::Placeholder(name)] => Some(name),
            _ => None,
        }
    }
}

/// The matcher/generator compiled from a route pattern: one regex with named
/// groups covering the whole path, the ordered variable list, and anchored
/// per-placeholder requirement regexes for generation-time validation.
#[derive(Debug, Clone)]
struct CompiledRoute {
    regex: Regex,
    variables: Vec<String>,
    segments: Vec<Segment>,
    /// Index into `segments` where the trailing optional run begins
    first_optional: usize,
    requirement_res: HashMap<String, Regex>,
}

fn parse_segment(raw: &str, path: &str) -> Result<Segment, Error> {
    let mut parts = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(SegmentPart::Literal(rest[..open].to_string()));
        }
        let close = rest[open..].find('}').ok_or_else(|| {
            Error::Compile(format!("unterminated placeholder in route path `{path}`"))
        })? + open;
        let name = &rest[open + 1..close];
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(Error::Compile(format!(
                "invalid placeholder name `{name}` in route path `{path}`"
            )));
        }
        parts.push(SegmentPart::Placeholder(name.to_string()));
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(SegmentPart::Literal(rest.to_string()));
    }

    Ok(Segment { parts })
}

fn compile(route: &Route) -> Result<CompiledRoute, Error> {
    let mut segments = Vec::new();
    let mut variables = Vec::new();
    let mut seen = HashSet::new();

    for raw in route.path.split('/').filter(|s| !s.is_empty()) {
        let segment = parse_segment(raw, &route.path)?;
        for part in &segment.parts {
            if let SegmentPart::Placeholder(name) = part {
                if !seen.insert(name.clone()) {
                    return Err(Error::Compile(format!(
                        "duplicate placeholder `{name}` in route path `{}`",
                        route.path
                    )));
                }
                variables.push(name.clone());
            }
        }
        segments.push(segment);
    }

    for name in route.requirements.keys() {
        if !seen.contains(name) {
            return Err(Error::Compile(format!(
                "requirement for unknown placeholder `{name}` in route path `{}`",
                route.path
            )));
        }
    }

    // Trailing run of bare placeholders that carry defaults may be omitted
    // from the request path.
    let mut first_optional = segments.len();
    while first_optional > 0 {
        match segments[first_optional - 1].sole_placeholder() {
            Some(name) if route.defaults.contains_key(name) => first_optional -= 1,
            _ => break,
        }
    }

    let segment_pattern = |segment: &Segment| -> String {
        segment
            .parts
            .iter()
            .map(|part| match part {
                SegmentPart::Literal(text) => regex::escape(text),
                SegmentPart::Placeholder(name) => {
                    let requirement = route
                        .requirements
                        .get(name)
                        .map(String::as_str)
                        .unwrap_or("[^/]+");
                    format!("(?P<{name}>(?:{requirement}))")
                }
            })
            .collect()
    };

    let mut pattern = String::new();
    for segment in &segments[..first_optional] {
        pattern.push('/');
        pattern.push_str(&segment_pattern(segment));
    }
    let mut optional = String::new();
    for segment in segments[first_optional..].iter().rev() {
        optional = format!("(?:/{}{})?", segment_pattern(segment), optional);
    }

    let full = format!("^{pattern}{optional}$");
    let regex = Regex::new(&full).map_err(|e| {
        Error::Compile(format!(
            "route path `{}` compiled to an invalid pattern: {e}",
            route.path
        ))
    })?;

    let mut requirement_res = HashMap::new();
    for (name, requirement) in &route.requirements {
        let anchored = Regex::new(&format!("^(?:{requirement})$")).map_err(|e| {
            Error::Compile(format!(
                "invalid requirement `{requirement}` for placeholder `{name}`: {e}"
            ))
        })?;
        requirement_res.insert(name.clone(), anchored);
    }

    Ok(CompiledRoute {
        regex,
        variables,
        segments,
        first_optional,
        requirement_res,
    })
}

struct CollectionEntry {
    name: String,
    route: Route,
    compiled: CompiledRoute,
}

/// Ordered, name-unique set of routes. Insertion order is significant: the
/// first structurally-matching, method-compatible route wins.
#[derive(Default)]
pub struct RouteCollection {
    entries: Vec<CollectionEntry>,
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from declarative records, in order
    pub fn from_configs<I>(configs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = RouteConfig>,
    {
        let mut collection = Self::new();
        for config in configs {
            let name = config.name.clone();
            collection.add(name, Route::from(config))?;
        }
        Ok(collection)
    }

    /// Add a route; the pattern is compiled here so configuration errors
    /// surface at build time. Re-adding a name replaces the old route and
    /// moves it to the end of the scan order.
    pub fn add(&mut self, name: impl Into<String>, route: Route) -> Result<(), Error> {
        let name = name.into();
        let compiled = compile(&route)?;
        self.entries.retain(|entry| entry.name != name);
        self.entries.push(CollectionEntry {
            name,
            route,
            compiled,
        });
        Ok(())
    }

    /// Prefix every route path; patterns are recompiled
    pub fn add_prefix(&mut self, prefix: &str) -> Result<(), Error> {
        let prefix = prefix.trim_end_matches('/');
        for entry in &mut self.entries {
            let path = format!("{}{}", prefix, entry.route.path());
            entry.route.set_path(path);
            entry.compiled = compile(&entry.route)?;
        }
        Ok(())
    }

    /// Prefix every route name
    pub fn add_name_prefix(&mut self, prefix: &str) {
        for entry in &mut self.entries {
            entry.name = format!("{}{}", prefix, entry.name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.route)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Route)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.route))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A successful match: route name plus the parameter map (route defaults
/// overlaid with the values extracted from the path).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub name: String,
    pub params: HashMap<String, Value>,
}

/// Outcome of matching a (path, method) pair. Routing failures are data, not
/// errors; the kernel decides how to surface them.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(RouteMatch),
    NotFound,
    MethodNotAllowed { allowed: Vec<String> },
}

/// Matches incoming paths against a [`RouteCollection`] and generates paths
/// from route names.
pub struct Router {
    collection: RouteCollection,
}

impl Router {
    pub fn new(collection: RouteCollection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &RouteCollection {
        &self.collection
    }

    /// Match a path and method against the collection, in insertion order.
    ///
    /// A structural match with an incompatible method keeps scanning; if
    /// nothing else matches, the union of the allowed methods across all
    /// structural matches is reported.
    pub fn match_request(&self, path: &str, method: &str) -> MatchOutcome {
        let path = normalize_path(path);
        let method = method.to_uppercase();
        let mut allowed: Vec<String> = Vec::new();

        for entry in &self.collection.entries {
            let Some(captures) = entry.compiled.regex.captures(&path) else {
                continue;
            };

            let methods = entry.route.allowed_methods();
            if !methods.is_empty() && !methods.iter().any(|m| m == &method) {
                for m in methods {
                    if !allowed.contains(m) {
                        allowed.push(m.clone());
                    }
                }
                trace!(route = %entry.name, method = %method, "Path matched but method rejected");
                continue;
            }

            let mut params = entry.route.defaults().clone();
            for variable in &entry.compiled.variables {
                if let Some(value) = captures.name(variable) {
                    let decoded = urlencoding::decode(value.as_str())
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.as_str().to_string());
                    params.insert(variable.clone(), Value::String(decoded));
                }
            }

            debug!(route = %entry.name, path = %path, "Route matched");
            return MatchOutcome::Matched(RouteMatch {
                name: entry.name.clone(),
                params,
            });
        }

        if allowed.is_empty() {
            debug!(path = %path, "No route matched");
            MatchOutcome::NotFound
        } else {
            debug!(path = %path, allowed = ?allowed, "No method-compatible route");
            MatchOutcome::MethodNotAllowed { allowed }
        }
    }

    /// Generate a path for a named route from a parameter map.
    ///
    /// Placeholders take the supplied value or the route default; trailing
    /// optional segments still at their defaults are dropped. Parameters not
    /// consumed by placeholders (and not reserved `_` keys) become a query
    /// string, sorted by key for deterministic output.
    pub fn generate(
        &self,
        name: &str,
        params: &HashMap<String, Value>,
    ) -> Result<String, Error> {
        let entry = self
            .collection
            .entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::RouteNotFound(name.to_string()))?;
        let compiled = &entry.compiled;
        let route = &entry.route;

        let value_for = |placeholder: &str| -> Result<String, Error> {
            let value = params
                .get(placeholder)
                .or_else(|| route.defaults().get(placeholder))
                .ok_or_else(|| Error::MissingMandatoryParameter {
                    route: name.to_string(),
                    parameter: placeholder.to_string(),
                })?;
            let text = scalar_to_string(value).ok_or_else(|| Error::InvalidParameter {
                route: name.to_string(),
                parameter: placeholder.to_string(),
                value: value.to_string(),
                requirement: "scalar value".to_string(),
            })?;
            if let Some(requirement) = compiled.requirement_res.get(placeholder) {
                if !requirement.is_match(&text) {
                    return Err(Error::InvalidParameter {
                        route: name.to_string(),
                        parameter: placeholder.to_string(),
                        value: text,
                        requirement: route.requirements[placeholder].clone(),
                    });
                }
            }
            Ok(text)
        };

        let render = |segment: &Segment| -> Result<String, Error> {
            segment
                .parts
                .iter()
                .map(|part| match part {
                    SegmentPart::Literal(text) => Ok(text.clone()),
                    SegmentPart::Placeholder(placeholder) => value_for(placeholder),
                })
                .collect()
        };

        let mut path = String::new();
        for segment in &compiled.segments[..compiled.first_optional] {
            path.push('/');
            path.push_str(&render(segment)?);
        }

        // Keep optional segments up to the last one whose value differs from
        // its default; everything after reverts to defaults and is elided.
        let optional = &compiled.segments[compiled.first_optional..];
        let mut keep = 0;
        for (index, segment) in optional.iter().enumerate() {
            let placeholder = segment
                .sole_placeholder()
                .ok_or_else(|| Error::Internal("optional segment without placeholder".into()))?;
            if let Some(supplied) = params.get(placeholder) {
                if Some(supplied) != route.defaults().get(placeholder) {
                    keep = index + 1;
                }
            }
        }
        for segment in &optional[..keep] {
            path.push('/');
            path.push_str(&render(segment)?);
        }

        if path.is_empty() {
            path.push('/');
        }

        let placeholders: HashSet<&str> = compiled.variables.iter().map(String::as_str).collect();
        let mut extra: Vec<(&String, &Value)> = params
            .iter()
            .filter(|(key, _)| !placeholders.contains(key.as_str()) && !key.starts_with('_'))
            .collect();
        extra.sort_by_key(|(key, _)| key.as_str());
        if !extra.is_empty() {
            let query: Vec<String> = extra
                .into_iter()
                .filter_map(|(key, value)| {
                    scalar_to_string(value).map(|text| {
                        format!(
                            "{}={}",
                            urlencoding::encode(key),
                            urlencoding::encode(&text)
                        )
                    })
                })
                .collect();
            if !query.is_empty() {
                path.push('?');
                path.push_str(&query.join("&"));
            }
        }

        Ok(path)
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.trim_end_matches('/').to_string()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
