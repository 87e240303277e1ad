//! Route table internals: per-method layer tries, matching, aspect
//! collection, and effective limits.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use smallvec::SmallVec;
use tracing::debug;

use super::template::is_valid_template;
use crate::aspect::Aspect;
use crate::handler::{Handler, NotFoundHandler};

/// Captured path parameters, stack-allocated for the common case.
pub type ParamVec = SmallVec<[String; 4]>;

/// Default cap on request body size, in bytes.
const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024;
/// Default read and write deadlines, in milliseconds.
const DEFAULT_READ_EXPIRY_MS: u64 = 4_000;
const DEFAULT_WRITE_EXPIRY_MS: u64 = 4_000;

/// Outcome of routing a request target.
///
/// Routing always produces a result: misses carry the table's default
/// handler, so callers never branch on failure.
#[derive(Clone)]
pub struct RouteResult {
    /// Concretized matched path; parameter slots carry the captured
    /// segment text, not the `{name}` form.
    pub location: String,
    /// Captured parametric segments, left to right.
    pub parameters: ParamVec,
    /// Flat aspect chain: global, then method-global, then route-local,
    /// preserving insertion order inside each scope.
    pub aspects: Vec<Arc<dyn Aspect>>,
    pub handler: Arc<dyn Handler>,
    pub max_body_size: usize,
    pub read_expiry_ms: u64,
    pub write_expiry_ms: u64,
}

/// Per-layer deadline and size overrides; zero means "inherit default".
#[derive(Default, Clone, Copy)]
struct LayerLimits {
    max_body_size: usize,
    read_expiry_ms: u64,
    write_expiry_ms: u64,
}

/// One node of a method trie.
#[derive(Default)]
struct RouteLayer {
    children: HashMap<String, RouteLayer>,
    /// Parametric slot taken when no literal child matches.
    parametric: Option<Box<RouteLayer>>,
    handler: Option<Arc<dyn Handler>>,
    aspects: Vec<Arc<dyn Aspect>>,
    limits: LayerLimits,
    /// Terminates matching at this layer regardless of remaining
    /// segments.
    exclusive: bool,
}

/// The route table. Mutation is expected to be externally gated (the
/// server facade rejects writes while running and wraps the table in a
/// readers-writer lock).
pub struct RouteTable {
    tries: HashMap<Method, RouteLayer>,
    global_aspects: Vec<Arc<dyn Aspect>>,
    method_aspects: HashMap<Method, Vec<Arc<dyn Aspect>>>,
    default_handler: Arc<dyn Handler>,
    default_max_body_size: usize,
    default_read_expiry_ms: u64,
    default_write_expiry_ms: u64,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            tries: HashMap::new(),
            global_aspects: Vec::new(),
            method_aspects: HashMap::new(),
            default_handler: Arc::new(NotFoundHandler),
            default_max_body_size: DEFAULT_MAX_BODY_SIZE,
            default_read_expiry_ms: DEFAULT_READ_EXPIRY_MS,
            default_write_expiry_ms: DEFAULT_WRITE_EXPIRY_MS,
        }
    }

    /// Register `handler` at `(method, template)`, replacing any prior
    /// handler there. Returns `false` when the template is malformed.
    pub fn add_route(
        &mut self,
        method: Method,
        template: &str,
        handler: impl Handler + 'static,
    ) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        let layer = self.layer_for(method, template);
        layer.handler = Some(Arc::new(handler));
        true
    }

    /// Like [`add_route`](Self::add_route) but also marks the terminal
    /// layer exclusive, so it serves every deeper path.
    pub fn add_exclusive_route(
        &mut self,
        method: Method,
        template: &str,
        handler: impl Handler + 'static,
    ) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        let layer = self.layer_for(method, template);
        layer.handler = Some(Arc::new(handler));
        layer.exclusive = true;
        true
    }

    /// Attach a route-local aspect at `(method, template)`.
    pub fn add_aspect(&mut self, method: Method, template: &str, aspect: Arc<dyn Aspect>) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        let layer = self.layer_for(method, template);
        layer.aspects.push(aspect);
        true
    }

    /// Attach an aspect to every route of `method`.
    pub fn add_method_aspect(&mut self, method: Method, aspect: Arc<dyn Aspect>) {
        self.method_aspects.entry(method).or_default().push(aspect);
    }

    /// Attach an aspect to every route of every method.
    pub fn add_global_aspect(&mut self, aspect: Arc<dyn Aspect>) {
        self.global_aspects.push(aspect);
    }

    pub fn set_read_expiry(&mut self, method: Method, template: &str, expiry_ms: u64) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        self.layer_for(method, template).limits.read_expiry_ms = expiry_ms;
        true
    }

    pub fn set_write_expiry(&mut self, method: Method, template: &str, expiry_ms: u64) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        self.layer_for(method, template).limits.write_expiry_ms = expiry_ms;
        true
    }

    pub fn set_max_body_size(&mut self, method: Method, template: &str, size: usize) -> bool {
        if !is_valid_template(template) {
            return false;
        }
        self.layer_for(method, template).limits.max_body_size = size;
        true
    }

    pub fn set_default_read_expiry(&mut self, expiry_ms: u64) {
        self.default_read_expiry_ms = expiry_ms;
    }

    pub fn set_default_write_expiry(&mut self, expiry_ms: u64) {
        self.default_write_expiry_ms = expiry_ms;
    }

    pub fn set_default_max_body_size(&mut self, size: usize) {
        self.default_max_body_size = size;
    }

    pub fn set_default_handler(&mut self, handler: impl Handler + 'static) {
        self.default_handler = Arc::new(handler);
    }

    /// Resolve `target` for `method`.
    ///
    /// The path portion before `?` is split on `/` (empty segments
    /// skipped) and walked layer by layer: an exclusive layer wins
    /// immediately, otherwise a literal child, otherwise the parametric
    /// slot (capturing the raw segment). Any dead end, or a matched
    /// layer without a handler, yields the default result.
    pub fn route(&self, method: &Method, target: &str) -> RouteResult {
        let Some(root) = self.tries.get(method) else {
            return self.default_result();
        };

        let path = target.split('?').next().unwrap_or("");
        let mut layer = root;
        let mut location = String::new();
        let mut parameters = ParamVec::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if layer.exclusive {
                break;
            }
            if let Some(next) = layer.children.get(segment) {
                layer = next;
            } else if let Some(next) = layer.parametric.as_deref() {
                parameters.push(segment.to_string());
                layer = next;
            } else {
                debug!(method = %method, target, "no route matched");
                return self.default_result();
            }
            location.push('/');
            location.push_str(segment);
        }

        if location.is_empty() {
            location.push('/');
        }

        let Some(handler) = layer.handler.clone() else {
            debug!(method = %method, target, "matched layer has no handler");
            return self.default_result();
        };

        let limits = layer.limits;
        RouteResult {
            location,
            parameters,
            aspects: self.collect_aspects(method, &layer.aspects),
            handler,
            max_body_size: if limits.max_body_size != 0 {
                limits.max_body_size
            } else {
                self.default_max_body_size
            },
            read_expiry_ms: if limits.read_expiry_ms != 0 {
                limits.read_expiry_ms
            } else {
                self.default_read_expiry_ms
            },
            write_expiry_ms: if limits.write_expiry_ms != 0 {
                limits.write_expiry_ms
            } else {
                self.default_write_expiry_ms
            },
        }
    }

    fn default_result(&self) -> RouteResult {
        RouteResult {
            location: "/".to_string(),
            parameters: ParamVec::new(),
            aspects: self.global_aspects.clone(),
            handler: self.default_handler.clone(),
            max_body_size: self.default_max_body_size,
            read_expiry_ms: self.default_read_expiry_ms,
            write_expiry_ms: self.default_write_expiry_ms,
        }
    }

    fn collect_aspects(
        &self,
        method: &Method,
        route_local: &[Arc<dyn Aspect>],
    ) -> Vec<Arc<dyn Aspect>> {
        let method_scope = self.method_aspects.get(method);
        let mut aspects = Vec::with_capacity(
            self.global_aspects.len()
                + method_scope.map_or(0, Vec::len)
                + route_local.len(),
        );
        aspects.extend(self.global_aspects.iter().cloned());
        if let Some(scoped) = method_scope {
            aspects.extend(scoped.iter().cloned());
        }
        aspects.extend(route_local.iter().cloned());
        aspects
    }

    /// Walk (and create) trie layers along `template`. Literal segments
    /// index the child map; `{...}` segments take the parametric slot.
    fn layer_for(&mut self, method: Method, template: &str) -> &mut RouteLayer {
        let path = template.split('?').next().unwrap_or("");
        let mut layer = self.tries.entry(method).or_default();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment.starts_with('{') {
                layer = &mut **layer.parametric.get_or_insert_with(Box::default);
            } else {
                layer = layer.children.entry(segment.to_string()).or_default();
            }
        }
        layer
    }
}
