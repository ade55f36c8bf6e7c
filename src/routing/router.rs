//! Route table construction and lookup.
//!
//! # Responsibilities
//! - Compile the service description into immutable route entries
//! - Resolve every path variable and body field against the request message
//! - Reject ambiguous or unresolvable routes at startup
//! - Look up the route for a request, distinguishing 404 from 405
//!
//! # Design Decisions
//! - Immutable after construction (shared via `Arc`, no locks)
//! - Routes sorted once by specificity; lookup is a linear scan
//! - Explicit NoMatch / MethodNotAllowed rather than a silent default

use std::cmp::Reverse;

use http::Method;
use thiserror::Error;

use crate::routing::description::{HttpRuleConfig, MethodConfig, ServiceDescription};
use crate::routing::matcher::{split_path, PathTemplate, TemplateError};
use crate::routing::schema::{FieldDescriptor, FieldKind, Schema, SchemaError};
use crate::rpc::RpcMethod;

/// A request-message field targeted by a path variable or the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub path: Vec<String>,
    pub field: FieldDescriptor,
}

impl FieldBinding {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// Where the HTTP body goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyBinding {
    /// Body ignored.
    None,
    /// Body is the whole request message.
    Whole,
    /// Body populates one field.
    Field(FieldBinding),
}

/// One compiled route. Never mutated after the table is built.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// `<service>/<method>` for logs and metrics.
    pub name: String,
    pub http_method: Method,
    pub template: PathTemplate,
    pub rpc: RpcMethod,
    pub input: String,
    pub output: String,
    /// Aligned with `template.variables()`.
    pub path_bindings: Vec<FieldBinding>,
    pub body: BodyBinding,
    /// Response field returned instead of the whole message.
    pub response_body: Option<Vec<String>>,
    pub server_streaming: bool,
    /// Position in the description, the final tie-breaker.
    order: usize,
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteEntry,
    /// Raw (still percent-encoded) captures, aligned with `route.path_bindings`.
    pub captures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no route matches path")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },
}

#[derive(Debug, Error)]
pub enum RouteBuildError {
    #[error("invalid message declarations: {0}")]
    Schema(#[from] SchemaError),

    #[error("{route}: invalid path template '{template}': {source}")]
    InvalidTemplate {
        route: String,
        template: String,
        source: TemplateError,
    },

    #[error("{route}: invalid HTTP method '{method}'")]
    InvalidMethod { route: String, method: String },

    #[error("{route}: unknown message type '{message}'")]
    UnknownMessage { route: String, message: String },

    #[error("{route}: cannot bind '{binding}' in {message}: {source}")]
    UnresolvedBinding {
        route: String,
        binding: String,
        message: String,
        source: SchemaError,
    },

    #[error("{route}: path variable '{binding}' must bind a singular scalar field")]
    NonScalarBinding { route: String, binding: String },

    #[error(
        "ambiguous routes: {method} {first_template} ({first}) overlaps {second_template} ({second})"
    )]
    Ambiguous {
        method: Method,
        first: String,
        first_template: String,
        second: String,
        second_template: String,
    },

    #[error("{route}: method declares no HTTP binding")]
    NoBinding { route: String },

    #[error("service description defines no routes")]
    NoRoutes,
}

/// Immutable mapping from (HTTP method, path) to backend method.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
    schema: Schema,
}

impl RouteTable {
    /// Compile a description. Any error here is fatal at startup.
    pub fn build(description: &ServiceDescription) -> Result<Self, RouteBuildError> {
        let schema = Schema::build(&description.messages)?;
        let mut routes = Vec::new();

        for service in &description.services {
            for method in &service.methods {
                let name = format!("{}/{}", service.name, method.name);
                if method.http.is_empty() {
                    return Err(RouteBuildError::NoBinding { route: name });
                }
                for rule in &method.http {
                    let entry = compile_route(&schema, &service.name, method, rule, routes.len())?;
                    routes.push(entry);
                }
            }
        }

        if routes.is_empty() {
            return Err(RouteBuildError::NoRoutes);
        }

        check_ambiguity(&routes)?;
        routes.sort_by_key(|r| (Reverse(r.template.specificity()), r.order));

        for route in &routes {
            tracing::debug!(
                route = %route.name,
                method = %route.http_method,
                template = %route.template.as_str(),
                streaming = route.server_streaming,
                "Route registered"
            );
        }

        Ok(Self { routes, schema })
    }

    /// Find the route for a request.
    pub fn lookup(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, LookupError> {
        let segments = split_path(path).ok_or(LookupError::NotFound)?;
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(captures) = route.template.matches(&segments) else {
                continue;
            };
            if route.http_method == *method {
                return Ok(RouteMatch { route, captures });
            }
            if !allowed.contains(&route.http_method) {
                allowed.push(route.http_method.clone());
            }
        }

        if allowed.is_empty() {
            Err(LookupError::NotFound)
        } else {
            Err(LookupError::MethodNotAllowed { allowed })
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Routes in lookup order.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn compile_route(
    schema: &Schema,
    service: &str,
    method: &MethodConfig,
    rule: &HttpRuleConfig,
    order: usize,
) -> Result<RouteEntry, RouteBuildError> {
    let name = format!("{}/{}", service, method.name);

    let http_method = Method::from_bytes(rule.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| RouteBuildError::InvalidMethod {
            route: name.clone(),
            method: rule.method.clone(),
        })?;

    let template = PathTemplate::parse(&rule.path).map_err(|source| RouteBuildError::InvalidTemplate {
        route: name.clone(),
        template: rule.path.clone(),
        source,
    })?;

    for message in [&method.input, &method.output] {
        if schema.message(message).is_none() {
            return Err(RouteBuildError::UnknownMessage {
                route: name.clone(),
                message: message.clone(),
            });
        }
    }

    let resolve = |message: &str, path: &[String]| {
        schema
            .resolve(message, path)
            .cloned()
            .map_err(|source| RouteBuildError::UnresolvedBinding {
                route: name.clone(),
                binding: path.join("."),
                message: message.to_string(),
                source,
            })
    };

    let mut path_bindings = Vec::new();
    for variable in template.variables() {
        let field = resolve(&method.input, variable)?;
        if field.repeated || matches!(field.kind, FieldKind::Message(_)) {
            return Err(RouteBuildError::NonScalarBinding {
                route: name.clone(),
                binding: variable.join("."),
            });
        }
        path_bindings.push(FieldBinding {
            path: variable.clone(),
            field,
        });
    }

    let body = match rule.body.trim() {
        "" => BodyBinding::None,
        "*" => BodyBinding::Whole,
        field => {
            let path: Vec<String> = field.split('.').map(str::to_string).collect();
            let descriptor = resolve(&method.input, &path)?;
            BodyBinding::Field(FieldBinding {
                path,
                field: descriptor,
            })
        }
    };

    let response_body = match rule.response_body.trim() {
        "" => None,
        field => {
            let path: Vec<String> = field.split('.').map(str::to_string).collect();
            resolve(&method.output, &path)?;
            Some(path)
        }
    };

    Ok(RouteEntry {
        name,
        http_method,
        template,
        rpc: RpcMethod::new(service, &method.name),
        input: method.input.clone(),
        output: method.output.clone(),
        path_bindings,
        body,
        response_body,
        server_streaming: method.server_streaming,
        order,
    })
}

/// Overlapping templates are only allowed when specificity separates them.
fn check_ambiguity(routes: &[RouteEntry]) -> Result<(), RouteBuildError> {
    for (i, a) in routes.iter().enumerate() {
        for b in &routes[i + 1..] {
            if a.http_method == b.http_method
                && a.template.specificity() == b.template.specificity()
                && a.template.overlaps(&b.template)
            {
                return Err(RouteBuildError::Ambiguous {
                    method: a.http_method.clone(),
                    first: a.name.clone(),
                    first_template: a.template.as_str().to_string(),
                    second: b.name.clone(),
                    second_template: b.template.as_str().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGETS: &str = r#"
        [[services]]
        name = "widgets.Widgets"

        [[services.methods]]
        name = "GetWidget"
        input = "widgets.GetWidgetRequest"
        output = "widgets.Widget"
        [[services.methods.http]]
        method = "GET"
        path = "/v1/widgets/{id}"

        [[services.methods]]
        name = "GetWidgetPart"
        input = "widgets.GetWidgetRequest"
        output = "widgets.Widget"
        [[services.methods.http]]
        method = "GET"
        path = "/v1/widgets/{id}/parts"

        [[services.methods]]
        name = "GetFeatured"
        input = "widgets.GetWidgetRequest"
        output = "widgets.Widget"
        [[services.methods.http]]
        method = "GET"
        path = "/v1/widgets/featured"

        [[services.methods]]
        name = "CreateWidget"
        input = "widgets.Widget"
        output = "widgets.Widget"
        [[services.methods.http]]
        method = "POST"
        path = "/v1/widgets"
        body = "*"

        [[services.methods]]
        name = "DeleteWidget"
        input = "widgets.GetWidgetRequest"
        output = "widgets.Widget"
        [[services.methods.http]]
        method = "delete"
        path = "/v1/widgets/{id}"

        [messages."widgets.GetWidgetRequest"]
        id = "int64"

        [messages."widgets.Widget"]
        id = "int64"
        name = "string"
    "#;

    fn table(toml: &str) -> Result<RouteTable, RouteBuildError> {
        RouteTable::build(&ServiceDescription::from_toml_str(toml).unwrap())
    }

    #[test]
    fn registered_routes_resolve_to_their_method() {
        let table = table(WIDGETS).unwrap();
        let cases = [
            (Method::GET, "/v1/widgets/42", "GetWidget"),
            (Method::GET, "/v1/widgets/42/parts", "GetWidgetPart"),
            (Method::GET, "/v1/widgets/featured", "GetFeatured"),
            (Method::POST, "/v1/widgets", "CreateWidget"),
            (Method::DELETE, "/v1/widgets/7", "DeleteWidget"),
        ];
        for (method, path, expected) in cases {
            let matched = table.lookup(&method, path).unwrap();
            assert_eq!(matched.route.rpc.method, expected, "{method} {path}");
        }

        let matched = table.lookup(&Method::GET, "/v1/widgets/42").unwrap();
        assert_eq!(matched.captures, vec!["42".to_string()]);
        assert_eq!(matched.route.path_bindings[0].dotted(), "id");
    }

    #[test]
    fn not_found_vs_method_not_allowed() {
        let table = table(WIDGETS).unwrap();
        assert_eq!(table.lookup(&Method::GET, "/v2/nothing").unwrap_err(), LookupError::NotFound);
        assert_eq!(table.lookup(&Method::GET, "relative").unwrap_err(), LookupError::NotFound);

        match table.lookup(&Method::PUT, "/v1/widgets/42").unwrap_err() {
            LookupError::MethodNotAllowed { allowed } => {
                assert!(allowed.contains(&Method::GET));
                assert!(allowed.contains(&Method::DELETE));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn less_specific_route_wins_when_method_differs() {
        let table = table(WIDGETS).unwrap();
        // `/v1/widgets/featured` is GET-only; DELETE falls through to `{id}`.
        let matched = table.lookup(&Method::DELETE, "/v1/widgets/featured").unwrap();
        assert_eq!(matched.route.rpc.method, "DeleteWidget");
        assert_eq!(matched.captures, vec!["featured".to_string()]);
    }

    #[test]
    fn lookup_is_deterministic() {
        let table = table(WIDGETS).unwrap();
        for _ in 0..10 {
            let matched = table.lookup(&Method::GET, "/v1/widgets/featured").unwrap();
            assert_eq!(matched.route.rpc.method, "GetFeatured");
        }
    }

    #[test]
    fn ambiguous_templates_fail_the_build() {
        let toml = WIDGETS.replace("path = \"/v1/widgets/featured\"", "path = \"/v1/widgets/{name}\"")
            + "\n";
        let toml = toml.replace(
            "[messages.\"widgets.GetWidgetRequest\"]\n        id = \"int64\"",
            "[messages.\"widgets.GetWidgetRequest\"]\n        id = \"int64\"\n        name = \"string\"",
        );
        assert!(matches!(table(&toml), Err(RouteBuildError::Ambiguous { .. })));
    }

    #[test]
    fn unresolvable_binding_fails_the_build() {
        let toml = WIDGETS.replace("/v1/widgets/{id}/parts", "/v1/widgets/{part_id}/parts");
        assert!(matches!(table(&toml), Err(RouteBuildError::UnresolvedBinding { .. })));
    }

    #[test]
    fn body_field_must_exist() {
        let toml = WIDGETS.replace("body = \"*\"", "body = \"widget\"");
        assert!(matches!(table(&toml), Err(RouteBuildError::UnresolvedBinding { .. })));
    }

    #[test]
    fn invalid_template_and_method() {
        let toml = WIDGETS.replace("/v1/widgets/featured", "v1/widgets/featured");
        assert!(matches!(table(&toml), Err(RouteBuildError::InvalidTemplate { .. })));

        let toml = WIDGETS.replace("method = \"delete\"", "method = \"DEL ETE\"");
        assert!(matches!(table(&toml), Err(RouteBuildError::InvalidMethod { .. })));
    }

    #[test]
    fn empty_description_fails() {
        assert!(matches!(table(""), Err(RouteBuildError::NoRoutes)));
    }
}
