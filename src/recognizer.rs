//! Route pattern recognition.
//!
//! Patterns are compiled to anchored regexes. Segment kinds:
//! - `users` static
//! - `:id` dynamic, `:id?` optional dynamic
//! - `*path` star (consumes the rest of the fragment, at least one char)

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::config::RouteConfig;
use crate::instruction::Params;
use crate::utils;
use crate::RouterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Dynamic { name: String, optional: bool },
    Star(String),
}

#[derive(Debug)]
struct CompiledRoute {
    pattern: String,
    segments: Vec<Segment>,
    regex: Regex,
    config: Arc<RouteConfig>,
}

impl CompiledRoute {
    /// (static segments, star segments, dynamic segments)
    fn specificity(&self) -> (Reverse<usize>, usize, Reverse<usize>) {
        let mut statics = 0;
        let mut stars = 0;
        let mut dynamics = 0;
        for segment in &self.segments {
            match segment {
                Segment::Static(_) => statics += 1,
                Segment::Star(_) => stars += 1,
                Segment::Dynamic { .. } => dynamics += 1,
            }
        }
        (Reverse(statics), stars, Reverse(dynamics))
    }

    fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Static(_) => None,
            Segment::Dynamic { name, .. } | Segment::Star(name) => Some(name.as_str()),
        })
    }
}

/// One recognized route for a fragment.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The pattern that matched (for child tables, including `/*childRoute`).
    pub pattern: String,
    pub params: Params,
    pub query_params: Params,
    pub config: Arc<RouteConfig>,
}

/// A table of compiled route patterns.
#[derive(Debug, Default)]
pub struct RouteRecognizer {
    routes: Vec<CompiledRoute>,
    names: HashMap<String, usize>,
}

impl RouteRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern for a config. Named configs become generatable.
    pub fn add(&mut self, pattern: &str, config: Arc<RouteConfig>) -> Result<(), RouterError> {
        let segments = parse_segments(pattern)?;
        let regex = compile(&segments, config.case_sensitive)
            .map_err(|e| RouterError::InvalidRouteConfig(format!("{}: {}", pattern, e)))?;
        if let Some(name) = &config.name {
            self.names.insert(name.clone(), self.routes.len());
        }
        self.routes.push(CompiledRoute {
            pattern: utils::normalize_fragment(pattern),
            segments,
            regex,
            config,
        });
        Ok(())
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match a URL (fragment plus optional query string), most specific first.
    pub fn recognize(&self, url: &str) -> Vec<RouteMatch> {
        let (fragment, query) = utils::split_query(url);
        let fragment = utils::normalize_fragment(fragment);
        let query_params = utils::parse_query_string(query);

        let mut matched: Vec<&CompiledRoute> = self
            .routes
            .iter()
            .filter(|route| route.regex.is_match(&fragment))
            .collect();
        matched.sort_by_key(|route| route.specificity());

        matched
            .into_iter()
            .filter_map(|route| {
                let captures = route.regex.captures(&fragment)?;
                let mut params = Params::new();
                for (idx, name) in route.param_names().enumerate() {
                    if let Some(value) = captures.get(idx + 1) {
                        params.insert(name, value.as_str());
                    }
                }
                Some(RouteMatch {
                    pattern: route.pattern.clone(),
                    params,
                    query_params: query_params.clone(),
                    config: Arc::clone(&route.config),
                })
            })
            .collect()
    }

    /// Build the fragment for a named route. Params not consumed by the
    /// pattern become the query string.
    pub fn generate(&self, name: &str, params: &Params) -> Result<String, RouterError> {
        let idx = self
            .names
            .get(name)
            .ok_or_else(|| RouterError::UnknownRouteName(name.to_string()))?;
        fill(name, &self.routes[*idx].segments, params)
    }
}

/// Build a fragment straight from a route pattern.
pub fn generate_path(pattern: &str, params: &Params) -> Result<String, RouterError> {
    fill(pattern, &parse_segments(pattern)?, params)
}

fn fill(label: &str, segments: &[Segment], params: &Params) -> Result<String, RouterError> {
    let missing = |param: &str| RouterError::MissingParameter {
        route: label.to_string(),
        param: param.to_string(),
    };

    let mut consumed: Vec<&str> = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    for segment in segments {
        match segment {
            Segment::Static(text) => parts.push(text.clone()),
            Segment::Dynamic { name: param, optional } => match params.get(param) {
                Some(value) => {
                    consumed.push(param);
                    parts.push(value.to_string());
                }
                None if *optional => {}
                None => return Err(missing(param)),
            },
            Segment::Star(param) => match params.get(param) {
                Some(value) => {
                    consumed.push(param);
                    parts.push(value.trim_matches('/').to_string());
                }
                None => return Err(missing(param)),
            },
        }
    }

    let path = parts.join("/");
    let rest: Params = params
        .iter()
        .filter(|(key, _)| !consumed.contains(key))
        .collect();
    if rest.is_empty() {
        Ok(path)
    } else {
        Ok(format!("{}?{}", path, utils::build_query_string(&rest)))
    }
}

// ---------------------------------------------------------------------------
// Pattern compilation
// ---------------------------------------------------------------------------

fn parse_segments(pattern: &str) -> Result<Vec<Segment>, RouterError> {
    let normalized = utils::normalize_fragment(pattern);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<&str> = normalized.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (idx, part) in raw.iter().enumerate() {
        let segment = if let Some(name) = part.strip_prefix(':') {
            let (name, optional) = match name.strip_suffix('?') {
                Some(name) => (name, true),
                None => (name, false),
            };
            Segment::Dynamic {
                name: name.to_string(),
                optional,
            }
        } else if let Some(name) = part.strip_prefix('*') {
            if idx + 1 != raw.len() {
                return Err(RouterError::InvalidRouteConfig(format!(
                    "star segment `{}` must be last in `{}`",
                    part, pattern
                )));
            }
            Segment::Star(name.to_string())
        } else {
            Segment::Static(part.to_string())
        };
        if let Segment::Dynamic { name, .. } | Segment::Star(name) = &segment {
            if name.is_empty() {
                return Err(RouterError::InvalidRouteConfig(format!(
                    "unnamed parameter in `{}`",
                    pattern
                )));
            }
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn compile(segments: &[Segment], case_sensitive: bool) -> Result<Regex, regex::Error> {
    let mut source = String::from("^");
    for (idx, segment) in segments.iter().enumerate() {
        let sep = if idx == 0 { "" } else { "/" };
        match segment {
            Segment::Static(text) => {
                source.push_str(sep);
                source.push_str(&regex::escape(text));
            }
            Segment::Dynamic { optional: false, .. } => {
                source.push_str(sep);
                source.push_str("([^/]+)");
            }
            Segment::Dynamic { optional: true, .. } => {
                source.push_str(&format!("(?:{}([^/]+))?", sep));
            }
            Segment::Star(_) => {
                source.push_str(sep);
                source.push_str("(.+)");
            }
        }
    }
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
