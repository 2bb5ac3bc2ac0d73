//! Environment context - named variables visible to every stage of a run
//!
//! Values are either literals or templates referencing other variables with
//! `{NAME}` or `${NAME}`. Templates are resolved lazily on first read and the
//! result is cached; once a variable has been read it can no longer be
//! redeclared.
//!
//! `{{NAME}}` and `$${NAME}` are escapes rendering as `{NAME}` and `${NAME}`,
//! for shell parameter expansion and awk-style blocks in commands.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

use crate::core::report::FailureKind;

/// Errors raised by context declaration and resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("{}", describe_unresolved(.reference, .referenced_by.as_deref()))]
    UnresolvedReference {
        reference: String,
        referenced_by: Option<String>,
    },

    #[error("Cyclic reference while resolving '{name}': {}", .chain.join(" -> "))]
    CyclicReference { name: String, chain: Vec<String> },

    #[error("Variable '{0}' has already been read and cannot be redeclared")]
    ImmutableVariable(String),
}

impl ContextError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ContextError::UnresolvedReference { .. } => FailureKind::UnresolvedReferenceError,
            ContextError::CyclicReference { .. } => FailureKind::CyclicReferenceError,
            ContextError::ImmutableVariable(_) => FailureKind::ImmutableVariableError,
        }
    }
}

fn describe_unresolved(reference: &str, referenced_by: Option<&str>) -> String {
    match referenced_by {
        Some(owner) => format!(
            "Variable '{}' references undeclared variable '{}'",
            owner, reference
        ),
        None => format!("Undeclared variable '{}'", reference),
    }
}

#[derive(Debug, Clone)]
enum Variable {
    Literal(String),
    Template(String),
}

#[derive(Debug, Default)]
struct ContextInner {
    declared: HashMap<String, Variable>,
    resolved: HashMap<String, String>,
    order: Vec<String>,
}

/// Shared, resolve-once variable store for a pipeline run
#[derive(Debug, Default)]
pub struct EnvironmentContext {
    inner: RwLock<ContextInner>,
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\$\$\{(?P<dollar>[A-Za-z_][A-Za-z0-9_.]*)\}|\{\{(?P<brace>[A-Za-z_][A-Za-z0-9_.]*)\}\}|\$?\{(?P<name>[A-Za-z_][A-Za-z0-9_.]*)\}",
        )
        .expect("reference pattern is valid")
    })
}

/// Names referenced by a template, in order of appearance; escapes are skipped
pub fn references(text: &str) -> Vec<String> {
    reference_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.name("name").map(|m| m.as_str().to_string()))
        .collect()
}

/// Whether rendering `text` changes it, through references or escapes
pub fn has_markup(text: &str) -> bool {
    reference_pattern().is_match(text)
}

/// Replace every `{NAME}` / `${NAME}` in `text` with `lookup(NAME)`
///
/// `{{NAME}}` renders as `{NAME}` and `$${NAME}` as `${NAME}` without a lookup.
pub fn interpolate<E>(
    text: &str,
    mut lookup: impl FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;

    for caps in reference_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&text[last..whole.start()]);
        if let Some(name) = caps.name("name") {
            rendered.push_str(&lookup(name.as_str())?);
        } else if let Some(name) = caps.name("brace") {
            rendered.push('{');
            rendered.push_str(name.as_str());
            rendered.push('}');
        } else if let Some(name) = caps.name("dollar") {
            rendered.push_str("${");
            rendered.push_str(name.as_str());
            rendered.push('}');
        }
        last = whole.end();
    }

    rendered.push_str(&text[last..]);
    Ok(rendered)
}

impl EnvironmentContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from `(name, value)` declarations, in order
    pub fn from_declarations<I, K, V>(declarations: I) -> Result<Self, ContextError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let context = Self::new();
        for (name, value) in declarations {
            context.declare(name, value)?;
        }
        Ok(context)
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a literal or template value
    ///
    /// Redeclaring a name that has not been read yet replaces it; redeclaring
    /// after a read fails with `ImmutableVariable`.
    pub fn declare(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContextError> {
        let name = name.into();
        let value = value.into();
        let mut inner = self.write();

        if inner.resolved.contains_key(&name) {
            return Err(ContextError::ImmutableVariable(name));
        }

        let variable = if !has_markup(&value) {
            Variable::Literal(value)
        } else {
            Variable::Template(value)
        };

        debug!("Declared variable {} = {:?}", name, variable);
        if inner.declared.insert(name.clone(), variable).is_none() {
            inner.order.push(name);
        }
        Ok(())
    }

    /// Register a value verbatim, never treating it as a template
    ///
    /// Used for captured command output, which may contain braces.
    pub fn declare_literal(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContextError> {
        let name = name.into();
        let mut inner = self.write();

        if inner.resolved.contains_key(&name) {
            return Err(ContextError::ImmutableVariable(name));
        }

        if inner
            .declared
            .insert(name.clone(), Variable::Literal(value.into()))
            .is_none()
        {
            inner.order.push(name);
        }
        Ok(())
    }

    /// Resolve a variable to its fully interpolated value
    pub fn resolve(&self, name: &str) -> Result<String, ContextError> {
        if let Some(value) = self.read().resolved.get(name) {
            return Ok(value.clone());
        }

        let mut inner = self.write();
        Self::resolve_in(&mut inner, name, &mut Vec::new(), None)
    }

    fn resolve_in(
        inner: &mut ContextInner,
        name: &str,
        stack: &mut Vec<String>,
        referenced_by: Option<&str>,
    ) -> Result<String, ContextError> {
        if let Some(value) = inner.resolved.get(name) {
            return Ok(value.clone());
        }

        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut chain = stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(ContextError::CyclicReference {
                name: stack[0].clone(),
                chain,
            });
        }

        let template = match inner.declared.get(name) {
            None => {
                return Err(ContextError::UnresolvedReference {
                    reference: name.to_string(),
                    referenced_by: referenced_by.map(str::to_string),
                })
            }
            Some(Variable::Literal(value)) => {
                let value = value.clone();
                inner.resolved.insert(name.to_string(), value.clone());
                return Ok(value);
            }
            Some(Variable::Template(template)) => template.clone(),
        };

        stack.push(name.to_string());
        let rendered = interpolate(&template, |reference| {
            Self::resolve_in(inner, reference, stack, Some(name))
        })?;
        stack.pop();

        inner.resolved.insert(name.to_string(), rendered.clone());
        Ok(rendered)
    }

    /// Resolve every declared variable
    pub fn resolve_all(&self) -> Result<BTreeMap<String, String>, ContextError> {
        let names = self.names();
        let mut values = BTreeMap::new();
        for name in names {
            let value = self.resolve(&name)?;
            values.insert(name, value);
        }
        Ok(values)
    }

    /// Interpolate arbitrary text against the context
    pub fn render(&self, text: &str) -> Result<String, ContextError> {
        interpolate(text, |reference| self.resolve(reference))
    }

    /// Declared names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().declared.contains_key(name)
    }

    /// Whether a variable has been read (and is therefore frozen)
    pub fn is_resolved(&self, name: &str) -> bool {
        self.read().resolved.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().declared.is_empty()
    }
}
