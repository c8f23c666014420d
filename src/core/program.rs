//! The compiled program handle an instance runs.
//!
//! Programs are produced by an external compiler/loader and are opaque here:
//! a fixed table from [`Method`] to an entry point, a trace table of countable
//! source references, the name of the default director, an optional default
//! health probe and the syntax version the source was written against.
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{context::ExecutionContext, method::Method},
    ports::MethodFn,
};

/// Errors raised while assembling a program
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgramError {
    #[error("program has no entry point for method {0}")]
    MissingMethod(Method),
}

/// Location of one countable reference in the program source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Index of the source file in the compiler's file table
    pub source: u32,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.source, self.line, self.column)
    }
}

/// Default health probe declared by a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Number of most recent polls considered
    pub window: u32,
    /// Number of good polls within the window required for health
    pub threshold: u32,
}

impl Default for ProbeSpec {
    fn default() -> Self {
        Self {
            url: "/".to_string(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            window: 8,
            threshold: 3,
        }
    }
}

/// Compiled function table plus the metadata the runtime reads from it.
pub struct CompiledProgram {
    methods: HashMap<Method, Arc<dyn MethodFn>>,
    refs: Vec<SourceRef>,
    default_director: Option<String>,
    default_probe: Option<ProbeSpec>,
    syntax: u32,
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().copied().collect();
        methods.sort();
        f.debug_struct("CompiledProgram")
            .field("methods", &methods)
            .field("refs", &self.refs.len())
            .field("default_director", &self.default_director)
            .field("syntax", &self.syntax)
            .finish()
    }
}

impl CompiledProgram {
    pub fn builder() -> CompiledProgramBuilder {
        CompiledProgramBuilder::default()
    }

    /// Entry point for `method`. Every method is present once built.
    pub fn method(&self, method: Method) -> Option<&Arc<dyn MethodFn>> {
        self.methods.get(&method)
    }

    pub fn refs(&self) -> &[SourceRef] {
        &self.refs
    }

    pub fn default_director(&self) -> Option<&str> {
        self.default_director.as_deref()
    }

    pub fn default_probe(&self) -> Option<&ProbeSpec> {
        self.default_probe.as_ref()
    }

    /// Syntax version, as `major * 10 + minor` (4.1 is 41).
    pub fn syntax(&self) -> u32 {
        self.syntax
    }
}

/// Builder for [`CompiledProgram`].
pub struct CompiledProgramBuilder {
    methods: HashMap<Method, Arc<dyn MethodFn>>,
    refs: Vec<SourceRef>,
    default_director: Option<String>,
    default_probe: Option<ProbeSpec>,
    syntax: u32,
}

impl Default for CompiledProgramBuilder {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
            refs: Vec::new(),
            default_director: None,
            default_probe: None,
            syntax: 41,
        }
    }
}

impl CompiledProgramBuilder {
    pub fn method<F>(mut self, method: Method, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) + Send + Sync + 'static,
    {
        self.methods.insert(method, Arc::new(func));
        self
    }

    /// Install `func` for every method that has no entry point yet.
    pub fn fill_missing<F>(mut self, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) + Clone + Send + Sync + 'static,
    {
        for method in Method::ALL {
            if !self.methods.contains_key(&method) {
                self.methods.insert(method, Arc::new(func.clone()));
            }
        }
        self
    }

    pub fn source_ref(mut self, source_ref: SourceRef) -> Self {
        self.refs.push(source_ref);
        self
    }

    pub fn default_director(mut self, local_name: impl Into<String>) -> Self {
        self.default_director = Some(local_name.into());
        self
    }

    pub fn default_probe(mut self, probe: ProbeSpec) -> Self {
        self.default_probe = Some(probe);
        self
    }

    pub fn syntax(mut self, syntax: u32) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn build(self) -> Result<CompiledProgram, ProgramError> {
        if let Some(missing) = Method::ALL
            .into_iter()
            .find(|method| !self.methods.contains_key(method))
        {
            return Err(ProgramError::MissingMethod(missing));
        }

        Ok(CompiledProgram {
            methods: self.methods,
            refs: self.refs,
            default_director: self.default_director,
            default_probe: self.default_probe,
            syntax: self.syntax,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::method::Action;

    fn synth(ctx: &mut ExecutionContext<'_>) {
        ctx.set_handling(Action::Synth);
    }

    #[test]
    fn test_missing_method_rejected() {
        let result = CompiledProgram::builder()
            .method(Method::Recv, synth)
            .build();
        assert_eq!(result.unwrap_err(), ProgramError::MissingMethod(Method::Pipe));
    }

    #[test]
    fn test_fill_missing_completes_table() {
        let program = CompiledProgram::builder()
            .method(Method::Hash, |ctx| ctx.set_handling(Action::Lookup))
            .fill_missing(synth)
            .source_ref(SourceRef {
                source: 0,
                line: 12,
                column: 5,
            })
            .default_director("web")
            .syntax(40)
            .build()
            .expect("complete program");

        for method in Method::ALL {
            assert!(program.method(method).is_some());
        }
        assert_eq!(program.refs().len(), 1);
        assert_eq!(program.refs()[0].to_string(), "0.12.5");
        assert_eq!(program.default_director(), Some("web"));
        assert_eq!(program.syntax(), 40);
        assert!(program.default_probe().is_none());
    }
}
