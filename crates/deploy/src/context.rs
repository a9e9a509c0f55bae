//! Context stack scoping artifact resolution and snapshot segmentation.
//!
//! Contexts are path-like names (`lib/vesting`) pushed onto a [`ContextStack`]. Pushing
//! returns a [`ContextGuard`]: the guard is the only way to obtain the [`Scope`] scoped
//! operations run in, and it pops its context when dropped, so the stack returns to its
//! previous depth on every exit path (including `?` and unwinding).

use std::{fmt, path::PathBuf};

use crate::error::{DeployError, Result};

/// Resolution scope formed by the contexts active when it was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    segments: Vec<String>,
}

impl Scope {
    /// The top-level scope (no active context).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a scope from a path-like name, e.g. `lib/vesting`.
    pub fn from_path(path: &str) -> Self {
        Self::root().join(path)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The scope as a relative filesystem path (empty for the root scope).
    pub fn path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Extend this scope with a path-like name. Empty and `.` segments are ignored.
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            name.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != ".")
                .map(str::to_string),
        );
        Self { segments }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

/// A pushed context.
#[derive(Debug, Clone)]
struct Frame {
    name: String,
    scope: Scope,
}

/// Stack of active contexts.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts currently open.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The scope at the top of the stack.
    pub fn scope(&self) -> Scope {
        self.frames
            .last()
            .map(|frame| frame.scope.clone())
            .unwrap_or_default()
    }

    /// Open a context. It stays active until the returned guard is popped or dropped.
    pub fn push(&mut self, name: impl Into<String>) -> ContextGuard<'_> {
        let name = name.into();
        let scope = self.scope().join(&name);

        tracing::debug!(
            context = %name,
            scope = %scope,
            depth = self.frames.len() + 1,
            "Entering context"
        );

        self.frames.push(Frame {
            name: name.clone(),
            scope: scope.clone(),
        });

        ContextGuard {
            depth: self.frames.len(),
            stack: self,
            name,
            scope,
            released: false,
        }
    }

    /// Fail if any context is still open.
    pub fn ensure_balanced(&self) -> Result<()> {
        match self.frames.last() {
            None => Ok(()),
            Some(frame) => Err(DeployError::ScopeImbalance {
                reason: format!(
                    "{} context(s) left open, innermost `{}`",
                    self.frames.len(),
                    frame.name
                ),
            }),
        }
    }

    fn pop_frame(&mut self, depth: usize, name: &str) -> Result<()> {
        match self.frames.last() {
            None => Err(DeployError::ScopeImbalance {
                reason: format!("cannot pop `{name}` from an empty context stack"),
            }),
            Some(top) if self.frames.len() != depth || top.name != name => {
                Err(DeployError::ScopeImbalance {
                    reason: format!(
                        "cannot pop `{name}` at depth {depth}: top of stack is `{}` at depth {}",
                        top.name,
                        self.frames.len()
                    ),
                })
            }
            Some(_) => {
                self.frames.pop();
                tracing::debug!(context = %name, depth = self.frames.len(), "Leaving context");
                Ok(())
            }
        }
    }
}

/// Handle proving a context is open.
///
/// Scoped operations take the guard's [`Scope`], never the stack's ambient state.
#[derive(Debug)]
pub struct ContextGuard<'a> {
    stack: &'a mut ContextStack,
    depth: usize,
    name: String,
    scope: Scope,
    released: bool,
}

impl ContextGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Open a nested context inside this one.
    pub fn push(&mut self, name: impl Into<String>) -> ContextGuard<'_> {
        self.stack.push(name)
    }

    /// Close this context, checking it is the innermost one.
    pub fn pop(mut self) -> Result<()> {
        self.released = true;
        self.stack.pop_frame(self.depth, &self.name)
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::debug!(context = %self.name, "Context released without explicit pop");
        self.stack.frames.truncate(self.depth.saturating_sub(1));
    }
}
