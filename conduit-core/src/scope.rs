// SPDX-License-Identifier: GPL-3.0-or-later

//! The minimal scoped-attribute primitive a `Runnable` needs.
//!
//! A full descriptor/mixin framework that intercepts every attribute
//! read/write to partition an object's state between a parent scope and a
//! worker scope, raising on illegal cross-scope access at the access site,
//! is deliberately not built here. What's needed instead is the plain
//! requirement: each `Runnable`'s state must be transported into the
//! worker's scope exactly once, and state owned by one scope must not be
//! read from the other.
//!
//! `ScopedAttributes::scope_policy()` is the declaration a `Runnable`
//! implementor provides (one entry per attribute that needs a non-default
//! policy); `Runner::start` (see `crate::runner`) validates it before
//! entering the worker scope.

use crate::error::ConduitError;

/// Which thread-boundary action an attribute supports: shared between
/// threads, copied per thread, or never allowed across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    /// Accessible, by reference, from any thread in the same process.
    Shared,
    /// A fresh copy is made per thread.
    Copied,
    /// May never cross a thread boundary.
    NotAllowed,
}

/// Which process-boundary action an attribute supports: copied into the
/// child process, reset to nil in the child process, or never allowed
/// across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    /// Serialized into the child process.
    Copied,
    /// Replaced with a default/empty value in the child process.
    SetToNil,
    /// May never cross a process boundary.
    NotAllowed,
}

/// The declared scope policy for one `Runnable` attribute.
#[derive(Debug, Clone, Copy)]
pub struct AttributeScope {
    /// The attribute's name, used verbatim in any `TransportNotAllowed`
    /// or `AccessDenied` error so the offending field is unambiguous.
    pub name: &'static str,
    pub thread_action: ThreadAction,
    pub process_action: ProcessAction,
}

impl AttributeScope {
    /// Shorthand for an attribute that is freely shared across threads but
    /// may never leave the process.
    pub const fn shared_thread_only(name: &'static str) -> Self {
        AttributeScope {
            name,
            thread_action: ThreadAction::Shared,
            process_action: ProcessAction::NotAllowed,
        }
    }

    /// Shorthand for an attribute that is copied on every boundary
    /// crossing (the common case for plain data).
    pub const fn copied(name: &'static str) -> Self {
        AttributeScope {
            name,
            thread_action: ThreadAction::Copied,
            process_action: ProcessAction::Copied,
        }
    }

    /// Shorthand for an attribute that must never leave the scope it was
    /// constructed in, under either runner kind.
    pub const fn not_allowed(name: &'static str) -> Self {
        AttributeScope {
            name,
            thread_action: ThreadAction::NotAllowed,
            process_action: ProcessAction::NotAllowed,
        }
    }
}

/// Implemented by `Runnable`s that have attributes needing a non-default
/// scope policy. The default policy (no declared attributes) is legal
/// under both runner kinds.
pub trait ScopedAttributes {
    /// The declared scope policy, one entry per attribute that needs
    /// checking. Attributes not listed are assumed `copied()`.
    fn scope_policy() -> &'static [AttributeScope] {
        &[]
    }
}

/// Which concrete `Runner` kind is about to enter its worker scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Thread,
    Process,
}

/// Validate a declared scope policy against the chosen runner kind.
///
/// Called by `Runner::start` before the worker scope is entered. Returns
/// the first violation found, naming the offending attribute and the
/// boundary it cannot cross.
pub fn validate_scope_policy(
    policy: &[AttributeScope],
    kind: RunnerKind,
) -> Result<(), ConduitError> {
    for attribute in policy {
        let forbidden = match kind {
            RunnerKind::Thread => attribute.thread_action == ThreadAction::NotAllowed,
            RunnerKind::Process => attribute.process_action == ProcessAction::NotAllowed,
        };
        if forbidden {
            return Err(ConduitError::TransportNotAllowed {
                attribute: attribute.name.to_string(),
                boundary: match kind {
                    RunnerKind::Thread => "thread".to_string(),
                    RunnerKind::Process => "process".to_string(),
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_is_always_legal() {
        assert!(validate_scope_policy(&[], RunnerKind::Thread).is_ok());
        assert!(validate_scope_policy(&[], RunnerKind::Process).is_ok());
    }

    #[test]
    fn thread_not_allowed_is_rejected_by_thread_runner() {
        let policy = [AttributeScope::not_allowed("socket")];
        let result = validate_scope_policy(&policy, RunnerKind::Thread);
        match result {
            Err(ConduitError::TransportNotAllowed { attribute, boundary }) => {
                assert_eq!(attribute, "socket");
                assert_eq!(boundary, "thread");
            }
            other => panic!("expected TransportNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn shared_thread_only_is_rejected_by_process_runner() {
        let policy = [AttributeScope::shared_thread_only("handle")];
        let result = validate_scope_policy(&policy, RunnerKind::Process);
        assert!(matches!(
            result,
            Err(ConduitError::TransportNotAllowed { .. })
        ));
        assert!(validate_scope_policy(&policy, RunnerKind::Thread).is_ok());
    }

    #[test]
    fn copied_is_legal_everywhere() {
        let policy = [AttributeScope::copied("count")];
        assert!(validate_scope_policy(&policy, RunnerKind::Thread).is_ok());
        assert!(validate_scope_policy(&policy, RunnerKind::Process).is_ok());
    }
}
