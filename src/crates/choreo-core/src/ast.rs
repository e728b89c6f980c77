//! Protocol declaration AST
//!
//! The surface-syntax parser is an external collaborator; this module defines
//! the only shape the core commits to: a [`Module`] of declarations, where a
//! [`ProtocolDecl`] exposes its name, ordered roles, and a body of
//! [`GlobalInteraction`]s in continuation style.
//!
//! Constructor helpers keep programmatic construction readable:
//!
//! ```rust
//! use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
//!
//! // Client -> Server: Request; Server -> Client: Response; end
//! let decl = ProtocolDecl::new(
//!     "RequestResponse",
//!     ["Client", "Server"],
//!     GlobalInteraction::message(
//!         "Client",
//!         "Server",
//!         "Request",
//!         GlobalInteraction::message("Server", "Client", "Response", GlobalInteraction::end()),
//!     ),
//! );
//! assert_eq!(decl.roles.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::cfg::{Label, ProtocolName, Recipients, RoleName};

/// A compilation unit: an ordered sequence of declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Module {
    /// Declarations in source order
    pub declarations: Vec<Declaration>,
}

impl Module {
    /// Empty module
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a protocol declaration
    pub fn with_protocol(mut self, decl: ProtocolDecl) -> Self {
        self.declarations.push(Declaration::Protocol(decl));
        self
    }

    /// Iterate the protocol declarations, skipping other declaration kinds
    pub fn protocols(&self) -> impl Iterator<Item = &ProtocolDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Protocol(p) => Some(p),
            _ => None,
        })
    }
}

/// Top-level declaration kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Declaration {
    /// A global protocol
    Protocol(ProtocolDecl),
    /// An import of another module (opaque to the core)
    Import {
        /// Imported module path
        module: String,
    },
    /// A payload type alias (opaque to the core; labels only)
    Type {
        /// Alias name
        name: String,
        /// Aliased external type tag
        external: String,
    },
}

/// A global protocol declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDecl {
    /// Protocol name
    pub name: ProtocolName,
    /// Declared roles, in declaration order
    pub roles: Vec<RoleName>,
    /// Protocol body
    pub body: GlobalInteraction,
}

impl ProtocolDecl {
    /// Create a declaration from anything string-like
    pub fn new<I, S>(name: impl Into<ProtocolName>, roles: I, body: GlobalInteraction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            body,
        }
    }
}

/// One branch of a choice, carrying its label and body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceBranch {
    /// Branch label (used on the outgoing branch edge)
    pub label: Label,
    /// Branch body; its `End` leaves fall through to the merge
    pub body: GlobalInteraction,
}

impl ChoiceBranch {
    /// Create a labeled branch
    pub fn new(label: impl Into<Label>, body: GlobalInteraction) -> Self {
        Self {
            label: label.into(),
            body,
        }
    }
}

/// Global interaction tree in continuation style
///
/// Every construct that has a sequel carries it as `continuation`; the `End`
/// leaf closes a flow. Inside a choice branch, parallel branch, or recursion
/// body, `End` means "fall through" to the construct's merge, join, or
/// continuation respectively; at the top level it means protocol end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlobalInteraction {
    /// A labeled message exchange
    Message {
        /// Sending role
        from: RoleName,
        /// Receiving role(s)
        to: Recipients,
        /// Message label
        label: Label,
        /// Optional payload type tag
        payload_type: Option<String>,
        /// What follows the exchange
        continuation: Box<GlobalInteraction>,
    },

    /// An internal step
    Tau {
        /// What follows
        continuation: Box<GlobalInteraction>,
    },

    /// A choice decided by one role
    Choice {
        /// The deciding role
        at: RoleName,
        /// The branches; each body's `End` leaves converge at the merge
        branches: Vec<ChoiceBranch>,
        /// What follows the merge
        continuation: Box<GlobalInteraction>,
    },

    /// Parallel composition
    Parallel {
        /// The parallel branches; each body's `End` leaves reach the join
        branches: Vec<GlobalInteraction>,
        /// What follows the join
        continuation: Box<GlobalInteraction>,
    },

    /// A labeled recursion
    Rec {
        /// Recursion label
        label: Label,
        /// Loop body; `Continue` leaves loop, `End` leaves exit
        body: Box<GlobalInteraction>,
        /// What follows when the body exits without continuing
        continuation: Box<GlobalInteraction>,
    },

    /// Jump back to an enclosing recursion
    Continue {
        /// Label of the enclosing recursion
        label: Label,
    },

    /// Sub-protocol invocation
    Do {
        /// The invoked protocol
        protocol: ProtocolName,
        /// Actual roles for the protocol's formal roles, in order
        role_arguments: Vec<RoleName>,
        /// What follows the invocation
        continuation: Box<GlobalInteraction>,
    },

    /// Dynamic participant creation
    CreateParticipants {
        /// The creating role
        creator: RoleName,
        /// The created participants' role
        role_name: RoleName,
        /// Optional instance name
        instance_name: Option<String>,
        /// What follows
        continuation: Box<GlobalInteraction>,
    },

    /// Session invitation
    Invitation {
        /// The inviting role
        inviter: RoleName,
        /// The invited role
        invitee: RoleName,
        /// What follows
        continuation: Box<GlobalInteraction>,
    },

    /// Dynamic role declaration
    DynamicRoleDecl {
        /// The declared role
        role_name: RoleName,
        /// What follows
        continuation: Box<GlobalInteraction>,
    },

    /// End of the current flow
    End,
}

impl GlobalInteraction {
    /// The `End` leaf
    pub fn end() -> Self {
        Self::End
    }

    /// Point-to-point message
    pub fn message(
        from: impl Into<RoleName>,
        to: impl Into<RoleName>,
        label: impl Into<Label>,
        continuation: GlobalInteraction,
    ) -> Self {
        Self::Message {
            from: from.into(),
            to: Recipients::one(to),
            label: label.into(),
            payload_type: None,
            continuation: Box::new(continuation),
        }
    }

    /// Message carrying a payload type tag
    pub fn message_with_payload(
        from: impl Into<RoleName>,
        to: impl Into<RoleName>,
        label: impl Into<Label>,
        payload_type: impl Into<String>,
        continuation: GlobalInteraction,
    ) -> Self {
        Self::Message {
            from: from.into(),
            to: Recipients::one(to),
            label: label.into(),
            payload_type: Some(payload_type.into()),
            continuation: Box::new(continuation),
        }
    }

    /// Multicast message to a set of roles
    pub fn multicast<I, S>(
        from: impl Into<RoleName>,
        to: I,
        label: impl Into<Label>,
        continuation: GlobalInteraction,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self::Message {
            from: from.into(),
            to: Recipients::many(to),
            label: label.into(),
            payload_type: None,
            continuation: Box::new(continuation),
        }
    }

    /// Internal step
    pub fn tau(continuation: GlobalInteraction) -> Self {
        Self::Tau {
            continuation: Box::new(continuation),
        }
    }

    /// Choice at a role over labeled branches
    pub fn choice(
        at: impl Into<RoleName>,
        branches: Vec<ChoiceBranch>,
        continuation: GlobalInteraction,
    ) -> Self {
        Self::Choice {
            at: at.into(),
            branches,
            continuation: Box::new(continuation),
        }
    }

    /// Parallel composition
    pub fn parallel(branches: Vec<GlobalInteraction>, continuation: GlobalInteraction) -> Self {
        Self::Parallel {
            branches,
            continuation: Box::new(continuation),
        }
    }

    /// Labeled recursion
    pub fn rec(
        label: impl Into<Label>,
        body: GlobalInteraction,
        continuation: GlobalInteraction,
    ) -> Self {
        Self::Rec {
            label: label.into(),
            body: Box::new(body),
            continuation: Box::new(continuation),
        }
    }

    /// Jump to an enclosing recursion
    pub fn continue_(label: impl Into<Label>) -> Self {
        Self::Continue { label: label.into() }
    }

    /// Sub-protocol invocation
    pub fn do_protocol<I, S>(
        protocol: impl Into<ProtocolName>,
        role_arguments: I,
        continuation: GlobalInteraction,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self::Do {
            protocol: protocol.into(),
            role_arguments: role_arguments.into_iter().map(Into::into).collect(),
            continuation: Box::new(continuation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_protocol_construction() {
        let decl = ProtocolDecl::new(
            "Ping",
            ["A", "B"],
            GlobalInteraction::message("A", "B", "Ping", GlobalInteraction::end()),
        );
        assert_eq!(decl.name, "Ping");
        assert_eq!(decl.roles, vec!["A", "B"]);
        assert!(matches!(decl.body, GlobalInteraction::Message { .. }));
    }

    #[test]
    fn test_choice_branches_carry_labels() {
        let body = GlobalInteraction::choice(
            "Server",
            vec![
                ChoiceBranch::new(
                    "ok",
                    GlobalInteraction::message("Server", "Client", "Ok", GlobalInteraction::end()),
                ),
                ChoiceBranch::new(
                    "err",
                    GlobalInteraction::message("Server", "Client", "Err", GlobalInteraction::end()),
                ),
            ],
            GlobalInteraction::end(),
        );
        if let GlobalInteraction::Choice { at, branches, .. } = &body {
            assert_eq!(at, "Server");
            assert_eq!(branches.len(), 2);
            assert_eq!(branches[0].label, "ok");
        } else {
            panic!("expected choice");
        }
    }

    #[test]
    fn test_module_filters_protocols() {
        let module = Module::new()
            .with_protocol(ProtocolDecl::new("P", ["A"], GlobalInteraction::end()));
        assert_eq!(module.protocols().count(), 1);
    }
}
