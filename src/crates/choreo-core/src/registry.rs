//! Protocol and CFSM registries
//!
//! The [`ProtocolRegistry`] resolves `do` invocations to sub-protocol CFGs,
//! validates role-argument arity, builds the formal-to-actual
//! [`RoleMapping`] applied while traversing a sub-protocol, and rejects
//! registries whose sub-protocol dependencies form a cycle.
//!
//! The [`CfsmRegistry`] is the distributed layer's counterpart: it resolves
//! `protocol -> role -> machine` for sub-protocol invocation at the CFSM
//! level.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cfg::{Action, Cfg, Node, ProtocolName, RoleName};
use crate::cfsm::Cfsm;
use crate::error::RegistryError;

/// Bijective mapping from a sub-protocol's formal roles to the caller's
/// actual roles
///
/// Applied to every role mention while a sub-protocol frame is active, so
/// events and messages carry caller-side names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    formal_to_actual: BTreeMap<RoleName, RoleName>,
}

impl RoleMapping {
    /// Identity mapping
    pub fn identity() -> Self {
        Self::default()
    }

    /// Zip formal roles with actuals; lengths must already match
    pub fn new(formals: &[RoleName], actuals: &[RoleName]) -> Self {
        Self {
            formal_to_actual: formals
                .iter()
                .cloned()
                .zip(actuals.iter().cloned())
                .collect(),
        }
    }

    /// Map one role; unmapped names pass through unchanged
    pub fn apply(&self, role: &str) -> RoleName {
        self.formal_to_actual
            .get(role)
            .cloned()
            .unwrap_or_else(|| role.to_string())
    }

    /// Compose with an outer mapping: `outer(self(role))`
    ///
    /// Used when sub-protocols nest; the stored mapping of an inner frame
    /// always maps straight to root-level names.
    pub fn compose(&self, outer: &RoleMapping) -> RoleMapping {
        RoleMapping {
            formal_to_actual: self
                .formal_to_actual
                .iter()
                .map(|(f, a)| (f.clone(), outer.apply(a)))
                .collect(),
        }
    }

    /// Whether no role is remapped
    pub fn is_identity(&self) -> bool {
        self.formal_to_actual.iter().all(|(f, a)| f == a)
    }
}

/// Name-keyed store of protocol CFGs
///
/// # Examples
///
/// ```rust
/// use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
/// use choreo_core::builder::build_cfg;
/// use choreo_core::registry::ProtocolRegistry;
///
/// let auth = build_cfg(&ProtocolDecl::new(
///     "Auth",
///     ["C", "S"],
///     GlobalInteraction::message("C", "S", "Credentials", GlobalInteraction::end()),
/// )).unwrap();
///
/// let mut registry = ProtocolRegistry::new();
/// registry.register(auth);
///
/// assert!(registry.resolve("Auth").is_ok());
/// assert!(registry.resolve("Missing").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    protocols: BTreeMap<ProtocolName, Arc<Cfg>>,
}

impl ProtocolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol under its own name; replaces a previous entry
    pub fn register(&mut self, cfg: Cfg) {
        self.protocols.insert(cfg.protocol_name.clone(), Arc::new(cfg));
    }

    /// Registered protocol names, sorted
    pub fn names(&self) -> Vec<&ProtocolName> {
        self.protocols.keys().collect()
    }

    /// Look up a protocol by name
    pub fn resolve(&self, name: &str) -> Result<Arc<Cfg>, RegistryError> {
        self.protocols
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ProtocolNotFound {
                protocol: name.to_string(),
            })
    }

    /// Build the formal-to-actual mapping for invoking `protocol` with
    /// `actual_roles`
    ///
    /// # Errors
    ///
    /// `protocol-not-found` for unknown protocols and
    /// `invalid-role-arguments` when the cardinality differs from the
    /// protocol's formal role list.
    pub fn create_role_mapping(
        &self,
        protocol: &str,
        actual_roles: &[RoleName],
    ) -> Result<RoleMapping, RegistryError> {
        let cfg = self.resolve(protocol)?;
        if cfg.roles.len() != actual_roles.len() {
            return Err(RegistryError::InvalidRoleArguments {
                protocol: protocol.to_string(),
                expected: cfg.roles.len(),
                actual: actual_roles.len(),
            });
        }
        Ok(RoleMapping::new(&cfg.roles, actual_roles))
    }

    /// Validate every `do` reference and the dependency graph
    ///
    /// Checks that each invoked protocol exists, that each invocation's role
    /// arguments match the callee's arity, and that the `P invokes Q`
    /// relation is acyclic.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for cfg in self.protocols.values() {
            for (protocol, role_arguments) in invocations(cfg) {
                self.create_role_mapping(&protocol, &role_arguments)?;
            }
        }
        self.check_cycles()
    }

    fn check_cycles(&self) -> Result<(), RegistryError> {
        // Depth-first walk over the invocation graph with an explicit path
        // so the reported chain names the cycle.
        let mut finished: HashSet<&ProtocolName> = HashSet::new();
        for start in self.protocols.keys() {
            if finished.contains(start) {
                continue;
            }
            let mut path: Vec<&ProtocolName> = Vec::new();
            self.visit(start, &mut path, &mut finished)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a ProtocolName,
        path: &mut Vec<&'a ProtocolName>,
        finished: &mut HashSet<&'a ProtocolName>,
    ) -> Result<(), RegistryError> {
        if finished.contains(name) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|p| *p == name) {
            let mut chain: Vec<String> = path[pos..].iter().map(|p| p.to_string()).collect();
            chain.push(name.to_string());
            return Err(RegistryError::CircularDependency {
                chain: chain.join(" -> "),
            });
        }
        path.push(name);
        if let Some(cfg) = self.protocols.get(name) {
            for (callee, _) in invocations(cfg) {
                if let Some((key, _)) = self.protocols.get_key_value(&callee) {
                    self.visit(key, path, finished)?;
                }
            }
        }
        path.pop();
        finished.insert(name);
        Ok(())
    }
}

/// `(protocol, role_arguments)` pairs of every `do` action in `cfg`
fn invocations(cfg: &Cfg) -> Vec<(ProtocolName, Vec<RoleName>)> {
    cfg.nodes()
        .filter_map(|entry| match &entry.node {
            Node::Action {
                action: Action::Do {
                    protocol,
                    role_arguments,
                },
            } => Some((protocol.clone(), role_arguments.clone())),
            _ => None,
        })
        .collect()
}

/// Store of projected machines keyed by protocol and role
///
/// Also records each protocol's formal role order, which `call` transitions
/// need to line actual roles up with formals.
#[derive(Debug, Clone, Default)]
pub struct CfsmRegistry {
    machines: BTreeMap<ProtocolName, BTreeMap<RoleName, Arc<Cfsm>>>,
    formal_roles: BTreeMap<ProtocolName, Vec<RoleName>>,
}

impl CfsmRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one role's machine for a protocol
    pub fn register(&mut self, protocol: impl Into<ProtocolName>, cfsm: Cfsm) {
        self.machines
            .entry(protocol.into())
            .or_default()
            .insert(cfsm.role.clone(), Arc::new(cfsm));
    }

    /// Register a full projection of a protocol with its formal role order
    pub fn register_projection(
        &mut self,
        protocol: impl Into<ProtocolName>,
        formal_roles: Vec<RoleName>,
        machines: impl IntoIterator<Item = Cfsm>,
    ) {
        let protocol = protocol.into();
        self.formal_roles.insert(protocol.clone(), formal_roles);
        for m in machines {
            self.register(protocol.clone(), m);
        }
    }

    /// The protocol's formal roles, in declaration order
    pub fn formal_roles(&self, protocol: &str) -> Result<&[RoleName], RegistryError> {
        self.formal_roles
            .get(protocol)
            .map(Vec::as_slice)
            .ok_or_else(|| RegistryError::ProtocolNotFound {
                protocol: protocol.to_string(),
            })
    }

    /// Resolve the machine for `role` in `protocol`
    pub fn resolve(&self, protocol: &str, role: &str) -> Result<Arc<Cfsm>, RegistryError> {
        let by_role = self
            .machines
            .get(protocol)
            .ok_or_else(|| RegistryError::ProtocolNotFound {
                protocol: protocol.to_string(),
            })?;
        by_role
            .get(role)
            .cloned()
            .ok_or_else(|| RegistryError::RoleNotFound {
                protocol: protocol.to_string(),
                role: role.to_string(),
            })
    }
}
