//! Identity and capability model
//!
//! Every script thread runs under an [`Identity`]. A fixed table maps each
//! identity to a [`Capability`] bitmask; a thread can additionally be granted
//! ad-hoc capabilities. Every bound function and property carries a required
//! mask, checked before the underlying call executes. Violations raise
//! [`ScriptError::CapabilityViolation`] naming the action and the lacking
//! permission — never a silent no-op.

use crate::error::ScriptError;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A flat bitmask of named permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability(pub u32);

impl Capability {
    /// No permission required.
    pub const NONE: Capability = Capability(0);
    /// Plugin-level access.
    pub const PLUGIN: Capability = Capability(1 << 1);
    /// Local-user access (filesystem-adjacent surfaces).
    pub const LOCAL_USER: Capability = Capability(1 << 3);
    /// Mutation of player-owned state.
    pub const WRITE_PLAYER: Capability = Capability(1 << 4);
    /// Engine-shipped script access.
    pub const ENGINE_SCRIPT: Capability = Capability(1 << 5);
    /// Engine-internal access.
    pub const ENGINE: Capability = Capability(1 << 6);
    /// Members never accessible from scripts.
    pub const NOT_ACCESSIBLE: Capability = Capability(1 << 7);
    /// Assistant tooling access.
    pub const ASSISTANT: Capability = Capability(1 << 16);
    /// Internal test access.
    pub const INTERNAL_TEST: Capability = Capability(1 << 17);
    /// Cloud-API session access.
    pub const CLOUD_API: Capability = Capability(1 << 18);
    /// Remote command execution.
    pub const REMOTE_COMMAND: Capability = Capability(1 << 19);

    /// Whether `self` includes every bit of `required`.
    pub fn contains(self, required: Capability) -> bool {
        self.0 & required.0 == required.0
    }

    /// Bit index of the highest set permission, for error messages.
    pub fn bit_index(self) -> u32 {
        31 - self.0.leading_zeros().min(31)
    }
}

impl BitOr for Capability {
    type Output = Capability;
    fn bitor(self, rhs: Capability) -> Capability {
        Capability(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capability {
    fn bitor_assign(&mut self, rhs: Capability) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The ambient identity a script thread runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Identity {
    /// No identity established.
    Anonymous = 0,
    /// Local UI scripts.
    LocalGui,
    /// Ordinary game scripts.
    GameScript,
    /// Elevated game scripts.
    ElevatedGameScript,
    /// The interactive command bar.
    CommandBar,
    /// Editor plugins.
    Plugin,
    /// Elevated editor plugins.
    ElevatedPlugin,
    /// External COM automation.
    Com,
    /// Web service calls.
    WebService,
    /// The replication layer.
    Replicator,
    /// Assistant tooling.
    Assistant,
    /// Cloud-API sessions.
    CloudSession,
    /// Game scripts under test harnesses.
    TestingGameScript,
}

/// Fixed identity-to-capability table.
pub fn identity_capabilities(identity: Identity) -> Capability {
    match identity {
        Identity::Anonymous | Identity::GameScript => Capability::NONE,
        Identity::LocalGui | Identity::CommandBar => Capability::PLUGIN | Capability::LOCAL_USER,
        Identity::ElevatedGameScript => {
            Capability::PLUGIN
                | Capability::LOCAL_USER
                | Capability::ENGINE_SCRIPT
                | Capability::INTERNAL_TEST
        }
        Identity::Plugin => Capability::PLUGIN,
        Identity::ElevatedPlugin => {
            Capability::PLUGIN
                | Capability::LOCAL_USER
                | Capability::ENGINE_SCRIPT
                | Capability::ASSISTANT
                | Capability::INTERNAL_TEST
        }
        Identity::Com | Identity::WebService => {
            Capability::PLUGIN
                | Capability::LOCAL_USER
                | Capability::WRITE_PLAYER
                | Capability::ENGINE_SCRIPT
                | Capability::ENGINE
                | Capability::NOT_ACCESSIBLE
        }
        Identity::Replicator => Capability::WRITE_PLAYER | Capability::ENGINE_SCRIPT,
        Identity::Assistant => Capability::ASSISTANT | Capability::PLUGIN | Capability::LOCAL_USER,
        Identity::CloudSession => Capability::CLOUD_API,
        Identity::TestingGameScript => Capability::INTERNAL_TEST,
    }
}

/// Check that `held` covers `required`, or build the violation error.
pub fn check_capability(
    identity: Identity,
    held: Capability,
    required: Capability,
    action: &str,
) -> Result<(), ScriptError> {
    if held.contains(required) {
        Ok(())
    } else {
        Err(ScriptError::CapabilityViolation {
            identity: identity as u8,
            action: action.to_string(),
            permission: required.bit_index(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let held = Capability::PLUGIN | Capability::LOCAL_USER;
        assert!(held.contains(Capability::PLUGIN));
        assert!(held.contains(Capability::NONE));
        assert!(!held.contains(Capability::ENGINE));
        assert!(!held.contains(Capability::PLUGIN | Capability::ENGINE));
    }

    #[test]
    fn test_identity_table() {
        assert_eq!(
            identity_capabilities(Identity::GameScript),
            Capability::NONE
        );
        assert!(identity_capabilities(Identity::ElevatedPlugin).contains(Capability::ASSISTANT));
        assert!(!identity_capabilities(Identity::Plugin).contains(Capability::LOCAL_USER));
    }

    #[test]
    fn test_identity_lines_up_with_security_context_enum() {
        for (name, identity) in [
            ("Anonymous", Identity::Anonymous),
            ("GameScript", Identity::GameScript),
            ("Plugin", Identity::Plugin),
            ("TestingGameScript", Identity::TestingGameScript),
        ] {
            let item = trellis_core::find_enum_item("SecurityContext", name).unwrap();
            assert_eq!(item.value(), identity as i32);
        }
    }

    #[test]
    fn test_check_capability_error_shape() {
        let err = check_capability(
            Identity::GameScript,
            Capability::NONE,
            Capability::ENGINE_SCRIPT,
            "read 'DataCost'",
        )
        .unwrap_err();

        match err {
            ScriptError::CapabilityViolation {
                identity,
                action,
                permission,
            } => {
                assert_eq!(identity, Identity::GameScript as u8);
                assert_eq!(action, "read 'DataCost'");
                assert_eq!(permission, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
