use crate::error::RedemptionError;
use crate::Timestamp;
use alloc::string::String;
use log::warn;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum Capability {
    RegisterTicket,
    Redeem,
    CreateDraw,
    CloseDraw,
    SettleDraw,
    VoidTicket,
}

const OPERATOR_CAPABILITIES: &[Capability] = &[Capability::RegisterTicket, Capability::Redeem];

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::RegisterTicket,
    Capability::Redeem,
    Capability::CreateDraw,
    Capability::CloseDraw,
    Capability::SettleDraw,
    Capability::VoidTicket,
];

impl Role {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Viewer => &[],
            Role::Operator => OPERATOR_CAPABILITIES,
            Role::Admin => ADMIN_CAPABILITIES,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Session supplied by the external identity provider
#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct AdminSession {
    pub operator: String,
    pub role: Role,
    pub expires_at: Timestamp,
}

pub trait Clock: Send + Sync {
    /// milliseconds since the unix epoch
    fn now(&self) -> Timestamp;
}

#[derive(Default, Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or_default()
    }
}

/// Checks the session before each mutating call.
/// Never renews a session, an expired one must be refreshed by the identity provider.
pub struct Authorizer<C> {
    clock: C,
}

impl<C: Clock> Authorizer<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn authorize(
        &self,
        session: &AdminSession,
        capability: Capability,
    ) -> Result<(), RedemptionError> {
        if self.clock.now() >= session.expires_at {
            warn!("Session of {} expired", session.operator);
            return Err(RedemptionError::SessionExpired);
        }
        if !session.role.has(capability) {
            warn!(
                "{} ({:?}) is not allowed to {:?}",
                session.operator, session.role, capability
            );
            return Err(RedemptionError::PermissionDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn session(role: Role) -> AdminSession {
        AdminSession {
            operator: "bob".into(),
            role,
            expires_at: 1_000,
        }
    }

    const ALL: [Capability; 6] = [
        Capability::RegisterTicket,
        Capability::Redeem,
        Capability::CreateDraw,
        Capability::CloseDraw,
        Capability::SettleDraw,
        Capability::VoidTicket,
    ];

    #[test]
    fn test_viewer() {
        let authorizer = Authorizer::new(FixedClock(10));
        for capability in ALL {
            assert_eq!(
                authorizer.authorize(&session(Role::Viewer), capability),
                Err(RedemptionError::PermissionDenied)
            );
        }
    }

    #[test]
    fn test_operator() {
        let authorizer = Authorizer::new(FixedClock(10));
        let session = session(Role::Operator);

        assert_eq!(authorizer.authorize(&session, Capability::Redeem), Ok(()));
        assert_eq!(authorizer.authorize(&session, Capability::RegisterTicket), Ok(()));
        for capability in [
            Capability::CreateDraw,
            Capability::CloseDraw,
            Capability::SettleDraw,
            Capability::VoidTicket,
        ] {
            assert_eq!(
                authorizer.authorize(&session, capability),
                Err(RedemptionError::PermissionDenied)
            );
        }
    }

    #[test]
    fn test_admin() {
        let authorizer = Authorizer::new(FixedClock(10));
        for capability in ALL {
            assert_eq!(authorizer.authorize(&session(Role::Admin), capability), Ok(()));
        }
    }

    #[test]
    fn test_expired_session() {
        // the session expires at 1_000
        let authorizer = Authorizer::new(FixedClock(1_000));
        assert_eq!(
            authorizer.authorize(&session(Role::Admin), Capability::CreateDraw),
            Err(RedemptionError::SessionExpired)
        );
        // expiry is checked before the role
        assert_eq!(
            authorizer.authorize(&session(Role::Viewer), Capability::CreateDraw),
            Err(RedemptionError::SessionExpired)
        );
    }

    #[test]
    fn test_system_clock() {
        assert!(SystemClock.now() > 1_600_000_000_000);
    }
}
