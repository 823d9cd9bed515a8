//! Wallet sessions, roles and balance synchronization
//!
//! - **roles**: role hierarchy and permission sets
//! - **resolver**: ordered role probes with first-match semantics
//! - **state**: pure connection state machine
//! - **marker**: persisted "was connected" flag
//! - **manager**: connect, silent reconnect, disconnect, wallet events
//! - **sync**: per-session balance and read-model refresh

pub mod manager;
pub mod marker;
pub mod resolver;
pub mod roles;
pub mod state;
pub mod sync;

pub use manager::{SessionConfig, SessionError, SessionManager};
pub use marker::{ConnectionMarker, FileMarker, MarkerError, MemoryMarker};
pub use resolver::{
    default_probes, AccessRoleProbe, OwnerProbe, ProbeContext, Resolution, RoleProbe,
    RoleResolver, VendorProbe, VoucherProbe,
};
pub use roles::{Authorization, Permission, Role, UnknownRole};
pub use state::{ConnectionEvent, ConnectionState, Session};
pub use sync::{BalanceSynchronizer, RefreshTrigger, SyncConfig, VoucherCache, ZoneCache};
