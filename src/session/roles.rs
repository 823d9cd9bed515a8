//! Authorization roles and their permission sets

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageRoles,
    CreateZone,
    ManageZones,
    VerifyVendors,
    IssueVouchers,
    ManageFunds,
    TransferFunds,
    SubmitProof,
    ViewReports,
    RedeemVouchers,
    ViewVouchers,
    Donate,
    ViewPublic,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageRoles => "manage_roles",
            Permission::CreateZone => "create_zone",
            Permission::ManageZones => "manage_zones",
            Permission::VerifyVendors => "verify_vendors",
            Permission::IssueVouchers => "issue_vouchers",
            Permission::ManageFunds => "manage_funds",
            Permission::TransferFunds => "transfer_funds",
            Permission::SubmitProof => "submit_proof",
            Permission::ViewReports => "view_reports",
            Permission::RedeemVouchers => "redeem_vouchers",
            Permission::ViewVouchers => "view_vouchers",
            Permission::Donate => "donate",
            Permission::ViewPublic => "view_public",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ManageRoles,
    Permission::CreateZone,
    Permission::ManageZones,
    Permission::VerifyVendors,
    Permission::IssueVouchers,
    Permission::ManageFunds,
    Permission::TransferFunds,
    Permission::SubmitProof,
    Permission::ViewReports,
    Permission::Donate,
    Permission::ViewPublic,
];
const GOVERNMENT_PERMISSIONS: &[Permission] = &[
    Permission::CreateZone,
    Permission::ManageZones,
    Permission::VerifyVendors,
    Permission::IssueVouchers,
    Permission::ViewReports,
    Permission::Donate,
    Permission::ViewPublic,
];
const TREASURY_PERMISSIONS: &[Permission] = &[
    Permission::ManageFunds,
    Permission::TransferFunds,
    Permission::ViewReports,
    Permission::Donate,
    Permission::ViewPublic,
];
const ORACLE_PERMISSIONS: &[Permission] = &[
    Permission::SubmitProof,
    Permission::ViewReports,
    Permission::ViewPublic,
];
const VENDOR_PERMISSIONS: &[Permission] = &[
    Permission::RedeemVouchers,
    Permission::TransferFunds,
    Permission::ViewPublic,
];
const VICTIM_PERMISSIONS: &[Permission] = &[Permission::ViewVouchers, Permission::ViewPublic];
const DONOR_PERMISSIONS: &[Permission] = &[Permission::Donate, Permission::ViewPublic];
const GUEST_PERMISSIONS: &[Permission] = &[Permission::ViewPublic];

/// Authorization role; exactly one is active per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Government,
    Treasury,
    Oracle,
    Vendor,
    Victim,
    Donor,
    Guest,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Admin,
        Role::Government,
        Role::Treasury,
        Role::Oracle,
        Role::Vendor,
        Role::Victim,
        Role::Donor,
        Role::Guest,
    ];

    pub fn hierarchy_level(&self) -> u8 {
        match self {
            Role::Admin => 100,
            Role::Government => 80,
            Role::Treasury => 70,
            Role::Oracle => 60,
            Role::Vendor => 40,
            Role::Victim => 30,
            Role::Donor => 20,
            Role::Guest => 0,
        }
    }

    /// Whether this role satisfies a requirement of `required` or higher
    pub fn at_least(&self, required: Role) -> bool {
        self.hierarchy_level() >= required.hierarchy_level()
    }

    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Government => GOVERNMENT_PERMISSIONS,
            Role::Treasury => TREASURY_PERMISSIONS,
            Role::Oracle => ORACLE_PERMISSIONS,
            Role::Vendor => VENDOR_PERMISSIONS,
            Role::Victim => VICTIM_PERMISSIONS,
            Role::Donor => DONOR_PERMISSIONS,
            Role::Guest => GUEST_PERMISSIONS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Government => "government",
            Role::Treasury => "treasury",
            Role::Oracle => "oracle",
            Role::Vendor => "vendor",
            Role::Victim => "victim",
            Role::Donor => "donor",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role paired with its permission set
///
/// Only constructible from a [`Role`], so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    role: Role,
    permissions: &'static [Permission],
}

impl Authorization {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn permissions(&self) -> &'static [Permission] {
        self.permissions
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn at_least(&self, required: Role) -> bool {
        self.role.at_least(required)
    }
}

impl From<Role> for Authorization {
    fn from(role: Role) -> Self {
        Self {
            role,
            permissions: role.permissions(),
        }
    }
}

impl Default for Authorization {
    fn default() -> Self {
        Role::Guest.into()
    }
}
