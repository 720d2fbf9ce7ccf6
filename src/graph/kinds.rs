//! Entity kinds reachable through the entity endpoints and the named relationship
//! counts each of them reports.

use super::Traversal;

const AD_CONTROL: &[&str] = &[
    "GenericAll",
    "GenericWrite",
    "WriteDacl",
    "WriteOwner",
    "Owns",
    "AllExtendedRights",
    "AddMember",
    "AddSelf",
    "ForceChangePassword",
    "WriteSPN",
    "AddKeyCredentialLink",
    "AddAllowedToAct",
];
const MEMBER_OF: &[&str] = &["MemberOf"];
const HAS_SESSION: &[&str] = &["HasSession"];
const ADMIN_TO: &[&str] = &["AdminTo"];
const CAN_RDP: &[&str] = &["CanRDP"];
const EXECUTE_DCOM: &[&str] = &["ExecuteDCOM"];
const CAN_PS_REMOTE: &[&str] = &["CanPSRemote"];
const SQL_ADMIN: &[&str] = &["SQLAdmin"];
const ALLOWED_TO_DELEGATE: &[&str] = &["AllowedToDelegate"];
const CONTAINS: &[&str] = &["Contains"];
const GP_LINK: &[&str] = &["GPLink"];
const TRUSTED_BY: &[&str] = &["TrustedBy"];
const DC_SYNC: &[&str] = &["DCSync", "GetChangesAll"];

const CONTROLLABLES: Traversal = Traversal::outbound(AD_CONTROL);
const CONTROLLERS: Traversal = Traversal::inbound(AD_CONTROL);

/// An entity endpoint: URL segment, graph kind, and its named one-hop relationships.
#[derive(Debug)]
pub struct EntityKind {
    pub path: &'static str,
    pub kind: &'static str,
    pub relationships: &'static [(&'static str, Traversal)],
}

impl EntityKind {
    pub fn relationship(&self, name: &str) -> Option<Traversal> {
        self.relationships.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
    }
}

pub const AD_ENTITY_KINDS: &[EntityKind] = &[
    EntityKind { path: "base", kind: "Base", relationships: &[("controllables", CONTROLLABLES)] },
    EntityKind {
        path: "users",
        kind: "User",
        relationships: &[
            ("sessions", Traversal::inbound(HAS_SESSION).to_kind("Computer")),
            ("groupMembership", Traversal::outbound(MEMBER_OF)),
            ("adminRights", Traversal::outbound(ADMIN_TO)),
            ("rdpRights", Traversal::outbound(CAN_RDP)),
            ("dcomRights", Traversal::outbound(EXECUTE_DCOM)),
            ("psRemoteRights", Traversal::outbound(CAN_PS_REMOTE)),
            ("sqlAdmin", Traversal::outbound(SQL_ADMIN)),
            ("constrainedDelegation", Traversal::outbound(ALLOWED_TO_DELEGATE)),
            ("controllables", CONTROLLABLES),
            ("controllers", CONTROLLERS),
        ],
    },
    EntityKind {
        path: "computers",
        kind: "Computer",
        relationships: &[
            ("sessions", Traversal::outbound(HAS_SESSION).to_kind("User")),
            ("adminUsers", Traversal::inbound(ADMIN_TO)),
            ("rdpUsers", Traversal::inbound(CAN_RDP)),
            ("dcomUsers", Traversal::inbound(EXECUTE_DCOM)),
            ("psRemoteUsers", Traversal::inbound(CAN_PS_REMOTE)),
            ("sqlAdminUsers", Traversal::inbound(SQL_ADMIN)),
            ("constrainedUsers", Traversal::inbound(ALLOWED_TO_DELEGATE)),
            ("groupMembership", Traversal::outbound(MEMBER_OF)),
            ("adminRights", Traversal::outbound(ADMIN_TO)),
            ("rdpRights", Traversal::outbound(CAN_RDP)),
            ("dcomRights", Traversal::outbound(EXECUTE_DCOM)),
            ("psRemoteRights", Traversal::outbound(CAN_PS_REMOTE)),
            ("constrainedPrivs", Traversal::outbound(ALLOWED_TO_DELEGATE)),
            ("controllables", CONTROLLABLES),
            ("controllers", CONTROLLERS),
        ],
    },
    EntityKind {
        path: "groups",
        kind: "Group",
        relationships: &[
            ("members", Traversal::inbound(MEMBER_OF)),
            ("memberOf", Traversal::outbound(MEMBER_OF)),
            ("adminRights", Traversal::outbound(ADMIN_TO)),
            ("rdpRights", Traversal::outbound(CAN_RDP)),
            ("dcomRights", Traversal::outbound(EXECUTE_DCOM)),
            ("psRemoteRights", Traversal::outbound(CAN_PS_REMOTE)),
            ("controllables", CONTROLLABLES),
            ("controllers", CONTROLLERS),
        ],
    },
    EntityKind {
        path: "domains",
        kind: "Domain",
        relationships: &[
            ("users", Traversal::outbound(CONTAINS).to_kind("User")),
            ("groups", Traversal::outbound(CONTAINS).to_kind("Group")),
            ("computers", Traversal::outbound(CONTAINS).to_kind("Computer")),
            ("ous", Traversal::outbound(CONTAINS).to_kind("OU")),
            ("gpos", Traversal::outbound(CONTAINS).to_kind("GPO")),
            ("inboundTrusts", Traversal::inbound(TRUSTED_BY)),
            ("outboundTrusts", Traversal::outbound(TRUSTED_BY)),
            ("controllers", CONTROLLERS),
            ("linkedgpos", Traversal::inbound(GP_LINK)),
            ("dcsyncers", Traversal::inbound(DC_SYNC)),
        ],
    },
    EntityKind {
        path: "gpos",
        kind: "GPO",
        relationships: &[("ous", Traversal::outbound(GP_LINK).to_kind("OU")), ("controllers", CONTROLLERS)],
    },
    EntityKind {
        path: "ous",
        kind: "OU",
        relationships: &[
            ("gpos", Traversal::inbound(GP_LINK)),
            ("users", Traversal::outbound(CONTAINS).to_kind("User")),
            ("groups", Traversal::outbound(CONTAINS).to_kind("Group")),
            ("computers", Traversal::outbound(CONTAINS).to_kind("Computer")),
        ],
    },
    EntityKind { path: "containers", kind: "Container", relationships: &[("controllers", CONTROLLERS)] },
    EntityKind { path: "aiacas", kind: "AIACA", relationships: &[("controllers", CONTROLLERS)] },
    EntityKind { path: "rootcas", kind: "RootCA", relationships: &[("controllers", CONTROLLERS)] },
    EntityKind {
        path: "enterprisecas",
        kind: "EnterpriseCA",
        relationships: &[("controllers", CONTROLLERS), ("publishedTemplates", Traversal::outbound(&["PublishedTo"]))],
    },
    EntityKind { path: "ntauthstores", kind: "NTAuthStore", relationships: &[("controllers", CONTROLLERS)] },
    EntityKind {
        path: "certtemplates",
        kind: "CertTemplate",
        relationships: &[("controllers", CONTROLLERS), ("publishedTo", Traversal::outbound(&["PublishedTo"]))],
    },
    EntityKind { path: "issuancepolicies", kind: "IssuancePolicy", relationships: &[("controllers", CONTROLLERS)] },
];

const AZ_CONTROL: &[&str] = &[
    "AZOwns",
    "AZOwner",
    "AZGenericAll",
    "AZGenericWrite",
    "AZUserAccessAdministrator",
    "AZContributor",
    "AZAddMembers",
    "AZResetPassword",
];
const AZ_MEMBER_OF: &[&str] = &["AZMemberOf"];
const AZ_HAS_ROLE: &[&str] = &["AZHasRole"];
const AZ_CONTAINS: &[&str] = &["AZContains"];
const AZ_EXECUTION: &[&str] = &["AZExecuteCommand", "AZVMAdminLogin", "AZVMContributor"];

const AZ_INBOUND_CONTROL: (&str, Traversal) = ("inbound-object-control", Traversal::inbound(AZ_CONTROL));
const AZ_OUTBOUND_CONTROL: (&str, Traversal) = ("outbound-object-control", Traversal::outbound(AZ_CONTROL));

pub const AZURE_ENTITY_KINDS: &[EntityKind] = &[
    EntityKind { path: "az-base", kind: "AZBase", relationships: &[AZ_INBOUND_CONTROL, AZ_OUTBOUND_CONTROL] },
    EntityKind {
        path: "users",
        kind: "AZUser",
        relationships: &[
            ("group-membership", Traversal::outbound(AZ_MEMBER_OF)),
            ("roles", Traversal::outbound(AZ_HAS_ROLE)),
            ("outbound-execution-privileges", Traversal::outbound(AZ_EXECUTION)),
            AZ_INBOUND_CONTROL,
            AZ_OUTBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "groups",
        kind: "AZGroup",
        relationships: &[
            ("group-members", Traversal::inbound(AZ_MEMBER_OF)),
            ("group-membership", Traversal::outbound(AZ_MEMBER_OF)),
            ("roles", Traversal::outbound(AZ_HAS_ROLE)),
            AZ_INBOUND_CONTROL,
            AZ_OUTBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "tenants",
        kind: "AZTenant",
        relationships: &[
            ("descendent-users", Traversal::outbound(AZ_CONTAINS).to_kind("AZUser")),
            ("descendent-groups", Traversal::outbound(AZ_CONTAINS).to_kind("AZGroup")),
            ("descendent-management-groups", Traversal::outbound(AZ_CONTAINS).to_kind("AZManagementGroup")),
            ("descendent-subscriptions", Traversal::outbound(AZ_CONTAINS).to_kind("AZSubscription")),
            ("descendent-resource-groups", Traversal::outbound(AZ_CONTAINS).to_kind("AZResourceGroup")),
            ("descendent-vms", Traversal::outbound(AZ_CONTAINS).to_kind("AZVM")),
            ("descendent-devices", Traversal::outbound(AZ_CONTAINS).to_kind("AZDevice")),
            ("descendent-service-principals", Traversal::outbound(AZ_CONTAINS).to_kind("AZServicePrincipal")),
            ("descendent-applications", Traversal::outbound(AZ_CONTAINS).to_kind("AZApp")),
            ("descendent-key-vaults", Traversal::outbound(AZ_CONTAINS).to_kind("AZKeyVault")),
            AZ_INBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "management-groups",
        kind: "AZManagementGroup",
        relationships: &[
            ("descendent-management-groups", Traversal::outbound(AZ_CONTAINS).to_kind("AZManagementGroup")),
            ("descendent-subscriptions", Traversal::outbound(AZ_CONTAINS).to_kind("AZSubscription")),
            AZ_INBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "subscriptions",
        kind: "AZSubscription",
        relationships: &[
            ("descendent-resource-groups", Traversal::outbound(AZ_CONTAINS).to_kind("AZResourceGroup")),
            ("descendent-vms", Traversal::outbound(AZ_CONTAINS).to_kind("AZVM")),
            ("descendent-key-vaults", Traversal::outbound(AZ_CONTAINS).to_kind("AZKeyVault")),
            AZ_INBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "resource-groups",
        kind: "AZResourceGroup",
        relationships: &[
            ("descendent-vms", Traversal::outbound(AZ_CONTAINS).to_kind("AZVM")),
            ("descendent-key-vaults", Traversal::outbound(AZ_CONTAINS).to_kind("AZKeyVault")),
            AZ_INBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "vms",
        kind: "AZVM",
        relationships: &[("inbound-execution-privileges", Traversal::inbound(AZ_EXECUTION)), AZ_INBOUND_CONTROL],
    },
    EntityKind { path: "managed-clusters", kind: "AZManagedCluster", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind { path: "vm-scale-sets", kind: "AZVMScaleSet", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind { path: "container-registries", kind: "AZContainerRegistry", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind { path: "web-apps", kind: "AZWebApp", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind { path: "logic-apps", kind: "AZLogicApp", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind { path: "automation-accounts", kind: "AZAutomationAccount", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind {
        path: "key-vaults",
        kind: "AZKeyVault",
        relationships: &[
            ("key-readers", Traversal::inbound(&["AZGetKeys"])),
            ("certificate-readers", Traversal::inbound(&["AZGetCertificates"])),
            ("secret-readers", Traversal::inbound(&["AZGetSecrets"])),
            AZ_INBOUND_CONTROL,
        ],
    },
    EntityKind {
        path: "devices",
        kind: "AZDevice",
        relationships: &[("inbound-execution-privileges", Traversal::inbound(AZ_EXECUTION)), AZ_INBOUND_CONTROL],
    },
    EntityKind { path: "apps", kind: "AZApp", relationships: &[AZ_INBOUND_CONTROL] },
    EntityKind {
        path: "service-principals",
        kind: "AZServicePrincipal",
        relationships: &[("roles", Traversal::outbound(AZ_HAS_ROLE)), AZ_INBOUND_CONTROL, AZ_OUTBOUND_CONTROL],
    },
    EntityKind {
        path: "roles",
        kind: "AZRole",
        relationships: &[("active-assignments", Traversal::inbound(AZ_HAS_ROLE))],
    },
    EntityKind { path: "function-apps", kind: "AZFunctionApp", relationships: &[AZ_INBOUND_CONTROL] },
];

pub fn ad_entity_kind(path: &str) -> Option<&'static EntityKind> {
    AD_ENTITY_KINDS.iter().find(|k| k.path == path)
}

pub fn azure_entity_kind(path: &str) -> Option<&'static EntityKind> {
    AZURE_ENTITY_KINDS.iter().find(|k| k.path == path)
}

/// Node kind for an ingest file's `meta.type`.
pub fn ingest_kind(meta_type: &str) -> Option<&'static str> {
    match meta_type {
        "users" => Some("User"),
        "groups" => Some("Group"),
        "computers" => Some("Computer"),
        "domains" => Some("Domain"),
        "gpos" => Some("GPO"),
        "ous" => Some("OU"),
        "containers" => Some("Container"),
        "aiacas" => Some("AIACA"),
        "rootcas" => Some("RootCA"),
        "enterprisecas" => Some("EnterpriseCA"),
        "ntauthstores" => Some("NTAuthStore"),
        "certtemplates" => Some("CertTemplate"),
        "issuancepolicies" => Some("IssuancePolicy"),
        _ => None,
    }
}
