//! Static projection tables: which remote collection backs each listing and
//! which fields it exposes, in output order.

use crate::services::graph_client::ApiVersion::{Beta, V1};
use crate::services::projection::FieldSpec as F;
use crate::services::resources::{CollectionSpec, RecordFilter};

pub const MANAGED_DEVICE_FIELDS: &[F] = &[
    F::field("id"),
    F::field("deviceName"),
    F::field("operatingSystem"),
    F::field("osVersion"),
    F::field("complianceState"),
    F::field("managedDeviceOwnerType"),
    F::timestamp("enrolledDateTime"),
    F::timestamp("lastSyncDateTime"),
];

pub const MANAGED_DEVICES: CollectionSpec =
    CollectionSpec::new(V1, &["deviceManagement", "managedDevices"], MANAGED_DEVICE_FIELDS);

const DEVICE_POLICY_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("description"),
    F::type_tag("platform"),
    F::timestamp("createdDateTime"),
    F::timestamp("lastModifiedDateTime"),
    F::field("version"),
];

pub const COMPLIANCE_POLICIES: CollectionSpec =
    CollectionSpec::new(V1, &["deviceManagement", "deviceCompliancePolicies"], DEVICE_POLICY_FIELDS);

pub const CONFIGURATION_POLICIES: CollectionSpec =
    CollectionSpec::new(V1, &["deviceManagement", "deviceConfigurations"], DEVICE_POLICY_FIELDS);

pub const ASSIGNMENT_FILTERS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "assignmentFilters"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::field("platform"),
        F::field("rule"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
    ],
);

pub const POWERSHELL_SCRIPTS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "deviceManagementScripts"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::constant("scriptType", "PowerShell"),
        F::field("fileName"),
        F::field("runAsAccount"),
        F::field("enforceSignatureCheck"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
    ],
);

pub const SHELL_SCRIPTS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "deviceShellScripts"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::constant("scriptType", "Shell"),
        F::field("fileName"),
        F::field("runAsAccount"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
    ],
);

pub const MOBILE_APPS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceAppManagement", "mobileApps"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::field("publisher"),
        F::type_tag("appType"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
        F::field("publishingState"),
        F::field("isAssigned"),
        F::field("isFeatured"),
    ],
);

pub const AUTOPILOT_PROFILES: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "windowsAutopilotDeploymentProfiles"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::type_tag("profileType"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
        F::field("outOfBoxExperienceSettings"),
        F::field("enrollmentStatusScreenSettings"),
        F::field("extractHardwareHash"),
        F::field("deviceNameTemplate"),
        F::field("deviceType"),
        F::field("enableWhiteGlove"),
    ],
);

pub const AUTOPILOT_DEVICES: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "windowsAutopilotDeviceIdentities"],
    &[
        F::field("id"),
        F::field("serialNumber"),
        F::field("model"),
        F::field("manufacturer"),
        F::field("productKey"),
        F::field("groupTag"),
        F::field("purchaseOrderIdentifier"),
        F::field("enrollmentState"),
        F::timestamp("lastContactedDateTime"),
        F::field("addressableUserName"),
        F::field("userPrincipalName"),
        F::field("resourceName"),
        F::field("skuNumber"),
        F::field("systemFamily"),
        F::field("azureActiveDirectoryDeviceId"),
        F::field("managedDeviceId"),
        F::field("displayName"),
    ],
);

pub const ENROLLMENT_STATUS_PAGES: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "deviceEnrollmentConfigurations"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::field("priority"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
        F::field("version"),
        F::field("showInstallationProgress"),
        F::field("blockDeviceSetupRetryByUser"),
        F::field("allowDeviceResetOnInstallFailure"),
        F::field("allowLogCollectionOnInstallFailure"),
        F::field("customErrorMessage"),
        F::field("installProgressTimeoutInMinutes"),
        F::field("allowDeviceUseOnInstallFailure"),
        F::field("selectedMobileAppIds"),
        F::field("trackInstallProgressForAutopilotOnly"),
        F::field("disableUserStatusTrackingAfterFirstUser"),
    ],
)
.with_filter(RecordFilter::TypeContains("windows10EnrollmentCompletionPageConfiguration"));

const PLATFORM_PROFILE_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("description"),
    F::type_tag("type"),
    F::timestamp("createdDateTime"),
    F::timestamp("lastModifiedDateTime"),
    F::field("version"),
];

const PLATFORM_ENROLLMENT_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("description"),
    F::type_tag("type"),
    F::field("priority"),
    F::timestamp("createdDateTime"),
    F::timestamp("lastModifiedDateTime"),
    F::field("version"),
];

pub struct PlatformSections {
    pub device_configurations: CollectionSpec,
    pub enrollment_configurations: CollectionSpec,
    pub compliance_policies: CollectionSpec,
}

impl PlatformSections {
    pub const fn for_platform(marker: &'static str) -> Self {
        Self {
            device_configurations: CollectionSpec::new(
                Beta,
                &["deviceManagement", "deviceConfigurations"],
                PLATFORM_PROFILE_FIELDS,
            )
            .with_filter(RecordFilter::TypeContains(marker)),
            enrollment_configurations: CollectionSpec::new(
                Beta,
                &["deviceManagement", "deviceEnrollmentConfigurations"],
                PLATFORM_ENROLLMENT_FIELDS,
            )
            .with_filter(RecordFilter::TypeContains(marker)),
            compliance_policies: CollectionSpec::new(
                V1,
                &["deviceManagement", "deviceCompliancePolicies"],
                PLATFORM_PROFILE_FIELDS,
            )
            .with_filter(RecordFilter::TypeContains(marker)),
        }
    }

    pub fn specs(&self) -> [CollectionSpec; 3] {
        [
            self.device_configurations,
            self.enrollment_configurations,
            self.compliance_policies,
        ]
    }
}

pub const ANDROID_SECTIONS: PlatformSections = PlatformSections::for_platform("android");
pub const IOS_SECTIONS: PlatformSections = PlatformSections::for_platform("ios");

pub const APP_PROTECTION_POLICIES: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceAppManagement", "managedAppPolicies"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::type_tag("policyType"),
        F::timestamp("createdDateTime"),
        F::timestamp("lastModifiedDateTime"),
        F::field("version"),
        F::field("isAssigned"),
        F::type_prefix("platformType", "managedapp", "unknown"),
    ],
);

pub const TUNNEL_SITES: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "microsoftTunnelSites"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::field("publicAddress"),
        F::field("upgradeWindowUtcOffsetInMinutes"),
        F::field("upgradeWindowStartTime"),
        F::field("upgradeWindowEndTime"),
        F::field("upgradeAutomatically"),
        F::field("upgradeAvailable"),
        F::field("internalNetworkProbeUrl"),
        F::field("roleScopeTagIds"),
    ],
);

/// Server fields; `siteName` and `siteId` come from the parent site.
pub const TUNNEL_SERVER_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("tunnelServerHealthStatus"),
    F::timestamp("lastCheckinDateTime"),
    F::field("agentImageDigest"),
    F::field("serverImageDigest"),
];

pub const AD_CONNECTORS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "domainJoinConnectors"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("state"),
        F::field("version"),
        F::field("machineName"),
        F::timestamp("lastConnectionDateTime"),
    ],
);

pub const CERTIFICATE_CONNECTORS: CollectionSpec = CollectionSpec::new(
    Beta,
    &["deviceManagement", "ndesConnectors"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::timestamp("lastConnectionDateTime"),
        F::field("state"),
        F::field("connectorVersion"),
        F::field("machineName"),
        F::timestamp("enrolledDateTime"),
    ],
);

pub const USERS: CollectionSpec = CollectionSpec::new(
    V1,
    &["users"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("userPrincipalName"),
        F::field("mail"),
        F::field("jobTitle"),
        F::field("accountEnabled"),
    ],
);

pub const USER_DETAIL_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("userPrincipalName"),
    F::field("mail"),
    F::field("jobTitle"),
    F::field("department"),
    F::field("officeLocation"),
    F::field("mobilePhone"),
    F::field("businessPhones"),
    F::field("accountEnabled"),
];

pub const CREATED_USER_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("userPrincipalName"),
    F::field("mailNickname"),
];

pub const GROUPS: CollectionSpec = CollectionSpec::new(
    V1,
    &["groups"],
    &[
        F::field("id"),
        F::field("displayName"),
        F::field("description"),
        F::field("mailEnabled"),
        F::field("securityEnabled"),
        F::field("mail"),
        F::field("groupTypes"),
    ],
);

pub const GROUP_MEMBER_FIELDS: &[F] = &[
    F::field("id"),
    F::field("displayName"),
    F::field("userPrincipalName"),
    F::field("mail"),
];

pub const SHAREPOINT_SITES: CollectionSpec = CollectionSpec::new(
    V1,
    &["sites"],
    &[
        F::field("id"),
        F::field("name"),
        F::field("displayName"),
        F::field("webUrl"),
        F::field("description"),
    ],
)
.with_query(&[("search", "*")]);
