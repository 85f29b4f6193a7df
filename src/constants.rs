pub mod graph {
    pub const BASE_URL: &str = "https://graph.microsoft.com";
    pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
    pub const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
    pub const NEXT_LINK_FIELD: &str = "@odata.nextLink";
    pub const TYPE_FIELD: &str = "@odata.type";
    pub const ID_FIELD: &str = "id";
    pub const TYPE_NAMESPACE: &str = "#microsoft.graph.";
}

pub mod network {
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_IDENTITY_REQUEST_MS: u64 = 20_000;
    pub const TIMEOUT_CLI_TOKEN_MS: u64 = 30_000;
    pub const TIMEOUT_TOOL_CALL_MS: u64 = 300_000;
    pub const MAX_TIMEOUT_MS: u64 = 86_400_000;
    pub const USER_AGENT: &str = concat!("m365-mgmt/", env!("CARGO_PKG_VERSION"));
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 4;
    pub const ATTEMPTS_LIMIT: u64 = 10;
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const FACTOR: f64 = 2.0;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const MAX_RETRY_AFTER_MS: u64 = 120_000;
    pub const JITTER: f64 = 0.2;
}

pub mod pagination {
    pub const MAX_PAGES: usize = 1_000;
}

pub mod fanout {
    pub const MAX_CONCURRENT_CHILD_FETCHES: usize = 4;
}

pub mod token {
    pub const EXPIRY_SKEW_SECS: i64 = 120;
    pub const MAX_EXPIRY_SKEW_SECS: u64 = 86_400;
    pub const DEFAULT_LIFETIME_SECS: i64 = 3_600;
}

pub mod device_code {
    /// Public client registered for first-party command line tools.
    pub const PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";
    pub const DEFAULT_TENANT: &str = "organizations";
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
    pub const SLOW_DOWN_STEP_SECS: u64 = 5;
    pub const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
}

pub mod managed_identity {
    pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
    pub const IMDS_API_VERSION: &str = "2018-02-01";
    pub const APP_SERVICE_API_VERSION: &str = "2019-08-01";
}

pub mod limits {
    pub const LOG_BODY_PREVIEW_BYTES: usize = 512;
    pub const ERROR_BODY_MAX_BYTES: usize = 64 * 1024;
}
