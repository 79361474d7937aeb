//! Values observed on the wire from iflow-cli 0.5.13.

pub const IFLOW_CLI_VERSION: &str = "0.5.13";
pub const IFLOW_CLI_USER_AGENT: &str = "iFlow-Cli";
pub const NODE_USER_AGENT: &str = "node";
pub const NODE_VERSION: &str = "v22.22.0";

pub const MMSTAT_GM_BASE: &str = "https://gm.mmstat.com";
pub const RUN_STARTED_PATH: &str = "//aitrack.lifecycle.run_started";
pub const RUN_ERROR_PATH: &str = "//aitrack.lifecycle.run_error";
pub const MMSTAT_VGIF_URL: &str = "https://log.mmstat.com/v.gif";

pub const OAUTH_CLIENT_ID: &str = "10009311001";
pub const OAUTH_CLIENT_SECRET: &str = "4Z3YjXycVsQvyGF1etiNlIBB4RsqSDtW";
pub const OAUTH_AUTHORIZE_URL: &str = "https://iflow.cn/oauth";
pub const OAUTH_TOKEN_URL: &str = "https://iflow.cn/oauth/token";
pub const OAUTH_USER_INFO_URL: &str = "https://iflow.cn/api/oauth/getUserInfo";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:11451/oauth2callback";

/// Base URLs on this host get the Aone client headers.
pub const AONE_HOST_MARKER: &str = "ducky.code.alibaba-inc.com";

pub const ACCEPT_ENCODING: &str = "br, gzip, deflate";
