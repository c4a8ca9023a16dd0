// Build constants for the agent package, taken from compile-time
// environment variables with sensible defaults.

/// Agent package metadata.
#[derive(Debug, Clone)]
pub struct AgentPackage;

impl AgentPackage {
    /// The semantic version of the agent.
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// The package / distribution name.
    /// Set via the `RNDFLOW_PACKAGE_NAME` env var at compile time, or "rndflow".
    pub const PACKAGE_NAME: &'static str = match option_env!("RNDFLOW_PACKAGE_NAME") {
        Some(n) => n,
        None => "rndflow",
    };

    /// The commit hash from which this binary was built.
    pub const COMMIT_HASH: &'static str = match option_env!("RNDFLOW_COMMIT_HASH") {
        Some(h) => h,
        None => "N/A",
    };

    /// User-Agent header value sent with every request.
    pub fn user_agent() -> String {
        format!("{}-job-agent/{}", Self::PACKAGE_NAME, Self::VERSION)
    }
}
