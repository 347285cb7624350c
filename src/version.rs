//! Build metadata, injected via environment at build time where the CI
//! pipeline provides it.

use std::fmt;

#[derive(Clone, Debug)]
pub struct Info {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_date: &'static str,
    pub rustc_version: &'static str,
    pub platform: String,
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version: {}, gitCommit: {}, buildDate: {}, rustcVersion: {}, platform: {}",
            self.version, self.git_commit, self.build_date, self.rustc_version, self.platform
        )
    }
}

pub fn get() -> Info {
    Info {
        version: env!("CARGO_PKG_VERSION"),
        git_commit: option_env!("APEXDNS_GIT_COMMIT").unwrap_or("unknown"),
        build_date: option_env!("APEXDNS_BUILD_DATE").unwrap_or("1970-01-01T00:00:00Z"),
        rustc_version: option_env!("APEXDNS_RUSTC_VERSION").unwrap_or("unknown"),
        platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
    }
}
