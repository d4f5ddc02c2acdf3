const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

pub struct BannerInfo {
    pub version: &'static str,
    pub branch: &'static str,
    pub commit: &'static str,
    pub profile: &'static str,
    pub started_at: String,
}

impl Default for BannerInfo {
    fn default() -> Self {
        let started_at = time::OffsetDateTime::now_local()
            .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_owned());

        Self {
            version: env!("CARGO_PKG_VERSION"),
            branch: option_env!("GIT_BRANCH").unwrap_or("unknown"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            profile: if cfg!(debug_assertions) { "debug" } else { "release" },
            started_at,
        }
    }
}

pub fn print_banner(info: &BannerInfo) {
    crate::log_println!();
    crate::log_println!("{GREEN}  rustaplay {RESET}{DIM}session orchestrator{RESET}");
    crate::log_println!("{DIM}========================================{RESET}");
    row("Version", info.version, CYAN);
    row("Branch", info.branch, RESET);
    row("Commit", info.commit, RESET);
    row("Profile", info.profile, YELLOW);
    row("Started", &info.started_at, RESET);
    crate::log_println!();
}

fn row(label: &str, value: &str, color: &str) {
    crate::log_println!("  {BOLD}{label:<10}{RESET}{color}{value}{RESET}");
}
