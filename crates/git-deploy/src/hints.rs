//! Connection hints printed after provisioning.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;

/// Plain-text "what is my IP" endpoint.
pub const DEFAULT_IP_SERVICE: &str = "https://api.ipify.org";

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Everything needed to tell the user how to reach a freshly provisioned repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hints {
    pub origin: String,
    pub config_branch: String,
    pub user: String,
    pub host: String,
    pub path: PathBuf,
}

impl Hints {
    /// Repository path as shown in the remote url.
    #[must_use]
    pub fn display_path(&self) -> PathBuf {
        relative_to_home(&self.path, dirs::home_dir().as_deref())
    }

    fn remote_url(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.display_path().display())
    }

    fn clone_dir(&self) -> String {
        let base = self
            .path
            .file_name()
            .map_or_else(|| "repo".into(), |name| name.to_string_lossy());
        format!("{base}-hooks")
    }
}

impl fmt::Display for Hints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = self.remote_url();
        writeln!(f, "Add or set the remote url:")?;
        writeln!(f, "\tgit remote add {} {url}", self.origin)?;
        writeln!(f, "\tgit remote set-url {} {url}", self.origin)?;
        writeln!(f)?;
        writeln!(f, "Clone the {} branch:", self.config_branch)?;
        writeln!(
            f,
            "\tgit clone -b {} {url} {}",
            self.config_branch,
            self.clone_dir()
        )
    }
}

/// Ask `service` for this machine's public address.
///
/// # Errors
/// Returns an error if the service is unreachable or answers with a failure or an empty body.
pub fn public_ip(service: &str) -> Result<String> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent("git-deploy")
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(service)
        .send()
        .with_context(|| format!("Failed to reach {service}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("{service}: HTTP {}", status.as_u16());
    }
    let body = response
        .text()
        .with_context(|| format!("Failed to read response from {service}"))?;
    let host = body.trim();
    if host.is_empty() {
        bail!("{service} returned an empty address");
    }
    Ok(host.to_owned())
}

/// Login name used in the remote url.
#[must_use]
pub fn current_user() -> String {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| "git".to_owned())
}

fn relative_to_home(path: &Path, home: Option<&Path>) -> PathBuf {
    home.and_then(|home| path.strip_prefix(home).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .map_or_else(|| path.to_path_buf(), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_inside_home_is_shortened() {
        let home = Path::new("/home/deploy");
        assert_eq!(
            relative_to_home(Path::new("/home/deploy/sites/blog.git"), Some(home)),
            PathBuf::from("sites/blog.git")
        );
        assert_eq!(
            relative_to_home(Path::new("/srv/blog.git"), Some(home)),
            PathBuf::from("/srv/blog.git")
        );
        assert_eq!(
            relative_to_home(Path::new("/srv/blog.git"), None),
            PathBuf::from("/srv/blog.git")
        );
    }

    #[test]
    fn hints_name_remote_and_clone_directory() {
        let hints = Hints {
            origin: "dev".to_owned(),
            config_branch: "hooks".to_owned(),
            user: "deploy".to_owned(),
            host: "203.0.113.7".to_owned(),
            path: PathBuf::from("/srv/git/blog.git"),
        };

        let text = hints.to_string();

        assert!(text.contains("\tgit remote add dev deploy@203.0.113.7:/srv/git/blog.git\n"));
        assert!(text.contains("\tgit remote set-url dev deploy@203.0.113.7:/srv/git/blog.git\n"));
        assert!(text.contains("Clone the hooks branch:\n"));
        assert!(text.ends_with(
            "\tgit clone -b hooks deploy@203.0.113.7:/srv/git/blog.git blog.git-hooks\n"
        ));
    }
}
