//! `.ftprules` configuration.
//!
//! A sectioned text file, one value per line under each header:
//!
//! ```text
//! [remote]
//! ftp.yourserver.com
//!
//! [user]
//! yourusername
//!
//! [password]
//! yourpassword
//!
//! [remote-folder]
//! www/remotefoldername
//!
//! [origin]
//! dist
//!
//! [ignore]
//! TEMP/
//! *.log
//! ```
//!
//! `[ignore]` takes any number of patterns; every other section takes one
//! value. `[hash]` (md5, sha256, blake3) and `[timeout]` (seconds) are
//! optional. Lines starting with `#` and blank lines are ignored.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{temp_path_for, CACHE_FILE_NAME};
use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::fs_ops;
use crate::rules::ExcludeRuleSet;

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".ftprules";

/// Template file name kept beside the executable for `--init`.
pub const TEMPLATE_FILE_NAME: &str = ".ftprules.example";

/// Host prefix that selects the local mirror transport.
pub const MIRROR_SCHEME: &str = "file://";

/// Socket timeout used when `[timeout]` is absent.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Contents written when no template exists yet.
pub const DEFAULT_TEMPLATE: &str = "[remote]
ftp.yourserver.com

[user]
yourusername

[password]
yourpassword

[remote-folder]
www/remotefoldername

[origin]
dist

[ignore]
TEMP/
";

const SINGLE_VALUE_SECTIONS: &[&str] = &[
    "remote",
    "user",
    "password",
    "remote-folder",
    "origin",
    "hash",
    "timeout",
];

/// Validated deployment settings.
#[derive(Clone)]
pub struct DeployConfig {
    /// FTP host, optionally `host:port`, or `file:///path` for a mirror
    pub host: String,
    pub user: String,
    pub password: String,
    /// Remote directory, relative to the server root; created if missing
    pub remote_folder: String,
    /// Local directory to deploy, resolved against the config file location
    pub origin_folder: PathBuf,
    /// `[ignore]` patterns, in file order
    pub exclude_patterns: Vec<String>,
    /// Fingerprint algorithm for new hashes
    pub hash: ChecksumAlgorithm,
    /// Per-operation socket timeout
    pub timeout: Duration,
    /// Where the config was read from
    pub config_path: PathBuf,
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("remote_folder", &self.remote_folder)
            .field("origin_folder", &self.origin_folder)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("hash", &self.hash)
            .field("timeout", &self.timeout)
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl DeployConfig {
    /// Read and validate a config file.
    ///
    /// # Errors
    /// `ConfigNotFound`, `ConfigRead`, `ConfigParse` or `ConfigInvalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EngineError::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                EngineError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let config = Self::parse(&text, path)?;
        info!(
            path = %path.display(),
            host = %config.host,
            origin = %config.origin_folder.display(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Parse config text as if it had been read from `path`.
    ///
    /// # Errors
    /// `ConfigParse` for structural problems, `ConfigInvalid` for bad or
    /// missing values.
    pub fn parse(text: &str, path: &Path) -> Result<Self, EngineError> {
        let parse_error = |line: usize, reason: String| EngineError::ConfigParse {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut sections = RawSections::default();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_lowercase();
                if name != "ignore" && !SINGLE_VALUE_SECTIONS.contains(&name.as_str()) {
                    return Err(parse_error(line_no, format!("unknown section [{}]", name)));
                }
                if sections.seen(&name) {
                    return Err(parse_error(line_no, format!("section [{}] appears twice", name)));
                }
                sections.open(&name);
                current = Some(name);
                continue;
            }

            let Some(section) = current.as_deref() else {
                return Err(parse_error(
                    line_no,
                    format!("'{}' is outside any section", line),
                ));
            };

            if section == "ignore" {
                sections.ignore.push(line.to_string());
            } else if !sections.set(section, line) {
                return Err(parse_error(
                    line_no,
                    format!("section [{}] takes a single value", section),
                ));
            }
        }

        Self::from_sections(sections, path)
    }

    fn from_sections(sections: RawSections, path: &Path) -> Result<Self, EngineError> {
        let invalid = |field: &str, reason: &str| EngineError::ConfigInvalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let host = sections.require("remote")?;
        let user = sections.require("user")?;
        let origin = sections.require("origin")?;
        let password = sections.value("password").unwrap_or_default();
        let remote_folder = sections
            .value("remote-folder")
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();

        let hash = match sections.value("hash") {
            Some(name) => name
                .parse::<ChecksumAlgorithm>()
                .map_err(|reason| invalid("hash", &reason))?,
            None => ChecksumAlgorithm::default(),
        };

        let timeout = match sections.value("timeout") {
            Some(secs) => match secs.parse::<u64>() {
                Ok(0) => return Err(invalid("timeout", "must be at least 1 second")),
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => return Err(invalid("timeout", "expected a whole number of seconds")),
            },
            None => DEFAULT_TIMEOUT,
        };

        let config_dir = config_dir_of(path);
        let origin_folder = config_dir.join(&origin);

        let config = DeployConfig {
            host,
            user,
            password,
            remote_folder,
            origin_folder,
            exclude_patterns: sections.ignore,
            hash,
            timeout,
            config_path: path.to_path_buf(),
        };

        // Surface bad patterns now rather than mid-run.
        config.exclude_rules()?;
        debug!(?config, "Parsed config");
        Ok(config)
    }

    /// Compile `[ignore]` into a rule set.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the pattern that failed.
    pub fn exclude_rules(&self) -> Result<ExcludeRuleSet, EngineError> {
        ExcludeRuleSet::new(&self.exclude_patterns).map_err(|reason| EngineError::ConfigInvalid {
            field: "ignore".to_string(),
            reason,
        })
    }

    /// Directory holding the config file.
    pub fn config_dir(&self) -> PathBuf {
        config_dir_of(&self.config_path)
    }

    /// Cache file location: next to the config file.
    pub fn cache_path(&self) -> PathBuf {
        self.config_dir().join(CACHE_FILE_NAME)
    }

    /// The config file, the cache and its `.tmp` sibling, as origin-relative
    /// paths, for those that sit inside the origin folder. These hold the
    /// password and the tool's own state and are never deployed.
    pub fn own_files_in_origin(&self) -> Vec<String> {
        let origin = canonical_or_raw(&self.origin_folder);
        let dir = canonical_or_raw(&self.config_dir());
        let cache = self.cache_path();
        let own = [self.config_path.clone(), temp_path_for(&cache), cache];

        own.iter()
            .filter_map(|path| path.file_name())
            .filter_map(|name| fs_ops::relative_key(&origin, &dir.join(name)))
            .collect()
    }

    /// Local directory behind a `file://` host, if that is what the host is.
    pub fn mirror_root(&self) -> Option<PathBuf> {
        self.host.strip_prefix(MIRROR_SCHEME).map(PathBuf::from)
    }

    /// `host/remote-folder`, for messages.
    pub fn destination_label(&self) -> String {
        if self.remote_folder.is_empty() {
            self.host.clone()
        } else {
            format!("{}/{}", self.host, self.remote_folder)
        }
    }
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn config_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Section values as read, before validation.
#[derive(Debug, Default)]
struct RawSections {
    values: Vec<(String, Option<String>)>,
    ignore: Vec<String>,
    ignore_seen: bool,
}

impl RawSections {
    fn seen(&self, name: &str) -> bool {
        if name == "ignore" {
            self.ignore_seen
        } else {
            self.values.iter().any(|(n, _)| n == name)
        }
    }

    fn open(&mut self, name: &str) {
        if name == "ignore" {
            self.ignore_seen = true;
        } else {
            self.values.push((name.to_string(), None));
        }
    }

    /// Store the value for `name`; false if it already has one.
    fn set(&mut self, name: &str, value: &str) -> bool {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot @ None)) => {
                *slot = Some(value.to_string());
                true
            }
            _ => false,
        }
    }

    fn value(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.clone())
    }

    fn require(&self, name: &str) -> Result<String, EngineError> {
        self.value(name).ok_or_else(|| EngineError::ConfigInvalid {
            field: name.to_string(),
            reason: "missing or empty".to_string(),
        })
    }
}

/// Create `.ftprules` in `target_dir` from the template in `template_dir`,
/// writing the default template first if there is none.
///
/// # Returns
/// Path of the new config file
///
/// # Errors
/// `ConfigExists` if `target_dir` already has a config; I/O failures as
/// `ConfigRead`.
pub fn init_config(target_dir: &Path, template_dir: &Path) -> Result<PathBuf, EngineError> {
    let target = target_dir.join(CONFIG_FILE_NAME);
    if target.exists() {
        return Err(EngineError::ConfigExists { path: target });
    }

    let template = ensure_template(template_dir)?;
    fs::copy(&template, &target).map_err(|e| EngineError::ConfigRead {
        path: template.clone(),
        source: e,
    })?;

    info!(template = %template.display(), target = %target.display(), "Created config");
    Ok(target)
}

/// Path of the template in `template_dir`, created with `DEFAULT_TEMPLATE`
/// if it does not exist.
///
/// # Errors
/// `ConfigRead` if the template cannot be written.
pub fn ensure_template(template_dir: &Path) -> Result<PathBuf, EngineError> {
    let template = template_dir.join(TEMPLATE_FILE_NAME);
    if !template.exists() {
        fs::write(&template, DEFAULT_TEMPLATE).map_err(|e| EngineError::ConfigRead {
            path: template.clone(),
            source: e,
        })?;
        info!(path = %template.display(), "Wrote default template");
    }
    Ok(template)
}
