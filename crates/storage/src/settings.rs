//! Construction settings for each backend.
//!
//! These deserialize straight out of the `[drivers.<name>]` tables of the
//! configuration file; the table key becomes the backend's name.

use imgstore_image::Dimensions;
use serde::Deserialize;
use std::path::PathBuf;

fn default_ftp_port() -> u16 {
    21
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// Local disk: originals under `data_dir`, derivatives under `cache_dir`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FilesystemSettings {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// URL prefix that serves `cache_dir`.
    pub public_url: String,
    #[serde(default)]
    pub previews: Vec<Dimensions>,
}

/// One FTP login.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FtpEndpoint {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for FtpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the FTP backend decides whether a file is already stored.
///
/// FTP has no portable "exists" command, so this is configurable.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExistenceProbe {
    /// `SIZE` on the read session; anything above zero bytes exists.
    #[default]
    Size,
    /// `HEAD` against the public URL; requires `public_url`.
    Http,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FtpSettings {
    pub write: FtpEndpoint,
    /// Defaults to the write login.
    #[serde(default)]
    pub read: Option<FtpEndpoint>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub existence: ExistenceProbe,
    #[serde(default)]
    pub previews: Vec<Dimensions>,
}

impl FtpSettings {
    pub fn read_endpoint(&self) -> &FtpEndpoint {
        self.read.as_ref().unwrap_or(&self.write)
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
    /// Key prefix acting as a virtual directory.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Overrides the URL derived from `endpoint`/`bucket`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Where positive existence markers are kept between runs.
    pub known_cache_dir: PathBuf,
    #[serde(default = "default_true")]
    pub public_read: bool,
    #[serde(default)]
    pub previews: Vec<Dimensions>,
}

impl std::fmt::Debug for ObjectStorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorageSettings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .field("prefix", &self.prefix)
            .field("public_url", &self.public_url)
            .field("known_cache_dir", &self.known_cache_dir)
            .field("public_read", &self.public_read)
            .field("previews", &self.previews)
            .finish()
    }
}
