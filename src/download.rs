use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::ApiRecord;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Materializes an API's source archive as a private local copy that the
/// ingestion pipeline may delete when it is done.
#[derive(Debug, Clone)]
pub struct Fetcher {
    download_dir: PathBuf,
}

impl Fetcher {
    pub fn new(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn fetch(&self, api: &ApiRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.download_dir)?;
        let target = self
            .download_dir
            .join(format!("{}-{}.jar", sanitize(&api.name), Uuid::new_v4()));
        let url = api.download_url.trim();

        match ArchiveLocation::parse(url)? {
            ArchiveLocation::Remote(remote) => download(remote, &target)?,
            ArchiveLocation::Local(source) => {
                std::fs::copy(&source, &target).map_err(|e| Error::archive(&source, e))?;
            }
        }

        tracing::info!(api = %api.name, url, path = %target.display(), "fetched archive");
        Ok(target)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ArchiveLocation {
    Remote(Url),
    Local(PathBuf),
}

impl ArchiveLocation {
    /// `http(s)` URLs are downloaded and `file` URLs (`file:/a.jar`,
    /// `file:///a.jar`, percent-encoded or not) name local files. Anything
    /// else that does not parse as a URL, such as `/tmp/a.jar` or
    /// `C:\a.jar`, is taken as a path.
    fn parse(raw: &str) -> Result<Self> {
        let Ok(url) = Url::parse(raw) else {
            return Ok(Self::Local(PathBuf::from(raw)));
        };
        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(url)),
            "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|()| Error::archive(raw, "not a local file URL")),
            // a drive letter reads as a one-letter scheme
            scheme if scheme.len() == 1 => Ok(Self::Local(PathBuf::from(raw))),
            scheme => Err(Error::Download {
                url: raw.to_string(),
                source: format!("unsupported scheme {scheme}").into(),
            }),
        }
    }
}

fn download(url: Url, target: &Path) -> Result<()> {
    let wrap = |e: reqwest::Error| Error::Download {
        url: url.to_string(),
        source: Box::new(e),
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(wrap)?;
    let mut response = client
        .get(url.clone())
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(wrap)?;

    let mut file = File::create(target)?;
    if let Err(e) = response.copy_to(&mut file) {
        let _ = std::fs::remove_file(target);
        return Err(wrap(e));
    }
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
