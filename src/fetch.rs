use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use url::Url;

use crate::config::GITHUB_RAW_BASE;
use crate::error::FetchError;
use crate::github::{GitHubClient, SearchResultItem};

/// Write buffer size used while streaming a download to disk.
pub const CHUNK_SIZE: usize = 32 * 1024;

const PARTIAL_SUFFIX: &str = ".part";

/// `https://github.com/u/r/blob/main/f.txt` ->
/// `https://raw.githubusercontent.com/u/r/main/f.txt`.
pub fn html_to_raw(html_url: &str) -> Option<String> {
    rewrite_blob_url(html_url, GITHUB_RAW_BASE)
}

/// Drop the `/blob/` segment of a browsing URL and re-root the remaining
/// `owner/repo/ref/path` under `raw_base`. `None` if the URL has no
/// `owner/repo/blob/` prefix.
pub fn rewrite_blob_url(html_url: &str, raw_base: &str) -> Option<String> {
    let url = Url::parse(html_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < 5 || segments[2] != "blob" {
        return None;
    }

    let mut rest = vec![segments[0], segments[1]];
    rest.extend_from_slice(&segments[3..]);
    Some(format!("{}/{}", raw_base.trim_end_matches('/'), rest.join("/")))
}

/// Local destination for an item: `<output>/github.com/<owner>/<repo>/<path>`.
///
/// Only normal path components are kept, so a hostile path cannot climb out
/// of the output directory.
pub fn local_path(output_dir: &Path, item: &SearchResultItem) -> PathBuf {
    let mut path = output_dir.join("github.com");
    for part in [&item.repository_full_name, &item.file_path] {
        for component in Path::new(part).components() {
            if let Component::Normal(name) = component {
                path.push(name);
            }
        }
    }
    path
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Streams remote files to disk.
///
/// The body goes to `<destination>.part` and is renamed onto `destination`
/// only after the last byte is written, so a file at the destination is
/// always complete. Every failure removes the partial file.
#[derive(Clone)]
pub struct FileFetcher {
    client: GitHubClient,
}

impl FileFetcher {
    pub fn new(client: GitHubClient) -> Self {
        FileFetcher { client }
    }

    pub async fn fetch(&self, raw_url: &str, destination: &Path) -> Result<(), FetchError> {
        let response = self
            .client
            .get_raw(raw_url)
            .await
            .map_err(|e| FetchError::from_reqwest(raw_url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: raw_url.to_string(),
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let partial = partial_path(destination);
        let result = stream_to(response, raw_url, &partial).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        if let Err(source) = fs::rename(&partial, destination).await {
            let _ = fs::remove_file(&partial).await;
            return Err(FetchError::Io {
                path: destination.to_path_buf(),
                source,
            });
        }

        debug!("Saved {} to {}", raw_url, destination.display());
        Ok(())
    }
}

async fn stream_to(
    mut response: reqwest::Response,
    url: &str,
    partial: &Path,
) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        path: partial.to_path_buf(),
        source,
    };

    let file = File::create(partial).await.map_err(io_err)?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?
    {
        writer.write_all(&chunk).await.map_err(io_err)?;
    }

    writer.flush().await.map_err(io_err)?;
    writer.into_inner().sync_all().await.map_err(io_err)?;
    Ok(())
}
