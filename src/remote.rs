//! Dump exchange with S3.
//!
//! The rest of the program is synchronous, so the SDK lives behind a
//! blocking facade that owns its own tokio runtime. Downloads land in a
//! tempfile and are renamed into place only once the transfer completed,
//! so the backups directory never holds a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Runtime;

use crate::config::RemoteSettings;
use crate::error::{BurrowError, Result};

/// One dump file in the bucket.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteObject {
    /// Final path segment of the key, used as the local filename.
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Key under which a project's dump is stored: `<prefix><project>/<file>`.
pub fn remote_key(prefix: &str, project: &str, filename: &str) -> String {
    format!("{prefix}{project}/{filename}")
}

fn sort_newest_first(objects: &mut [RemoteObject]) {
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}

pub struct RemoteStore {
    rt: Runtime,
    client: Client,
    bucket: String,
    prefix: String,
}

impl RemoteStore {
    /// Builds a client for the configured bucket. Static credentials from
    /// the config win; otherwise the ambient AWS chain is consulted.
    pub fn connect(remote: &RemoteSettings) -> Result<Self> {
        let rt = Runtime::new()?;
        let client = rt.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(remote.region.clone()));
            if let (Some(key), Some(secret)) =
                (&remote.access_key_id, &remote.secret_access_key)
            {
                tracing::debug!("using static credentials from the config file");
                loader = loader.credentials_provider(Credentials::new(
                    key.clone(),
                    secret.clone(),
                    None,
                    None,
                    "burrow-config",
                ));
            } else {
                tracing::debug!("using the shared AWS credential chain");
            }
            Client::new(&loader.load().await)
        });
        Ok(Self {
            rt,
            client,
            bucket: remote.bucket.clone(),
            prefix: remote.prefix.clone(),
        })
    }

    /// Dump files under the configured prefix, newest first.
    pub fn list(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        self.rt.block_on(async {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| {
                    BurrowError::Remote(format!(
                        "could not list bucket '{}': {}",
                        self.bucket,
                        DisplayErrorContext(e)
                    ))
                })?;
                for object in page.contents() {
                    let key = object.key().unwrap_or_default().to_string();
                    if key.is_empty() || key.ends_with('/') {
                        continue;
                    }
                    objects.push(RemoteObject {
                        key,
                        size: object.size().unwrap_or(0),
                        last_modified: object.last_modified().and_then(|t| {
                            DateTime::from_timestamp(t.secs(), t.subsec_nanos())
                        }),
                    });
                }
            }
            Ok::<(), BurrowError>(())
        })?;
        sort_newest_first(&mut objects);
        Ok(objects)
    }

    /// Streams the object into `dest_dir` with a byte progress bar. The
    /// file appears under its final name only after the whole body landed.
    pub fn download(&self, object: &RemoteObject, dest_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(dest_dir)?;

        let bar = byte_bar(object.size.max(0) as u64);
        self.rt.block_on(async {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&object.key)
                .send()
                .await
                .map_err(|e| {
                    BurrowError::Remote(format!(
                        "could not download '{}': {}",
                        object.key,
                        DisplayErrorContext(e)
                    ))
                })?;
            let mut body = resp.body;
            while let Some(chunk) = body.try_next().await.map_err(|e| {
                BurrowError::Remote(format!("transfer of '{}' broke off: {e}", object.key))
            })? {
                temp.write_all(&chunk)?;
                bar.inc(chunk.len() as u64);
            }
            Ok::<(), BurrowError>(())
        })?;
        bar.finish();

        let target = dest_dir.join(object.filename());
        let persisted = temp
            .persist(&target)
            .map_err(|e| BurrowError::Io(e.error))?;
        persisted.sync_all()?;
        Ok(target)
    }

    /// Uploads a local dump under the project scope.
    pub fn upload(&self, path: &Path, project: &str) -> Result<String> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BurrowError::Remote(format!("'{}' has no filename", path.display()))
            })?;
        let key = remote_key(&self.prefix, project, &filename);

        self.rt.block_on(async {
            let body = ByteStream::from_path(path).await.map_err(|e| {
                BurrowError::Remote(format!("could not read '{}': {e}", path.display()))
            })?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    BurrowError::Remote(format!(
                        "could not upload '{key}': {}",
                        DisplayErrorContext(e)
                    ))
                })?;
            Ok::<(), BurrowError>(())
        })?;
        Ok(key)
    }
}

fn byte_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap()
            .progress_chars("█▓░"),
    );
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn object(key: &str, minutes_ago: i64) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            size: 1024,
            last_modified: Some(
                Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                    - chrono::Duration::minutes(minutes_ago),
            ),
        }
    }

    #[test]
    fn listing_sorts_newest_first_with_unknown_dates_last() {
        let mut objects = vec![
            object("dumps/proj/old.dump", 300),
            RemoteObject {
                key: "dumps/proj/undated.dump".into(),
                size: 0,
                last_modified: None,
            },
            object("dumps/proj/new.dump", 1),
            object("dumps/proj/middle.dump", 50),
        ];
        sort_newest_first(&mut objects);
        let keys: Vec<_> = objects.iter().map(|o| o.filename()).collect();
        assert_eq!(keys, ["new.dump", "middle.dump", "old.dump", "undated.dump"]);
    }

    #[test]
    fn filenames_drop_the_key_prefix() {
        assert_eq!(object("dumps/proj/a.dump", 0).filename(), "a.dump");
        assert_eq!(object("flat.dump", 0).filename(), "flat.dump");
    }

    #[test]
    fn keys_are_scoped_by_prefix_and_project() {
        assert_eq!(
            remote_key("dumps/", "testproject", "db_20240601.dump"),
            "dumps/testproject/db_20240601.dump"
        );
        assert_eq!(remote_key("", "p", "f.dump"), "p/f.dump");
    }
}
