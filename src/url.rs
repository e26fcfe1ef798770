/*!
 * Parsing of arguments naming either a local path or a location in a cloud bucket
 *
 * Accepted forms are `file://<path>`, a plain path, `s3://<bucket>/<path>`, `gs://<bucket>/<path>` and
 * `az://<container>/<path>`. A trailing separator on the argument is preserved, since it distinguishes "the contents of
 * this directory" from "this directory".
 */

use crate::error::{Error, Result};
use crate::model::Provider;
use std::fmt;
use std::path::{PathBuf, MAIN_SEPARATOR};

const SUPPORTED_SCHEMES: [&str; 4] = ["file://", "s3://", "az://", "gs://"];

/// A parsed local or cloud location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudOrFileUrl {
    pub provider: Provider,

    /// Empty for local paths
    pub bucket: String,

    /// Absolute path for local locations, key or key prefix for cloud locations
    pub path: String,
}

impl CloudOrFileUrl {
    /// Parse a command line style location
    pub fn parse(argument: &str) -> Result<Self> {
        let scheme = argument
            .find("://")
            .filter(|&idx| idx > 0)
            .map(|idx| &argument[..idx + 3]);

        match scheme {
            None | Some("file://") => Self::parse_file(argument),
            Some(scheme) => Self::parse_cloud(argument, scheme),
        }
    }

    fn parse_file(argument: &str) -> Result<Self> {
        let raw = argument.strip_prefix("file://").unwrap_or(argument);
        let absolute = std::path::absolute(raw)?;

        let separator = MAIN_SEPARATOR.to_string();
        let path = respect_trailing_separator(argument, &absolute.to_string_lossy(), &separator);

        Ok(Self {
            provider: Provider::None,
            bucket: String::new(),
            path,
        })
    }

    fn parse_cloud(argument: &str, scheme: &str) -> Result<Self> {
        let provider = match scheme {
            "s3://" => Provider::Aws,
            "gs://" => Provider::Gcp,
            "az://" => Provider::Azure,
            _ => {
                return Err(Error::InvalidCloudPath(format!(
                    "cloud prefix provided for an unsupported cloud provider, expected [{}]",
                    SUPPORTED_SCHEMES.join(", ")
                )))
            }
        };

        let rest = &argument[scheme.len()..];
        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));

        if bucket.is_empty() {
            let medium = match provider {
                Provider::Azure => "CONTAINER",
                _ => "BUCKET",
            };

            return Err(Error::InvalidCloudPath(format!(
                "invalid use of the '{scheme}' prefix expected the format '{scheme}${{{medium}_NAME}}/${{PATH}}' \
                 where '{scheme}${{{medium}_NAME}}' is also valid"
            )));
        }

        // The root of a bucket never carries a separator, keys must not start with one
        let path = match clean(path) {
            cleaned if cleaned.is_empty() => cleaned,
            cleaned => respect_trailing_separator(argument, &cleaned, "/"),
        };

        Ok(Self {
            provider,
            bucket: bucket.to_string(),
            path,
        })
    }

    /// Append path segments, normalizing the result
    pub fn join<S: AsRef<str>>(&self, segments: &[S]) -> Self {
        let mut path = self.path.clone();
        for segment in segments {
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(segment.as_ref());
        }

        Self {
            provider: self.provider,
            bucket: self.bucket.clone(),
            path: clean(&path),
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.provider != Provider::None
    }

    /// Whether the location names the contents of a directory rather than the directory itself
    pub fn is_dir_contents(&self) -> bool {
        let separator = match self.provider {
            Provider::None => MAIN_SEPARATOR,
            _ => '/',
        };

        self.path.ends_with(separator)
    }

    /// The location as a local path
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl fmt::Display for CloudOrFileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Provider::None => write!(f, "file://{}", self.path),
            provider => write!(f, "{}{}/{}", provider.scheme(), self.bucket, self.path),
        }
    }
}

fn respect_trailing_separator(original: &str, current: &str, separator: &str) -> String {
    match (original.ends_with(separator), current.ends_with(separator)) {
        (true, false) => format!("{}{}", current, separator),
        (false, true) => current.trim_end_matches(separator).to_string(),
        _ => current.to_string(),
    }
}

/// Collapse empty, `.` and `..` segments of a `/` separated path
fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push(segment);
                }
            }
            _ => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else {
        joined
    }
}
