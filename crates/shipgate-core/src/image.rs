//! Image reference helpers.

/// Registry used when a reference names no host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// A parsed image reference such as `ghcr.io/acme/export:1.2` or
/// `nvcr.io/nvidia/tritonserver@sha256:...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRef<'a> {
    /// Everything before the tag or digest, including the registry host.
    pub repository: &'a str,
    pub tag: Option<&'a str>,
    pub digest: Option<&'a str>,
}

impl<'a> ImageRef<'a> {
    pub fn parse(reference: &'a str) -> Self {
        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (reference, None),
        };

        // A colon only starts a tag when it follows the last path separator;
        // otherwise it is a registry port.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        Self {
            repository,
            tag,
            digest,
        }
    }

    /// Tag to use when talking to the registry. Untagged references mean `latest`.
    pub fn tag_or_latest(&self) -> &'a str {
        self.tag.unwrap_or("latest")
    }

    /// Registry host that serves this image.
    pub fn registry(&self) -> &'a str {
        match self.repository.split_once('/') {
            Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                host
            }
            _ => DEFAULT_REGISTRY,
        }
    }
}

/// Prepend a repository prefix (e.g., `ghcr.io/acme`) to a destination tag.
pub fn with_prefix(prefix: Option<&str>, tag: &str) -> String {
    match prefix.map(|p| p.trim_end_matches('/')) {
        Some(p) if !p.is_empty() => format!("{}/{}", p, tag.trim_start_matches('/')),
        _ => tag.to_string(),
    }
}
