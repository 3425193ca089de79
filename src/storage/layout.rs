use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::{IngestError, IngestResult};

pub const IMAGES_SEGMENT: &str = "images";
pub const CANONICAL_EXTENSION: &str = "webp";

/// Longest DNS name; tenants are domains so anything longer is rejected.
const MAX_TENANT_LEN: usize = 253;

/// A tenant identifier that is safe to use as a single path segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant(String);

impl Tenant {
    pub fn parse(raw: &str) -> IngestResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IngestError::MissingDomain);
        }
        let tenant = trimmed.to_ascii_lowercase();
        if !is_safe_segment(&tenant) || tenant.len() > MAX_TENANT_LEN {
            return Err(IngestError::InvalidDomain(trimmed.to_string()));
        }
        Ok(Self(tenant))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|ch| {
                ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '-' | '_')
            })
}

/// `<root>/<tenant>/images/<category>`, the directory a tenant's images of one category live in.
#[derive(Clone, Debug)]
pub struct TenantDirectory {
    pub tenant: Tenant,
    pub category: String,
    pub path: PathBuf,
}

impl TenantDirectory {
    pub fn file_name(slug: &str) -> String {
        format!("{slug}.{CANONICAL_EXTENSION}")
    }

    pub fn final_path(&self, slug: &str) -> PathBuf {
        self.path.join(Self::file_name(slug))
    }
}

#[derive(Clone, Debug)]
pub struct MediaLayout {
    root: PathBuf,
    public_base: Url,
}

impl MediaLayout {
    pub fn new(root: PathBuf, public_base: Url) -> Self {
        Self { root, public_base }
    }

    pub fn tenant_directory(
        &self,
        tenant: &Tenant,
        category: &str,
    ) -> IngestResult<TenantDirectory> {
        if !is_safe_segment(category) {
            return Err(IngestError::InvalidDomain(format!("{tenant}/{category}")));
        }
        let path = self
            .root
            .join(tenant.as_str())
            .join(IMAGES_SEGMENT)
            .join(category);
        if !self.contains(&path) {
            return Err(IngestError::InvalidDomain(tenant.to_string()));
        }
        Ok(TenantDirectory {
            tenant: tenant.clone(),
            category: category.to_string(),
            path,
        })
    }

    /// Public URL of a converted image: `<base>/<tenant>/images/<category>/<slug>.webp`.
    pub fn public_url(&self, directory: &TenantDirectory, slug: &str) -> String {
        let mut url = self.public_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                directory.tenant.as_str(),
                IMAGES_SEGMENT,
                directory.category.as_str(),
                TenantDirectory::file_name(slug).as_str(),
            ]);
        }
        url.to_string()
    }

    fn contains(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        relative.components().all(|component| matches!(component, Component::Normal(_)))
            && relative.components().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MediaLayout {
        MediaLayout::new(
            PathBuf::from("/srv/media-static"),
            Url::parse("https://media-static.creceidea.pe").unwrap(),
        )
    }

    #[test]
    fn tenant_is_trimmed_and_lowercased() {
        let tenant = Tenant::parse("  Example.COM ").unwrap();
        assert_eq!(tenant.as_str(), "example.com");
    }

    #[test]
    fn empty_tenant_is_missing() {
        assert!(matches!(Tenant::parse("   "), Err(IngestError::MissingDomain)));
    }

    #[test]
    fn traversal_tenants_are_rejected() {
        for raw in ["..", "../etc", "a/b", "a\\b", ".hidden", "shop.pe:8080", "ex ample"] {
            assert!(
                matches!(Tenant::parse(raw), Err(IngestError::InvalidDomain(_))),
                "accepted {raw:?}"
            );
        }
        let long = "a".repeat(MAX_TENANT_LEN + 1);
        assert!(Tenant::parse(&long).is_err());
    }

    #[test]
    fn resolves_directory_under_root() {
        let tenant = Tenant::parse("example.com").unwrap();
        let directory = layout().tenant_directory(&tenant, "banner").unwrap();
        assert_eq!(
            directory.path,
            PathBuf::from("/srv/media-static/example.com/images/banner")
        );
        assert_eq!(
            directory.final_path("cafe-logo"),
            PathBuf::from("/srv/media-static/example.com/images/banner/cafe-logo.webp")
        );
    }

    #[test]
    fn rejects_unsafe_category() {
        let tenant = Tenant::parse("example.com").unwrap();
        assert!(layout().tenant_directory(&tenant, "../banner").is_err());
        assert!(layout().tenant_directory(&tenant, "").is_err());
    }

    #[test]
    fn builds_public_url() {
        let tenant = Tenant::parse("example.com").unwrap();
        let layout = layout();
        let directory = layout.tenant_directory(&tenant, "banner").unwrap();
        assert_eq!(
            layout.public_url(&directory, "cafe-logo"),
            "https://media-static.creceidea.pe/example.com/images/banner/cafe-logo.webp"
        );
    }

    #[test]
    fn public_url_keeps_base_path() {
        let layout = MediaLayout::new(
            PathBuf::from("/srv/media"),
            Url::parse("http://localhost:3000/media/").unwrap(),
        );
        let tenant = Tenant::parse("shop.pe").unwrap();
        let directory = layout.tenant_directory(&tenant, "products").unwrap();
        assert_eq!(
            layout.public_url(&directory, "shoe"),
            "http://localhost:3000/media/shop.pe/images/products/shoe.webp"
        );
    }
}
