//! Immutable per-run snapshot of provider sizes, regions, and images.
//!
//! The catalog is fetched once per process invocation and never refreshed;
//! a new process fetches a new catalog. Disk figures arrive from the provider
//! in gigabytes and are normalised to megabytes here so the solver and all
//! constraint math operate in one unit.

use std::sync::Arc;

use crate::provider::{ImageRecord, ProviderError, ProviderGateway, RegionRecord, SizeRecord};

const MB_PER_GB: u64 = 1024;

/// Region used when no `region` constraint is given. Chosen for general
/// availability of sizes and images.
pub const DEFAULT_REGION: &str = "nyc3";

/// OS release series the `--series` flag accepts, mapped to the dashed
/// release number used in image slugs.
pub const SERIES_MAP: [(&str, &str); 2] = [("jammy", "22-04"), ("noble", "24-04")];

/// A machine size with all figures normalised for constraint math.
#[derive(Clone, Debug, PartialEq)]
pub struct SizeSpec {
    /// Size identifier used in create requests.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Number of virtual CPUs.
    pub cpus: u64,
    /// Root disk in megabytes.
    pub disk_mb: u64,
    /// Monthly transfer allowance in whole terabytes.
    pub transfer: u64,
    /// Monthly price.
    pub price_monthly: f64,
}

/// Read-only snapshot of what the provider offers.
///
/// Safe to share across workers without locking; nothing mutates it after
/// construction.
#[derive(Clone, Debug, Default)]
pub struct SizeCatalog {
    sizes: Vec<SizeSpec>,
    regions: Vec<RegionRecord>,
    images: Vec<ImageRecord>,
}

impl SizeCatalog {
    /// Fetches the catalog from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when any listing call fails.
    pub async fn fetch<P: ProviderGateway>(provider: &P) -> Result<Self, ProviderError> {
        let sizes = provider.list_sizes().await?;
        let regions = provider.list_regions().await?;
        let images = provider.list_images().await?;
        Ok(Self::from_parts(sizes, regions, images))
    }

    /// Builds a catalog from already-fetched records. Disk figures are
    /// normalised and sizes sorted ascending by price here.
    #[must_use]
    pub fn from_parts(
        sizes: Vec<SizeRecord>,
        regions: Vec<RegionRecord>,
        images: Vec<ImageRecord>,
    ) -> Self {
        let mut specs: Vec<SizeSpec> = sizes
            .into_iter()
            .map(|size| SizeSpec {
                id: size.id,
                name: size.name,
                memory_mb: size.memory_mb,
                cpus: size.cpus,
                disk_mb: size.disk_gb * MB_PER_GB,
                transfer: size.transfer,
                price_monthly: size.price_monthly,
            })
            .collect();
        // Stable sort: provider listing order breaks price ties.
        specs.sort_by(|a, b| a.price_monthly.total_cmp(&b.price_monthly));
        Self {
            sizes: specs,
            regions,
            images,
        }
    }

    /// Returns sizes sorted ascending by monthly price.
    #[must_use]
    pub fn sizes(&self) -> &[SizeSpec] {
        &self.sizes
    }

    /// Returns the regions as listed by the provider.
    #[must_use]
    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    /// Resolves a user-supplied region name against each region's human name
    /// first, then its slug and aliases. Matching is case-sensitive and the
    /// first match wins.
    #[must_use]
    pub fn resolve_region(&self, name: &str) -> Option<&RegionRecord> {
        self.regions
            .iter()
            .find(|region| region.name == name)
            .or_else(|| {
                self.regions.iter().find(|region| {
                    region.slug == name || region.aliases.iter().any(|alias| alias == name)
                })
            })
    }

    /// Resolves an OS release series (for example `noble` or `24.04`) to the
    /// identifier of the matching public distribution image.
    #[must_use]
    pub fn image_for_series(&self, series: &str) -> Option<&str> {
        let dashed = SERIES_MAP.iter().find_map(|(name, release)| {
            (*name == series || release.replace('-', ".") == series).then_some(*release)
        })?;
        let wanted_slug = format!("ubuntu-{dashed}-x64");
        self.images
            .iter()
            .find(|image| {
                image.public
                    && image.distribution == "Ubuntu"
                    && image.slug.as_deref() == Some(wanted_slug.as_str())
            })
            .map(|image| image.id.as_str())
    }

    /// Wraps the catalog for sharing across runner workers.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SizeRecord;

    fn size(id: &str, memory_mb: u64, disk_gb: u64, price: f64) -> SizeRecord {
        SizeRecord {
            id: id.to_owned(),
            name: id.to_owned(),
            memory_mb,
            cpus: 1,
            disk_gb,
            transfer: 1,
            price_monthly: price,
        }
    }

    fn region(slug: &str, name: &str, aliases: &[&str]) -> RegionRecord {
        RegionRecord {
            id: slug.to_owned(),
            name: name.to_owned(),
            slug: slug.to_owned(),
            aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
        }
    }

    #[test]
    fn disk_is_normalised_to_megabytes() {
        let catalog =
            SizeCatalog::from_parts(vec![size("1gb", 1024, 30, 10.0)], Vec::new(), Vec::new());
        let first = catalog
            .sizes()
            .first()
            .unwrap_or_else(|| panic!("catalog lost its only size"));
        assert_eq!(first.disk_mb, 30 * 1024);
    }

    #[test]
    fn sizes_are_sorted_ascending_by_price() {
        let catalog = SizeCatalog::from_parts(
            vec![
                size("8gb", 8192, 80, 80.0),
                size("512mb", 512, 20, 5.0),
                size("2gb", 2048, 40, 20.0),
            ],
            Vec::new(),
            Vec::new(),
        );
        let ids: Vec<&str> = catalog.sizes().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["512mb", "2gb", "8gb"]);
    }

    #[test]
    fn region_resolution_prefers_human_name() {
        let catalog = SizeCatalog::from_parts(
            Vec::new(),
            vec![
                region("nyc1", "New York 1", &["nyc"]),
                region("lon1", "London 1", &["lon", "london"]),
            ],
            Vec::new(),
        );

        let by_name = catalog.resolve_region("London 1");
        assert_eq!(by_name.map(|r| r.slug.as_str()), Some("lon1"));

        let by_alias = catalog.resolve_region("nyc");
        assert_eq!(by_alias.map(|r| r.slug.as_str()), Some("nyc1"));

        assert!(catalog.resolve_region("london 1").is_none(), "case-sensitive");
    }

    #[test]
    fn image_lookup_accepts_series_name_and_release_number() {
        let image = ImageRecord {
            id: "991".to_owned(),
            name: "Ubuntu 24.04 x64".to_owned(),
            slug: Some("ubuntu-24-04-x64".to_owned()),
            distribution: "Ubuntu".to_owned(),
            public: true,
        };
        let catalog = SizeCatalog::from_parts(Vec::new(), Vec::new(), vec![image]);

        assert_eq!(catalog.image_for_series("noble"), Some("991"));
        assert_eq!(catalog.image_for_series("24.04"), Some("991"));
        assert_eq!(catalog.image_for_series("trusty"), None);
    }
}
