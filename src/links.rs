//! # Link Resolution
//!
//! Turns catalog results into the list of granule files to download: pick the
//! requested access class from each granule, flatten in granule order, keep only
//! links ending in the array-file extension.

use crate::catalog::Granule;
use crate::input::LinkAccess;

/// CMR link type of public HTTPS download links
pub const GET_DATA: &str = "GET DATA";
/// CMR link type of in-region S3 links
pub const GET_DATA_DIRECT: &str = "GET DATA VIA DIRECT ACCESS";

impl Granule {
    /// Download links of the given access class.
    pub fn data_links(&self, access: LinkAccess) -> Vec<&str> {
        self.related_urls
            .iter()
            .filter(|link| match access {
                LinkAccess::Internal => {
                    link.kind == GET_DATA_DIRECT && link.url.starts_with("s3://")
                }
                LinkAccess::External => {
                    link.kind == GET_DATA && link.url.starts_with("http")
                }
            })
            .map(|link| link.url.as_str())
            .collect()
    }
}

/// Flattens every granule's links and keeps those ending in `extension`.
pub fn resolve_links(granules: &[Granule], access: LinkAccess, extension: &str) -> Vec<String> {
    granules
        .iter()
        .flat_map(|granule| granule.data_links(access))
        .filter(|link| link.ends_with(extension))
        .map(str::to_string)
        .collect()
}

/// Last path segment of a link, used as the local file name.
pub fn link_file_name(link: &str) -> Option<&str> {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RelatedUrl;

    fn granule(id: &str, links: &[(&str, &str)]) -> Granule {
        Granule {
            concept_id: id.to_string(),
            granule_ur: id.to_string(),
            related_urls: links
                .iter()
                .map(|(url, kind)| RelatedUrl {
                    url: url.to_string(),
                    kind: kind.to_string(),
                })
                .collect(),
        }
    }

    fn sample() -> Vec<Granule> {
        vec![
            granule(
                "G1",
                &[
                    ("https://host/data/A0000.nc", GET_DATA),
                    ("s3://bucket/data/A0000.nc", GET_DATA_DIRECT),
                    ("https://host/data/A0000.nc.xml", "EXTENDED METADATA"),
                    ("s3://bucket/data/A0000.dmrpp", GET_DATA_DIRECT),
                ],
            ),
            granule("G2", &[]),
            granule(
                "G3",
                &[
                    ("https://host/data/A0100.nc", GET_DATA),
                    ("s3://bucket/data/A0100.nc", GET_DATA_DIRECT),
                ],
            ),
        ]
    }

    #[test]
    fn test_resolve_internal_links() {
        let links = resolve_links(&sample(), LinkAccess::Internal, ".nc");
        assert_eq!(
            links,
            vec!["s3://bucket/data/A0000.nc", "s3://bucket/data/A0100.nc"]
        );
    }

    #[test]
    fn test_resolve_external_links() {
        let links = resolve_links(&sample(), LinkAccess::External, ".nc");
        assert_eq!(
            links,
            vec!["https://host/data/A0000.nc", "https://host/data/A0100.nc"]
        );
    }

    #[test]
    fn test_resolve_empty_input() {
        assert!(resolve_links(&[], LinkAccess::Internal, ".nc").is_empty());
        assert!(resolve_links(&[granule("G", &[])], LinkAccess::External, ".nc").is_empty());
    }

    #[test]
    fn test_extension_filter_is_suffix_match() {
        let granules = vec![granule(
            "G",
            &[
                ("https://host/a.nc4", GET_DATA),
                ("https://host/a.nc.md5", GET_DATA),
                ("https://host/b.nc", GET_DATA),
            ],
        )];
        assert_eq!(
            resolve_links(&granules, LinkAccess::External, ".nc"),
            vec!["https://host/b.nc"]
        );
    }

    #[test]
    fn test_link_file_name() {
        assert_eq!(link_file_name("s3://bucket/dir/file.nc"), Some("file.nc"));
        assert_eq!(link_file_name("https://host/x/file.nc?token=1"), Some("file.nc"));
        assert_eq!(link_file_name("https://host/x/"), None);
    }
}
