// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use stone::{StonePayloadMeta, StonePayloadMetaKind, StonePayloadMetaTag};
use thiserror::Error;

use crate::dependency::{self, Dependency, Provider};

/// Index-header metadata for a [`super::Package`], carried by the archive's
/// meta payload and mirrored in the FDB record's capital-letter fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub name: String,
    pub version_identifier: String,
    /// Package release as set by the build recipe.
    pub source_release: u64,
    /// Build machinery specific build release.
    pub build_release: u64,
    pub architecture: String,
    pub summary: String,
    pub description: String,
    /// The source-grouping id.
    pub source_id: String,
    pub homepage: String,
    /// SPDX license identifiers; empty defaults to the "null atom" license.
    pub licenses: Vec<String>,
    pub dependencies: Vec<Dependency>,
    /// All providers, including the package's own name.
    pub providers: Vec<Provider>,
    /// Names that, if already installed, cause this package to be installed too.
    pub install_if: Vec<String>,
    /// Package names this package supersedes when claiming a shared path.
    pub replaces: Vec<String>,
    pub installed_size: Option<u64>,
    /// Epoch build timestamp; used for display/sort ordering.
    pub build_time: u64,
    /// If relevant: uri to fetch from.
    pub uri: Option<String>,
    /// If relevant: hash for the download.
    pub hash: Option<String>,
    /// How big is this package in the repository.
    pub download_size: Option<u64>,
}

impl Meta {
    pub fn from_stone_payload(records: &[StonePayloadMeta]) -> Result<Self, MissingMetaError> {
        let name = find_string(records, StonePayloadMetaTag::Name)?;
        let version_identifier = find_string(records, StonePayloadMetaTag::Version)?;
        let source_release = find_u64(records, StonePayloadMetaTag::Release)?;
        let build_release = find_u64(records, StonePayloadMetaTag::BuildRelease)?;
        let architecture = find_string(records, StonePayloadMetaTag::Architecture)?;
        let summary = find_string(records, StonePayloadMetaTag::Summary)?;
        let description = find_string(records, StonePayloadMetaTag::Description)?;
        let source_id = find_string(records, StonePayloadMetaTag::SourceID)?;
        let homepage = find_string(records, StonePayloadMetaTag::Homepage)?;
        let build_time = find_u64(records, StonePayloadMetaTag::BuildTime).unwrap_or(0);
        let installed_size = find_u64(records, StonePayloadMetaTag::InstalledSize).ok();
        let uri = find_string(records, StonePayloadMetaTag::PackageURI).ok();
        let hash = find_string(records, StonePayloadMetaTag::PackageHash).ok();
        let download_size = find_u64(records, StonePayloadMetaTag::PackageSize).ok();

        let licenses = records
            .iter()
            .filter_map(|record| string_value(record, StonePayloadMetaTag::License))
            .collect();
        let dependencies = records.iter().filter_map(dependency_value).collect();
        let providers = records
            .iter()
            .filter_map(provider_value)
            .chain(Some(Provider {
                kind: dependency::Kind::PackageName,
                name: name.clone(),
            }))
            .collect();

        Ok(Meta {
            name,
            version_identifier,
            source_release,
            build_release,
            architecture,
            summary,
            description,
            source_id,
            homepage,
            licenses,
            dependencies,
            providers,
            // Not representable in the archive meta payload; populated from
            // the installed-db record's `r:`/`f:` fields instead.
            install_if: Vec::new(),
            replaces: Vec::new(),
            installed_size,
            build_time,
            uri,
            hash,
            download_size,
        })
    }
}

fn find_string(records: &[StonePayloadMeta], tag: StonePayloadMetaTag) -> Result<String, MissingMetaError> {
    records
        .iter()
        .find_map(|record| string_value(record, tag))
        .ok_or(MissingMetaError(tag))
}

fn find_u64(records: &[StonePayloadMeta], tag: StonePayloadMetaTag) -> Result<u64, MissingMetaError> {
    records
        .iter()
        .find_map(|record| u64_value(record, tag))
        .ok_or(MissingMetaError(tag))
}

fn u64_value(record: &StonePayloadMeta, tag: StonePayloadMetaTag) -> Option<u64> {
    if record.tag != tag {
        return None;
    }
    Some(match record.kind {
        StonePayloadMetaKind::Int8(i) => i as _,
        StonePayloadMetaKind::Uint8(i) => i as _,
        StonePayloadMetaKind::Int16(i) => i as _,
        StonePayloadMetaKind::Uint16(i) => i as _,
        StonePayloadMetaKind::Int32(i) => i as _,
        StonePayloadMetaKind::Uint32(i) => i as _,
        StonePayloadMetaKind::Int64(i) => i as _,
        StonePayloadMetaKind::Uint64(i) => i,
        _ => return None,
    })
}

fn string_value(record: &StonePayloadMeta, tag: StonePayloadMetaTag) -> Option<String> {
    match (record.tag, &record.kind) {
        (t, StonePayloadMetaKind::String(value)) if t == tag => Some(value.clone()),
        _ => None,
    }
}

fn dependency_value(record: &StonePayloadMeta) -> Option<Dependency> {
    if record.tag != StonePayloadMetaTag::Depends {
        return None;
    }
    if let StonePayloadMetaKind::Dependency(kind, ref name) = record.kind {
        Some(Dependency {
            kind: dependency::Kind::from(kind),
            name: name.clone(),
        })
    } else {
        None
    }
}

fn provider_value(record: &StonePayloadMeta) -> Option<Provider> {
    if record.tag != StonePayloadMetaTag::Provides {
        return None;
    }
    if let StonePayloadMetaKind::Provider(kind, ref name) = record.kind {
        Some(Provider {
            kind: dependency::Kind::from(kind),
            name: name.clone(),
        })
    } else {
        None
    }
}

#[derive(Debug, Error)]
#[error("missing metadata field: {0:?}")]
pub struct MissingMetaError(pub StonePayloadMetaTag);

#[cfg(test)]
mod tests {
    use super::*;

    fn string_record(tag: StonePayloadMetaTag, value: &str) -> StonePayloadMeta {
        StonePayloadMeta {
            tag,
            kind: StonePayloadMetaKind::String(value.to_string()),
        }
    }

    fn u64_record(tag: StonePayloadMetaTag, value: u64) -> StonePayloadMeta {
        StonePayloadMeta {
            tag,
            kind: StonePayloadMetaKind::Uint64(value),
        }
    }

    #[test]
    fn builds_meta_from_minimal_payload() {
        let records = vec![
            string_record(StonePayloadMetaTag::Name, "bash"),
            string_record(StonePayloadMetaTag::Version, "5.2"),
            u64_record(StonePayloadMetaTag::Release, 1),
            u64_record(StonePayloadMetaTag::BuildRelease, 1),
            string_record(StonePayloadMetaTag::Architecture, "x86_64"),
            string_record(StonePayloadMetaTag::Summary, "the bourne again shell"),
            string_record(StonePayloadMetaTag::Description, "a shell"),
            string_record(StonePayloadMetaTag::SourceID, "bash"),
            string_record(StonePayloadMetaTag::Homepage, "https://example.org"),
        ];

        let meta = Meta::from_stone_payload(&records).unwrap();
        assert_eq!(meta.name, "bash");
        assert!(meta.providers.iter().any(|p| p.name == "bash"));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let records = vec![string_record(StonePayloadMetaTag::Name, "bash")];
        let err = Meta::from_stone_payload(&records).unwrap_err();
        assert_eq!(err.0, StonePayloadMetaTag::Version);
    }
}
