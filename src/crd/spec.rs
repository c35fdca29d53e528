//! # Catalog Spec
//!
//! Main CRD specification types.

use serde::{Deserialize, Serialize};

/// Catalog Custom Resource Definition
///
/// A `Catalog` points at a remote content source holding a file-based catalog.
/// The controller resolves the source to an immutable digest, unpacks it into
/// the local cache and serves the content over HTTP.
///
/// # Example
///
/// ```yaml
/// apiVersion: catalogd.operatorframework.io/v1alpha1
/// kind: Catalog
/// metadata:
///   name: operatorhubio
/// spec:
///   source:
///     type: image
///     image:
///       ref: quay.io/operatorhubio/catalog:latest
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "Catalog",
    group = "catalogd.operatorframework.io",
    version = "v1alpha1",
    status = "crate::crd::CatalogStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    /// Source of the catalog content
    pub source: CatalogSource,
}

/// Kind-tagged description of where catalog content comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    /// Source kind. Only `image` is currently supported.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Image source, required when `type` is `image`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSource>,
}

/// Container image holding a file-based catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    /// Image reference, by tag or by digest
    /// Examples: "quay.io/operatorhubio/catalog:latest", "quay.io/operatorhubio/catalog@sha256:..."
    #[serde(rename = "ref")]
    pub reference: String,
}

impl CatalogSource {
    /// Build an image source for the given reference
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Image.as_str().to_string(),
            image: Some(ImageSource {
                reference: reference.into(),
            }),
        }
    }
}

/// Registered source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Image,
}

impl SourceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Image => "image",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(SourceType::Image),
            other => Err(anyhow::anyhow!("unknown source type {other:?}")),
        }
    }
}
