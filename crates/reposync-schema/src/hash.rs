use serde::{Deserialize, Serialize};

/// Digest algorithm of a package content hash.
///
/// The index tags hashes with a lowercase `type` attribute; the catalog stores
/// the canonical display form (`MD5`, `SHA-256`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// Legacy digest, used when the `type` attribute is absent or `md5`.
    #[serde(rename = "MD5")]
    Md5,
    /// Modern digest, `type="sha256"`.
    #[serde(rename = "SHA-256")]
    Sha256,
}

impl HashAlgorithm {
    /// Interpret the `type` attribute of a `<hash>` element.
    ///
    /// Returns `None` for tags this client does not understand.
    ///
    /// # Example
    ///
    /// ```
    /// use reposync_schema::HashAlgorithm;
    ///
    /// assert_eq!(HashAlgorithm::from_type_attr(None), Some(HashAlgorithm::Md5));
    /// assert_eq!(HashAlgorithm::from_type_attr(Some("sha256")), Some(HashAlgorithm::Sha256));
    /// assert_eq!(HashAlgorithm::from_type_attr(Some("crc32")), None);
    /// ```
    pub fn from_type_attr(attr: Option<&str>) -> Option<Self> {
        match attr {
            None | Some("md5") => Some(Self::Md5),
            Some("sha256") => Some(Self::Sha256),
            Some(_) => None,
        }
    }

    /// Canonical display form stored in the catalog.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }

    /// Parse the canonical display form back (used when loading from storage).
    pub fn from_canonical(s: &str) -> Option<Self> {
        match s {
            "MD5" => Some(Self::Md5),
            "SHA-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Whether a later hash of this algorithm may replace an already-set one.
    ///
    /// Strong digests always win; legacy digests only fill an empty slot.
    pub const fn overrides_existing(self) -> bool {
        matches!(self, Self::Sha256)
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
