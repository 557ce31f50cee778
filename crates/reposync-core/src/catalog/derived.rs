//! Derived per-package and per-application fields.
//!
//! Shared by every catalog backend so compatibility means the same thing
//! regardless of storage.

use reposync_schema::TagList;

use crate::config::DeviceProfile;

/// Whether a package with these bounds and ABIs runs on `device`.
///
/// A `max_sdk` of zero means unbounded. A package without native code runs on
/// any ABI.
///
/// # Example
///
/// ```
/// use reposync_core::catalog::derived::is_compatible;
/// use reposync_core::config::DeviceProfile;
///
/// let device = DeviceProfile { sdk: 21, abis: vec!["x86".into()] };
/// assert!(is_compatible(14, 0, None, &device));
/// assert!(!is_compatible(23, 0, None, &device));
/// ```
pub fn is_compatible(
    min_sdk: i32,
    max_sdk: i32,
    native_code: Option<&TagList>,
    device: &DeviceProfile,
) -> bool {
    let sdk_ok = min_sdk <= device.sdk && (max_sdk == 0 || max_sdk >= device.sdk);
    let abi_ok = native_code.is_none_or(|abis| {
        abis.as_slice().is_empty() || device.abis.iter().any(|abi| abis.contains(abi))
    });
    sdk_ok && abi_ok
}

/// Pick the suggested version code from the compatible ones.
///
/// With an upstream hint, the highest compatible code not above the hint
/// wins; otherwise (or if none qualifies) the highest compatible code.
///
/// # Example
///
/// ```
/// use reposync_core::catalog::derived::suggested_vercode;
///
/// assert_eq!(suggested_vercode(20, [10, 20, 30]), Some(20));
/// assert_eq!(suggested_vercode(-1, [10, 30]), Some(30));
/// assert_eq!(suggested_vercode(5, [10, 30]), Some(30));
/// assert_eq!(suggested_vercode(5, []), None);
/// ```
pub fn suggested_vercode(upstream: i32, compatible: impl IntoIterator<Item = i32>) -> Option<i32> {
    let codes: Vec<i32> = compatible.into_iter().collect();
    let hinted = if upstream > 0 {
        codes.iter().copied().filter(|&c| c <= upstream).max()
    } else {
        None
    };
    hinted.or_else(|| codes.iter().copied().max())
}
