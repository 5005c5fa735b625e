//! Public address selection.

use std::net::Ipv4Addr;

use crate::api::InstanceId;

use super::LinodeDriverError;

/// Returns the first address outside the RFC 1918 private ranges.
///
/// Provider order is preserved, so a plan with several public addresses
/// always yields the one listed first.
///
/// # Errors
///
/// Returns [`LinodeDriverError::NoPublicAddress`] when every address is
/// private or the list is empty.
pub fn select_public_address(
    instance_id: InstanceId,
    addresses: &[Ipv4Addr],
) -> Result<Ipv4Addr, LinodeDriverError> {
    addresses
        .iter()
        .copied()
        .find(|address| !address.is_private())
        .ok_or(LinodeDriverError::NoPublicAddress { instance_id })
}
