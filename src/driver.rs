//! Lifecycle contract between a provisioning host and a provider driver.
//!
//! The host drives every provider through the same verbs. Verbs that reach
//! the provider return a boxed future so implementations stay object-safe;
//! verbs answered from local state are synchronous.

use std::future::Future;
use std::pin::Pin;

use crate::flags::{DriverOptions, McnFlag};
use crate::status::MachineState;

/// Future returned by driver operations that contact the provider.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Provider driver managing a single machine.
///
/// The host serialises calls on one handle; implementations need not guard
/// against concurrent verbs.
pub trait Driver {
    /// Provider specific error type returned by the driver.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable identifier of the driver.
    fn driver_name(&self) -> &'static str;

    /// Flags accepted at create time.
    fn get_create_flags(&self) -> Vec<McnFlag>;

    /// Binds configuration from host-resolved flag values.
    ///
    /// # Errors
    ///
    /// Returns an error when a required value is missing or out of range.
    fn set_config_from_flags(&mut self, options: &dyn DriverOptions) -> Result<(), Self::Error>;

    /// Validates the bound configuration before create. Never contacts the
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be used to create.
    fn pre_create_check(&self) -> Result<(), Self::Error>;

    /// Provisions the machine.
    fn create(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Returns the cached public IP address.
    ///
    /// # Errors
    ///
    /// Returns an error when no address has been recorded.
    fn get_ip(&self) -> Result<String, Self::Error>;

    /// Returns the Docker endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error when no address has been recorded.
    fn get_url(&self) -> Result<String, Self::Error>;

    /// Queries the provider for the machine's current state.
    fn get_state(&self) -> DriverFuture<'_, MachineState, Self::Error>;

    /// Powers the machine on.
    fn start(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Requests a graceful shutdown.
    fn stop(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Reboots the machine.
    fn restart(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Powers the machine off.
    fn kill(&self) -> DriverFuture<'_, (), Self::Error>;

    /// Destroys the machine at the provider.
    fn remove(&self) -> DriverFuture<'_, (), Self::Error>;

    /// User for SSH sessions.
    fn get_ssh_username(&self) -> String;

    /// Host for SSH sessions.
    ///
    /// # Errors
    ///
    /// Returns an error when no address has been recorded.
    fn get_ssh_hostname(&self) -> Result<String, Self::Error>;
}
