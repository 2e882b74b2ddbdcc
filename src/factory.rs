//! A registry that hands out one shared [`Client`] per configuration.

use crate::{Client, ClientConfig, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Shares clients between callers that use the same configuration.
///
/// Configurations are compared by value, so two independently built but
/// equal [`ClientConfig`]s map to the same client. The registry is an
/// ordinary value; create as many as needed.
///
/// # Examples
///
/// ```no_run
/// use callgate::{ClientConfig, ClientFactory};
///
/// # async fn example() -> Result<(), callgate::Error> {
/// let factory = ClientFactory::new();
/// let a = factory.get_instance(&ClientConfig::default())?;
/// let b = factory.get_instance(&ClientConfig::default())?;
/// assert_eq!(factory.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ClientFactory {
    clients: DashMap<ClientConfig, Client>,
}

impl ClientFactory {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client for `config`, building it on first use.
    ///
    /// A client that was closed since it was registered is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if a new client has to be built and building fails.
    pub fn get_instance(&self, config: &ClientConfig) -> Result<Client> {
        match self.clients.entry(config.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    tracing::debug!("Replacing closed client");
                    let client = Client::new(config.clone())?;
                    occupied.insert(client.clone());
                    Ok(client)
                } else {
                    Ok(occupied.get().clone())
                }
            }
            Entry::Vacant(vacant) => {
                let client = Client::new(config.clone())?;
                Ok(vacant.insert(client).clone())
            }
        }
    }

    /// Removes and returns the client for `config`, if registered.
    ///
    /// The client is not closed; callers still holding it can keep using it.
    pub fn remove_instance(&self, config: &ClientConfig) -> Option<Client> {
        self.clients.remove(config).map(|(_, client)| client)
    }

    /// Removes every client.
    pub fn clear(&self) {
        self.clients.clear();
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
