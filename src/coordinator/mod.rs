//! Coordination request actor
//!
//! All node operations funnel through one actor per ensemble session:
//! - create / delete / get-data / set-data / get-children / exists
//! - namespace resolution before dispatch
//! - asynchronous replies through [`Pending`]

pub mod actor;
pub mod messages;

pub use actor::{CoordinationActor, CoordinatorHandle};
pub use messages::{ChildNode, Pending, Request};

use crate::common::{Config, Namespaces, Result};
use crate::ensemble::RemoteEnsemble;

/// Connect to the configured remote ensemble and start an actor on that session
pub async fn connect(config: &Config) -> Result<CoordinatorHandle> {
    let client =
        RemoteEnsemble::connect(&config.ensemble.address, config.ensemble.connect_timeout())
            .await?;
    let (handle, _task) =
        CoordinationActor::spawn(client, Namespaces::from_config(&config.namespaces));
    Ok(handle)
}
