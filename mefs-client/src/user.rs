use std::fmt;

use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::{Client, Session};

/// The identity of a user created by the daemon.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    /// The account address, used to address all further requests for this user.
    #[serde(rename = "Address")]
    pub address: String,
    /// The private key of the account.
    #[serde(rename = "Sk")]
    pub secret_key: String,
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("address", &self.address)
            .field("secret_key", &"[redacted]")
            .finish()
    }
}

impl Client {
    /// Creates a new user account on the daemon.
    ///
    /// The account still has to be funded and started before it can store anything.
    pub async fn create_user(&self) -> crate::Result<UserIdentity> {
        self.request("create")?.exec().await
    }
}

impl Session {
    /// Starts the storage subsystem of this session's user.
    ///
    /// This fails as long as the account cannot pay for the operational fees of the service.
    pub async fn start(&self) -> crate::Result<()> {
        self.client
            .request("lfs/start")?
            .arg(&self.address)
            .exec::<IgnoredAny>()
            .await?;
        Ok(())
    }

    /// Queries the storage status of this session's user.
    ///
    /// Succeeds once the storage subsystem has been started and is serving requests.
    pub async fn show_storage(&self) -> crate::Result<()> {
        self.request("lfs/show_storage")?
            .exec::<IgnoredAny>()
            .await?;
        Ok(())
    }
}
