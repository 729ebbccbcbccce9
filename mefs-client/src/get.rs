use std::{fmt, io};

use bytes::BytesMut;
use futures_util::{StreamExt, TryStreamExt};

use crate::{ClientStream, Session};

/// The result from a successful [`get()`](Session::get) call.
///
/// This carries the object contents as a stream.
pub struct GetResponse {
    /// The response stream.
    pub stream: ClientStream,
}

impl GetResponse {
    /// Loads the object payload fully into memory.
    pub async fn payload(self) -> crate::Result<bytes::Bytes> {
        let bytes: BytesMut = self.stream.try_collect().await?;
        Ok(bytes.freeze())
    }
}

impl fmt::Debug for GetResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetResponse")
            .field("stream", &format_args!("[Stream]"))
            .finish()
    }
}

impl Session {
    /// Retrieves the object `object` from `bucket`.
    pub fn get(&self, bucket: &str, object: &str) -> GetBuilder {
        GetBuilder {
            session: self.clone(),
            bucket: bucket.to_owned(),
            object: object.to_owned(),
        }
    }
}

/// A [`get`](Session::get) request builder.
#[derive(Debug)]
pub struct GetBuilder {
    session: Session,
    bucket: String,
    object: String,
}

impl GetBuilder {
    /// Sends the get request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails to send, or if the daemon answers with an error,
    /// which includes unknown objects.
    pub async fn send(self) -> crate::Result<GetResponse> {
        let response = self
            .session
            .request("lfs/get_object")?
            .arg(&self.bucket)
            .arg(&self.object)
            .send()
            .await?;

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(GetResponse { stream })
    }
}
