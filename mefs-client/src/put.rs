use std::fmt;

use bytes::Bytes;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::{ClientStream, Session};

/// Descriptor of an object as reported by the daemon.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ObjectStat {
    /// The name of the object within its bucket.
    pub object_name: String,
    /// The size of the object in bytes.
    pub object_size: i64,
    /// Hex-encoded MD5 digest of the object contents.
    #[serde(rename = "MD5")]
    pub md5: String,
    /// Creation time, formatted by the daemon.
    pub ctime: String,
    /// Whether the object is a directory marker.
    pub dir: bool,
    /// Time of the latest storage challenge for this object.
    pub latest_chal_time: String,
}

/// The response of object commands.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Objects {
    /// The command that produced this response.
    pub method: String,
    /// The objects affected by the command.
    pub objects: Vec<ObjectStat>,
}

impl Objects {
    /// Returns the descriptor of the first affected object, if any.
    pub fn into_first(self) -> Option<ObjectStat> {
        self.objects.into_iter().next()
    }
}

pub(crate) enum PutBody {
    Buffer(Bytes),
    Stream(ClientStream, u64),
}

impl fmt::Debug for PutBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PutBody").finish_non_exhaustive()
    }
}

impl Session {
    fn put_body(&self, bucket: &str, object: &str, body: PutBody) -> PutBuilder {
        PutBuilder {
            session: self.clone(),
            bucket: bucket.to_owned(),
            object: object.to_owned(),
            body,
        }
    }

    /// Creates an object using a [`Bytes`]-like payload.
    pub fn put(&self, bucket: &str, object: &str, body: impl Into<Bytes>) -> PutBuilder {
        self.put_body(bucket, object, PutBody::Buffer(body.into()))
    }

    /// Creates an object using a streaming payload of exactly `len` bytes.
    pub fn put_stream(
        &self,
        bucket: &str,
        object: &str,
        body: ClientStream,
        len: u64,
    ) -> PutBuilder {
        self.put_body(bucket, object, PutBody::Stream(body, len))
    }
}

/// A [`put`](Session::put) request builder.
#[derive(Debug)]
pub struct PutBuilder {
    session: Session,
    bucket: String,
    object: String,
    body: PutBody,
}

impl PutBuilder {
    /// Sends the built put request to the daemon.
    ///
    /// The payload is uploaded as the single file part of a multipart form.
    pub async fn send(self) -> crate::Result<Objects> {
        let part = match self.body {
            PutBody::Buffer(bytes) => Part::bytes(bytes.to_vec()),
            PutBody::Stream(stream, len) => {
                Part::stream_with_length(Body::wrap_stream(stream), len)
            }
        };
        let form = Form::new().part("file", part.file_name(""));

        self.session
            .request("lfs/put_object")?
            .arg(&self.bucket)
            .arg(&self.object)
            .option("objectname", &self.object)
            .multipart(form)
            .exec()
            .await
    }
}
