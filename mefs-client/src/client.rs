use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

const USER_AGENT: &str = concat!("mefs-client/", env!("CARGO_PKG_VERSION"));

/// Path of the command API relative to the daemon's base URL.
const API_PATH: &str = "api/v0/";

#[derive(Debug)]
struct ClientBuilderInner {
    service_url: Url,
    reqwest_builder: reqwest::ClientBuilder,
}

impl ClientBuilderInner {
    /// Applies defaults that cannot be overridden by the caller.
    fn apply_defaults(mut self) -> Self {
        // The daemon never redirects, a redirect means we are talking to something else.
        self.reqwest_builder = self
            .reqwest_builder
            .redirect(reqwest::redirect::Policy::none());
        self
    }
}

/// Builder to create a [`Client`].
#[must_use]
#[derive(Debug)]
pub struct ClientBuilder(crate::Result<ClientBuilderInner>);

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`], configured with the given `service_url`.
    ///
    /// The URL may omit the scheme (`localhost:5001`), in which case `http` is assumed.
    pub fn new(service_url: &str) -> Self {
        let service_url = match parse_service_url(service_url) {
            Ok(url) => url,
            Err(err) => return Self(Err(err)),
        };

        // Uploads of large payloads can take minutes, so only connecting is bounded by default.
        let reqwest_builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT);

        Self(Ok(ClientBuilderInner {
            service_url,
            reqwest_builder,
        }))
    }

    /// Sets a total timeout for every request sent by the [`Client`].
    pub fn timeout(self, timeout: Duration) -> Self {
        self.configure_reqwest(|builder| builder.timeout(timeout))
    }

    /// Calls the closure with the underlying [`reqwest::ClientBuilder`].
    pub fn configure_reqwest<F>(self, closure: F) -> Self
    where
        F: FnOnce(reqwest::ClientBuilder) -> reqwest::ClientBuilder,
    {
        let Ok(inner) = self.0 else { return self };
        Self(Ok(ClientBuilderInner {
            service_url: inner.service_url,
            reqwest_builder: closure(inner.reqwest_builder),
        }))
    }

    /// Returns a [`Client`] that uses this [`ClientBuilder`] configuration.
    ///
    /// # Errors
    ///
    /// This method fails if:
    /// - the given `service_url` is invalid
    /// - the [`reqwest::Client`] fails to build. Refer to [`reqwest::ClientBuilder::build`] for
    ///   more information on when this can happen.
    pub fn build(self) -> crate::Result<Client> {
        self.0
            .map(|inner| inner.apply_defaults())
            .and_then(|inner| {
                Ok(Client {
                    inner: Arc::new(ClientInner {
                        reqwest: inner.reqwest_builder.build()?,
                        api_url: join(&inner.service_url, API_PATH)?,
                    }),
                })
            })
    }
}

fn parse_service_url(service_url: &str) -> crate::Result<Url> {
    let mut url = if service_url.contains("://") {
        Url::parse(service_url)
    } else {
        Url::parse(&format!("http://{service_url}"))
    }
    .map_err(|err| crate::Error::InvalidUrl {
        message: format!("invalid service url `{service_url}`: {err}"),
    })?;

    // `Url::join` replaces the last path segment unless the path ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn join(base: &Url, path: &str) -> crate::Result<Url> {
    base.join(path).map_err(|err| crate::Error::InvalidUrl {
        message: format!("cannot join `{path}` onto `{base}`: {err}"),
    })
}

#[derive(Debug)]
pub(crate) struct ClientInner {
    reqwest: reqwest::Client,
    api_url: Url,
}

/// A client for the MEFS daemon's command API. Use [`Client::builder`] to configure and
/// construct this.
///
/// Operations on buckets and objects are always performed on behalf of a user. Scope the client
/// to a user address with [`Client::session`] to perform them.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Convenience function to create a [`ClientBuilder`].
    pub fn builder(service_url: &str) -> ClientBuilder {
        ClientBuilder::new(service_url)
    }

    /// Scopes this client to the user with the given `address`.
    pub fn session(&self, address: &str) -> Session {
        Session {
            address: address.into(),
            client: self.inner.clone(),
        }
    }

    pub(crate) fn request(&self, command: &str) -> crate::Result<Request> {
        self.inner.request(command)
    }
}

impl ClientInner {
    pub(crate) fn request(&self, command: &str) -> crate::Result<Request> {
        let url = join(&self.api_url, command)?;
        Ok(Request {
            command: command.to_owned(),
            builder: self.reqwest.post(url),
        })
    }
}

/// A [`Client`] scoped to one user address.
///
/// Every request sent through a session carries the `address` option, which selects the user on
/// whose behalf the daemon acts.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) address: Arc<str>,
    pub(crate) client: Arc<ClientInner>,
}

impl Session {
    /// The address of the user this session acts for.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn request(&self, command: &str) -> crate::Result<Request> {
        Ok(self
            .client
            .request(command)?
            .option("address", self.address.as_ref()))
    }
}

/// The type of [`Stream`](futures_util::Stream) used for object payloads.
pub type ClientStream = BoxStream<'static, io::Result<Bytes>>;

/// A single command invocation against the daemon.
///
/// Positional arguments are encoded as repeated `arg` query parameters, named options as plain
/// query parameters.
#[derive(Debug)]
pub(crate) struct Request {
    command: String,
    builder: reqwest::RequestBuilder,
}

/// The error body the daemon sends alongside non-success status codes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    message: String,
}

impl Request {
    pub(crate) fn arg(mut self, value: &str) -> Self {
        self.builder = self.builder.query(&[("arg", value)]);
        self
    }

    pub(crate) fn option(mut self, name: &str, value: impl ToString) -> Self {
        self.builder = self.builder.query(&[(name, value.to_string())]);
        self
    }

    pub(crate) fn multipart(mut self, form: reqwest::multipart::Form) -> Self {
        self.builder = self.builder.multipart(form);
        self
    }

    /// Sends the request and returns the raw response once its status is checked.
    pub(crate) async fn send(self) -> crate::Result<Response> {
        let response = self.builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await?;
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|error| error.message)
            .unwrap_or(body);

        Err(crate::Error::Api {
            command: self.command,
            status,
            message,
        })
    }

    /// Sends the request and decodes the JSON response body.
    pub(crate) async fn exec<T: DeserializeOwned>(self) -> crate::Result<T> {
        Ok(self.send().await?.json().await?)
    }
}
