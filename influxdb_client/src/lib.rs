use std::{fmt::Display, str::FromStr, string::FromUtf8Error};

use reqwest::{Body, IntoUrl, Method, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use url::Url;

pub use reqwest::StatusCode;

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build the HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to read the API response bytes: {0}")]
    Bytes(#[source] reqwest::Error),

    #[error("invalid UTF8 in response: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("query returned an error: {message}")]
    Query { message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The InfluxDB HTTP API client
///
/// For programmatic access to the `/ping`, `/query`, and `/write` APIs of a running
/// InfluxDB server.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL for making requests to a running InfluxDB server
    base_url: Url,
    /// The `Bearer` token to use for authenticating on each request to the server
    auth_token: Option<Secret<String>>,
    /// Username and password sent as basic auth when no token is set
    basic_auth: Option<(String, Secret<String>)>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`]
    pub fn new<U: IntoUrl>(base_url: U) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            auth_token: None,
            basic_auth: None,
            http_client: reqwest::Client::new(),
        })
    }

    /// Set the `Bearer` token that will be sent with each request to the server
    ///
    /// # Example
    /// ```
    /// # use influxdb_client::Client;
    /// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let token = "secret-token-string";
    /// let client = Client::new("http://localhost:8086")?
    ///     .with_auth_token(token);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    /// Set the username and password sent as basic auth with each request
    ///
    /// A token set with [`Client::with_auth_token`] takes precedence.
    pub fn with_basic_auth<U: Into<String>, P: Into<String>>(
        mut self,
        username: U,
        password: P,
    ) -> Self {
        self.basic_auth = Some((username.into(), Secret::new(password.into())));
        self
    }

    /// Replace the underlying HTTP client with one that identifies itself using `user_agent`
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .user_agent(user_agent.into())
            .build()
            .map_err(Error::HttpClient)?;
        Ok(self)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match (&self.auth_token, &self.basic_auth) {
            (Some(token), _) => req.bearer_auth(token.expose_secret()),
            (None, Some((username, password))) => {
                req.basic_auth(username, Some(password.expose_secret()))
            }
            (None, None) => req,
        }
    }

    /// Compose a request to the `/write` API
    ///
    /// # Example
    /// ```no_run
    /// # use influxdb_client::{Client, Consistency, Precision};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Client::new("http://localhost:8086")?;
    /// client
    ///     .write("db_name")
    ///     .retention_policy("autogen")
    ///     .precision(Precision::Second)
    ///     .consistency(Consistency::One)
    ///     .body("cpu,host=s1 usage=0.5 1700000000")
    ///     .send()
    ///     .await
    ///     .expect("send write request");
    /// # Ok(())
    /// # }
    /// ```
    pub fn write<S: Into<String>>(&self, db: S) -> WriteRequestBuilder<'_, NoBody> {
        WriteRequestBuilder {
            client: self,
            db: db.into(),
            retention_policy: None,
            precision: None,
            consistency: None,
            body: NoBody,
        }
    }

    /// Compose a request to the `/query` API
    ///
    /// # Example
    /// ```no_run
    /// # use influxdb_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Client::new("http://localhost:8086")?;
    /// let response = client
    ///     .query("CREATE DATABASE foo")
    ///     .send()
    ///     .await?;
    /// assert!(response.error().is_none());
    /// # Ok(())
    /// # }
    /// ```
    pub fn query<Q: Into<String>>(&self, command: Q) -> QueryRequestBuilder<'_> {
        QueryRequestBuilder {
            client: self,
            command: command.into(),
            db: None,
        }
    }

    /// Send a `/ping` request to the target server to check its status and gather
    /// `version` and `build` information
    pub async fn ping(&self) -> Result<PingResponse> {
        let url = self.base_url.join("/ping")?;
        let req = self.authorize(self.http_client.get(url));
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, "/ping", src))?;
        if resp.status().is_success() {
            let header = |name: &str| {
                resp.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_owned()
            };
            Ok(PingResponse {
                version: header("X-Influxdb-Version"),
                build: header("X-Influxdb-Build"),
            })
        } else {
            Err(Error::ApiError {
                code: resp.status(),
                message: resp.text().await.map_err(Error::Text)?,
            })
        }
    }
}

/// The response of the `/ping` API, taken from the response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    version: String,
    build: String,
}

impl PingResponse {
    /// Get the `version` from the response
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get the `build` from the response
    pub fn build(&self) -> &str {
        &self.build
    }
}

/// The URL parameters of the request to the `/write` API
#[derive(Debug, Serialize)]
struct WriteParams<'a> {
    db: &'a str,
    rp: Option<&'a str>,
    precision: Option<Precision>,
    consistency: Option<Consistency>,
}

impl<'a, B> From<&'a WriteRequestBuilder<'a, B>> for WriteParams<'a> {
    fn from(builder: &'a WriteRequestBuilder<'a, B>) -> Self {
        Self {
            db: &builder.db,
            rp: builder.retention_policy.as_deref(),
            precision: builder.precision,
            consistency: builder.consistency,
        }
    }
}

/// Time series precision of the timestamps in a write body
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Precision {
    #[serde(rename = "ns")]
    Nanosecond,
    #[serde(rename = "u")]
    Microsecond,
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "m")]
    Minute,
    #[serde(rename = "h")]
    Hour,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid precision, values are ns, u, ms, s, m, and h")]
pub struct ParsePrecisionError(String);

impl FromStr for Precision {
    type Err = ParsePrecisionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "n" | "ns" => Ok(Self::Nanosecond),
            "u" | "us" => Ok(Self::Microsecond),
            "ms" => Ok(Self::Millisecond),
            "s" => Ok(Self::Second),
            "m" => Ok(Self::Minute),
            "h" => Ok(Self::Hour),
            _ => Err(ParsePrecisionError(s.into())),
        }
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nanosecond => write!(f, "ns"),
            Self::Microsecond => write!(f, "u"),
            Self::Millisecond => write!(f, "ms"),
            Self::Second => write!(f, "s"),
            Self::Minute => write!(f, "m"),
            Self::Hour => write!(f, "h"),
        }
    }
}

/// Write consistency level requested from a clustered server
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Any,
    One,
    Quorum,
    All,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid consistency level, values are any, one, quorum, and all")]
pub struct ParseConsistencyError(String);

impl FromStr for Consistency {
    type Err = ParseConsistencyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "one" => Ok(Self::One),
            "quorum" => Ok(Self::Quorum),
            "all" => Ok(Self::All),
            _ => Err(ParseConsistencyError(s.into())),
        }
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::One => write!(f, "one"),
            Self::Quorum => write!(f, "quorum"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Builder type for composing a request to `/write`
///
/// Produced by [`Client::write`]
#[derive(Debug)]
pub struct WriteRequestBuilder<'c, B> {
    client: &'c Client,
    db: String,
    retention_policy: Option<String>,
    precision: Option<Precision>,
    consistency: Option<Consistency>,
    body: B,
}

impl<B> WriteRequestBuilder<'_, B> {
    /// Set the retention policy the points are written into
    pub fn retention_policy<S: Into<String>>(mut self, set_to: S) -> Self {
        self.retention_policy = Some(set_to.into());
        self
    }

    /// Set the precision
    pub fn precision(mut self, set_to: Precision) -> Self {
        self.precision = Some(set_to);
        self
    }

    /// Set the write consistency level
    pub fn consistency(mut self, set_to: Consistency) -> Self {
        self.consistency = Some(set_to);
        self
    }
}

impl<'c> WriteRequestBuilder<'c, NoBody> {
    /// Set the body of the request to the `/write` API
    ///
    /// The body is sent as is, i.e., it is expected to already be newline-delimited line
    /// protocol.
    pub fn body<T: Into<Body>>(self, body: T) -> WriteRequestBuilder<'c, Body> {
        WriteRequestBuilder {
            client: self.client,
            db: self.db,
            retention_policy: self.retention_policy,
            precision: self.precision,
            consistency: self.consistency,
            body: body.into(),
        }
    }
}

impl WriteRequestBuilder<'_, Body> {
    /// Send the request to the server
    pub async fn send(self) -> Result<()> {
        let url = self.client.base_url.join("/write")?;
        let params = WriteParams::from(&self);
        let req = self
            .client
            .authorize(self.client.http_client.post(url).query(&params));
        let resp = req
            .body(self.body)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, "/write", src))?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(Error::Bytes)?;
        match status {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: String::from_utf8(content.to_vec())?,
            }),
        }
    }
}

#[doc(hidden)]
/// Typestate type for [`WriteRequestBuilder`]
#[derive(Debug, Copy, Clone)]
pub struct NoBody;

/// Used to compose a request to the `/query` API
///
/// Produced by [`Client::query`] method.
#[derive(Debug)]
pub struct QueryRequestBuilder<'c> {
    client: &'c Client,
    command: String,
    db: Option<String>,
}

impl QueryRequestBuilder<'_> {
    /// Set the database the command is run against
    pub fn database<S: Into<String>>(mut self, db: S) -> Self {
        self.db = Some(db.into());
        self
    }

    /// Send the request to `/query`
    ///
    /// An error embedded in a successful response is not turned into an [`Error`]; use
    /// [`QueryResponse::error`] to inspect it.
    pub async fn send(self) -> Result<QueryResponse> {
        let url = self.client.base_url.join("/query")?;
        let params = QueryParams::from(&self);
        let req = self
            .client
            .authorize(self.client.http_client.post(url).query(&params));
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, "/query", src))?;

        match resp.status() {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }
}

/// Query parameters for the `/query` API
#[derive(Debug, Serialize)]
struct QueryParams<'a> {
    #[serde(rename = "q")]
    command: &'a str,
    db: Option<&'a str>,
}

impl<'a> From<&'a QueryRequestBuilder<'a>> for QueryParams<'a> {
    fn from(builder: &'a QueryRequestBuilder<'a>) -> Self {
        Self {
            command: &builder.command,
            db: builder.db.as_deref(),
        }
    }
}

/// The body of a successful `/query` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

/// The outcome of a single statement inside a [`QueryResponse`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    statement_id: u64,
    #[serde(default)]
    error: Option<String>,
}

impl QueryResponse {
    /// The results of each statement in the command
    pub fn results(&self) -> &[StatementResult] {
        &self.results
    }

    /// The first error reported by the response, either for the request as a whole or
    /// for one of its statements
    pub fn error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }
}

impl StatementResult {
    pub fn statement_id(&self) -> u64 {
        self.statement_id
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
