//! Connection manager: opens a pooled, timeout-bounded client and confirms
//! the server is alive before anything else touches it.

use std::future::IntoFuture;
use std::time::Duration;

use mongodb::{
    Client,
    bson::doc,
    error::ErrorKind,
    options::{Acknowledgment, ClientOptions, WriteConcern},
};
use tokio::time::Instant;
use url::Url;

use crate::config::{ConnectionParameters, WriteConcernLevel};
use crate::error::{ConnectionError, OperationTimedOut};

const APP_NAME: &str = "mongo-logger-bootstrap";

/// An open, pinged client. Owned by exactly one bootstrap run and released
/// through [`LiveConnection::close`].
pub struct LiveConnection {
    client: Client,
    server_version: Option<String>,
    socket_timeout: Duration,
}

impl LiveConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Bound applied to each network call made through this connection.
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub async fn close(self) {
        self.client.shutdown().await;
        tracing::info!("MongoDB connection closed");
    }

    /// A client that has not been pinged. Nothing is sent until it is used.
    #[cfg(test)]
    pub async fn unconfirmed(params: &ConnectionParameters) -> Self {
        let options = client_options(params).await.unwrap();
        Self {
            client: Client::with_options(options).unwrap(),
            server_version: None,
            socket_timeout: params.socket_timeout,
        }
    }
}

/// Open a client into `slot`, ping `admin`, and fetch server metadata.
///
/// URI resolution and the ping share one deadline of server-selection plus
/// connect timeout. The client is stored in `slot` before the ping, so the
/// owner can shut it down even if this future is dropped or fails.
/// Metadata lookup failing is logged and otherwise ignored.
pub async fn connect<'a>(
    params: &ConnectionParameters,
    slot: &'a mut Option<LiveConnection>,
) -> Result<&'a LiveConnection, ConnectionError> {
    let redacted = redact_uri(&params.uri);
    tracing::info!("Connecting to MongoDB at: {}", redacted);

    let budget = params.server_selection_timeout + params.connect_timeout;
    let deadline = Instant::now() + budget;
    let timed_out = |stage: &str| ConnectionError::Timeout {
        uri: redacted.clone(),
        message: format!("{stage} did not complete within {budget:?}"),
    };

    let options = tokio::time::timeout_at(deadline, client_options(params))
        .await
        .map_err(|_| timed_out("resolving the connection string"))?
        .map_err(|e| classify(&e, &redacted))?;

    let client = Client::with_options(options).map_err(|e| classify(&e, &redacted))?;
    let conn = slot.insert(LiveConnection {
        client,
        server_version: None,
        socket_timeout: params.socket_timeout,
    });

    match tokio::time::timeout_at(
        deadline,
        conn.client.database("admin").run_command(doc! { "ping": 1 }),
    )
    .await
    {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(classify(&e, &redacted)),
        Err(_) => return Err(timed_out("ping")),
    }

    conn.server_version = match bounded(
        params.socket_timeout,
        conn.client.database("admin").run_command(doc! { "buildInfo": 1 }),
    )
    .await
    {
        Ok(info) => info.get_str("version").ok().map(str::to_string),
        Err(e) => {
            tracing::warn!("Could not read server metadata: {:#}", e);
            None
        }
    };

    tracing::info!(
        "Successfully connected to MongoDB {}",
        conn.server_version().unwrap_or("(unknown version)")
    );

    Ok(conn)
}

async fn client_options(params: &ConnectionParameters) -> mongodb::error::Result<ClientOptions> {
    let mut options = ClientOptions::parse(&params.uri).await?;

    if options.app_name.is_none() {
        options.app_name = Some(APP_NAME.to_string());
    }
    options.server_selection_timeout = Some(params.server_selection_timeout);
    options.connect_timeout = Some(params.connect_timeout);
    options.max_pool_size = Some(params.max_pool_size);
    options.max_idle_time = Some(params.max_idle_time);
    options.retry_writes = Some(params.retry_writes);
    options.write_concern = Some(write_concern(params.write_concern));

    Ok(options)
}

fn write_concern(level: WriteConcernLevel) -> WriteConcern {
    let w = match level {
        WriteConcernLevel::Majority => Acknowledgment::Majority,
        WriteConcernLevel::Nodes(n) => Acknowledgment::Nodes(n),
    };
    WriteConcern::builder().w(w).build()
}

/// Map a driver error onto the connection failure taxonomy.
fn classify(e: &mongodb::error::Error, redacted_uri: &str) -> ConnectionError {
    match e.kind.as_ref() {
        ErrorKind::ServerSelection { .. } => ConnectionError::Timeout {
            uri: redacted_uri.to_string(),
            message: e.to_string(),
        },
        ErrorKind::InvalidArgument { .. } | ErrorKind::DnsResolve { .. } => {
            ConnectionError::Configuration {
                message: e.to_string(),
            }
        }
        _ => ConnectionError::Unexpected {
            message: e.to_string(),
        },
    }
}

/// Run one driver operation under a hard time limit. Elapsed limits surface
/// as [`OperationTimedOut`] at the root of the returned error.
pub async fn bounded<T, F>(limit: Duration, operation: F) -> anyhow::Result<T>
where
    F: IntoFuture<Output = mongodb::error::Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(OperationTimedOut(limit).into()),
    }
}

/// Hide the password part of a connection string for logs. Anything that
/// does not parse as a URL is hidden entirely.
pub fn redact_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<redacted>".to_string(),
    }
}
