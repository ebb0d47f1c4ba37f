//! HTTP client for a remote `coordkit-ensemble` server

use crate::common::{Error, Result};
use crate::ensemble::http::{
    decode_data, encode_data, ChildrenResponse, CreateRequest, CreateResponse, DataResponse,
    ErrorBody, ExistsResponse, PathQuery, SessionResponse, WriteRequest,
};
use crate::ensemble::memory::SessionId;
use crate::ensemble::{CoordinationClient, CreateMode};
use bytes::Bytes;
use reqwest::{Client, Response};
use std::time::Duration;

/// Session on a remote ensemble
pub struct RemoteEnsemble {
    http: Client,
    base_url: String,
    session: SessionId,
}

impl RemoteEnsemble {
    /// Connect to the ensemble at `address` and open a session
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::ConnectionError(e.to_string()))?;
        let base_url = address.trim_end_matches('/').to_string();

        let resp = http.post(format!("{}/sessions", base_url)).send().await?;
        let SessionResponse { session } = check(resp).await?.json().await?;

        tracing::info!(address = %base_url, session, "Connected to ensemble");
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn query(&self, path: &str) -> PathQuery {
        PathQuery {
            session: self.session,
            path: path.to_string(),
        }
    }
}

/// Turn a non-success response into the matching error
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(Error::from_kind(&body.kind, body.error)),
        Err(_) => Err(Error::ConnectionError(format!(
            "ensemble returned {}",
            status
        ))),
    }
}

impl CoordinationClient for RemoteEnsemble {
    async fn create(&self, path: &str, mode: CreateMode, data: Option<Bytes>) -> Result<String> {
        let req = CreateRequest {
            session: self.session,
            path: path.to_string(),
            mode,
            data: encode_data(data.as_ref()),
        };
        let resp = self.http.post(self.url("/nodes")).json(&req).send().await?;
        let CreateResponse { path } = check(resp).await?.json().await?;
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url("/nodes"))
            .query(&self.query(path))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let resp = self
            .http
            .get(self.url("/nodes"))
            .query(&self.query(path))
            .send()
            .await?;
        let DataResponse { data } = check(resp).await?.json().await?;
        decode_data(path, data)
    }

    async fn write(&self, path: &str, data: Option<Bytes>) -> Result<()> {
        let req = WriteRequest {
            session: self.session,
            path: path.to_string(),
            data: encode_data(data.as_ref()),
        };
        let resp = self.http.put(self.url("/nodes")).json(&req).send().await?;
        check(resp).await?;
        Ok(())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(self.url("/nodes/children"))
            .query(&self.query(path))
            .send()
            .await?;
        let ChildrenResponse { children } = check(resp).await?.json().await?;
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resp = self
            .http
            .get(self.url("/nodes/exists"))
            .query(&self.query(path))
            .send()
            .await?;
        let ExistsResponse { exists } = check(resp).await?.json().await?;
        Ok(exists)
    }

    async fn close(&self) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/sessions/{}", self.session)))
            .send()
            .await?;
        check(resp).await?;
        tracing::info!(session = self.session, "Ensemble session closed");
        Ok(())
    }
}
