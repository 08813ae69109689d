//! The requesting side of the GASP wire protocol (§6.2): a [`RemotePeer`]
//! seam plus an HTTP implementation, grounded in the teacher's
//! `rpc/http_adapter/client.rs` (`reqwest::Client::builder()` with
//! connect/request timeouts and keep-alive pooling).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::OverlayError;
use crate::types::Topic;

use super::wire::{InitialRequest, InitialResponse, Node, NodeRequest};

/// One GASP peer, reachable however the implementation sees fit. The
/// default [`HttpRemotePeer`] speaks JSON over HTTP; tests substitute an
/// in-process mock.
#[async_trait]
pub trait RemotePeer: Send + Sync {
    /// Stable identifier used for `Storage::update_last_interaction`
    /// bookkeeping (§4.4), typically the peer's host.
    fn host(&self) -> &str;

    async fn request_initial(&self, request: &InitialRequest) -> Result<InitialResponse, OverlayError>;

    async fn request_node(&self, topic: &Topic, request: &NodeRequest) -> Result<Node, OverlayError>;

    /// Push a resolved node to `peer` during the reply half of a
    /// bidirectional sync (§4.3). Returns whatever further nodes the peer
    /// still needs to complete this node's dependency graph. Unsupported
    /// in the one-way HTTP client (§6.2): this engine only ever pulls.
    async fn submit_node(&self, topic: &Topic, node: &Node) -> Result<Vec<NodeRequest>, OverlayError>;
}

/// [`RemotePeer`] over plain JSON/HTTP.
pub struct HttpRemotePeer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemotePeer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OverlayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|err| OverlayError::Http {
                status: 0,
                body: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_json<Req, Res>(&self, path: &str, topic: Option<&Topic>, body: &Req) -> Result<Res, OverlayError>
    where
        Req: Serialize + ?Sized + Sync,
        Res: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(&url).json(body);
        if let Some(topic) = topic {
            request = request.header("X-BSV-Topic", topic.0.as_str());
        }
        let response = request.send().await.map_err(|err| OverlayError::Http {
            status: 0,
            body: err.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OverlayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response.json::<Res>().await.map_err(|err| OverlayError::Http {
            status: status.as_u16(),
            body: err.to_string(),
        })
    }
}

#[async_trait]
impl RemotePeer for HttpRemotePeer {
    fn host(&self) -> &str {
        &self.base_url
    }

    async fn request_initial(&self, request: &InitialRequest) -> Result<InitialResponse, OverlayError> {
        self.post_json("requestSyncResponse", Some(&request.topic), request).await
    }

    async fn request_node(&self, topic: &Topic, request: &NodeRequest) -> Result<Node, OverlayError> {
        self.post_json("requestForeignGASPNode", Some(topic), request).await
    }

    /// `SubmitNode` is a push-direction message this one-way client never
    /// sends; §6.2 lists it as unsupported here.
    async fn submit_node(&self, _topic: &Topic, _node: &Node) -> Result<Vec<NodeRequest>, OverlayError> {
        Err(OverlayError::Unsupported("submit_node is not supported by the one-way GASP HTTP client".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn submit_node_reports_unsupported_without_making_a_request() {
        let peer = HttpRemotePeer::new("http://127.0.0.1:1").unwrap();
        let node = Node {
            graph_id: crate::types::Outpoint::new(bitcoin::Txid::from_byte_array([1; 32]), 0),
            tx: crate::codec::RawTx {
                txid: bitcoin::Txid::from_byte_array([1; 32]),
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
            proof: None,
            ancillary_beef: None,
        };
        let err = peer.submit_node(&crate::types::Topic::new("alpha"), &node).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(err, OverlayError::Unsupported(_)));
    }
}
