//! `POST /v1/rerank` — reranking support for a server started in
//! `Reranking` mode. Grounded in the same
//! `ServerClientExt::post` request/response shape [`crate::client::embeddings`]
//! already uses, generalised to rerank's `{query, documents, top_n}` request
//! and `[{index, relevance_score}]` response.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    LmcppServer,
    error::LmcppResult,
    server::ipc::ServerClientExt,
};

impl LmcppServer {
    /// Scores every document in `request.documents` against `request.query`,
    /// returning results sorted by descending relevance. Requires the server
    /// to have been started in [`crate::server::types::start_args::ServerMode::Reranking`]
    /// mode (`--reranking`); a server not started that way returns a 501/404
    /// from the upstream endpoint, surfaced as [`crate::error::LmcppError::Client`].
    pub fn rerank<A: RerankRequestProvider>(&self, request: A) -> LmcppResult<RerankResponse> {
        request.with_request(|req| {
            let mut resp: RerankResponse = self.client.post("/v1/rerank", req)?;
            resp.results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
            Ok(resp)
        })
    }
}

#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
#[builder(derive(Debug, Clone), finish_fn(vis = "", name = build_internal))]
pub struct RerankRequest {
    #[builder(into)]
    pub query: String,

    pub documents: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
}

impl<S: rerank_request_builder::IsComplete> RerankRequestBuilder<S> {
    pub fn build(self) -> LmcppResult<RerankRequest> {
        let req = self.build_internal();
        if req.documents.is_empty() {
            return Err(crate::error::LmcppError::InvalidConfig {
                field: "documents",
                reason: "`documents` must contain at least one entry".into(),
            });
        }
        Ok(req)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResult {
    pub index: u32,
    pub relevance_score: f32,
}

/// Anything that can present a `&RerankRequest` for one synchronous call,
/// mirroring [`crate::client::embeddings::EmbeddingsRequestProvider`].
pub trait RerankRequestProvider {
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>;
}

impl<'a> RerankRequestProvider for &'a RerankRequest {
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        f(self)
    }
}

impl<'a> RerankRequestProvider for &'a mut RerankRequest {
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        f(self)
    }
}

impl RerankRequestProvider for RerankRequest {
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        f(&self)
    }
}

impl<S> RerankRequestProvider for RerankRequestBuilder<S>
where
    S: rerank_request_builder::IsComplete,
{
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        let req = self.build()?;
        f(&req)
    }
}

impl<'a, S> RerankRequestProvider for &'a RerankRequestBuilder<S>
where
    S: rerank_request_builder::IsComplete,
{
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        let req = self.clone().build()?;
        f(&req)
    }
}

impl<'a, S> RerankRequestProvider for &'a mut RerankRequestBuilder<S>
where
    S: rerank_request_builder::IsComplete,
{
    #[inline]
    fn with_request<F, R>(self, f: F) -> LmcppResult<R>
    where
        F: FnOnce(&RerankRequest) -> LmcppResult<R>,
    {
        let req = self.clone().build()?;
        f(&req)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::server::{builder::LmcppServerLauncher, types::start_args::ServerArgs};

    #[test]
    fn rejects_empty_documents() {
        let err = RerankRequest::builder().query("hello").documents(vec![]).build().unwrap_err();
        assert!(matches!(err, crate::error::LmcppError::InvalidConfig { .. }));
    }

    #[test]
    #[ignore]
    #[serial]
    fn test_lmcpp_server_rerank() -> LmcppResult<()> {
        let client = LmcppServerLauncher::builder()
            .server_args(ServerArgs::builder().reranking(true).default_model()?.build())
            .load()?;

        let request = RerankRequest::builder()
            .query("machine learning")
            .documents(vec!["cats are great".to_string(), "neural networks learn from data".to_string()])
            .build()?;
        let response = client.rerank(&request)?;
        assert_eq!(response.results.len(), 2);
        Ok(())
    }

    #[test]
    #[ignore]
    #[allow(unused_mut)]
    fn test_lmcpp_server_rerank_variants() -> LmcppResult<()> {
        let client = LmcppServer::dummy();

        let req_owned = RerankRequest::builder()
            .query("q")
            .documents(vec!["a".to_string(), "b".to_string()])
            .build()?;
        let _ = client.rerank(req_owned);

        let mut req_owned = RerankRequest::builder()
            .query("q")
            .documents(vec!["a".to_string(), "b".to_string()])
            .build()?;
        let _ = client.rerank(&req_owned);
        let _ = client.rerank(&mut req_owned);

        let req_builder = RerankRequest::builder()
            .query("q")
            .documents(vec!["a".to_string(), "b".to_string()]);
        let _ = client.rerank(req_builder);

        let mut req_builder = RerankRequest::builder()
            .query("q")
            .documents(vec!["a".to_string(), "b".to_string()]);
        let _ = client.rerank(&req_builder);
        let _ = client.rerank(&mut req_builder);

        Ok(())
    }
}
