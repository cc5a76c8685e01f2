use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    context::AssembledContext,
    error,
    retrieval::{RetrievalConfig, Retriever},
};

struct DocragState {
    retriever: Retriever,
    defaults: RetrievalConfig,
}

#[derive(Clone)]
pub struct DocragMcpServer {
    state: Arc<DocragState>,
    tool_router: ToolRouter<Self>,
}

impl DocragMcpServer {
    pub fn new(retriever: Retriever, defaults: RetrievalConfig) -> Self {
        Self {
            state: Arc::new(DocragState {
                retriever,
                defaults,
            }),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocragMcpServer {
    /// Retrieve ranked, citable passages for a question.
    #[tool(
        name = "docrag_retrieve",
        description = "Retrieve the passages most relevant to a question from the indexed documents. Returns numbered passages with their source paths for citation. Optional diversity (MMR), lexical fusion (BM25) and reranking stages."
    )]
    pub async fn docrag_retrieve(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let config = params.config(&self.state.defaults);
        let query = params.query;

        let state = Arc::clone(&self.state);
        let context = tokio::task::spawn_blocking(move || {
            state.retriever.retrieve_context(&query, &config)
        })
        .await
        .map_err(|e| mcp_error("retrieval task failed", e))?
        .map_err(retrieval_error)?;

        let summary = format_summary(&context);
        let structured = serde_json::to_value(&context)
            .map_err(|e| mcp_error("failed to serialize passages", e))?;

        let mut result = CallToolResult::default();
        result.content = vec![Content::text(summary)];
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        result.meta = None;
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocragMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = "docrag".to_string();
        server_info.title = Some("docrag MCP".to_string());
        server_info.version = env!("CARGO_PKG_VERSION").to_string();
        server_info.description = None;
        server_info.icons = None;
        server_info.website_url = None;

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use docrag_retrieve to fetch numbered passages for a question, then cite them as [n] in your answer."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    /// The question to retrieve passages for.
    pub query: String,
    /// Number of passages to return.
    pub k: Option<usize>,
    /// Re-select candidates with maximal marginal relevance.
    pub mmr: Option<bool>,
    /// MMR relevance weight in [0, 1].
    pub lambda: Option<f32>,
    /// Mix BM25 scores into the vector ranking.
    pub lexical: Option<bool>,
    /// BM25 weight in [0, 1].
    pub alpha: Option<f32>,
    /// Rerank with the pairwise scorer.
    pub rerank: Option<bool>,
}

impl RetrieveParams {
    fn config(&self, defaults: &RetrievalConfig) -> RetrievalConfig {
        RetrievalConfig {
            k: self.k.unwrap_or(defaults.k),
            use_diversity: self.mmr.unwrap_or(defaults.use_diversity),
            diversity_lambda: self.lambda.unwrap_or(defaults.diversity_lambda),
            use_lexical_fusion: self.lexical.unwrap_or(defaults.use_lexical_fusion),
            fusion_alpha: self.alpha.unwrap_or(defaults.fusion_alpha),
            use_rerank: self.rerank.unwrap_or(defaults.use_rerank),
        }
    }
}

fn format_summary(context: &AssembledContext) -> String {
    if context.is_empty() {
        return format!("No passages found for \"{}\"", context.query);
    }
    let suffix = if context.len() == 1 { "" } else { "s" };
    format!(
        "Found {} passage{suffix} for \"{}\":\n\n{}",
        context.len(),
        context.query,
        context.context_block()
    )
}

fn retrieval_error(error: error::Error) -> rmcp::ErrorData {
    if error.is_config() {
        return rmcp::ErrorData::invalid_params(error.to_string(), None);
    }
    let stage = error.failed_stage().map(|s| s.as_str());
    rmcp::ErrorData::internal_error(
        "retrieval failed".to_string(),
        Some(json!({ "error": error.to_string(), "stage": stage })),
    )
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(retriever: Retriever, defaults: RetrievalConfig) -> error::Result<()> {
    let server = DocragMcpServer::new(retriever, defaults);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
