use std::{path::PathBuf, sync::Arc};

use docrag::{
    ConfigDb,
    VectorDb,
    backend::{self, Backend, BackendChoice},
    chunking::Document,
    embedding::HashingEmbedder,
    ingestion::Ingestor,
    model_manager::DEFAULT_MODEL_ID,
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let config_db = ConfigDb::open(&data_dir.join("config.redb"))?;
    backend::store(
        &config_db,
        &BackendChoice {
            backend: Backend::Hashing,
            model_id: DEFAULT_MODEL_ID.to_string(),
        },
    )?;

    let index = Arc::new(VectorDb::open(&data_dir.join("index.redb"))?);
    Ingestor::new(Arc::new(HashingEmbedder::default()), index).ingest(&[
        Document::new("notes/tides.md", "Tides follow the moon.\nSpring tides are strongest."),
        Document::new("notes/bread.md", "Sourdough bread needs a starter."),
    ])?;

    Ok(())
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("DOCRAG_DATA_DIR", tempdir.path())
                .env("DOCRAG_LOG", "warn")
                .env_remove("DOCRAG_EMBEDDER")
                .env_remove("DOCRAG_MODEL");
        }),
    )?;

    let client = ().serve(transport).await?;

    let tools = client.peer().list_all_tools().await?;
    assert!(tools.iter().any(|t| t.name == "docrag_retrieve"));

    let args = json!({
        "query": "tides moon",
        "k": 1,
        "lexical": true
    });

    let result = client
        .peer()
        .call_tool({
            let mut params = CallToolRequestParams::new("docrag_retrieve");
            params.meta = None;
            params.arguments = Some(args.as_object().unwrap().clone());
            params.task = None;
            params
        })
        .await?;

    let structured = result.structured_content.expect("structured content");
    let passages = structured
        .get("passages")
        .and_then(|v| v.as_array())
        .expect("passages array");

    assert_eq!(passages.len(), 1);
    assert_eq!(
        passages[0].get("source").and_then(|v| v.as_str()),
        Some("notes/tides.md")
    );
    assert_eq!(
        passages[0].get("citation_index").and_then(|v| v.as_u64()),
        Some(1)
    );

    let bad = client
        .peer()
        .call_tool({
            let mut params = CallToolRequestParams::new("docrag_retrieve");
            params.meta = None;
            params.arguments = Some(json!({ "query": "x", "k": 0 }).as_object().unwrap().clone());
            params.task = None;
            params
        })
        .await;
    assert!(bad.is_err());

    client.cancel().await?;
    Ok(())
}

fn docrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
